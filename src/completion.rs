//! The completion sink and typed future bridging the receiver loop to
//! callers.
//!
//! Each message owns exactly one sink. The sink converts the raw reply into
//! a typed result or a failure and delivers it to a single-assignment cell
//! that blocking waiters and registered continuations both observe. A cell
//! resolves exactly once; a second resolution attempt is a programming
//! error and is reported, never swallowed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{RedisError, RedisResult};
use crate::message::MessageState;
use crate::reply::Reply;

type Continuation<T> = Box<dyn FnOnce(&RedisResult<T>) + Send>;

/// Converts a raw reply into a typed outcome.
pub type Extractor<T> = Box<dyn Fn(Reply) -> RedisResult<T> + Send + Sync>;

enum CellState<T> {
    Pending(Vec<Continuation<T>>),
    Done(RedisResult<T>),
}

/// Single-assignment outcome cell: one resolve, many waiters.
pub(crate) struct FutureCell<T> {
    state: Mutex<CellState<T>>,
    notify: Notify,
}

impl<T: Clone> FutureCell<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(FutureCell {
            state: Mutex::new(CellState::Pending(Vec::new())),
            notify: Notify::new(),
        })
    }

    /// Stores the outcome, runs queued continuations in registration order
    /// and wakes every waiter.
    ///
    /// Returns `Err(AlreadyCompleted)` when the cell was already resolved.
    pub(crate) fn resolve(&self, outcome: RedisResult<T>) -> RedisResult<()> {
        let continuations = {
            let mut state = lock(&self.state);
            match &mut *state {
                CellState::Done(_) => return Err(RedisError::AlreadyCompleted),
                CellState::Pending(list) => {
                    let list = std::mem::take(list);
                    *state = CellState::Done(outcome.clone());
                    list
                }
            }
        };

        for continuation in continuations {
            run_isolated(continuation, &outcome);
        }

        self.notify.notify_waiters();
        Ok(())
    }

    pub(crate) fn peek(&self) -> Option<RedisResult<T>> {
        match &*lock(&self.state) {
            CellState::Done(outcome) => Some(outcome.clone()),
            CellState::Pending(_) => None,
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        matches!(&*lock(&self.state), CellState::Done(_))
    }

    /// Registers a continuation: invoked immediately if already resolved,
    /// otherwise queued for invocation at resolution time, exactly once.
    pub(crate) fn on_completed(&self, continuation: Continuation<T>) {
        let ready = {
            let mut state = lock(&self.state);
            match &mut *state {
                CellState::Done(outcome) => Some((continuation, outcome.clone())),
                CellState::Pending(list) => {
                    list.push(continuation);
                    None
                }
            }
        };

        // run outside the lock so a continuation may itself register more
        if let Some((continuation, outcome)) = ready {
            run_isolated(continuation, &outcome);
        }
    }

    async fn ready(&self) -> RedisResult<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before re-checking, or a resolve that lands in
            // between would wake nobody
            notified.as_mut().enable();

            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Continuation failures are isolated per message; they must never take
/// down the receiver loop that invoked them.
fn run_isolated<T>(continuation: Continuation<T>, outcome: &RedisResult<T>) {
    if catch_unwind(AssertUnwindSafe(|| continuation(outcome))).is_err() {
        tracing::warn!("a completion continuation panicked");
    }
}

/// The caller-facing handle for one in-flight operation.
///
/// `wait` is bounded by the connection's sync timeout; on expiry a timeout
/// failure is synthesized locally and the message is left untouched on the
/// wire, so a late reply resolves the cell with nobody listening.
pub struct ReplyFuture<T> {
    cell: Arc<FutureCell<T>>,
    sent_state: Arc<AtomicU8>,
    sync_timeout: Duration,
}

impl<T> std::fmt::Debug for ReplyFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyFuture")
            .field("sync_timeout", &self.sync_timeout)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> ReplyFuture<T> {
    pub(crate) fn new(
        cell: Arc<FutureCell<T>>,
        sent_state: Arc<AtomicU8>,
        sync_timeout: Duration,
    ) -> Self {
        ReplyFuture {
            cell,
            sent_state,
            sync_timeout,
        }
    }

    /// A future with no backing message, used for outcomes that are decided
    /// locally before anything reaches the queue.
    pub(crate) fn detached(cell: Arc<FutureCell<T>>, sync_timeout: Duration) -> Self {
        ReplyFuture {
            cell,
            sent_state: Arc::new(AtomicU8::new(MessageState::NotSent as u8)),
            sync_timeout,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }

    /// Registers a continuation to run when the outcome arrives; it fires
    /// immediately when the outcome is already known.
    pub fn on_completed(&self, continuation: impl FnOnce(&RedisResult<T>) + Send + 'static) {
        self.cell.on_completed(Box::new(continuation));
    }

    /// Waits for the outcome, bounded by the connection's sync timeout.
    pub async fn wait(&self) -> RedisResult<T> {
        self.wait_for(self.sync_timeout).await
    }

    /// Waits with an explicit bound. The timeout is local only; it does not
    /// withdraw the message, which may already be in flight.
    pub async fn wait_for(&self, limit: Duration) -> RedisResult<T> {
        match tokio::time::timeout(limit, self.cell.ready()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if self.sent_state.load(Ordering::SeqCst) == MessageState::NotSent as u8 {
                    Err(RedisError::TimeoutNotSent)
                } else {
                    Err(RedisError::TimeoutSent)
                }
            }
        }
    }
}

/// Resolver side of a message's future, invoked by the receiver loop (or by
/// the engine for synthetic failures).
pub(crate) trait CompletionSink: Send + Sync {
    /// Classifies the reply and delivers the typed value or the failure.
    fn complete(&self, reply: Reply) -> RedisResult<()>;

    /// Delivers a locally synthesized failure without extraction.
    fn fail(&self, error: RedisError) -> RedisResult<()>;
}

pub(crate) struct TypedSink<T> {
    pub(crate) cell: Arc<FutureCell<T>>,
    pub(crate) extract: Extractor<T>,
}

impl<T> CompletionSink for TypedSink<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn complete(&self, reply: Reply) -> RedisResult<()> {
        let outcome = match reply.failure() {
            Some(error) => Err(error),
            None => (self.extract)(reply),
        };
        self.cell.resolve(outcome)
    }

    fn fail(&self, error: RedisError) -> RedisResult<()> {
        self.cell.resolve(Err(error))
    }
}

/// The per-result-kind extractors used by the command surface.
pub(crate) mod extract {
    use std::collections::HashMap;

    use bytes::Bytes;

    use crate::error::RedisResult;
    use crate::reply::Reply;

    pub(crate) fn raw(reply: Reply) -> RedisResult<Reply> {
        Ok(reply)
    }

    /// Success carries no value; failures were classified before extraction.
    pub(crate) fn unit(_reply: Reply) -> RedisResult<()> {
        Ok(())
    }

    pub(crate) fn int64(reply: Reply) -> RedisResult<i64> {
        reply.into_i64()
    }

    pub(crate) fn boolean(reply: Reply) -> RedisResult<bool> {
        reply.into_bool()
    }

    pub(crate) fn float64(reply: Reply) -> RedisResult<f64> {
        reply.into_f64()
    }

    pub(crate) fn opt_bytes(reply: Reply) -> RedisResult<Option<Bytes>> {
        reply.into_bytes()
    }

    pub(crate) fn opt_string(reply: Reply) -> RedisResult<Option<String>> {
        reply.into_string()
    }

    pub(crate) fn string_vec(reply: Reply) -> RedisResult<Vec<String>> {
        reply.into_string_vec()
    }

    pub(crate) fn bytes_vec(reply: Reply) -> RedisResult<Vec<Option<Bytes>>> {
        reply.into_bytes_vec()
    }

    pub(crate) fn string_map(reply: Reply) -> RedisResult<HashMap<String, String>> {
        reply.into_string_map()
    }

    pub(crate) fn score_pairs(reply: Reply) -> RedisResult<Vec<(Bytes, f64)>> {
        reply.into_score_pairs()
    }

    pub(crate) fn hash_map(reply: Reply) -> RedisResult<HashMap<String, Bytes>> {
        reply.into_hash_map()
    }

    /// `EXEC` replies with an array when the transaction committed and the
    /// null array when a watched key aborted it.
    pub(crate) fn committed(reply: Reply) -> RedisResult<bool> {
        match reply {
            Reply::Array(Some(_)) => Ok(true),
            Reply::Array(None) => Ok(false),
            other => Err(crate::error::RedisError::UnexpectedReply {
                expected: "an EXEC array",
                actual: other.describe(),
            }),
        }
    }
}

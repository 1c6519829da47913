//! Transactions and the optimistic lock built on top of them.
//!
//! A transaction buffers sub-messages locally; each caller receives its
//! usual typed future immediately. `execute` moves the whole batch into the
//! owning connection's queue as one composite message, so the sender loop
//! emits `MULTI`, the queued operations and the sealed `EXEC` back to back
//! with no other caller's traffic in between.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::commands::Executor;
use crate::completion::{extract, CompletionSink, Extractor, FutureCell, ReplyFuture, TypedSink};
use crate::connection::Connection;
use crate::error::{RedisError, RedisResult};
use crate::message::{Arg, Command, ExecBody, LockBody, Message, Payload, TransactionBody};

/// A group of messages sent to the server as a single atomic unit.
///
/// The same handle may be re-used to buffer further blocks of commands
/// after `execute`; dropping it unexecuted cancels whatever is buffered.
pub struct Transaction {
    connection: Connection,
    buffered: Mutex<Vec<Message>>,
}

impl Connection {
    /// Allows multiple commands to be buffered and sent as a single atomic
    /// unit.
    pub fn transaction(&self) -> Transaction {
        Transaction {
            connection: self.clone(),
            buffered: Mutex::new(Vec::new()),
        }
    }

    /// Attempts to take an expiring optimistic lock.
    ///
    /// Resolves `true` when the lock was acquired with the requested TTL,
    /// `false` when the key was already held or a racing writer won; a lost
    /// race is not an error.
    pub fn take_lock(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        ttl_seconds: i64,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        let cell = FutureCell::new();
        let sync_timeout = self.engine.config.sync_timeout;

        match Message::new(db, Command::Watch, vec![Arg::string(key)]) {
            Err(error) => {
                let _ = cell.resolve(Err(error));
                ReplyFuture::detached(cell, sync_timeout)
            }
            Ok(watch) => {
                let watch = watch.with_payload(Payload::Lock(LockBody {
                    key: key.to_string(),
                    token: value.into(),
                    ttl_seconds,
                    cell: Arc::clone(&cell),
                }));
                let future = ReplyFuture::new(cell, watch.state_handle(), sync_timeout);
                self.engine.enqueue(watch, queue_jump);
                future
            }
        }
    }

    /// Releases a lock taken with `take_lock` by deleting the key.
    pub fn release_lock(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<bool> {
        self.execute_message(
            Message::new(db, Command::Del, vec![Arg::string(key)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }
}

impl Transaction {
    /// Sends everything buffered so far as one atomic unit.
    ///
    /// Resolves `true` when the transaction committed and `false` when a
    /// watched key aborted it. An empty transaction resolves successfully
    /// without contacting the server.
    pub fn execute(&self, queue_jump: bool) -> ReplyFuture<bool> {
        let ops: Vec<Message> = std::mem::take(&mut *lock(&self.buffered));
        let cell = FutureCell::new();
        let sync_timeout = self.connection.engine.config.sync_timeout;

        if ops.is_empty() {
            let _ = cell.resolve(Ok(true));
            return ReplyFuture::detached(cell, sync_timeout);
        }

        let exec = Message::control(Command::Exec)
            .critical()
            .with_payload(Payload::Exec(ExecBody { queued: Vec::new() }));
        let sink: Box<dyn CompletionSink> = Box::new(TypedSink {
            cell: Arc::clone(&cell),
            extract: Box::new(extract::committed),
        });
        if let Err(error) = exec.attach_sink(sink) {
            self.connection.engine.reporter.report("attaching sink", &error);
        }

        let multi = Message::control(Command::Multi)
            .expect_reply(Command::Ok)
            .with_payload(Payload::Transaction(TransactionBody {
                ops,
                exec: Box::new(exec),
            }));

        let future = ReplyFuture::new(cell, multi.state_handle(), sync_timeout);
        self.connection.engine.enqueue(multi, queue_jump);
        future
    }

    /// Discards any buffered commands, resolving every accumulated future
    /// with the cancelled outcome. Nothing is sent.
    pub fn discard(&self) {
        let ops: Vec<Message> = std::mem::take(&mut *lock(&self.buffered));
        for op in ops {
            if let Err(error) = op.cancel() {
                self.connection
                    .engine
                    .reporter
                    .report("discarding transaction", &error);
            }
        }
    }

    /// Number of commands currently buffered.
    pub fn buffered_count(&self) -> usize {
        lock(&self.buffered).len()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.discard();
    }
}

impl Executor for Transaction {
    fn deliver<T>(
        &self,
        message: RedisResult<Message>,
        extract: Extractor<T>,
        _queue_jump: bool,
    ) -> ReplyFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = FutureCell::new();
        let sync_timeout = self.connection.engine.config.sync_timeout;

        let message = match message {
            Err(error) => {
                let _ = cell.resolve(Err(error));
                return ReplyFuture::detached(cell, sync_timeout);
            }
            Ok(message) => message,
        };

        // composite operations cannot be buffered inside a transaction
        if message.is_composite() {
            let _ = cell.resolve(Err(RedisError::NestedTransaction));
            return ReplyFuture::detached(cell, sync_timeout);
        }

        let future = ReplyFuture::new(Arc::clone(&cell), message.state_handle(), sync_timeout);
        let sink: Box<dyn CompletionSink> = Box::new(TypedSink { cell, extract });
        if let Err(error) = message.attach_sink(sink) {
            self.connection.engine.reporter.report("attaching sink", &error);
        }

        lock(&self.buffered).push(message);
        future
    }

    fn admin_allowed(&self) -> bool {
        self.connection.engine.config.allow_admin
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! The outbound message queue.
//!
//! Arbitrary caller tasks enqueue; only the sender loop dequeues. Two lanes:
//! queue-jump entries always leave before normal entries, FIFO within each
//! lane. The queue is bounded, closable, and synthesizes a keep-alive ping
//! when it has been idle for the configured interval.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::RedisError;
use crate::message::Message;

pub(crate) struct MessageQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
    max_unsent: usize,
    keep_alive_seconds: AtomicU64,
}

struct Lanes {
    jump: VecDeque<Message>,
    normal: VecDeque<Message>,
    closed: bool,
}

pub(crate) enum Dequeued {
    Item {
        message: Message,
        queue_jump: bool,
        /// Write-side hint: flush now for queue-jump traffic and whenever
        /// the queue drained empty, batch otherwise.
        should_flush: bool,
    },
    Closed,
}

impl MessageQueue {
    pub(crate) fn new(max_unsent: usize) -> Self {
        MessageQueue {
            lanes: Mutex::new(Lanes {
                jump: VecDeque::new(),
                normal: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            max_unsent,
            keep_alive_seconds: AtomicU64::new(0),
        }
    }

    /// Adds a message to the chosen lane.
    ///
    /// Failure hands the message back so the caller can resolve it; a full
    /// queue is a reported error, never a silent drop.
    pub(crate) fn enqueue(
        &self,
        message: Message,
        queue_jump: bool,
    ) -> Result<(), (Message, RedisError)> {
        {
            let mut lanes = lock(&self.lanes);

            if lanes.closed {
                return Err((
                    message,
                    RedisError::ConnectionClosed("the unsent queue is closed".to_string()),
                ));
            }

            if lanes.jump.len() + lanes.normal.len() >= self.max_unsent {
                return Err((message, RedisError::QueueFull(self.max_unsent)));
            }

            if queue_jump {
                lanes.jump.push_back(message);
            } else {
                lanes.normal.push_back(message);
            }
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Blocking dequeue used by the sender loop only.
    ///
    /// Returns `Closed` once the queue is closed and fully drained. When a
    /// keep-alive interval is armed and nothing arrives within it, a
    /// synthetic ping is returned instead; real traffic always wins because
    /// the ping is only created while the queue is empty.
    pub(crate) async fn dequeue(&self) -> Dequeued {
        loop {
            let notified = self.notify.notified();

            {
                let mut lanes = lock(&self.lanes);

                if let Some(message) = lanes.jump.pop_front() {
                    return Dequeued::Item {
                        message,
                        queue_jump: true,
                        should_flush: true,
                    };
                }

                if let Some(message) = lanes.normal.pop_front() {
                    let drained = lanes.normal.is_empty() && lanes.jump.is_empty();
                    return Dequeued::Item {
                        message,
                        queue_jump: false,
                        should_flush: drained,
                    };
                }

                if lanes.closed {
                    return Dequeued::Closed;
                }
            }

            let interval = self.keep_alive_seconds.load(Ordering::SeqCst);
            if interval == 0 {
                notified.await;
                continue;
            }

            if tokio::time::timeout(Duration::from_secs(interval), notified)
                .await
                .is_err()
            {
                let idle = {
                    let lanes = lock(&self.lanes);
                    !lanes.closed && lanes.jump.is_empty() && lanes.normal.is_empty()
                };
                if idle {
                    return Dequeued::Item {
                        message: Message::keep_alive(),
                        queue_jump: false,
                        should_flush: true,
                    };
                }
            }
        }
    }

    /// Withdraws everything still pending, queue-jump lane first, FIFO
    /// within each lane. Used for transaction discard and teardown.
    pub(crate) fn dequeue_all(&self) -> Vec<Message> {
        let mut lanes = lock(&self.lanes);
        let mut all = Vec::with_capacity(lanes.jump.len() + lanes.normal.len());
        all.extend(lanes.jump.drain(..));
        all.extend(lanes.normal.drain(..));
        all
    }

    /// Blocks new enqueues. Messages already queued keep draining through
    /// `dequeue`; whether they are written or failed is the sender's call.
    pub(crate) fn close(&self) {
        lock(&self.lanes).closed = true;
        self.notify.notify_one();
        self.notify.notify_waiters();
    }

    /// Arms the keep-alive interval; zero disables it.
    pub(crate) fn set_keep_alive(&self, seconds: u64) {
        self.keep_alive_seconds.store(seconds, Ordering::SeqCst);
        // nudge the sender loop so the new interval takes effect
        self.notify.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        let lanes = lock(&self.lanes);
        lanes.jump.len() + lanes.normal.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

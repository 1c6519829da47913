//! Usage metrics for a connection.
//!
//! The live counters are owned atomic fields on the engine and use
//! lock-free increments; they are read-mostly diagnostics, not
//! correctness-critical state. `Counters` is the point-in-time snapshot
//! handed to callers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct AtomicCounters {
    pub(crate) sent: AtomicU64,
    pub(crate) received: AtomicU64,
    pub(crate) queue_jumpers: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) timeouts: AtomicU64,
    pub(crate) server_errors: AtomicU64,
}

impl AtomicCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Summary statistics for a connection.
#[derive(Debug, Clone)]
pub struct Counters {
    /// Messages written to the server.
    pub messages_sent: u64,
    /// Replies received from the server.
    pub messages_received: u64,
    /// Messages that were sent ahead of queued items.
    pub queue_jumpers: u64,
    /// Queued messages withdrawn without being sent.
    pub messages_cancelled: u64,
    /// Operations that timed out while waiting.
    pub timeouts: u64,
    /// Error replies received from the server.
    pub error_messages: u64,
    /// Messages waiting to be sent.
    pub unsent_queue: usize,
    /// Messages sent and awaiting a reply.
    pub sent_queue: usize,
    /// Commands executed per database, most used first.
    pub db_usage: Vec<(i32, u64)>,
    /// A live round-trip ping sample in milliseconds.
    pub ping_ms: u64,
}

impl Counters {
    pub(crate) fn snapshot(
        counters: &AtomicCounters,
        unsent_queue: usize,
        sent_queue: usize,
        db_usage: &HashMap<i32, u64>,
        ping_ms: u64,
    ) -> Counters {
        let mut db_usage: Vec<(i32, u64)> = db_usage.iter().map(|(db, n)| (*db, *n)).collect();
        db_usage.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Counters {
            messages_sent: counters.sent.load(Ordering::Relaxed),
            messages_received: counters.received.load(Ordering::Relaxed),
            queue_jumpers: counters.queue_jumpers.load(Ordering::Relaxed),
            messages_cancelled: counters.cancelled.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            error_messages: counters.server_errors.load(Ordering::Relaxed),
            unsent_queue,
            sent_queue,
            db_usage,
            ping_ms,
        }
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sent: {}", self.messages_sent)?;
        writeln!(f, "Received: {}", self.messages_received)?;
        writeln!(f, "Cancelled: {}", self.messages_cancelled)?;
        writeln!(f, "Timeouts: {}", self.timeouts)?;
        writeln!(f, "Queue jumpers: {}", self.queue_jumpers)?;
        writeln!(f, "Ping ms: {}", self.ping_ms)?;
        writeln!(f, "Sent queue: {}", self.sent_queue)?;
        writeln!(f, "Unsent queue: {}", self.unsent_queue)?;
        writeln!(f, "Error messages: {}", self.error_messages)?;
        for (db, count) in &self.db_usage {
            writeln!(f, "DB {db}: {count}")?;
        }
        Ok(())
    }
}

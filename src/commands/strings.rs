//! Operations on string values.

use bytes::Bytes;

use crate::completion::{extract, ReplyFuture};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait StringCommands: Executor {
    /// Sets `key` to hold `value`, overwriting any existing value.
    fn set(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<()> {
        self.deliver(
            Message::new(db, Command::Set, vec![Arg::string(key), Arg::blob(value)]),
            Box::new(extract::unit),
            queue_jump,
        )
    }

    /// Sets `key` with a time to live in seconds.
    fn set_with_expiry(
        &self,
        db: i32,
        key: &str,
        seconds: i64,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<()> {
        self.deliver(
            Message::new(
                db,
                Command::SetEx,
                vec![Arg::string(key), Arg::int(seconds), Arg::blob(value)],
            ),
            Box::new(extract::unit),
            queue_jump,
        )
    }

    /// Sets `key` only when it does not yet exist; resolves whether the
    /// value was written.
    fn set_if_not_exists(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::SetNx, vec![Arg::string(key), Arg::blob(value)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// The raw bytes at `key`; `None` when the key does not exist.
    fn get(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::Get, vec![Arg::string(key)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }

    /// The value at `key` as UTF-8 text.
    fn get_string(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Option<String>> {
        self.deliver(
            Message::new(db, Command::Get, vec![Arg::string(key)]),
            Box::new(extract::opt_string),
            queue_jump,
        )
    }

    /// Atomically sets a new value and resolves the old one.
    fn get_set(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::GetSet, vec![Arg::string(key), Arg::blob(value)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }

    /// Appends to the string at `key`; resolves the new length.
    fn append(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::Append, vec![Arg::string(key), Arg::blob(value)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    /// Length of the string at `key`.
    fn string_length(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::Strlen, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn increment(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::Incr, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn increment_by(&self, db: i32, key: &str, delta: i64, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::IncrBy, vec![Arg::string(key), Arg::int(delta)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn decrement(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::Decr, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn decrement_by(&self, db: i32, key: &str, delta: i64, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::DecrBy, vec![Arg::string(key), Arg::int(delta)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }
}

impl<C: Executor + ?Sized> StringCommands for C {}

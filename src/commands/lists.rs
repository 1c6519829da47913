//! Operations on lists.

use bytes::Bytes;

use crate::completion::{extract, ReplyFuture};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait ListCommands: Executor {
    /// Prepends a value; resolves the new list length.
    fn left_push(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::LPush, vec![Arg::string(key), Arg::blob(value)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    /// Appends a value; resolves the new list length.
    fn right_push(
        &self,
        db: i32,
        key: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::RPush, vec![Arg::string(key), Arg::blob(value)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn left_pop(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::LPop, vec![Arg::string(key)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }

    fn right_pop(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::RPop, vec![Arg::string(key)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }

    fn list_length(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::LLen, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    /// The elements between `start` and `stop` inclusive; negative indices
    /// count from the tail.
    fn list_range(
        &self,
        db: i32,
        key: &str,
        start: i64,
        stop: i64,
        queue_jump: bool,
    ) -> ReplyFuture<Vec<Option<Bytes>>> {
        self.deliver(
            Message::new(
                db,
                Command::LRange,
                vec![Arg::string(key), Arg::int(start), Arg::int(stop)],
            ),
            Box::new(extract::bytes_vec),
            queue_jump,
        )
    }

    /// Removes up to `count` occurrences of `value`; resolves how many
    /// were removed.
    fn list_remove(
        &self,
        db: i32,
        key: &str,
        count: i64,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(
                db,
                Command::LRem,
                vec![Arg::string(key), Arg::int(count), Arg::blob(value)],
            ),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn list_index(
        &self,
        db: i32,
        key: &str,
        index: i64,
        queue_jump: bool,
    ) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::LIndex, vec![Arg::string(key), Arg::int(index)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }
}

impl<C: Executor + ?Sized> ListCommands for C {}

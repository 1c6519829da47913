//! Operations on hashes (field/value maps stored at a single key).

use std::collections::HashMap;

use bytes::Bytes;

use crate::completion::{extract, ReplyFuture};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait HashCommands: Executor {
    /// Sets a field; resolves `true` when the field was created rather
    /// than overwritten.
    fn hash_set(
        &self,
        db: i32,
        key: &str,
        field: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(
                db,
                Command::HSet,
                vec![Arg::string(key), Arg::string(field), Arg::blob(value)],
            ),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Sets a field only when absent; resolves whether it was written.
    fn hash_set_if_not_exists(
        &self,
        db: i32,
        key: &str,
        field: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(
                db,
                Command::HSetNx,
                vec![Arg::string(key), Arg::string(field), Arg::blob(value)],
            ),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    fn hash_get(
        &self,
        db: i32,
        key: &str,
        field: &str,
        queue_jump: bool,
    ) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::HGet, vec![Arg::string(key), Arg::string(field)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }

    /// All fields and values, folded into a map.
    fn hash_get_all(
        &self,
        db: i32,
        key: &str,
        queue_jump: bool,
    ) -> ReplyFuture<HashMap<String, Bytes>> {
        self.deliver(
            Message::new(db, Command::HGetAll, vec![Arg::string(key)]),
            Box::new(extract::hash_map),
            queue_jump,
        )
    }

    /// Removes a field; resolves whether it existed.
    fn hash_remove(&self, db: i32, key: &str, field: &str, queue_jump: bool) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::HDel, vec![Arg::string(key), Arg::string(field)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    fn hash_exists(&self, db: i32, key: &str, field: &str, queue_jump: bool) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(
                db,
                Command::HExists,
                vec![Arg::string(key), Arg::string(field)],
            ),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    fn hash_increment(
        &self,
        db: i32,
        key: &str,
        field: &str,
        delta: i64,
        queue_jump: bool,
    ) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(
                db,
                Command::HIncrBy,
                vec![Arg::string(key), Arg::string(field), Arg::int(delta)],
            ),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn hash_keys(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Vec<String>> {
        self.deliver(
            Message::new(db, Command::HKeys, vec![Arg::string(key)]),
            Box::new(extract::string_vec),
            queue_jump,
        )
    }

    fn hash_values(
        &self,
        db: i32,
        key: &str,
        queue_jump: bool,
    ) -> ReplyFuture<Vec<Option<Bytes>>> {
        self.deliver(
            Message::new(db, Command::HVals, vec![Arg::string(key)]),
            Box::new(extract::bytes_vec),
            queue_jump,
        )
    }

    fn hash_length(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::HLen, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }
}

impl<C: Executor + ?Sized> HashCommands for C {}

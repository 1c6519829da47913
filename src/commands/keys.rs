//! Operations on keys regardless of their value type.

use crate::completion::{extract, ReplyFuture};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait KeyCommands: Executor {
    /// Removes `key`; resolves whether it existed.
    fn remove(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::Del, vec![Arg::string(key)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Removes several keys; resolves how many existed.
    fn remove_many(&self, db: i32, keys: &[&str], queue_jump: bool) -> ReplyFuture<i64> {
        let args = keys.iter().map(|key| Arg::string(*key)).collect();
        self.deliver(
            Message::new(db, Command::Del, args),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn exists(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::Exists, vec![Arg::string(key)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Sets a time to live in seconds; resolves whether the timeout was
    /// set. On servers without expire-overwrite this fails for keys that
    /// are already volatile.
    fn expire(&self, db: i32, key: &str, seconds: i64, queue_jump: bool) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::Expire, vec![Arg::string(key), Arg::int(seconds)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Removes an existing timeout; resolves whether one was removed.
    fn persist(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::Persist, vec![Arg::string(key)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Remaining time to live in seconds; negative when the key has no
    /// timeout or does not exist.
    fn time_to_live(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::Ttl, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    fn rename(&self, db: i32, from: &str, to: &str, queue_jump: bool) -> ReplyFuture<()> {
        self.deliver(
            Message::new(db, Command::Rename, vec![Arg::string(from), Arg::string(to)]),
            Box::new(extract::unit),
            queue_jump,
        )
    }

    fn random_key(&self, db: i32, queue_jump: bool) -> ReplyFuture<Option<String>> {
        self.deliver(
            Message::new(db, Command::RandomKey, Vec::new()),
            Box::new(extract::opt_string),
            queue_jump,
        )
    }

    /// The storage type of `key` (`string`, `list`, `hash`, `set`, `zset`
    /// or `none`).
    fn key_type(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Option<String>> {
        self.deliver(
            Message::new(db, Command::Type, vec![Arg::string(key)]),
            Box::new(extract::opt_string),
            queue_jump,
        )
    }

    /// All keys matching `pattern`. Expensive on large databases; meant
    /// for diagnostics.
    fn find_keys(&self, db: i32, pattern: &str, queue_jump: bool) -> ReplyFuture<Vec<String>> {
        self.deliver(
            Message::new(db, Command::Keys, vec![Arg::string(pattern)]),
            Box::new(extract::string_vec),
            queue_jump,
        )
    }

    /// Moves `key` to another database on the same server; resolves
    /// whether it moved.
    fn move_between_dbs(
        &self,
        db: i32,
        key: &str,
        target_db: i32,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(
                db,
                Command::Move,
                vec![Arg::string(key), Arg::int(i64::from(target_db))],
            ),
            Box::new(extract::boolean),
            queue_jump,
        )
    }
}

impl<C: Executor + ?Sized> KeyCommands for C {}

//! Operations on unordered sets.

use bytes::Bytes;

use crate::completion::{extract, ReplyFuture};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait SetCommands: Executor {
    /// Adds a member; resolves whether it was newly added.
    fn set_add(
        &self,
        db: i32,
        key: &str,
        member: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::SAdd, vec![Arg::string(key), Arg::blob(member)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Removes a member; resolves whether it was present.
    fn set_remove(
        &self,
        db: i32,
        key: &str,
        member: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::SRem, vec![Arg::string(key), Arg::blob(member)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    fn set_contains(
        &self,
        db: i32,
        key: &str,
        member: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(
                db,
                Command::SIsMember,
                vec![Arg::string(key), Arg::blob(member)],
            ),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    fn set_members(
        &self,
        db: i32,
        key: &str,
        queue_jump: bool,
    ) -> ReplyFuture<Vec<Option<Bytes>>> {
        self.deliver(
            Message::new(db, Command::SMembers, vec![Arg::string(key)]),
            Box::new(extract::bytes_vec),
            queue_jump,
        )
    }

    fn set_cardinality(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::SCard, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    /// Removes and resolves a random member.
    fn set_pop(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<Option<Bytes>> {
        self.deliver(
            Message::new(db, Command::SPop, vec![Arg::string(key)]),
            Box::new(extract::opt_bytes),
            queue_jump,
        )
    }
}

impl<C: Executor + ?Sized> SetCommands for C {}

//! Server-level commands: ping, info, publish and the admin surface.
//!
//! Admin operations are gated by the connection's `allow_admin` flag;
//! disallowed calls fail immediately and locally, nothing is sent.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::completion::{extract, ReplyFuture};
use crate::error::{RedisError, RedisResult};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait ServerCommands: Executor {
    /// A basic ping/pong pair; resolves the round-trip latency in
    /// milliseconds.
    fn ping(&self, queue_jump: bool) -> ReplyFuture<u64> {
        let started = Instant::now();
        self.deliver(
            Message::new(-1, Command::Ping, Vec::new())
                .map(|message| message.expect_reply(Command::Pong).critical()),
            Box::new(move |_reply| Ok(started.elapsed().as_millis() as u64)),
            queue_jump,
        )
    }

    /// The server's `INFO` text; parse it with
    /// [`parse_info`](crate::connection::parse_info).
    fn info(&self, queue_jump: bool) -> ReplyFuture<Option<String>> {
        self.deliver(
            Message::new(-1, Command::Info, Vec::new()),
            Box::new(extract::opt_string),
            queue_jump,
        )
    }

    /// Posts a message to a channel; resolves the number of subscribers
    /// that received it.
    fn publish(
        &self,
        channel: &str,
        value: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(
                -1,
                Command::Publish,
                vec![Arg::string(channel), Arg::blob(value)],
            ),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    /// Deletes every key in one database.
    fn flush_db(&self, db: i32, queue_jump: bool) -> RedisResult<ReplyFuture<()>> {
        if !self.admin_allowed() {
            return Err(RedisError::AdminDisabled("FLUSHDB"));
        }

        Ok(self.deliver(
            Message::new(db, Command::FlushDb, Vec::new())
                .map(|message| message.expect_reply(Command::Ok)),
            Box::new(extract::unit),
            queue_jump,
        ))
    }

    /// Deletes every key in every database.
    fn flush_all(&self, queue_jump: bool) -> RedisResult<ReplyFuture<()>> {
        if !self.admin_allowed() {
            return Err(RedisError::AdminDisabled("FLUSHALL"));
        }

        Ok(self.deliver(
            Message::new(-1, Command::FlushAll, Vec::new())
                .map(|message| message.expect_reply(Command::Ok)),
            Box::new(extract::unit),
            queue_jump,
        ))
    }

    /// Reads server configuration parameters matching `pattern`.
    fn get_config(
        &self,
        pattern: &str,
        queue_jump: bool,
    ) -> RedisResult<ReplyFuture<HashMap<String, String>>> {
        if !self.admin_allowed() {
            return Err(RedisError::AdminDisabled("CONFIG GET"));
        }

        Ok(self.deliver(
            Message::new(
                -1,
                Command::Config,
                vec![Arg::literal(Command::Get), Arg::string(pattern)],
            ),
            Box::new(extract::string_map),
            queue_jump,
        ))
    }

    /// Writes one server configuration parameter.
    fn set_config(&self, name: &str, value: &str, queue_jump: bool) -> RedisResult<ReplyFuture<()>> {
        if !self.admin_allowed() {
            return Err(RedisError::AdminDisabled("CONFIG SET"));
        }

        Ok(self.deliver(
            Message::new(
                -1,
                Command::Config,
                vec![
                    Arg::literal(Command::Set),
                    Arg::string(name),
                    Arg::string(value),
                ],
            )
            .map(|message| message.expect_reply(Command::Ok)),
            Box::new(extract::unit),
            queue_jump,
        ))
    }

    /// Takes the server out of replica mode (`SLAVEOF NO ONE`).
    fn make_master(&self, queue_jump: bool) -> RedisResult<ReplyFuture<()>> {
        if !self.admin_allowed() {
            return Err(RedisError::AdminDisabled("SLAVEOF"));
        }

        Ok(self.deliver(
            Message::new(
                -1,
                Command::SlaveOf,
                vec![Arg::literal(Command::No), Arg::literal(Command::One)],
            )
            .map(|message| message.expect_reply(Command::Ok)),
            Box::new(extract::unit),
            queue_jump,
        ))
    }

    /// Makes the server a replica of the given master.
    fn make_slave(&self, host: &str, port: u16, queue_jump: bool) -> RedisResult<ReplyFuture<()>> {
        if !self.admin_allowed() {
            return Err(RedisError::AdminDisabled("SLAVEOF"));
        }

        Ok(self.deliver(
            Message::new(
                -1,
                Command::SlaveOf,
                vec![Arg::string(host), Arg::int(i64::from(port))],
            )
            .map(|message| message.expect_reply(Command::Ok)),
            Box::new(extract::unit),
            queue_jump,
        ))
    }
}

impl<C: Executor + ?Sized> ServerCommands for C {}

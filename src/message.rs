//! Commands in flight: the message type, its tagged arguments and the
//! composite payloads used by transactions and the lock primitive.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::completion::{CompletionSink, FutureCell};
use crate::error::{RedisError, RedisResult};
use crate::reply::Reply;
use crate::resp;

/// Command and control-reply literals, written as uppercase ASCII tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // control replies
    Ok,
    Queued,
    Pong,
    // commands
    Append,
    Auth,
    Config,
    Decr,
    DecrBy,
    Del,
    Discard,
    Echo,
    Exec,
    Exists,
    Expire,
    FlushAll,
    FlushDb,
    Get,
    GetSet,
    HDel,
    HExists,
    HGet,
    HGetAll,
    HIncrBy,
    HKeys,
    HLen,
    HSet,
    HSetNx,
    HVals,
    Incr,
    IncrBy,
    Info,
    Keys,
    LIndex,
    LLen,
    LPop,
    LPush,
    LRange,
    LRem,
    Move,
    Multi,
    Persist,
    Ping,
    PSubscribe,
    Publish,
    PUnsubscribe,
    Quit,
    RandomKey,
    Rename,
    RPop,
    RPush,
    SAdd,
    SCard,
    Select,
    Set,
    SetEx,
    SetNx,
    SIsMember,
    SlaveOf,
    SMembers,
    SPop,
    SRem,
    Strlen,
    Subscribe,
    Ttl,
    Type,
    Unsubscribe,
    Unwatch,
    Watch,
    ZAdd,
    ZCard,
    ZIncrBy,
    ZRange,
    ZRem,
    ZScore,
    // argument literals
    No,
    One,
    WithScores,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Ok => "OK",
            Command::Queued => "QUEUED",
            Command::Pong => "PONG",
            Command::Append => "APPEND",
            Command::Auth => "AUTH",
            Command::Config => "CONFIG",
            Command::Decr => "DECR",
            Command::DecrBy => "DECRBY",
            Command::Del => "DEL",
            Command::Discard => "DISCARD",
            Command::Echo => "ECHO",
            Command::Exec => "EXEC",
            Command::Exists => "EXISTS",
            Command::Expire => "EXPIRE",
            Command::FlushAll => "FLUSHALL",
            Command::FlushDb => "FLUSHDB",
            Command::Get => "GET",
            Command::GetSet => "GETSET",
            Command::HDel => "HDEL",
            Command::HExists => "HEXISTS",
            Command::HGet => "HGET",
            Command::HGetAll => "HGETALL",
            Command::HIncrBy => "HINCRBY",
            Command::HKeys => "HKEYS",
            Command::HLen => "HLEN",
            Command::HSet => "HSET",
            Command::HSetNx => "HSETNX",
            Command::HVals => "HVALS",
            Command::Incr => "INCR",
            Command::IncrBy => "INCRBY",
            Command::Info => "INFO",
            Command::Keys => "KEYS",
            Command::LIndex => "LINDEX",
            Command::LLen => "LLEN",
            Command::LPop => "LPOP",
            Command::LPush => "LPUSH",
            Command::LRange => "LRANGE",
            Command::LRem => "LREM",
            Command::Move => "MOVE",
            Command::Multi => "MULTI",
            Command::Persist => "PERSIST",
            Command::Ping => "PING",
            Command::PSubscribe => "PSUBSCRIBE",
            Command::Publish => "PUBLISH",
            Command::PUnsubscribe => "PUNSUBSCRIBE",
            Command::Quit => "QUIT",
            Command::RandomKey => "RANDOMKEY",
            Command::Rename => "RENAME",
            Command::RPop => "RPOP",
            Command::RPush => "RPUSH",
            Command::SAdd => "SADD",
            Command::SCard => "SCARD",
            Command::Select => "SELECT",
            Command::Set => "SET",
            Command::SetEx => "SETEX",
            Command::SetNx => "SETNX",
            Command::SIsMember => "SISMEMBER",
            Command::SlaveOf => "SLAVEOF",
            Command::SMembers => "SMEMBERS",
            Command::SPop => "SPOP",
            Command::SRem => "SREM",
            Command::Strlen => "STRLEN",
            Command::Subscribe => "SUBSCRIBE",
            Command::Ttl => "TTL",
            Command::Type => "TYPE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Unwatch => "UNWATCH",
            Command::Watch => "WATCH",
            Command::ZAdd => "ZADD",
            Command::ZCard => "ZCARD",
            Command::ZIncrBy => "ZINCRBY",
            Command::ZRange => "ZRANGE",
            Command::ZRem => "ZREM",
            Command::ZScore => "ZSCORE",
            Command::No => "NO",
            Command::One => "ONE",
            Command::WithScores => "WITHSCORES",
        }
    }

    /// Static table of commands that do not act on any particular database.
    /// Everything else must carry a database index.
    pub fn is_db_free(&self) -> bool {
        matches!(
            self,
            Command::Ok
                | Command::Queued
                | Command::Pong
                | Command::No
                | Command::One
                | Command::WithScores
                | Command::Auth
                | Command::Config
                | Command::Discard
                | Command::Echo
                | Command::Exec
                | Command::FlushAll
                | Command::Info
                | Command::Multi
                | Command::Ping
                | Command::PSubscribe
                | Command::Publish
                | Command::PUnsubscribe
                | Command::Quit
                | Command::SlaveOf
                | Command::Subscribe
                | Command::Unsubscribe
        )
    }

    pub(crate) fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

/// One tagged command argument.
///
/// Arguments are built through the explicit constructors below and composed
/// into a list at the call site; every kind serializes as a binary-safe bulk
/// string.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(Command),
    Str(String),
    Blob(Bytes),
    Int(i64),
    Float(f64),
}

impl Arg {
    pub fn literal(command: Command) -> Arg {
        Arg::Literal(command)
    }

    pub fn string(value: impl Into<String>) -> Arg {
        Arg::Str(value.into())
    }

    pub fn blob(value: impl Into<Bytes>) -> Arg {
        Arg::Blob(value.into())
    }

    pub fn int(value: i64) -> Arg {
        Arg::Int(value)
    }

    pub fn float(value: f64) -> Arg {
        Arg::Float(value)
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Arg::Literal(command) => resp::write_bulk_bytes(buf, command.as_bytes()),
            Arg::Str(value) => resp::write_bulk_str(buf, value),
            Arg::Blob(value) => resp::write_bulk_bytes(buf, value),
            Arg::Int(value) => resp::write_bulk_i64(buf, *value),
            Arg::Float(value) => resp::write_bulk_f64(buf, *value),
        }
    }

    fn describe(&self) -> String {
        match self {
            Arg::Literal(command) => command.as_str().to_string(),
            Arg::Str(value) if value.len() < 20 => format!("\"{value}\""),
            Arg::Str(value) => format!("\"{}...[{}]", &value[..15], value.len()),
            Arg::Blob(value) => format!("{{{} bytes}}", value.len()),
            Arg::Int(value) => value.to_string(),
            Arg::Float(value) => value.to_string(),
        }
    }
}

/// Send-state of a message, advanced with atomic claims so the sender loop
/// and cancellation never both act on the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageState {
    NotSent = 0,
    Sent = 1,
    Complete = 2,
    Cancelled = 3,
}

/// What a message emits when its turn to send arrives.
pub(crate) enum Payload {
    /// A plain command.
    Simple,
    /// A `MULTI` carrier: emits its buffered operations wrapped to expect
    /// `QUEUED`, then the sealed `EXEC`.
    Transaction(TransactionBody),
    /// The sealed `EXEC`; its array reply is walked positionally against
    /// the queued operations.
    Exec(ExecBody),
    /// A `WATCH` carrier driving the optimistic lock sequence.
    Lock(LockBody),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadKind {
    Simple,
    Transaction,
    Exec,
    Lock,
}

pub(crate) struct TransactionBody {
    pub(crate) ops: Vec<Message>,
    pub(crate) exec: Box<Message>,
}

pub(crate) struct ExecBody {
    pub(crate) queued: Vec<Message>,
}

pub(crate) struct LockBody {
    pub(crate) key: String,
    pub(crate) token: Bytes,
    pub(crate) ttl_seconds: i64,
    pub(crate) cell: Arc<FutureCell<bool>>,
}

enum Settlement {
    Reply(Reply),
    Fail(RedisError),
}

/// A serializable command plus the metadata needed to route its reply:
/// target database, optional expected control literal, the critical flag
/// and exactly one completion sink.
///
/// A message is owned solely by the queue currently holding it; it is
/// completed exactly once and then discarded.
pub struct Message {
    db: i32,
    command: Command,
    args: Vec<Arg>,
    expected: Option<Command>,
    critical: bool,
    state: Arc<AtomicU8>,
    sink: Mutex<Option<Box<dyn CompletionSink>>>,
    payload: Payload,
}

impl Message {
    /// Builds a message, validating the database polarity of the command
    /// against the static table.
    pub fn new(db: i32, command: Command, args: Vec<Arg>) -> RedisResult<Message> {
        if command.is_db_free() {
            if db >= 0 {
                return Err(RedisError::DbNotAllowed(command.as_str()));
            }
        } else if db < 0 {
            return Err(RedisError::DbRequired(command.as_str()));
        }

        Ok(Message::raw(db, command, args))
    }

    pub(crate) fn raw(db: i32, command: Command, args: Vec<Arg>) -> Message {
        Message {
            db,
            command,
            args,
            expected: None,
            critical: false,
            state: Arc::new(AtomicU8::new(MessageState::NotSent as u8)),
            sink: Mutex::new(None),
            payload: Payload::Simple,
        }
    }

    /// A database-free control message with no arguments.
    pub(crate) fn control(command: Command) -> Message {
        Message::raw(-1, command, Vec::new())
    }

    /// The `SELECT` injected when a message targets a different database
    /// than the last one selected on the wire.
    pub(crate) fn select(db: i32) -> Message {
        Message::raw(db, Command::Select, vec![Arg::int(i64::from(db))])
            .expect_reply(Command::Ok)
            .critical()
    }

    /// The zero-payload ping synthesized by the keep-alive timer.
    pub(crate) fn keep_alive() -> Message {
        Message::control(Command::Ping)
            .expect_reply(Command::Pong)
            .critical()
    }

    /// Declares the control literal the reply must match; a mismatch is
    /// substituted with an error reply.
    pub(crate) fn expect_reply(mut self, literal: Command) -> Message {
        debug_assert!(self.expected.is_none(), "expectation already set");
        self.expected = Some(literal);
        self
    }

    /// Marks a validation failure on this message as fatal for the whole
    /// connection.
    pub(crate) fn critical(mut self) -> Message {
        self.critical = true;
        self
    }

    pub(crate) fn with_payload(mut self, payload: Payload) -> Message {
        self.payload = payload;
        self
    }

    pub(crate) fn db(&self) -> i32 {
        self.db
    }

    pub(crate) fn command(&self) -> Command {
        self.command
    }

    pub(crate) fn expected_literal(&self) -> Option<&'static [u8]> {
        self.expected.map(|literal| literal.as_bytes())
    }

    pub(crate) fn expected(&self) -> Option<Command> {
        self.expected
    }

    pub(crate) fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn payload_kind(&self) -> PayloadKind {
        match self.payload {
            Payload::Simple => PayloadKind::Simple,
            Payload::Transaction(_) => PayloadKind::Transaction,
            Payload::Exec(_) => PayloadKind::Exec,
            Payload::Lock(_) => PayloadKind::Lock,
        }
    }

    pub(crate) fn is_composite(&self) -> bool {
        matches!(
            self.payload_kind(),
            PayloadKind::Transaction | PayloadKind::Lock
        )
    }

    pub(crate) fn state_handle(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.state)
    }

    pub(crate) fn state(&self) -> MessageState {
        match self.state.load(Ordering::SeqCst) {
            0 => MessageState::NotSent,
            1 => MessageState::Sent,
            2 => MessageState::Complete,
            _ => MessageState::Cancelled,
        }
    }

    /// Attaches the completion sink; set exactly once before the message
    /// leaves the caller's hands.
    pub(crate) fn attach_sink(&self, sink: Box<dyn CompletionSink>) -> RedisResult<()> {
        let mut slot = lock(&self.sink);
        if slot.is_some() {
            return Err(RedisError::SinkAlreadyAssigned);
        }
        *slot = Some(sink);
        Ok(())
    }

    /// Atomically claims the not-yet-sent state. A failed claim means the
    /// message was already cancelled and someone else resolved it.
    pub(crate) fn claim_send(&self) -> bool {
        self.state
            .compare_exchange(
                MessageState::NotSent as u8,
                MessageState::Sent as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn take_transaction(&mut self) -> Option<TransactionBody> {
        match std::mem::replace(&mut self.payload, Payload::Simple) {
            Payload::Transaction(body) => Some(body),
            other => {
                self.payload = other;
                None
            }
        }
    }

    pub(crate) fn take_exec(&mut self) -> Option<ExecBody> {
        match std::mem::replace(&mut self.payload, Payload::Simple) {
            Payload::Exec(body) => Some(body),
            other => {
                self.payload = other;
                None
            }
        }
    }

    pub(crate) fn take_lock(&mut self) -> Option<LockBody> {
        match std::mem::replace(&mut self.payload, Payload::Simple) {
            Payload::Lock(body) => Some(body),
            other => {
                self.payload = other;
                None
            }
        }
    }

    pub(crate) fn set_exec_queued(&mut self, queued: Vec<Message>) {
        if let Payload::Exec(body) = &mut self.payload {
            body.queued = queued;
        }
    }

    /// The correlation shell recorded in the sent queue when this message
    /// is written inside a transaction: same command for diagnostics, but
    /// the wire acknowledgement must be `QUEUED`.
    pub(crate) fn queued_shell(&self) -> Message {
        Message::raw(self.db, self.command, Vec::new())
            .expect_reply(Command::Queued)
            .critical()
    }

    /// Serializes the command as a counted array of bulk strings.
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        resp::write_array_header(buf, self.args.len() + 1);
        resp::write_bulk_bytes(buf, self.command.as_bytes());
        for arg in &self.args {
            arg.write_to(buf);
        }
    }

    /// Delivers a decoded reply to the completion sink.
    pub(crate) fn complete(self, reply: Reply) -> RedisResult<()> {
        self.settle(&Settlement::Reply(reply))
    }

    /// Delivers a locally synthesized failure, recursing into composite
    /// payloads so buffered sub-messages are failed too.
    pub(crate) fn fail(self, error: RedisError) -> RedisResult<()> {
        self.settle(&Settlement::Fail(error))
    }

    /// Resolves a withdrawn, never-sent message with the cancelled outcome.
    pub(crate) fn cancel(self) -> RedisResult<()> {
        let _ = self.state.compare_exchange(
            MessageState::NotSent as u8,
            MessageState::Cancelled as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.settle(&Settlement::Reply(Reply::Cancelled))
    }

    fn settle(mut self, settlement: &Settlement) -> RedisResult<()> {
        let sink = lock(&self.sink).take();
        let mut result = match sink {
            Some(sink) => match settlement {
                Settlement::Reply(reply) => sink.complete(reply.clone()),
                Settlement::Fail(error) => sink.fail(error.clone()),
            },
            None => Ok(()),
        };

        let _ = self.state.compare_exchange(
            MessageState::Sent as u8,
            MessageState::Complete as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        match std::mem::replace(&mut self.payload, Payload::Simple) {
            Payload::Simple => {}
            Payload::Transaction(body) => {
                for op in body.ops {
                    result = result.and(op.settle(settlement));
                }
                result = result.and(body.exec.settle(settlement));
            }
            Payload::Exec(body) => {
                for queued in body.queued {
                    result = result.and(queued.settle(settlement));
                }
            }
            Payload::Lock(body) => {
                let outcome = match settlement {
                    Settlement::Reply(reply) => match reply.failure() {
                        Some(error) => Err(error),
                        None => Ok(false),
                    },
                    Settlement::Fail(error) => Err(error.clone()),
                };
                result = result.and(body.cell.resolve(outcome).map(|_| ()));
            }
        }

        result
    }

    /// One-line summary used in timeout diagnostics.
    pub(crate) fn describe(&self) -> String {
        let mut text = if self.db >= 0 {
            format!("{}: {}", self.db, self.command.as_str())
        } else {
            self.command.as_str().to_string()
        };

        for arg in &self.args {
            text.push(' ');
            text.push_str(&arg.describe());
        }

        text
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("db", &self.db)
            .field("command", &self.command.as_str())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

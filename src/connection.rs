//! The connection engine.
//!
//! A connection multiplexes arbitrary concurrent callers onto one socket.
//! Exactly two long-lived tasks run per connection: the sender loop drains
//! the outbound queue, serializes each message and appends it to the sent
//! queue; the receiver loop decodes replies, pops the sent-queue head and
//! resolves the matching completion sink. Replies arrive strictly in the
//! order messages were written, so the sent queue is the sole correlation
//! mechanism.
//!
//! Callers only ever touch the outbound queue (to enqueue) and a completion
//! sink (to wait); the socket and the sent queue belong to the loops.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};

use crate::commands::server::ServerCommands;
use crate::completion::{extract, CompletionSink, Extractor, FutureCell, ReplyFuture, TypedSink};
use crate::counters::{AtomicCounters, Counters};
use crate::error::{ErrorReporter, RedisError, RedisResult, TracingReporter};
use crate::features::{ServerFeatures, ServerVersion};
use crate::message::{Arg, Command, ExecBody, LockBody, Message, Payload, TransactionBody};
use crate::queue::{Dequeued, MessageQueue};
use crate::reply::Reply;
use crate::resp::ReplyReader;
use crate::subscriber::{self, SubscriberConnection, SubscriptionTable};

/// Size of the outgoing write buffer; writes are batched up to this size
/// unless a flush is requested.
const OUT_BUFFER_SIZE: usize = 512;

/// The default time to wait for an individual command when using `wait`.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// The lifecycle of a connection. Linear; a closed connection is never
/// reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not yet opened.
    Fresh = 0,
    /// `open` is in progress.
    Opening = 1,
    /// Fully open; traffic is flowing.
    Open = 2,
    /// The outbound queue is closed and draining.
    Closing = 3,
    /// Torn down; all outstanding messages have been failed.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> ConnectionState {
        match value {
            0 => ConnectionState::Fresh,
            1 => ConnectionState::Opening,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Fresh => "fresh",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host of the redis server.
    pub host: String,
    /// Port of the redis server.
    pub port: u16,
    /// Password sent as `AUTH` during open, if any.
    pub password: Option<String>,
    /// Socket connect timeout.
    pub io_timeout: Option<Duration>,
    /// Bound applied by `wait` on individual commands.
    pub sync_timeout: Duration,
    /// Maximum number of queued-but-unsent messages; enqueues beyond this
    /// bound fail with `QueueFull`.
    pub max_unsent: usize,
    /// Whether admin commands (flush, config, replication) are allowed.
    pub allow_admin: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig {
            host: host.into(),
            port: 6379,
            password: None,
            io_timeout: None,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            max_unsent: usize::MAX,
            allow_admin: false,
        }
    }

    pub fn port(mut self, port: u16) -> ConnectionConfig {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> ConnectionConfig {
        self.password = Some(password.into());
        self
    }

    pub fn io_timeout(mut self, limit: Duration) -> ConnectionConfig {
        self.io_timeout = Some(limit);
        self
    }

    pub fn sync_timeout(mut self, limit: Duration) -> ConnectionConfig {
        self.sync_timeout = limit;
        self
    }

    pub fn max_unsent(mut self, bound: usize) -> ConnectionConfig {
        self.max_unsent = bound;
        self
    }

    pub fn allow_admin(mut self, allow: bool) -> ConnectionConfig {
        self.allow_admin = allow;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionKind {
    Command,
    Subscriber,
}

/// Everything the two loops and the caller surface share.
pub(crate) struct Engine {
    pub(crate) config: ConnectionConfig,
    pub(crate) kind: ConnectionKind,
    state: AtomicU8,
    abort: AtomicBool,
    torn_down: AtomicBool,
    pub(crate) unsent: MessageQueue,
    sent: Mutex<VecDeque<Message>>,
    sent_drained: Notify,
    pub(crate) counters: AtomicCounters,
    db_usage: Mutex<HashMap<i32, u64>>,
    features: Mutex<Option<ServerFeatures>>,
    pub(crate) reporter: Box<dyn ErrorReporter>,
    pub(crate) subscriptions: Mutex<SubscriptionTable>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    closed_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

pub(crate) struct FatalError {
    pub(crate) context: String,
    pub(crate) error: Option<RedisError>,
}

impl Engine {
    fn new(
        config: ConnectionConfig,
        reporter: Box<dyn ErrorReporter>,
        kind: ConnectionKind,
    ) -> Arc<Engine> {
        let (closed_tx, closed_rx) = watch::channel(false);
        Arc::new(Engine {
            unsent: MessageQueue::new(config.max_unsent),
            config,
            kind,
            state: AtomicU8::new(ConnectionState::Fresh as u8),
            abort: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            sent: Mutex::new(VecDeque::new()),
            sent_drained: Notify::new(),
            counters: AtomicCounters::default(),
            db_usage: Mutex::new(HashMap::new()),
            features: Mutex::new(None),
            reporter,
            subscriptions: Mutex::new(SubscriptionTable::default()),
            closed_tx,
            closed_rx,
            closed_callbacks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> RedisResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|found| RedisError::InvalidState {
                expected: from.as_str(),
                found: ConnectionState::from_u8(found).as_str(),
            })
    }

    pub(crate) fn is_aborting(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub(crate) fn set_features(&self, features: ServerFeatures) {
        *lock(&self.features) = Some(features);
    }

    pub(crate) fn features(&self) -> Option<ServerFeatures> {
        *lock(&self.features)
    }

    pub(crate) fn log_db_usage(&self, db: i32) {
        *lock(&self.db_usage).entry(db).or_insert(0) += 1;
    }

    pub(crate) fn db_usage(&self) -> HashMap<i32, u64> {
        lock(&self.db_usage).clone()
    }

    pub(crate) fn record_sent(&self, message: Message) {
        lock(&self.sent).push_back(message);
    }

    fn pop_sent(&self) -> Option<Message> {
        let mut sent = lock(&self.sent);
        let message = sent.pop_front();
        if sent.is_empty() {
            // the sender may be draining before it says goodbye
            self.sent_drained.notify_waiters();
        }
        message
    }

    pub(crate) fn sent_len(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Summary of the oldest incomplete-but-sent message; this often points
    /// at the operation monopolising the connection.
    pub(crate) fn timeout_summary(&self) -> Option<String> {
        lock(&self.sent).front().map(Message::describe)
    }

    /// Hands a message to the outbound queue, resolving it locally when the
    /// queue refuses it.
    pub(crate) fn enqueue(&self, message: Message, queue_jump: bool) {
        if self.is_aborting() || self.state() == ConnectionState::Closed {
            self.fail_message(
                message,
                RedisError::ConnectionClosed("the connection is closed".to_string()),
            );
            return;
        }

        if let Err((message, error)) = self.unsent.enqueue(message, queue_jump) {
            self.reporter.report("enqueue", &error);
            self.fail_message(message, error);
        }
    }

    pub(crate) fn fail_message(&self, message: Message, error: RedisError) {
        if let Err(inner) = message.fail(error) {
            self.reporter.report("failing message", &inner);
        }
    }

    pub(crate) fn complete_message(&self, message: Message, reply: Reply) {
        if let Err(error) = message.complete(reply) {
            self.reporter.report("completing message", &error);
        }
    }

    /// Routes one decoded reply. An `Err` is a protocol violation that must
    /// take the whole connection down.
    pub(crate) fn dispatch_reply(&self, reply: Reply) -> Result<(), FatalError> {
        if self.kind == ConnectionKind::Subscriber && subscriber::try_route(self, &reply) {
            return Ok(());
        }

        let Some(message) = self.pop_sent() else {
            return Err(FatalError {
                context: format!(
                    "reply received with no matching message: {}",
                    reply.describe()
                ),
                error: None,
            });
        };

        self.dispatch_to(message, reply)
    }

    fn dispatch_to(&self, mut message: Message, mut reply: Reply) -> Result<(), FatalError> {
        if !reply.is_error() {
            if let Some(expected) = message.expected_literal() {
                if !reply.matches(expected) {
                    reply = Reply::Error(format!(
                        "expected {}, got {}",
                        String::from_utf8_lossy(expected),
                        reply.describe()
                    ));
                }
            }
        }

        let fatal = reply.is_error() && message.is_critical();
        let summary = fatal.then(|| message.describe());

        if let Some(body) = message.take_exec() {
            self.dispatch_exec(message, body, reply)?;
        } else {
            self.complete_message(message, reply);
        }

        if let Some(summary) = summary {
            return Err(FatalError {
                context: format!("a critical operation failed: {summary}"),
                error: None,
            });
        }

        Ok(())
    }

    /// Walks an `EXEC` array positionally against the queued sub-messages,
    /// re-using the normal validation and dispatch path for each.
    fn dispatch_exec(
        &self,
        message: Message,
        body: ExecBody,
        reply: Reply,
    ) -> Result<(), FatalError> {
        match reply {
            Reply::Array(Some(items)) => {
                if items.len() != body.queued.len() {
                    let mismatch = Reply::Error(format!(
                        "{} results expected, {} received",
                        body.queued.len(),
                        items.len()
                    ));
                    for queued in body.queued {
                        self.complete_message(queued, mismatch.clone());
                    }
                    self.complete_message(message, mismatch);
                    return Err(FatalError {
                        context: "transaction reply count mismatch".to_string(),
                        error: None,
                    });
                }

                self.complete_message(message, Reply::Array(Some(items.clone())));
                for (queued, item) in body.queued.into_iter().zip(items) {
                    self.dispatch_to(queued, item)?;
                }
                Ok(())
            }
            // the null array: a watched key changed and the transaction
            // was aborted, so nothing queued ever ran
            Reply::Array(None) => {
                for queued in body.queued {
                    self.complete_message(queued, Reply::Cancelled);
                }
                self.complete_message(message, Reply::Array(None));
                Ok(())
            }
            other => {
                for queued in body.queued {
                    self.complete_message(queued, other.clone());
                }
                self.complete_message(message, other);
                Ok(())
            }
        }
    }

    /// Tears the connection down: fails everything outstanding, raises the
    /// closed notification and releases resources. Idempotent; a second
    /// call is a no-op.
    pub(crate) fn shutdown(&self, cause: &str, error: Option<RedisError>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.abort.store(true, Ordering::SeqCst);
        self.unsent.close();

        let _ = self.transition(ConnectionState::Open, ConnectionState::Closing);
        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);

        match &error {
            Some(inner) => self.reporter.report(cause, inner),
            None => tracing::debug!(cause, "connection shutting down"),
        }

        let failure = match error {
            Some(inner) => RedisError::ConnectionClosed(format!("{cause}: {inner}")),
            None => RedisError::ConnectionClosed(cause.to_string()),
        };

        let in_flight: Vec<Message> = lock(&self.sent).drain(..).collect();
        for message in in_flight {
            self.fail_message(message, failure.clone());
        }
        self.sent_drained.notify_waiters();

        for message in self.unsent.dequeue_all() {
            AtomicCounters::bump(&self.counters.cancelled);
            self.fail_message(message, failure.clone());
        }

        let callbacks: Vec<Box<dyn FnOnce() + Send>> =
            lock(&self.closed_callbacks).drain(..).collect();
        for callback in callbacks {
            callback();
        }

        let _ = self.closed_tx.send(true);
    }
}

/// A thread-safe, multiplexed connection to a redis server.
///
/// A connection should be created once and shared (it is `Clone`) by any
/// number of concurrent callers; one connection per upstream server is
/// usually all an application needs.
#[derive(Clone)]
pub struct Connection {
    pub(crate) engine: Arc<Engine>,
    pub(crate) subscriber: Arc<Mutex<Option<Arc<SubscriberConnection>>>>,
}

impl Connection {
    /// Creates a fresh, unopened connection with the default error reporter.
    pub fn new(config: ConnectionConfig) -> Connection {
        Connection::with_reporter(config, Box::new(TracingReporter))
    }

    /// Creates a fresh connection with an injected error reporter.
    pub fn with_reporter(config: ConnectionConfig, reporter: Box<dyn ErrorReporter>) -> Connection {
        Connection::with_kind(config, reporter, ConnectionKind::Command)
    }

    pub(crate) fn with_kind(
        config: ConnectionConfig,
        reporter: Box<dyn ErrorReporter>,
        kind: ConnectionKind,
    ) -> Connection {
        Connection {
            engine: Engine::new(config, reporter, kind),
            subscriber: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the connection: connects the socket, starts the sender and
    /// receiver loops, authenticates when configured and detects the server
    /// version from the info query.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The connection is `Open`; the info query has resolved
    ///   and the feature set is known
    /// * `Err(RedisError)` - Opening failed; the connection went straight
    ///   to `Closed` and cannot be reused
    pub async fn open(&self) -> RedisResult<()> {
        self.engine
            .transition(ConnectionState::Fresh, ConnectionState::Opening)?;

        match self.open_inner().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.engine
                    .shutdown("failed to open connection", Some(error.clone()));
                Err(error)
            }
        }
    }

    async fn open_inner(&self) -> RedisResult<()> {
        let config = &self.engine.config;
        let connect = TcpStream::connect((config.host.as_str(), config.port));
        let stream = match config.io_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| RedisError::Io("connect timed out".to_string()))?,
            None => connect.await,
        }
        .map_err(|error| RedisError::Io(error.to_string()))?;

        stream
            .set_nodelay(true)
            .map_err(|error| RedisError::Io(error.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(pump_outgoing(Arc::clone(&self.engine), write_half));
        tokio::spawn(pump_incoming(Arc::clone(&self.engine), read_half));

        if let Some(password) = config.password.clone() {
            let auth = Message::raw(-1, Command::Auth, vec![Arg::string(password)])
                .expect_reply(Command::Ok)
                .critical();
            self.engine.enqueue(auth, true);
        }

        self.arm_keep_alive_from_server_timeout();

        let info = self.info(false).wait().await?.unwrap_or_default();
        let details = parse_info(&info);
        if let Some(version) = details
            .get("redis_version")
            .and_then(|text| ServerVersion::parse(text))
        {
            self.engine.set_features(ServerFeatures::new(version));
        }

        self.engine
            .transition(ConnectionState::Opening, ConnectionState::Open)
    }

    /// Asks the server for its idle-connection timeout and arms the queue
    /// keep-alive just under it, so an idle multiplexer is never reaped.
    fn arm_keep_alive_from_server_timeout(&self) {
        let probe = self.execute_message(
            Message::new(
                -1,
                Command::Config,
                vec![Arg::literal(Command::Get), Arg::string("timeout")],
            ),
            Box::new(extract::string_map),
            false,
        );

        let engine = Arc::clone(&self.engine);
        probe.on_completed(move |outcome| {
            if let Ok(options) = outcome {
                if let Some(timeout) = options
                    .get("timeout")
                    .and_then(|text| text.parse::<i64>().ok())
                {
                    // leave a few seconds of contingency
                    if timeout > 15 {
                        engine.unsent.set_keep_alive((timeout - 15) as u64);
                    }
                }
            }
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    /// Features available on the connected server; `None` until open
    /// completes.
    pub fn features(&self) -> Option<ServerFeatures> {
        self.engine.features()
    }

    pub fn server_version(&self) -> Option<ServerVersion> {
        self.engine.features().map(|features| features.version())
    }

    /// Number of messages accepted but not yet answered.
    pub fn outstanding_count(&self) -> usize {
        self.engine.unsent.len() + self.engine.sent_len()
    }

    /// Configures an automatic keep-alive ping at the given interval; zero
    /// disables it.
    pub fn set_keep_alive(&self, seconds: u64) {
        self.engine.unsent.set_keep_alive(seconds);
    }

    /// Closes the connection. A graceful close (`abort = false`) blocks new
    /// enqueues but drains what is already queued and says goodbye; an
    /// aborting close fails everything outstanding immediately.
    pub fn close(&self, abort: bool) {
        if abort {
            self.engine.shutdown("the connection was closed", None);
        } else {
            self.engine.unsent.close();
        }
    }

    /// Resolves once the connection has fully shut down.
    pub async fn closed(&self) {
        let mut rx = self.engine.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Registers a callback invoked when the connection becomes closed; it
    /// fires immediately if the connection already is.
    pub fn on_closed(&self, callback: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut callbacks = lock(&self.engine.closed_callbacks);
            if self.engine.torn_down.load(Ordering::SeqCst) {
                true
            } else {
                callbacks.push(Box::new(callback));
                return;
            }
        };

        if run_now {
            callback();
        }
    }

    /// Waits on a future bounded by the sync timeout, enriching a timeout
    /// with the oldest in-flight command when one exists.
    pub async fn wait<T: Clone>(&self, future: &ReplyFuture<T>) -> RedisResult<T> {
        match future.wait().await {
            Err(error) if error.is_timeout() => {
                AtomicCounters::bump(&self.engine.counters.timeouts);
                match (&error, self.engine.timeout_summary()) {
                    (RedisError::TimeoutSent, Some(summary)) => {
                        Err(RedisError::TimeoutBlockedBy(summary))
                    }
                    _ => Err(error),
                }
            }
            outcome => outcome,
        }
    }

    /// Fresh usage statistics, including a live round-trip ping sample.
    pub async fn counters(&self) -> RedisResult<Counters> {
        // read the queue depths before the ping artificially drains them
        let unsent_queue = self.engine.unsent.len();
        let sent_queue = self.engine.sent_len();
        let db_usage = self.engine.db_usage();
        let ping_ms = self.ping(false).wait().await?;

        Ok(Counters::snapshot(
            &self.engine.counters,
            unsent_queue,
            sent_queue,
            &db_usage,
            ping_ms,
        ))
    }

    /// Builds the future for a message and hands the message to the
    /// outbound queue. Local failures resolve the future immediately
    /// without touching the wire.
    pub(crate) fn execute_message<T>(
        &self,
        message: RedisResult<Message>,
        extract: Extractor<T>,
        queue_jump: bool,
    ) -> ReplyFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = FutureCell::new();
        let sync_timeout = self.engine.config.sync_timeout;

        match message {
            Err(error) => {
                let _ = cell.resolve(Err(error));
                ReplyFuture::detached(cell, sync_timeout)
            }
            Ok(message) => {
                let future =
                    ReplyFuture::new(Arc::clone(&cell), message.state_handle(), sync_timeout);
                let sink: Box<dyn CompletionSink> = Box::new(TypedSink { cell, extract });
                if let Err(error) = message.attach_sink(sink) {
                    self.engine.reporter.report("attaching sink", &error);
                }
                self.engine.enqueue(message, queue_jump);
                future
            }
        }
    }
}

/// The sender half: owns the write side of the socket, the write buffer and
/// the database last selected on the wire.
struct Sender {
    engine: Arc<Engine>,
    writer: OwnedWriteHalf,
    buf: BytesMut,
    db: i32,
}

impl Sender {
    /// Serializes a message into the write buffer and records it in the
    /// sent queue, transparently injecting `SELECT` when the target
    /// database differs from the last one written.
    ///
    /// Inside a transaction (`queued` is `Some`) the wire acknowledgement
    /// for each write is `QUEUED`, so a correlation shell expecting that
    /// literal is recorded instead and the real message joins the queued
    /// list for the `EXEC` walk; an injected `SELECT` joins it too.
    fn send_simple(&mut self, message: Message, mut queued: Option<&mut Vec<Message>>) {
        let db = message.db();

        if db >= 0 {
            if db != self.db {
                self.db = db;
                let select = Message::select(db);
                let _ = select.claim_send();
                match queued.as_deref_mut() {
                    Some(list) => self.write_queued(select, list),
                    None => self.write_plain(select),
                }
            }
            self.engine.log_db_usage(db);
        }

        match queued {
            Some(list) => self.write_queued(message, list),
            None => self.write_plain(message),
        }
    }

    fn write_plain(&mut self, message: Message) {
        message.encode(&mut self.buf);
        self.engine.record_sent(message);
        AtomicCounters::bump(&self.engine.counters.sent);
    }

    fn write_queued(&mut self, message: Message, queued: &mut Vec<Message>) {
        message.encode(&mut self.buf);
        let shell = message.queued_shell();
        let _ = shell.claim_send();
        self.engine.record_sent(shell);
        queued.push(message);
        AtomicCounters::bump(&self.engine.counters.sent);
    }

    async fn send(&mut self, mut message: Message) -> RedisResult<()> {
        if let Some(body) = message.take_transaction() {
            return self.send_transaction(message, body).await;
        }
        if let Some(body) = message.take_lock() {
            return self.send_lock(message, body).await;
        }

        self.send_simple(message, None);
        Ok(())
    }

    /// Emits `MULTI`, the buffered operations wrapped as queued, then the
    /// sealed `EXEC`. The whole block leaves this loop back to back, so no
    /// other caller's traffic can interleave with it.
    async fn send_transaction(
        &mut self,
        multi: Message,
        body: TransactionBody,
    ) -> RedisResult<()> {
        self.send_simple(multi, None);

        let mut queued = Vec::with_capacity(body.ops.len());
        for op in body.ops {
            if !op.claim_send() {
                AtomicCounters::bump(&self.engine.counters.cancelled);
                continue;
            }
            self.send_simple(op, Some(&mut queued));
        }

        let mut exec = *body.exec;
        exec.set_exec_queued(queued);
        let _ = exec.claim_send();
        self.write_plain(exec);

        Ok(())
    }

    /// The optimistic lock: `WATCH`, a synchronous `EXISTS` check, then
    /// either `UNWATCH` (already held) or `MULTI`/`SETNX`/`EXPIRE`/`EXEC`.
    ///
    /// The wait on `EXISTS` happens inside the sender path on purpose: the
    /// follow-up commands must be emitted before any other caller's traffic
    /// interleaves on this connection. It serializes lock attempts behind a
    /// round trip, which makes this sequence a latency hot spot.
    async fn send_lock(&mut self, watch: Message, body: LockBody) -> RedisResult<()> {
        let db = watch.db();

        self.send_simple(watch, None);
        // push the WATCH out now; waiting on a reply stuck in our own
        // write buffer would deadlock the sender
        self.flush(true).await?;

        let cell = FutureCell::new();
        let exists = Message::raw(db, Command::Exists, vec![Arg::string(body.key.clone())]);
        let exists_state = exists.state_handle();
        let sink: Box<dyn CompletionSink> = Box::new(TypedSink {
            cell: Arc::clone(&cell),
            extract: Box::new(extract::boolean),
        });
        if let Err(error) = exists.attach_sink(sink) {
            self.engine.reporter.report("attaching sink", &error);
        }
        let _ = exists.claim_send();
        self.send_simple(exists, None);
        self.flush(true).await?;

        let exists_future = ReplyFuture::new(cell, exists_state, self.engine.config.sync_timeout);
        match exists_future.wait().await {
            Ok(true) => {
                // obviously locked; just unwatch and report not acquired
                let unwatch = Message::raw(db, Command::Unwatch, Vec::new());
                let _ = unwatch.claim_send();
                self.send_simple(unwatch, None);

                if let Err(error) = body.cell.resolve(Ok(false)) {
                    self.engine.reporter.report("resolving lock", &error);
                }
            }
            Ok(false) => {
                let multi = Message::control(Command::Multi).expect_reply(Command::Ok);
                let _ = multi.claim_send();
                self.send_simple(multi, None);

                let mut queued = Vec::with_capacity(3);
                let setnx = Message::raw(
                    db,
                    Command::SetNx,
                    vec![Arg::string(body.key.clone()), Arg::blob(body.token.clone())],
                );
                let _ = setnx.claim_send();
                self.send_simple(setnx, Some(&mut queued));

                let expire = Message::raw(
                    db,
                    Command::Expire,
                    vec![Arg::string(body.key.clone()), Arg::int(body.ttl_seconds)],
                );
                let _ = expire.claim_send();
                self.send_simple(expire, Some(&mut queued));

                // a committed EXEC means the lock is ours; an aborted one
                // means we lost a race, which is not an error
                let exec = Message::control(Command::Exec)
                    .critical()
                    .with_payload(Payload::Exec(ExecBody { queued }));
                let sink: Box<dyn CompletionSink> = Box::new(TypedSink {
                    cell: body.cell,
                    extract: Box::new(extract::committed),
                });
                if let Err(error) = exec.attach_sink(sink) {
                    self.engine.reporter.report("attaching sink", &error);
                }
                let _ = exec.claim_send();
                self.write_plain(exec);
            }
            Err(error) => {
                let unwatch = Message::raw(db, Command::Unwatch, Vec::new());
                let _ = unwatch.claim_send();
                self.send_simple(unwatch, None);

                if let Err(inner) = body.cell.resolve(Err(error)) {
                    self.engine.reporter.report("resolving lock", &inner);
                }
            }
        }

        // the tail of the sequence should not linger in the write buffer
        self.flush(true).await
    }

    /// Writes the buffer to the socket. Queue-jump traffic flushes
    /// immediately; batched traffic goes out once the buffer passes its
    /// size threshold or the queue drains.
    async fn flush(&mut self, all: bool) -> RedisResult<()> {
        if self.buf.is_empty() || (!all && self.buf.len() < OUT_BUFFER_SIZE) {
            return Ok(());
        }

        let data = self.buf.split();
        self.writer
            .write_all(&data)
            .await
            .map_err(|error| RedisError::Io(error.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|error| RedisError::Io(error.to_string()))
    }

    /// Waits until every sent message has been answered, bounded by the
    /// sync timeout; used before the goodbye `QUIT` so its reply is the
    /// last one on the stream.
    async fn drain_sent(&self) {
        let deadline = tokio::time::Instant::now() + self.engine.config.sync_timeout;

        loop {
            let notified = self.engine.sent_drained.notified();
            tokio::pin!(notified);
            // register before re-checking so the receiver's wakeup cannot
            // fall between the length check and the wait
            notified.as_mut().enable();

            if self.engine.sent_len() == 0 {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return;
            }
        }
    }
}

/// The sender loop. Runs for the connection's lifetime on its own task.
pub(crate) async fn pump_outgoing(engine: Arc<Engine>, writer: OwnedWriteHalf) {
    tracing::debug!("send pump starting");

    let mut sender = Sender {
        engine: Arc::clone(&engine),
        writer,
        buf: BytesMut::with_capacity(OUT_BUFFER_SIZE),
        db: 0,
    };

    loop {
        match engine.unsent.dequeue().await {
            Dequeued::Closed => break,
            Dequeued::Item {
                message,
                queue_jump,
                should_flush,
            } => {
                if engine.is_aborting() {
                    engine.fail_message(
                        message,
                        RedisError::ConnectionClosed(
                            "the connection aborted before this message was sent".to_string(),
                        ),
                    );
                    continue;
                }

                if !message.claim_send() {
                    // already cancelled; someone else resolved it
                    AtomicCounters::bump(&engine.counters.cancelled);
                    continue;
                }

                if queue_jump {
                    AtomicCounters::bump(&engine.counters.queue_jumpers);
                }

                let mut result = sender.send(message).await;
                if result.is_ok() {
                    result = sender.flush(should_flush).await;
                }
                if let Err(error) = result {
                    engine.shutdown("write failed", Some(error));
                }
            }
        }
    }

    let _ = engine.transition(ConnectionState::Open, ConnectionState::Closing);

    if !engine.is_aborting() {
        sender.drain_sent().await;
        let quit = Message::control(Command::Quit)
            .expect_reply(Command::Ok)
            .critical();
        let _ = quit.claim_send();
        sender.write_plain(quit);
        if let Err(error) = sender.flush(true).await {
            engine.reporter.report("sending quit", &error);
        }
    }

    tracing::debug!("send pump exiting");
}

/// The receiver loop. Decodes as many complete replies as the stream
/// yields; end-of-stream or a decode fault tears the connection down.
pub(crate) async fn pump_incoming(engine: Arc<Engine>, reader: OwnedReadHalf) {
    tracing::debug!("read pump starting");

    let mut reader = ReplyReader::new(reader);
    let mut closed = engine.closed_rx.clone();

    loop {
        let read = tokio::select! {
            result = reader.read_reply() => result,
            _ = closed.changed() => break,
        };

        match read {
            Ok(Some(reply)) => {
                AtomicCounters::bump(&engine.counters.received);
                if let Reply::Error(text) = &reply {
                    AtomicCounters::bump(&engine.counters.server_errors);
                    engine
                        .reporter
                        .report("redis server", &RedisError::Server(text.clone()));
                }

                if let Err(fatal) = engine.dispatch_reply(reply) {
                    engine.shutdown(&fatal.context, fatal.error);
                    break;
                }
            }
            Ok(None) => {
                engine.shutdown("end of stream", None);
                break;
            }
            Err(error) => {
                engine.shutdown("invalid inbound stream", Some(RedisError::Protocol(error)));
                break;
            }
        }
    }

    tracing::debug!("read pump exiting");
}

/// Parses an `INFO` reply into key/value pairs, skipping comments and blank
/// lines.
pub fn parse_info(text: &str) -> HashMap<String, String> {
    let mut details = HashMap::new();

    for line in text.split("\r\n").flat_map(|chunk| chunk.split('\n')) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            if !key.is_empty() {
                details.insert(key.to_string(), value.to_string());
            }
        }
    }

    details
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

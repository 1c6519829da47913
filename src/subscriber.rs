//! The pub/sub side channel.
//!
//! A subscriber connection is a peer connection driven by the same engine;
//! the one difference is reply routing. Decoded `message` and `pmessage`
//! frames are delivered to per-channel handlers instead of being correlated
//! against the sent queue; subscription acknowledgements still flow through
//! the normal correlation path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::completion::{extract, ReplyFuture};
use crate::connection::{Connection, ConnectionConfig, ConnectionKind, Engine};
use crate::error::{ErrorReporter, RedisResult, TracingReporter};
use crate::message::{Arg, Command, Message};
use crate::reply::Reply;

/// Handler invoked with the channel name and the raw message payload.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    channels: HashMap<String, MessageHandler>,
    patterns: HashMap<String, MessageHandler>,
}

/// Attempts to route a decoded frame as a pub/sub event.
///
/// Returns true when the frame was a `message`/`pmessage` event, whether or
/// not a handler is still registered for it; such frames have no matching
/// entry in the sent queue and must never reach the correlation path.
pub(crate) fn try_route(engine: &Engine, reply: &Reply) -> bool {
    let Reply::Array(Some(items)) = reply else {
        return false;
    };

    let Some(Reply::Bulk(Some(kind))) = items.first() else {
        return false;
    };

    if &kind[..] == b"message" && items.len() == 3 {
        let (channel, payload) = (text_of(&items[1]), bytes_of(&items[2]));
        let handler = lock(&engine.subscriptions).channels.get(&channel).cloned();
        if let Some(handler) = handler {
            handler(&channel, &payload);
        }
        return true;
    }

    if &kind[..] == b"pmessage" && items.len() == 4 {
        let pattern = text_of(&items[1]);
        let (channel, payload) = (text_of(&items[2]), bytes_of(&items[3]));
        let handler = lock(&engine.subscriptions).patterns.get(&pattern).cloned();
        if let Some(handler) = handler {
            handler(&channel, &payload);
        }
        return true;
    }

    false
}

fn text_of(reply: &Reply) -> String {
    match reply {
        Reply::Bulk(Some(body)) => String::from_utf8_lossy(body).into_owned(),
        Reply::Status(body) => String::from_utf8_lossy(body).into_owned(),
        _ => String::new(),
    }
}

fn bytes_of(reply: &Reply) -> bytes::Bytes {
    match reply {
        Reply::Bulk(Some(body)) => body.clone(),
        Reply::Status(body) => body.clone(),
        _ => bytes::Bytes::new(),
    }
}

/// A dedicated pub/sub connection to a redis server.
pub struct SubscriberConnection {
    inner: Connection,
}

impl SubscriberConnection {
    pub fn new(config: ConnectionConfig) -> SubscriberConnection {
        SubscriberConnection::with_reporter(config, Box::new(TracingReporter))
    }

    pub fn with_reporter(
        config: ConnectionConfig,
        reporter: Box<dyn ErrorReporter>,
    ) -> SubscriberConnection {
        SubscriberConnection {
            inner: Connection::with_kind(config, reporter, ConnectionKind::Subscriber),
        }
    }

    pub async fn open(&self) -> RedisResult<()> {
        self.inner.open().await
    }

    pub fn state(&self) -> crate::connection::ConnectionState {
        self.inner.state()
    }

    pub fn close(&self, abort: bool) {
        self.inner.close(abort);
    }

    pub async fn closed(&self) {
        self.inner.closed().await;
    }

    /// Registers a handler and subscribes to a channel.
    pub fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(&str, &[u8]) + Send + Sync + 'static,
    ) -> ReplyFuture<()> {
        lock(&self.inner.engine.subscriptions)
            .channels
            .insert(channel.to_string(), Arc::new(handler));

        self.inner.execute_message(
            Message::new(-1, Command::Subscribe, vec![Arg::string(channel)]),
            Box::new(extract::unit),
            false,
        )
    }

    /// Drops the channel's handler and unsubscribes.
    pub fn unsubscribe(&self, channel: &str) -> ReplyFuture<()> {
        lock(&self.inner.engine.subscriptions)
            .channels
            .remove(channel);

        self.inner.execute_message(
            Message::new(-1, Command::Unsubscribe, vec![Arg::string(channel)]),
            Box::new(extract::unit),
            false,
        )
    }

    /// Registers a handler and subscribes to a pattern; the handler
    /// receives the concrete channel each message arrived on.
    pub fn pattern_subscribe(
        &self,
        pattern: &str,
        handler: impl Fn(&str, &[u8]) + Send + Sync + 'static,
    ) -> ReplyFuture<()> {
        lock(&self.inner.engine.subscriptions)
            .patterns
            .insert(pattern.to_string(), Arc::new(handler));

        self.inner.execute_message(
            Message::new(-1, Command::PSubscribe, vec![Arg::string(pattern)]),
            Box::new(extract::unit),
            false,
        )
    }

    pub fn pattern_unsubscribe(&self, pattern: &str) -> ReplyFuture<()> {
        lock(&self.inner.engine.subscriptions)
            .patterns
            .remove(pattern);

        self.inner.execute_message(
            Message::new(-1, Command::PUnsubscribe, vec![Arg::string(pattern)]),
            Box::new(extract::unit),
            false,
        )
    }
}

impl Connection {
    /// Creates (or returns the already created) pub/sub connection to the
    /// same server. Racing creators resolve to a single shared channel;
    /// the loser is closed.
    pub async fn subscriber_channel(&self) -> RedisResult<Arc<SubscriberConnection>> {
        if let Some(existing) = lock(&self.subscriber).clone() {
            return Ok(existing);
        }

        let config = ConnectionConfig {
            max_unsent: 100,
            ..self.engine.config.clone()
        };
        let fresh = SubscriberConnection::new(config);
        fresh.open().await?;
        let fresh = Arc::new(fresh);

        let winner = {
            let mut slot = lock(&self.subscriber);
            match &*slot {
                Some(existing) => {
                    let existing = Arc::clone(existing);
                    // we lost the race; the newcomer is surplus
                    fresh.close(true);
                    existing
                }
                None => {
                    *slot = Some(Arc::clone(&fresh));
                    fresh
                }
            }
        };

        Ok(winner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

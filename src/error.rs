//! The error surface shared by every caller-facing operation.
//!
//! Per-message failures and connection-fatal failures travel through the same
//! channel as successes, so the variants here cover everything a completion
//! sink can deliver: server errors, local validation failures, timeouts,
//! cancellation and connection teardown.

use thiserror::Error;

use crate::resp::RespError;

/// Result alias used across the crate.
pub type RedisResult<T> = Result<T, RedisError>;

/// Errors reported by redmux operations.
///
/// Outcomes are cloned to every waiter and continuation registered on a
/// reply future, so all variants are cheap to clone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RedisError {
    /// I/O failure talking to the server.
    #[error("I/O error: {0}")]
    Io(String),
    /// The inbound byte stream violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),
    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),
    /// A reply did not have the shape the operation expected.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: String,
    },
    /// The connection was shut down before the operation completed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// The operation timed out before the message was written to the socket.
    #[error("the operation timed out; the message was not sent")]
    TimeoutNotSent,
    /// The operation timed out after the message was written; it may still
    /// take effect on the server.
    #[error("the operation timed out; the message was sent and may still have effect")]
    TimeoutSent,
    /// Timed out, with a hint about the oldest in-flight message that was
    /// monopolising the connection.
    #[error("the operation timed out; possibly blocked by: {0}")]
    TimeoutBlockedBy(String),
    /// The message was withdrawn before it was sent.
    #[error("the message was cancelled before it was sent")]
    Cancelled,
    /// The unsent queue is at its configured bound.
    #[error("the unsent queue is full ({0} messages)")]
    QueueFull(usize),
    /// Admin commands are disabled for this connection.
    #[error("this connection does not allow admin operations: {0}")]
    AdminDisabled(&'static str),
    /// The command requires a database index but none was given.
    #[error("a database index is required for {0}")]
    DbRequired(&'static str),
    /// The command is database-free but a database index was given.
    #[error("a database index is not valid for {0}")]
    DbNotAllowed(&'static str),
    /// A completion sink was resolved a second time.
    #[error("a completion sink was resolved twice")]
    AlreadyCompleted,
    /// A second completion sink was attached to a message.
    #[error("a completion sink is already assigned to this message")]
    SinkAlreadyAssigned,
    /// The connection was not in the state the operation requires.
    #[error("invalid connection state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
    /// Composite messages cannot be buffered inside a transaction.
    #[error("nested transactions are not supported")]
    NestedTransaction,
    /// A caller-supplied argument failed local validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RedisError {
    /// True for the timeout variants, which are synthesized locally and say
    /// nothing about server-side state.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RedisError::TimeoutNotSent | RedisError::TimeoutSent | RedisError::TimeoutBlockedBy(_)
        )
    }

    /// True when the message never reached the wire.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RedisError::Cancelled)
    }
}

/// Collaborator notified of errors that have no caller to deliver to, such
/// as failures inside a completion callback or server error replies observed
/// by the receiver loop.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &str, error: &RedisError);
}

/// Default reporter backed by `tracing`.
pub(crate) struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, error: &RedisError) {
        tracing::error!(context, %error, "connection error");
    }
}

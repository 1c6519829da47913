//! A multiplexed Redis client.
//!
//! One physical connection is safely shared by any number of concurrent
//! callers: writes are strictly ordered through an outbound queue with a
//! priority ("queue-jump") lane, and replies are correlated back to callers
//! through a FIFO of in-flight messages, because the protocol answers every
//! command in order. On top of the engine sit:
//!
//! - typed futures with blocking waits and continuations
//! - transactions (`MULTI`/`EXEC`) with per-command futures
//! - an optimistic lock built on `WATCH`/`EXISTS`/`SETNX`/`EXPIRE`
//! - a pub/sub peer connection routing messages to per-channel handlers
//! - transparent database selection, keep-alive pings and usage counters
//!
//! The client talks the Redis Serialization Protocol (RESP) and runs its
//! two per-connection loops on Tokio tasks.

pub mod commands;
pub mod completion;
pub mod connection;
pub mod counters;
pub mod error;
pub mod features;
pub mod message;
mod queue;
pub mod reply;
pub mod resp;
pub mod subscriber;
pub mod transaction;

pub use commands::{
    Executor, HashCommands, KeyCommands, ListCommands, ServerCommands, SetCommands,
    SortedSetCommands, StringCommands,
};
pub use completion::ReplyFuture;
pub use connection::{parse_info, Connection, ConnectionConfig, ConnectionState};
pub use counters::Counters;
pub use error::{ErrorReporter, RedisError, RedisResult};
pub use features::{ServerFeatures, ServerVersion};
pub use message::{Arg, Command, Message};
pub use reply::Reply;
pub use subscriber::SubscriberConnection;
pub use transaction::Transaction;

//! The caller-facing command surface.
//!
//! Every operation is a thin builder: construct a message, pick a typed
//! result extractor, hand the message to the executor, return the future.
//! The command traits are implemented for both [`Connection`] (messages go
//! straight to the outbound queue) and [`Transaction`](crate::Transaction)
//! (messages are buffered until `execute`), so the same call sites work
//! inside and outside a transaction.

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod server;
pub mod sets;
pub mod sorted_sets;
pub mod strings;

use crate::completion::{Extractor, ReplyFuture};
use crate::connection::Connection;
use crate::error::RedisResult;
use crate::message::Message;

pub use hashes::HashCommands;
pub use keys::KeyCommands;
pub use lists::ListCommands;
pub use server::ServerCommands;
pub use sets::SetCommands;
pub use sorted_sets::SortedSetCommands;
pub use strings::StringCommands;

/// The dispatch seam between command builders and whatever carries their
/// messages.
pub trait Executor {
    #[doc(hidden)]
    fn deliver<T>(
        &self,
        message: RedisResult<Message>,
        extract: Extractor<T>,
        queue_jump: bool,
    ) -> ReplyFuture<T>
    where
        T: Clone + Send + Sync + 'static;

    #[doc(hidden)]
    fn admin_allowed(&self) -> bool;
}

impl Executor for Connection {
    fn deliver<T>(
        &self,
        message: RedisResult<Message>,
        extract: Extractor<T>,
        queue_jump: bool,
    ) -> ReplyFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.execute_message(message, extract, queue_jump)
    }

    fn admin_allowed(&self) -> bool {
        self.engine.config.allow_admin
    }
}

//! Message port contract for workerlink.
//!
//! A port is the raw, one-message-at-a-time primitive a communicator sits on:
//! something that can post a message and deliver inbound messages. This crate
//! defines that contract ([`Port`] and [`Inbox`]) and ships two adapters:
//! - [`MemoryPort`]: an in-process link between two communicators
//! - [`StreamPort`]: framed messages over any async byte stream pair

pub mod error;
pub mod memory;
pub mod stream;
pub mod traits;

pub use error::{PortError, Result};
pub use memory::MemoryPort;
pub use stream::StreamPort;
pub use traits::{Inbox, InboxSender, Port};

//! Keeps one client's picture of a void's messages in step with the store.
//!
//! [`RoomView`] holds the state and its merge rules; [`MessageStream`] runs
//! a task around it that ingests the push feed, polls, sweeps expired
//! messages and performs the client's own sends and deletions.

mod stream;
mod view;

pub use stream::{MessageStream, SendFailure};
pub use view::{Entry, EntryId, RoomView};

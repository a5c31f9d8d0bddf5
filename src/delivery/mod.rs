//! Outbound delivery: send history and senders.

mod sender;
mod store;

pub use sender::{RateLimitedSender, RecordingSender, SendRequest, Sender};
pub use store::{InMemoryOutboundStore, OutboundRecord, OutboundStore, UserId};

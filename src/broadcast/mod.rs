// Broadcast fan-out
//
// The dispatcher is the single consumer of the event channel and offers
// pre-serialized payloads to per-subscriber bounded queues. A slow
// subscriber drops payloads (counted) instead of slowing ingest.

pub mod dispatcher;
pub mod kafka;
pub mod subscriber;

pub use dispatcher::Dispatcher;
pub use subscriber::{SkipCounter, Subscriber, SubscriptionType};

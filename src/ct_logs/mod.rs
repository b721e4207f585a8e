// Certificate Transparency log ingestion
//
// Discovers CT logs from the public log list, runs one poller per log and
// normalizes every new (pre)certificate into the certstream event model.

pub mod client;
pub mod entry;
pub mod log_counts;
pub mod normalizer;
pub mod poller;
pub mod registry;
pub mod tiles;
pub mod watcher;

pub use client::{CtClient, SignedTreeHead};
pub use entry::{EntryKind, RawEntry};
pub use log_counts::LogCounts;
pub use normalizer::Normalizer;
pub use poller::Poller;
pub use registry::{normalize_ct_url, CtLog, LogKind, LogRegistry};
pub use watcher::Watcher;

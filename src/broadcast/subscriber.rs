// Subscriber handle
//
// The dispatcher-facing side of one sink: a bounded payload queue plus skip
// accounting. The delivery loop (websocket writer or Kafka producer) owns
// the receiving half; writes from the dispatcher never block.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Which projection a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    Full,
    Lite,
    Domain,
}

/// Shared monotonic counter of payloads dropped for one subscriber.
#[derive(Debug, Clone, Default)]
pub struct SkipCounter(Arc<AtomicU64>);

impl SkipCounter {
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One registered subscriber as seen by the dispatcher.
#[derive(Debug)]
pub struct Subscriber {
    name: String,
    sub_type: SubscriptionType,
    tx: mpsc::Sender<Bytes>,
    skipped: SkipCounter,
}

impl Subscriber {
    /// Create a subscriber with a bounded queue. The receiving half goes to
    /// the delivery loop; dropping the Subscriber closes the queue.
    pub fn new(
        name: String,
        sub_type: SubscriptionType,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                name,
                sub_type,
                tx,
                skipped: SkipCounter::default(),
            },
            rx,
        )
    }

    /// Non-blocking enqueue. A full queue drops the payload and counts it;
    /// the subscriber cannot keep up and must not stall the dispatcher.
    pub fn write(&self, payload: Bytes) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(payload) {
            let skipped = self.skipped.increment();
            if skipped % 1000 == 1 {
                warn!(
                    "Not providing client '{}' with cert because its buffer is full. Skipped certs: {}",
                    self.name, skipped
                );
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sub_type(&self) -> SubscriptionType {
        self.sub_type
    }

    pub fn skipped_certs(&self) -> u64 {
        self.skipped.get()
    }

    /// Handle on the skip counter, for delivery loops that drop payloads
    /// themselves (e.g. while a bus connection is down).
    pub fn skip_counter(&self) -> SkipCounter {
        self.skipped.clone()
    }
}

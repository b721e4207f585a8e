// Broadcast dispatcher
//
// Single consumer of the central event channel. For each event it picks the
// cached projection matching every subscriber's type and offers it via a
// non-blocking enqueue. The subscriber list lock is never held across I/O.

use crate::api::example::ExampleStore;
use crate::checkpoint::CheckpointStore;
use crate::ct_logs::LogCounts;
use crate::models::{CachedEntry, Entry};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::info;

use super::subscriber::{Subscriber, SubscriptionType};

/// Every N events one is recorded as the example and progress is logged.
const EXAMPLE_INTERVAL: u64 = 1000;

/// Shared handle over the subscriber list. Cloning is cheap; the dispatcher
/// task is the only reader during broadcast, registration takes the write
/// lock briefly.
#[derive(Clone, Default)]
pub struct Dispatcher {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; it receives broadcasts from the next event on.
    pub fn register(&self, subscriber: Subscriber) {
        let mut subs = self.subscribers.write().expect("subscriber lock poisoned");
        subs.push(subscriber);
        info!("Added new client. Clients: {}", subs.len());
    }

    /// Remove a subscriber by name, closing its queue. Idempotent; never
    /// blocks on the subscriber's delivery state.
    pub fn unregister(&self, name: &str) {
        let mut subs = self.subscribers.write().expect("subscriber lock poisoned");
        if let Some(pos) = subs.iter().position(|s| s.name() == name) {
            subs.swap_remove(pos);
            info!("Removed client '{}'. Clients: {}", name, subs.len());
        }
    }

    pub fn client_count(&self, sub_type: SubscriptionType) -> i64 {
        self.subscribers
            .read()
            .expect("subscriber lock poisoned")
            .iter()
            .filter(|s| s.sub_type() == sub_type)
            .count() as i64
    }

    /// Snapshot of skipped-payload counters per subscriber name.
    pub fn skipped_certs(&self) -> HashMap<String, u64> {
        self.subscribers
            .read()
            .expect("subscriber lock poisoned")
            .iter()
            .map(|s| (s.name().to_string(), s.skipped_certs()))
            .collect()
    }

    /// Consume the event channel until it closes. Runs as its own task.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<Entry>,
        example: ExampleStore,
        counts: Arc<LogCounts>,
        checkpoints: Arc<CheckpointStore>,
    ) {
        info!("Dispatcher started. Listening for certificate entries...");
        let mut processed: u64 = 0;

        while let Some(entry) = rx.recv().await {
            processed += 1;

            let operator = entry.data.source.operator.clone();
            let normalized_url = entry.data.source.normalized_url.clone();
            let index = entry.data.cert_index;

            let cached = Arc::new(CachedEntry::new(entry));

            if processed % EXAMPLE_INTERVAL == 0 {
                info!("Processed {} entries | Queue length: {}", processed, rx.len());
                example.set(cached.clone());
            }

            self.broadcast(&cached);

            counts.inc(&operator, &normalized_url);
            checkpoints.set(&normalized_url, index);
        }

        info!("Event channel closed, dispatcher exiting");
    }

    /// Offer the right projection to every subscriber. Projections are
    /// serialized lazily on first use per kind.
    fn broadcast(&self, cached: &CachedEntry) {
        let subs = self.subscribers.read().expect("subscriber lock poisoned");
        for subscriber in subs.iter() {
            let payload = match subscriber.sub_type() {
                SubscriptionType::Full => cached.full(),
                SubscriptionType::Lite => cached.lite(),
                SubscriptionType::Domain => cached.domains(),
            };
            subscriber.write(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Data, LeafCert, Source};

    fn sample_entry(index: u64) -> Entry {
        Entry::new(Data {
            cert_index: index,
            cert_link: format!("https://ct.example/ct/ct/v1/get-entries?start={0}&end={0}", index),
            chain: None,
            leaf_cert: LeafCert {
                all_domains: vec!["foo.example".to_string()],
                as_der: "AA==".to_string(),
                ..Default::default()
            },
            seen: 0.0,
            source: Source {
                name: "Example log".to_string(),
                url: "https://ct.example/ct".to_string(),
                operator: "ExampleOp".to_string(),
                normalized_url: "ct.example/ct".to_string(),
            },
            update_type: "X509LogEntry".to_string(),
        })
    }

    #[test]
    fn test_register_unregister_and_counts() {
        let dispatcher = Dispatcher::new();
        let (full, _rx_full) = Subscriber::new("a".to_string(), SubscriptionType::Full, 4);
        let (lite, _rx_lite) = Subscriber::new("b".to_string(), SubscriptionType::Lite, 4);
        dispatcher.register(full);
        dispatcher.register(lite);

        assert_eq!(dispatcher.client_count(SubscriptionType::Full), 1);
        assert_eq!(dispatcher.client_count(SubscriptionType::Lite), 1);
        assert_eq!(dispatcher.client_count(SubscriptionType::Domain), 0);

        dispatcher.unregister("a");
        assert_eq!(dispatcher.client_count(SubscriptionType::Full), 0);

        // Unregistering again is a no-op
        dispatcher.unregister("a");
        assert_eq!(dispatcher.client_count(SubscriptionType::Lite), 1);
    }

    #[test]
    fn test_broadcast_delivers_matching_projection() {
        let dispatcher = Dispatcher::new();
        let (full, mut rx_full) = Subscriber::new("full".to_string(), SubscriptionType::Full, 4);
        let (domain, mut rx_domain) =
            Subscriber::new("domain".to_string(), SubscriptionType::Domain, 4);
        dispatcher.register(full);
        dispatcher.register(domain);

        let cached = CachedEntry::new(sample_entry(7));
        dispatcher.broadcast(&cached);

        let full_payload = rx_full.try_recv().unwrap();
        let full_json: serde_json::Value = serde_json::from_slice(&full_payload).unwrap();
        assert_eq!(full_json["message_type"], "certificate_update");

        let domain_payload = rx_domain.try_recv().unwrap();
        let domain_json: serde_json::Value = serde_json::from_slice(&domain_payload).unwrap();
        assert_eq!(domain_json["message_type"], "dns_entries");
        assert_eq!(domain_json["data"], serde_json::json!(["foo.example"]));
    }

    #[test]
    fn test_full_subscriber_does_not_stall_others() {
        let dispatcher = Dispatcher::new();
        let (slow, _rx_slow) = Subscriber::new("slow".to_string(), SubscriptionType::Full, 1);
        let (fast, mut rx_fast) = Subscriber::new("fast".to_string(), SubscriptionType::Full, 16);
        dispatcher.register(slow);
        dispatcher.register(fast);

        for i in 0..5 {
            dispatcher.broadcast(&CachedEntry::new(sample_entry(i)));
        }

        // The fast subscriber got everything
        for _ in 0..5 {
            rx_fast.try_recv().unwrap();
        }
        let skipped = dispatcher.skipped_certs();
        assert_eq!(skipped["slow"], 4);
        assert_eq!(skipped["fast"], 0);
    }

    #[tokio::test]
    async fn test_run_updates_counts_and_checkpoints() {
        let dispatcher = Dispatcher::new();
        let example = ExampleStore::new();
        let counts = Arc::new(LogCounts::new());
        let checkpoints = Arc::new(CheckpointStore::new());

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.clone().run(
            rx,
            example,
            counts.clone(),
            checkpoints.clone(),
        ));

        tx.send(sample_entry(100)).await.unwrap();
        tx.send(sample_entry(101)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(counts.get("ExampleOp", "ct.example/ct"), 2);
        assert_eq!(checkpoints.get("ct.example/ct"), 101);
    }
}

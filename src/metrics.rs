// Prometheus metrics
//
// Gauges are set from live state at scrape time: client counts come from
// the dispatcher, certificate counts from the per-log counters. Skip gauges
// for subscribers that disconnected since the last scrape are unregistered.

use crate::broadcast::{Dispatcher, SubscriptionType};
use crate::ct_logs::LogCounts;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::error;

pub struct Metrics {
    registry: Registry,
    clients: IntGaugeVec,
    certificates: IntGaugeVec,
    certs_by_log: IntGaugeVec,
    skipped: IntGaugeVec,
    known_skip_clients: Mutex<HashSet<String>>,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let clients = IntGaugeVec::new(
            Opts::new(
                "certstreamservergo_clients_total",
                "Number of currently connected clients",
            ),
            &["type"],
        )
        .unwrap();
        let certificates = IntGaugeVec::new(
            Opts::new(
                "certstreamservergo_certificates_total",
                "Number of certificates processed by the CT watcher",
            ),
            &["type"],
        )
        .unwrap();
        let certs_by_log = IntGaugeVec::new(
            Opts::new(
                "certstreamservergo_certs_by_log_total",
                "Number of certificates processed per CT log",
            ),
            &["url", "operator"],
        )
        .unwrap();
        let skipped = IntGaugeVec::new(
            Opts::new(
                "certstreamservergo_skipped_certs",
                "Number of certificates skipped per client due to full buffers",
            ),
            &["client"],
        )
        .unwrap();

        registry.register(Box::new(clients.clone())).unwrap();
        registry.register(Box::new(certificates.clone())).unwrap();
        registry.register(Box::new(certs_by_log.clone())).unwrap();
        registry.register(Box::new(skipped.clone())).unwrap();

        Self {
            registry,
            clients,
            certificates,
            certs_by_log,
            skipped,
            known_skip_clients: Mutex::new(HashSet::new()),
        }
    }

    /// Refresh all series from live state and encode the text exposition.
    pub fn render(&self, dispatcher: &Dispatcher, counts: &LogCounts) -> String {
        self.clients
            .with_label_values(&["full"])
            .set(dispatcher.client_count(SubscriptionType::Full));
        self.clients
            .with_label_values(&["lite"])
            .set(dispatcher.client_count(SubscriptionType::Lite));
        self.clients
            .with_label_values(&["domain"])
            .set(dispatcher.client_count(SubscriptionType::Domain));

        self.certificates
            .with_label_values(&["regular"])
            .set(counts.processed_regular() as i64);
        self.certificates
            .with_label_values(&["precert"])
            .set(counts.processed_precerts() as i64);

        for (operator, urls) in counts.snapshot() {
            for (url, count) in urls {
                self.certs_by_log
                    .with_label_values(&[&url, &operator])
                    .set(count as i64);
            }
        }

        self.update_skip_gauges(dispatcher);

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!("Could not encode metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Set skip gauges for connected subscribers and unregister the series
    /// of subscribers that are gone.
    fn update_skip_gauges(&self, dispatcher: &Dispatcher) {
        let current = dispatcher.skipped_certs();

        let mut known = self
            .known_skip_clients
            .lock()
            .expect("metrics lock poisoned");

        for name in known.iter() {
            if !current.contains_key(name) {
                let _ = self.skipped.remove_label_values(&[name]);
            }
        }

        known.clear();
        for (name, skipped) in &current {
            self.skipped.with_label_values(&[name]).set(*skipped as i64);
            known.insert(name.clone());
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

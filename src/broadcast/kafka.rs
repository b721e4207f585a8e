// Kafka stream processor
//
// A message-bus subscriber: payloads dequeue from the bounded queue and are
// produced onto one topic with a per-write deadline. After a failed write
// the client is considered disconnected for a fixed backoff window; while
// disconnected, payloads keep dequeuing and are dropped (counted as
// skipped) so the queue never wedges.

use crate::config::StreamProcessorConfig;
use crate::error::CertstreamError;
use crate::Result;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::dispatcher::Dispatcher;
use super::subscriber::{Subscriber, SubscriptionType};

/// Per-write deadline
const WRITE_WAIT: Duration = Duration::from_secs(60);

/// How long the client stays in the disconnected state after a failure
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Build the producer, register a full-stream subscriber for it and spawn
/// the delivery loop.
pub fn spawn(
    dispatcher: &Dispatcher,
    config: &StreamProcessorConfig,
    queue_capacity: usize,
) -> Result<()> {
    let addr = format!("{}:{}", config.server_addr, config.server_port);

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &addr)
        .set("message.timeout.ms", "60000")
        .create()
        .map_err(|e| CertstreamError::ClientCreation {
            url: addr.clone(),
            message: e.to_string(),
        })?;

    let (subscriber, rx) = Subscriber::new(config.name.clone(), SubscriptionType::Full, queue_capacity);
    let skipped = subscriber.skip_counter();
    dispatcher.register(subscriber);

    info!(
        "Initialized Kafka producer '{}' for {} (topic '{}')",
        config.name, addr, config.topic
    );

    let client = KafkaClient {
        producer,
        topic: config.topic.clone(),
        name: config.name.clone(),
        addr,
        skipped,
    };
    tokio::spawn(client.delivery_loop(rx, dispatcher.clone()));

    Ok(())
}

struct KafkaClient {
    producer: FutureProducer,
    topic: String,
    name: String,
    addr: String,
    skipped: super::subscriber::SkipCounter,
}

impl KafkaClient {
    async fn delivery_loop(self, mut rx: mpsc::Receiver<bytes::Bytes>, dispatcher: Dispatcher) {
        let mut disconnected_since: Option<Instant> = None;

        while let Some(payload) = rx.recv().await {
            if let Some(since) = disconnected_since {
                if since.elapsed() < RECONNECT_INTERVAL {
                    // Still backing off; drop the payload but keep draining.
                    self.skipped.increment();
                    continue;
                }
                disconnected_since = None;
            }

            let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(payload.as_ref());
            match self.producer.send(record, Timeout::After(WRITE_WAIT)).await {
                Ok(_) => {}
                Err((e, _)) => {
                    error!(
                        "Failed to write message to Kafka at {}: {}. Retrying in {:?}",
                        self.addr, e, RECONNECT_INTERVAL
                    );
                    self.skipped.increment();
                    disconnected_since = Some(Instant::now());
                }
            }
        }

        warn!("Closing delivery loop for Kafka producer '{}'", self.name);
        dispatcher.unregister(&self.name);
    }
}

//! Partitioned Message Consumer
//!
//! Runs one single-threaded processing loop per partition. Messages are
//! routed to a partition by a hash of their key, so all messages for the same
//! request or device are handled in delivery order by the same loop while
//! different keys proceed in parallel.
//!
//! Handlers return an [`Outcome`]; the acknowledgement decision is taken
//! here, not in the business logic. `Success` and `Terminal` acknowledge the
//! message, `Retryable` asks the upstream channel to redeliver it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::crypto::keccak256;
use crate::error::ProcessingError;

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Processed; acknowledge
    Success,
    /// Failed for good; acknowledge so the pipeline keeps moving
    Terminal(String),
    /// Failed for now; withhold acknowledgement so it is redelivered
    Retryable(String),
}

impl Outcome {
    /// Classifies a handler result using the processing error taxonomy.
    pub fn from_result(result: Result<(), ProcessingError>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(e) if e.is_retryable() => Outcome::Retryable(e.to_string()),
            Err(e) => Outcome::Terminal(e.to_string()),
        }
    }

    /// Whether the message should be acknowledged upstream.
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Outcome::Retryable(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Terminal(_) => "terminal",
            Outcome::Retryable(_) => "retryable",
        }
    }
}

/// Business logic for one message type.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(&self, message: M) -> Outcome;
}

struct Delivery<M> {
    key: String,
    message: M,
    ack: oneshot::Sender<Outcome>,
}

/// A pool of partition loops feeding one handler.
pub struct PartitionedConsumer<M> {
    name: &'static str,
    senders: Vec<mpsc::Sender<Delivery<M>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<M: Send + 'static> PartitionedConsumer<M> {
    /// Spawns `partitions` processing loops.
    ///
    /// # Arguments
    ///
    /// * `name` - Consumer name used in logs
    /// * `handler` - Shared message handler
    /// * `partitions` - Number of loops (at least one is always started)
    /// * `capacity` - Queue depth per partition
    /// * `message_timeout` - Upper bound for one `handle` call; exceeding it
    ///   yields `Outcome::Retryable`
    pub fn spawn<H>(
        name: &'static str,
        handler: Arc<H>,
        partitions: usize,
        capacity: usize,
        message_timeout: Duration,
    ) -> Self
    where
        H: MessageHandler<M> + 'static,
    {
        let partitions = partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_partition(
                name,
                partition,
                handler.clone(),
                rx,
                message_timeout,
            )));
        }

        info!("Started {} consumer with {} partitions", name, partitions);
        Self {
            name,
            senders,
            workers,
        }
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> usize {
        let hash = keccak256(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        (u64::from_be_bytes(prefix) % self.senders.len() as u64) as usize
    }

    /// Enqueues a message and waits for its outcome.
    ///
    /// A stopped consumer answers `Retryable` so the upstream redelivers.
    pub async fn deliver(&self, key: &str, message: M) -> Outcome {
        let partition = self.partition_for(key);
        let (ack, outcome) = oneshot::channel();
        let delivery = Delivery {
            key: key.to_string(),
            message,
            ack,
        };

        if self.senders[partition].send(delivery).await.is_err() {
            return Outcome::Retryable(format!("{} consumer is stopped", self.name));
        }

        outcome.await.unwrap_or_else(|_| {
            Outcome::Retryable(format!("{} consumer dropped the message", self.name))
        })
    }

    /// Closes every partition queue and waits for in-flight messages.
    pub async fn shutdown(self) {
        drop(self.senders);
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                error!("{} consumer partition panicked: {}", self.name, e);
            }
        }
        info!("Stopped {} consumer", self.name);
    }

    /// Shuts down a consumer shared behind an `Arc`.
    ///
    /// Returns false, leaving the queues open, while other handles are alive.
    pub async fn shutdown_shared(consumer: Arc<Self>) -> bool {
        match Arc::try_unwrap(consumer) {
            Ok(consumer) => {
                consumer.shutdown().await;
                true
            }
            Err(consumer) => {
                warn!(
                    "{} consumer still has {} other handles; skipping drain",
                    consumer.name,
                    Arc::strong_count(&consumer) - 1
                );
                false
            }
        }
    }
}

async fn run_partition<M, H>(
    name: &'static str,
    partition: usize,
    handler: Arc<H>,
    mut rx: mpsc::Receiver<Delivery<M>>,
    message_timeout: Duration,
) where
    M: Send + 'static,
    H: MessageHandler<M> + ?Sized,
{
    while let Some(delivery) = rx.recv().await {
        let outcome = match tokio::time::timeout(message_timeout, handler.handle(delivery.message))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Retryable(format!(
                "processing exceeded {}ms",
                message_timeout.as_millis()
            )),
        };

        match &outcome {
            Outcome::Success => debug!("{}[{}] {}: processed", name, partition, delivery.key),
            Outcome::Terminal(reason) => error!(
                "{}[{}] {}: dropped after terminal failure: {}",
                name, partition, delivery.key, reason
            ),
            Outcome::Retryable(reason) => warn!(
                "{}[{}] {}: not acknowledged, awaiting redelivery: {}",
                name, partition, delivery.key, reason
            ),
        }

        // The deliverer may have gone away; the outcome is already logged.
        let _ = delivery.ack.send(outcome);
    }
}

//! Unit tests for the partitioned consumer
//!
//! Routing, per-key ordering and outcome delivery with handler doubles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vehicle_registry::consumer::{MessageHandler, Outcome, PartitionedConsumer};

// ============================================================================
// HANDLER DOUBLES
// ============================================================================

/// Records messages in processing order and answers by message content.
#[derive(Default)]
struct ScriptedHandler {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageHandler<String> for ScriptedHandler {
    async fn handle(&self, message: String) -> Outcome {
        self.seen.lock().unwrap().push(message.clone());
        match message.as_str() {
            m if m.starts_with("terminal") => Outcome::Terminal("bad payload".to_string()),
            m if m.starts_with("retry") => Outcome::Retryable("not yet".to_string()),
            _ => Outcome::Success,
        }
    }
}

/// Never finishes within the test timeout.
struct SlowHandler;

#[async_trait]
impl MessageHandler<String> for SlowHandler {
    async fn handle(&self, _message: String) -> Outcome {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Outcome::Success
    }
}

fn spawn<H: MessageHandler<String> + 'static>(
    handler: Arc<H>,
    partitions: usize,
) -> PartitionedConsumer<String> {
    PartitionedConsumer::spawn("test", handler, partitions, 16, Duration::from_secs(2))
}

// ============================================================================
// TESTS
// ============================================================================

/// What is tested: Partition assignment for the same and for many keys
/// Why: All messages of one key must land on one loop so they are handled in order
#[tokio::test]
async fn test_routing_is_stable() {
    let consumer = spawn(Arc::new(ScriptedHandler::default()), 4);

    let first = consumer.partition_for("request-1");
    for _ in 0..10 {
        assert_eq!(consumer.partition_for("request-1"), first);
    }
    for i in 0..100 {
        assert!(consumer.partition_for(&format!("request-{}", i)) < 4);
    }

    consumer.shutdown().await;
}

/// What is tested: Handler outcomes are returned to the deliverer
/// Why: The ingestion layer maps them to acknowledgement decisions
#[tokio::test]
async fn test_outcomes_are_delivered() {
    let consumer = spawn(Arc::new(ScriptedHandler::default()), 2);

    assert_eq!(consumer.deliver("a", "ok".to_string()).await, Outcome::Success);
    assert_eq!(
        consumer.deliver("a", "terminal".to_string()).await,
        Outcome::Terminal("bad payload".to_string())
    );
    let retry = consumer.deliver("b", "retry".to_string()).await;
    assert!(!retry.acknowledges());
    assert_eq!(retry.label(), "retryable");

    consumer.shutdown().await;
}

/// What is tested: Sequential deliveries for one key
/// Why: A single partition loop handles its messages in arrival order
#[tokio::test]
async fn test_same_key_is_processed_in_order() {
    let handler = Arc::new(ScriptedHandler::default());
    let consumer = spawn(handler.clone(), 4);

    for i in 0..5 {
        consumer.deliver("same-key", format!("msg-{}", i)).await;
    }
    consumer.shutdown().await;

    let seen = handler.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
}

/// What is tested: Handler exceeding the message timeout
/// Why: Stuck processing is reported as retryable instead of blocking the partition
#[tokio::test]
async fn test_timeout_is_retryable() {
    let consumer =
        PartitionedConsumer::spawn("slow", Arc::new(SlowHandler), 1, 4, Duration::from_millis(50));

    let outcome = consumer.deliver("k", "anything".to_string()).await;
    assert!(matches!(outcome, Outcome::Retryable(_)));

    consumer.shutdown().await;
}

/// What is tested: Zero partitions requested
/// Why: At least one loop always runs, so every key has somewhere to go
#[tokio::test]
async fn test_zero_partitions_still_runs() {
    let consumer = spawn(Arc::new(ScriptedHandler::default()), 0);

    assert_eq!(consumer.partition_for("anything"), 0);
    assert_eq!(consumer.deliver("anything", "ok".to_string()).await, Outcome::Success);

    consumer.shutdown().await;
}

/// What is tested: Shutting down a shared consumer with and without other live handles
/// Why: The drain only happens once the last handle is released; otherwise it is skipped and reported
#[tokio::test]
async fn test_shutdown_shared_waits_for_last_handle() {
    let handler = Arc::new(ScriptedHandler::default());
    let consumer = Arc::new(spawn(handler.clone(), 2));
    let route_handle = consumer.clone();

    assert!(!PartitionedConsumer::shutdown_shared(consumer).await);
    assert_eq!(
        route_handle.deliver("k", "still-open".to_string()).await,
        Outcome::Success
    );

    assert!(PartitionedConsumer::shutdown_shared(route_handle).await);
    assert_eq!(handler.seen.lock().unwrap().clone(), vec!["still-open"]);
}

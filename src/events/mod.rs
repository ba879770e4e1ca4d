//! 运行完成事件
//!
//! 指定 Agent 运行结束后向实时订阅方发布 `{event_type, entity_type, metadata}`。
//! 无订阅者时发布不算错误。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const AGENT_RUN_COMPLETED: &str = "agent_run_completed";
pub const ENTITY_AGENT_INSIGHT: &str = "agent_insight";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub event_type: String,
    pub entity_type: String,
    pub metadata: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl CompletionEvent {
    pub fn agent_run_completed(metadata: serde_json::Value) -> Self {
        Self {
            event_type: AGENT_RUN_COMPLETED.to_string(),
            entity_type: ENTITY_AGENT_INSIGHT.to_string(),
            metadata,
            emitted_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: CompletionEvent);
}

/// 基于 tokio broadcast 的发布器；订阅方落后时丢弃最旧事件
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    tx: broadcast::Sender<CompletionEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(buffer: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: CompletionEvent) {
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(receivers, "completion event published"),
            Err(_) => tracing::debug!("completion event dropped: no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let publisher = BroadcastEventPublisher::new(4);
        let mut rx = publisher.subscribe();
        publisher
            .publish(CompletionEvent::agent_run_completed(
                serde_json::json!({"agent_type": "CHURN_PREDICTOR", "success": true}),
            ))
            .await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event_type, "agent_run_completed");
        assert_eq!(ev.entity_type, "agent_insight");
        assert_eq!(ev.metadata["success"], true);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = BroadcastEventPublisher::new(1);
        publisher
            .publish(CompletionEvent::agent_run_completed(serde_json::Value::Null))
            .await;
    }
}

//! 自动化动作日志：修复器的每次尝试都留痕

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::memory::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    BlockIp,
    SendOutreach,
    NotifyOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    /// 仅通知，未执行自动修复
    AwaitingReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationAction {
    pub id: String,
    pub action_type: ActionType,
    /// 动作对象：IP、用户 id 或 owner
    pub target_ref: String,
    pub insight_id: String,
    pub outcome: ActionOutcome,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl AutomationAction {
    pub fn new(
        action_type: ActionType,
        target_ref: impl Into<String>,
        insight_id: impl Into<String>,
        outcome: ActionOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type,
            target_ref: target_ref.into(),
            insight_id: insight_id.into(),
            outcome,
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ActionLog: Send + Sync {
    async fn record(&self, action: AutomationAction) -> Result<(), PersistenceError>;

    /// 最近的动作，新的在前
    async fn recent(&self, limit: usize) -> Result<Vec<AutomationAction>, PersistenceError>;
}

#[derive(Default)]
pub struct InMemoryActionLog {
    actions: RwLock<Vec<AutomationAction>>,
}

impl InMemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AutomationAction> {
        self.actions.read().await.clone()
    }
}

#[async_trait]
impl ActionLog for InMemoryActionLog {
    async fn record(&self, action: AutomationAction) -> Result<(), PersistenceError> {
        self.actions.write().await.push(action);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AutomationAction>, PersistenceError> {
        let actions = self.actions.read().await;
        Ok(actions.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_newest_first() {
        let log = InMemoryActionLog::new();
        for target in ["a", "b", "c"] {
            log.record(AutomationAction::new(
                ActionType::NotifyOwner,
                target,
                "i1",
                ActionOutcome::Succeeded,
                "",
            ))
            .await
            .unwrap();
        }
        let recent = log.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].target_ref, "c");
        assert_eq!(log.all().await.len(), 3);
    }
}

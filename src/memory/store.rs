//! 洞察存储抽象层
//!
//! 定义统一的洞察存储接口（create / find_unresolved / resolve / query_past / purge），支持内存和 SQLite 两种实现。
//! resolve 是以 is_resolved = false 为条件的原子更新，重复解决是空操作。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::{AgentInsight, InsightFilter, NewInsight};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// 洞察存储接口
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn create(&self, insight: NewInsight) -> Result<AgentInsight, PersistenceError>;

    async fn get(&self, id: &str) -> Result<Option<AgentInsight>, PersistenceError>;

    /// 未解决的洞察，按严重度降序、创建时间降序
    async fn find_unresolved(&self, limit: usize) -> Result<Vec<AgentInsight>, PersistenceError>;

    /// 标记为已解决并追加审计备注；仅在 false -> true 时返回 true
    async fn resolve(&self, id: &str, note: &str) -> Result<bool, PersistenceError>;

    /// 时间窗口内的历史洞察（长期记忆），按创建时间降序
    async fn query_past(
        &self,
        filter: InsightFilter,
        window: Duration,
    ) -> Result<Vec<AgentInsight>, PersistenceError>;

    /// 保留策略：删除早于 age 的洞察，返回删除条数
    async fn purge_older_than(&self, age: Duration) -> Result<usize, PersistenceError>;
}

/// 审计备注追加到 description 末尾
pub(crate) fn append_note(description: &str, note: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%d %H:%M:%S UTC");
    if description.is_empty() {
        format!("[resolved {stamp}] {note}")
    } else {
        format!("{description}\n\n[resolved {stamp}] {note}")
    }
}

pub(crate) fn cutoff(window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 内存洞察存储
#[derive(Default)]
pub struct InMemoryInsightStore {
    insights: RwLock<Vec<AgentInsight>>,
}

impl InMemoryInsightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.insights.read().await.len()
    }

    pub async fn all(&self) -> Vec<AgentInsight> {
        self.insights.read().await.clone()
    }
}

#[async_trait]
impl InsightStore for InMemoryInsightStore {
    async fn create(&self, insight: NewInsight) -> Result<AgentInsight, PersistenceError> {
        let insight = insight.into_insight(Utc::now());
        self.insights.write().await.push(insight.clone());
        Ok(insight)
    }

    async fn get(&self, id: &str) -> Result<Option<AgentInsight>, PersistenceError> {
        Ok(self
            .insights
            .read()
            .await
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn find_unresolved(&self, limit: usize) -> Result<Vec<AgentInsight>, PersistenceError> {
        let mut open: Vec<AgentInsight> = self
            .insights
            .read()
            .await
            .iter()
            .filter(|i| !i.is_resolved)
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        open.truncate(limit);
        Ok(open)
    }

    async fn resolve(&self, id: &str, note: &str) -> Result<bool, PersistenceError> {
        // 写锁内完成检查与更新，等价于条件 UPDATE
        let mut insights = self.insights.write().await;
        let insight = insights
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        if insight.is_resolved {
            return Ok(false);
        }
        let now = Utc::now();
        insight.is_resolved = true;
        insight.resolved_at = Some(now);
        insight.description = append_note(&insight.description, note, now);
        Ok(true)
    }

    async fn query_past(
        &self,
        filter: InsightFilter,
        window: Duration,
    ) -> Result<Vec<AgentInsight>, PersistenceError> {
        let since = cutoff(window);
        let mut past: Vec<AgentInsight> = self
            .insights
            .read()
            .await
            .iter()
            .filter(|i| i.created_at >= since && filter.matches(i))
            .cloned()
            .collect();
        past.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(past)
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, PersistenceError> {
        let since = cutoff(age);
        let mut insights = self.insights.write().await;
        let before = insights.len();
        insights.retain(|i| i.created_at >= since);
        Ok(before - insights.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;
    use crate::memory::{InsightCategory, Severity};

    fn insight(severity: Severity, title: &str) -> NewInsight {
        NewInsight::new(
            AgentType::SecuritySentinel,
            InsightCategory::Security,
            severity,
            title,
        )
    }

    #[tokio::test]
    async fn test_find_unresolved_orders_by_severity_then_recency() {
        let store = InMemoryInsightStore::new();
        store.create(insight(Severity::Info, "a")).await.unwrap();
        store.create(insight(Severity::Critical, "b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.create(insight(Severity::Critical, "c")).await.unwrap();
        store.create(insight(Severity::Warning, "d")).await.unwrap();

        let titles: Vec<String> = store
            .find_unresolved(10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["c", "b", "d", "a"]);
        assert_eq!(store.find_unresolved(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let store = InMemoryInsightStore::new();
        let i = store.create(insight(Severity::Warning, "x")).await.unwrap();
        assert!(store.resolve(&i.id, "blocked ip").await.unwrap());
        let first = store.get(&i.id).await.unwrap().unwrap();
        assert!(first.is_resolved);
        assert!(first.description.contains("blocked ip"));

        assert!(!store.resolve(&i.id, "again").await.unwrap());
        let second = store.get(&i.id).await.unwrap().unwrap();
        assert_eq!(first.resolved_at, second.resolved_at);
        assert!(!second.description.contains("again"));
        assert!(store.find_unresolved(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let store = InMemoryInsightStore::new();
        let err = store.resolve("missing", "n").await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_past_filters() {
        let store = InMemoryInsightStore::new();
        store.create(insight(Severity::Info, "sec")).await.unwrap();
        store
            .create(NewInsight::new(
                AgentType::ChurnPredictor,
                InsightCategory::Risk,
                Severity::Warning,
                "churn",
            ))
            .await
            .unwrap();
        let risk = store
            .query_past(
                InsightFilter::Category(InsightCategory::Risk),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        assert_eq!(risk.len(), 1);
        assert_eq!(risk[0].title, "churn");
        let sec = store
            .query_past(
                InsightFilter::Agent(AgentType::SecuritySentinel),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        assert_eq!(sec.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let store = InMemoryInsightStore::new();
        store.create(insight(Severity::Info, "old")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.create(insight(Severity::Info, "new")).await.unwrap();
        let removed = store
            .purge_older_than(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all().await[0].title, "new");
    }
}

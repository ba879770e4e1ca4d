//! 记忆层：洞察（长期记忆，内存 / SQLite）与推理会话持久化

pub mod insight;
pub mod sessions;
pub mod sqlite;
pub mod store;

pub use insight::{
    AgentInsight, InsightCategory, InsightFilter, InsightMetrics, NewInsight, Severity,
};
pub use sessions::{InMemorySessionRepository, SessionRepository};
pub use sqlite::SqliteInsightStore;
pub use store::{InMemoryInsightStore, InsightStore, PersistenceError};

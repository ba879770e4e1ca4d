//! SQLite 洞察存储（rusqlite）
//!
//! rusqlite 是同步接口，所有语句都放到 spawn_blocking 中执行，避免阻塞 async 运行时。
//! 时间以毫秒时间戳存储；resolve 使用 `WHERE is_resolved = 0` 的条件更新保证只解决一次。

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::memory::store::{append_note, cutoff};
use crate::memory::{
    AgentInsight, InsightFilter, InsightMetrics, InsightStore, NewInsight, PersistenceError,
    Severity,
};

const COLUMNS: &str = "id, agent_type, category, severity, title, description, recommendation, \
     metrics, confidence, is_resolved, resolved_at, created_at";

/// SQLite 洞察存储
#[derive(Clone)]
pub struct SqliteInsightStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteInsightStore {
    /// 打开（或创建）数据库文件并初始化表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PersistenceError::Task(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_insights (
                id TEXT PRIMARY KEY,
                agent_type TEXT NOT NULL,
                category TEXT NOT NULL,
                severity INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                metrics TEXT NOT NULL,
                confidence REAL NOT NULL,
                is_resolved INTEGER NOT NULL DEFAULT 0,
                resolved_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_insights_open
                ON agent_insights(is_resolved, severity, created_at);
            CREATE INDEX IF NOT EXISTS idx_insights_created ON agent_insights(created_at);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

/// 一行原始数据；解析放在 rusqlite 回调之外，便于返回 Corrupt
struct RawInsight {
    id: String,
    agent_type: String,
    category: String,
    severity: i64,
    title: String,
    description: String,
    recommendation: String,
    metrics: String,
    confidence: f64,
    is_resolved: bool,
    resolved_at: Option<i64>,
    created_at: i64,
}

impl RawInsight {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_type: row.get(1)?,
            category: row.get(2)?,
            severity: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            recommendation: row.get(6)?,
            metrics: row.get(7)?,
            confidence: row.get(8)?,
            is_resolved: row.get(9)?,
            resolved_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_insight(self) -> Result<AgentInsight, PersistenceError> {
        let metrics: InsightMetrics = serde_json::from_str(&self.metrics)?;
        Ok(AgentInsight {
            agent_type: self.agent_type.parse().map_err(PersistenceError::Corrupt)?,
            category: self.category.parse().map_err(PersistenceError::Corrupt)?,
            severity: Severity::from_rank(self.severity),
            title: self.title,
            description: self.description,
            recommendation: self.recommendation,
            metrics,
            confidence: self.confidence,
            is_resolved: self.is_resolved,
            resolved_at: self.resolved_at.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
            id: self.id,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, PersistenceError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PersistenceError::Corrupt(format!("bad timestamp {ms}")))
}

fn collect(rows: Vec<RawInsight>) -> Result<Vec<AgentInsight>, PersistenceError> {
    rows.into_iter().map(RawInsight::into_insight).collect()
}

#[async_trait]
impl InsightStore for SqliteInsightStore {
    async fn create(&self, insight: NewInsight) -> Result<AgentInsight, PersistenceError> {
        let insight = insight.into_insight(Utc::now());
        let metrics = serde_json::to_string(&insight.metrics)?;
        let row = insight.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO agent_insights (id, agent_type, category, severity, title, description, \
                 recommendation, metrics, confidence, is_resolved, resolved_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.id,
                    row.agent_type.as_str(),
                    row.category.as_str(),
                    row.severity.rank(),
                    row.title,
                    row.description,
                    row.recommendation,
                    metrics,
                    row.confidence,
                    row.is_resolved,
                    row.resolved_at.map(|t| t.timestamp_millis()),
                    row.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(insight)
    }

    async fn get(&self, id: &str) -> Result<Option<AgentInsight>, PersistenceError> {
        let id = id.to_string();
        let raw = self
            .with_conn(move |conn| {
                let sql = format!("SELECT {COLUMNS} FROM agent_insights WHERE id = ?1");
                Ok(conn
                    .query_row(&sql, params![id], RawInsight::from_row)
                    .optional()?)
            })
            .await?;
        raw.map(RawInsight::into_insight).transpose()
    }

    async fn find_unresolved(&self, limit: usize) -> Result<Vec<AgentInsight>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .with_conn(move |conn| {
                let sql = format!(
                    "SELECT {COLUMNS} FROM agent_insights WHERE is_resolved = 0 \
                     ORDER BY severity DESC, created_at DESC LIMIT ?1"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit], RawInsight::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        collect(rows)
    }

    async fn resolve(&self, id: &str, note: &str) -> Result<bool, PersistenceError> {
        let id = id.to_string();
        let note = note.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<(String, bool)> = tx
                .query_row(
                    "SELECT description, is_resolved FROM agent_insights WHERE id = ?1",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let Some((description, _)) = current else {
                return Err(PersistenceError::NotFound(id));
            };
            let now = Utc::now();
            let changed = tx.execute(
                "UPDATE agent_insights SET is_resolved = 1, resolved_at = ?2, description = ?3 \
                 WHERE id = ?1 AND is_resolved = 0",
                params![
                    id,
                    now.timestamp_millis(),
                    append_note(&description, &note, now)
                ],
            )?;
            tx.commit()?;
            Ok(changed == 1)
        })
        .await
    }

    async fn query_past(
        &self,
        filter: InsightFilter,
        window: Duration,
    ) -> Result<Vec<AgentInsight>, PersistenceError> {
        let since = cutoff(window).timestamp_millis();
        let rows = self
            .with_conn(move |conn| {
                let (clause, value) = match filter {
                    InsightFilter::Agent(a) => ("AND agent_type = ?2", Some(a.as_str())),
                    InsightFilter::Category(c) => ("AND category = ?2", Some(c.as_str())),
                    InsightFilter::Any => ("", None),
                };
                let sql = format!(
                    "SELECT {COLUMNS} FROM agent_insights WHERE created_at >= ?1 {clause} \
                     ORDER BY created_at DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = match value {
                    Some(v) => stmt
                        .query_map(params![since, v], RawInsight::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?,
                    None => stmt
                        .query_map(params![since], RawInsight::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?,
                };
                Ok(rows)
            })
            .await?;
        collect(rows)
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, PersistenceError> {
        let since = cutoff(age).timestamp_millis();
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM agent_insights WHERE created_at < ?1",
                params![since],
            )?)
        })
        .await
    }
}

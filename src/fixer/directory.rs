//! 用户目录（外部协作方）：为召回邮件提供不活跃用户

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InactiveUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub last_active_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 最久未活跃的用户在前
    async fn inactive_users(&self, limit: usize) -> Result<Vec<InactiveUser>, String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: Vec<InactiveUser>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<InactiveUser>) -> Self {
        Self { users }
    }

    /// n 个合成用户，第 i 个在 30 + i 天前最后活跃
    pub fn synthetic(n: usize) -> Self {
        let now = Utc::now();
        Self::new(
            (0..n)
                .map(|i| InactiveUser {
                    id: format!("user-{i:03}"),
                    email: format!("user{i:03}@example.com"),
                    name: format!("User {i}"),
                    last_active_at: now - Duration::days(30 + i as i64),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn inactive_users(&self, limit: usize) -> Result<Vec<InactiveUser>, String> {
        let mut users = self.users.clone();
        users.sort_by_key(|u| u.last_active_at);
        users.truncate(limit);
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oldest_first_and_limited() {
        let dir = StaticUserDirectory::synthetic(10);
        let users = dir.inactive_users(3).await.unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].id, "user-009");
        assert!(users[0].last_active_at < users[1].last_active_at);
    }
}

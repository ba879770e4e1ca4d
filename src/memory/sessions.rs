//! 推理会话持久化
//!
//! 会话在调用时创建、在终态时更新；实现方可接任意持久化后端，这里提供内存版本。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::PersistenceError;
use crate::react::ReasoningSession;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &ReasoningSession) -> Result<(), PersistenceError>;

    async fn update(&self, session: &ReasoningSession) -> Result<(), PersistenceError>;

    async fn find(&self, id: &str) -> Result<Option<ReasoningSession>, PersistenceError>;
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, ReasoningSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: &ReasoningSession) -> Result<(), PersistenceError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update(&self, session: &ReasoningSession) -> Result<(), PersistenceError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(PersistenceError::NotFound(session.id.clone())),
        }
    }

    async fn find(&self, id: &str) -> Result<Option<ReasoningSession>, PersistenceError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;
    use crate::react::SessionStatus;

    #[tokio::test]
    async fn test_create_then_update() {
        let repo = InMemorySessionRepository::new();
        let mut session = ReasoningSession::new(AgentType::ChurnPredictor, "goal", 4);
        repo.create(&session).await.unwrap();
        session.start().unwrap();
        repo.update(&session).await.unwrap();
        let found = repo.find(&session.id).await.unwrap().unwrap();
        assert_eq!(found.status, SessionStatus::Running);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let repo = InMemorySessionRepository::new();
        let session = ReasoningSession::new(AgentType::ChurnPredictor, "goal", 4);
        assert!(matches!(
            repo.update(&session).await,
            Err(PersistenceError::NotFound(_))
        ));
    }
}

//! 任务调度：Agent 工作池
//!
//! 多个 Agent 并发运行时用 Semaphore 限制同时执行的会话数；许可随任务结束自动归还。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// Agent 并发限制（默认 3）
    agent_semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_agents: usize) -> Self {
        let capacity = max_concurrent_agents.max(1);
        Self {
            agent_semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取 Agent 执行许可；信号量只在调度器被丢弃时关闭，此时返回 None
    pub async fn acquire_agent(&self) -> Option<OwnedSemaphorePermit> {
        self.agent_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.agent_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

//! 核心编排层：错误与恢复、任务调度、编排器及其构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod task_scheduler;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{AgentOrchestrator, AgentResult, OrchestratorSettings, OrchestratorSummary};
pub use recovery::RecoveryEngine;
pub use task_scheduler::TaskScheduler;

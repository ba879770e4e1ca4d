//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Retry / Abort。
//! 工具类错误只会变成 Observation，不会中止会话；熔断打开（ProviderUnavailable）直接让会话失败。

use thiserror::Error;

use crate::memory::PersistenceError;

/// 引擎运行过程中可能出现的错误（工具、推理服务、持久化、修复、调度）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 请求了未注册的工具（结构化错误，写入 Observation）
    #[error("Unknown tool: {name} (available: {available})")]
    UnknownTool { name: String, available: String },

    /// 熔断器处于打开状态，推理服务不可用
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Remediation action failed: {0}")]
    RemediationFailed(String),

    /// 未配置的调度桶；编排器无法启动时唯一会抛出的错误
    #[error("Invalid schedule bucket: {0}")]
    InvalidSchedule(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 工具类错误（可恢复，仅作为 Observation）
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
                | AgentError::UnknownTool { .. }
        )
    }

    /// 同一步内允许重试一次的工具错误；未知工具重试没有意义
    pub fn is_retryable_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::ToolExecutionFailed(_) | AgentError::ToolTimeout(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 瞬时故障，下一步原样重试（消耗一步预算）
    Retry,
    /// 终止当前会话
    Abort,
}

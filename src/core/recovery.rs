//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供推理循环决定是重试、带提示重试还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply was not valid JSON ({raw}). \
                Reply with exactly one JSON object: \
                {{\"thought\": \"...\", \"tool\": \"<tool name>\", \"args\": {{...}}}} to act, or \
                {{\"thought\": \"...\", \"final\": {{\"summary\": \"...\", \"recommendations\": [], \"risks\": []}}}} to conclude."
            )),
            AgentError::ProviderTimeout(_) | AgentError::LlmError(_) => RecoveryAction::Retry,
            AgentError::ProviderUnavailable(_) => RecoveryAction::Abort,
            AgentError::Cancelled => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}

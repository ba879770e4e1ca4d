//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / 脚本化）以及熔断保护

pub mod gated;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use gated::GatedLlmClient;
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, Message, Role};

use crate::config::ProviderSection;
use crate::core::AgentError;

/// 按配置创建推理服务客户端（未经熔断包装）
pub fn create_llm_from_config(provider: &ProviderSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match provider.kind.as_str() {
        "mock" => Ok(Arc::new(MockLlmClient)),
        "openai" => {
            let api_key = std::env::var(&provider.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(env = %provider.api_key_env, "API key env not set, relying on client defaults");
            }
            tracing::info!(model = %provider.model, provider = %provider.name, "using OpenAI-compatible provider");
            Ok(Arc::new(OpenAiClient::new(
                provider.base_url.as_deref(),
                &provider.model,
                api_key.as_deref(),
            )))
        }
        other => Err(AgentError::Config(format!(
            "unknown provider kind '{other}' (expected mock or openai)"
        ))),
    }
}

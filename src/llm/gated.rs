//! 经熔断器保护的推理服务客户端
//!
//! 会话的每次 Think 都走这里：熔断打开时快速失败（Unavailable），
//! 单次调用超时计为失败（Timeout），其余错误原样透传。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};
use crate::resilience::{BreakerError, CircuitBreaker};

pub struct GatedLlmClient {
    inner: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
}

impl GatedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl LlmClient for GatedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.breaker.call(self.inner.complete(messages)).await {
            Ok(text) => Ok(text),
            Err(BreakerError::Open(name)) => {
                tracing::warn!(breaker = %name, "reasoning provider rejected: circuit open");
                Err(LlmError::Unavailable(name))
            }
            Err(BreakerError::Timeout { name, after }) => {
                tracing::warn!(breaker = %name, after_ms = after.as_millis() as u64, "reasoning provider timed out");
                Err(LlmError::Timeout(name))
            }
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::resilience::{BreakerConfig, BreakerState};
    use std::time::Duration;

    fn breaker(volume: usize) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "provider",
            BreakerConfig {
                timeout: Duration::from_millis(50),
                error_threshold_percentage: 50.0,
                reset_timeout: Duration::from_secs(60),
                volume_threshold: volume,
                rolling_window: Duration::from_secs(10),
            },
        ))
    }

    #[tokio::test]
    async fn test_provider_errors_open_circuit() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Provider("500".into())),
            Err(LlmError::Provider("500".into())),
        ]));
        let gated = GatedLlmClient::new(scripted, breaker(2));
        let msgs = [Message::user("hi")];

        assert_eq!(
            gated.complete(&msgs).await,
            Err(LlmError::Provider("500".into()))
        );
        assert!(gated.complete(&msgs).await.is_err());
        assert_eq!(gated.breaker().state(), BreakerState::Open);
        assert_eq!(
            gated.complete(&msgs).await,
            Err(LlmError::Unavailable("provider".into()))
        );
    }

    #[tokio::test]
    async fn test_slow_provider_maps_to_timeout() {
        let scripted = Arc::new(
            ScriptedLlmClient::new(vec![Ok("late".into())]).with_delay(Duration::from_millis(200)),
        );
        let gated = GatedLlmClient::new(scripted, breaker(5));
        assert_eq!(
            gated.complete(&[Message::user("hi")]).await,
            Err(LlmError::Timeout("provider".into()))
        );
        assert_eq!(gated.breaker().stats().timeouts, 1);
    }
}

//! 工具执行器
//!
//! 持有 ToolRegistry 与默认超时，execute 在工具自身声明的超时（或默认超时）内执行，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed / UnknownTool）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolKind, ToolRegistry};

/// 工具执行器：可在并发会话间共享（Clone 只复制 Arc）
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；名称未注册返回 UnknownTool，超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        self.execute_within(&ToolKind::ALL, tool_name, args).await
    }

    /// 同 execute，但只允许 allowed 中的工具（不在其中视为未知工具）
    pub async fn execute_within(
        &self,
        allowed: &[ToolKind],
        tool_name: &str,
        args: Value,
    ) -> Result<Value, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let tool = match self.resolve_allowed(allowed, tool_name) {
            Ok(tool) => tool,
            Err(e) => {
                audit(tool_name, false, "unknown", 0, &args_preview);
                return Err(e);
            }
        };
        let limit = tool.timeout().unwrap_or(self.timeout);
        let result = timeout(limit, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        audit(
            tool_name,
            ok,
            outcome,
            start.elapsed().as_millis() as u64,
            &args_preview,
        );

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{tool_name}: {e}"))),
            Err(_) => Err(AgentError::ToolTimeout(format!(
                "{tool_name} exceeded {}ms",
                limit.as_millis()
            ))),
        }
    }

    fn resolve_allowed(
        &self,
        allowed: &[ToolKind],
        tool_name: &str,
    ) -> Result<Arc<dyn Tool>, AgentError> {
        let tool = self.registry.resolve(tool_name)?;
        if allowed.contains(&tool.kind()) {
            Ok(tool)
        } else {
            Err(AgentError::UnknownTool {
                name: tool_name.to_string(),
                available: allowed
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        }
    }
}

fn audit(tool: &str, ok: bool, outcome: &str, duration_ms: u64, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Sleepy(Duration);

    #[async_trait]
    impl Tool for Sleepy {
        fn kind(&self) -> ToolKind {
            ToolKind::FetchMetrics
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(self.0).await;
            Ok(Value::Null)
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn kind(&self) -> ToolKind {
            ToolKind::ComputeScores
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Err("source offline".into())
        }
    }

    fn executor(sleep: Duration) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Sleepy(sleep));
        registry.register(Failing);
        ToolExecutor::new(registry, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_tool_declared_timeout_applies() {
        let exec = executor(Duration::from_millis(200));
        let err = exec.execute("fetch_metrics", Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_failure_and_unknown_are_errors() {
        let exec = executor(Duration::ZERO);
        assert!(exec.execute("fetch_metrics", Value::Null).await.is_ok());
        assert!(matches!(
            exec.execute("compute_scores", Value::Null).await,
            Err(AgentError::ToolExecutionFailed(_))
        ));
        assert!(matches!(
            exec.execute("delete_users", Value::Null).await,
            Err(AgentError::UnknownTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_disallowed_tool_is_unknown_for_agent() {
        let exec = executor(Duration::ZERO);
        let err = exec
            .execute_within(&[ToolKind::FetchMetrics], "compute_scores", Value::Null)
            .await
            .unwrap_err();
        match err {
            AgentError::UnknownTool { available, .. } => assert_eq!(available, "fetch_metrics"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

//! 编排器构建器：统一的组件装配逻辑
//!
//! 按 AppConfig 创建熔断器注册表、受熔断保护的推理服务、工具注册表、洞察存储、
//! Issue-Fixer 与事件发布器；测试与 CLI 通过 with_* 替换任意协作方。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, BreakerSection};
use crate::core::{AgentError, AgentOrchestrator, OrchestratorSettings, RecoveryEngine, TaskScheduler};
use crate::events::{BroadcastEventPublisher, EventPublisher};
use crate::fixer::{
    create_action_provider, ActionLog, ActionProvider, FixerConfig, InMemoryActionLog,
    IssueFixer, StaticUserDirectory, UserDirectory,
};
use crate::llm::{create_llm_from_config, GatedLlmClient, LlmClient};
use crate::memory::{
    InMemoryInsightStore, InMemorySessionRepository, InsightStore, SessionRepository,
    SqliteInsightStore,
};
use crate::react::Planner;
use crate::resilience::BreakerRegistry;
use crate::tools::{default_registry, MetricsSource, StaticMetricsSource, ToolExecutor};

/// 合成用户目录的规模（未接入真实目录时）
const SYNTHETIC_DIRECTORY_SIZE: usize = 25;

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    metrics: Option<Arc<dyn MetricsSource>>,
    insights: Option<Arc<dyn InsightStore>>,
    sessions: Option<Arc<dyn SessionRepository>>,
    actions: Option<Arc<dyn ActionProvider>>,
    directory: Option<Arc<dyn UserDirectory>>,
    action_log: Option<Arc<dyn ActionLog>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    breakers: Option<Arc<BreakerRegistry>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            metrics: None,
            insights: None,
            sessions: None,
            actions: None,
            directory: None,
            action_log: None,
            publisher: None,
            breakers: None,
        }
    }

    /// 未经熔断包装的推理服务；构建时总会套上以 provider.name 命名的熔断器
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(source);
        self
    }

    pub fn with_insight_store(mut self, store: Arc<dyn InsightStore>) -> Self {
        self.insights = Some(store);
        self
    }

    pub fn with_session_repository(mut self, sessions: Arc<dyn SessionRepository>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_action_provider(mut self, actions: Arc<dyn ActionProvider>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_user_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_action_log(mut self, log: Arc<dyn ActionLog>) -> Self {
        self.action_log = Some(log);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 熔断器注册表；推理服务熔断器未单独配置时，超时取 provider.request_timeout_secs
    pub fn build_breakers(&self) -> BreakerRegistry {
        let provider = &self.config.provider;
        let registry = BreakerRegistry::from_config(&self.config.breakers);
        if self.config.breakers.overrides.contains_key(&provider.name) {
            return registry;
        }
        let section = BreakerSection {
            timeout_ms: provider.request_timeout_secs.saturating_mul(1000),
            ..self.config.breakers.default.clone()
        };
        registry.with_override(provider.name.clone(), section.to_breaker_config())
    }

    fn build_metrics(&self) -> Result<Arc<dyn MetricsSource>, AgentError> {
        match &self.config.data.fixture {
            Some(path) => {
                let source = StaticMetricsSource::from_file(path)
                    .map_err(|e| AgentError::Config(format!("data fixture {}: {e}", path.display())))?;
                tracing::info!(path = %path.display(), "loaded metrics fixture");
                Ok(Arc::new(source))
            }
            None => Ok(Arc::new(StaticMetricsSource::sample())),
        }
    }

    fn build_insight_store(&self) -> Result<Arc<dyn InsightStore>, AgentError> {
        match &self.config.insights.db_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "using SQLite insight store");
                Ok(Arc::new(SqliteInsightStore::open(path)?))
            }
            None => Ok(Arc::new(InMemoryInsightStore::new())),
        }
    }

    pub fn build(self) -> Result<Arc<AgentOrchestrator>, AgentError> {
        let breakers = match self.breakers.clone() {
            Some(b) => b,
            None => Arc::new(self.build_breakers()),
        };

        let raw_llm = match self.llm.clone() {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config.provider)?,
        };
        let provider_breaker = breakers.get_or_create(&self.config.provider.name);
        let llm: Arc<dyn LlmClient> = Arc::new(GatedLlmClient::new(raw_llm, provider_breaker));

        let metrics = match self.metrics.clone() {
            Some(m) => m,
            None => self.build_metrics()?,
        };
        let insights = match self.insights.clone() {
            Some(s) => s,
            None => self.build_insight_store()?,
        };
        let sessions = self
            .sessions
            .clone()
            .unwrap_or_else(|| Arc::new(InMemorySessionRepository::new()) as Arc<dyn SessionRepository>);

        let engine = &self.config.engine;
        let registry = default_registry(metrics, insights.clone(), engine.tool_timeout());
        tracing::debug!(tools = ?registry.tool_names(), "tool registry ready");
        let executor = ToolExecutor::new(registry, engine.tool_timeout());

        let actions = self
            .actions
            .clone()
            .unwrap_or_else(|| create_action_provider(&self.config.actions, breakers.clone()));
        let directory = self.directory.clone().unwrap_or_else(|| {
            Arc::new(StaticUserDirectory::synthetic(SYNTHETIC_DIRECTORY_SIZE)) as Arc<dyn UserDirectory>
        });
        let action_log = self
            .action_log
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryActionLog::new()) as Arc<dyn ActionLog>);
        let fixer = IssueFixer::new(
            insights.clone(),
            actions,
            directory,
            action_log,
            FixerConfig::from(&self.config.fixer),
        )?;

        let publisher = self
            .publisher
            .clone()
            .unwrap_or_else(|| {
                Arc::new(BroadcastEventPublisher::new(self.config.events.buffer))
                    as Arc<dyn EventPublisher>
            });

        let settings = OrchestratorSettings {
            step_budget: engine.step_budget,
            execution_budget: engine.execution_budget(),
            schedules: self.config.schedules.clone(),
            announce: self.config.events.announce.iter().copied().collect::<HashSet<_>>(),
            retention: Duration::from_secs(self.config.insights.retention_days.saturating_mul(86_400)),
        };

        Ok(Arc::new(AgentOrchestrator {
            settings,
            planner: Planner::new(llm),
            executor,
            recovery: RecoveryEngine::new(),
            scheduler: TaskScheduler::new(engine.max_concurrent_agents),
            insights,
            sessions,
            breakers,
            fixer: Arc::new(fixer),
            publisher,
            cancel: CancellationToken::new(),
            background: std::sync::Mutex::new(Vec::new()),
        }))
    }
}

/// 便捷函数：加载配置并创建构建器（配置加载失败时回退默认值）
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_breaker_uses_request_timeout() {
        let mut config = AppConfig::default();
        config.provider.request_timeout_secs = 7;
        let registry = OrchestratorBuilder::new(config).build_breakers();
        let breaker = registry.get_or_create("reasoning-provider");
        assert_eq!(breaker.config().timeout, Duration::from_secs(7));
        assert_eq!(
            registry.get_or_create("webhook:owner").config().timeout,
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_explicit_override_wins() {
        let mut config = AppConfig::default();
        config.breakers.overrides.insert(
            "reasoning-provider".to_string(),
            BreakerSection {
                timeout_ms: 1234,
                ..BreakerSection::default()
            },
        );
        let registry = OrchestratorBuilder::new(config).build_breakers();
        assert_eq!(
            registry.get_or_create("reasoning-provider").config().timeout,
            Duration::from_millis(1234)
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_kind_fails_build() {
        let mut config = AppConfig::default();
        config.provider.kind = "carrier-pigeon".into();
        let err = OrchestratorBuilder::new(config).build().err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn test_sqlite_store_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.insights.db_path = Some(dir.path().join("insights.db"));
        let orch = OrchestratorBuilder::new(config).build().unwrap();
        assert!(orch.insights().find_unresolved(5).await.unwrap().is_empty());
    }
}

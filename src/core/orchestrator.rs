//! Agent 编排器
//!
//! 负责：按类型 / 调度桶 / 全量运行 Agent，并发执行（JoinSet + TaskScheduler 许可），
//! 单个 Agent 的失败、panic 或超时只体现在它自己的 AgentResult 中；
//! 调度批次结束后以分离任务触发一次 Issue-Fixer pass（错误只记日志）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::agents::AgentType;
use crate::core::{AgentError, RecoveryEngine, TaskScheduler};
use crate::events::{CompletionEvent, EventPublisher};
use crate::fixer::{FixerReport, IssueFixer};
use crate::memory::{InsightFilter, InsightMetrics, InsightStore, SessionRepository};
use crate::react::{react_loop, Planner, ReactSession, ReasoningSession};
use crate::report::{ExecutiveReport, ReportCompiler};
use crate::resilience::{BreakerRegistry, BreakerStats};
use crate::tools::ToolExecutor;

/// 外层硬超时在执行预算之上的余量
const HARD_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

fn insight_key(title: &str, metrics: &InsightMetrics) -> (String, String) {
    let kind = metrics
        .get("kind")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    (kind, title.to_string())
}

/// 单个 Agent 的运行结果
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub agent_type: AgentType,
    pub success: bool,
    pub report: Option<ExecutiveReport>,
    /// 仅 ISSUE_FIXER
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixer_report: Option<FixerReport>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub session_id: Option<String>,
    pub insights_created: usize,
}

impl AgentResult {
    fn failed(agent_type: AgentType, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            agent_type,
            success: false,
            report: None,
            fixer_report: None,
            error: Some(error.into()),
            execution_time_ms,
            session_id: None,
            insights_created: 0,
        }
    }
}

/// runAll 的汇总
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSummary {
    pub success: bool,
    pub total_agents: usize,
    pub results: Vec<AgentResult>,
    pub total_insights: usize,
    pub total_execution_time_ms: u64,
    pub errors: Vec<String>,
}

impl OrchestratorSummary {
    pub fn from_results(results: Vec<AgentResult>, total_execution_time_ms: u64) -> Self {
        let errors: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.agent_type,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        Self {
            success: errors.is_empty(),
            total_agents: results.len(),
            total_insights: results.iter().map(|r| r.insights_created).sum(),
            total_execution_time_ms,
            results,
            errors,
        }
    }
}

/// 编排器运行参数（来自 [engine] / [schedules] / [events] / [insights]）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub step_budget: usize,
    pub execution_budget: Duration,
    pub schedules: HashMap<String, Vec<AgentType>>,
    pub announce: HashSet<AgentType>,
    pub retention: Duration,
}

pub struct AgentOrchestrator {
    pub(crate) settings: OrchestratorSettings,
    pub(crate) planner: Planner,
    pub(crate) executor: ToolExecutor,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) scheduler: TaskScheduler,
    pub(crate) insights: Arc<dyn InsightStore>,
    pub(crate) sessions: Arc<dyn SessionRepository>,
    pub(crate) breakers: Arc<BreakerRegistry>,
    pub(crate) fixer: Arc<IssueFixer>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) cancel: CancellationToken,
    /// 分离的后台任务（调度批次后的修复 pass）
    pub(crate) background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AgentOrchestrator {
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn insights(&self) -> &Arc<dyn InsightStore> {
        &self.insights
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRepository> {
        &self.sessions
    }

    pub fn fixer(&self) -> &Arc<IssueFixer> {
        &self.fixer
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// 以画像中的默认目标运行
    pub async fn run_agent(&self, agent_type: AgentType) -> AgentResult {
        let goal = agent_type.profile().default_goal;
        self.run_agent_with_goal(agent_type, goal).await
    }

    /// 运行单个 Agent；任何错误都收敛到 AgentResult 中
    pub async fn run_agent_with_goal(&self, agent_type: AgentType, goal: &str) -> AgentResult {
        let started = Instant::now();
        let mut result = if agent_type == AgentType::IssueFixer {
            self.run_fixer_as_agent().await
        } else {
            self.run_session(agent_type, goal).await
        };
        result.execution_time_ms = started.elapsed().as_millis() as u64;

        if result.success {
            tracing::info!(
                agent = %agent_type,
                insights = result.insights_created,
                elapsed_ms = result.execution_time_ms,
                "agent run succeeded"
            );
        } else {
            tracing::warn!(
                agent = %agent_type,
                error = result.error.as_deref().unwrap_or(""),
                elapsed_ms = result.execution_time_ms,
                "agent run failed"
            );
        }
        self.announce(&result).await;
        result
    }

    async fn run_fixer_as_agent(&self) -> AgentResult {
        match self.fixer.run_pass().await {
            Ok(report) => AgentResult {
                agent_type: AgentType::IssueFixer,
                success: true,
                report: None,
                insights_created: report.audit_insights.len(),
                execution_time_ms: report.execution_time_ms,
                fixer_report: Some(report),
                error: None,
                session_id: None,
            },
            Err(e) => AgentResult::failed(AgentType::IssueFixer, e.to_string(), 0),
        }
    }

    async fn run_session(&self, agent_type: AgentType, goal: &str) -> AgentResult {
        let started = Instant::now();
        let mut session = ReasoningSession::new(agent_type, goal, self.settings.step_budget);
        if let Err(e) = self.sessions.create(&session).await {
            return AgentResult::failed(agent_type, AgentError::from(e).to_string(), 0);
        }

        let budget = self.settings.execution_budget;
        let ctx = ReactSession::new(
            &self.planner,
            &self.executor,
            &self.recovery,
            self.cancel.child_token(),
        )
        .with_execution_budget(budget);

        let outcome =
            tokio::time::timeout(budget + HARD_TIMEOUT_GRACE, react_loop(&ctx, &mut session))
                .await;
        let loop_result = match outcome {
            Ok(r) => r,
            Err(_) => {
                let msg = format!("hard timeout after {:?}", budget + HARD_TIMEOUT_GRACE);
                if !session.is_terminal() {
                    if let Err(e) = session.fail(msg) {
                        tracing::warn!(session_id = %session.id, error = %e, "could not mark session failed");
                    }
                }
                Err(AgentError::Cancelled)
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = self.sessions.update(&session).await {
            tracing::warn!(session_id = %session.id, error = %e, "failed to persist session");
        }

        if let Err(e) = loop_result {
            let error = session.error.clone().unwrap_or_else(|| e.to_string());
            let mut failed = AgentResult::failed(agent_type, error, elapsed_ms);
            failed.session_id = Some(session.id.clone());
            return failed;
        }

        let report = ReportCompiler::compile(&session, elapsed_ms);
        let mut insights_created = 0;
        let open = self.open_insight_keys(agent_type).await;
        for insight in ReportCompiler::to_insights(&report) {
            if open.contains(&insight_key(&insight.title, &insight.metrics)) {
                tracing::debug!(agent = %agent_type, title = %insight.title, "insight already open, skipped");
                continue;
            }
            match self.insights.create(insight).await {
                Ok(_) => insights_created += 1,
                Err(e) => {
                    let mut failed = AgentResult::failed(
                        agent_type,
                        AgentError::from(e).to_string(),
                        elapsed_ms,
                    );
                    failed.session_id = Some(session.id.clone());
                    failed.insights_created = insights_created;
                    failed.report = Some(report);
                    return failed;
                }
            }
        }

        AgentResult {
            agent_type,
            success: true,
            session_id: Some(session.id.clone()),
            report: Some(report),
            fixer_report: None,
            error: None,
            execution_time_ms: elapsed_ms,
            insights_created,
        }
    }

    /// 该 Agent 仍未解决的洞察（kind + 标题），用于避免重复创建
    async fn open_insight_keys(&self, agent_type: AgentType) -> HashSet<(String, String)> {
        match self
            .insights
            .query_past(InsightFilter::Agent(agent_type), self.settings.retention)
            .await
        {
            Ok(past) => past
                .iter()
                .filter(|i| !i.is_resolved)
                .map(|i| insight_key(&i.title, &i.metrics))
                .collect(),
            Err(e) => {
                tracing::warn!(agent = %agent_type, error = %e, "could not load open insights");
                HashSet::new()
            }
        }
    }

    async fn announce(&self, result: &AgentResult) {
        if !self.settings.announce.contains(&result.agent_type) {
            return;
        }
        let confidence = result.report.as_ref().map(|r| r.confidence_score);
        self.publisher
            .publish(CompletionEvent::agent_run_completed(serde_json::json!({
                "agent_type": result.agent_type,
                "success": result.success,
                "insights_created": result.insights_created,
                "confidence": confidence,
                "execution_time_ms": result.execution_time_ms,
            })))
            .await;
    }

    /// 并发运行一组 Agent（重复项只跑一次），结果按输入顺序返回
    pub async fn run_agents(self: &Arc<Self>, agents: &[AgentType]) -> Vec<AgentResult> {
        let mut seen = HashSet::new();
        let agents: Vec<AgentType> = agents.iter().copied().filter(|a| seen.insert(*a)).collect();

        let mut set = JoinSet::new();
        for agent in agents.iter().copied() {
            let this = Arc::clone(self);
            set.spawn(async move {
                let started = Instant::now();
                let Some(_permit) = this.scheduler.acquire_agent().await else {
                    return AgentResult::failed(agent, "scheduler closed", 0);
                };
                // 内层任务隔离 panic
                let worker = Arc::clone(&this);
                let handle =
                    tokio::spawn(async move { worker.run_agent(agent).await });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(agent = %agent, error = %e, "agent task panicked");
                        AgentResult::failed(
                            agent,
                            format!("agent task failed: {e}"),
                            started.elapsed().as_millis() as u64,
                        )
                    }
                }
            });
        }

        let mut by_agent: HashMap<AgentType, AgentResult> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    by_agent.insert(result.agent_type, result);
                }
                Err(e) => tracing::error!(error = %e, "agent worker aborted"),
            }
        }

        agents
            .into_iter()
            .map(|agent| {
                by_agent
                    .remove(&agent)
                    .unwrap_or_else(|| AgentResult::failed(agent, "agent worker aborted", 0))
            })
            .collect()
    }

    /// 解析调度桶并运行；批次结束后分离触发一次 Issue-Fixer pass
    ///
    /// 未知的桶是唯一会返回 Err 的情况。
    pub async fn run_agents_by_schedule(
        self: &Arc<Self>,
        bucket: &str,
    ) -> Result<HashMap<AgentType, AgentResult>, AgentError> {
        let agents = self
            .settings
            .schedules
            .get(bucket)
            .cloned()
            .ok_or_else(|| AgentError::InvalidSchedule(bucket.to_string()))?;
        tracing::info!(bucket, agents = agents.len(), "running schedule bucket");

        let results = self.run_agents(&agents).await;
        self.spawn_fixer_pass();
        Ok(results.into_iter().map(|r| (r.agent_type, r)).collect())
    }

    /// 运行全部分析型 Agent
    pub async fn run_all(self: &Arc<Self>) -> OrchestratorSummary {
        let started = Instant::now();
        let results = self.run_agents(&AgentType::analysis_agents()).await;
        let summary =
            OrchestratorSummary::from_results(results, started.elapsed().as_millis() as u64);
        tracing::info!(
            success = summary.success,
            agents = summary.total_agents,
            insights = summary.total_insights,
            errors = summary.errors.len(),
            "run_all finished"
        );
        summary
    }

    /// 分离的修复 pass，失败只记日志
    fn spawn_fixer_pass(&self) {
        let fixer = Arc::clone(&self.fixer);
        let handle = tokio::spawn(async move {
            match fixer.run_pass().await {
                Ok(report) => tracing::info!(
                    processed = report.processed,
                    fixed = report.fixed,
                    "follow-up fixer pass completed"
                ),
                Err(e) => tracing::error!(error = %e, "follow-up fixer pass failed"),
            }
        });
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// 等待已分离的后台任务结束（CLI 退出前、测试中使用）
    pub async fn wait_background(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "background task failed");
            }
        }
    }

    /// 保留策略：删除早于 retention_days 的洞察
    pub async fn run_retention(&self) -> Result<usize, AgentError> {
        let removed = self
            .insights
            .purge_older_than(self.settings.retention)
            .await?;
        tracing::info!(removed, "insight retention applied");
        Ok(removed)
    }

    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        self.breakers.stats()
    }

    /// 取消进行中的会话（它们会以 truncated 结论收尾）
    pub fn shutdown(&self) {
        tracing::info!("orchestrator shutdown requested");
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::OrchestratorBuilder;
    use crate::events::BroadcastEventPublisher;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::memory::InMemoryInsightStore;
    use crate::react::SessionStatus;

    fn orchestrator() -> Arc<AgentOrchestrator> {
        OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_agent_with_mock_produces_report() {
        let orch = orchestrator();
        let result = orch.run_agent(AgentType::SecuritySentinel).await;
        assert!(result.success, "{:?}", result.error);
        let report = result.report.unwrap();
        assert!(!report.truncated);
        assert!(report.confidence_score >= 0.0 && report.confidence_score <= 1.0);
        let session = orch
            .sessions()
            .find(result.session_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_error() {
        let orch = orchestrator();
        let err = orch.run_agents_by_schedule("weekly").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidSchedule(b) if b == "weekly"));
    }

    #[tokio::test]
    async fn test_hourly_bucket_keys() {
        let orch = orchestrator();
        let results = orch.run_agents_by_schedule("hourly").await.unwrap();
        let mut keys: Vec<AgentType> = results.keys().copied().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![AgentType::BusinessAnalyst, AgentType::ContentIntelligence]
        );
    }

    #[tokio::test]
    async fn test_run_issue_fixer_as_agent() {
        let orch = orchestrator();
        let result = orch.run_agent(AgentType::IssueFixer).await;
        assert!(result.success);
        assert_eq!(result.fixer_report.unwrap().processed, 0);
        assert!(result.report.is_none());
    }

    #[tokio::test]
    async fn test_completion_event_published() {
        let publisher = Arc::new(BroadcastEventPublisher::new(8));
        let mut rx = publisher.subscribe();
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .with_publisher(publisher)
            .build()
            .unwrap();
        orch.run_agent(AgentType::ChurnPredictor).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.metadata["agent_type"], "CHURN_PREDICTOR");
        assert_eq!(ev.metadata["success"], true);
    }

    #[tokio::test]
    async fn test_provider_failure_is_contained() {
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(ScriptedLlmClient::new(vec![])))
            .build()
            .unwrap();
        let summary = orch.run_all().await;
        assert_eq!(summary.total_agents, 7);
        assert_eq!(summary.results.len(), 7);
        assert_eq!(summary.success, summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_run_does_not_duplicate_open_insights() {
        let store = Arc::new(InMemoryInsightStore::new());
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .with_insight_store(store.clone())
            .build()
            .unwrap();

        let first = orch.run_agent(AgentType::SecuritySentinel).await;
        assert!(first.success);
        assert!(first.insights_created > 0);
        let stored = store.len().await;

        let second = orch.run_agent(AgentType::SecuritySentinel).await;
        assert!(second.success);
        assert_eq!(second.insights_created, 0);
        assert_eq!(store.len().await, stored);

        // 解决之后同样的问题再次出现时重新记录
        for insight in store.find_unresolved(100).await.unwrap() {
            store.resolve(&insight.id, "handled").await.unwrap();
        }
        let third = orch.run_agent(AgentType::SecuritySentinel).await;
        assert_eq!(third.insights_created, first.insights_created);
    }

    #[tokio::test]
    async fn test_retention_purges_nothing_recent() {
        let store = Arc::new(InMemoryInsightStore::new());
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .with_insight_store(store.clone())
            .build()
            .unwrap();
        orch.run_agent(AgentType::SecuritySentinel).await;
        let before = store.len().await;
        assert_eq!(orch.run_retention().await.unwrap(), 0);
        assert_eq!(store.len().await, before);
    }

    #[tokio::test]
    async fn test_shutdown_truncates_sessions() {
        let orch = orchestrator();
        orch.shutdown();
        let result = orch.run_agent(AgentType::UxAuditor).await;
        assert!(result.success);
        assert!(result.report.unwrap().truncated);
    }
}

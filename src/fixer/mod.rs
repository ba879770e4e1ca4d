//! Issue-Fixer：有上限、幂等的自动修复
//!
//! 每次 pass 取最多 max_insights_per_run 条未解决洞察（按严重度），逐条：
//! - SECURITY 且非 info、metrics 中带 IP：封禁该 IP（TTL 固定）
//! - RISK / GROWTH 且文本指向不活跃 / 留存风险：给不活跃用户发召回邮件，
//!   全 pass 最多 max_reengagement_per_run 封，单条洞察首次发送成功即停止
//! - warning / critical：总是通知负责人；未执行任何动作时记为 awaiting review
//!
//! 执行了动作的洞察以原子条件更新标记为已解决并追加审计备注，同时写一条已解决的 info 级
//! “Fixed: …” 洞察。单条失败只记录，不会中止整个 pass。pass 之间串行。

pub mod actions;
pub mod directory;
pub mod log;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use actions::{
    create_action_provider, ActionError, ActionProvider, LoggingActionProvider, OutreachMessage,
    WebhookActionProvider,
};
pub use directory::{InactiveUser, StaticUserDirectory, UserDirectory};
pub use log::{ActionLog, ActionOutcome, ActionType, AutomationAction, InMemoryActionLog};

use crate::agents::AgentType;
use crate::config::FixerSection;
use crate::core::AgentError;
use crate::memory::{AgentInsight, InsightCategory, InsightStore, NewInsight, Severity};

const INACTIVITY_PATTERN: &str = r"(?i)inactiv|churn|retention|re-?engag|dormant|lapsed";

#[derive(Debug, Clone)]
pub struct FixerConfig {
    pub max_insights_per_run: usize,
    pub max_reengagement_per_run: usize,
    pub block_ttl: Duration,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self::from(&FixerSection::default())
    }
}

impl From<&FixerSection> for FixerConfig {
    fn from(section: &FixerSection) -> Self {
        Self {
            max_insights_per_run: section.max_insights_per_run,
            max_reengagement_per_run: section.max_reengagement_per_run,
            block_ttl: Duration::from_secs(section.block_ttl_secs),
        }
    }
}

/// 单次 pass 的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixerReport {
    pub processed: usize,
    pub fixed: usize,
    pub notified: usize,
    pub awaiting_review: usize,
    pub outreach_sent: usize,
    /// 召回邮件尝试次数（受 max_reengagement_per_run 限制）
    pub outreach_attempts: usize,
    pub blocked_ips: Vec<String>,
    pub audit_insights: Vec<String>,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
}

/// 从 metrics 中找 IP：优先 `ip` 键，其次任何能解析为 IP 的字符串值
pub fn extract_ip(insight: &AgentInsight) -> Option<IpAddr> {
    let parse = |v: &serde_json::Value| v.as_str().and_then(|s| s.trim().parse::<IpAddr>().ok());
    insight
        .metrics
        .get("ip")
        .and_then(parse)
        .or_else(|| insight.metrics.values().find_map(parse))
}

/// pass 内的召回状态
struct OutreachState {
    candidates: Option<Vec<InactiveUser>>,
    contacted: HashSet<String>,
}

pub struct IssueFixer {
    store: Arc<dyn InsightStore>,
    actions: Arc<dyn ActionProvider>,
    directory: Arc<dyn UserDirectory>,
    log: Arc<dyn ActionLog>,
    config: FixerConfig,
    inactivity: Regex,
    pass_lock: Mutex<()>,
}

impl IssueFixer {
    pub fn new(
        store: Arc<dyn InsightStore>,
        actions: Arc<dyn ActionProvider>,
        directory: Arc<dyn UserDirectory>,
        log: Arc<dyn ActionLog>,
        config: FixerConfig,
    ) -> Result<Self, AgentError> {
        let inactivity = Regex::new(INACTIVITY_PATTERN)
            .map_err(|e| AgentError::Config(format!("inactivity pattern: {e}")))?;
        Ok(Self {
            store,
            actions,
            directory,
            log,
            config,
            inactivity,
            pass_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &FixerConfig {
        &self.config
    }

    fn implies_inactivity(&self, insight: &AgentInsight) -> bool {
        [&insight.title, &insight.description, &insight.recommendation]
            .iter()
            .any(|t| self.inactivity.is_match(t))
    }

    async fn log_action(&self, action: AutomationAction, report: &mut FixerReport) {
        if let Err(e) = self.log.record(action).await {
            tracing::warn!(error = %e, "failed to write automation action log");
            report.errors.push(format!("action log: {e}"));
        }
    }

    /// 运行一次修复 pass；同一时刻只有一个 pass 在执行（后到者等待）
    pub async fn run_pass(&self) -> Result<FixerReport, AgentError> {
        let _guard = self.pass_lock.lock().await;
        let started = Instant::now();
        let mut report = FixerReport::default();

        let insights = self
            .store
            .find_unresolved(self.config.max_insights_per_run)
            .await?;
        tracing::info!(count = insights.len(), "issue fixer pass started");

        let mut outreach = OutreachState {
            candidates: None,
            contacted: HashSet::new(),
        };
        for insight in insights.iter().take(self.config.max_insights_per_run) {
            report.processed += 1;
            self.process(insight, &mut outreach, &mut report).await;
        }

        report.execution_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            processed = report.processed,
            fixed = report.fixed,
            notified = report.notified,
            outreach_sent = report.outreach_sent,
            errors = report.errors.len(),
            "issue fixer pass finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        insight: &AgentInsight,
        outreach: &mut OutreachState,
        report: &mut FixerReport,
    ) {
        let mut applied: Vec<String> = Vec::new();

        if insight.category == InsightCategory::Security && insight.severity != Severity::Info {
            if let Some(ip) = extract_ip(insight) {
                if let Some(done) = self.block(insight, ip, report).await {
                    applied.push(done);
                }
            }
        }

        if matches!(insight.category, InsightCategory::Risk | InsightCategory::Growth)
            && self.implies_inactivity(insight)
        {
            if let Some(done) = self.reengage(insight, outreach, report).await {
                applied.push(done);
            }
        }

        if insight.severity >= Severity::Warning {
            self.notify(insight, &applied, report).await;
        }

        if !applied.is_empty() {
            self.resolve_with_audit(insight, &applied, report).await;
        }
    }

    async fn block(
        &self,
        insight: &AgentInsight,
        ip: IpAddr,
        report: &mut FixerReport,
    ) -> Option<String> {
        let ttl = self.config.block_ttl;
        match self.actions.block_ip(ip, ttl, &insight.title).await {
            Ok(()) => {
                tracing::info!(insight_id = %insight.id, %ip, ttl_secs = ttl.as_secs(), "blocked ip");
                report.blocked_ips.push(ip.to_string());
                self.log_action(
                    AutomationAction::new(
                        ActionType::BlockIp,
                        ip.to_string(),
                        &insight.id,
                        ActionOutcome::Succeeded,
                        format!("blocked for {}s", ttl.as_secs()),
                    ),
                    report,
                )
                .await;
                Some(format!("blocked IP {ip} for {}s", ttl.as_secs()))
            }
            Err(e) => {
                tracing::warn!(insight_id = %insight.id, %ip, error = %e, "block ip failed");
                report.errors.push(format!("block {ip}: {e}"));
                self.log_action(
                    AutomationAction::new(
                        ActionType::BlockIp,
                        ip.to_string(),
                        &insight.id,
                        ActionOutcome::Failed,
                        e.to_string(),
                    ),
                    report,
                )
                .await;
                None
            }
        }
    }

    async fn reengage(
        &self,
        insight: &AgentInsight,
        outreach: &mut OutreachState,
        report: &mut FixerReport,
    ) -> Option<String> {
        let cap = self.config.max_reengagement_per_run;
        if report.outreach_attempts >= cap {
            return None;
        }
        if outreach.candidates.is_none() {
            match self.directory.inactive_users(cap).await {
                Ok(users) => outreach.candidates = Some(users),
                Err(e) => {
                    tracing::warn!(error = %e, "user directory unavailable");
                    report.errors.push(format!("user directory: {e}"));
                    outreach.candidates = Some(Vec::new());
                }
            }
        }
        let candidates: Vec<InactiveUser> = outreach
            .candidates
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|u| !outreach.contacted.contains(&u.id))
            .cloned()
            .collect();

        for user in candidates {
            if report.outreach_attempts >= cap {
                break;
            }
            report.outreach_attempts += 1;
            outreach.contacted.insert(user.id.clone());

            let message = OutreachMessage {
                user_id: user.id.clone(),
                email: user.email.clone(),
                subject: "We miss you".to_string(),
                body: format!(
                    "Hi {}, it has been a while. Here is what is new since your last visit.",
                    user.name
                ),
            };
            match self.actions.send_outreach(&message).await {
                Ok(()) => {
                    report.outreach_sent += 1;
                    tracing::info!(insight_id = %insight.id, user_id = %user.id, "re-engagement outreach sent");
                    self.log_action(
                        AutomationAction::new(
                            ActionType::SendOutreach,
                            &user.id,
                            &insight.id,
                            ActionOutcome::Succeeded,
                            "re-engagement email",
                        ),
                        report,
                    )
                    .await;
                    return Some(format!("sent re-engagement outreach to {}", user.id));
                }
                Err(e) => {
                    tracing::warn!(insight_id = %insight.id, user_id = %user.id, error = %e, "outreach failed");
                    report.errors.push(format!("outreach {}: {e}", user.id));
                    self.log_action(
                        AutomationAction::new(
                            ActionType::SendOutreach,
                            &user.id,
                            &insight.id,
                            ActionOutcome::Failed,
                            e.to_string(),
                        ),
                        report,
                    )
                    .await;
                }
            }
        }
        None
    }

    async fn notify(&self, insight: &AgentInsight, applied: &[String], report: &mut FixerReport) {
        let subject = format!("[{}] {}", insight.severity, insight.title);
        let body = if applied.is_empty() {
            format!(
                "{}\n\nNo automated fix applied; awaiting review.\nRecommendation: {}",
                insight.description, insight.recommendation
            )
        } else {
            format!(
                "{}\n\nAutomated actions: {}",
                insight.description,
                applied.join("; ")
            )
        };
        let outcome = match self.actions.notify_owner(&subject, &body).await {
            Ok(()) => {
                report.notified += 1;
                None
            }
            Err(e) => {
                tracing::warn!(insight_id = %insight.id, error = %e, "owner notification failed");
                report.errors.push(format!("notify owner: {e}"));
                Some(e.to_string())
            }
        };

        let (action_outcome, detail) = match (&outcome, applied.is_empty()) {
            (Some(err), _) => (ActionOutcome::Failed, err.clone()),
            (None, true) => {
                report.awaiting_review += 1;
                (ActionOutcome::AwaitingReview, "awaiting review".to_string())
            }
            (None, false) => (ActionOutcome::Succeeded, applied.join("; ")),
        };
        self.log_action(
            AutomationAction::new(
                ActionType::NotifyOwner,
                "owner",
                &insight.id,
                action_outcome,
                detail,
            ),
            report,
        )
        .await;
    }

    async fn resolve_with_audit(
        &self,
        insight: &AgentInsight,
        applied: &[String],
        report: &mut FixerReport,
    ) {
        let note = format!("Auto-fixed: {}", applied.join("; "));
        match self.store.resolve(&insight.id, &note).await {
            Ok(true) => {
                report.fixed += 1;
                let audit = NewInsight::new(
                    AgentType::IssueFixer,
                    insight.category,
                    Severity::Info,
                    format!("Fixed: {}", insight.title),
                )
                .with_description(note)
                .with_metric(
                    "source_insight_id",
                    serde_json::Value::String(insight.id.clone()),
                )
                .with_metric("actions", serde_json::json!(applied))
                .with_confidence(1.0)
                .resolved();
                match self.store.create(audit).await {
                    Ok(created) => report.audit_insights.push(created.id),
                    Err(e) => {
                        tracing::warn!(insight_id = %insight.id, error = %e, "failed to write audit insight");
                        report.errors.push(format!("audit insight: {e}"));
                    }
                }
            }
            Ok(false) => {
                tracing::debug!(insight_id = %insight.id, "insight already resolved, skipping audit");
            }
            Err(e) => {
                tracing::warn!(insight_id = %insight.id, error = %e, "failed to resolve insight");
                report.errors.push(format!("resolve {}: {e}", insight.id));
            }
        }
    }
}

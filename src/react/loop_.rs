//! ReAct 主循环（有界）
//!
//! Think -> Act (Tool) -> Observe -> Refine，直到：
//! - 推理服务给出结论（Succeeded）
//! - 步数预算、执行时间预算耗尽或被取消（强制结论，truncated = true，仍为 Succeeded）
//! - 熔断器拒绝等不可恢复错误（Failed，记录错误）
//!
//! 工具失败不致命：同一步内最多重试一次同一工具；两次都失败则 Branch，让下一次 Think 换路。

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::react::{
    observation_text, Action, Conclusion, Planner, PlannerDecision, ReasoningSession, ToolCall,
    TranscriptEntry, WorkingMemory,
};
use crate::tools::ToolExecutor;

/// 每一步内同一工具的最大尝试次数
const MAX_TOOL_ATTEMPTS: u32 = 2;

/// ReAct 会话配置
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    /// 取消令牌（编排器 shutdown 时触发，转为强制结论）
    pub cancel_token: CancellationToken,
    /// 墙钟预算
    pub execution_budget: Duration,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            cancel_token,
            execution_budget: Duration::from_secs(120),
        }
    }

    pub fn with_execution_budget(mut self, budget: Duration) -> Self {
        self.execution_budget = budget;
        self
    }
}

/// Refine 的决定
#[derive(Debug, Clone, PartialEq, Eq)]
enum Refinement {
    Continue,
    /// 该工具在本步两次失败（或不存在），记入中期记忆后换路
    Branch(String),
    /// 执行被打断，强制结论
    Stop(&'static str),
}

/// 一次带时限、可取消的等待
enum Bounded<T> {
    Done(T),
    Expired,
    Cancelled,
}

async fn bounded<F: std::future::Future>(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: F,
) -> Bounded<F::Output> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    tokio::select! {
        _ = cancel.cancelled() => Bounded::Cancelled,
        res = tokio::time::timeout(remaining, fut) => match res {
            Ok(v) => Bounded::Done(v),
            Err(_) => Bounded::Expired,
        },
    }
}

/// 执行推理会话，直到终态
///
/// 返回 Ok 表示会话 Succeeded（可能 truncated）；返回 Err 时会话已被标记为 Failed。
pub async fn react_loop(
    ctx: &ReactSession<'_>,
    session: &mut ReasoningSession,
) -> Result<(), AgentError> {
    let profile = session.agent_type.profile();
    let tools_schema = ctx.executor.registry().to_schema_json(&profile.allowed_tools);
    let deadline = Instant::now() + ctx.execution_budget;
    let mut working = WorkingMemory::new();
    working.set_goal(session.goal.clone());

    session.start()?;
    tracing::info!(
        agent = %session.agent_type,
        session_id = %session.id,
        step_budget = session.step_budget,
        "reasoning session started"
    );

    loop {
        if ctx.cancel_token.is_cancelled() {
            return force_conclusion(session, "cancelled");
        }
        if Instant::now() >= deadline {
            return force_conclusion(session, "execution budget exhausted");
        }
        if !session.has_budget() {
            return force_conclusion(session, "step budget exhausted");
        }

        // Think
        let step = session.advance_step()?;
        let messages = ctx
            .planner
            .build_messages(&profile, &tools_schema, session, &working);
        let decision = match bounded(&ctx.cancel_token, deadline, ctx.planner.think(&messages)).await
        {
            Bounded::Done(d) => d,
            Bounded::Expired => return force_conclusion(session, "execution budget exhausted"),
            Bounded::Cancelled => return force_conclusion(session, "cancelled"),
        };

        let (thought, tool, args) = match decision {
            Ok(PlannerDecision::Conclude {
                thought,
                conclusion,
            }) => {
                session.record(TranscriptEntry {
                    step,
                    thought,
                    action: Action::Conclude,
                    observation: conclusion.summary.clone(),
                })?;
                session.succeed(conclusion, false)?;
                tracing::info!(
                    agent = %session.agent_type,
                    session_id = %session.id,
                    steps = session.current_step,
                    "reasoning session concluded"
                );
                return Ok(());
            }
            Ok(PlannerDecision::CallTool {
                thought,
                tool,
                args,
            }) => (thought, tool, args),
            Err(e) => {
                match ctx.recovery.handle(&e) {
                    RecoveryAction::RetryWithPrompt(prompt) => {
                        working.add_note(prompt);
                    }
                    RecoveryAction::Retry => {}
                    RecoveryAction::Abort => return fail(session, e),
                }
                tracing::warn!(session_id = %session.id, step, error = %e, "think failed, recovering");
                session.record(TranscriptEntry {
                    step,
                    thought: String::new(),
                    action: Action::Recover {
                        reason: e.to_string(),
                    },
                    observation: "planner output discarded".to_string(),
                })?;
                continue;
            }
        };

        // Act + Observe
        let refinement = act(ctx, session, &profile.allowed_tools, step, &thought, &tool, &args, deadline).await?;

        // Refine
        match refinement {
            Refinement::Continue => {
                working.add_attempt(format!("{tool} -> ok"));
            }
            Refinement::Branch(reason) => {
                tracing::info!(session_id = %session.id, tool = %tool, "branching away from failing tool");
                working.add_failure(reason);
                working.avoid_tool(tool);
            }
            Refinement::Stop(reason) => return force_conclusion(session, reason),
        }
    }
}

/// 执行工具（失败时同一步内重试一次），每次尝试写一条转录
#[allow(clippy::too_many_arguments)]
async fn act(
    ctx: &ReactSession<'_>,
    session: &mut ReasoningSession,
    allowed: &[crate::tools::ToolKind],
    step: usize,
    thought: &str,
    tool: &str,
    args: &serde_json::Value,
    deadline: Instant,
) -> Result<Refinement, AgentError> {
    for attempt in 1..=MAX_TOOL_ATTEMPTS {
        let started = Instant::now();
        let result = match bounded(
            &ctx.cancel_token,
            deadline,
            ctx.executor.execute_within(allowed, tool, args.clone()),
        )
        .await
        {
            Bounded::Done(r) => r,
            Bounded::Expired => return Ok(Refinement::Stop("execution budget exhausted")),
            Bounded::Cancelled => return Ok(Refinement::Stop("cancelled")),
        };

        let observation = observation_text(&result);
        let retryable = matches!(&result, Err(e) if e.is_retryable_tool_error());
        let error = result.as_ref().err().map(|e| e.to_string());
        session.record(TranscriptEntry {
            step,
            thought: thought.to_string(),
            action: Action::CallTool(ToolCall {
                name: tool.to_string(),
                arguments: args.clone(),
                result: result.ok(),
                error: error.clone(),
                attempt,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            observation,
        })?;

        match error {
            None => return Ok(Refinement::Continue),
            Some(err) if retryable && attempt < MAX_TOOL_ATTEMPTS => {
                tracing::warn!(session_id = %session.id, tool, attempt, error = %err, "tool failed, retrying once");
            }
            Some(err) => {
                return Ok(Refinement::Branch(format!(
                    "{tool} failed (attempt {attempt}): {err}"
                )))
            }
        }
    }
    Ok(Refinement::Branch(format!("{tool} failed")))
}

fn fail(session: &mut ReasoningSession, e: AgentError) -> Result<(), AgentError> {
    tracing::error!(
        agent = %session.agent_type,
        session_id = %session.id,
        error = %e,
        "reasoning session failed"
    );
    session.fail(e.to_string())?;
    Err(e)
}

/// 强制结论：不再调用推理服务，由转录生成截断的总结
fn force_conclusion(session: &mut ReasoningSession, reason: &str) -> Result<(), AgentError> {
    let total = session.tool_calls().count();
    let ok = session.tool_calls().filter(|c| c.is_ok()).count();
    let summary = format!(
        "Analysis truncated ({reason}) after {} of {} steps; {ok} of {total} tool calls succeeded.",
        session.current_step, session.step_budget
    );
    tracing::warn!(
        agent = %session.agent_type,
        session_id = %session.id,
        reason,
        "forcing conclusion"
    );
    session.record(TranscriptEntry {
        step: session.current_step,
        thought: String::new(),
        action: Action::Conclude,
        observation: summary.clone(),
    })?;
    session.succeed(
        Conclusion {
            summary,
            ..Conclusion::default()
        },
        true,
    )
}

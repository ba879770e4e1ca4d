//! 推理会话模型
//!
//! ReasoningSession 在调用时创建，只由自己的循环修改，进入终态后不可再变。
//! 状态单调：Pending -> Running -> Succeeded | Failed；任何回退或终态后的修改都返回 InvalidTransition。
//! 始终满足 current_step <= step_budget。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentType;
use crate::core::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Succeeded | SessionStatus::Failed)
    }

    fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Running)
                | (SessionStatus::Pending, SessionStatus::Failed)
                | (SessionStatus::Running, SessionStatus::Succeeded)
                | (SessionStatus::Running, SessionStatus::Failed)
        )
    }
}

/// 一次工具调用（含结果或错误）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 同一步内的第几次尝试（1 或 2）
    pub attempt: u32,
    pub duration_ms: u64,
}

impl ToolCall {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CallTool(ToolCall),
    Conclude,
    Recover { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub step: usize,
    pub thought: String,
    pub action: Action,
    pub observation: String,
}

/// 推理结论（推理服务给出，或预算耗尽时强制生成）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conclusion {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningSession {
    pub id: String,
    pub agent_type: AgentType,
    pub goal: String,
    pub status: SessionStatus,
    pub current_step: usize,
    pub step_budget: usize,
    pub transcript: Vec<TranscriptEntry>,
    pub conclusion: Option<Conclusion>,
    /// 预算耗尽 / 取消导致的强制结论
    pub truncated: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReasoningSession {
    pub fn new(agent_type: AgentType, goal: impl Into<String>, step_budget: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_type,
            goal: goal.into(),
            status: SessionStatus::Pending,
            current_step: 0,
            step_budget,
            transcript: Vec::new(),
            conclusion: None,
            truncated: false,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn ensure_running(&self, to: &str) -> Result<(), AgentError> {
        if self.status == SessionStatus::Running {
            Ok(())
        } else {
            Err(AgentError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: to.to_string(),
            })
        }
    }

    pub fn start(&mut self) -> Result<(), AgentError> {
        self.transition(SessionStatus::Running)
    }

    pub fn has_budget(&self) -> bool {
        self.current_step < self.step_budget
    }

    /// 进入下一步（Think 开始时调用），返回新的步号
    pub fn advance_step(&mut self) -> Result<usize, AgentError> {
        self.ensure_running("step")?;
        if !self.has_budget() {
            return Err(AgentError::InvalidTransition {
                from: format!("step {}", self.current_step),
                to: format!("step {} (budget {})", self.current_step + 1, self.step_budget),
            });
        }
        self.current_step += 1;
        Ok(self.current_step)
    }

    pub fn record(&mut self, entry: TranscriptEntry) -> Result<(), AgentError> {
        self.ensure_running("record")?;
        self.transcript.push(entry);
        Ok(())
    }

    pub fn succeed(&mut self, conclusion: Conclusion, truncated: bool) -> Result<(), AgentError> {
        self.transition(SessionStatus::Succeeded)?;
        self.conclusion = Some(conclusion);
        self.truncated = truncated;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), AgentError> {
        self.transition(SessionStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 转录中的全部工具调用（每次尝试一条）
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.transcript.iter().filter_map(|e| match &e.action {
            Action::CallTool(call) => Some(call),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(budget: usize) -> ReasoningSession {
        ReasoningSession::new(AgentType::GrowthStrategist, "grow", budget)
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut s = session(2);
        assert!(s.succeed(Conclusion::default(), false).is_err());
        s.start().unwrap();
        assert!(s.start().is_err());
        s.succeed(Conclusion::default(), false).unwrap();
        assert!(s.fail("late").is_err());
        assert_eq!(s.status, SessionStatus::Succeeded);
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn test_step_never_exceeds_budget() {
        let mut s = session(2);
        assert!(s.advance_step().is_err());
        s.start().unwrap();
        assert_eq!(s.advance_step().unwrap(), 1);
        assert_eq!(s.advance_step().unwrap(), 2);
        assert!(s.advance_step().is_err());
        assert_eq!(s.current_step, 2);
    }

    #[test]
    fn test_terminal_session_is_immutable() {
        let mut s = session(2);
        s.start().unwrap();
        s.fail("provider down").unwrap();
        let entry = TranscriptEntry {
            step: 1,
            thought: String::new(),
            action: Action::Conclude,
            observation: String::new(),
        };
        assert!(s.record(entry).is_err());
        assert!(s.advance_step().is_err());
        assert_eq!(s.error.as_deref(), Some("provider down"));
    }

    #[test]
    fn test_action_serializes_tagged() {
        let action = Action::Recover {
            reason: "bad json".into(),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "recover");
    }
}

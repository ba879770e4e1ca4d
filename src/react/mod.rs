//! 认知层：推理会话模型、Planner、中期记忆、有界 ReAct 主循环

pub mod loop_;
pub mod planner;
pub mod session;
pub mod working;

pub use loop_::{react_loop, ReactSession};
pub use planner::{observation_text, parse_decision, Planner, PlannerDecision};
pub use session::{
    Action, Conclusion, ReasoningSession, SessionStatus, ToolCall, TranscriptEntry,
};
pub use working::WorkingMemory;

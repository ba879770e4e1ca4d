//! Hive - Rust 运营分析智能体引擎
//!
//! 模块划分：
//! - **agents**: Agent 类型与画像（默认目标、主工具、可用工具、洞察类别）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、任务调度、编排器
//! - **events**: 运行完成事件发布
//! - **fixer**: Issue-Fixer（有上限的自动修复）与外部动作提供方
//! - **llm**: 推理服务客户端抽象与实现（OpenAI 兼容 / Mock / 熔断保护）
//! - **memory**: 洞察（长期记忆）与推理会话持久化
//! - **observability**: 日志初始化
//! - **react**: 推理会话模型、Planner 与有界 ReAct 主循环
//! - **report**: 报告编译与置信度
//! - **resilience**: 命名熔断器与注册表
//! - **tools**: 封闭工具集合、注册表与执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod events;
pub mod fixer;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod report;
pub mod resilience;
pub mod tools;

pub use agents::AgentType;
pub use self::core::{AgentError, AgentOrchestrator, AgentResult, OrchestratorBuilder, OrchestratorSummary};

//! 工具注册表
//!
//! 工具集合是封闭的（ToolKind）；所有工具实现 Tool trait，由 ToolRegistry 按种类注册与查找。
//! 按名称查找未注册的工具返回结构化的 AgentError::UnknownTool，而不是反射式分发。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 封闭的分析工具集合（只读：取指标、算分、风险评分、查历史洞察）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    FetchMetrics,
    ComputeScores,
    RunRiskScoring,
    QueryPastInsights,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::FetchMetrics,
        ToolKind::ComputeScores,
        ToolKind::RunRiskScoring,
        ToolKind::QueryPastInsights,
    ];

    /// 工具名称（即 JSON 中的 "tool" 字段）
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::FetchMetrics => "fetch_metrics",
            ToolKind::ComputeScores => "compute_scores",
            ToolKind::RunRiskScoring => "run_risk_scoring",
            ToolKind::QueryPastInsights => "query_past_insights",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| format!("unknown tool: {s}"))
    }
}

/// 工具 trait：种类、描述（供 LLM 理解）、参数 schema、可选超时、异步执行（args / 结果均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 工具自身声明的超时；None 时使用执行器的默认超时
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 工具注册表：按 ToolKind 存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同种类的旧实现被替换
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.kind(), Arc::new(tool));
    }

    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.get(&kind).cloned()
    }

    /// 按名称解析；名称非法或未注册时返回 UnknownTool（附可用工具列表）
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        name.parse::<ToolKind>()
            .ok()
            .and_then(|kind| self.get(kind))
            .ok_or_else(|| AgentError::UnknownTool {
                name: name.to_string(),
                available: self.tool_names().join(", "),
            })
    }

    /// 已注册工具名（排序后，保证 prompt 稳定）
    pub fn tool_names(&self) -> Vec<String> {
        self.kinds().iter().map(|k| k.as_str().to_string()).collect()
    }

    pub fn kinds(&self) -> Vec<ToolKind> {
        let mut kinds: Vec<ToolKind> = self.tools.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// 指定工具子集的 schema JSON，用于 system prompt 中的 Available tools 段落
    pub fn to_schema_json(&self, allowed: &[ToolKind]) -> String {
        let tools: Vec<Value> = self
            .kinds()
            .into_iter()
            .filter(|k| allowed.contains(k))
            .filter_map(|k| self.get(k))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.kind().as_str(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

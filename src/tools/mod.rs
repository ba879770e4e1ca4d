//! 工具箱：封闭工具集合、注册表、执行器、数据来源与分析工具

pub mod analysis;
pub mod executor;
pub mod finding;
pub mod metrics;
pub mod registry;
pub mod schema;

use std::sync::Arc;
use std::time::Duration;

pub use analysis::{ComputeScoresTool, FetchMetricsTool, PastInsightsTool, RiskScoringTool};
pub use executor::ToolExecutor;
pub use finding::{extract_findings, Finding, FindingSeverity};
pub use metrics::{Check, MetricsSource, SecurityEvent, StaticMetricsSource};
pub use registry::{Tool, ToolKind, ToolRegistry};
pub use schema::decision_schema_json;

use crate::memory::InsightStore;

/// 注册全部分析工具；每个工具声明同一个超时
pub fn default_registry(
    source: Arc<dyn MetricsSource>,
    store: Arc<dyn InsightStore>,
    tool_timeout: Duration,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(FetchMetricsTool::new(source.clone()).with_timeout(tool_timeout));
    registry.register(ComputeScoresTool::new(source.clone()).with_timeout(tool_timeout));
    registry.register(RiskScoringTool::new(source).with_timeout(tool_timeout));
    registry.register(PastInsightsTool::new(store).with_timeout(tool_timeout));
    registry
}

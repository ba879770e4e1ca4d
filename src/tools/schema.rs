//! 推理决策 JSON Schema 生成（schemars 自动生成）
//!
//! 将「合法决策」的 JSON 结构注入 system prompt，减少推理服务输出格式错误。

use schemars::{schema_for, JsonSchema};

/// 调用工具：`{"thought": "...", "tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 本步推理
    pub thought: String,
    /// 工具名，如 fetch_metrics、compute_scores、run_risk_scoring、query_past_insights
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: serde_json::Value,
}

/// 结束推理：`{"thought": "...", "final": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ConclusionFormat {
    pub thought: String,
    #[schemars(rename = "final")]
    pub final_answer: FinalFormat,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct FinalFormat {
    /// 面向管理层的一段总结
    pub summary: String,
    pub recommendations: Vec<String>,
    pub risks: Vec<String>,
}

/// 返回两种决策格式的 JSON Schema 字符串，可拼入 system prompt
pub fn decision_schema_json() -> String {
    let call = schema_for!(ToolCallFormat);
    let conclude = schema_for!(ConclusionFormat);
    let both = serde_json::json!({ "oneOf": [call, conclude] });
    serde_json::to_string_pretty(&both).unwrap_or_default()
}

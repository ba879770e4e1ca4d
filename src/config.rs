//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__STEP_BUDGET=12`）。
//! 所有字段都有默认值，空配置即可运行（Mock 推理服务 + 内存存储 + 仅日志的动作提供者）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agents::AgentType;
use crate::resilience::BreakerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub provider: ProviderSection,
    pub engine: EngineSection,
    pub breakers: BreakersSection,
    /// 调度桶 -> Agent 列表
    #[serde(default = "default_schedules")]
    pub schedules: HashMap<String, Vec<AgentType>>,
    pub fixer: FixerSection,
    pub insights: InsightsSection,
    pub events: EventsSection,
    pub actions: ActionsSection,
    pub data: DataSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            provider: ProviderSection::default(),
            engine: EngineSection::default(),
            breakers: BreakersSection::default(),
            schedules: default_schedules(),
            fixer: FixerSection::default(),
            insights: InsightsSection::default(),
            events: EventsSection::default(),
            actions: ActionsSection::default(),
            data: DataSection::default(),
        }
    }
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 以 JSON 行输出日志
    pub log_json: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            log_json: false,
        }
    }
}

/// [provider] 段：推理服务（身份来自配置，从不硬编码）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// mock / openai（OpenAI 兼容端点）
    pub kind: String,
    /// 熔断器名称，同名的所有调用共享一个熔断状态
    pub name: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 保存 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: "mock".to_string(),
            name: "reasoning-provider".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// [engine] 段：推理会话预算与并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 单会话最大步数
    pub step_budget: usize,
    /// 单会话墙钟预算（秒），超出后强制收尾
    pub execution_budget_secs: u64,
    pub max_concurrent_agents: usize,
    /// 工具默认超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            step_budget: 8,
            execution_budget_secs: 120,
            max_concurrent_agents: 3,
            tool_timeout_secs: 10,
        }
    }
}

impl EngineSection {
    pub fn execution_budget(&self) -> Duration {
        Duration::from_secs(self.execution_budget_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// [breakers] 段：默认熔断配置与按名称覆盖
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BreakersSection {
    pub default: BreakerSection,
    pub overrides: HashMap<String, BreakerSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub timeout_ms: u64,
    pub error_threshold_percentage: f64,
    pub reset_timeout_ms: u64,
    pub volume_threshold: usize,
    pub rolling_window_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            volume_threshold: 5,
            rolling_window_ms: 10_000,
        }
    }
}

impl BreakerSection {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            error_threshold_percentage: self.error_threshold_percentage,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            volume_threshold: self.volume_threshold,
            rolling_window: Duration::from_millis(self.rolling_window_ms),
        }
    }
}

fn default_schedules() -> HashMap<String, Vec<AgentType>> {
    HashMap::from([
        ("every_15_min".to_string(), vec![AgentType::SecuritySentinel]),
        (
            "hourly".to_string(),
            vec![AgentType::BusinessAnalyst, AgentType::ContentIntelligence],
        ),
        (
            "every_6h".to_string(),
            vec![
                AgentType::GrowthStrategist,
                AgentType::ChurnPredictor,
                AgentType::UxAuditor,
            ],
        ),
        ("daily".to_string(), vec![AgentType::LegalCompliance]),
    ])
}

/// [fixer] 段：自动修复上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FixerSection {
    pub max_insights_per_run: usize,
    pub max_reengagement_per_run: usize,
    pub block_ttl_secs: u64,
}

impl Default for FixerSection {
    fn default() -> Self {
        Self {
            max_insights_per_run: 20,
            max_reengagement_per_run: 5,
            block_ttl_secs: 3600,
        }
    }
}

/// [insights] 段：持久化与保留策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InsightsSection {
    /// SQLite 文件路径；未设置时使用内存存储
    pub db_path: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for InsightsSection {
    fn default() -> Self {
        Self {
            db_path: None,
            retention_days: 90,
        }
    }
}

/// [events] 段：运行完成事件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub buffer: usize,
    /// 运行完成后需要广播事件的 Agent
    pub announce: Vec<AgentType>,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            buffer: 64,
            announce: AgentType::analysis_agents(),
        }
    }
}

/// [actions] 段：外部动作 Webhook；全部缺省时只记录日志
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ActionsSection {
    pub owner_webhook: Option<String>,
    pub outreach_webhook: Option<String>,
    pub firewall_webhook: Option<String>,
}

/// [data] 段：静态指标数据（JSON 文件）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DataSection {
    pub fixture: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

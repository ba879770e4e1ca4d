//! Hive - Rust 运营分析智能体引擎
//!
//! 入口：加载配置、初始化日志、构建编排器，按子命令运行 Agent / 调度桶 / 修复 pass / 保留策略，
//! 结果以 JSON 打印，最后输出熔断器统计。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive::agents::AgentType;
use hive::config::load_config;
use hive::core::OrchestratorBuilder;
use hive::report::format_report_for_api;

#[derive(Parser, Debug)]
#[command(name = "hive", version, about = "Bounded-reasoning operations agents")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 运行单个 Agent
    Run {
        agent: AgentType,
        #[arg(long)]
        goal: Option<String>,
    },
    /// 运行调度桶（结束后触发一次修复 pass）
    Schedule { bucket: String },
    /// 运行全部分析型 Agent
    All,
    /// 执行一次 Issue-Fixer pass
    Fix,
    /// 删除超过保留期的洞察
    Retention,
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.clone()).context("Failed to load configuration")?;
    hive::observability::init(config.app.log_json);

    let orchestrator = OrchestratorBuilder::new(config)
        .build()
        .context("Failed to build orchestrator")?;

    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, concluding in-flight sessions");
                orchestrator.shutdown();
            }
        });
    }

    match cli.command {
        Command::Run { agent, goal } => {
            let result = match goal {
                Some(goal) => orchestrator.run_agent_with_goal(agent, &goal).await,
                None => orchestrator.run_agent(agent).await,
            };
            if let Some(report) = &result.report {
                print_json(&format_report_for_api(report))?;
            }
            print_json(&result)?;
        }
        Command::Schedule { bucket } => {
            let results = orchestrator
                .run_agents_by_schedule(&bucket)
                .await
                .with_context(|| format!("Cannot run schedule '{bucket}'"))?;
            print_json(&results)?;
            orchestrator.wait_background().await;
        }
        Command::All => {
            let summary = orchestrator.run_all().await;
            print_json(&summary)?;
        }
        Command::Fix => {
            let report = orchestrator
                .fixer()
                .run_pass()
                .await
                .context("Fixer pass failed")?;
            print_json(&report)?;
        }
        Command::Retention => {
            let removed = orchestrator
                .run_retention()
                .await
                .context("Retention failed")?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
    }

    print_json(&orchestrator.breaker_stats())?;
    Ok(())
}

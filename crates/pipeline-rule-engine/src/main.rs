//! 销售管道健康度评分工具
//!
//! 加载规则目录和覆盖配置，对商机数据评分并输出整改计划。

use anyhow::{Context, Result};
use clap::Parser;
use pipeline_shared::config::AppConfig;
use pipeline_shared::observability;
use rule_engine::cli::{Cli, CommandRunner, Commands};

const SERVICE_NAME: &str = "pipeline-health";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 统一加载配置：config/default.toml -> config/{env}.toml -> config/pipeline-health.toml -> 环境变量
    let mut config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if cli.json_logs {
        config.observability.log_format = "json".to_string();
    }

    let _guard = observability::init(&config.service_name, &config.observability)?;

    let runner = CommandRunner::new(config);

    match cli.command {
        Commands::Analyze {
            deals,
            source,
            group_by,
            chunk_size,
            at,
            output,
        } => {
            runner
                .run_analyze(
                    &deals,
                    &source,
                    group_by,
                    chunk_size,
                    at.as_deref(),
                    output.as_deref(),
                )
                .await
        }
        Commands::Rules { source } => runner.run_rules(&source).await,
        Commands::Validate { rules } => runner.run_validate(&rules),
        Commands::Metadata => runner.run_metadata(),
    }
}

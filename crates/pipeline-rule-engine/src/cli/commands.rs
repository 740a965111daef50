//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。

use crate::engine::GroupBy;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 销售管道健康度评分工具
///
/// 使用 `--help` 查看各子命令的详细说明。
#[derive(Parser, Debug)]
#[command(name = "pipeline-health")]
#[command(version, about = "销售管道健康度评分工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// 输出 JSON 格式日志
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// 规则来源参数
#[derive(Args, Debug, Clone, Default)]
pub struct RuleSourceArgs {
    /// YAML 规则目录（默认使用配置或内置目录）
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// 覆盖配置和自定义规则快照（JSON/YAML）
    #[arg(short, long)]
    pub sources: Option<PathBuf>,

    /// 用户 ID
    #[arg(long)]
    pub user_id: Option<String>,

    /// 组织 ID
    #[arg(long)]
    pub org_id: Option<String>,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 对商机数据评分
    ///
    /// 解析当前上下文的有效规则，分片并行评估所有商机，
    /// 输出分析结果和整改计划（JSON）。
    Analyze {
        /// 商机数据文件（JSON 数组，或 .yaml/.yml）
        #[arg(short, long)]
        deals: PathBuf,

        #[command(flatten)]
        source: RuleSourceArgs,

        /// 整改计划分组方式：owner 或 category
        #[arg(short, long, default_value = "owner")]
        group_by: GroupBy,

        /// 每个分片的商机数（覆盖配置）
        #[arg(long)]
        chunk_size: Option<usize>,

        /// 评估时间点（RFC 3339 或 YYYY-MM-DD），默认当前时间
        #[arg(long)]
        at: Option<String>,

        /// 输出到文件，默认打印到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 查看有效规则摘要和全局规则状态
    Rules {
        #[command(flatten)]
        source: RuleSourceArgs,
    },

    /// 加载并校验规则目录，有配置错误时以非零状态退出
    Validate {
        /// YAML 规则目录
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// 输出规则编写元数据
    Metadata,
}

//! CLI 模块
//!
//! 提供命令行接口，支持以下功能：
//!
//! - `analyze` - 对商机数据评分并输出整改计划
//! - `rules` - 查看当前上下文的有效规则
//! - `validate` - 校验 YAML 规则目录
//! - `metadata` - 输出规则编写元数据
//!
//! # 使用示例
//!
//! ```bash
//! # 使用内置规则评分
//! pipeline-health analyze -d deals.json
//!
//! # 叠加组织/用户覆盖配置，按分类输出整改计划
//! pipeline-health analyze -d deals.json -s sources.yaml --org-id acme --user-id u-42 -g category
//!
//! # 校验规则目录
//! pipeline-health validate -r rules/business-rules.yaml
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands, RuleSourceArgs};
pub use runner::CommandRunner;

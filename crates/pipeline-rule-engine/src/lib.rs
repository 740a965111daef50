//! 销售管道健康度规则引擎
//!
//! 以声明式 YAML 规则评估商机记录，支持：
//! - 全局规则目录 + 组织/用户级覆盖配置和自定义规则
//! - 嵌套 all/any 条件树和空值、日期、数值、枚举类字段操作符
//! - 按严重级别加权的管道健康度评分
//! - 按负责人或分类分组的整改计划

pub mod cli;
pub mod deal;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod loader;
pub mod metadata;
pub mod models;
pub mod operators;
pub mod resolver;
pub mod store;
pub mod validation;

pub use deal::{Deal, EvaluationContext};
pub use engine::{AnalysisResult, BusinessRulesEngine, GroupBy, HealthStatus, RulesSummary};
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use executor::RuleExecutor;
pub use loader::RuleCatalog;
pub use models::{
    Condition, ConditionNode, DealViolation, GlobalRuleOverride, RemediationOwner, Rule,
    RuleCategory, RuleScope, ScopeOwner, Severity, Violation,
};
pub use operators::Operator;
pub use resolver::{ResolutionContext, RuleResolver};
pub use store::{InMemoryRuleRepository, RuleRepository};
pub use validation::{CustomRuleDraft, RuleValidator};

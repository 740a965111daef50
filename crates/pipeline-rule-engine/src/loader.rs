//! 静态规则目录加载
//!
//! YAML 文档按分类分组（`data_quality_rules` ... `compliance_rules`），
//! 加载时按固定的分组顺序展开为一个有序的全局规则列表，并立即校验。

use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleCategory, RuleScope};
use crate::validation::RuleValidator;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, instrument};

/// 内置规则目录
const BUILTIN_RULES: &str = include_str!("../rules/business-rules.yaml");

/// 规则目录文件结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCatalogFile {
    #[serde(default)]
    pub data_quality_rules: Vec<Rule>,
    #[serde(default)]
    pub sales_hygiene_rules: Vec<Rule>,
    #[serde(default)]
    pub forecasting_rules: Vec<Rule>,
    #[serde(default)]
    pub progression_rules: Vec<Rule>,
    #[serde(default)]
    pub engagement_rules: Vec<Rule>,
    #[serde(default)]
    pub compliance_rules: Vec<Rule>,
}

impl RuleCatalogFile {
    /// 按分组顺序展开
    pub fn into_rules(self) -> Vec<Rule> {
        [
            self.data_quality_rules,
            self.sales_hygiene_rules,
            self.forecasting_rules,
            self.progression_rules,
            self.engagement_rules,
            self.compliance_rules,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// 全局规则目录
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Vec<Rule>,
}

impl RuleCatalog {
    /// 加载内置目录
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_RULES)
    }

    /// 从 YAML 字符串加载
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: RuleCatalogFile = serde_yaml::from_str(yaml)?;
        Self::from_rules(file.into_rules())
    }

    /// 从 YAML 文件加载
    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml_str(&content)?;
        info!("规则目录已加载: {} 条规则", catalog.len());
        Ok(catalog)
    }

    /// 从规则列表创建（全部视为全局规则）
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        let rules: Vec<Rule> = rules
            .into_iter()
            .map(|mut rule| {
                rule.scope = RuleScope::Global;
                rule.org_id = None;
                rule.user_id = None;
                rule
            })
            .collect();

        RuleValidator::validate_rule_set(&rules)?;
        Ok(Self { rules })
    }

    /// 指定路径时从文件加载，否则使用内置目录
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    pub fn all(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn by_category(&self, category: RuleCategory) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.category == category).collect()
    }

    pub fn by_id(&self, rule_id: &str) -> Result<&Rule> {
        self.rules
            .iter()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))
    }

    /// 适用于指定阶段的规则
    pub fn for_stage(&self, stage: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.applies_to_stage(stage))
            .collect()
    }
}

//! 规则校验
//!
//! 在规则加载或编写阶段发现配置错误，避免损坏的规则在评估时被静默跳过、
//! 悄悄拉低健康分。

use crate::error::{Result, RuleError};
use crate::models::{
    Condition, ConditionNode, RemediationOwner, Rule, RuleCategory, ScopeOwner, Severity,
};
use crate::operators::{Operator, as_number};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use validator::{Validate, ValidationError};

type LeafCheck = fn(&Rule, &Condition, &str) -> Result<()>;

/// 规则校验器
pub struct RuleValidator;

impl RuleValidator {
    /// 校验单条规则（结构 + 阈值类型）
    pub fn validate_rule(rule: &Rule) -> Result<()> {
        Self::validate_structure(rule)?;
        Self::validate_node(rule, &rule.condition, "condition", Self::validate_threshold)
    }

    /// 只校验结构：ID、名称、阶段、字段和必需的阈值是否存在
    ///
    /// 结构错误说明规则本身无法评估；阈值类型错误只影响这一条规则，
    /// 由执行器在评估时按单条规则失败处理。
    pub fn validate_structure(rule: &Rule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(RuleError::Validation {
                rule_id: rule.id.clone(),
                message: "规则 ID 不能为空".to_string(),
            });
        }

        if rule.name.trim().is_empty() {
            return Err(Self::invalid(rule, "规则名称不能为空"));
        }

        if rule.applicable_stages.iter().any(|s| s.is_empty()) {
            return Err(Self::invalid(rule, "适用阶段不能包含空字符串"));
        }

        Self::validate_node(rule, &rule.condition, "condition", Self::validate_leaf)
    }

    /// 校验同一层级的一组规则（ID 在层级内必须唯一）
    pub fn validate_rule_set(rules: &[Rule]) -> Result<()> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in rules {
            Self::validate_rule(rule)?;
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleError::DuplicateRule(rule.id.clone()));
            }
        }
        Ok(())
    }

    /// 规则条件中引用的全部字段
    pub fn referenced_fields(rule: &Rule) -> BTreeSet<String> {
        rule.condition
            .leaves()
            .into_iter()
            .map(|cond| cond.field.clone())
            .collect()
    }

    fn validate_node(rule: &Rule, node: &ConditionNode, path: &str, check: LeafCheck) -> Result<()> {
        match node {
            ConditionNode::Leaf(cond) => check(rule, cond, path),
            ConditionNode::All(children) => {
                for (i, child) in children.iter().enumerate() {
                    Self::validate_node(rule, child, &format!("{}.all[{}]", path, i), check)?;
                }
                Ok(())
            }
            ConditionNode::Any(children) => {
                for (i, child) in children.iter().enumerate() {
                    Self::validate_node(rule, child, &format!("{}.any[{}]", path, i), check)?;
                }
                Ok(())
            }
        }
    }

    /// 字段非空，需要阈值的操作符必须带阈值
    fn validate_leaf(rule: &Rule, cond: &Condition, path: &str) -> Result<()> {
        if cond.field.trim().is_empty() {
            return Err(Self::invalid(rule, &format!("条件 '{}' 的字段不能为空", path)));
        }

        if cond.operator.requires_threshold() && cond.value.is_none() {
            return Err(RuleError::MissingThreshold {
                operator: format!("{} ({}.{})", cond.operator, rule.id, path),
            });
        }

        Ok(())
    }

    /// 验证操作符和阈值类型的兼容性
    fn validate_threshold(rule: &Rule, cond: &Condition, path: &str) -> Result<()> {
        let Some(value) = &cond.value else {
            return Ok(());
        };

        match cond.operator {
            Operator::OlderThanDays
            | Operator::WithinDays
            | Operator::MoreThanDaysAway
            | Operator::GreaterThan
            | Operator::LessThan => {
                if matches!(value, Value::Bool(_)) || as_number(value).is_none() {
                    return Err(Self::invalid(
                        rule,
                        &format!("条件 '{}' 的 {} 操作符需要数值阈值", path, cond.operator),
                    ));
                }
            }
            Operator::In => {
                if !value.is_array() {
                    return Err(Self::invalid(
                        rule,
                        &format!("条件 '{}' 的 in 操作符需要数组值", path),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn invalid(rule: &Rule, message: &str) -> RuleError {
        RuleError::Validation {
            rule_id: rule.id.clone(),
            message: message.to_string(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn validate_rule_id(rule_id: &str) -> std::result::Result<(), ValidationError> {
    if rule_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("rule_id_format");
        err.message = Some("规则 ID 只能包含字母、数字和下划线".into());
        Err(err)
    }
}

/// 自定义规则编写请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomRuleDraft {
    #[validate(
        length(min = 1, max = 50, message = "规则 ID 长度必须在1-50个字符之间"),
        custom(function = "validate_rule_id")
    )]
    pub rule_id: String,
    #[validate(length(min = 1, max = 200, message = "规则名称长度必须在1-200个字符之间"))]
    pub name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    #[validate(length(min = 1, max = 500, message = "规则描述长度必须在1-500个字符之间"))]
    pub description: String,
    pub condition: ConditionNode,
    #[validate(length(min = 1, max = 500, message = "提示信息长度必须在1-500个字符之间"))]
    pub message: String,
    #[validate(length(max = 500, message = "整改说明不能超过500个字符"))]
    pub remediation: Option<String>,
    pub remediation_owner: Option<RemediationOwner>,
    #[serde(default)]
    pub automatable: bool,
    #[serde(default)]
    pub applicable_stages: Vec<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 100, message = "优先级必须在0-100之间"))]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CustomRuleDraft {
    /// 校验后转换为归属于指定组织/用户的规则
    pub fn into_rule(self, owner: &ScopeOwner) -> Result<Rule> {
        self.validate().map_err(|e| RuleError::Validation {
            rule_id: self.rule_id.clone(),
            message: e.to_string(),
        })?;

        let rule = Rule {
            id: self.rule_id,
            name: self.name,
            description: self.description,
            category: self.category,
            severity: self.severity,
            condition: self.condition,
            message: self.message,
            remediation: self.remediation.unwrap_or_default(),
            remediation_owner: self.remediation_owner,
            automatable: self.automatable,
            applicable_stages: self.applicable_stages,
            priority: self.priority,
            enabled: self.enabled,
            scope: owner.scope(),
            org_id: None,
            user_id: None,
        }
        .owned_by(owner);

        RuleValidator::validate_rule(&rule)?;
        Ok(rule)
    }
}

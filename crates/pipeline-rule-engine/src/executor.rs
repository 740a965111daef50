//! 规则执行器
//!
//! 将单条规则应用到单个商机：阶段过滤、条件求值、构造违规记录。
//! 单个 (规则, 商机) 组合的求值错误在这里被捕获并记录，不会中断整批评估。

use crate::deal::{Deal, EvaluationContext};
use crate::error::Result;
use crate::evaluator::ConditionEvaluator;
use crate::models::{Rule, Violation, display_value};
use tracing::{debug, error, warn};

/// 规则执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleExecutor;

impl RuleExecutor {
    pub fn new() -> Self {
        Self
    }

    /// 评估单条规则，错误被吞掉并记录日志，视为无违规
    pub fn evaluate_rule(
        &self,
        rule: &Rule,
        deal: &Deal,
        ctx: &EvaluationContext,
    ) -> Option<Violation> {
        match self.try_evaluate_rule(rule, deal, ctx) {
            Ok(violation) => violation,
            Err(e) => {
                if e.is_configuration_error() {
                    error!(rule_id = %rule.id, code = e.code(), "规则配置错误: {}", e);
                } else {
                    warn!(
                        rule_id = %rule.id,
                        deal_id = ?deal.deal_id(),
                        code = e.code(),
                        "规则评估失败，按无违规处理: {}",
                        e
                    );
                }
                metrics::counter!(
                    "rule_engine_evaluation_errors_total",
                    "rule_id" => rule.id.clone()
                )
                .increment(1);
                None
            }
        }
    }

    /// 评估单条规则，保留错误
    pub fn try_evaluate_rule(
        &self,
        rule: &Rule,
        deal: &Deal,
        ctx: &EvaluationContext,
    ) -> Result<Option<Violation>> {
        let stage = deal.stage();
        if !rule.applies_to_stage(&stage) {
            debug!(rule_id = %rule.id, stage = %stage, "阶段不适用，跳过规则");
            return Ok(None);
        }

        if !ConditionEvaluator::evaluate(&rule.condition, deal, ctx)? {
            return Ok(None);
        }

        Ok(Some(Self::build_violation(rule, deal)))
    }

    /// 依次评估全部规则，结果顺序与规则顺序一致
    pub fn evaluate_all_rules<'a, I>(
        &self,
        rules: I,
        deal: &Deal,
        ctx: &EvaluationContext,
    ) -> Vec<Violation>
    where
        I: IntoIterator<Item = &'a Rule>,
    {
        rules
            .into_iter()
            .filter_map(|rule| self.evaluate_rule(rule, deal, ctx))
            .collect()
    }

    fn build_violation(rule: &Rule, deal: &Deal) -> Violation {
        // 字段名、当前值和期望值都取自第一个叶子条件，复合条件也一样
        let primary = rule.condition.primary_leaf();
        let field_name = primary.map(|c| c.field.clone());

        let current_value = field_name
            .as_deref()
            .and_then(|field| deal.get_field(field))
            .and_then(display_value);
        let expected_value = primary
            .and_then(|c| c.value.as_ref())
            .and_then(display_value);

        Violation {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            category: rule.category,
            severity: rule.severity,
            message: rule.message.clone(),
            field_name,
            current_value,
            expected_value,
            remediation_action: rule.remediation.clone(),
            remediation_owner: rule.remediation_owner,
            automatable: rule.automatable,
        }
    }
}

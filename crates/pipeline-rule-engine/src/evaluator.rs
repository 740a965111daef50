//! 条件评估器
//!
//! 对单条规则的条件树做结构递归，叶子条件交给操作符库求值。

use crate::deal::{Deal, EvaluationContext};
use crate::error::{Result, RuleError};
use crate::models::{Condition, ConditionNode};

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件树
    ///
    /// - `all`：全部子条件为真（空列表为真），遇到 false 短路
    /// - `any`：任一子条件为真（空列表为假），遇到 true 短路
    /// - 叶子：按字段名（含 camelCase 回退）取值后调用操作符
    pub fn evaluate(node: &ConditionNode, deal: &Deal, ctx: &EvaluationContext) -> Result<bool> {
        match node {
            ConditionNode::All(children) => {
                for child in children {
                    if !Self::evaluate(child, deal, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionNode::Any(children) => {
                for child in children {
                    if Self::evaluate(child, deal, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConditionNode::Leaf(cond) => Self::evaluate_leaf(cond, deal, ctx),
        }
    }

    fn evaluate_leaf(cond: &Condition, deal: &Deal, ctx: &EvaluationContext) -> Result<bool> {
        if cond.field.is_empty() {
            return Err(RuleError::InvalidCondition(format!(
                "条件缺少字段名 (operator={})",
                cond.operator
            )));
        }

        let field_value = deal.get_field(&cond.field);
        cond.operator
            .evaluate(field_value, cond.value.as_ref(), ctx.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn ctx() -> EvaluationContext {
        EvaluationContext::new(Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap())
    }

    fn deal() -> Deal {
        Deal::from_value(json!({
            "name": "Acme expansion",
            "amount": 150000,
            "stage": "Proposal",
            "closeDate": (ctx().now() - Duration::days(10)).to_rfc3339(),
            "next_steps": "",
            "probability": 15
        }))
        .unwrap()
    }

    fn node(value: serde_json::Value) -> ConditionNode {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_combinators() {
        assert!(ConditionEvaluator::evaluate(&ConditionNode::All(vec![]), &deal(), &ctx()).unwrap());
        assert!(!ConditionEvaluator::evaluate(&ConditionNode::Any(vec![]), &deal(), &ctx()).unwrap());
    }

    #[test]
    fn test_leaf_with_camel_case_fallback() {
        let cond = ConditionNode::leaf("close_date", Operator::IsPast);
        assert!(ConditionEvaluator::evaluate(&cond, &deal(), &ctx()).unwrap());
    }

    #[test]
    fn test_all_is_conjunction() {
        let a = node(json!({"field": "amount", "operator": "greater_than", "value": 100000}));
        let b = node(json!({"field": "next_steps", "operator": "is_empty"}));
        let c = node(json!({"field": "name", "operator": "is_empty"}));

        let d = deal();
        let eval = |n: &ConditionNode| ConditionEvaluator::evaluate(n, &d, &ctx()).unwrap();

        assert!(eval(&ConditionNode::All(vec![a.clone(), b.clone()])));
        assert_eq!(
            eval(&ConditionNode::All(vec![a.clone(), c.clone()])),
            eval(&a) && eval(&c)
        );
        assert!(eval(&ConditionNode::Any(vec![c, a])));
    }

    #[test]
    fn test_nested_groups() {
        // amount > 100000 AND (next_steps 为空 OR probability < 10)
        let cond = node(json!({"all": [
            {"field": "amount", "operator": "greater_than", "value": 100000},
            {"any": [
                {"field": "probability", "operator": "less_than", "value": 10},
                {"field": "next_steps", "operator": "is_empty"}
            ]}
        ]}));
        assert!(ConditionEvaluator::evaluate(&cond, &deal(), &ctx()).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        // 第二个子条件的阈值类型错误，但第一个子条件已决定结果
        let cond = node(json!({"any": [
            {"field": "name", "operator": "equals", "value": "acme EXPANSION"},
            {"field": "name", "operator": "in", "value": "not-a-list"}
        ]}));
        assert!(ConditionEvaluator::evaluate(&cond, &deal(), &ctx()).unwrap());
    }

    #[test]
    fn test_empty_field_name_is_rejected() {
        let cond = ConditionNode::leaf("", Operator::IsEmpty);
        let err = ConditionEvaluator::evaluate(&cond, &deal(), &ctx()).unwrap_err();
        assert!(matches!(err, RuleError::InvalidCondition(_)));
    }

    #[test]
    fn test_missing_threshold_propagates() {
        let cond = ConditionNode::leaf("amount", Operator::GreaterThan);
        let err = ConditionEvaluator::evaluate(&cond, &deal(), &ctx()).unwrap_err();
        assert!(matches!(err, RuleError::MissingThreshold { .. }));
    }
}

//! 业务规则引擎
//!
//! 持有一个评估上下文的有效规则列表，对一批商机逐个评估并聚合为
//! 分析结果：违规列表、分类/严重级别分组、每个商机的摘要以及健康分。
//!
//! 引擎本身无状态。用户/组织上下文或规则配置变化时需要重新解析规则并
//! 创建新的引擎实例。

use crate::deal::{Deal, EvaluationContext};
use crate::error::{Result, RuleError};
use crate::executor::RuleExecutor;
use crate::models::{DealViolation, Rule, RuleCategory, RuleScope, Severity, Violation};
use crate::resolver::{ResolutionContext, RuleResolver};
use crate::validation::RuleValidator;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// 严重级别权重
const CRITICAL_WEIGHT: f64 = 5.0;
const WARNING_WEIGHT: f64 = 2.0;
const INFO_WEIGHT: f64 = 0.5;
/// 每个商机的最大扣分
const PENALTY_PER_DEAL: f64 = 10.0;

/// 按严重级别计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.warning + self.info
    }

    /// 最严重的级别，无违规时为 None
    pub fn worst(&self) -> Option<Severity> {
        if self.critical > 0 {
            Some(Severity::Critical)
        } else if self.warning > 0 {
            Some(Severity::Warning)
        } else if self.info > 0 {
            Some(Severity::Info)
        } else {
            None
        }
    }

    fn merge(&mut self, other: &SeverityCounts) {
        self.critical += other.critical;
        self.warning += other.warning;
        self.info += other.info;
    }
}

impl<'a> FromIterator<&'a Violation> for SeverityCounts {
    fn from_iter<I: IntoIterator<Item = &'a Violation>>(iter: I) -> Self {
        let mut counts = Self::default();
        for v in iter {
            counts.record(v.severity);
        }
        counts
    }
}

/// 健康等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Self::Excellent
        } else if score >= 50.0 {
            Self::Good
        } else if score >= 25.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// 计算健康分
///
/// `clean_pct - penalty_pct`，下限 0，保留两位小数；商机数为 0 时为 0。
/// 扣分按整个管道的违规总数计算，而不是按商机。
pub fn health_score(total_deals: usize, deals_with_issues: usize, counts: &SeverityCounts) -> f64 {
    if total_deals == 0 {
        return 0.0;
    }

    let total = total_deals as f64;
    let clean_pct = (total - deals_with_issues as f64) / total * 100.0;

    let severity_penalty = counts.critical as f64 * CRITICAL_WEIGHT
        + counts.warning as f64 * WARNING_WEIGHT
        + counts.info as f64 * INFO_WEIGHT;
    let max_penalty = total * PENALTY_PER_DEAL;
    let penalty_pct = (severity_penalty / max_penalty * 100.0).min(100.0);

    round2((clean_pct - penalty_pct).max(0.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 单个商机的评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct DealEvaluation {
    pub deal_id: Option<String>,
    pub deal_name: Option<String>,
    pub stage: String,
    pub violations: Vec<Violation>,
    pub counts: SeverityCounts,
}

impl DealEvaluation {
    pub fn has_issues(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// 单个商机的摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealSummary {
    pub deal_id: Option<String>,
    pub deal_name: Option<String>,
    pub stage: String,
    /// 最严重的违规级别，无违规时序列化为 `NONE`
    #[serde(serialize_with = "serialize_worst_severity")]
    pub worst_severity: Option<Severity>,
    pub total_issues: usize,
    pub counts: SeverityCounts,
}

fn serialize_worst_severity<S: Serializer>(
    value: &Option<Severity>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(value.map_or("NONE", |s| s.as_str()))
}

/// 按严重级别固定分为三组
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ViolationsBySeverity {
    pub critical: Vec<DealViolation>,
    pub warning: Vec<DealViolation>,
    pub info: Vec<DealViolation>,
}

impl ViolationsBySeverity {
    fn push(&mut self, violation: DealViolation) {
        match violation.violation.severity {
            Severity::Critical => self.critical.push(violation),
            Severity::Warning => self.warning.push(violation),
            Severity::Info => self.info.push(violation),
        }
    }
}

/// 批量分析结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub total_deals: usize,
    pub deals_with_issues: usize,
    pub health_score: f64,
    pub health_status: HealthStatus,
    pub total_critical: usize,
    pub total_warnings: usize,
    pub total_info: usize,
    pub violations: Vec<DealViolation>,
    pub violations_by_category: BTreeMap<RuleCategory, Vec<DealViolation>>,
    pub violations_by_severity: ViolationsBySeverity,
    pub deals: Vec<DealSummary>,
}

/// 整改计划分组方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    Owner,
    Category,
}

impl FromStr for GroupBy {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Self::Owner),
            "category" => Ok(Self::Category),
            other => Err(RuleError::InvalidGroupBy(other.to_string())),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Category => f.write_str("category"),
        }
    }
}

/// 按来源层级计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeCounts {
    pub global: usize,
    pub org: usize,
    pub user: usize,
}

/// 已加载规则摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesSummary {
    pub total_rules: usize,
    pub by_category: BTreeMap<RuleCategory, usize>,
    pub by_severity: SeverityCounts,
    pub by_scope: ScopeCounts,
}

/// 业务规则引擎
#[derive(Clone)]
pub struct BusinessRulesEngine {
    rules: Arc<Vec<Rule>>,
    executor: RuleExecutor,
}

impl BusinessRulesEngine {
    /// 使用已解析的有效规则列表创建引擎
    ///
    /// 结构错误（字段、操作符或必需阈值缺失）直接返回。阈值类型不匹配
    /// （例如覆盖配置把数值写到了 `in` 条件上）只记录日志，该规则在评估时
    /// 按单条规则失败处理，不影响其余规则。
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        for rule in &rules {
            RuleValidator::validate_structure(rule)?;
            if let Err(e) = RuleValidator::validate_rule(rule) {
                warn!(
                    rule_id = %rule.id,
                    scope = %rule.scope.as_str(),
                    code = e.code(),
                    "规则阈值类型不匹配，评估时将被跳过: {}",
                    e
                );
            }
        }

        Ok(Self {
            rules: Arc::new(rules),
            executor: RuleExecutor::new(),
        })
    }

    /// 为指定上下文解析规则后创建引擎
    pub async fn for_context(resolver: &RuleResolver, ctx: &ResolutionContext) -> Result<Self> {
        Self::new(resolver.resolve(ctx).await?)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// 分析单个商机
    ///
    /// 商机带有阶段时先按阶段预筛选规则，执行器仍会再次检查阶段，
    /// 因此结果与不预筛选完全一致。
    pub fn analyze_deal(&self, deal: &Deal, ctx: &EvaluationContext) -> DealEvaluation {
        let stage = deal.stage();
        let has_stage = deal.get_field("stage").is_some();

        let applicable = self
            .rules
            .iter()
            .filter(|rule| !has_stage || rule.applies_to_stage(&stage));
        let violations = self.executor.evaluate_all_rules(applicable, deal, ctx);
        let counts: SeverityCounts = violations.iter().collect();

        metrics::counter!("rule_engine_deals_analyzed_total").increment(1);
        for v in &violations {
            metrics::counter!(
                "rule_engine_violations_total",
                "severity" => v.severity.as_str()
            )
            .increment(1);
        }

        DealEvaluation {
            deal_id: deal.deal_id(),
            deal_name: deal.deal_name(),
            stage,
            violations,
            counts,
        }
    }

    /// 逐个评估商机，不做聚合
    pub fn evaluate_deals(&self, deals: &[Deal], ctx: &EvaluationContext) -> Vec<DealEvaluation> {
        deals.iter().map(|d| self.analyze_deal(d, ctx)).collect()
    }

    /// 以当前时间分析一批商机
    pub fn analyze_deals(&self, deals: &[Deal]) -> AnalysisResult {
        self.analyze_deals_at(deals, Utc::now())
    }

    /// 以指定时间点分析一批商机，整批共享同一个时间点
    #[instrument(skip(self, deals), fields(deals = deals.len(), rules = self.rules.len()))]
    pub fn analyze_deals_at(&self, deals: &[Deal], now: DateTime<Utc>) -> AnalysisResult {
        let start = Instant::now();
        let ctx = EvaluationContext::new(now);

        let result = Self::aggregate(self.evaluate_deals(deals, &ctx));

        metrics::histogram!("rule_engine_analysis_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        info!(
            health_score = result.health_score,
            deals_with_issues = result.deals_with_issues,
            violations = result.violations.len(),
            "商机分析完成"
        );
        result
    }

    /// 将逐个商机的评估结果聚合为分析结果
    ///
    /// 纯函数，可以在并行评估完成后单线程调用。
    pub fn aggregate(evaluations: Vec<DealEvaluation>) -> AnalysisResult {
        let total_deals = evaluations.len();
        let mut deals_with_issues = 0;
        let mut totals = SeverityCounts::default();
        let mut violations = Vec::new();
        let mut deals = Vec::with_capacity(total_deals);

        for evaluation in evaluations {
            if evaluation.has_issues() {
                deals_with_issues += 1;
                totals.merge(&evaluation.counts);
            }

            deals.push(DealSummary {
                deal_id: evaluation.deal_id.clone(),
                deal_name: evaluation.deal_name.clone(),
                stage: evaluation.stage,
                worst_severity: evaluation.counts.worst(),
                total_issues: evaluation.counts.total(),
                counts: evaluation.counts,
            });

            violations.extend(evaluation.violations.into_iter().map(|violation| DealViolation {
                deal_id: evaluation.deal_id.clone(),
                deal_name: evaluation.deal_name.clone(),
                violation,
            }));
        }

        let score = health_score(total_deals, deals_with_issues, &totals);

        AnalysisResult {
            total_deals,
            deals_with_issues,
            health_score: score,
            health_status: HealthStatus::from_score(score),
            total_critical: totals.critical,
            total_warnings: totals.warning,
            total_info: totals.info,
            violations_by_category: group_by_category(&violations),
            violations_by_severity: group_by_severity(&violations),
            violations,
            deals,
        }
    }

    /// 整改计划：按负责人或分类重新分组，不做过滤
    pub fn get_remediation_plan(
        violations: &[DealViolation],
        group_by: GroupBy,
    ) -> BTreeMap<String, Vec<DealViolation>> {
        let mut grouped: BTreeMap<String, Vec<DealViolation>> = BTreeMap::new();
        for v in violations {
            let key = match group_by {
                GroupBy::Owner => v
                    .violation
                    .remediation_owner
                    .map_or("Unknown", |o| o.as_str()),
                GroupBy::Category => v.violation.category.as_str(),
            };
            grouped.entry(key.to_string()).or_default().push(v.clone());
        }
        grouped
    }

    /// 已加载规则摘要
    pub fn get_rules_summary(&self) -> RulesSummary {
        let mut by_category = BTreeMap::new();
        let mut by_severity = SeverityCounts::default();
        let mut by_scope = ScopeCounts::default();

        for rule in self.rules.iter() {
            *by_category.entry(rule.category).or_insert(0) += 1;
            by_severity.record(rule.severity);
            match rule.scope {
                RuleScope::Global => by_scope.global += 1,
                RuleScope::Org => by_scope.org += 1,
                RuleScope::User => by_scope.user += 1,
            }
        }

        RulesSummary {
            total_rules: self.rules.len(),
            by_category,
            by_severity,
            by_scope,
        }
    }
}

fn group_by_category(violations: &[DealViolation]) -> BTreeMap<RuleCategory, Vec<DealViolation>> {
    let mut grouped: BTreeMap<RuleCategory, Vec<DealViolation>> = BTreeMap::new();
    for v in violations {
        grouped
            .entry(v.violation.category)
            .or_default()
            .push(v.clone());
    }
    grouped
}

fn group_by_severity(violations: &[DealViolation]) -> ViolationsBySeverity {
    let mut grouped = ViolationsBySeverity::default();
    for v in violations {
        grouped.push(v.clone());
    }
    grouped
}

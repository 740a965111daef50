//! 规则来源合并
//!
//! 将全局规则、组织/用户覆盖配置和自定义规则合并为一个评估上下文的
//! 有效规则列表。合并本身是纯函数 [`merge_rules`]，[`RuleResolver`]
//! 只负责从仓储拉取数据。

use crate::error::Result;
use crate::models::{ConditionNode, GlobalRuleOverride, Rule, RuleScope, ScopeOwner};
use crate::store::RuleRepository;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 评估上下文的归属
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    pub user_id: Option<String>,
    pub org_id: Option<String>,
}

impl ResolutionContext {
    pub fn new(user_id: Option<String>, org_id: Option<String>) -> Self {
        Self { user_id, org_id }
    }

    /// 不带任何组织/用户的上下文，只使用全局规则
    pub fn global() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            org_id: None,
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn org_owner(&self) -> Option<ScopeOwner> {
        self.org_id.clone().map(ScopeOwner::Org)
    }

    pub fn user_owner(&self) -> Option<ScopeOwner> {
        self.user_id.clone().map(ScopeOwner::User)
    }
}

/// 某个上下文下从仓储取得的全部规则来源
#[derive(Debug, Clone, Default)]
pub struct ScopedRuleSources {
    pub org_overrides: Vec<GlobalRuleOverride>,
    pub user_overrides: Vec<GlobalRuleOverride>,
    pub org_custom_rules: Vec<Rule>,
    pub user_custom_rules: Vec<Rule>,
}

impl ScopedRuleSources {
    /// 查找生效的覆盖配置，用户级优先于组织级
    pub fn winning_override(&self, rule_id: &str) -> Option<&GlobalRuleOverride> {
        self.user_overrides
            .iter()
            .find(|o| o.global_rule_id == rule_id)
            .or_else(|| {
                self.org_overrides
                    .iter()
                    .find(|o| o.global_rule_id == rule_id)
            })
    }

    fn override_index(&self) -> HashMap<&str, &GlobalRuleOverride> {
        // 先插入组织级，再由用户级覆盖同一 ID
        self.org_overrides
            .iter()
            .chain(self.user_overrides.iter())
            .map(|o| (o.global_rule_id.as_str(), o))
            .collect()
    }
}

/// 合并有效规则列表
///
/// 顺序：全局规则（原始顺序，覆盖后的规则原位替换），然后是组织自定义规则，
/// 最后是用户自定义规则；自定义规则只取启用的，各自按优先级降序排列。
/// 全局规则本身不会被修改。
pub fn merge_rules(global_rules: &[Rule], sources: &ScopedRuleSources) -> Vec<Rule> {
    let overrides = sources.override_index();
    let mut effective = Vec::with_capacity(
        global_rules.len() + sources.org_custom_rules.len() + sources.user_custom_rules.len(),
    );

    for rule in global_rules {
        match overrides.get(rule.id.as_str()) {
            Some(ovr) => match ovr.apply(rule) {
                Some(rule) => effective.push(rule),
                None => debug!(rule_id = %rule.id, "全局规则已被覆盖配置禁用"),
            },
            None => effective.push(rule.clone()),
        }
    }

    effective.extend(enabled_by_priority(&sources.org_custom_rules));
    effective.extend(enabled_by_priority(&sources.user_custom_rules));
    effective
}

fn enabled_by_priority(rules: &[Rule]) -> Vec<Rule> {
    let mut enabled: Vec<Rule> = rules.iter().filter(|r| r.enabled).cloned().collect();
    enabled.sort_by_key(|r| Reverse(r.priority));
    enabled
}

/// 全局规则在某个上下文下的状态
///
/// `rule.enabled` 是应用覆盖配置后的启用状态，目录中的规则本身不受影响。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalRuleStatus {
    #[serde(flatten)]
    pub rule: Rule,
    pub is_overridden: bool,
    pub overridden_by: Option<RuleScope>,
    pub threshold_overrides: Option<Map<String, Value>>,
    /// 应用阈值覆盖后的条件，仅在存在覆盖配置时给出
    pub effective_condition: Option<ConditionNode>,
}

/// 全局规则状态视图
pub fn global_rule_status(
    global_rules: &[Rule],
    sources: &ScopedRuleSources,
) -> Vec<GlobalRuleStatus> {
    global_rules
        .iter()
        .map(|rule| {
            let ovr = sources.winning_override(&rule.id);
            let threshold_overrides = ovr.and_then(|o| o.threshold_overrides.clone());
            let effective_condition = ovr.map(|_| match &threshold_overrides {
                Some(t) if !t.is_empty() => rule.condition.with_threshold_overrides(t),
                _ => rule.condition.clone(),
            });

            let mut rule = rule.clone();
            rule.enabled = ovr.map_or(true, |o| o.enabled);

            GlobalRuleStatus {
                rule,
                is_overridden: ovr.is_some(),
                overridden_by: ovr.map(|o| {
                    if o.user_id.is_some() {
                        RuleScope::User
                    } else {
                        RuleScope::Org
                    }
                }),
                threshold_overrides,
                effective_condition,
            }
        })
        .collect()
}

/// 规则来源解析器
#[derive(Clone)]
pub struct RuleResolver {
    global_rules: Arc<Vec<Rule>>,
    repository: Arc<dyn RuleRepository>,
}

impl RuleResolver {
    pub fn new(global_rules: Vec<Rule>, repository: Arc<dyn RuleRepository>) -> Self {
        Self {
            global_rules: Arc::new(global_rules),
            repository,
        }
    }

    pub fn global_rules(&self) -> &[Rule] {
        &self.global_rules
    }

    /// 拉取上下文相关的覆盖配置和自定义规则
    #[instrument(skip(self))]
    pub async fn fetch_sources(&self, ctx: &ResolutionContext) -> Result<ScopedRuleSources> {
        let mut sources = ScopedRuleSources::default();

        if let Some(owner) = ctx.org_owner() {
            sources.org_overrides = self.repository.list_overrides(&owner).await?;
            sources.org_custom_rules = self.repository.list_custom_rules(&owner).await?;
        }

        if let Some(owner) = ctx.user_owner() {
            sources.user_overrides = self.repository.list_overrides(&owner).await?;
            sources.user_custom_rules = self.repository.list_custom_rules(&owner).await?;
        }

        Ok(sources)
    }

    /// 解析有效规则列表
    #[instrument(skip(self))]
    pub async fn resolve(&self, ctx: &ResolutionContext) -> Result<Vec<Rule>> {
        let sources = self.fetch_sources(ctx).await?;
        let rules = merge_rules(&self.global_rules, &sources);

        info!(
            global = self.global_rules.len(),
            overrides = sources.org_overrides.len() + sources.user_overrides.len(),
            effective = rules.len(),
            "有效规则列表已解析"
        );
        Ok(rules)
    }

    /// 全局规则状态视图
    #[instrument(skip(self))]
    pub async fn global_rule_status(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Vec<GlobalRuleStatus>> {
        let sources = self.fetch_sources(ctx).await?;
        Ok(global_rule_status(&self.global_rules, &sources))
    }
}

//! 规则仓储
//!
//! 覆盖配置和自定义规则的存取接口。引擎只依赖 `RuleRepository` trait，
//! 具体持久化方式由调用方决定；这里提供基于 DashMap 的内存实现，
//! 可从快照文件（JSON 或 YAML）初始化。

use crate::error::{Result, RuleError};
use crate::models::{GlobalRuleOverride, Rule, ScopeOwner};
use crate::validation::RuleValidator;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// 查询单条覆盖配置
    async fn get_override(
        &self,
        rule_id: &str,
        owner: &ScopeOwner,
    ) -> Result<Option<GlobalRuleOverride>>;

    /// 列出某个组织/用户的全部覆盖配置
    async fn list_overrides(&self, owner: &ScopeOwner) -> Result<Vec<GlobalRuleOverride>>;

    /// 列出某个组织/用户的自定义规则（包含已禁用的）
    async fn list_custom_rules(&self, owner: &ScopeOwner) -> Result<Vec<Rule>>;
}

/// 规则来源快照文件结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSourceSnapshot {
    #[serde(default)]
    pub overrides: Vec<GlobalRuleOverride>,
    #[serde(default)]
    pub custom_rules: Vec<Rule>,
}

type RuleKey = (ScopeOwner, String);

/// 内存规则仓储
#[derive(Clone, Default)]
pub struct InMemoryRuleRepository {
    overrides: Arc<DashMap<RuleKey, GlobalRuleOverride>>,
    custom_rules: Arc<DashMap<RuleKey, Rule>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从快照创建
    ///
    /// 覆盖配置按 `global_rules` 校验，规则 ID 不存在或阈值不合法时整体失败。
    pub fn from_snapshot(snapshot: RuleSourceSnapshot, global_rules: &[Rule]) -> Result<Self> {
        let repo = Self::new();
        for ovr in snapshot.overrides {
            repo.upsert_override(ovr, global_rules)?;
        }
        for rule in snapshot.custom_rules {
            repo.add_custom_rule(rule)?;
        }
        Ok(repo)
    }

    /// 从快照文件加载，`.yaml` / `.yml` 按 YAML 解析，其余按 JSON
    #[instrument(skip(global_rules))]
    pub fn from_path(path: &Path, global_rules: &[Rule]) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        let snapshot: RuleSourceSnapshot = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        let repo = Self::from_snapshot(snapshot, global_rules)?;
        info!(
            "规则来源快照已加载: {} 条覆盖配置, {} 条自定义规则",
            repo.overrides.len(),
            repo.custom_rules.len()
        );
        Ok(repo)
    }

    /// 导出快照
    pub fn snapshot(&self) -> RuleSourceSnapshot {
        let mut overrides: Vec<_> = self.overrides.iter().map(|e| e.value().clone()).collect();
        overrides.sort_by(|a, b| a.global_rule_id.cmp(&b.global_rule_id));

        let mut custom_rules: Vec<_> = self
            .custom_rules
            .iter()
            .map(|e| e.value().clone())
            .collect();
        custom_rules.sort_by(|a, b| a.id.cmp(&b.id));

        RuleSourceSnapshot {
            overrides,
            custom_rules,
        }
    }

    /// 创建或更新覆盖配置（按规则 ID + 归属定位）
    ///
    /// `global_rules` 为当前全局规则目录。被覆盖的规则必须存在，
    /// 应用阈值覆盖后的规则必须通过完整校验，否则拒绝写入。
    #[instrument(skip(self, ovr, global_rules), fields(rule_id = %ovr.global_rule_id))]
    pub fn upsert_override(&self, ovr: GlobalRuleOverride, global_rules: &[Rule]) -> Result<()> {
        let owner = ovr.owner()?;
        let Some(global) = global_rules.iter().find(|r| r.id == ovr.global_rule_id) else {
            warn!("覆盖的全局规则不存在");
            return Err(RuleError::RuleNotFound(ovr.global_rule_id));
        };

        // 已禁用的覆盖同样校验阈值，重新启用时不会带入非法值
        if let Some(overrides) = ovr.threshold_overrides.as_ref().filter(|o| !o.is_empty()) {
            let mut effective = global.clone();
            effective.condition = global.condition.with_threshold_overrides(overrides);
            RuleValidator::validate_rule(&effective)?;
        }
        let key = (owner.clone(), ovr.global_rule_id.clone());

        if self.overrides.insert(key, ovr).is_some() {
            info!("覆盖配置已更新: {}", owner);
        } else {
            info!("覆盖配置已创建: {}", owner);
        }
        Ok(())
    }

    /// 删除覆盖配置
    #[instrument(skip(self))]
    pub fn delete_override(&self, rule_id: &str, owner: &ScopeOwner) -> Result<()> {
        if self
            .overrides
            .remove(&(owner.clone(), rule_id.to_string()))
            .is_some()
        {
            info!("覆盖配置已删除");
            Ok(())
        } else {
            warn!("删除不存在的覆盖配置");
            Err(RuleError::OverrideNotFound {
                rule_id: rule_id.to_string(),
            })
        }
    }

    /// 新增自定义规则，同一归属下 ID 不能重复
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn add_custom_rule(&self, rule: Rule) -> Result<()> {
        let owner = Self::custom_rule_owner(&rule)?;
        RuleValidator::validate_rule(&rule)?;

        let key = (owner, rule.id.clone());
        if self.custom_rules.contains_key(&key) {
            warn!("自定义规则已存在: {}", rule.id);
            return Err(RuleError::DuplicateRule(rule.id));
        }

        self.custom_rules.insert(key, rule);
        info!("自定义规则已添加");
        Ok(())
    }

    /// 更新自定义规则
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn update_custom_rule(&self, rule: Rule) -> Result<()> {
        let owner = Self::custom_rule_owner(&rule)?;
        RuleValidator::validate_rule(&rule)?;

        match self.custom_rules.get_mut(&(owner, rule.id.clone())) {
            Some(mut existing) => {
                *existing = rule;
                info!("自定义规则已更新");
                Ok(())
            }
            None => {
                warn!("更新不存在的自定义规则: {}", rule.id);
                Err(RuleError::RuleNotFound(rule.id))
            }
        }
    }

    /// 删除自定义规则
    #[instrument(skip(self))]
    pub fn delete_custom_rule(&self, rule_id: &str, owner: &ScopeOwner) -> Result<()> {
        if self
            .custom_rules
            .remove(&(owner.clone(), rule_id.to_string()))
            .is_some()
        {
            info!("自定义规则已删除");
            Ok(())
        } else {
            warn!("删除不存在的自定义规则");
            Err(RuleError::RuleNotFound(rule_id.to_string()))
        }
    }

    fn custom_rule_owner(rule: &Rule) -> Result<ScopeOwner> {
        rule.owner().ok_or_else(|| RuleError::Validation {
            rule_id: rule.id.clone(),
            message: "自定义规则必须归属于组织或用户".to_string(),
        })
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn get_override(
        &self,
        rule_id: &str,
        owner: &ScopeOwner,
    ) -> Result<Option<GlobalRuleOverride>> {
        Ok(self
            .overrides
            .get(&(owner.clone(), rule_id.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn list_overrides(&self, owner: &ScopeOwner) -> Result<Vec<GlobalRuleOverride>> {
        let mut overrides: Vec<_> = self
            .overrides
            .iter()
            .filter(|e| &e.key().0 == owner)
            .map(|e| e.value().clone())
            .collect();
        overrides.sort_by(|a, b| a.global_rule_id.cmp(&b.global_rule_id));
        Ok(overrides)
    }

    async fn list_custom_rules(&self, owner: &ScopeOwner) -> Result<Vec<Rule>> {
        let mut rules: Vec<_> = self
            .custom_rules
            .iter()
            .filter(|e| &e.key().0 == owner)
            .map(|e| e.value().clone())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RuleCatalog;
    use crate::models::{ConditionNode, RuleCategory, Severity};
    use crate::operators::Operator;

    fn catalog() -> Vec<Rule> {
        RuleCatalog::builtin().unwrap().into_rules()
    }

    fn org() -> ScopeOwner {
        ScopeOwner::Org("org-1".to_string())
    }

    fn user() -> ScopeOwner {
        ScopeOwner::User("user-1".to_string())
    }

    fn custom_rule(id: &str, priority: i32, owner: &ScopeOwner) -> Rule {
        let mut rule = Rule::new(
            id,
            id,
            RuleCategory::Engagement,
            Severity::Info,
            ConditionNode::leaf("contact_email", Operator::IsEmpty),
        )
        .owned_by(owner);
        rule.priority = priority;
        rule
    }

    #[tokio::test]
    async fn test_upsert_override_replaces_existing() {
        let repo = InMemoryRuleRepository::new();
        repo.upsert_override(GlobalRuleOverride::new("SH3", &org()).with_threshold(45), &catalog())
            .unwrap();
        repo.upsert_override(GlobalRuleOverride::new("SH3", &org()).disabled(), &catalog())
            .unwrap();

        let overrides = repo.list_overrides(&org()).await.unwrap();
        assert_eq!(overrides.len(), 1);
        assert!(!overrides[0].enabled);

        assert!(repo.list_overrides(&user()).await.unwrap().is_empty());
        assert!(repo.get_override("SH3", &org()).await.unwrap().is_some());
        assert!(repo.get_override("SH3", &user()).await.unwrap().is_none());
    }

    #[test]
    fn test_override_requires_exactly_one_owner() {
        let repo = InMemoryRuleRepository::new();
        let mut ovr = GlobalRuleOverride::new("SH3", &org());
        ovr.user_id = Some("user-1".to_string());
        assert!(matches!(
            repo.upsert_override(ovr, &catalog()),
            Err(RuleError::Repository(_))
        ));
    }

    #[test]
    fn test_delete_override() {
        let repo = InMemoryRuleRepository::new();
        repo.upsert_override(GlobalRuleOverride::new("DQ1", &user()), &catalog())
            .unwrap();

        assert!(repo.delete_override("DQ1", &user()).is_ok());
        assert!(matches!(
            repo.delete_override("DQ1", &user()),
            Err(RuleError::OverrideNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_rules_sorted_by_priority() {
        let repo = InMemoryRuleRepository::new();
        repo.add_custom_rule(custom_rule("low", 1, &org())).unwrap();
        repo.add_custom_rule(custom_rule("high", 90, &org())).unwrap();
        repo.add_custom_rule(custom_rule("mine", 50, &user())).unwrap();

        let ids: Vec<_> = repo
            .list_custom_rules(&org())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn test_duplicate_custom_rule_rejected_per_owner() {
        let repo = InMemoryRuleRepository::new();
        repo.add_custom_rule(custom_rule("r1", 0, &org())).unwrap();
        assert!(matches!(
            repo.add_custom_rule(custom_rule("r1", 0, &org())),
            Err(RuleError::DuplicateRule(_))
        ));
        // 不同归属下可以使用相同 ID
        assert!(repo.add_custom_rule(custom_rule("r1", 0, &user())).is_ok());
    }

    #[test]
    fn test_custom_rule_must_have_owner() {
        let repo = InMemoryRuleRepository::new();
        let global = Rule::new(
            "g",
            "g",
            RuleCategory::Compliance,
            Severity::Info,
            ConditionNode::leaf("type", Operator::IsEmpty),
        );
        assert!(matches!(
            repo.add_custom_rule(global),
            Err(RuleError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_custom_rule() {
        let repo = InMemoryRuleRepository::new();
        assert!(matches!(
            repo.update_custom_rule(custom_rule("r1", 0, &org())),
            Err(RuleError::RuleNotFound(_))
        ));

        repo.add_custom_rule(custom_rule("r1", 0, &org())).unwrap();
        let mut updated = custom_rule("r1", 0, &org());
        updated.enabled = false;
        repo.update_custom_rule(updated).unwrap();
        assert!(!repo.list_custom_rules(&org()).await.unwrap()[0].enabled);

        repo.delete_custom_rule("r1", &org()).unwrap();
        assert!(repo.delete_custom_rule("r1", &org()).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_from_json_path() {
        let json = serde_json::json!({
            "overrides": [
                {"global_rule_id": "SH3", "org_id": "org-1", "threshold_overrides": {"value": 60}}
            ],
            "custom_rules": [{
                "id": "no_phone",
                "name": "No phone",
                "category": "ENGAGEMENT",
                "severity": "INFO",
                "condition": {"field": "contact_phone", "operator": "is_empty"},
                "message": "No phone",
                "scope": "user",
                "user_id": "user-1"
            }]
        });
        let path = std::env::temp_dir().join(format!("pipeline-sources-{}.json", std::process::id()));
        std::fs::write(&path, json.to_string()).unwrap();

        let repo = InMemoryRuleRepository::from_path(&path, &catalog()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(repo.list_overrides(&org()).await.unwrap().len(), 1);
        assert_eq!(repo.list_custom_rules(&user()).await.unwrap().len(), 1);

        let snapshot = repo.snapshot();
        assert_eq!(snapshot.overrides.len(), 1);
        assert_eq!(snapshot.custom_rules[0].id, "no_phone");
    }

    #[test]
    fn test_snapshot_restores_repository() {
        let repo = InMemoryRuleRepository::new();
        repo.upsert_override(GlobalRuleOverride::new("DQ2", &org()).disabled(), &catalog())
            .unwrap();
        repo.add_custom_rule(custom_rule("b_rule", 1, &user())).unwrap();
        repo.add_custom_rule(custom_rule("a_rule", 5, &org())).unwrap();

        let snapshot = repo.snapshot();
        assert_eq!(snapshot.overrides.len(), 1);
        let ids: Vec<_> = snapshot.custom_rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a_rule", "b_rule"]);

        let restored = InMemoryRuleRepository::from_snapshot(snapshot.clone(), &catalog()).unwrap();
        assert_eq!(restored.snapshot().custom_rules, snapshot.custom_rules);
        assert_eq!(restored.snapshot().overrides, snapshot.overrides);
    }

    #[test]
    fn test_override_of_unknown_rule_rejected() {
        let repo = InMemoryRuleRepository::new();
        assert!(matches!(
            repo.upsert_override(GlobalRuleOverride::new("NOPE", &org()), &catalog()),
            Err(RuleError::RuleNotFound(id)) if id == "NOPE"
        ));
        assert!(repo.snapshot().overrides.is_empty());
    }

    #[test]
    fn test_override_with_invalid_threshold_rejected() {
        let repo = InMemoryRuleRepository::new();

        // FC2 的第一个条件是 in，标量阈值会覆盖它的列表值
        let result = repo.upsert_override(
            GlobalRuleOverride::new("FC2", &org()).with_threshold(60),
            &catalog(),
        );
        assert!(matches!(result, Err(RuleError::Validation { ref rule_id, .. }) if rule_id == "FC2"));

        let disabled = GlobalRuleOverride::new("FC2", &org()).with_threshold(60).disabled();
        assert!(repo.upsert_override(disabled, &catalog()).is_err());
        assert!(repo.snapshot().overrides.is_empty());

        // 数值阈值覆盖到数值条件上是合法的
        repo.upsert_override(
            GlobalRuleOverride::new("SH3", &org()).with_threshold(60),
            &catalog(),
        )
        .unwrap();
    }

    #[test]
    fn test_snapshot_with_unknown_override_fails() {
        let snapshot = RuleSourceSnapshot {
            overrides: vec![GlobalRuleOverride::new("GONE", &user())],
            custom_rules: Vec::new(),
        };
        assert!(matches!(
            InMemoryRuleRepository::from_snapshot(snapshot, &catalog()),
            Err(RuleError::RuleNotFound(_))
        ));
    }
}

//! 规则引擎领域模型

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// 仅对未关闭商机生效的阶段哨兵值
pub const ALL_EXCEPT_CLOSED: &str = "all_except_closed";

/// 视为已关闭的阶段（不区分大小写）
pub const CLOSED_STAGES: [&str; 4] = ["closed won", "closed lost", "closed-won", "closed-lost"];

/// 规则分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    DataQuality,
    SalesHygiene,
    Forecasting,
    Progression,
    Engagement,
    Compliance,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 6] = [
        Self::DataQuality,
        Self::SalesHygiene,
        Self::Forecasting,
        Self::Progression,
        Self::Engagement,
        Self::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataQuality => "DATA_QUALITY",
            Self::SalesHygiene => "SALES_HYGIENE",
            Self::Forecasting => "FORECASTING",
            Self::Progression => "PROGRESSION",
            Self::Engagement => "ENGAGEMENT",
            Self::Compliance => "COMPLIANCE",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重级别
///
/// 排序使用显式序号（CRITICAL=0, WARNING=1, INFO=2），严重的排在前面。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Self::Critical, Self::Warning, Self::Info];

    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Warning => 1,
            Self::Info => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 整改负责人
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemediationOwner {
    Rep,
    Manager,
    Auto,
}

impl RemediationOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rep => "Rep",
            Self::Manager => "Manager",
            Self::Auto => "Auto",
        }
    }
}

/// 规则来源层级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    #[default]
    Global,
    Org,
    User,
}

impl RuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Org => "org",
            Self::User => "user",
        }
    }
}

/// 覆盖配置和自定义规则的归属（组织或用户，二选一）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeOwner {
    Org(String),
    User(String),
}

impl ScopeOwner {
    pub fn scope(&self) -> RuleScope {
        match self {
            Self::Org(_) => RuleScope::Org,
            Self::User(_) => RuleScope::User,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Org(id) | Self::User(id) => id,
        }
    }

    /// 由 user_id / org_id 组合解析归属，必须且只能指定一个
    pub fn from_ids(user_id: Option<&str>, org_id: Option<&str>) -> Result<Self> {
        match (user_id, org_id) {
            (Some(user), None) => Ok(Self::User(user.to_string())),
            (None, Some(org)) => Ok(Self::Org(org.to_string())),
            (Some(_), Some(_)) => Err(RuleError::Repository(
                "user_id 与 org_id 只能指定一个".to_string(),
            )),
            (None, None) => Err(RuleError::Repository(
                "必须指定 user_id 或 org_id".to_string(),
            )),
        }
    }
}

impl fmt::Display for ScopeOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope().as_str(), self.id())
    }
}

/// 叶子条件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// 条件树
///
/// 叶子条件或 `all` / `any` 逻辑组合，可任意嵌套。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawCondition")]
pub enum ConditionNode {
    Leaf(Condition),
    All(Vec<ConditionNode>),
    Any(Vec<ConditionNode>),
}

impl ConditionNode {
    pub fn leaf(field: impl Into<String>, operator: Operator) -> Self {
        Self::Leaf(Condition::new(field, operator))
    }

    pub fn leaf_with_value(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self::Leaf(Condition::new(field, operator).with_value(value))
    }

    /// 第一个叶子条件（`all` / `any` 取首个子节点递归）
    pub fn primary_leaf(&self) -> Option<&Condition> {
        match self {
            Self::Leaf(cond) => Some(cond),
            Self::All(children) | Self::Any(children) => {
                children.first().and_then(ConditionNode::primary_leaf)
            }
        }
    }

    /// 按深度优先顺序收集全部叶子条件
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Condition>) {
        match self {
            Self::Leaf(cond) => leaves.push(cond),
            Self::All(children) | Self::Any(children) => {
                for child in children {
                    child.collect_leaves(leaves);
                }
            }
        }
    }

    /// 应用阈值覆盖，返回新的条件树
    ///
    /// 只替换已有 `value` 的叶子，不会为没有阈值的叶子补充新值。
    pub fn with_threshold_overrides(&self, overrides: &Map<String, Value>) -> ConditionNode {
        match self {
            Self::Leaf(cond) => {
                let mut cond = cond.clone();
                if cond.value.is_some() {
                    if let Some(replacement) = overrides.get("value") {
                        cond.value = Some(replacement.clone());
                    }
                }
                Self::Leaf(cond)
            }
            Self::All(children) => Self::All(
                children
                    .iter()
                    .map(|c| c.with_threshold_overrides(overrides))
                    .collect(),
            ),
            Self::Any(children) => Self::Any(
                children
                    .iter()
                    .map(|c| c.with_threshold_overrides(overrides))
                    .collect(),
            ),
        }
    }
}

impl Serialize for ConditionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Leaf(cond) => cond.serialize(serializer),
            Self::All(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("all", children)?;
                map.end()
            }
            Self::Any(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("any", children)?;
                map.end()
            }
        }
    }
}

/// 条件树的原始形态，反序列化后再转换为强类型
#[derive(Deserialize)]
struct RawCondition {
    #[serde(default)]
    all: Option<Vec<ConditionNode>>,
    #[serde(default)]
    any: Option<Vec<ConditionNode>>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

impl TryFrom<RawCondition> for ConditionNode {
    type Error = RuleError;

    fn try_from(raw: RawCondition) -> Result<Self> {
        if let Some(children) = raw.all {
            return Ok(Self::All(children));
        }
        if let Some(children) = raw.any {
            return Ok(Self::Any(children));
        }

        let (field, operator) = match (raw.field, raw.operator) {
            (Some(field), Some(operator)) if !field.is_empty() && !operator.is_empty() => {
                (field, operator)
            }
            (field, operator) => {
                return Err(RuleError::InvalidCondition(format!(
                    "条件必须包含 'field' 和 'operator' (field={:?}, operator={:?})",
                    field, operator
                )));
            }
        };

        Ok(Self::Leaf(Condition {
            field,
            operator: operator.parse()?,
            value: raw.value,
        }))
    }
}

fn default_enabled() -> bool {
    true
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub condition: ConditionNode,
    pub message: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub remediation_owner: Option<RemediationOwner>,
    #[serde(default)]
    pub automatable: bool,
    #[serde(default)]
    pub applicable_stages: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Rule {
    /// 创建全局规则（其余字段取默认值）
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: RuleCategory,
        severity: Severity,
        condition: ConditionNode,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            message: name.clone(),
            name,
            description: String::new(),
            category,
            severity,
            condition,
            remediation: String::new(),
            remediation_owner: None,
            automatable: false,
            applicable_stages: Vec::new(),
            priority: 0,
            enabled: true,
            scope: RuleScope::Global,
            org_id: None,
            user_id: None,
        }
    }

    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applicable_stages = stages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_remediation(mut self, action: impl Into<String>, owner: RemediationOwner) -> Self {
        self.remediation = action.into();
        self.remediation_owner = Some(owner);
        self
    }

    /// 将规则归属到指定组织或用户
    pub fn owned_by(mut self, owner: &ScopeOwner) -> Self {
        self.scope = owner.scope();
        match owner {
            ScopeOwner::Org(id) => {
                self.org_id = Some(id.clone());
                self.user_id = None;
            }
            ScopeOwner::User(id) => {
                self.user_id = Some(id.clone());
                self.org_id = None;
            }
        }
        self
    }

    /// 规则归属（全局规则返回 None）
    pub fn owner(&self) -> Option<ScopeOwner> {
        match self.scope {
            RuleScope::Global => None,
            RuleScope::Org => self.org_id.clone().map(ScopeOwner::Org),
            RuleScope::User => self.user_id.clone().map(ScopeOwner::User),
        }
    }

    /// 阶段适用性判断
    ///
    /// - 未配置阶段：适用于所有阶段
    /// - 包含 `all_except_closed`：除已关闭阶段外都适用
    /// - 否则：阶段字符串必须精确出现在列表中
    pub fn applies_to_stage(&self, stage: &str) -> bool {
        if self.applicable_stages.is_empty() {
            return true;
        }

        if self
            .applicable_stages
            .iter()
            .any(|s| s == ALL_EXCEPT_CLOSED)
        {
            return !is_closed_stage(stage);
        }

        self.applicable_stages.iter().any(|s| s == stage)
    }
}

/// 阶段是否为已关闭（赢单或输单）
pub fn is_closed_stage(stage: &str) -> bool {
    let stage = stage.to_lowercase();
    CLOSED_STAGES.contains(&stage.as_str())
}

/// 全局规则覆盖配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRuleOverride {
    pub global_rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_overrides: Option<Map<String, Value>>,
}

impl GlobalRuleOverride {
    pub fn new(global_rule_id: impl Into<String>, owner: &ScopeOwner) -> Self {
        let (user_id, org_id) = match owner {
            ScopeOwner::User(id) => (Some(id.clone()), None),
            ScopeOwner::Org(id) => (None, Some(id.clone())),
        };
        Self {
            global_rule_id: global_rule_id.into(),
            user_id,
            org_id,
            enabled: true,
            threshold_overrides: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 设置阈值覆盖（`{"value": <新阈值>}`）
    pub fn with_threshold(mut self, value: impl Into<Value>) -> Self {
        let mut overrides = Map::new();
        overrides.insert("value".to_string(), value.into());
        self.threshold_overrides = Some(overrides);
        self
    }

    pub fn owner(&self) -> Result<ScopeOwner> {
        ScopeOwner::from_ids(self.user_id.as_deref(), self.org_id.as_deref())
    }

    /// 将覆盖应用到全局规则上，返回新规则；覆盖禁用时返回 None
    ///
    /// 原始全局规则不会被修改。
    pub fn apply(&self, rule: &Rule) -> Option<Rule> {
        if !self.enabled {
            return None;
        }

        match &self.threshold_overrides {
            Some(overrides) if !overrides.is_empty() => {
                let mut effective = rule.clone();
                effective.condition = rule.condition.with_threshold_overrides(overrides);
                Some(effective)
            }
            _ => Some(rule.clone()),
        }
    }
}

/// 规则违规记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub rule_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub message: String,
    pub field_name: Option<String>,
    pub current_value: Option<String>,
    pub expected_value: Option<String>,
    pub remediation_action: String,
    pub remediation_owner: Option<RemediationOwner>,
    pub automatable: bool,
}

/// 附带商机标识的违规记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealViolation {
    pub deal_id: Option<String>,
    pub deal_name: Option<String>,
    #[serde(flatten)]
    pub violation: Violation,
}

/// 值的展示字符串：列表以 ", " 拼接，null 返回 None
pub fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| display_value(v).unwrap_or_else(|| "null".to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}

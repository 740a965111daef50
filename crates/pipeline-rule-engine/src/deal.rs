//! 商机记录与评估上下文

use crate::error::{Result, RuleError};
use crate::operators::type_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 商机记录
///
/// 扁平的字段映射，字段名可能是 snake_case（规范形式）或 camelCase。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deal {
    fields: Map<String, Value>,
}

impl Deal {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// 从 JSON 值创建，必须是对象
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(RuleError::type_mismatch("object", type_name(&other))),
        }
    }

    /// 获取字段值
    ///
    /// 先按字面名称查找，找不到（或为 null）且名称含下划线时再尝试 camelCase 形式。
    /// null 值统一视为缺失。
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        let literal = self.fields.get(name).filter(|v| !v.is_null());
        if literal.is_some() || !name.contains('_') {
            return literal;
        }

        self.fields
            .get(&snake_to_camel(name))
            .filter(|v| !v.is_null())
    }

    /// 阶段（强制转为字符串，缺失时为空字符串）
    pub fn stage(&self) -> String {
        match self.get_field("stage") {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// 商机 ID，依次尝试 `deal_id`、`id`、`external_id`
    pub fn deal_id(&self) -> Option<String> {
        self.first_present(&["deal_id", "id", "external_id"])
    }

    /// 商机名称，依次尝试 `deal_name`、`name`
    pub fn deal_name(&self) -> Option<String> {
        self.first_present(&["deal_name", "name"])
    }

    fn first_present(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| self.fields.get(*key))
            .find_map(|value| match value {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl From<Map<String, Value>> for Deal {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

/// snake_case 转 camelCase：首个单词保持不变，其余单词首字母大写
pub fn snake_to_camel(name: &str) -> String {
    name.split('_')
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// 评估上下文
///
/// 一次批量分析中所有日期相关操作符共享同一个时间点，保证结果可复现。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationContext {
    now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// 以当前时间创建
    pub fn current() -> Self {
        Self::new(Utc::now())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::current()
    }
}

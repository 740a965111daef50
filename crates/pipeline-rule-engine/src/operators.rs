//! 规则操作符定义
//!
//! 每个操作符都是纯函数 `(字段值, [阈值]) -> bool`。
//! 无法解析的日期和数值不会抛出错误，而是返回各操作符约定的安全默认值（通常为 false）。

use crate::error::{Result, RuleError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 空值检查
    IsEmpty,
    IsNullOrZero,

    // 日期操作
    IsPast,
    OlderThanDays,
    WithinDays,
    MoreThanDaysAway,

    // 数值比较
    GreaterThan,
    LessThan,

    // 通用比较
    Equals,
    In,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Self::IsEmpty,
        Self::IsNullOrZero,
        Self::IsPast,
        Self::OlderThanDays,
        Self::WithinDays,
        Self::MoreThanDaysAway,
        Self::GreaterThan,
        Self::LessThan,
        Self::Equals,
        Self::In,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsEmpty => "is_empty",
            Self::IsNullOrZero => "is_null_or_zero",
            Self::IsPast => "is_past",
            Self::OlderThanDays => "older_than_days",
            Self::WithinDays => "within_days",
            Self::MoreThanDaysAway => "more_than_days_away",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Equals => "equals",
            Self::In => "in",
        }
    }

    /// 是否需要阈值参数
    pub fn requires_threshold(&self) -> bool {
        !matches!(self, Self::IsEmpty | Self::IsNullOrZero | Self::IsPast)
    }

    /// 评估操作符
    ///
    /// # Arguments
    /// * `value` - 商机记录中的字段值（字段缺失时为 None）
    /// * `threshold` - 条件中的 `value`
    /// * `now` - 本次评估使用的统一时间点
    pub fn evaluate(
        &self,
        value: Option<&Value>,
        threshold: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let required = || {
            threshold.ok_or_else(|| RuleError::MissingThreshold {
                operator: self.to_string(),
            })
        };

        match self {
            Self::IsEmpty => Ok(is_empty(value)),
            Self::IsNullOrZero => Ok(is_null_or_zero(value)),
            Self::IsPast => Ok(is_past(value, now)),
            Self::OlderThanDays => older_than_days(value, required()?, now),
            Self::WithinDays => within_days(value, required()?, now),
            Self::MoreThanDaysAway => more_than_days_away(value, required()?, now),
            Self::GreaterThan => Ok(greater_than(value, required()?)),
            Self::LessThan => Ok(less_than(value, required()?)),
            Self::Equals => Ok(equals(value, required()?)),
            Self::In => in_list(value, required()?),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| RuleError::UnknownOperator(s.to_string()))
    }
}

/// 按名称评估操作符，未知名称立即返回配置错误
pub fn evaluate_operator(
    operator: &str,
    value: Option<&Value>,
    threshold: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<bool> {
    operator.parse::<Operator>()?.evaluate(value, threshold, now)
}

/// 字段为 null、空字符串或仅包含空白
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// 字段为 null 或数值等于 0
pub fn is_null_or_zero(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// 日期早于今天
pub fn is_past(value: Option<&Value>, now: DateTime<Utc>) -> bool {
    parse_value_datetime(value)
        .map(|dt| dt.date_naive() < now.date_naive())
        .unwrap_or(false)
}

/// 日期早于 N 天前
pub fn older_than_days(value: Option<&Value>, days: &Value, now: DateTime<Utc>) -> Result<bool> {
    let limit = now.checked_sub_signed(threshold_days(days)?);
    Ok(parse_value_datetime(value)
        .zip(limit)
        .is_some_and(|(dt, limit)| dt < limit))
}

/// 日期落在未来 N 天以内（含边界）
pub fn within_days(value: Option<&Value>, days: &Value, now: DateTime<Utc>) -> Result<bool> {
    let limit = now.checked_add_signed(threshold_days(days)?);
    Ok(parse_value_datetime(value)
        .zip(limit)
        .is_some_and(|(dt, limit)| now <= dt && dt <= limit))
}

/// 日期在 N 天之后
pub fn more_than_days_away(
    value: Option<&Value>,
    days: &Value,
    now: DateTime<Utc>,
) -> Result<bool> {
    let limit = now.checked_add_signed(threshold_days(days)?);
    Ok(parse_value_datetime(value)
        .zip(limit)
        .is_some_and(|(dt, limit)| dt > limit))
}

/// 数值大于阈值
pub fn greater_than(value: Option<&Value>, threshold: &Value) -> bool {
    compare_numbers(value, threshold, |a, b| a > b)
}

/// 数值小于阈值
pub fn less_than(value: Option<&Value>, threshold: &Value) -> bool {
    compare_numbers(value, threshold, |a, b| a < b)
}

/// 相等比较
///
/// 两边都是字符串时忽略大小写并去除首尾空白；两边都为 null 视为相等。
pub fn equals(value: Option<&Value>, target: &Value) -> bool {
    let value = value.unwrap_or(&Value::Null);
    match (value, target) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => normalize(a) == normalize(b),
        (a, b) => loose_eq(a, b),
    }
}

/// 列表包含检查（字符串忽略大小写）
pub fn in_list(value: Option<&Value>, values: &Value) -> Result<bool> {
    let values = values
        .as_array()
        .ok_or_else(|| RuleError::type_mismatch("array", type_name(values)))?;

    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::String(s)) => {
            let needle = normalize(s);
            Ok(values
                .iter()
                .filter_map(Value::as_str)
                .any(|v| normalize(v) == needle))
        }
        Some(other) => Ok(values.iter().any(|v| loose_eq(other, v))),
    }
}

fn compare_numbers<F>(value: Option<&Value>, threshold: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (value.and_then(as_number), as_number(threshold)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// 数值统一转为浮点数比较，避免 100 与 100.0 不相等
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// 尝试将 Value 转换为 f64
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn threshold_days(days: &Value) -> Result<TimeDelta> {
    match days {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|d| d.is_finite())
    .and_then(|d| TimeDelta::try_milliseconds((d * 86_400_000.0) as i64))
    .ok_or_else(|| RuleError::type_mismatch("number of days", type_name(days)))
}

fn parse_value_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value.and_then(Value::as_str).and_then(parse_datetime)
}

/// 解析日期时间
///
/// 支持 RFC 3339（含时区或 `Z`）、不含时区的 ISO 日期时间（按 UTC 处理）以及纯日期。
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn days_from_now(days: i64) -> Value {
        json!((now() + Duration::days(days)).to_rfc3339())
    }

    #[test]
    fn test_operator_names_round_trip() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
        assert_eq!(
            serde_json::to_value(Operator::MoreThanDaysAway).unwrap(),
            json!("more_than_days_away")
        );
    }

    #[test]
    fn test_unknown_operator_is_fatal() {
        let err = evaluate_operator("between", Some(&json!(1)), Some(&json!(2)), now()).unwrap_err();
        assert!(matches!(err, RuleError::UnknownOperator(ref name) if name == "between"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_missing_threshold_is_fatal() {
        let err = Operator::GreaterThan
            .evaluate(Some(&json!(10)), None, now())
            .unwrap_err();
        assert!(matches!(err, RuleError::MissingThreshold { .. }));

        // 无需阈值的操作符不受影响
        assert!(Operator::IsEmpty.evaluate(None, None, now()).unwrap());
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(None));
        assert!(is_empty(Some(&json!(null))));
        assert!(is_empty(Some(&json!(""))));
        assert!(is_empty(Some(&json!("   \t"))));
        assert!(!is_empty(Some(&json!("Acme"))));
        assert!(!is_empty(Some(&json!(0))));
    }

    #[test]
    fn test_is_null_or_zero() {
        assert!(is_null_or_zero(None));
        assert!(is_null_or_zero(Some(&json!(null))));
        assert!(is_null_or_zero(Some(&json!(0))));
        assert!(is_null_or_zero(Some(&json!(0.0))));
        assert!(!is_null_or_zero(Some(&json!(1500))));
        assert!(!is_null_or_zero(Some(&json!("0"))));
    }

    #[test]
    fn test_is_past() {
        assert!(is_past(Some(&days_from_now(-1)), now()));
        assert!(is_past(Some(&json!("2024-06-14")), now()));
        // 同一天不算过去
        assert!(!is_past(Some(&json!("2024-06-15T00:00:01Z")), now()));
        assert!(!is_past(Some(&days_from_now(3)), now()));
        assert!(!is_past(None, now()));
        assert!(!is_past(Some(&json!("not a date")), now()));
        assert!(!is_past(Some(&json!(20240101)), now()));
    }

    #[test]
    fn test_older_than_days() {
        let thirty = json!(30);
        assert!(older_than_days(Some(&days_from_now(-45)), &thirty, now()).unwrap());
        assert!(!older_than_days(Some(&days_from_now(-10)), &thirty, now()).unwrap());
        assert!(!older_than_days(None, &thirty, now()).unwrap());
        assert!(!older_than_days(Some(&json!("garbage")), &thirty, now()).unwrap());
    }

    #[test]
    fn test_within_days() {
        let seven = json!(7);
        assert!(within_days(Some(&days_from_now(3)), &seven, now()).unwrap());
        assert!(within_days(Some(&days_from_now(7)), &seven, now()).unwrap());
        assert!(!within_days(Some(&days_from_now(8)), &seven, now()).unwrap());
        assert!(!within_days(Some(&days_from_now(-1)), &seven, now()).unwrap());
    }

    #[test]
    fn test_more_than_days_away() {
        let sixty = json!(60);
        assert!(more_than_days_away(Some(&days_from_now(90)), &sixty, now()).unwrap());
        assert!(!more_than_days_away(Some(&days_from_now(30)), &sixty, now()).unwrap());
        assert!(!more_than_days_away(None, &sixty, now()).unwrap());
    }

    #[test]
    fn test_non_numeric_days_threshold_is_type_mismatch() {
        let err = older_than_days(Some(&days_from_now(-45)), &json!("soon"), now()).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(greater_than(Some(&json!(150000)), &json!(100000)));
        assert!(greater_than(Some(&json!("250000.50")), &json!(100000)));
        assert!(!greater_than(Some(&json!(100000)), &json!(100000)));
        assert!(!greater_than(None, &json!(0)));
        assert!(!greater_than(Some(&json!("n/a")), &json!(0)));

        assert!(less_than(Some(&json!(10)), &json!(50)));
        assert!(!less_than(Some(&json!(null)), &json!(50)));
    }

    #[test]
    fn test_equals() {
        assert!(equals(Some(&json!("  Closed Won ")), &json!("closed won")));
        assert!(equals(Some(&json!(100)), &json!(100.0)));
        assert!(equals(None, &json!(null)));
        assert!(!equals(None, &json!("x")));
        assert!(!equals(Some(&json!("5")), &json!(5)));
    }

    #[test]
    fn test_in_list() {
        let stages = json!(["Proposal", "Negotiation"]);
        assert!(in_list(Some(&json!("negotiation")), &stages).unwrap());
        assert!(!in_list(Some(&json!("Discovery")), &stages).unwrap());
        assert!(!in_list(None, &stages).unwrap());
        assert!(in_list(Some(&json!(2)), &json!([1, 2, 3])).unwrap());
        assert!(in_list(Some(&json!("a")), &json!("abc")).is_err());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2024-01-15T10:00:00Z").is_some());
        assert!(parse_datetime("2024-01-15T10:00:00+08:00").is_some());
        assert!(parse_datetime("2024-01-15T10:00:00.123").is_some());
        assert!(parse_datetime("2024-01-15 10:00:00").is_some());
        assert!(parse_datetime("2024-01-15").is_some());
        assert!(parse_datetime("15/01/2024").is_none());
        assert!(parse_datetime("").is_none());
    }
}

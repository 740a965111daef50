//! 规则编写元数据
//!
//! 规则编辑器需要的操作符、常用字段、分类、严重级别和标准阶段列表。

use crate::models::{RuleCategory, Severity};
use crate::operators::Operator;
use serde::Serialize;

/// 标准销售阶段
pub const STANDARD_STAGES: [&str; 8] = [
    "Prospecting",
    "Qualification",
    "Discovery",
    "Proposal",
    "Negotiation",
    "Verbal Commit",
    "Closed Won",
    "Closed Lost",
];

/// 操作符说明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub requires_value: bool,
    pub value_type: Option<&'static str>,
    pub example: &'static str,
}

impl OperatorInfo {
    pub fn for_operator(op: Operator) -> Self {
        let (description, value_type, example) = match op {
            Operator::IsEmpty => (
                "Field is null, empty string, or whitespace only",
                None,
                "deal_name is_empty",
            ),
            Operator::IsNullOrZero => (
                "Field is null or equals zero",
                None,
                "amount is_null_or_zero",
            ),
            Operator::IsPast => ("Date is before today", Some("date"), "close_date is_past"),
            Operator::OlderThanDays => (
                "Date is more than N days ago",
                Some("number"),
                "last_activity_date older_than_days 30",
            ),
            Operator::WithinDays => (
                "Date is within the next N days",
                Some("number"),
                "close_date within_days 30",
            ),
            Operator::MoreThanDaysAway => (
                "Date is more than N days in the future",
                Some("number"),
                "close_date more_than_days_away 60",
            ),
            Operator::GreaterThan => (
                "Numeric value is greater than N",
                Some("number"),
                "amount greater_than 100000",
            ),
            Operator::LessThan => (
                "Numeric value is less than N",
                Some("number"),
                "probability less_than 50",
            ),
            Operator::Equals => (
                "Value equals specified value (case-insensitive for text)",
                Some("string"),
                "stage equals 'Discovery'",
            ),
            Operator::In => (
                "Value is in list of specified values",
                Some("list"),
                "stage in ['Proposal', 'Negotiation']",
            ),
        };

        Self {
            name: op.as_str(),
            description,
            requires_value: op.requires_threshold(),
            value_type,
            example,
        }
    }
}

/// 常用商机字段说明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub data_type: &'static str,
    pub description: &'static str,
    pub common_operators: Vec<Operator>,
}

impl FieldInfo {
    fn new(
        name: &'static str,
        display_name: &'static str,
        data_type: &'static str,
        description: &'static str,
        common_operators: &[Operator],
    ) -> Self {
        Self {
            name,
            display_name,
            data_type,
            description,
            common_operators: common_operators.to_vec(),
        }
    }
}

/// 内置规则引用的常用字段
pub fn well_known_fields() -> Vec<FieldInfo> {
    use Operator::*;

    vec![
        FieldInfo::new("name", "Deal Name", "string", "The name of the deal/opportunity", &[IsEmpty, Equals]),
        FieldInfo::new("account_name", "Account Name", "string", "The associated company/account name", &[IsEmpty, Equals]),
        FieldInfo::new("amount", "Amount", "currency", "Deal value in currency", &[IsNullOrZero, GreaterThan, LessThan]),
        FieldInfo::new("stage", "Stage", "string", "Current pipeline stage", &[IsEmpty, Equals, In]),
        FieldInfo::new("close_date", "Close Date", "date", "Expected close date", &[IsEmpty, IsPast, WithinDays, MoreThanDaysAway]),
        FieldInfo::new("probability", "Probability", "number", "Win probability percentage (0-100)", &[GreaterThan, LessThan]),
        FieldInfo::new("owner_name", "Owner Name", "string", "Deal owner/rep name", &[IsEmpty, Equals]),
        FieldInfo::new("contact_name", "Contact Name", "string", "Primary contact name", &[IsEmpty]),
        FieldInfo::new("contact_email", "Contact Email", "string", "Primary contact email", &[IsEmpty]),
        FieldInfo::new("contact_phone", "Contact Phone", "string", "Primary contact phone", &[IsEmpty]),
        FieldInfo::new("last_activity_date", "Last Activity Date", "date", "Date of last recorded activity", &[IsEmpty, OlderThanDays]),
        FieldInfo::new("created_date", "Created Date", "date", "When the deal was created", &[OlderThanDays, WithinDays]),
        FieldInfo::new("next_steps", "Next Steps", "string", "Documented next steps", &[IsEmpty]),
        FieldInfo::new("forecast_category", "Forecast Category", "string", "Forecast category (Pipeline, Best Case, Commit)", &[IsEmpty, Equals, In]),
        FieldInfo::new("type", "Deal Type", "string", "Type of deal (New Business, Renewal, Upsell)", &[IsEmpty, Equals, In]),
    ]
}

/// 规则编写元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMetadata {
    pub operators: Vec<OperatorInfo>,
    pub fields: Vec<FieldInfo>,
    pub categories: Vec<RuleCategory>,
    pub severities: Vec<Severity>,
    pub stages: Vec<&'static str>,
}

impl RuleMetadata {
    pub fn build() -> Self {
        Self {
            operators: Operator::ALL.into_iter().map(OperatorInfo::for_operator).collect(),
            fields: well_known_fields(),
            categories: RuleCategory::ALL.to_vec(),
            severities: Severity::ALL.to_vec(),
            stages: STANDARD_STAGES.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_covers_every_operator() {
        let meta = RuleMetadata::build();
        assert_eq!(meta.operators.len(), Operator::ALL.len());

        let is_past = meta.operators.iter().find(|o| o.name == "is_past").unwrap();
        assert!(!is_past.requires_value);
        let within = meta.operators.iter().find(|o| o.name == "within_days").unwrap();
        assert!(within.requires_value);
        assert_eq!(within.value_type, Some("number"));
    }

    #[test]
    fn test_metadata_serialization() {
        let json = serde_json::to_value(RuleMetadata::build()).unwrap();
        assert_eq!(json["categories"][0], "DATA_QUALITY");
        assert_eq!(json["severities"][2], "INFO");
        assert_eq!(json["stages"][5], "Verbal Commit");

        let amount = json["fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "amount")
            .unwrap();
        assert_eq!(amount["common_operators"][0], "is_null_or_zero");
    }
}

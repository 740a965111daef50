//! 规则引擎错误类型
//!
//! 错误分为两类：
//! - 配置错误（规则定义本身有问题），在加载或首次评估时立即失败
//! - 单条规则对单个商机的评估错误，由执行器捕获并记为"无违规"

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("未知的操作符: {0}")]
    UnknownOperator(String),

    #[error("操作符 '{operator}' 需要阈值")]
    MissingThreshold { operator: String },

    #[error("无效的条件: {0}")]
    InvalidCondition(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("规则校验失败 [{rule_id}]: {message}")]
    Validation { rule_id: String, message: String },

    #[error("规则 ID 重复: {0}")]
    DuplicateRule(String),

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("覆盖配置未找到: rule_id={rule_id}")]
    OverrideNotFound { rule_id: String },

    #[error("无效的分组方式: {0}")]
    InvalidGroupBy(String),

    #[error("规则仓储错误: {0}")]
    Repository(String),

    #[error("YAML 解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownOperator(_) => "UNKNOWN_OPERATOR",
            Self::MissingThreshold { .. } => "MISSING_THRESHOLD",
            Self::InvalidCondition(_) => "INVALID_CONDITION",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::DuplicateRule(_) => "DUPLICATE_RULE",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::OverrideNotFound { .. } => "OVERRIDE_NOT_FOUND",
            Self::InvalidGroupBy(_) => "INVALID_GROUP_BY",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::YamlError(_) => "YAML_ERROR",
            Self::JsonError(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// 是否为规则配置错误
    ///
    /// 配置错误意味着规则定义已损坏，不能被静默吸收。
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperator(_)
                | Self::MissingThreshold { .. }
                | Self::InvalidCondition(_)
                | Self::Validation { .. }
                | Self::DuplicateRule(_)
        )
    }

    pub(crate) fn type_mismatch(expected: &str, actual: &str) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = RuleError::UnknownOperator("between".to_string());
        assert_eq!(err.code(), "UNKNOWN_OPERATOR");
        assert!(err.to_string().contains("between"));
    }

    #[test]
    fn test_configuration_error_classification() {
        assert!(RuleError::MissingThreshold {
            operator: "greater_than".to_string()
        }
        .is_configuration_error());
        assert!(RuleError::InvalidCondition("missing field".to_string()).is_configuration_error());

        assert!(!RuleError::type_mismatch("number", "string").is_configuration_error());
        assert!(!RuleError::RuleNotFound("r1".to_string()).is_configuration_error());
    }
}

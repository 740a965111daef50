//! 统一可观测性模块
//!
//! 提供日志和指标的统一初始化。命令行批处理任务没有常驻 HTTP 端口，
//! 指标在任务结束时以 Prometheus 文本格式写入文件，供 node_exporter
//! 的 textfile collector 采集。

pub mod metrics;
pub mod tracing;

use ::tracing::{info, warn};
use anyhow::Result;

pub use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// Drop 时将指标快照写入文件。
pub struct ObservabilityGuard {
    metrics_handle: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            metrics_handle: None,
        }
    }

    /// 立即写出指标快照
    pub fn flush_metrics(&self) -> Result<()> {
        match &self.metrics_handle {
            Some(handle) => handle.write_textfile(),
            None => Ok(()),
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Err(e) = self.flush_metrics() {
            warn!("写出指标文件失败: {}", e);
        }
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（Prometheus recorder，仅在启用时安装）
///
/// # Example
///
/// ```ignore
/// use pipeline_shared::config::AppConfig;
/// use pipeline_shared::observability;
///
/// fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("pipeline-health")?;
///     let _guard = observability::init(&config.service_name, &config.observability)?;
///     // 应用逻辑...
///     Ok(())
/// }
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(service_name, config)?)
    } else {
        None
    };

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_path = ?metrics_handle.as_ref().map(|h| h.path().to_path_buf()),
        "Observability initialized"
    );

    Ok(ObservabilityGuard { metrics_handle })
}

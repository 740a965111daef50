//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 不启动 HTTP 端口，而是把渲染后的文本写入文件（textfile collector 方式）。

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use tracing::info;

use super::ObservabilityConfig;

/// Metrics 资源句柄
pub struct MetricsHandle {
    handle: PrometheusHandle,
    path: PathBuf,
}

impl MetricsHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 渲染指标并写入文件
    ///
    /// 先写临时文件再重命名，采集端不会读到写了一半的内容。
    pub fn write_textfile(&self) -> Result<()> {
        let tmp = self.path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.handle.render())
            .with_context(|| format!("写入指标文件失败: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("重命名指标文件失败: {}", self.path.display()))?;

        info!("指标已写入 {}", self.path.display());
        Ok(())
    }
}

/// 安装 Prometheus recorder
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_common_metrics(service_name);

    Ok(MetricsHandle {
        handle,
        path: config.metrics_path.clone(),
    })
}

/// 注册规则引擎指标说明
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "rule_engine_deals_analyzed_total",
        "Total number of deals analyzed"
    );
    metrics::describe_counter!(
        "rule_engine_violations_total",
        "Total number of rule violations by severity"
    );
    metrics::describe_counter!(
        "rule_engine_evaluation_errors_total",
        "Rule evaluations that failed and were treated as no violation"
    );
    metrics::describe_histogram!(
        "rule_engine_analysis_duration_seconds",
        "Duration of a batch analysis in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

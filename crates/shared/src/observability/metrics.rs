//! 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 记录管道执行与求值异常指标。
//! 未安装 recorder 时所有记录都是空操作；`install_recorder` 安装进程级 Prometheus recorder，
//! 通过 handle 渲染文本格式快照。

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::warn;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 安装 Prometheus recorder，重复调用返回同一个 handle
///
/// 进程中已有其他 recorder 时保留原 recorder，返回的 handle 不会收到数据。
pub fn install_recorder() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            warn!("Metrics recorder already installed: {}", e);
        }
        handle
    })
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 渲染当前指标快照，未安装 recorder 时返回 None
pub fn render() -> Option<String> {
    get_handle().map(PrometheusHandle::render)
}

/// 注册指标描述
pub fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "filter_pipeline_executions_total",
        "Total number of filter pipeline executions"
    );
    metrics::describe_histogram!(
        "filter_pipeline_duration_seconds",
        "Filter pipeline execution duration in seconds"
    );
    metrics::describe_counter!(
        "filter_cache_lookups_total",
        "Total number of filter result cache lookups"
    );
    metrics::describe_counter!(
        "filter_evaluation_anomalies_total",
        "Total number of evaluation anomalies (unknown operator/combinator, failing handler)"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录管道执行
#[inline]
pub fn record_pipeline_execution(label: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "filter_pipeline_executions_total",
        "pipeline" => label.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "filter_pipeline_duration_seconds",
        "pipeline" => label.to_string()
    )
    .record(duration_secs);
}

/// 记录缓存查询
#[inline]
pub fn record_cache_lookup(hit: bool) {
    metrics::counter!(
        "filter_cache_lookups_total",
        "hit" => hit.to_string()
    )
    .increment(1);
}

/// 记录求值异常
#[inline]
pub fn record_evaluation_anomaly(kind: &str) {
    metrics::counter!(
        "filter_evaluation_anomalies_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

//! 日志中间件
//!
//! 记录每次调度的开始、耗时和结果，并上报执行指标。不改变结果。

use super::{ExecutionContext, Middleware, Next};
use crate::error::PipelineResult;
use crate::models::FilterAst;
use async_trait::async_trait;
use filter_shared::observability::metrics::record_pipeline_execution;
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};

/// 日志中间件
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    /// 管道标识，出现在日志和指标标签中
    label: String,
}

impl LoggingMiddleware {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
        next: &Next<'_>,
    ) -> PipelineResult<Vec<Value>> {
        let start = Instant::now();
        info!(
            pipeline = %self.label,
            request_id = %ctx.request_id,
            root_id = %ast.id,
            nodes = ast.node_count(),
            "开始执行过滤"
        );

        let result = next.run(ast, ctx).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(items) => {
                info!(
                    pipeline = %self.label,
                    request_id = %ctx.request_id,
                    duration_ms = elapsed.as_millis() as u64,
                    results = items.len(),
                    "过滤执行完成"
                );
                record_pipeline_execution(&self.label, "success", elapsed.as_secs_f64());
            }
            Err(e) => {
                warn!(
                    pipeline = %self.label,
                    request_id = %ctx.request_id,
                    duration_ms = elapsed.as_millis() as u64,
                    code = e.code(),
                    error = %e,
                    "过滤执行失败"
                );
                record_pipeline_execution(&self.label, "error", elapsed.as_secs_f64());
            }
        }

        result
    }
}

//! 重试中间件
//!
//! 下游失败时按指数退避重新调度，耗尽后返回最后一次错误。
//! 调度误用（DoubleDispatch 等）不会被重试。

use super::{ExecutionContext, Middleware, Next};
use crate::error::{PipelineError, PipelineResult};
use crate::models::FilterAst;
use async_trait::async_trait;
use filter_shared::config::RetryConfig;
use filter_shared::retry::{retry_with_policy, RetryPolicy};
use serde_json::Value;
use std::time::Duration;

/// 默认首次重试等待时间
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// 重试中间件
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    /// 最多额外重试 `max_retries` 次，等待时间从 100ms 开始翻倍
    pub fn new(max_retries: u32) -> Self {
        Self::with_policy(RetryPolicy::exponential(max_retries, DEFAULT_INITIAL_DELAY))
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::with_policy(RetryPolicy::from(config))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
        next: &Next<'_>,
    ) -> PipelineResult<Vec<Value>> {
        retry_with_policy(
            &self.policy,
            "filter_pipeline",
            PipelineError::is_retryable,
            move || next.retry(ast, ctx),
        )
        .await
    }
}

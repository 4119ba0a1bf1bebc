//! 终端执行器实现

use super::{ExecutionContext, Executor};
use crate::engine::{EvaluationConfig, Evaluator};
use crate::error::{PipelineError, PipelineResult};
use crate::models::FilterAst;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// 对内存中的记录集合本地求值
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    items: Arc<[Value]>,
    evaluator: Evaluator,
}

impl LocalExecutor {
    pub fn new(items: Vec<Value>) -> Self {
        Self::with_config(items, EvaluationConfig::default())
    }

    pub fn with_config(items: Vec<Value>, config: EvaluationConfig) -> Self {
        Self {
            items: items.into(),
            evaluator: Evaluator::new(config),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(
        &self,
        ast: &FilterAst,
        _ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        Ok(self.evaluator.filter(&self.items, ast))
    }
}

/// 把异步闭包适配为终端执行器
///
/// 闭包拿到过滤树和上下文的副本，适合转发到远端后端。
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(FilterAst, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<Value>>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(FilterAst, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<Value>>> + Send + 'static,
{
    async fn execute(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        (self.f)(ast.clone(), ctx.clone())
            .await
            .map_err(PipelineError::from)
    }
}

impl<F> fmt::Debug for FnExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

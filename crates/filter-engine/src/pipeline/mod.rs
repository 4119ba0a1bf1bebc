//! 执行管道
//!
//! 洋葱模型：一组中间件包裹一个终端执行器。第 i 个中间件拿到的 [`Next`]
//! 负责调度第 i+1 个中间件，最后到达终端执行器。
//!
//! ## 调度规则
//!
//! - `Next::run` 每次调度最多调用一次，第二次调用立即返回
//!   [`PipelineError::DoubleDispatch`]，不会再次执行下游
//! - 不调用 `next` 即短路，中间件自己的返回值就是结果
//! - `Next::retry` 只允许在尚未调度或上一次调度失败后使用，供重试中间件重新执行下游
//!
//! 调度状态属于单次调用，组合后的管道可以被并发调用。

mod cache;
mod executors;
mod logging;
mod retry;

pub use cache::{CacheMiddleware, CacheStore, MemoryCache};
pub use executors::{FnExecutor, LocalExecutor};
pub use logging::LoggingMiddleware;
pub use retry::RetryMiddleware;

use crate::error::{PipelineError, PipelineResult};
use crate::models::FilterAst;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// 调用上下文，随调度链向下传递
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub request_id: Uuid,
    pub attributes: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 终端执行器
///
/// 管道的最后一环，真正产出过滤结果（本地求值、查询后端等）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ast: &FilterAst, ctx: &ExecutionContext)
    -> PipelineResult<Vec<Value>>;
}

/// 中间件
///
/// 通过 `next` 调度下游；不调用即短路。
#[async_trait]
pub trait Middleware: Send + Sync {
    /// 中间件名称（用于日志）
    fn name(&self) -> &str;

    async fn handle(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
        next: &Next<'_>,
    ) -> PipelineResult<Vec<Value>>;
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const FAILED: u8 = 2;
const SUCCEEDED: u8 = 3;

/// 下游调度句柄
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Executor,
    state: AtomicU8,
}

impl<'a> Next<'a> {
    fn new(middlewares: &'a [Arc<dyn Middleware>], terminal: &'a dyn Executor) -> Self {
        Self {
            middlewares,
            terminal,
            state: AtomicU8::new(IDLE),
        }
    }

    /// 调度下游，每个句柄只能调用一次
    pub async fn run(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        self.acquire(&[IDLE])?;
        self.dispatch(ast, ctx).await
    }

    /// 重新调度下游，上一次调度成功后调用返回 DoubleDispatch
    pub async fn retry(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        self.acquire(&[IDLE, FAILED])?;
        self.dispatch(ast, ctx).await
    }

    fn acquire(&self, from: &[u8]) -> PipelineResult<()> {
        let acquired = from.iter().any(|&state| {
            self.state
                .compare_exchange(state, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        });

        if acquired {
            Ok(())
        } else {
            Err(PipelineError::DoubleDispatch)
        }
    }

    async fn dispatch(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        let result = dispatch(self.middlewares, self.terminal, ast, ctx).await;
        let state = if result.is_ok() { SUCCEEDED } else { FAILED };
        self.state.store(state, Ordering::Release);
        result
    }
}

fn dispatch<'a>(
    middlewares: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Executor,
    ast: &'a FilterAst,
    ctx: &'a ExecutionContext,
) -> BoxFuture<'a, PipelineResult<Vec<Value>>> {
    match middlewares.split_first() {
        None => terminal.execute(ast, ctx),
        Some((head, rest)) => Box::pin(async move {
            let next = Next::new(rest, terminal);
            head.handle(ast, ctx, &next).await
        }),
    }
}

/// 管道阶段：中间件或终端执行器
#[derive(Clone)]
pub enum Stage {
    Middleware(Arc<dyn Middleware>),
    Terminal(Arc<dyn Executor>),
}

impl Stage {
    pub fn middleware(middleware: impl Middleware + 'static) -> Self {
        Self::Middleware(Arc::new(middleware))
    }

    pub fn terminal(executor: impl Executor + 'static) -> Self {
        Self::Terminal(Arc::new(executor))
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Middleware(m) => f.debug_tuple("Middleware").field(&m.name()).finish(),
            Self::Terminal(_) => f.write_str("Terminal"),
        }
    }
}

/// 组合后的执行管道
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Executor>,
}

impl Pipeline {
    /// 由有序阶段列表组合管道，终端执行器必须且只能位于末尾
    pub fn compose(mut stages: Vec<Stage>) -> PipelineResult<Self> {
        let terminal = match stages.pop() {
            Some(Stage::Terminal(terminal)) => terminal,
            Some(Stage::Middleware(_)) | None => return Err(PipelineError::MissingStage),
        };

        let middlewares = stages
            .into_iter()
            .enumerate()
            .map(|(index, stage)| match stage {
                Stage::Middleware(middleware) => Ok(middleware),
                Stage::Terminal(_) => Err(PipelineError::UnexpectedTerminal { index }),
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        Ok(Self {
            middlewares,
            terminal,
        })
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// 中间件名称，按调度顺序
    pub fn stage_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub async fn execute(&self, ast: &FilterAst) -> PipelineResult<Vec<Value>> {
        self.execute_with(ast, &ExecutionContext::new()).await
    }

    pub async fn execute_with(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        // 只有终端执行器时直接调用
        if self.middlewares.is_empty() {
            return self.terminal.execute(ast, ctx).await;
        }

        dispatch(&self.middlewares, self.terminal.as_ref(), ast, ctx).await
    }
}

#[async_trait]
impl Executor for Pipeline {
    async fn execute(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
    ) -> PipelineResult<Vec<Value>> {
        self.execute_with(ast, ctx).await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.stage_names())
            .finish_non_exhaustive()
    }
}

/// 管道构建器
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.stages.push(Stage::middleware(middleware));
        self
    }

    /// 条件成立时才追加中间件
    pub fn middleware_if(self, enabled: bool, middleware: impl Middleware + 'static) -> Self {
        if enabled {
            self.middleware(middleware)
        } else {
            self
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn terminal(mut self, executor: impl Executor + 'static) -> Self {
        self.stages.push(Stage::terminal(executor));
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        Pipeline::compose(self.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// 记录调用顺序，可选择短路
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(
            &self,
            ast: &FilterAst,
            ctx: &ExecutionContext,
            next: &Next<'_>,
        ) -> PipelineResult<Vec<Value>> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            if self.short_circuit {
                return Ok(vec![json!("short")]);
            }
            let result = next.run(ast, ctx).await;
            self.log.lock().unwrap().push(format!("{}:after", self.name));
            result
        }
    }

    /// 调用 next 两次
    struct Greedy {
        use_retry: bool,
    }

    #[async_trait]
    impl Middleware for Greedy {
        fn name(&self) -> &str {
            "greedy"
        }

        async fn handle(
            &self,
            ast: &FilterAst,
            ctx: &ExecutionContext,
            next: &Next<'_>,
        ) -> PipelineResult<Vec<Value>> {
            next.run(ast, ctx).await?;
            if self.use_retry {
                next.retry(ast, ctx).await
            } else {
                next.run(ast, ctx).await
            }
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Recorder {
        Recorder {
            name,
            log: log.clone(),
            short_circuit: false,
        }
    }

    fn terminal_returning(items: Vec<Value>, times: usize) -> MockExecutor {
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .times(times)
            .returning(move |_, _| Ok(items.clone()));
        mock
    }

    #[tokio::test]
    async fn test_compose_empty_is_missing_stage() {
        let err = Pipeline::compose(vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingStage));
    }

    #[tokio::test]
    async fn test_compose_without_terminal_is_missing_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::compose(vec![Stage::middleware(recorder("a", &log))]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingStage));
    }

    #[tokio::test]
    async fn test_compose_terminal_not_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::compose(vec![
            Stage::middleware(recorder("a", &log)),
            Stage::terminal(MockExecutor::new()),
            Stage::terminal(MockExecutor::new()),
        ])
        .unwrap_err();

        assert!(matches!(err, PipelineError::UnexpectedTerminal { index: 1 }));
    }

    #[tokio::test]
    async fn test_single_terminal_bypasses_composition() {
        let pipeline = Pipeline::compose(vec![Stage::terminal(terminal_returning(
            vec![json!(1)],
            1,
        ))])
        .unwrap();

        assert!(pipeline.stage_names().is_empty());
        assert_eq!(pipeline.execute(&FilterAst::default()).await.unwrap(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .middleware(recorder("a", &log))
            .middleware(recorder("b", &log))
            .terminal(terminal_returning(vec![json!("x")], 1))
            .build()
            .unwrap();

        let result = pipeline.execute(&FilterAst::default()).await.unwrap();

        assert_eq!(result, vec![json!("x")]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:before", "b:before", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .middleware(Recorder {
                name: "gate",
                log: log.clone(),
                short_circuit: true,
            })
            .middleware(recorder("inner", &log))
            .terminal(terminal_returning(vec![], 0))
            .build()
            .unwrap();

        let result = pipeline.execute(&FilterAst::default()).await.unwrap();

        assert_eq!(result, vec![json!("short")]);
        assert_eq!(*log.lock().unwrap(), vec!["gate:before"]);
    }

    #[tokio::test]
    async fn test_double_dispatch_does_not_rerun_downstream() {
        let pipeline = Pipeline::builder()
            .middleware(Greedy { use_retry: false })
            .terminal(terminal_returning(vec![], 1))
            .build()
            .unwrap();

        let err = pipeline.execute(&FilterAst::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::DoubleDispatch));
    }

    #[tokio::test]
    async fn test_retry_after_success_is_double_dispatch() {
        let pipeline = Pipeline::builder()
            .middleware(Greedy { use_retry: true })
            .terminal(terminal_returning(vec![], 1))
            .build()
            .unwrap();

        let err = pipeline.execute(&FilterAst::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::DoubleDispatch));
    }

    #[tokio::test]
    async fn test_context_reaches_terminal() {
        let mut mock = MockExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_, ctx| Ok(ctx.attribute("tenant").cloned().into_iter().collect()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .middleware(recorder("a", &log))
            .terminal(mock)
            .build()
            .unwrap();

        let ctx = ExecutionContext::new().with_attribute("tenant", "acme");
        let result = pipeline.execute_with(&FilterAst::default(), &ctx).await.unwrap();

        assert_eq!(result, vec![json!("acme")]);
    }

    #[tokio::test]
    async fn test_concurrent_invocations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .middleware(recorder("a", &log))
            .terminal(terminal_returning(vec![json!(1)], 8))
            .build()
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.execute(&FilterAst::default()).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![json!(1)]);
        }
        assert_eq!(log.lock().unwrap().len(), 16);
    }
}

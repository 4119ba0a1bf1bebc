//! 过滤树引擎
//!
//! 提供可组合的过滤条件树，支持：
//! - 规则/分组树的增删改查和快照发布
//! - 基于 JSON 记录的本地求值（可扩展操作符和字段提取）
//! - 中间件式执行管道（日志、缓存、重试）
//! - 由字段配置生成初始状态

pub mod defaults;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod operators;
pub mod pipeline;
pub mod store;
pub mod tree;

pub use defaults::{FieldConfig, FieldOption, FilterConfig, ValidationIssue};
pub use engine::{evaluate, evaluate_ast, EvaluationConfig, Evaluator};
pub use error::{FilterError, PipelineError, PipelineResult, Result};
pub use evaluator::ConditionEvaluator;
pub use models::{
    Combinator, FilterAst, FilterGroup, FilterNode, FilterRule, GroupDraft, GroupPatch, NodeDraft,
    NodeRef, RuleDraft, RulePatch,
};
pub use operators::Operator;
pub use pipeline::{
    CacheMiddleware, CacheStore, ExecutionContext, Executor, FnExecutor, LocalExecutor,
    LoggingMiddleware, MemoryCache, Middleware, Next, Pipeline, PipelineBuilder, RetryMiddleware,
    Stage,
};
pub use store::{FilterStore, StoreReader};
pub use tree::NodeKind;

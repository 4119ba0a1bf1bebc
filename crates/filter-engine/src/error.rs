//! 过滤引擎错误类型

use thiserror::Error;

/// 树结构操作错误
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("父节点不存在或不是分组: {0}")]
    ParentNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// 执行管道错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 同一次调度中 `next` 被调用了两次
    #[error("next() 在同一次调度中被重复调用")]
    DoubleDispatch,

    #[error("管道缺少终端执行器")]
    MissingStage,

    #[error("终端执行器必须位于管道末尾，实际位置: {index}")]
    UnexpectedTerminal { index: usize },

    /// 执行器或中间件抛出的运行时错误
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl PipelineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DoubleDispatch => "DOUBLE_DISPATCH",
            Self::MissingStage => "MISSING_STAGE",
            Self::UnexpectedTerminal { .. } => "UNEXPECTED_TERMINAL",
            Self::Execution(_) => "EXECUTION_FAILED",
        }
    }

    /// 调度误用属于调用方 bug，不应被重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

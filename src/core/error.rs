//! 错误类型
//!
//! - AgentError：专家 Agent 内部的工具 / 后端失败，由 Agent 自己捕获并转成 Failed 结果，不会向上传播
//! - StorageError：会话存储失败
//! - OrchestratorError：`process` 唯一会返回给调用方的硬错误（存储不可用）

use thiserror::Error;

use crate::llm::BackendError;
use crate::tools::ToolError;

/// Agent 调用工具或后端时可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// 请求级超时后取消，后续调用不再发出
    #[error("Cancelled")]
    Cancelled,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// 会话存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// 追加的 Turn 序号与会话当前长度不一致
    #[error("Turn sequence conflict: expected {expected}, got {got}")]
    SequenceConflict { expected: u64, got: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 编排器对外错误：只有存储不可用会让整次请求失败
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(String),
}

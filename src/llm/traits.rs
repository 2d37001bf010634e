//! 语言模型后端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 Backend：generate(prompt, context) -> text。
//! 两类错误（不可用 / 限流）对 Agent 来说都是可恢复的，由 Agent 的 toolkit 负责重试一次。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 后端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

/// 语言模型后端：prompt 为自然语言指令，context 为结构化上下文（会话片段、上游 Agent 输出等）
#[async_trait]
pub trait Backend: Send + Sync {
    async fn generate(&self, prompt: &str, context: &Value) -> Result<String, BackendError>;

    /// 后端名称（用于 trace）
    fn name(&self) -> &str {
        "backend"
    }
}

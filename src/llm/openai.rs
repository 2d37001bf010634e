//! OpenAI 兼容 API 后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；context 以 JSON 形式拼入 system 消息。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{Backend, BackendError};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容后端：持有 Client 与 model 名
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    pub usage: TokenUsage,
}

impl OpenAiBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::default(),
        }
    }

    fn messages(prompt: &str, context: &Value) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
        let system = format!(
            "You are part of a wellness assistant team. Never diagnose or prescribe.\n\nContext:\n{}",
            serde_json::to_string_pretty(context).unwrap_or_default()
        );
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }
}

/// 429 / rate limit 归为 RateLimited，其余一律视为不可用
fn classify_error(message: String) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("429") {
        BackendError::RateLimited(message)
    } else {
        BackendError::Unavailable(message)
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn generate(&self, prompt: &str, context: &Value) -> Result<String, BackendError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::messages(prompt, context)?)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| classify_error(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

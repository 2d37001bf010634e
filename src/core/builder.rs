//! 编排器构建器：统一的初始化逻辑
//!
//! 从 AppConfig 构建推理后端、工具注册表、会话存储（可选 JSON Lines 持久化）与追踪记录器，
//! 测试可以逐项替换。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::agents::{build_agents, AgentServices};
use crate::config::AppConfig;
use crate::core::{Orchestrator, OrchestratorError, OrchestratorSettings, SafetyFilter, StorageError};
use crate::llm::{Backend, MockBackend, OpenAiBackend};
use crate::memory::{InMemorySessionStore, JsonlSink, Session, SessionStore};
use crate::observability::TraceRecorder;
use crate::tools::{register_builtin, ToolRegistry};

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    backend: Option<Arc<dyn Backend>>,
    tools: Option<ToolRegistry>,
    store: Option<Arc<dyn SessionStore>>,
    recorder: Option<Arc<TraceRecorder>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backend: None,
            tools: None,
            store: None,
            recorder: None,
        }
    }

    /// 从默认路径（及可选的指定文件）加载配置
    pub fn from_config_file(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = crate::config::load_config(config_path).context("failed to load config")?;
        Ok(Self::new(config))
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 替换工具注册表（默认注册全部内置工具）
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<TraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按配置构建推理后端；openai 缺少 API Key 时退回 Mock
    pub fn build_backend(&self) -> Arc<dyn Backend> {
        let provider = self.config.llm.provider.to_lowercase();
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        match (provider.as_str(), api_key) {
            ("openai", Some(key)) => {
                tracing::info!("Using OpenAI backend ({})", self.config.llm.model);
                Arc::new(OpenAiBackend::new(
                    self.config.llm.base_url.as_deref(),
                    &self.config.llm.model,
                    Some(&key),
                ))
            }
            ("openai", None) => {
                tracing::warn!("OPENAI_API_KEY not set, using Mock backend");
                Arc::new(MockBackend::new())
            }
            ("mock", _) => Arc::new(MockBackend::new()),
            (other, _) => {
                tracing::warn!("Unknown backend provider '{}', using Mock backend", other);
                Arc::new(MockBackend::new())
            }
        }
    }

    /// 内置工具注册表
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        register_builtin(&mut tools);
        tools
    }

    /// 构建编排器；配置了 storage.path 时回放已持久化的会话并写穿到 JSON Lines
    pub async fn build(mut self) -> anyhow::Result<Orchestrator> {
        if self.config.orchestrator.request_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "orchestrator.request_timeout_ms must be greater than 0".into(),
            )
            .into());
        }

        let backend = match &self.backend {
            Some(backend) => Arc::clone(backend),
            None => self.build_backend(),
        };

        let cfg = self.config.clone();
        let (store, recorder) = match (self.store.clone(), self.recorder.clone()) {
            (Some(store), Some(recorder)) => (store, recorder),
            (store, recorder) => {
                let persisted = match &cfg.storage.path {
                    Some(path) => Some(open_storage(path.clone()).await?),
                    None => None,
                };

                let store = match store {
                    Some(store) => store,
                    None => {
                        let mut memory = InMemorySessionStore::new();
                        if let Some((sink, sessions)) = &persisted {
                            tracing::info!(sessions = sessions.len(), "sessions restored from storage");
                            memory = memory.with_sink(sink.clone());
                            memory.restore(sessions.clone()).await;
                        }
                        Arc::new(memory) as Arc<dyn SessionStore>
                    }
                };
                let sink = persisted.map(|(sink, _)| sink);
                let recorder = match recorder {
                    Some(recorder) => recorder,
                    None => {
                        let recorder = TraceRecorder::new();
                        Arc::new(match sink {
                            Some(sink) => recorder.with_sink(sink),
                            None => recorder,
                        })
                    }
                };
                (store, recorder)
            }
        };

        let tools = match self.tools.take() {
            Some(tools) => tools,
            None => self.build_tool_registry(),
        };
        tracing::debug!(tools = ?tools.tool_names(), "tool registry ready");

        let services = Arc::new(AgentServices {
            backend,
            tools: Arc::new(tools),
            recorder: Arc::clone(&recorder),
            tool_timeout: Duration::from_secs(cfg.agents.tool_timeout_secs.max(1)),
            retry_backoff: Duration::from_millis(cfg.agents.backend_retry_backoff_ms),
        });
        let agents = build_agents(services, &cfg.orchestrator.clarification_message);

        Ok(Orchestrator::new(
            store,
            agents,
            recorder,
            SafetyFilter::from_config(&cfg.safety),
            OrchestratorSettings {
                context_window_turns: cfg.orchestrator.context_window_turns,
                request_timeout: Duration::from_millis(cfg.orchestrator.request_timeout_ms),
                degraded_message: cfg.orchestrator.degraded_message.clone(),
            },
        ))
    }
}

/// 打开 JSON Lines 目录并回放会话；同步文件读放到阻塞线程池
async fn open_storage(path: PathBuf) -> anyhow::Result<(Arc<JsonlSink>, Vec<Session>)> {
    let display = path.display().to_string();
    let (sink, sessions) = tokio::task::spawn_blocking(move || {
        let sink = JsonlSink::open(&path)?;
        let sessions = sink.load_sessions()?;
        Ok::<_, StorageError>((sink, sessions))
    })
    .await
    .context("storage loader task failed")?
    .with_context(|| format!("failed to open storage at {display}"))?;
    Ok((Arc::new(sink), sessions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backend_is_mock() {
        let builder = OrchestratorBuilder::new(AppConfig::default());
        assert_eq!(builder.build_backend().name(), "mock");
        assert_eq!(
            builder.build_tool_registry().tool_names(),
            vec!["knowledge_lookup", "metrics_extract", "wellness_tips"]
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.request_timeout_ms = 0;
        assert!(OrchestratorBuilder::new(config).build().await.is_err());
    }

    #[tokio::test]
    async fn test_persisted_sessions_restored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.path = Some(dir.path().to_path_buf());

        let first = OrchestratorBuilder::new(config.clone()).build().await.unwrap();
        let response = first.process(Some("s1"), "any tips to be more active?").await.unwrap();
        assert_eq!(response.turn_id, 0);
        drop(first);

        let second = OrchestratorBuilder::new(config).build().await.unwrap();
        let history = second.session_history("s1").await.unwrap();
        assert_eq!(history.turn_count, 1);
        let response = second.process(Some("s1"), "any tips to be more active?").await.unwrap();
        assert_eq!(response.turn_id, 1);
    }
}

//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TECHHEALTH__*` 覆盖（双下划线表示嵌套，如 `TECHHEALTH__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSection,
    pub agents: AgentsSection,
    pub llm: LlmSection,
    pub safety: SafetySection,
    pub storage: StorageSection,
}

/// [orchestrator] 段：上下文窗口、请求超时、降级与澄清文案
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 传给 Agent 的历史轮数上限（K）
    pub context_window_turns: usize,
    /// 单次请求的整体超时（毫秒），超时后取消仍在运行的 Agent
    pub request_timeout_ms: u64,
    pub degraded_message: String,
    pub clarification_message: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            context_window_turns: 5,
            request_timeout_ms: 30_000,
            degraded_message: DEFAULT_DEGRADED_MESSAGE.to_string(),
            clarification_message: DEFAULT_CLARIFICATION_MESSAGE.to_string(),
        }
    }
}

pub const DEFAULT_DEGRADED_MESSAGE: &str = "Sorry, our assistant team is temporarily unavailable and could not \
     complete your request. Please try again in a few minutes.";

pub const DEFAULT_CLARIFICATION_MESSAGE: &str = "Could you tell me a bit more? For example, share a recent \
     measurement (hours slept, heart rate, blood pressure, steps), ask for tips on a goal, \
     or ask a general question about a topic you are curious about.";

/// [agents] 段：后端重试退避、单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub backend_retry_backoff_ms: u64,
    pub tool_timeout_secs: u64,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            backend_retry_backoff_ms: 250,
            tool_timeout_secs: 10,
        }
    }
}

/// [llm] 段：后端选择（mock / openai）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

/// [safety] 段：免责声明、拒答文案、额外的拦截词与健康词表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    pub disclaimer: String,
    pub refusal_message: String,
    /// 追加到内置规则之后的拦截词（命中即 Blocked）
    pub blocked_terms: Vec<String>,
    /// 追加到内置词表之后的健康相关词（命中且缺少免责声明时 Rewritten）
    pub health_terms: Vec<String>,
}

pub const DEFAULT_DISCLAIMER: &str = "Note: this is general wellness information, not medical advice. \
     Please consult a healthcare professional for personal medical concerns.";

pub const DEFAULT_REFUSAL_MESSAGE: &str = "I can't help with diagnoses, medications or dosages. \
     Please talk to a doctor or pharmacist, who can give advice that is safe for you.";

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            disclaimer: DEFAULT_DISCLAIMER.to_string(),
            refusal_message: DEFAULT_REFUSAL_MESSAGE.to_string(),
            blocked_terms: Vec::new(),
            health_terms: Vec::new(),
        }
    }
}

/// [storage] 段：JSON Lines 持久化目录；未设置时只在进程内存中保存
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 TECHHEALTH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TECHHEALTH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TECHHEALTH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.context_window_turns, 5);
        assert_eq!(cfg.llm.provider, "mock");
        assert!(cfg.storage.path.is_none());
        assert_eq!(cfg.safety.disclaimer, DEFAULT_DISCLAIMER);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[orchestrator]\ncontext_window_turns = 2\n\n[safety]\nblocked_terms = [\"opioid\"]"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.orchestrator.context_window_turns, 2);
        assert_eq!(cfg.orchestrator.request_timeout_ms, 30_000);
        assert_eq!(cfg.safety.blocked_terms, vec!["opioid".to_string()]);
    }
}

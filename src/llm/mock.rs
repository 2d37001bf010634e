//! Mock 后端（用于测试与本地运行，无需 API）
//!
//! 默认根据 context 中的 `agent` 字段生成确定性的回复；测试可以为某个 Agent 指定固定回复、
//! 注入前 N 次失败或人为延迟，并通过 calls() 查看调用顺序。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{Backend, BackendError};

/// 单次调用记录
#[derive(Debug, Clone)]
pub struct MockCall {
    pub agent: String,
    pub prompt: String,
    pub context: Value,
    pub started_at: tokio::time::Instant,
    pub finished_at: tokio::time::Instant,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, String>,
    failures: HashMap<String, (usize, BackendError)>,
    delays: HashMap<String, Duration>,
}

/// Mock 后端：可编排的确定性回复
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为指定 Agent 设定固定回复
    pub fn with_reply(self, agent: &str, reply: impl Into<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.replies.insert(agent.to_string(), reply.into());
        }
        self
    }

    /// 指定 Agent 的前 `times` 次调用返回 `error`
    pub fn with_failures(self, agent: &str, times: usize, error: BackendError) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.failures.insert(agent.to_string(), (times, error));
        }
        self
    }

    /// 指定 Agent 的每次调用先等待 `delay`
    pub fn with_delay(self, agent: &str, delay: Duration) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.delays.insert(agent.to_string(), delay);
        }
        self
    }

    /// 已完成的调用（按完成顺序）
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, agent: &str) -> usize {
        self.calls().iter().filter(|c| c.agent == agent).count()
    }

    fn default_reply(agent: &str, context: &Value) -> String {
        match agent {
            "health_monitoring" => {
                let risk = context
                    .pointer("/metrics/risk_level")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown");
                let concerns = join_strings(context.pointer("/metrics/concerns"));
                format!(
                    "Risk level: {risk}. Key concerns: {}. Suggested monitoring: check sleep and activity daily this week.",
                    if concerns.is_empty() { "none".to_string() } else { concerns }
                )
            }
            "recommendation" => {
                let tips = context.get("tips").cloned().unwrap_or(Value::Null);
                let mut out = String::from("Here is a simple wellness plan for this week:\n");
                for group in ["nutrition", "exercise", "lifestyle"] {
                    for tip in tips
                        .get(group)
                        .and_then(|v| v.as_array())
                        .into_iter()
                        .flatten()
                        .filter_map(|t| t.as_str())
                    {
                        out.push_str(&format!("- {tip}\n"));
                    }
                }
                out.trim_end().to_string()
            }
            "medical_knowledge" => {
                let refs = join_strings(context.get("references"));
                if refs.is_empty() {
                    "General information: regular sleep, activity and a balanced diet support overall health."
                        .to_string()
                } else {
                    format!("General information: {refs}")
                }
            }
            other => format!("({other}) no content"),
        }
    }
}

fn join_strings(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default()
}

#[async_trait]
impl Backend for MockBackend {
    async fn generate(&self, prompt: &str, context: &Value) -> Result<String, BackendError> {
        let started_at = tokio::time::Instant::now();
        let agent = context
            .get("agent")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let (delay, failure, reply) = {
            let mut script = self
                .script
                .lock()
                .map_err(|_| BackendError::Unavailable("mock script poisoned".into()))?;
            let failure = match script.failures.get_mut(&agent) {
                Some((remaining, err)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(err.clone())
                }
                _ => None,
            };
            (
                script.delays.get(&agent).copied(),
                failure,
                script.replies.get(&agent).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match failure {
            Some(err) => Err(err),
            None => Ok(reply.unwrap_or_else(|| Self::default_reply(&agent, context))),
        };

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                agent,
                prompt: prompt.to_string(),
                context: context.clone(),
                started_at,
                finished_at: tokio::time::Instant::now(),
            });
        }
        result
    }

    fn name(&self) -> &str {
        "mock"
    }
}

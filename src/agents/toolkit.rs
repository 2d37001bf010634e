//! 专家 Agent 的工具与后端调用封装
//!
//! 每次工具调用：注册表查找 → 带超时执行 → 记录 ToolInvocation 与 ToolCall 事件，并输出 JSON 审计日志。
//! 每次后端调用：失败（不可用 / 限流）后退避重试一次，仍失败则返回错误。
//! 请求级取消后不再发出新的调用，也不再记录事件；已发出的调用照常跑完，结果被丢弃。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::agents::{AgentContext, AgentKind, AgentOutput, AgentResult, ToolInvocation, ToolOutcome};
use crate::core::AgentError;
use crate::llm::Backend;
use crate::observability::{TraceEvent, TraceEventKind, TraceRecorder};
use crate::tools::{ToolError, ToolRegistry};

/// 后端调用最多尝试次数（首次 + 一次重试）
const MAX_BACKEND_ATTEMPTS: u32 = 2;

/// 专家 Agent 共享的外部协作者
pub struct AgentServices {
    pub backend: Arc<dyn Backend>,
    pub tools: Arc<ToolRegistry>,
    pub recorder: Arc<TraceRecorder>,
    pub tool_timeout: Duration,
    pub retry_backoff: Duration,
}

/// 单次 handle 内的调用收集器
pub struct Toolkit<'a> {
    services: &'a AgentServices,
    agent: AgentKind,
    ctx: &'a AgentContext,
    invocations: Vec<ToolInvocation>,
    events: Vec<u64>,
}

impl<'a> Toolkit<'a> {
    pub fn new(services: &'a AgentServices, agent: AgentKind, ctx: &'a AgentContext) -> Self {
        Self {
            services,
            agent,
            ctx,
            invocations: Vec::new(),
            events: Vec::new(),
        }
    }

    fn check_cancelled(&self) -> Result<(), AgentError> {
        if self.ctx.cancel.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn trace(&mut self, kind: TraceEventKind, payload: Value) {
        if self.ctx.cancel.is_cancelled() {
            return;
        }
        let event = TraceEvent::new(
            self.ctx.session_id.clone(),
            self.ctx.turn,
            kind,
            self.agent.as_str(),
            payload,
        );
        if let Some(id) = self.services.recorder.record(event) {
            self.events.push(id);
        }
    }

    /// 调用注册表中的工具；未注册的工具只记录 Error 事件，不产生 ToolInvocation
    pub async fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, AgentError> {
        self.check_cancelled()?;
        let services = self.services;
        if !services.tools.contains(name) {
            let err = ToolError::UnknownTool(name.to_string());
            self.trace(
                TraceEventKind::Error,
                json!({ "tool": name, "error": err.to_string() }),
            );
            return Err(err.into());
        }

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = match timeout(services.tool_timeout, services.tools.invoke(name, args.clone())).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout(name.to_string())),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(ToolError::Timeout(_)) => (false, "timeout"),
            Err(_) => (false, "error"),
        };
        let audit = json!({
            "event": "tool_audit",
            "agent": self.agent.as_str(),
            "tool": name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        self.check_cancelled()?;
        self.invocations.push(ToolInvocation {
            tool: name.to_string(),
            args,
            outcome: match &result {
                Ok(v) => ToolOutcome::Output(v.clone()),
                Err(e) => ToolOutcome::Error(e.to_string()),
            },
            duration_ms,
        });
        self.trace(
            TraceEventKind::ToolCall,
            json!({
                "tool": name,
                "ok": ok,
                "outcome": outcome,
                "duration_ms": duration_ms,
                "args_preview": preview,
            }),
        );
        result.map_err(AgentError::from)
    }

    /// 调用推理后端；失败后退避重试一次。
    /// 已发出的请求不会被中途取消，完成后若请求已取消则丢弃结果。
    pub async fn generate(&mut self, prompt: &str, context: Value) -> Result<String, AgentError> {
        let services = self.services;
        let backend = services.backend.as_ref();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancelled()?;
            let start = Instant::now();
            let result = backend.generate(prompt, &context).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            if self.ctx.cancel.is_cancelled() {
                tracing::debug!(agent = %self.agent, duration_ms, "backend reply after cancellation discarded");
                return Err(AgentError::Cancelled);
            }

            match result {
                Ok(text) => {
                    self.trace(
                        TraceEventKind::ToolCall,
                        json!({
                            "backend": backend.name(),
                            "attempt": attempt,
                            "ok": true,
                            "duration_ms": duration_ms,
                            "prompt_preview": text_preview(prompt),
                        }),
                    );
                    return Ok(text);
                }
                Err(e) => {
                    self.trace(
                        TraceEventKind::Error,
                        json!({
                            "backend": backend.name(),
                            "attempt": attempt,
                            "error": e.to_string(),
                            "duration_ms": duration_ms,
                        }),
                    );
                    if attempt >= MAX_BACKEND_ATTEMPTS {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        agent = %self.agent,
                        error = %e,
                        backoff_ms = services.retry_backoff.as_millis() as u64,
                        "backend call failed, retrying once"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(services.retry_backoff) => {}
                        _ = self.ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                    }
                }
            }
        }
    }

    /// 汇总为 AgentResult；错误转成 Failed（取消转成 Timeout）
    pub fn finish(mut self, outcome: Result<AgentOutput, AgentError>) -> AgentResult {
        let mut result = match outcome {
            Ok(output) => {
                let mut result = AgentResult::success(self.agent, output.payload);
                result.scratch_writes = output.scratch_writes;
                result
            }
            Err(AgentError::Cancelled) => AgentResult::timeout(self.agent),
            Err(e) => {
                tracing::warn!(agent = %self.agent, error = %e, "agent failed");
                self.trace(TraceEventKind::Error, json!({ "error": e.to_string() }));
                AgentResult::failed(self.agent, e.to_string())
            }
        };
        result.tool_invocations = self.invocations;
        result.trace_events = self.events;
        result
    }
}

fn args_preview(args: &Value) -> String {
    text_preview(&args.to_string())
}

fn text_preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

//! Agent 输出：AgentResult、状态与工具调用记录

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentKind;

/// Agent 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Success,
    Failed,
    /// 前一阶段全部失败，本 Agent 未被调度
    Skipped,
    /// 请求级超时时仍在运行，被取消
    Timeout,
}

/// 工具调用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Output(Value),
    Error(String),
}

/// 单次工具调用记录；只为注册表中存在的工具生成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Value,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Output(_))
    }
}

/// Agent 一次 handle 的结果，提交后归属唯一的 Turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub status: AgentStatus,
    pub payload: Option<Value>,
    pub tool_invocations: Vec<ToolInvocation>,
    /// 本 Agent 发出的 TraceEvent id
    pub trace_events: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent 建议写入的 scratch 键值，由编排器在提交时统一写入
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scratch_writes: Vec<(String, Value)>,
}

impl AgentResult {
    pub fn success(agent: AgentKind, payload: Value) -> Self {
        Self {
            agent,
            status: AgentStatus::Success,
            payload: Some(payload),
            tool_invocations: Vec::new(),
            trace_events: Vec::new(),
            error: None,
            scratch_writes: Vec::new(),
        }
    }

    pub fn failed(agent: AgentKind, error: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            payload: None,
            error: Some(error.into()),
            ..Self::success(agent, Value::Null)
        }
    }

    pub fn skipped(agent: AgentKind) -> Self {
        Self {
            status: AgentStatus::Skipped,
            payload: None,
            ..Self::success(agent, Value::Null)
        }
    }

    pub fn timeout(agent: AgentKind) -> Self {
        Self {
            status: AgentStatus::Timeout,
            payload: None,
            error: Some("request deadline exceeded".to_string()),
            ..Self::success(agent, Value::Null)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }

    /// payload 中的主文本字段（各 Agent 约定为 `text`）
    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref()?.get("text")?.as_str()
    }
}

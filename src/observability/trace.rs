//! 结构化追踪事件
//!
//! 每个事件归属 (session, turn)；同一 Turn 内按发出顺序编号（seq），该顺序用于事后还原因果关系。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    AgentStart,
    AgentEnd,
    ToolCall,
    Decision,
    Error,
}

/// 追踪事件；id 与 seq 由 TraceRecorder 在写入时分配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// 进程内全局递增 id，AgentResult 通过它引用事件
    pub id: u64,
    pub session_id: String,
    pub turn: u64,
    /// Turn 内发出顺序
    pub seq: u64,
    /// 同一 Turn 的第几次尝试（提交失败后重试时递增）
    #[serde(default)]
    pub attempt: u32,
    pub kind: TraceEventKind,
    /// 发出者：orchestrator / health_monitoring / ...
    pub source: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(
        session_id: impl Into<String>,
        turn: u64,
        kind: TraceEventKind,
        source: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: 0,
            session_id: session_id.into(),
            turn,
            seq: 0,
            attempt: 0,
            kind,
            source: source.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

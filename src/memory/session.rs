//! 会话数据模型：Session / Turn / TurnSummary
//!
//! Turn 提交后不可变；传给 Agent 的历史只取最近 K 轮摘要，避免上下文无限增长。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentResult;
use crate::core::{Plan, SafetyStatus};

/// scratch 中约定的键
pub mod keys {
    /// 用户画像（UserProfile）
    pub const PROFILE: &str = "profile";
    /// 本轮由调用方直接提交的结构化指标，提交后清空
    pub const PENDING_METRICS: &str = "pending_metrics";
    /// 最近一次监测得到的指标
    pub const LAST_METRICS: &str = "last_metrics";
    pub const LAST_RISK: &str = "last_risk";
    pub const LAST_CONCERNS: &str = "last_concerns";
}

/// 用户画像，保存在 scratch `profile` 下
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub age: Option<u32>,
    pub fitness_goal: Option<String>,
    pub dietary_preferences: Option<String>,
}

/// 一次已提交的请求/响应周期
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// 会话内序号，从 0 开始连续递增
    pub seq: u64,
    pub request: String,
    pub plan: Plan,
    pub agent_results: Vec<AgentResult>,
    /// 经安全过滤后的最终回复
    pub response: String,
    pub safety_status: SafetyStatus,
    /// 某阶段全部失败，回复为降级文案
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

/// 供 Agent 参考的 Turn 摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub seq: u64,
    pub request: String,
    pub response: String,
    pub plan: Plan,
    pub safety_status: SafetyStatus,
}

impl From<&Turn> for TurnSummary {
    fn from(turn: &Turn) -> Self {
        Self {
            seq: turn.seq,
            request: turn.request.clone(),
            response: turn.response.clone(),
            plan: turn.plan,
            safety_status: turn.safety_status,
        }
    }
}

/// 会话：有序 Turn 列表 + scratch 键值区
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
    pub scratch: HashMap<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            turns: Vec::new(),
            scratch: HashMap::new(),
        }
    }

    /// 下一个 Turn 的序号
    pub fn next_seq(&self) -> u64 {
        self.turns.len() as u64
    }

    /// 最近 k 轮摘要（旧 → 新）；k 为 0 时为空
    pub fn recent_summaries(&self, k: usize) -> Vec<TurnSummary> {
        let start = self.turns.len().saturating_sub(k);
        self.turns[start..].iter().map(TurnSummary::from).collect()
    }

    /// 取 scratch 中指定键的子集
    pub fn scratch_slice(&self, keys: &[&str]) -> HashMap<String, Value> {
        keys.iter()
            .filter_map(|k| self.scratch.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }
}

/// 会话摘要（对外查询历史）
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub turn_count: usize,
    pub turns: Vec<TurnSummary>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            created_at: session.created_at,
            turn_count: session.turns.len(),
            turns: session.turns.iter().map(TurnSummary::from).collect(),
        }
    }
}

//! Agent 层：一个协调者 + 三个专家
//!
//! Agent 集合是封闭的，用枚举表示；编排器只通过 [`Agent::handle`] 调用它们。
//! 专家 Agent 的工具 / 后端调用都经过 [`Toolkit`]，以便统一记录 ToolInvocation 与 TraceEvent。

pub mod coordinator;
pub mod knowledge;
pub mod monitoring;
pub mod recommendation;
pub mod result;
pub mod toolkit;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::Plan;
use crate::memory::{keys, TurnSummary};

pub use coordinator::CoordinatorAgent;
pub use knowledge::MedicalKnowledgeAgent;
pub use monitoring::HealthMonitoringAgent;
pub use recommendation::RecommendationAgent;
pub use result::{AgentResult, AgentStatus, ToolInvocation, ToolOutcome};
pub use toolkit::{AgentServices, Toolkit};

/// Agent 种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coordinator,
    HealthMonitoring,
    Recommendation,
    MedicalKnowledge,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Coordinator => "coordinator",
            AgentKind::HealthMonitoring => "health_monitoring",
            AgentKind::Recommendation => "recommendation",
            AgentKind::MedicalKnowledge => "medical_knowledge",
        }
    }

    /// 该 Agent 可读取的 scratch 键
    pub fn scratch_keys(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Coordinator => &[],
            AgentKind::HealthMonitoring => &[keys::PENDING_METRICS, keys::LAST_METRICS, keys::PROFILE],
            AgentKind::Recommendation => &[
                keys::PROFILE,
                keys::LAST_METRICS,
                keys::LAST_RISK,
                keys::LAST_CONCERNS,
            ],
            AgentKind::MedicalKnowledge => &[keys::PROFILE],
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分派给某个 Agent 的子请求
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub text: String,
    pub plan: Plan,
}

/// Agent 执行上下文：会话切片与上游结果，全部为快照，不持有存储句柄
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: String,
    pub turn: u64,
    /// 按 [`AgentKind::scratch_keys`] 裁剪后的 scratch
    pub scratch: HashMap<String, Value>,
    /// 最近 K 轮摘要（旧 → 新）
    pub recent_turns: Vec<TurnSummary>,
    /// 依赖阶段中各 Agent 的结果
    pub upstream: Vec<AgentResult>,
    pub cancel: CancellationToken,
}

impl AgentContext {
    /// 依赖阶段中指定 Agent 的成功结果
    pub fn upstream_success(&self, kind: AgentKind) -> Option<&AgentResult> {
        self.upstream
            .iter()
            .find(|r| r.agent == kind && r.is_success())
    }
}

/// 专家 Agent 的成功输出
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub payload: Value,
    pub scratch_writes: Vec<(String, Value)>,
}

impl AgentOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            scratch_writes: Vec::new(),
        }
    }

    pub fn write(mut self, key: &str, value: Value) -> Self {
        self.scratch_writes.push((key.to_string(), value));
        self
    }
}

/// 封闭的 Agent 集合
pub enum Agent {
    Coordinator(CoordinatorAgent),
    HealthMonitoring(HealthMonitoringAgent),
    Recommendation(RecommendationAgent),
    MedicalKnowledge(MedicalKnowledgeAgent),
}

impl Agent {
    pub fn kind(&self) -> AgentKind {
        match self {
            Agent::Coordinator(_) => AgentKind::Coordinator,
            Agent::HealthMonitoring(_) => AgentKind::HealthMonitoring,
            Agent::Recommendation(_) => AgentKind::Recommendation,
            Agent::MedicalKnowledge(_) => AgentKind::MedicalKnowledge,
        }
    }

    /// 处理子请求；任何内部错误都转成 Failed 结果，不向上传播
    pub async fn handle(&self, request: &SubRequest, ctx: &AgentContext) -> AgentResult {
        let kind = self.kind();
        match self {
            Agent::Coordinator(agent) => agent.handle(),
            Agent::HealthMonitoring(agent) => {
                let mut kit = Toolkit::new(agent.services(), kind, ctx);
                let outcome = agent.run(request, ctx, &mut kit).await;
                kit.finish(outcome)
            }
            Agent::Recommendation(agent) => {
                let mut kit = Toolkit::new(agent.services(), kind, ctx);
                let outcome = agent.run(request, ctx, &mut kit).await;
                kit.finish(outcome)
            }
            Agent::MedicalKnowledge(agent) => {
                let mut kit = Toolkit::new(agent.services(), kind, ctx);
                let outcome = agent.run(request, ctx, &mut kit).await;
                kit.finish(outcome)
            }
        }
    }
}

/// 构建全部四个 Agent
pub fn build_agents(services: Arc<AgentServices>, clarification: &str) -> HashMap<AgentKind, Arc<Agent>> {
    let mut agents = HashMap::new();
    agents.insert(
        AgentKind::Coordinator,
        Arc::new(Agent::Coordinator(CoordinatorAgent::new(clarification))),
    );
    agents.insert(
        AgentKind::HealthMonitoring,
        Arc::new(Agent::HealthMonitoring(HealthMonitoringAgent::new(Arc::clone(&services)))),
    );
    agents.insert(
        AgentKind::Recommendation,
        Arc::new(Agent::Recommendation(RecommendationAgent::new(Arc::clone(&services)))),
    );
    agents.insert(
        AgentKind::MedicalKnowledge,
        Arc::new(Agent::MedicalKnowledge(MedicalKnowledgeAgent::new(services))),
    );
    agents
}

/// 从 scratch 值解析结构体，缺失或格式不对时返回 None
pub(crate) fn scratch_as<T: for<'de> Deserialize<'de>>(ctx: &AgentContext, key: &str) -> Option<T> {
    ctx.scratch
        .get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

//! 编排器：请求入口
//!
//! 流程：会话加锁 → 读取快照 → 分类得到计划 → 按阶段图调度 Agent（同阶段并行）→ 合并结果 →
//! 安全过滤 → 原子提交 Turn → 封存本轮追踪。
//! 只有存储不可用会作为错误返回；Agent 失败、超时都以降级回复的形式正常提交。

use std::collections::HashMap;
use std::ops::RangeBounds;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::{Agent, AgentContext, AgentKind, AgentResult, AgentStatus, SubRequest};
use crate::core::classifier::{classify, LAST_PLAN_KEY};
use crate::core::{OrchestratorError, Plan, SafetyFilter, SafetyStatus, Stage};
use crate::memory::{keys, Session, SessionLocks, SessionStore, SessionSummary, Turn, UserProfile};
use crate::observability::{TraceEvent, TraceEventKind, TraceRecorder};
use crate::tools::HealthMetrics;

const SOURCE: &str = "orchestrator";

/// 返回给调用方的最终回复
#[derive(Debug, Clone, Serialize)]
pub struct FinalResponse {
    pub session_id: String,
    /// 本轮 Turn 序号
    pub turn_id: u64,
    pub response_text: String,
    pub safety_status: SafetyStatus,
    pub plan: Plan,
    pub degraded: bool,
    pub agent_statuses: Vec<(AgentKind, AgentStatus)>,
}

/// 编排器运行参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub context_window_turns: usize,
    pub request_timeout: Duration,
    pub degraded_message: String,
}

pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    agents: HashMap<AgentKind, Arc<Agent>>,
    recorder: Arc<TraceRecorder>,
    safety: SafetyFilter,
    locks: SessionLocks,
    settings: OrchestratorSettings,
}

/// 各阶段执行后的汇总
struct StageRun {
    results: Vec<AgentResult>,
    /// 存在某个阶段全部失败
    halted: bool,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        agents: HashMap<AgentKind, Arc<Agent>>,
        recorder: Arc<TraceRecorder>,
        safety: SafetyFilter,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            agents,
            recorder,
            safety,
            locks: SessionLocks::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    /// 处理一条用户请求；session_id 为空时新建会话
    pub async fn process(
        &self,
        session_id: Option<&str>,
        request: &str,
    ) -> Result<FinalResponse, OrchestratorError> {
        let session_id = resolve_session_id(session_id);
        let _guard = self.locks.acquire(&session_id).await;

        let session = self.store.load(&session_id).await?;
        let turn = session.next_seq();
        let classification = classify(request, &session.scratch);
        self.trace(
            &session_id,
            turn,
            TraceEventKind::Decision,
            json!({
                "decision": "plan",
                "plan": classification.plan,
                "signals": classification.signals,
                "ambiguous": classification.ambiguous,
                "follow_up": classification.follow_up,
            }),
        );
        tracing::info!(
            session = %session_id,
            turn,
            plan = classification.plan.as_str(),
            "request classified"
        );

        self.run_turn(session, turn, request.to_string(), classification.plan)
            .await
    }

    /// 结构化健康检查：指标直接交给监测 Agent，固定走监测 + 建议计划
    pub async fn process_health_check(
        &self,
        session_id: Option<&str>,
        metrics: HealthMetrics,
    ) -> Result<FinalResponse, OrchestratorError> {
        let session_id = resolve_session_id(session_id);
        let _guard = self.locks.acquire(&session_id).await;

        let mut session = self.store.load(&session_id).await?;
        let turn = session.next_seq();
        let request = describe_metrics(&metrics);
        let metrics = serde_json::to_value(&metrics)
            .map_err(|e| OrchestratorError::Config(format!("unserializable metrics: {e}")))?;
        // 仅本轮可见，不进入提交的 scratch
        session.scratch.insert(keys::PENDING_METRICS.to_string(), metrics);

        let plan = Plan::MonitoringThenRecommendation;
        self.trace(
            &session_id,
            turn,
            TraceEventKind::Decision,
            json!({ "decision": "plan", "plan": plan, "reason": "health_check" }),
        );
        self.run_turn(session, turn, request, plan).await
    }

    /// 保存用户画像，后续建议会据此调整
    pub async fn set_profile(
        &self,
        session_id: &str,
        profile: UserProfile,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.locks.acquire(session_id).await;
        let value = serde_json::to_value(&profile)
            .map_err(|e| OrchestratorError::Config(format!("unserializable profile: {e}")))?;
        self.store
            .write_scratch(session_id, keys::PROFILE, value)
            .await?;
        tracing::info!(session = %session_id, "profile updated");
        Ok(())
    }

    /// 会话历史摘要；未知会话返回空摘要，不会创建会话
    pub async fn session_history(&self, session_id: &str) -> Result<SessionSummary, OrchestratorError> {
        let summary = match self.store.get(session_id).await? {
            Some(session) => SessionSummary::from(&session),
            None => SessionSummary::from(&Session::new(session_id)),
        };
        Ok(summary)
    }

    /// 按 Turn 范围查询追踪事件
    pub fn trace_events(&self, session_id: &str, turns: impl RangeBounds<u64>) -> Vec<TraceEvent> {
        self.recorder.query(session_id, turns)
    }

    async fn run_turn(
        &self,
        session: Session,
        turn: u64,
        request: String,
        plan: Plan,
    ) -> Result<FinalResponse, OrchestratorError> {
        let session_id = session.id.clone();
        let deadline = Instant::now() + self.settings.request_timeout;
        let sub = SubRequest {
            text: request.clone(),
            plan,
        };

        let run = self.run_stages(&session, turn, &sub, deadline).await;
        let merged = merge(plan, &run.results);
        let degraded = run.halted || merged.is_none();
        let text = match merged {
            Some(text) if !degraded => text,
            _ => self.settings.degraded_message.clone(),
        };

        let outcome = self.safety.apply(&request, &text);
        self.trace(
            &session_id,
            turn,
            TraceEventKind::Decision,
            json!({
                "decision": "safety",
                "status": outcome.status,
                "reason": outcome.reason,
            }),
        );

        let mut scratch_writes: Vec<(String, Value)> = run
            .results
            .iter()
            .filter(|r| r.is_success())
            .flat_map(|r| r.scratch_writes.iter().cloned())
            .collect();
        scratch_writes.push((LAST_PLAN_KEY.to_string(), json!(plan.as_str())));

        let agent_statuses: Vec<(AgentKind, AgentStatus)> =
            run.results.iter().map(|r| (r.agent, r.status)).collect();
        let record = Turn {
            seq: turn,
            request,
            plan,
            agent_results: run.results,
            response: outcome.text.clone(),
            safety_status: outcome.status,
            degraded,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.commit(&session_id, record, scratch_writes).await {
            tracing::error!(session = %session_id, turn, error = %e, "turn commit failed");
            self.trace(
                &session_id,
                turn,
                TraceEventKind::Error,
                json!({ "stage": "commit", "error": e.to_string() }),
            );
            // 重试会复用同一 Turn 序号，先清掉这次尝试的事件
            self.recorder.discard(&session_id, turn);
            return Err(e.into());
        }
        self.recorder.seal(&session_id, turn);
        tracing::info!(
            session = %session_id,
            turn,
            plan = plan.as_str(),
            safety = outcome.status.as_str(),
            degraded,
            "turn committed"
        );

        Ok(FinalResponse {
            session_id,
            turn_id: turn,
            response_text: outcome.text,
            safety_status: outcome.status,
            plan,
            degraded,
            agent_statuses,
        })
    }

    async fn run_stages(
        &self,
        session: &Session,
        turn: u64,
        sub: &SubRequest,
        deadline: Instant,
    ) -> StageRun {
        let cancel = CancellationToken::new();
        let stages = sub.plan.stages();
        let mut by_stage: Vec<Vec<AgentResult>> = Vec::with_capacity(stages.len());
        let mut halted = false;
        let mut timed_out = false;

        for (index, stage) in stages.iter().enumerate() {
            if halted || timed_out {
                let status = if timed_out { "timeout" } else { "skipped" };
                self.trace(
                    &session.id,
                    turn,
                    TraceEventKind::Decision,
                    json!({ "decision": "stage_not_run", "stage": index, "reason": status }),
                );
                by_stage.push(
                    stage
                        .agents
                        .iter()
                        .map(|kind| {
                            if timed_out {
                                AgentResult::timeout(*kind)
                            } else {
                                AgentResult::skipped(*kind)
                            }
                        })
                        .collect(),
                );
                continue;
            }

            let upstream: Vec<AgentResult> = stage
                .depends_on
                .iter()
                .filter_map(|i| by_stage.get(*i))
                .flatten()
                .cloned()
                .collect();
            let (results, stage_timed_out) = self
                .run_stage(session, turn, sub, index, stage, upstream, &cancel, deadline)
                .await;

            if stage_timed_out {
                timed_out = true;
            } else if results.iter().all(|r| !r.is_success()) {
                halted = true;
                tracing::warn!(session = %session.id, turn, stage = index, "all agents in stage failed");
                self.trace(
                    &session.id,
                    turn,
                    TraceEventKind::Error,
                    json!({ "stage": index, "error": "all agents in stage failed" }),
                );
            }
            by_stage.push(results);
        }

        StageRun {
            results: by_stage.into_iter().flatten().collect(),
            halted,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        session: &Session,
        turn: u64,
        sub: &SubRequest,
        stage_index: usize,
        stage: &Stage,
        upstream: Vec<AgentResult>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> (Vec<AgentResult>, bool) {
        let recent_turns = session.recent_summaries(self.settings.context_window_turns);
        let mut slots: Vec<Option<AgentResult>> = vec![None; stage.agents.len()];
        let mut start_events: Vec<Option<u64>> = vec![None; stage.agents.len()];
        let mut pending = FuturesUnordered::new();

        for (slot, kind) in stage.agents.iter().enumerate() {
            let Some(agent) = self.agents.get(kind).cloned() else {
                tracing::error!(agent = %kind, "agent not configured");
                slots[slot] = Some(AgentResult::failed(*kind, "agent not configured"));
                continue;
            };
            let ctx = AgentContext {
                session_id: session.id.clone(),
                turn,
                scratch: session.scratch_slice(kind.scratch_keys()),
                recent_turns: recent_turns.clone(),
                upstream: upstream.clone(),
                cancel: cancel.clone(),
            };
            start_events[slot] = self.recorder.record(TraceEvent::new(
                session.id.clone(),
                turn,
                TraceEventKind::AgentStart,
                kind.as_str(),
                json!({ "stage": stage_index }),
            ));
            let sub = sub.clone();
            let handle = tokio::spawn(async move { agent.handle(&sub, &ctx).await });
            pending.push(async move { (slot, handle.await) });
        }

        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((slot, joined))) => {
                    let kind = stage.agents[slot];
                    let result = joined.unwrap_or_else(|e| {
                        tracing::error!(agent = %kind, error = %e, "agent task panicked");
                        AgentResult::failed(kind, format!("agent task panicked: {e}"))
                    });
                    slots[slot] = Some(result);
                }
                Ok(None) => break,
                Err(_) => {
                    // 已发出的调用在后台跑完，结果由 Agent 丢弃；这里只停止等待
                    timed_out = true;
                    cancel.cancel();
                    tracing::warn!(session = %session.id, turn, stage = stage_index, "request deadline exceeded");
                    self.trace(
                        &session.id,
                        turn,
                        TraceEventKind::Error,
                        json!({ "stage": stage_index, "error": "request deadline exceeded" }),
                    );
                    break;
                }
            }
        }

        let results = slots
            .into_iter()
            .zip(start_events)
            .zip(&stage.agents)
            .map(|((slot, start), kind)| {
                let mut result = slot.unwrap_or_else(|| AgentResult::timeout(*kind));
                if let Some(id) = start {
                    result.trace_events.insert(0, id);
                }
                if let Some(id) = self.recorder.record(TraceEvent::new(
                    session.id.clone(),
                    turn,
                    TraceEventKind::AgentEnd,
                    kind.as_str(),
                    json!({ "stage": stage_index, "status": result.status, "error": result.error }),
                )) {
                    result.trace_events.push(id);
                }
                result
            })
            .collect();
        (results, timed_out)
    }

    fn trace(&self, session_id: &str, turn: u64, kind: TraceEventKind, payload: Value) -> Option<u64> {
        self.recorder
            .record(TraceEvent::new(session_id, turn, kind, SOURCE, payload))
    }
}

fn resolve_session_id(session_id: Option<&str>) -> String {
    match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("session_{}", Uuid::new_v4().simple()),
    }
}

/// 合并成功结果的文本；没有可用文本时返回 None
fn merge(plan: Plan, results: &[AgentResult]) -> Option<String> {
    let text_of = |kind: AgentKind| {
        results
            .iter()
            .find(|r| r.agent == kind && r.is_success())
            .and_then(|r| r.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    };

    let parts: Vec<&str> = match plan {
        Plan::MonitoringThenRecommendation => {
            let recommendation = text_of(AgentKind::Recommendation);
            let mut parts: Vec<&str> = text_of(AgentKind::HealthMonitoring).into_iter().collect();
            match recommendation {
                Some(text) => parts.push(text),
                None => parts.extend(text_of(AgentKind::MedicalKnowledge)),
            }
            parts
        }
        _ => plan
            .stages()
            .iter()
            .flat_map(|s| s.agents.iter())
            .filter_map(|kind| text_of(*kind))
            .collect(),
    };

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// 把结构化指标写成一句请求文本，作为 Turn 的 request
fn describe_metrics(metrics: &HealthMetrics) -> String {
    let mut parts = Vec::new();
    if let Some(hr) = metrics.heart_rate {
        parts.push(format!("heart rate {hr} bpm"));
    }
    if let Some(bp) = &metrics.blood_pressure {
        parts.push(format!("blood pressure {bp}"));
    }
    if let Some(hours) = metrics.sleep_hours {
        parts.push(format!("slept {hours} hours"));
    }
    if let Some(steps) = metrics.steps {
        parts.push(format!("{steps} steps"));
    }
    if let Some(activity) = &metrics.activity_level {
        parts.push(format!("activity level {activity}"));
    }
    if parts.is_empty() {
        "Health check".to_string()
    } else {
        format!("Health check: {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(kind: AgentKind, text: &str) -> AgentResult {
        AgentResult::success(kind, json!({ "text": text }))
    }

    #[test]
    fn test_merge_monitoring_then_recommendation() {
        let results = vec![
            ok(AgentKind::HealthMonitoring, "Risk level: High."),
            ok(AgentKind::MedicalKnowledge, "General information."),
            ok(AgentKind::Recommendation, "Here is a plan."),
        ];
        let text = merge(Plan::MonitoringThenRecommendation, &results).unwrap();
        assert_eq!(text, "Risk level: High.\n\nHere is a plan.");
    }

    #[test]
    fn test_merge_falls_back_to_knowledge() {
        let results = vec![
            ok(AgentKind::HealthMonitoring, "Risk level: Low."),
            ok(AgentKind::MedicalKnowledge, "General information."),
            AgentResult::timeout(AgentKind::Recommendation),
        ];
        let text = merge(Plan::MonitoringThenRecommendation, &results).unwrap();
        assert!(text.ends_with("General information."));
    }

    #[test]
    fn test_merge_single_agent_passthrough() {
        let results = vec![ok(AgentKind::MedicalKnowledge, "answer")];
        assert_eq!(merge(Plan::KnowledgeOnly, &results).as_deref(), Some("answer"));
        let failed = vec![AgentResult::failed(AgentKind::MedicalKnowledge, "boom")];
        assert_eq!(merge(Plan::KnowledgeOnly, &failed), None);
    }

    #[test]
    fn test_session_id_resolution() {
        assert_eq!(resolve_session_id(Some("abc")), "abc");
        let generated = resolve_session_id(Some("  "));
        assert!(generated.starts_with("session_"));
        assert_eq!(generated.len(), "session_".len() + 32);
        assert_ne!(resolve_session_id(None), resolve_session_id(None));
    }

    #[test]
    fn test_describe_metrics() {
        let metrics = HealthMetrics {
            heart_rate: Some(72),
            sleep_hours: Some(8.0),
            ..HealthMetrics::default()
        };
        assert_eq!(describe_metrics(&metrics), "Health check: heart rate 72 bpm, slept 8 hours");
        assert_eq!(describe_metrics(&HealthMetrics::default()), "Health check");
    }
}

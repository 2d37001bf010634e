//! 编排器端到端测试：Mock 后端驱动完整的 分类 → 调度 → 合并 → 过滤 → 提交 流程

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use techhealth::agents::{AgentKind, AgentStatus};
use techhealth::config::{AppConfig, DEFAULT_DISCLAIMER, DEFAULT_REFUSAL_MESSAGE};
use techhealth::core::{OrchestratorError, Plan, SafetyStatus, StorageError};
use techhealth::llm::{BackendError, MockBackend};
use techhealth::memory::{keys, InMemorySessionStore, Session, SessionStore, Turn, UserProfile};
use techhealth::observability::TraceEventKind;
use techhealth::tools::{HealthMetrics, MetricsExtractTool, ToolRegistry, WellnessTipsTool};
use techhealth::{Orchestrator, OrchestratorBuilder};

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.agents.backend_retry_backoff_ms = 1;
    config
}

async fn build(backend: Arc<MockBackend>, config: AppConfig) -> Orchestrator {
    OrchestratorBuilder::new(config)
        .with_backend(backend)
        .build()
        .await
        .unwrap()
}

async fn turn(orchestrator: &Orchestrator, session_id: &str, seq: usize) -> Turn {
    orchestrator.store().load(session_id).await.unwrap().turns[seq].clone()
}

#[tokio::test]
async fn test_sleep_question_fans_out_then_recommends() {
    let backend = Arc::new(
        MockBackend::new()
            .with_delay("health_monitoring", Duration::from_millis(100))
            .with_delay("medical_knowledge", Duration::from_millis(100)),
    );
    let orchestrator = build(backend.clone(), test_config()).await;

    let response = orchestrator
        .process(Some("s1"), "I slept 4 hours, what should I do?")
        .await
        .unwrap();

    assert_eq!(response.plan, Plan::MonitoringThenRecommendation);
    assert!(!response.degraded);
    assert_eq!(response.safety_status, SafetyStatus::Rewritten);
    assert!(response.response_text.contains("Risk level: High"));
    assert!(response.response_text.contains("wellness plan"));
    assert!(response.response_text.ends_with(DEFAULT_DISCLAIMER));

    let calls = backend.calls();
    let find = |agent: &str| calls.iter().find(|c| c.agent == agent).unwrap().clone();
    let monitoring = find("health_monitoring");
    let knowledge = find("medical_knowledge");
    let recommendation = find("recommendation");

    // 两个并行 Agent 的调用区间重叠
    assert!(monitoring.started_at < knowledge.finished_at);
    assert!(knowledge.started_at < monitoring.finished_at);
    // 建议在二者都结束后才开始，且能看到二者的输出
    assert!(recommendation.started_at >= monitoring.finished_at);
    assert!(recommendation.started_at >= knowledge.finished_at);
    assert_eq!(recommendation.context["monitoring"]["risk_level"], "High");
    assert!(recommendation.context["knowledge"]["references"].is_array());
}

#[tokio::test]
async fn test_medication_question_is_blocked() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = build(backend, test_config()).await;

    let response = orchestrator
        .process(Some("s1"), "What medication should I take for my headache?")
        .await
        .unwrap();

    assert_eq!(response.plan, Plan::KnowledgeOnly);
    assert_eq!(response.safety_status, SafetyStatus::Blocked);
    assert_eq!(response.response_text, DEFAULT_REFUSAL_MESSAGE);

    let committed = turn(&orchestrator, "s1", 0).await;
    assert_eq!(committed.safety_status, SafetyStatus::Blocked);
    assert_eq!(committed.response, DEFAULT_REFUSAL_MESSAGE);
}

#[tokio::test]
async fn test_ambiguous_request_clarifies_without_specialists() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = build(backend.clone(), test_config()).await;

    let response = orchestrator.process(Some("s1"), "help").await.unwrap();

    assert_eq!(response.plan, Plan::Clarify);
    assert_ne!(response.safety_status, SafetyStatus::Blocked);
    assert!(backend.calls().is_empty());

    let committed = turn(&orchestrator, "s1", 0).await;
    assert_eq!(committed.agent_results.len(), 1);
    assert_eq!(committed.agent_results[0].agent, AgentKind::Coordinator);
    assert!(committed.agent_results[0].tool_invocations.is_empty());
    assert!(orchestrator
        .trace_events("s1", ..)
        .iter()
        .all(|e| e.kind != TraceEventKind::ToolCall));
}

#[tokio::test]
async fn test_follow_up_uses_previous_plan() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = build(backend, test_config()).await;

    orchestrator
        .process(Some("s1"), "I slept 4 hours, what should I do?")
        .await
        .unwrap();
    let response = orchestrator.process(Some("s1"), "ok, and then?").await.unwrap();
    assert_eq!(response.plan, Plan::RecommendationOnly);
    assert_eq!(response.turn_id, 1);
}

#[tokio::test]
async fn test_unknown_tool_degrades_but_commits() {
    let backend = Arc::new(MockBackend::new());
    let mut tools = ToolRegistry::new();
    tools.register(MetricsExtractTool);
    tools.register(WellnessTipsTool);
    let orchestrator = OrchestratorBuilder::new(test_config())
        .with_backend(backend)
        .with_tools(tools)
        .build()
        .await
        .unwrap();

    let response = orchestrator
        .process(Some("s1"), "What are the benefits of regular cardiovascular exercise?")
        .await
        .unwrap();

    assert_eq!(response.plan, Plan::KnowledgeOnly);
    assert!(response.degraded);
    assert_eq!(
        response.response_text,
        AppConfig::default().orchestrator.degraded_message
    );

    let committed = turn(&orchestrator, "s1", 0).await;
    let knowledge = &committed.agent_results[0];
    assert_eq!(knowledge.status, AgentStatus::Failed);
    assert!(knowledge.tool_invocations.is_empty());
    assert!(knowledge.error.as_deref().unwrap().contains("Unknown tool"));

    let errors: Vec<_> = orchestrator
        .trace_events("s1", 0..1)
        .into_iter()
        .filter(|e| e.kind == TraceEventKind::Error)
        .collect();
    assert!(errors
        .iter()
        .any(|e| e.payload.get("tool").and_then(Value::as_str) == Some("knowledge_lookup")));
}

#[tokio::test]
async fn test_whole_stage_failure_skips_dependents() {
    let backend = Arc::new(
        MockBackend::new()
            .with_failures("health_monitoring", 10, BackendError::Unavailable("down".into()))
            .with_failures("medical_knowledge", 10, BackendError::Unavailable("down".into())),
    );
    let orchestrator = build(backend.clone(), test_config()).await;

    let response = orchestrator
        .process(Some("s1"), "I slept 4 hours, what should I do?")
        .await
        .unwrap();

    assert!(response.degraded);
    assert_eq!(
        response.agent_statuses,
        vec![
            (AgentKind::HealthMonitoring, AgentStatus::Failed),
            (AgentKind::MedicalKnowledge, AgentStatus::Failed),
            (AgentKind::Recommendation, AgentStatus::Skipped),
        ]
    );
    // 每个 Agent 首次失败后重试一次
    assert_eq!(backend.call_count("health_monitoring"), 2);
    assert_eq!(backend.call_count("medical_knowledge"), 2);
    assert_eq!(backend.call_count("recommendation"), 0);

    let history = orchestrator.session_history("s1").await.unwrap();
    assert_eq!(history.turn_count, 1);
    assert!(orchestrator
        .trace_events("s1", ..)
        .iter()
        .any(|e| e.kind == TraceEventKind::Error));
}

#[tokio::test]
async fn test_backend_retry_recovers() {
    let backend = Arc::new(MockBackend::new().with_failures(
        "medical_knowledge",
        1,
        BackendError::RateLimited("slow down".into()),
    ));
    let orchestrator = build(backend.clone(), test_config()).await;

    let response = orchestrator
        .process(Some("s1"), "What are the benefits of regular cardiovascular exercise?")
        .await
        .unwrap();

    assert!(!response.degraded);
    assert_eq!(response.agent_statuses, vec![(AgentKind::MedicalKnowledge, AgentStatus::Success)]);
    assert_eq!(backend.call_count("medical_knowledge"), 2);
}

#[tokio::test]
async fn test_concurrent_requests_on_one_session_are_serialized() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = Arc::new(build(backend, test_config()).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .process(Some("shared"), &format!("any tips to be more active? #{i}"))
                .await
                .unwrap()
                .turn_id
        }));
    }
    let mut turn_ids = HashSet::new();
    for handle in handles {
        turn_ids.insert(handle.await.unwrap());
    }
    assert_eq!(turn_ids, (0..8).collect::<HashSet<u64>>());

    let session = orchestrator.store().load("shared").await.unwrap();
    let seqs: Vec<u64> = session.turns.iter().map(|t| t.seq).collect();
    assert_eq!(seqs, (0..8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_request_deadline_marks_timeout() {
    let backend = Arc::new(
        MockBackend::new().with_delay("health_monitoring", Duration::from_secs(5)),
    );
    let mut config = test_config();
    config.orchestrator.request_timeout_ms = 100;
    let orchestrator = build(backend, config).await;

    let started = std::time::Instant::now();
    let response = orchestrator
        .process(Some("s1"), "my heart rate is 72 bpm")
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.plan, Plan::MonitoringOnly);
    assert!(response.degraded);
    assert_eq!(
        response.agent_statuses,
        vec![(AgentKind::HealthMonitoring, AgentStatus::Timeout)]
    );
    assert_eq!(orchestrator.session_history("s1").await.unwrap().turn_count, 1);
    assert!(orchestrator.recorder().is_sealed("s1", 0));
}

#[tokio::test]
async fn test_timed_out_backend_call_runs_to_completion() {
    let backend = Arc::new(
        MockBackend::new().with_delay("health_monitoring", Duration::from_millis(300)),
    );
    let mut config = test_config();
    config.orchestrator.request_timeout_ms = 100;
    let orchestrator = build(backend.clone(), config).await;

    let response = orchestrator
        .process(Some("s1"), "my heart rate is 72 bpm")
        .await
        .unwrap();
    assert_eq!(
        response.agent_statuses,
        vec![(AgentKind::HealthMonitoring, AgentStatus::Timeout)]
    );

    tokio::time::sleep(Duration::from_millis(600)).await;
    // 已发出的后端调用跑完了，但结果没有进入已封存的 Turn
    assert_eq!(backend.call_count("health_monitoring"), 1);
    assert!(orchestrator
        .trace_events("s1", 0..1)
        .iter()
        .all(|e| e.payload.get("backend").is_none()));
    let committed = turn(&orchestrator, "s1", 0).await;
    assert_eq!(committed.agent_results[0].status, AgentStatus::Timeout);
}

#[tokio::test]
async fn test_partial_stage_failure_keeps_siblings() {
    let backend = Arc::new(MockBackend::new().with_failures(
        "medical_knowledge",
        10,
        BackendError::Unavailable("down".into()),
    ));
    let orchestrator = build(backend.clone(), test_config()).await;

    let response = orchestrator
        .process(Some("s1"), "I slept 4 hours, what should I do?")
        .await
        .unwrap();

    assert!(!response.degraded);
    assert_eq!(
        response.agent_statuses,
        vec![
            (AgentKind::HealthMonitoring, AgentStatus::Success),
            (AgentKind::MedicalKnowledge, AgentStatus::Failed),
            (AgentKind::Recommendation, AgentStatus::Success),
        ]
    );
    assert!(response.response_text.contains("Risk level: High"));

    let recommendation = backend
        .calls()
        .into_iter()
        .find(|c| c.agent == "recommendation")
        .unwrap();
    assert_eq!(recommendation.context["monitoring"]["risk_level"], "High");
    assert!(recommendation.context["knowledge"].is_null());

    assert!(orchestrator
        .trace_events("s1", 0..1)
        .iter()
        .any(|e| e.kind == TraceEventKind::Error && e.source == "medical_knowledge"));
}

#[tokio::test]
async fn test_session_history_does_not_create_session() {
    let orchestrator = build(Arc::new(MockBackend::new()), test_config()).await;

    let history = orchestrator.session_history("ghost").await.unwrap();
    assert_eq!(history.session_id, "ghost");
    assert_eq!(history.turn_count, 0);
    assert!(orchestrator.store().get("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_context_window_is_bounded() {
    let backend = Arc::new(MockBackend::new());
    let mut config = test_config();
    config.orchestrator.context_window_turns = 2;
    let orchestrator = build(backend.clone(), config).await;

    for i in 0..5 {
        orchestrator
            .process(Some("s1"), &format!("any tips to be more active? #{i}"))
            .await
            .unwrap();
    }

    let calls = backend.calls();
    let last = calls.last().unwrap();
    let recent = last.context["recent_turns"].as_array().unwrap();
    let seqs: Vec<u64> = recent.iter().filter_map(|t| t["seq"].as_u64()).collect();
    assert_eq!(seqs, vec![2, 3]);
}

#[tokio::test]
async fn test_health_check_uses_profile_and_clears_pending_metrics() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = build(backend, test_config()).await;

    orchestrator
        .set_profile(
            "s1",
            UserProfile {
                age: Some(28),
                fitness_goal: Some("weight loss".into()),
                dietary_preferences: Some("vegetarian".into()),
            },
        )
        .await
        .unwrap();
    let response = orchestrator
        .process_health_check(
            Some("s1"),
            HealthMetrics {
                sleep_hours: Some(4.0),
                heart_rate: Some(72),
                ..HealthMetrics::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.plan, Plan::MonitoringThenRecommendation);
    assert!(response.response_text.contains("Risk level: High"));

    let committed = turn(&orchestrator, "s1", 0).await;
    assert!(committed.request.starts_with("Health check"));
    let recommendation = committed
        .agent_results
        .iter()
        .find(|r| r.agent == AgentKind::Recommendation)
        .unwrap();
    let nutrition = recommendation.payload.as_ref().unwrap()["tips"]["nutrition"]
        .as_array()
        .unwrap()
        .clone();
    assert!(nutrition
        .iter()
        .any(|t| t.as_str().unwrap_or_default().contains("plant proteins")));

    let store = orchestrator.store();
    assert_eq!(store.read_scratch("s1", keys::PENDING_METRICS).await.unwrap(), None);
    assert!(store.read_scratch("s1", keys::LAST_METRICS).await.unwrap().is_some());
    assert_eq!(
        store.read_scratch("s1", "last_plan").await.unwrap(),
        Some(Value::from("MonitoringThenRecommendation"))
    );
}

#[tokio::test]
async fn test_trace_is_ordered_and_sealed() {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = build(backend, test_config()).await;

    let response = orchestrator.process(None, "my heart rate is 72 bpm").await.unwrap();
    let session_id = response.session_id.clone();
    assert!(session_id.starts_with("session_"));

    let events = orchestrator.trace_events(&session_id, 0..1);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..events.len() as u64).collect::<Vec<_>>());
    assert_eq!(events.first().unwrap().kind, TraceEventKind::Decision);
    assert_eq!(events.last().unwrap().payload["decision"], "safety");

    let start = events.iter().position(|e| e.kind == TraceEventKind::AgentStart).unwrap();
    let tool = events.iter().position(|e| e.kind == TraceEventKind::ToolCall).unwrap();
    let end = events.iter().position(|e| e.kind == TraceEventKind::AgentEnd).unwrap();
    assert!(start < tool && tool < end);

    let committed = turn(&orchestrator, &session_id, 0).await;
    let referenced = orchestrator.recorder().get(&committed.agent_results[0].trace_events);
    assert!(referenced.iter().all(|e| e.session_id == session_id && e.turn == 0));
    assert!(orchestrator.recorder().is_sealed(&session_id, 0));
}

struct FailingStore {
    fail_load: bool,
}

#[async_trait]
impl SessionStore for FailingStore {
    async fn load(&self, session_id: &str) -> Result<Session, StorageError> {
        if self.fail_load {
            return Err(StorageError::Unavailable("store offline".into()));
        }
        Ok(Session::new(session_id))
    }

    async fn get(&self, _: &str) -> Result<Option<Session>, StorageError> {
        Err(StorageError::Unavailable("store offline".into()))
    }

    async fn commit(&self, _: &str, _: Turn, _: Vec<(String, Value)>) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("store offline".into()))
    }

    async fn read_scratch(&self, _: &str, _: &str) -> Result<Option<Value>, StorageError> {
        Err(StorageError::Unavailable("store offline".into()))
    }

    async fn write_scratch(&self, _: &str, _: &str, _: Value) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("store offline".into()))
    }
}

#[tokio::test]
async fn test_storage_unavailable_is_the_only_hard_error() {
    for fail_load in [true, false] {
        let orchestrator = OrchestratorBuilder::new(test_config())
            .with_backend(Arc::new(MockBackend::new()))
            .with_store(Arc::new(FailingStore { fail_load }))
            .build()
            .await
            .unwrap();

        let err = orchestrator
            .process(Some("s1"), "any tips to be more active?")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::StorageUnavailable(_)));
        assert!(!orchestrator.recorder().is_sealed("s1", 0));
    }
}

/// 第一次提交失败，之后正常
struct FlakyCommitStore {
    inner: InMemorySessionStore,
    failed_once: AtomicBool,
}

#[async_trait]
impl SessionStore for FlakyCommitStore {
    async fn load(&self, session_id: &str) -> Result<Session, StorageError> {
        self.inner.load(session_id).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        self.inner.get(session_id).await
    }

    async fn commit(&self, session_id: &str, turn: Turn, writes: Vec<(String, Value)>) -> Result<(), StorageError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".into()));
        }
        self.inner.commit(session_id, turn, writes).await
    }

    async fn read_scratch(&self, session_id: &str, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.read_scratch(session_id, key).await
    }

    async fn write_scratch(&self, session_id: &str, key: &str, value: Value) -> Result<(), StorageError> {
        self.inner.write_scratch(session_id, key, value).await
    }
}

#[tokio::test]
async fn test_retry_after_commit_failure_has_clean_trace() {
    let orchestrator = OrchestratorBuilder::new(test_config())
        .with_backend(Arc::new(MockBackend::new()))
        .with_store(Arc::new(FlakyCommitStore {
            inner: InMemorySessionStore::new(),
            failed_once: AtomicBool::new(false),
        }))
        .build()
        .await
        .unwrap();

    let err = orchestrator
        .process(Some("s1"), "my heart rate is 72 bpm")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StorageUnavailable(_)));
    assert!(orchestrator.trace_events("s1", 0..1).is_empty());

    let response = orchestrator
        .process(Some("s1"), "my heart rate is 72 bpm")
        .await
        .unwrap();
    assert_eq!(response.turn_id, 0);

    let events = orchestrator.trace_events("s1", 0..1);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..events.len() as u64).collect::<Vec<_>>());
    assert!(events.iter().all(|e| e.attempt == 1));
    let plans = events
        .iter()
        .filter(|e| e.payload["decision"] == "plan")
        .count();
    assert_eq!(plans, 1);
    assert!(orchestrator.recorder().is_sealed("s1", 0));
}

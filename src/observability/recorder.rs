//! 追踪记录器
//!
//! 只追加：record 在锁内分配 id / seq 并写入内存索引，然后把事件发给后台写入任务。
//! 写入任务负责持久化 sink 的 I/O；sink 不可用时事件进入本地回退缓冲，下次写入前先补写。
//! 记录永远不会让调用方失败，也不会在锁内等待磁盘。
//! Turn 提交后被封存（seal），之后到达的同一 Turn 事件直接丢弃。
//! 提交失败的 Turn 可以被 discard：清掉该次尝试的事件，重试时 attempt 加一、seq 从 0 重新开始。

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeBounds;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::core::StorageError;
use crate::observability::TraceEvent;

const DEFAULT_FALLBACK_CAPACITY: usize = 10_000;

/// 持久化 sink（外部协作者，可选）
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn write(&self, event: &TraceEvent) -> Result<(), StorageError>;
}

enum WriterMsg {
    Event(TraceEvent),
    Flush(oneshot::Sender<()>),
}

/// sink 写不进去的事件，按发出顺序排队
struct Fallback {
    queue: Mutex<VecDeque<TraceEvent>>,
    capacity: usize,
}

impl Fallback {
    fn lock(&self) -> MutexGuard<'_, VecDeque<TraceEvent>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, event: TraceEvent) {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            tracing::warn!("trace fallback buffer full, oldest event dropped from sink backlog");
        }
        queue.push_back(event);
    }

    fn front(&self) -> Option<TraceEvent> {
        self.lock().front().cloned()
    }
}

#[derive(Default)]
struct RecorderState {
    events: Vec<TraceEvent>,
    next_id: u64,
    turn_seq: HashMap<(String, u64), u64>,
    attempts: HashMap<(String, u64), u32>,
    sealed: HashSet<(String, u64)>,
}

/// 追踪记录器：由构建器创建后注入编排器与各 Agent
pub struct TraceRecorder {
    state: Mutex<RecorderState>,
    writer: Option<mpsc::UnboundedSender<WriterMsg>>,
    fallback: Arc<Fallback>,
}

impl TraceRecorder {
    /// 仅内存
    pub fn new() -> Self {
        Self::with_fallback_capacity(DEFAULT_FALLBACK_CAPACITY)
    }

    pub fn with_fallback_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RecorderState::default()),
            writer: None,
            fallback: Arc::new(Fallback {
                queue: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// 挂上持久化 sink 并启动写入任务（需在 tokio 运行时内调用）
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(sink, rx, Arc::clone(&self.fallback)));
        self.writer = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 记录事件，返回分配的 id；所属 Turn 已封存时返回 None
    pub fn record(&self, mut event: TraceEvent) -> Option<u64> {
        let mut state = self.lock();
        let key = (event.session_id.clone(), event.turn);
        if state.sealed.contains(&key) {
            tracing::warn!(
                session = %event.session_id,
                turn = event.turn,
                kind = ?event.kind,
                "trace event for committed turn dropped"
            );
            return None;
        }

        event.id = state.next_id;
        state.next_id += 1;
        event.attempt = state.attempts.get(&key).copied().unwrap_or(0);
        let seq = state.turn_seq.entry(key).or_insert(0);
        event.seq = *seq;
        *seq += 1;

        // 在锁内入队，保证写入任务看到的顺序与 id 顺序一致
        if let Some(writer) = &self.writer {
            if writer.send(WriterMsg::Event(event.clone())).is_err() {
                tracing::warn!("trace writer stopped, buffering event locally");
                self.fallback.push(event.clone());
            }
        }
        let id = event.id;
        state.events.push(event);
        Some(id)
    }

    /// 封存 Turn：之后该 Turn 不再接受新事件
    pub fn seal(&self, session_id: &str, turn: u64) {
        self.lock().sealed.insert((session_id.to_string(), turn));
    }

    pub fn is_sealed(&self, session_id: &str, turn: u64) -> bool {
        self.lock().sealed.contains(&(session_id.to_string(), turn))
    }

    /// 丢弃未封存 Turn 的当前尝试：事件移出内存索引，下一次尝试的 attempt 加一、seq 归零。
    /// 已写入 sink 的行保留，靠 attempt 字段区分。
    pub fn discard(&self, session_id: &str, turn: u64) {
        let mut state = self.lock();
        let key = (session_id.to_string(), turn);
        if state.sealed.contains(&key) {
            return;
        }
        state
            .events
            .retain(|e| !(e.session_id == session_id && e.turn == turn));
        state.turn_seq.remove(&key);
        *state.attempts.entry(key).or_insert(0) += 1;
    }

    /// 按 Turn 范围查询会话事件，按发出顺序返回
    pub fn query(&self, session_id: &str, turns: impl RangeBounds<u64>) -> Vec<TraceEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.session_id == session_id && turns.contains(&e.turn))
            .cloned()
            .collect()
    }

    /// 按 id 取事件（AgentResult 中的引用）
    pub fn get(&self, ids: &[u64]) -> Vec<TraceEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| ids.contains(&e.id))
            .cloned()
            .collect()
    }

    /// 等待写入任务处理完此前入队的全部事件
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(WriterMsg::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// 尚未写入 sink 的事件数
    pub fn fallback_len(&self) -> usize {
        self.fallback.lock().len()
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_writer(
    sink: Arc<dyn TraceSink>,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    fallback: Arc<Fallback>,
) {
    while let Some(msg) = rx.recv().await {
        let event = match msg {
            WriterMsg::Event(event) => event,
            WriterMsg::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        while let Some(pending) = fallback.front() {
            if sink.write(&pending).await.is_err() {
                break;
            }
            fallback.lock().pop_front();
        }

        let backlog = !fallback.lock().is_empty();
        let result = if !backlog {
            sink.write(&event).await
        } else {
            Err(StorageError::Unavailable("fallback backlog pending".into()))
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "trace sink unavailable, buffering event locally");
            fallback.push(event);
        }
    }
}

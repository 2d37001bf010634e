//! 会话存储抽象层
//!
//! 定义统一的会话存储接口；内存实现按会话独立加锁，并可写穿到持久化 sink。
//! 提交是原子的：先写 sink，成功后才更新内存，失败时内存保持不变。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::core::StorageError;
use crate::memory::{Session, Turn};

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取会话快照，不存在时创建
    async fn load(&self, session_id: &str) -> Result<Session, StorageError>;

    /// 只读查询：会话不存在时返回 None，不创建
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StorageError>;

    /// 原子提交：Turn 与本轮 scratch 写入要么全部可见，要么全部不可见
    async fn commit(
        &self,
        session_id: &str,
        turn: Turn,
        scratch_writes: Vec<(String, Value)>,
    ) -> Result<(), StorageError>;

    async fn append_turn(&self, session_id: &str, turn: Turn) -> Result<(), StorageError> {
        self.commit(session_id, turn, Vec::new()).await
    }

    async fn read_scratch(&self, session_id: &str, key: &str) -> Result<Option<Value>, StorageError>;

    async fn write_scratch(&self, session_id: &str, key: &str, value: Value) -> Result<(), StorageError>;
}

/// 持久化 sink（外部协作者，可选）；在持有单个会话的锁时被 await，不能阻塞线程
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn persist_turn(
        &self,
        session: &Session,
        turn: &Turn,
        scratch_writes: &[(String, Value)],
    ) -> Result<(), StorageError>;

    async fn persist_scratch(&self, session: &Session, key: &str, value: &Value) -> Result<(), StorageError>;
}

/// 内存会话存储
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    sink: Option<Arc<dyn SessionSink>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 用持久化回放出的会话预填充（启动时调用）
    pub async fn restore(&self, sessions: Vec<Session>) {
        let mut map = self.sessions.write().await;
        for session in sessions {
            map.insert(session.id.clone(), Arc::new(Mutex::new(session)));
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return Arc::clone(existing);
        }
        let mut map = self.sessions.write().await;
        Arc::clone(
            map.entry(session_id.to_string())
                .or_insert_with(|| {
                    tracing::info!(session = %session_id, "session created");
                    Arc::new(Mutex::new(Session::new(session_id)))
                }),
        )
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Session, StorageError> {
        let entry = self.entry(session_id).await;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        let entry = self.sessions.read().await.get(session_id).cloned();
        match entry {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn commit(
        &self,
        session_id: &str,
        turn: Turn,
        scratch_writes: Vec<(String, Value)>,
    ) -> Result<(), StorageError> {
        let entry = self.entry(session_id).await;
        let mut session = entry.lock().await;

        let expected = session.next_seq();
        if turn.seq != expected {
            return Err(StorageError::SequenceConflict {
                expected,
                got: turn.seq,
            });
        }

        if let Some(sink) = &self.sink {
            sink.persist_turn(&session, &turn, &scratch_writes).await?;
        }

        for (key, value) in scratch_writes {
            session.scratch.insert(key, value);
        }
        session.turns.push(turn);
        Ok(())
    }

    async fn read_scratch(&self, session_id: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let entry = self.entry(session_id).await;
        let session = entry.lock().await;
        Ok(session.scratch.get(key).cloned())
    }

    async fn write_scratch(&self, session_id: &str, key: &str, value: Value) -> Result<(), StorageError> {
        let entry = self.entry(session_id).await;
        let mut session = entry.lock().await;
        if let Some(sink) = &self.sink {
            sink.persist_scratch(&session, key, &value).await?;
        }
        session.scratch.insert(key.to_string(), value);
        Ok(())
    }
}

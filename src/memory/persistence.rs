//! JSON Lines 持久化
//!
//! 目录下三个追加写文件：turns.jsonl（Turn 与本轮 scratch）、scratch.jsonl（单独的 scratch 写入）、
//! trace.jsonl（追踪事件）。追加写走 tokio::fs，不阻塞运行时线程；
//! 启动时的 load_sessions / load_trace 是同步读，异步上下文里应放进 spawn_blocking。

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::StorageError;
use crate::memory::{Session, SessionSink, Turn};
use crate::observability::{TraceEvent, TraceSink};

const TURNS_FILE: &str = "turns.jsonl";
const SCRATCH_FILE: &str = "scratch.jsonl";
const TRACE_FILE: &str = "trace.jsonl";

#[derive(Serialize, Deserialize)]
struct TurnRecord {
    session_id: String,
    session_created_at: DateTime<Utc>,
    turn: Turn,
    #[serde(default)]
    scratch_writes: Vec<(String, Value)>,
}

#[derive(Serialize, Deserialize)]
struct ScratchRecord {
    session_id: String,
    session_created_at: DateTime<Utc>,
    key: String,
    value: Value,
}

/// 追加写的 JSON Lines sink，同时实现会话与追踪两种 sink
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    /// 打开（必要时创建）目录
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        f.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    fn read_lines<T: for<'de> Deserialize<'de>>(&self, file: &str) -> Result<Vec<T>, StorageError> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    /// 回放持久化的 Turn 与 scratch，重建会话
    pub fn load_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let mut sessions: HashMap<String, Session> = HashMap::new();

        for record in self.read_lines::<TurnRecord>(TURNS_FILE)? {
            let session = sessions
                .entry(record.session_id.clone())
                .or_insert_with(|| Session {
                    created_at: record.session_created_at,
                    ..Session::new(record.session_id.clone())
                });
            if record.turn.seq != session.next_seq() {
                tracing::warn!(
                    session = %record.session_id,
                    seq = record.turn.seq,
                    "skipping out-of-sequence persisted turn"
                );
                continue;
            }
            for (key, value) in record.scratch_writes {
                session.scratch.insert(key, value);
            }
            session.turns.push(record.turn);
        }

        for record in self.read_lines::<ScratchRecord>(SCRATCH_FILE)? {
            let session = sessions
                .entry(record.session_id.clone())
                .or_insert_with(|| Session {
                    created_at: record.session_created_at,
                    ..Session::new(record.session_id.clone())
                });
            session.scratch.insert(record.key, record.value);
        }

        let mut out: Vec<Session> = sessions.into_values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// 读取全部持久化的追踪事件（按写入顺序）
    pub fn load_trace(&self) -> Result<Vec<TraceEvent>, StorageError> {
        self.read_lines(TRACE_FILE)
    }
}

#[async_trait]
impl SessionSink for JsonlSink {
    async fn persist_turn(
        &self,
        session: &Session,
        turn: &Turn,
        scratch_writes: &[(String, Value)],
    ) -> Result<(), StorageError> {
        self.append(
            TURNS_FILE,
            &TurnRecord {
                session_id: session.id.clone(),
                session_created_at: session.created_at,
                turn: turn.clone(),
                scratch_writes: scratch_writes.to_vec(),
            },
        )
        .await
    }

    async fn persist_scratch(&self, session: &Session, key: &str, value: &Value) -> Result<(), StorageError> {
        self.append(
            SCRATCH_FILE,
            &ScratchRecord {
                session_id: session.id.clone(),
                session_created_at: session.created_at,
                key: key.to_string(),
                value: value.clone(),
            },
        )
        .await
    }
}

#[async_trait]
impl TraceSink for JsonlSink {
    async fn write(&self, event: &TraceEvent) -> Result<(), StorageError> {
        self.append(TRACE_FILE, event).await
    }
}

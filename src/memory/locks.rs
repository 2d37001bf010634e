//! 会话级串行化：同一会话的请求排队执行，不同会话互不阻塞

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 每个会话一把异步锁；锁表本身只在取锁瞬间加同步锁
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取会话锁，持有期间同一会话的其它请求等待
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("s").await;

        let locks2 = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("s").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_sessions_independent() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(b.is_ok());
    }
}

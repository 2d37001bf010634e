//! 记忆层：会话数据模型、会话存储、会话级锁、JSON Lines 持久化

pub mod locks;
pub mod persistence;
pub mod session;
pub mod store;

pub use locks::SessionLocks;
pub use persistence::JsonlSink;
pub use session::{keys, Session, SessionSummary, Turn, TurnSummary, UserProfile};
pub use store::{InMemorySessionStore, SessionSink, SessionStore};

//! 核心编排层：错误类型、请求分类、路由计划、安全过滤、编排器与构建器

pub mod builder;
pub mod classifier;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod safety;

pub use builder::OrchestratorBuilder;
pub use classifier::{classify, Classification, Signals};
pub use error::{AgentError, OrchestratorError, StorageError};
pub use orchestrator::{FinalResponse, Orchestrator, OrchestratorSettings};
pub use plan::{Plan, Stage};
pub use safety::{FilterOutcome, SafetyFilter, SafetyStatus};

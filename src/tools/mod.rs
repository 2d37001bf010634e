//! 工具箱：注册表与内置健康工具（指标抽取、建议目录、知识检索）

pub mod knowledge;
pub mod metrics;
pub mod registry;
pub mod schema;
pub mod tips;

pub use knowledge::KnowledgeLookupTool;
pub use metrics::{HealthMetrics, MetricsExtractTool, RiskLevel};
pub use registry::{Tool, ToolError, ToolRegistry};
pub use schema::{KnowledgeLookupArgs, MetricsExtractArgs, WellnessTipsArgs};
pub use tips::WellnessTipsTool;

/// 内置工具名
pub const METRICS_EXTRACT: &str = "metrics_extract";
pub const WELLNESS_TIPS: &str = "wellness_tips";
pub const KNOWLEDGE_LOOKUP: &str = "knowledge_lookup";

/// 注册全部内置工具
pub fn register_builtin(registry: &mut ToolRegistry) {
    registry.register(MetricsExtractTool);
    registry.register(WellnessTipsTool);
    registry.register(KnowledgeLookupTool);
}

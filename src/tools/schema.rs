//! 工具参数 JSON Schema 生成（schemars）
//!
//! 内置工具的参数结构在这里声明，注册表对外暴露的 input_schema 由 schemars 自动生成，保证与反序列化一致。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::metrics::HealthMetrics;

/// metrics_extract 参数
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MetricsExtractArgs {
    /// 用户原始描述，如 "I slept 4 hours"
    pub text: String,
    /// 结构化上报的指标（健康检查流程），优先于文本抽取
    #[serde(default)]
    pub reported: Option<HealthMetrics>,
}

/// wellness_tips 参数
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WellnessTipsArgs {
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub fitness_goal: Option<String>,
    #[serde(default)]
    pub dietary_preferences: Option<String>,
}

/// knowledge_lookup 参数
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KnowledgeLookupArgs {
    pub question: String,
}

/// 将类型 T 的 JSON Schema 转为 serde_json::Value
pub fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_args_schema_requires_text() {
        let schema = schema_value::<MetricsExtractArgs>();
        let required = schema["required"].as_array().cloned().unwrap_or_default();
        assert!(required.iter().any(|r| r == "text"));
    }
}

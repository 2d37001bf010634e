//! 健康监测 Agent
//!
//! 从请求文本（以及调用方直接提交的 pending_metrics）中抽取指标并评估风险，
//! 再由后端生成面向用户的监测摘要。有指标时把结果写回 scratch 供后续轮次参考。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::agents::{scratch_as, AgentContext, AgentOutput, AgentServices, SubRequest, Toolkit};
use crate::core::AgentError;
use crate::memory::keys;
use crate::tools::{HealthMetrics, METRICS_EXTRACT};

pub struct HealthMonitoringAgent {
    services: Arc<AgentServices>,
}

impl HealthMonitoringAgent {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub async fn run(
        &self,
        request: &SubRequest,
        ctx: &AgentContext,
        kit: &mut Toolkit<'_>,
    ) -> Result<AgentOutput, AgentError> {
        let reported: Option<HealthMetrics> = scratch_as(ctx, keys::PENDING_METRICS);
        let assessment = kit
            .call_tool(
                METRICS_EXTRACT,
                json!({ "text": request.text, "reported": reported }),
            )
            .await?;

        let metrics = assessment.get("metrics").cloned().unwrap_or(Value::Null);
        let risk = assessment.get("risk_level").cloned().unwrap_or(Value::Null);
        let concerns = assessment.get("concerns").cloned().unwrap_or_else(|| json!([]));
        let previous = ctx.scratch.get(keys::LAST_METRICS).cloned().unwrap_or(Value::Null);

        let prompt = format!(
            "Summarise the user's health readings, state the risk level and list key concerns. \
             Do not diagnose.\nUser said: {}",
            request.text
        );
        let summary = kit
            .generate(
                &prompt,
                json!({
                    "agent": "health_monitoring",
                    "metrics": assessment,
                    "previous_metrics": previous,
                    "recent_turns": ctx.recent_turns,
                }),
            )
            .await?;

        let has_readings = metrics
            .as_object()
            .is_some_and(|m| m.values().any(|v| !v.is_null()));
        let mut output = AgentOutput::new(json!({
            "text": summary,
            "metrics": metrics,
            "risk_level": risk,
            "concerns": concerns,
            "monitoring_frequency": assessment.get("monitoring_frequency").cloned().unwrap_or(Value::Null),
        }));
        if has_readings {
            output = output
                .write(keys::LAST_METRICS, metrics)
                .write(keys::LAST_RISK, risk)
                .write(keys::LAST_CONCERNS, concerns);
        }
        Ok(output)
    }
}

//! 建议 Agent
//!
//! 输入：上游监测结果（关注点、风险等级）、上游知识结果、用户画像。没有上游监测时退回到 scratch 中
//! 最近一次监测的结论。输出按饮食 / 运动 / 生活方式分组的建议。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::agents::knowledge::references;
use crate::agents::{scratch_as, AgentContext, AgentKind, AgentOutput, AgentServices, SubRequest, Toolkit};
use crate::core::AgentError;
use crate::memory::{keys, UserProfile};
use crate::tools::{WellnessTipsArgs, WELLNESS_TIPS};

pub struct RecommendationAgent {
    services: Arc<AgentServices>,
}

impl RecommendationAgent {
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
        let monitoring = ctx
            .upstream_success(AgentKind::HealthMonitoring)
            .and_then(|r| r.payload.clone());
        let knowledge = ctx
            .upstream_success(AgentKind::MedicalKnowledge)
            .and_then(|r| r.payload.clone());
        let profile: UserProfile = scratch_as(ctx, keys::PROFILE).unwrap_or_default();

        let (concerns, risk_level) = match &monitoring {
            Some(payload) => (
                string_list(payload.get("concerns")),
                payload.get("risk_level").and_then(|v| v.as_str()).map(String::from),
            ),
            None => (
                string_list(ctx.scratch.get(keys::LAST_CONCERNS)),
                ctx.scratch
                    .get(keys::LAST_RISK)
                    .and_then(|v| v.as_str())
                    .map(String::from),
            ),
        };

        let args = WellnessTipsArgs {
            concerns,
            risk_level,
            fitness_goal: profile.fitness_goal.clone(),
            dietary_preferences: profile.dietary_preferences.clone(),
        };
        let args = serde_json::to_value(&args)
            .map_err(|e| AgentError::MalformedPayload(e.to_string()))?;
        let tips = kit.call_tool(WELLNESS_TIPS, args).await?;

        let prompt = format!(
            "Turn these tips into a short, encouraging wellness plan grouped by nutrition, \
             exercise and lifestyle.\nUser said: {}",
            request.text
        );
        let plan_text = kit
            .generate(
                &prompt,
                json!({
                    "agent": "recommendation",
                    "tips": tips,
                    "monitoring": monitoring,
                    "knowledge": knowledge.as_ref().map(|k| json!({
                        "text": k.get("text"),
                        "references": references(k),
                    })),
                    "profile": profile,
                    "recent_turns": ctx.recent_turns,
                }),
            )
            .await?;

        Ok(AgentOutput::new(json!({
            "text": plan_text,
            "tips": tips,
            "inputs": ctx.upstream.iter().filter(|r| r.is_success()).map(|r| r.agent).collect::<Vec<_>>(),
        })))
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|i| i.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

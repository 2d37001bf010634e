//! 医学知识 Agent：检索一般性健康知识并由后端组织成通俗回答（不含诊断与处方）

use std::sync::Arc;

use serde_json::{json, Value};

use crate::agents::{AgentContext, AgentOutput, AgentServices, SubRequest, Toolkit};
use crate::core::AgentError;
use crate::tools::KNOWLEDGE_LOOKUP;

pub struct MedicalKnowledgeAgent {
    services: Arc<AgentServices>,
}

impl MedicalKnowledgeAgent {
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
        let found = kit
            .call_tool(KNOWLEDGE_LOOKUP, json!({ "question": request.text }))
            .await?;
        let references = found.get("references").cloned().unwrap_or_else(|| json!([]));
        let topics = found.get("topics").cloned().unwrap_or_else(|| json!([]));

        let prompt = format!(
            "Answer the question with general, evidence-based health information. \
             Never diagnose, prescribe, or give doses.\nQuestion: {}",
            request.text
        );
        let answer = kit
            .generate(
                &prompt,
                json!({
                    "agent": "medical_knowledge",
                    "question": request.text,
                    "topics": topics,
                    "references": references,
                    "recent_turns": ctx.recent_turns,
                }),
            )
            .await?;
        if answer.trim().is_empty() {
            return Err(AgentError::MalformedPayload("empty knowledge answer".into()));
        }

        Ok(AgentOutput::new(json!({
            "text": answer,
            "topics": topics,
            "references": references,
        })))
    }
}

/// 取 payload 中的 references 数组
pub(crate) fn references(payload: &Value) -> Vec<String> {
    payload
        .get("references")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|i| i.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

//! 协调者 Agent：请求含义不明时返回澄清提示，不调用工具与后端

use serde_json::json;

use crate::agents::{AgentKind, AgentResult};

pub struct CoordinatorAgent {
    clarification: String,
}

impl CoordinatorAgent {
    pub fn new(clarification: impl Into<String>) -> Self {
        Self {
            clarification: clarification.into(),
        }
    }

    pub fn handle(&self) -> AgentResult {
        AgentResult::success(
            AgentKind::Coordinator,
            json!({ "text": self.clarification, "clarify": true }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clarification_only() {
        let result = CoordinatorAgent::new("Could you tell me more?").handle();
        assert!(result.is_success());
        assert_eq!(result.text(), Some("Could you tell me more?"));
        assert!(result.tool_invocations.is_empty());
    }
}

//! 路由计划与阶段图
//!
//! 每个 Plan 对应一个固定的阶段列表：同一阶段内的 Agent 并行执行，后一阶段依赖的阶段全部结束后才开始（join）。

use serde::{Deserialize, Serialize};

use crate::agents::AgentKind;

/// 分类得到的路由计划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plan {
    MonitoringOnly,
    RecommendationOnly,
    KnowledgeOnly,
    /// Monitoring 与 Knowledge 并行，二者都结束后 Recommendation 以其输出为输入
    MonitoringThenRecommendation,
    /// 请求含义不明，只返回澄清提示
    Clarify,
}

/// 执行阶段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub agents: Vec<AgentKind>,
    /// 依赖的前序阶段下标
    pub depends_on: Vec<usize>,
}

impl Stage {
    fn root(agents: Vec<AgentKind>) -> Self {
        Self {
            agents,
            depends_on: Vec::new(),
        }
    }
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::MonitoringOnly => "MonitoringOnly",
            Plan::RecommendationOnly => "RecommendationOnly",
            Plan::KnowledgeOnly => "KnowledgeOnly",
            Plan::MonitoringThenRecommendation => "MonitoringThenRecommendation",
            Plan::Clarify => "Clarify",
        }
    }

    pub fn parse(s: &str) -> Option<Plan> {
        [
            Plan::MonitoringOnly,
            Plan::RecommendationOnly,
            Plan::KnowledgeOnly,
            Plan::MonitoringThenRecommendation,
            Plan::Clarify,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
    }

    pub fn stages(&self) -> Vec<Stage> {
        match self {
            Plan::MonitoringOnly => vec![Stage::root(vec![AgentKind::HealthMonitoring])],
            Plan::RecommendationOnly => vec![Stage::root(vec![AgentKind::Recommendation])],
            Plan::KnowledgeOnly => vec![Stage::root(vec![AgentKind::MedicalKnowledge])],
            Plan::MonitoringThenRecommendation => vec![
                Stage::root(vec![AgentKind::HealthMonitoring, AgentKind::MedicalKnowledge]),
                Stage {
                    agents: vec![AgentKind::Recommendation],
                    depends_on: vec![0],
                },
            ],
            Plan::Clarify => vec![Stage::root(vec![AgentKind::Coordinator])],
        }
    }

    /// 是否调用专家 Agent
    pub fn invokes_specialists(&self) -> bool {
        !matches!(self, Plan::Clarify)
    }
}

//! 请求分类：根据请求文本与 scratch 快照选择路由计划
//!
//! 纯函数：相同的 (request, scratch) 必然得到相同的计划，不调用 LLM、没有随机性。

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::Plan;
use crate::tools::metrics::extract_metrics;

/// 记录上一轮计划的 scratch 键
pub const LAST_PLAN_KEY: &str = "last_plan";

const MONITORING_TERMS: &[&str] = &[
    "monitor my", "track my", "check my sleep", "check my heart", "my vitals", "my readings",
];

const RECOMMENDATION_TERMS: &[&str] = &[
    "what should i do", "should i", "recommend", "advice", "advise", "tips", "suggest",
    "how can i", "how do i", "improve", "help me", "plan for", "what can i do",
];

const KNOWLEDGE_TERMS: &[&str] = &[
    "medication", "medicine", "drug", "dose", "dosage", "pill", "symptom", "what is", "what are",
    "why do", "why does", "why am i", "is it normal", "benefits of", "causes", "cause of",
    "diagnos", "treatment", "headache", "disease",
];

/// 命中的信号
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Signals {
    pub monitoring: Vec<String>,
    pub recommendation: Vec<String>,
    pub knowledge: Vec<String>,
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub plan: Plan,
    pub signals: Signals,
    /// 无任何信号（ClassificationAmbiguous），本地恢复为 Clarify 或跟进
    pub ambiguous: bool,
    pub follow_up: bool,
}

fn matched(lower: &str, terms: &[&str]) -> Vec<String> {
    terms
        .iter()
        .filter(|t| lower.contains(*t))
        .map(|t| t.to_string())
        .collect()
}

/// 分类请求
pub fn classify(request: &str, scratch: &HashMap<String, Value>) -> Classification {
    let lower = request.trim().to_lowercase();

    let mut monitoring = matched(&lower, MONITORING_TERMS);
    let metrics = extract_metrics(request);
    if metrics.sleep_hours.is_some() {
        monitoring.push("sleep_hours".into());
    }
    if metrics.heart_rate.is_some() {
        monitoring.push("heart_rate".into());
    }
    if metrics.blood_pressure.is_some() {
        monitoring.push("blood_pressure".into());
    }
    if metrics.steps.is_some() {
        monitoring.push("steps".into());
    }
    let signals = Signals {
        monitoring,
        recommendation: matched(&lower, RECOMMENDATION_TERMS),
        knowledge: matched(&lower, KNOWLEDGE_TERMS),
    };

    let m = !signals.monitoring.is_empty();
    let r = !signals.recommendation.is_empty();
    let k = !signals.knowledge.is_empty();

    let (plan, ambiguous, follow_up) = match (m, r, k) {
        (true, true, _) | (true, _, true) => (Plan::MonitoringThenRecommendation, false, false),
        (true, false, false) => (Plan::MonitoringOnly, false, false),
        (false, _, true) => (Plan::KnowledgeOnly, false, false),
        (false, true, false) => (Plan::RecommendationOnly, false, false),
        (false, false, false) => {
            let has_history = scratch
                .get(LAST_PLAN_KEY)
                .and_then(|v| v.as_str())
                .and_then(Plan::parse)
                .is_some_and(|p| p != Plan::Clarify);
            if has_history && !lower.is_empty() {
                (Plan::RecommendationOnly, true, true)
            } else {
                (Plan::Clarify, true, false)
            }
        }
    };

    Classification {
        plan,
        signals,
        ambiguous,
        follow_up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_sleep_question_fans_out() {
        let c = classify("I slept 4 hours, what should I do?", &empty());
        assert_eq!(c.plan, Plan::MonitoringThenRecommendation);
        assert!(c.signals.monitoring.contains(&"sleep_hours".to_string()));
    }

    #[test]
    fn test_medication_question_goes_to_knowledge() {
        let c = classify("What medication should I take for my headache?", &empty());
        assert_eq!(c.plan, Plan::KnowledgeOnly);
    }

    #[test]
    fn test_single_intent_plans() {
        assert_eq!(classify("my heart rate is 72 bpm", &empty()).plan, Plan::MonitoringOnly);
        assert_eq!(classify("any tips to be more active?", &empty()).plan, Plan::RecommendationOnly);
        assert_eq!(
            classify("What are the benefits of regular cardiovascular exercise?", &empty()).plan,
            Plan::KnowledgeOnly
        );
    }

    #[test]
    fn test_ambiguous_without_context_clarifies() {
        let c = classify("help", &empty());
        assert_eq!(c.plan, Plan::Clarify);
        assert!(c.ambiguous);
        assert_eq!(classify("   ", &empty()).plan, Plan::Clarify);
    }

    #[test]
    fn test_ambiguous_follow_up_uses_history() {
        let mut scratch = empty();
        scratch.insert(LAST_PLAN_KEY.into(), json!("MonitoringThenRecommendation"));
        let c = classify("ok, and then?", &scratch);
        assert_eq!(c.plan, Plan::RecommendationOnly);
        assert!(c.follow_up);

        scratch.insert(LAST_PLAN_KEY.into(), json!("Clarify"));
        assert_eq!(classify("ok, and then?", &scratch).plan, Plan::Clarify);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let mut scratch = empty();
        scratch.insert(LAST_PLAN_KEY.into(), json!("KnowledgeOnly"));
        for request in ["I slept 4 hours, what should I do?", "help", "hmm", "bp 140/95"] {
            let a = classify(request, &scratch);
            let b = classify(request, &scratch);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_dates_and_ratings_are_not_vitals() {
        let c = classify("my appointment is on 10/12", &empty());
        assert!(c.signals.monitoring.is_empty());
        assert_eq!(c.plan, Plan::Clarify);

        let c = classify("rated my run 10/10, any tips?", &empty());
        assert_eq!(c.plan, Plan::RecommendationOnly);

        let c = classify("my bp is 142/91", &empty());
        assert_eq!(c.plan, Plan::MonitoringOnly);
        assert_eq!(c.signals.monitoring, vec!["blood_pressure".to_string()]);
    }
}

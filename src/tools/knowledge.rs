//! knowledge_lookup 工具：按主题返回一般性健康知识片段（只提供背景资料，不给诊断或用药建议）

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use crate::tools::schema::{schema_value, KnowledgeLookupArgs};
use crate::tools::{Tool, KNOWLEDGE_LOOKUP};

/// (主题, 触发关键词, 资料)；关键词按整词匹配，允许复数 s
const TOPICS: &[(&str, &[&str], &str)] = &[
    (
        "sleep",
        &["sleep", "sleeping", "slept", "insomnia", "tired", "tiredness", "rest"],
        "Most adults need 7-9 hours of sleep; regular timing matters as much as duration.",
    ),
    (
        "cardiovascular exercise",
        &["cardio", "exercise", "exercising", "running", "walking", "workout", "fitness"],
        "Regular aerobic exercise strengthens the heart and improves mood and sleep quality.",
    ),
    (
        "hydration",
        &["water", "hydration", "hydrated", "dehydrated", "dehydration", "thirst", "thirsty"],
        "Thirst, urine colour and activity level are practical guides to how much to drink.",
    ),
    (
        "nutrition",
        &["diet", "food", "nutrition", "eat", "eating", "vegetarian", "protein"],
        "A varied diet rich in vegetables, fruit, whole grains and protein supports energy levels.",
    ),
    (
        "stress",
        &["stress", "stressed", "anxious", "anxiety", "relax", "relaxing", "burnout"],
        "Breathing exercises, movement and social contact are well-studied ways to ease everyday stress.",
    ),
    (
        "blood pressure",
        &["blood pressure", "hypertension", "bp"],
        "Blood pressure readings vary through the day; trends over several readings are more informative.",
    ),
    (
        "heart rate",
        &["heart rate", "pulse", "bpm"],
        "A typical resting heart rate for adults is 60-100 bpm; fitness and medication influence it.",
    ),
    (
        "headache",
        &["headache", "migraine"],
        "Common headache triggers include dehydration, poor sleep, stress and long screen sessions.",
    ),
    (
        "medication",
        &["medication", "medicine", "drug", "pill", "dose", "dosage"],
        "Medication choices and doses depend on personal history; a pharmacist or doctor should advise.",
    ),
];

fn topic_patterns() -> &'static [(Regex, &'static str, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        TOPICS
            .iter()
            .map(|(topic, keys, text)| {
                let alternation = keys
                    .iter()
                    .map(|k| regex::escape(k).replace(' ', r"\s+"))
                    .collect::<Vec<_>>()
                    .join("|");
                let re = RegexBuilder::new(&format!(r"\b(?:{alternation})s?\b"))
                    .case_insensitive(true)
                    .build()
                    .expect("valid topic regex");
                (re, *topic, *text)
            })
            .collect()
    })
}

/// 按关键词匹配主题，返回 (topics, references)
pub fn lookup(question: &str) -> (Vec<&'static str>, Vec<&'static str>) {
    topic_patterns()
        .iter()
        .filter(|(re, _, _)| re.is_match(question))
        .map(|(_, topic, text)| (*topic, *text))
        .unzip()
}

/// 知识检索工具
pub struct KnowledgeLookupTool;

#[async_trait]
impl Tool for KnowledgeLookupTool {
    fn name(&self) -> &str {
        KNOWLEDGE_LOOKUP
    }

    fn description(&self) -> &str {
        "Look up general, non-diagnostic health background for a question"
    }

    fn input_schema(&self) -> Value {
        schema_value::<KnowledgeLookupArgs>()
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let args: KnowledgeLookupArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid args: {e}"))?;
        let (topics, references) = lookup(&args.question);
        Ok(json!({ "topics": topics, "references": references }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_matches_topics() {
        let (topics, refs) = lookup("What are the benefits of regular cardiovascular exercise?");
        assert_eq!(topics, vec!["cardiovascular exercise"]);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_lookup_headache_medication() {
        let (topics, _) = lookup("What medication should I take for my headache?");
        assert!(topics.contains(&"headache"));
        assert!(topics.contains(&"medication"));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let (topics, _) = lookup("I feel great after a sweat session, any interest in yoga?");
        assert!(topics.is_empty());

        let (topics, _) = lookup("Is my BP too high? I eat a lot of salty food and drink little water");
        assert_eq!(topics, vec!["hydration", "nutrition", "blood pressure"]);

        let (topics, _) = lookup("Why do I get headaches when I am dehydrated?");
        assert_eq!(topics, vec!["hydration", "headache"]);
    }

    #[tokio::test]
    async fn test_no_match_is_not_an_error() {
        let out = KnowledgeLookupTool
            .call(json!({ "question": "quantum chromodynamics" }))
            .await
            .unwrap();
        assert_eq!(out["references"].as_array().unwrap().len(), 0);
    }
}

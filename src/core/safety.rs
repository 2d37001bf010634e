//! 安全过滤：每个最终回复在返回前都必须经过这里
//!
//! - Blocked：回复像诊断/处方/剂量建议，或请求本身在索要用药、剂量或诊断；内容替换为固定拒答文案
//! - Rewritten：涉及健康话题且缺少免责声明，追加免责声明
//! - Allowed：原样返回

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::SafetySection;

/// 过滤结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyStatus {
    Allowed,
    Rewritten,
    Blocked,
}

impl SafetyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyStatus::Allowed => "Allowed",
            SafetyStatus::Rewritten => "Rewritten",
            SafetyStatus::Blocked => "Blocked",
        }
    }
}

/// 过滤输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub status: SafetyStatus,
    pub text: String,
    /// 命中的规则（Blocked 时）
    pub reason: Option<String>,
}

const RESPONSE_PATTERNS: &[&str] = &[
    r"\b\d+(?:\.\d+)?\s*(?:mg|mcg|ml|milligrams?|tablets?|capsules?)\b",
    r"\b(?:take|taking|start|try|use)\s+(?:an?\s+|some\s+)?(?:ibuprofen|acetaminophen|paracetamol|aspirin|naproxen|antibiotics?|opioids?|codeine|tramadol|antidepressants?|statins?|insulin|melatonin|sleeping pills?)\b",
    r"\byou\s+(?:probably\s+|likely\s+|may\s+|might\s+)?(?:have|are suffering from|are diagnosed with)\s+(?:an?\s+)?(?:\w+\s+)?(?:disease|disorder|infection|syndrome|diabetes|hypertension|cancer|migraines?|depression)\b",
    r"\b(?:i|we)\s+(?:diagnose|prescribe)\b",
    r"\bprescri(?:be|ption)\s+(?:you|for you)\b",
    r"\b(?:dosage|dose of)\b",
];

const REQUEST_PATTERNS: &[&str] = &[
    r"\b(?:what|which)\s+(?:medications?|medicines?|meds|drugs?|pills?|doses?|dosages?)\s+(?:should|can|could|do|must)\s+i\b",
    r"\bhow\s+(?:much|many)\s+(?:\w+\s+){0,2}(?:mg|pills?|tablets?|medication|medicine)\b",
    r"\bdo\s+i\s+have\s+(?:an?\s+)?(?:\w+\s+)?(?:disease|disorder|infection|syndrome|diabetes|hypertension|cancer|depression)\b",
    r"\b(?:diagnose|prescribe)\s+me\b",
];

const HEALTH_TERMS: &[&str] = &[
    "sleep", "slept", "heart", "blood pressure", "exercise", "workout", "walk", "diet",
    "nutrition", "stress", "health", "medical", "symptom", "headache", "medication", "caffeine",
    "steps", "hydration", "cardio", "risk level", "wellness", "vegetables", "doctor",
];

fn compile(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid safety pattern ignored");
            None
        }
    }
}

/// 安全过滤器：由配置构建，构建后只读
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    disclaimer: String,
    refusal_message: String,
    response_rules: Vec<Regex>,
    request_rules: Vec<Regex>,
    health_terms: Vec<String>,
}

impl SafetyFilter {
    pub fn from_config(cfg: &SafetySection) -> Self {
        let mut response_rules: Vec<Regex> = RESPONSE_PATTERNS.iter().filter_map(|p| compile(p)).collect();
        response_rules.extend(
            cfg.blocked_terms
                .iter()
                .filter(|t| !t.trim().is_empty())
                .filter_map(|t| compile(&format!(r"\b{}\b", regex::escape(t.trim())))),
        );
        let mut health_terms: Vec<String> = HEALTH_TERMS.iter().map(|t| t.to_string()).collect();
        health_terms.extend(cfg.health_terms.iter().map(|t| t.to_lowercase()));

        Self {
            disclaimer: cfg.disclaimer.clone(),
            refusal_message: cfg.refusal_message.clone(),
            response_rules,
            request_rules: REQUEST_PATTERNS.iter().filter_map(|p| compile(p)).collect(),
            health_terms,
        }
    }

    pub fn refusal_message(&self) -> &str {
        &self.refusal_message
    }

    pub fn disclaimer(&self) -> &str {
        &self.disclaimer
    }

    /// 过滤最终回复；request 用于识别索要处方/诊断的请求
    pub fn apply(&self, request: &str, text: &str) -> FilterOutcome {
        let blocked = self
            .request_rules
            .iter()
            .find(|re| re.is_match(request))
            .map(|re| format!("request matches {}", re.as_str()))
            .or_else(|| {
                self.response_rules
                    .iter()
                    .find(|re| re.is_match(text))
                    .map(|re| format!("response matches {}", re.as_str()))
            });
        if let Some(reason) = blocked {
            return FilterOutcome {
                status: SafetyStatus::Blocked,
                text: self.refusal_message.clone(),
                reason: Some(reason),
            };
        }

        let lower = text.to_lowercase();
        let health_related = self.health_terms.iter().any(|t| lower.contains(t.as_str()));
        if health_related && !text.contains(self.disclaimer.as_str()) {
            return FilterOutcome {
                status: SafetyStatus::Rewritten,
                text: format!("{}\n\n{}", text.trim_end(), self.disclaimer),
                reason: None,
            };
        }

        FilterOutcome {
            status: SafetyStatus::Allowed,
            text: text.to_string(),
            reason: None,
        }
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::from_config(&SafetySection::default())
    }
}

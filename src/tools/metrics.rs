//! metrics_extract 工具：从用户描述或结构化上报中抽取健康指标，给出风险等级与关注点

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::schema::{schema_value, MetricsExtractArgs};
use crate::tools::{Tool, METRICS_EXTRACT};

/// 健康指标（字段均可缺省）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HealthMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    /// 收缩压 / 舒张压，如 "130/85"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f32>,
    /// sedentary / moderate / active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

impl HealthMetrics {
    pub fn is_empty(&self) -> bool {
        self == &HealthMetrics::default()
    }

    /// 以 `other` 中已有的字段覆盖自身
    pub fn overlay(mut self, other: &HealthMetrics) -> Self {
        if other.heart_rate.is_some() {
            self.heart_rate = other.heart_rate;
        }
        if other.blood_pressure.is_some() {
            self.blood_pressure = other.blood_pressure.clone();
        }
        if other.sleep_hours.is_some() {
            self.sleep_hours = other.sleep_hours;
        }
        if other.activity_level.is_some() {
            self.activity_level = other.activity_level.clone();
        }
        if other.steps.is_some() {
            self.steps = other.steps;
        }
        self
    }

    fn pressure(&self) -> Option<(u32, u32)> {
        let bp = self.blood_pressure.as_deref()?;
        let (sys, dia) = bp.split_once('/')?;
        Some((sys.trim().parse().ok()?, dia.trim().parse().ok()?))
    }
}

/// 风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }

    fn monitoring_frequency(&self) -> &'static str {
        match self {
            RiskLevel::Low => "weekly",
            RiskLevel::Medium => "every few days",
            RiskLevel::High => "daily",
        }
    }
}

/// 评估风险等级与关注点；无任何指标时为 Low 且没有关注点
pub fn assess(metrics: &HealthMetrics) -> (RiskLevel, Vec<String>) {
    let mut risk = RiskLevel::Low;
    let mut concerns = Vec::new();
    let mut raise = |level: RiskLevel, concern: String, risk: &mut RiskLevel| {
        *risk = (*risk).max(level);
        concerns.push(concern);
    };

    if let Some(hours) = metrics.sleep_hours {
        if hours < 5.0 {
            raise(RiskLevel::High, format!("short sleep ({hours}h)"), &mut risk);
        } else if hours < 7.0 {
            raise(RiskLevel::Medium, format!("below recommended sleep ({hours}h)"), &mut risk);
        }
    }
    if let Some(hr) = metrics.heart_rate {
        if hr > 100 {
            raise(RiskLevel::High, format!("high resting heart rate ({hr} bpm)"), &mut risk);
        } else if hr < 45 {
            raise(RiskLevel::High, format!("low resting heart rate ({hr} bpm)"), &mut risk);
        } else if hr > 90 {
            raise(RiskLevel::Medium, format!("elevated resting heart rate ({hr} bpm)"), &mut risk);
        }
    }
    if let Some((sys, dia)) = metrics.pressure() {
        if sys >= 140 || dia >= 90 {
            raise(RiskLevel::High, format!("high blood pressure ({sys}/{dia})"), &mut risk);
        } else if sys >= 130 || dia >= 85 {
            raise(RiskLevel::Medium, format!("elevated blood pressure ({sys}/{dia})"), &mut risk);
        }
    }
    if metrics.activity_level.as_deref() == Some("sedentary") {
        raise(RiskLevel::Medium, "low activity".to_string(), &mut risk);
    }
    if let Some(steps) = metrics.steps {
        if steps < 5000 {
            raise(RiskLevel::Medium, format!("low step count ({steps})"), &mut risk);
        }
    }
    (risk, concerns)
}

struct Patterns {
    sleep: Regex,
    sleep_suffix: Regex,
    heart_rate: Regex,
    bpm: Regex,
    blood_pressure: Regex,
    bp_mmhg: Regex,
    steps: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        sleep: Regex::new(r"(?i)\b(?:slept|sleep|sleeping)\b\D{0,20}?(\d+(?:\.\d+)?)\s*(?:h|hrs?|hours?)\b")
            .expect("valid sleep regex"),
        sleep_suffix: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:h|hrs?|hours?)\s+(?:of\s+)?sleep")
            .expect("valid sleep regex"),
        heart_rate: Regex::new(r"(?i)\b(?:heart\s*rate|pulse|hr)\b\D{0,15}?(\d{2,3})\b")
            .expect("valid heart rate regex"),
        bpm: Regex::new(r"(?i)\b(\d{2,3})\s*bpm\b").expect("valid bpm regex"),
        blood_pressure: Regex::new(r"(?i)\b(?:bp|blood\s*pressure|pressure)\b\D{0,20}?\b(\d{2,3})\s*/\s*(\d{2,3})\b")
            .expect("valid bp regex"),
        bp_mmhg: Regex::new(r"(?i)\b(\d{2,3})\s*/\s*(\d{2,3})\s*mm\s*hg\b").expect("valid mmhg regex"),
        steps: Regex::new(r"(?i)\b(\d[\d,]*)\s*steps\b").expect("valid steps regex"),
    })
}

/// 从自由文本抽取指标
pub fn extract_metrics(text: &str) -> HealthMetrics {
    let p = patterns();
    let lower = text.to_lowercase();

    let sleep_hours = p
        .sleep
        .captures(text)
        .or_else(|| p.sleep_suffix.captures(text))
        .and_then(|c| c[1].parse().ok());
    let heart_rate = p
        .bpm
        .captures(text)
        .or_else(|| p.heart_rate.captures(text))
        .and_then(|c| c[1].parse().ok());
    // 只接受带血压字样或 mmHg 单位、且数值在生理范围内的读数，避免把日期、评分当成血压
    let blood_pressure = p
        .blood_pressure
        .captures(text)
        .or_else(|| p.bp_mmhg.captures(text))
        .and_then(|c| {
            let sys: u32 = c[1].parse().ok()?;
            let dia: u32 = c[2].parse().ok()?;
            ((70..=250).contains(&sys) && (40..=150).contains(&dia) && sys > dia)
                .then(|| format!("{sys}/{dia}"))
        });
    let steps = p
        .steps
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok());

    let activity_level = if ["sedentary", "no exercise", "sat all day", "desk all day"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("sedentary".to_string())
    } else if ["workout", "worked out", "ran ", "running", "gym", "very active"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some("active".to_string())
    } else if lower.contains("moderate") {
        Some("moderate".to_string())
    } else {
        None
    };

    HealthMetrics {
        heart_rate,
        blood_pressure,
        sleep_hours,
        activity_level,
        steps,
    }
}

/// 指标抽取工具
pub struct MetricsExtractTool;

#[async_trait]
impl Tool for MetricsExtractTool {
    fn name(&self) -> &str {
        METRICS_EXTRACT
    }

    fn description(&self) -> &str {
        "Extract health metrics (sleep, heart rate, blood pressure, steps, activity) and assess risk level"
    }

    fn input_schema(&self) -> Value {
        schema_value::<MetricsExtractArgs>()
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "metrics": schema_value::<HealthMetrics>(),
                "risk_level": { "enum": ["Low", "Medium", "High"] },
                "concerns": { "type": "array", "items": { "type": "string" } },
                "monitoring_frequency": { "type": "string" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let args: MetricsExtractArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid args: {e}"))?;
        let mut metrics = extract_metrics(&args.text);
        if let Some(reported) = &args.reported {
            metrics = metrics.overlay(reported);
        }
        let (risk, concerns) = assess(&metrics);
        Ok(json!({
            "metrics": metrics,
            "risk_level": risk.as_str(),
            "concerns": concerns,
            "monitoring_frequency": risk.monitoring_frequency(),
        }))
    }
}

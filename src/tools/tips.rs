//! wellness_tips 工具：按关注点与用户画像挑选建议（3 条饮食、3 条运动、2 条生活方式）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::schema::{schema_value, WellnessTipsArgs};
use crate::tools::{Tool, WELLNESS_TIPS};

const NUTRITION_COUNT: usize = 3;
const EXERCISE_COUNT: usize = 3;
const LIFESTYLE_COUNT: usize = 2;

const BASE_NUTRITION: &[&str] = &[
    "Fill half your plate with vegetables at lunch and dinner",
    "Drink a glass of water with every meal",
    "Swap one sugary snack a day for fruit or nuts",
    "Choose whole grains over refined grains",
];

const BASE_EXERCISE: &[&str] = &[
    "Take a brisk 20-minute walk on most days",
    "Add two short strength sessions per week (squats, push-ups, rows)",
    "Stretch for 5 minutes after sitting for long periods",
    "Try a low-impact activity you enjoy, such as cycling or swimming",
];

const BASE_LIFESTYLE: &[&str] = &[
    "Keep a consistent wake-up time, including weekends",
    "Schedule a 10-minute screen-free break in the afternoon",
    "Spend a few minutes outdoors in daylight each morning",
];

/// 针对关注点的优先建议：(关键词, 类别, 建议)
const TARGETED: &[(&str, &str, &str)] = &[
    ("sleep", "lifestyle", "Aim for a regular 7-9 hour sleep window and dim screens an hour before bed"),
    ("sleep", "nutrition", "Avoid caffeine after early afternoon"),
    ("sleep", "exercise", "Keep intense workouts earlier in the day; prefer gentle movement in the evening"),
    ("heart rate", "lifestyle", "Practice 5 minutes of slow breathing when you feel stressed"),
    ("heart rate", "exercise", "Build up cardio gradually and track how you feel during exercise"),
    ("blood pressure", "nutrition", "Reduce added salt and processed foods"),
    ("blood pressure", "exercise", "Include 30 minutes of moderate aerobic activity on most days"),
    ("activity", "exercise", "Stand up and move for 2-3 minutes every hour"),
    ("step", "exercise", "Add a 10-minute walk after meals to raise your daily steps"),
];

fn pick(base: &[&str], targeted: Vec<String>, count: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(count);
    for tip in targeted.into_iter().chain(base.iter().map(|s| s.to_string())) {
        if out.len() == count {
            break;
        }
        if !out.contains(&tip) {
            out.push(tip);
        }
    }
    out
}

/// 根据参数生成分组建议
pub fn select_tips(args: &WellnessTipsArgs) -> Value {
    let concerns: Vec<String> = args.concerns.iter().map(|c| c.to_lowercase()).collect();
    let targeted = |category: &str| -> Vec<String> {
        TARGETED
            .iter()
            .filter(|(key, cat, _)| *cat == category && concerns.iter().any(|c| c.contains(key)))
            .map(|(_, _, tip)| tip.to_string())
            .collect()
    };

    let mut nutrition = targeted("nutrition");
    if let Some(diet) = args.dietary_preferences.as_deref() {
        let diet = diet.to_lowercase();
        if diet.contains("vegetarian") || diet.contains("vegan") {
            nutrition.push("Include plant proteins such as lentils, beans or tofu daily".to_string());
        }
    }

    let mut exercise = targeted("exercise");
    if let Some(goal) = args.fitness_goal.as_deref() {
        let goal = goal.to_lowercase();
        if goal.contains("weight") {
            exercise.push("Combine daily walking with two strength sessions a week to support weight goals".to_string());
        }
        if goal.contains("cardio") {
            exercise.push("Work up to 150 minutes of moderate cardio per week".to_string());
        }
    }

    json!({
        "nutrition": pick(BASE_NUTRITION, nutrition, NUTRITION_COUNT),
        "exercise": pick(BASE_EXERCISE, exercise, EXERCISE_COUNT),
        "lifestyle": pick(BASE_LIFESTYLE, targeted("lifestyle"), LIFESTYLE_COUNT),
    })
}

/// 建议目录工具
pub struct WellnessTipsTool;

#[async_trait]
impl Tool for WellnessTipsTool {
    fn name(&self) -> &str {
        WELLNESS_TIPS
    }

    fn description(&self) -> &str {
        "Select nutrition, exercise and lifestyle tips for the given concerns and profile"
    }

    fn input_schema(&self) -> Value {
        schema_value::<WellnessTipsArgs>()
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let args: WellnessTipsArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid args: {e}"))?;
        Ok(select_tips(&args))
    }
}

//! Structured records produced by the three analysis stages.
//!
//! Every record deserializes leniently from whatever JSON object the model
//! returns: missing or null fields take neutral values, unknown enum labels
//! collapse to a safe tier, and scores are clamped to 0..=100. `fallback()` is the static
//! record substituted when a stage cannot produce anything usable.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum BuyerInterest {
    Low,
    Medium,
    High,
    #[default]
    Unknown,
}

impl BuyerInterest {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyerInterest::Low => "low",
            BuyerInterest::Medium => "medium",
            BuyerInterest::High => "high",
            BuyerInterest::Unknown => "unknown",
        }
    }
}

impl From<String> for BuyerInterest {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => BuyerInterest::Low,
            "medium" => BuyerInterest::Medium,
            "high" => BuyerInterest::High,
            _ => BuyerInterest::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Relevance {
    #[default]
    Low,
    Medium,
    High,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::Low => "low",
            Relevance::Medium => "medium",
            Relevance::High => "high",
        }
    }
}

impl From<String> for Relevance {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "medium" => Relevance::Medium,
            "high" => Relevance::High,
            _ => Relevance::Low,
        }
    }
}

/// Sales tactic picked by the strategy stage.
///
/// Labels outside the fixed five are kept verbatim in `Other` so the history
/// and panel show what the model actually answered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Strategy {
    DirectPitch,
    SoftSell,
    #[default]
    BuildRapport,
    CreateUrgency,
    HandleObjection,
    Other(String),
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::DirectPitch,
        Strategy::SoftSell,
        Strategy::BuildRapport,
        Strategy::CreateUrgency,
        Strategy::HandleObjection,
    ];

    pub fn label(&self) -> &str {
        match self {
            Strategy::DirectPitch => "direct_pitch",
            Strategy::SoftSell => "soft_sell",
            Strategy::BuildRapport => "build_rapport",
            Strategy::CreateUrgency => "create_urgency",
            Strategy::HandleObjection => "handle_objection",
            Strategy::Other(label) => label,
        }
    }
}

impl From<String> for Strategy {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct_pitch" => Strategy::DirectPitch,
            "soft_sell" => Strategy::SoftSell,
            "build_rapport" => Strategy::BuildRapport,
            "create_urgency" => Strategy::CreateUrgency,
            "handle_objection" => Strategy::HandleObjection,
            _ => Strategy::Other(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PerformanceAssessment {
    #[serde(default, deserialize_with = "deserialize_score")]
    pub progress_score: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buyer_interest: BuyerInterest,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_signals: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assessment: String,
}

impl PerformanceAssessment {
    pub fn fallback() -> Self {
        Self {
            progress_score: 0,
            buyer_interest: BuyerInterest::Unknown,
            key_signals: Vec::new(),
            assessment: "Unable to assess".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicAnalysis {
    #[serde(default = "default_topic", deserialize_with = "deserialize_topic")]
    pub current_topic: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relevance_to_goal: Relevance,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pivot_opportunity: String,
}

impl TopicAnalysis {
    pub fn fallback() -> Self {
        Self {
            current_topic: default_topic(),
            relevance_to_goal: Relevance::Low,
            pivot_opportunity: "Find a way to mention gaming or the Switch".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategyDecision {
    #[serde(default, deserialize_with = "null_as_default")]
    pub strategy: Strategy,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub approach: String,
}

impl StrategyDecision {
    pub fn fallback() -> Self {
        Self {
            strategy: Strategy::BuildRapport,
            reasoning: "Default to building rapport".to_string(),
            approach: "Be enthusiastic and mention the Switch casually".to_string(),
        }
    }
}

fn default_topic() -> String {
    "general".to_string()
}

// JSON-mode replies often spell an absent field as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_topic<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_topic))
}

// Models answer with 72, 72.5 or "72" interchangeably.
fn deserialize_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    };
    let raw = raw.ok_or_else(|| {
        serde::de::Error::custom(format!("progress_score is not numeric: {value}"))
    })?;
    Ok(raw.clamp(0.0, f64::from(MAX_PROGRESS)) as u8)
}

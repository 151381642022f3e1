use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// A single contributing factor in a scoring verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSignal {
    pub id: String,
    pub description: String,
    pub weight: f64,
}

/// The verdict returned by a scoring gate's `evaluate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    pub allowed: bool,
    pub total_score: f64,
    pub risk_level: RiskLevel,
    pub signals: Vec<ScoringSignal>,
}

impl ScoringResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            total_score: 0.0,
            risk_level: RiskLevel::Low,
            signals: Vec::new(),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// One recorded exchange between the caller and its user. Immutable once
/// appended; evicted oldest-first past the configured history cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEntry {
    pub id: String,
    pub user_input: String,
    pub ai_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
    /// Id of the interaction this feedback arrived with
    pub related_interaction: String,
}

/// Where a recorded fact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    Seed,
    UserFeedback,
    BehavioralAdaptation,
    AutoOptimization,
    PerformanceAnalysis,
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            FactSource::Seed => "seed",
            FactSource::UserFeedback => "user_feedback",
            FactSource::BehavioralAdaptation => "behavioral_adaptation",
            FactSource::AutoOptimization => "auto_optimization",
            FactSource::PerformanceAnalysis => "performance_analysis",
        };
        write!(f, "{}", tag)
    }
}

/// A confidence-scored statement the system has recorded as learned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub id: String,
    pub content: String,
    /// Must lie in [0, 1]; enforced by the state store
    pub confidence: f64,
    pub source: FactSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A stimulus → response-type association. Duplicates by `pattern` name are
/// permitted; the optimizer inspects duplicates as a signal of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub pattern: String,
    pub response_type: String,
    /// Must lie in [0, 1]; enforced by the state store
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    Formal,
    Casual,
    Technical,
    Friendly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDetailLevel {
    Concise,
    Balanced,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactivityLevel {
    Low,
    Medium,
    High,
}

/// Behavioral knobs adjusted by `adapt_behavior`. One logical singleton per
/// process; fields are only ever overwritten, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub communication_style: CommunicationStyle,
    pub response_detail_level: ResponseDetailLevel,
    pub proactivity_level: ProactivityLevel,
    pub learning_rate: f64,
    /// Open-ended caller-supplied knobs, shallow-merged per call
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            communication_style: CommunicationStyle::Casual,
            response_detail_level: ResponseDetailLevel::Balanced,
            proactivity_level: ProactivityLevel::Medium,
            learning_rate: 0.1,
            custom: BTreeMap::new(),
        }
    }
}

/// Counters and running scores mutated by nearly every handler and by the
/// request dispatcher itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_interactions: u64,
    pub successful_interactions: u64,
    /// Exponentially-weighted running average, 0.5/0.5 on each update (ms)
    pub average_response_time: f64,
    pub tool_usage_count: BTreeMap<String, u64>,
    /// Clamped to [0, 1]
    pub productivity_score: f64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_optimization: Option<DateTime<Utc>>,
    pub optimizations_succeeded: u64,
    pub optimizations_failed: u64,
}

/// Per-tool `{uses, success}` pair backing effectiveness ratios
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ToolEffectiveness {
    pub uses: u64,
    pub success: u64,
}

impl ToolEffectiveness {
    /// Success ratio, or `None` for a tool with zero uses. Callers render
    /// the `None` case as a sentinel rather than dividing by zero.
    pub fn success_rate(&self) -> Option<f64> {
        if self.uses == 0 {
            None
        } else {
            Some(self.success as f64 / self.uses as f64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityGoal {
    pub id: String,
    pub description: String,
    pub priority: GoalPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityMetrics {
    pub tasks_completed: u64,
    /// Weighted average, 0.9 old / 0.1 new; clamped to [0, 1]
    pub efficiency_score: f64,
    pub tool_effectiveness: BTreeMap<String, ToolEffectiveness>,
    /// Bounded (oldest evicted first past the goal cap)
    pub user_goals: VecDeque<ProductivityGoal>,
    /// Goals moved here on completion; grows without bound
    pub completed_goals: Vec<ProductivityGoal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityArea {
    Performance,
    Productivity,
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetrics {
    pub min_success_rate: f64,
    pub max_response_time: f64,
    pub min_tool_usage: f64,
    pub target_productivity: f64,
}

/// Singleton auto-optimization bookkeeping. `enabled` is flipped only by
/// the scheduler's circuit breaker; `last_run` is stamped on every attempt
/// that is not skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoOptimizationConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub priority_areas: Vec<PriorityArea>,
    pub target_metrics: TargetMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_effectiveness_zero_uses_has_no_rate() {
        let eff = ToolEffectiveness::default();
        assert_eq!(eff.success_rate(), None);
    }

    #[test]
    fn test_tool_effectiveness_rate() {
        let eff = ToolEffectiveness { uses: 4, success: 3 };
        assert_eq!(eff.success_rate(), Some(0.75));
    }

    #[test]
    fn test_fact_source_wire_tags() {
        let json = serde_json::to_string(&FactSource::BehavioralAdaptation).unwrap();
        assert_eq!(json, "\"behavioral_adaptation\"");
        assert_eq!(FactSource::UserFeedback.to_string(), "user_feedback");
    }

    #[test]
    fn test_preferences_serialize_camel_case() {
        let prefs = Preferences::default();
        let value = serde_json::to_value(&prefs).unwrap();
        assert!(value.get("communicationStyle").is_some());
        assert!(value.get("responseDetailLevel").is_some());
        assert_eq!(value["communicationStyle"], "casual");
    }
}

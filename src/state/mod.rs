pub mod types;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::ServerConfig;
pub use types::*;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{field} must be between 0 and 1, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("no goal found with id {id}")]
    GoalNotFound { id: String },
}

/// Input for a new interaction record; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub user_input: String,
    pub ai_response: String,
    pub feedback: Option<String>,
    pub success: Option<bool>,
    pub context: Option<String>,
}

/// A validated preference update. Only fields explicitly present are
/// applied; `custom` keys have already been checked against the reserved
/// names by the validation layer.
#[derive(Debug, Clone, Default)]
pub struct PreferenceUpdate {
    pub communication_style: Option<CommunicationStyle>,
    pub response_detail_level: Option<ResponseDetailLevel>,
    pub proactivity_level: Option<ProactivityLevel>,
    pub learning_rate: Option<f64>,
    pub custom: BTreeMap<String, Value>,
}

impl PreferenceUpdate {
    pub fn is_empty(&self) -> bool {
        self.communication_style.is_none()
            && self.response_detail_level.is_none()
            && self.proactivity_level.is_none()
            && self.learning_rate.is_none()
            && self.custom.is_empty()
    }
}

/// The single source of truth for all mutable aggregates. Every mutation
/// goes through a named method so bounds, ranges, and enum membership are
/// enforced in one place. Lives for the lifetime of the process; state is
/// memory-only and resets on exit.
pub struct AgentState {
    max_interactions: usize,
    max_feedback: usize,
    max_facts: usize,
    max_patterns: usize,
    max_goals: usize,
    interactions: VecDeque<InteractionEntry>,
    feedback: VecDeque<FeedbackEntry>,
    facts: VecDeque<Fact>,
    patterns: VecDeque<Pattern>,
    preferences: Preferences,
    performance: PerformanceMetrics,
    productivity: ProductivityMetrics,
    auto_optimization: AutoOptimizationConfig,
}

impl AgentState {
    pub fn new(config: &ServerConfig) -> Self {
        let mut state = Self {
            max_interactions: config.limits.max_interactions,
            max_feedback: config.limits.max_feedback,
            max_facts: config.limits.max_facts,
            max_patterns: config.limits.max_patterns,
            max_goals: config.limits.max_goals,
            interactions: VecDeque::new(),
            feedback: VecDeque::new(),
            facts: VecDeque::new(),
            patterns: VecDeque::new(),
            preferences: Preferences::default(),
            performance: PerformanceMetrics::default(),
            productivity: ProductivityMetrics::default(),
            auto_optimization: AutoOptimizationConfig {
                enabled: true,
                interval_ms: config.optimization.interval_ms,
                last_run: None,
                priority_areas: vec![PriorityArea::Balanced],
                target_metrics: TargetMetrics {
                    min_success_rate: config.optimization.min_success_rate,
                    max_response_time: config.optimization.max_response_time_ms,
                    min_tool_usage: config.optimization.min_tool_usage,
                    target_productivity: config.optimization.target_productivity,
                },
            },
        };
        state.seed();
        state
    }

    // Fixed non-empty starting knowledge so first-call reports have
    // something to say. Never re-run after construction.
    fn seed(&mut self) {
        let now = Utc::now();
        self.facts.push_back(Fact {
            id: Uuid::new_v4().to_string(),
            content: "Users prefer answers that lead with the conclusion".into(),
            confidence: 0.9,
            source: FactSource::Seed,
            timestamp: Some(now),
        });
        self.facts.push_back(Fact {
            id: Uuid::new_v4().to_string(),
            content: "Follow-up questions land better than guessed assumptions".into(),
            confidence: 0.8,
            source: FactSource::Seed,
            timestamp: Some(now),
        });
        self.patterns.push_back(Pattern {
            pattern: "clarify ambiguous requests".into(),
            response_type: "question".into(),
            effectiveness: 0.75,
        });
    }

    // === Interaction history ===

    /// Append an interaction, update totals, and record any accompanying
    /// feedback text. Returns the assigned interaction id.
    pub fn add_interaction(&mut self, input: NewInteraction) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        self.performance.total_interactions += 1;
        if input.success == Some(true) {
            self.performance.successful_interactions += 1;
        }

        if let Some(text) = &input.feedback {
            self.feedback.push_back(FeedbackEntry {
                feedback: text.clone(),
                timestamp: now,
                related_interaction: id.clone(),
            });
            evict_oldest(&mut self.feedback, self.max_feedback);
        }

        self.interactions.push_back(InteractionEntry {
            id: id.clone(),
            user_input: input.user_input,
            ai_response: input.ai_response,
            feedback: input.feedback,
            success: input.success,
            context: input.context,
            timestamp: now,
        });
        evict_oldest(&mut self.interactions, self.max_interactions);

        id
    }

    // === Knowledge base ===

    /// Append a fact. Rejects (rather than clamping) confidence outside [0, 1].
    pub fn add_fact(
        &mut self,
        content: impl Into<String>,
        confidence: f64,
        source: FactSource,
    ) -> Result<(), StateError> {
        check_unit_range("confidence", confidence)?;
        self.facts.push_back(Fact {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            confidence,
            source,
            timestamp: Some(Utc::now()),
        });
        evict_oldest(&mut self.facts, self.max_facts);
        Ok(())
    }

    /// Append a pattern. Duplicate names are allowed; effectiveness outside
    /// [0, 1] is rejected.
    pub fn add_pattern(
        &mut self,
        pattern: impl Into<String>,
        response_type: impl Into<String>,
        effectiveness: f64,
    ) -> Result<(), StateError> {
        check_unit_range("effectiveness", effectiveness)?;
        self.patterns.push_back(Pattern {
            pattern: pattern.into(),
            response_type: response_type.into(),
            effectiveness,
        });
        evict_oldest(&mut self.patterns, self.max_patterns);
        Ok(())
    }

    /// Apply a validated preference update. Unspecified fields stay put;
    /// custom keys shallow-merge with later calls overriding earlier ones.
    /// Returns a human-readable line per change, for the audit fact.
    pub fn merge_preferences(&mut self, update: PreferenceUpdate) -> Vec<String> {
        let mut changes = Vec::new();

        if let Some(style) = update.communication_style {
            self.preferences.communication_style = style;
            changes.push(format!("communicationStyle -> {:?}", style));
        }
        if let Some(level) = update.response_detail_level {
            self.preferences.response_detail_level = level;
            changes.push(format!("responseDetailLevel -> {:?}", level));
        }
        if let Some(level) = update.proactivity_level {
            self.preferences.proactivity_level = level;
            changes.push(format!("proactivityLevel -> {:?}", level));
        }
        if let Some(rate) = update.learning_rate {
            self.preferences.learning_rate = rate;
            changes.push(format!("learningRate -> {}", rate));
        }
        for (key, value) in update.custom {
            changes.push(format!("custom.{} -> {}", key, value));
            self.preferences.custom.insert(key, value);
        }

        changes
    }

    // === Performance metrics ===

    /// Increment both the raw per-tool usage counter and the
    /// `{uses, success}` pair behind effectiveness ratios.
    pub fn track_tool_usage(&mut self, tool: &str, success: bool) {
        *self
            .performance
            .tool_usage_count
            .entry(tool.to_string())
            .or_insert(0) += 1;

        let eff = self
            .productivity
            .tool_effectiveness
            .entry(tool.to_string())
            .or_default();
        eff.uses += 1;
        if success {
            eff.success += 1;
        }
    }

    /// Fold one response-time sample into the running average (0.5/0.5).
    pub fn update_average_response_time(&mut self, millis: f64) {
        if !millis.is_finite() || millis < 0.0 {
            return;
        }
        self.performance.average_response_time =
            (self.performance.average_response_time + millis) / 2.0;
    }

    pub fn record_tool_error(&mut self, tool: &str, message: &str) {
        self.performance.error_count += 1;
        self.performance.last_error = Some(format!("{}: {}", tool, message));
    }

    /// Nudge the productivity score by `delta`, clamped to [0, 1].
    pub fn increment_productivity_score(&mut self, delta: f64) {
        self.performance.productivity_score =
            (self.performance.productivity_score + delta).clamp(0.0, 1.0);
    }

    /// Overall success ratio, or `None` before any interaction is recorded.
    pub fn success_rate(&self) -> Option<f64> {
        if self.performance.total_interactions == 0 {
            None
        } else {
            Some(
                self.performance.successful_interactions as f64
                    / self.performance.total_interactions as f64,
            )
        }
    }

    /// Mean call count across tools that have been used at least once.
    pub fn average_tool_usage(&self) -> f64 {
        let counts = &self.performance.tool_usage_count;
        if counts.is_empty() {
            return 0.0;
        }
        counts.values().sum::<u64>() as f64 / counts.len() as f64
    }

    // === Productivity ===

    /// Record a completed task: bumps the task counter, credits every tool
    /// named in `tools_used`, and folds `efficiency` into the running score
    /// only when provided.
    pub fn record_task(
        &mut self,
        tools_used: &[String],
        efficiency: Option<f64>,
    ) -> Result<(), StateError> {
        if let Some(value) = efficiency {
            // Validate before any mutation so a bad sample leaves the
            // counters untouched.
            check_unit_range("efficiency", value)?;
        }

        self.productivity.tasks_completed += 1;
        for tool in tools_used {
            let eff = self
                .productivity
                .tool_effectiveness
                .entry(tool.clone())
                .or_default();
            eff.uses += 1;
            eff.success += 1;
        }
        if let Some(value) = efficiency {
            self.productivity.efficiency_score =
                (self.productivity.efficiency_score * 0.9 + value * 0.1).clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// Weighted blend of a new efficiency sample (0.9 old / 0.1 new).
    /// Rejects out-of-range input.
    pub fn update_efficiency_score(&mut self, value: f64) -> Result<(), StateError> {
        check_unit_range("efficiency", value)?;
        self.productivity.efficiency_score =
            (self.productivity.efficiency_score * 0.9 + value * 0.1).clamp(0.0, 1.0);
        Ok(())
    }

    /// Nudge the efficiency score by `delta`, clamped to [0, 1].
    pub fn increment_efficiency_score(&mut self, delta: f64) {
        self.productivity.efficiency_score =
            (self.productivity.efficiency_score + delta).clamp(0.0, 1.0);
    }

    pub fn add_goal(
        &mut self,
        description: String,
        priority: GoalPriority,
        deadline: Option<String>,
    ) -> ProductivityGoal {
        let goal = ProductivityGoal {
            id: Uuid::new_v4().to_string(),
            description,
            priority,
            deadline,
            created: Utc::now(),
            completed: None,
        };
        self.productivity.user_goals.push_back(goal.clone());
        evict_oldest(&mut self.productivity.user_goals, self.max_goals);
        goal
    }

    /// Move a goal from the active list to the completed list, by id.
    pub fn complete_goal(&mut self, id: &str) -> Result<ProductivityGoal, StateError> {
        let position = self
            .productivity
            .user_goals
            .iter()
            .position(|goal| goal.id == id)
            .ok_or_else(|| StateError::GoalNotFound { id: id.to_string() })?;

        let mut goal = self
            .productivity
            .user_goals
            .remove(position)
            .ok_or_else(|| StateError::GoalNotFound { id: id.to_string() })?;
        goal.completed = Some(Utc::now());
        debug!(goal = %goal.description, "Goal completed");
        self.productivity.completed_goals.push(goal.clone());
        Ok(goal)
    }

    // === Auto-optimization bookkeeping ===

    /// Stamp the start of a non-skipped optimization attempt.
    pub fn mark_optimization_run(&mut self, now: DateTime<Utc>) {
        self.auto_optimization.last_run = Some(now);
    }

    pub fn record_optimization_success(&mut self, now: DateTime<Utc>) {
        self.performance.last_optimization = Some(now);
        self.performance.optimizations_succeeded += 1;
    }

    pub fn record_optimization_failure(&mut self) {
        self.performance.optimizations_failed += 1;
    }

    /// One-way switch thrown by the scheduler's circuit breaker.
    pub fn disable_auto_optimization(&mut self) {
        self.auto_optimization.enabled = false;
    }

    // === Read access ===

    pub fn interactions(&self) -> &VecDeque<InteractionEntry> {
        &self.interactions
    }

    pub fn feedback(&self) -> &VecDeque<FeedbackEntry> {
        &self.feedback
    }

    pub fn facts(&self) -> &VecDeque<Fact> {
        &self.facts
    }

    pub fn patterns(&self) -> &VecDeque<Pattern> {
        &self.patterns
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance
    }

    pub fn productivity(&self) -> &ProductivityMetrics {
        &self.productivity
    }

    pub fn auto_optimization(&self) -> &AutoOptimizationConfig {
        &self.auto_optimization
    }
}

fn check_unit_range(field: &'static str, value: f64) -> Result<(), StateError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(StateError::OutOfRange { field, value });
    }
    Ok(())
}

fn evict_oldest<T>(collection: &mut VecDeque<T>, cap: usize) {
    while collection.len() > cap {
        collection.pop_front();
    }
}

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::ToolContext;
use crate::mcp::protocol::ToolResult;
use crate::state::{FactSource, PriorityArea};

/// Structured outcome of an auto-optimization attempt, shared between the
/// tool handler and the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoOptimizeOutcome {
    /// The configured interval has not elapsed and the run was not forced.
    /// No state was mutated.
    Skipped { next_eligible: DateTime<Utc> },
    Ran { improvements: Vec<String> },
}

/// Run one self-optimization pass. Unless `force` is set, the pass is
/// skipped while the configured interval since `last_run` has not elapsed.
/// When any improvement is flagged the scores get a fixed-step nudge
/// (+0.05 productivity, +0.03 efficiency, both capped at 1.0) and one
/// summary fact is appended. Repeated runs approach the cap, never
/// overshoot it.
pub fn run_auto_optimize(ctx: &ToolContext, force: bool) -> Result<AutoOptimizeOutcome> {
    let mut state = ctx.lock_state()?;
    let now = Utc::now();

    let auto = state.auto_optimization();
    let interval = Duration::milliseconds(auto.interval_ms as i64);
    if !force {
        if let Some(last) = auto.last_run {
            let next_eligible = last + interval;
            if now < next_eligible {
                debug!(next_eligible = %next_eligible, "Auto-optimization skipped, ran too recently");
                return Ok(AutoOptimizeOutcome::Skipped { next_eligible });
            }
        }
    }

    state.mark_optimization_run(now);

    let targets = state.auto_optimization().target_metrics.clone();
    let areas = state.auto_optimization().priority_areas.clone();
    let success_rate = state.success_rate();
    let average_tool_usage = state.average_tool_usage();
    let efficiency = state.productivity().efficiency_score;
    let productivity_score = state.performance().productivity_score;

    let check_performance = areas
        .iter()
        .any(|a| matches!(a, PriorityArea::Performance | PriorityArea::Balanced));
    let check_productivity = areas
        .iter()
        .any(|a| matches!(a, PriorityArea::Productivity | PriorityArea::Balanced));

    let mut improvements = Vec::new();

    if check_performance {
        // An undefined success rate (no interactions yet) is no signal,
        // not a shortfall.
        if let Some(rate) = success_rate {
            if rate < targets.min_success_rate {
                improvements.push(format!(
                    "success rate {:.1}% below target {:.1}%",
                    rate * 100.0,
                    targets.min_success_rate * 100.0
                ));
            }
        }
        if average_tool_usage < targets.min_tool_usage {
            improvements.push(format!(
                "average tool usage {:.1} below target {:.1}",
                average_tool_usage, targets.min_tool_usage
            ));
        }
    }

    if check_productivity {
        if efficiency < 0.85 {
            improvements.push(format!("efficiency score {:.2} below 0.85", efficiency));
        }
        if productivity_score < targets.target_productivity {
            improvements.push(format!(
                "productivity score {:.2} below target {:.2}",
                productivity_score, targets.target_productivity
            ));
        }
    }

    if !improvements.is_empty() {
        state.increment_productivity_score(0.05);
        state.increment_efficiency_score(0.03);
        state.add_fact(
            format!("Self-optimization nudged scores: {}", improvements.join("; ")),
            0.7,
            FactSource::AutoOptimization,
        )?;
        info!(flagged = improvements.len(), "Auto-optimization applied score nudges");
    }

    state.record_optimization_success(now);

    Ok(AutoOptimizeOutcome::Ran { improvements })
}

pub fn handle_auto_optimize(ctx: &ToolContext, args: &Value) -> Result<ToolResult> {
    let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);

    match run_auto_optimize(ctx, force)? {
        AutoOptimizeOutcome::Skipped { next_eligible } => Ok(ToolResult::text(format!(
            "Auto-optimization skipped: ran recently. Next eligible at {}",
            next_eligible.to_rfc3339()
        ))),
        AutoOptimizeOutcome::Ran { improvements } if improvements.is_empty() => Ok(
            ToolResult::text("Auto-optimization ran: all metrics within targets."),
        ),
        AutoOptimizeOutcome::Ran { improvements } => {
            let mut output = String::from("Auto-optimization ran. Flagged:");
            for item in &improvements {
                output.push_str(&format!("\n  - {}", item));
            }
            output.push_str("\nApplied: productivity +0.05, efficiency +0.03 (capped at 1.0)");
            Ok(ToolResult::text(output))
        }
    }
}

/// Read-only performance report with rule-based recommendations.
pub fn handle_optimize_performance(ctx: &ToolContext) -> Result<ToolResult> {
    let state = ctx.lock_state()?;
    let perf = state.performance();
    let targets = &state.auto_optimization().target_metrics;

    if perf.total_interactions == 0 && perf.tool_usage_count.is_empty() {
        return Ok(ToolResult::text(
            "No performance data recorded yet. Log interactions or tool calls first.",
        ));
    }

    let success_line = match state.success_rate() {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "N/A".to_string(),
    };

    let mut output = format!(
        "## Performance Report\n\n\
         Interactions: {} (success rate: {})\n\
         Average response time: {:.1}ms (target: under {:.0}ms)\n\
         Errors: {}{}\n\
         Productivity score: {:.2}\n\
         Optimizations: {} succeeded, {} failed",
        perf.total_interactions,
        success_line,
        perf.average_response_time,
        targets.max_response_time,
        perf.error_count,
        perf.last_error
            .as_deref()
            .map(|e| format!(" (last: {})", e))
            .unwrap_or_default(),
        perf.productivity_score,
        perf.optimizations_succeeded,
        perf.optimizations_failed,
    );

    if !perf.tool_usage_count.is_empty() {
        let mut ranked: Vec<_> = perf.tool_usage_count.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1));
        output.push_str("\n\nMost used tools:");
        for (tool, count) in ranked.into_iter().take(5) {
            output.push_str(&format!("\n  {} ({} calls)", tool, count));
        }
    }

    let mut recommendations = Vec::new();
    if let Some(rate) = state.success_rate() {
        if rate < targets.min_success_rate {
            recommendations
                .push("success rate is below target; review recent failed interactions".into());
        }
    }
    if perf.average_response_time > targets.max_response_time {
        recommendations.push("average response time exceeds the target".into());
    }
    if perf.error_count > 0 {
        recommendations.push("handler errors were recorded; check the last error".into());
    }
    let duplicates = duplicate_pattern_count(&state);
    if duplicates > 0 {
        recommendations.push(format!(
            "{} duplicate pattern name(s) recorded; consider consolidating",
            duplicates
        ));
    }

    if recommendations.is_empty() {
        output.push_str("\n\nNo recommendations; metrics look healthy.");
    } else {
        output.push_str("\n\nRecommendations:");
        for item in recommendations {
            output.push_str(&format!("\n  - {}", item));
        }
    }

    Ok(ToolResult::text(output))
}

/// Read-only per-tool usage and effectiveness report.
pub fn handle_enhance_tool_usage(ctx: &ToolContext, args: &Value) -> Result<ToolResult> {
    let filter = args.get("toolName").and_then(Value::as_str);

    let state = ctx.lock_state()?;
    let effectiveness = &state.productivity().tool_effectiveness;

    if effectiveness.is_empty() {
        return Ok(ToolResult::text("No tool usage recorded yet."));
    }

    let mut output = String::from("## Tool Usage\n");
    let mut matched = false;
    for (tool, eff) in effectiveness {
        if let Some(name) = filter {
            if tool != name {
                continue;
            }
        }
        matched = true;

        // Zero uses renders a sentinel, never a division.
        let rate_line = match eff.success_rate() {
            Some(rate) => format!("{:.1}%", rate * 100.0),
            None => "N/A".to_string(),
        };
        output.push_str(&format!(
            "\n{}: {} uses, success rate {}",
            tool, eff.uses, rate_line
        ));
        if let Some(rate) = eff.success_rate() {
            if rate < 0.5 {
                output.push_str(" (low success rate, review how this tool is invoked)");
            }
        }
    }

    if !matched {
        return Ok(ToolResult::text(format!(
            "No usage recorded for tool {:?}.",
            filter.unwrap_or_default()
        )));
    }

    Ok(ToolResult::text(output))
}

fn duplicate_pattern_count(state: &crate::state::AgentState) -> usize {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for pattern in state.patterns() {
        *seen.entry(pattern.pattern.as_str()).or_insert(0) += 1;
    }
    seen.values().filter(|count| **count > 1).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::mcp::protocol::Content;
    use crate::state::{FactSource, NewInteraction};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ToolContext {
        ToolContext::new(Arc::new(ServerConfig::default()))
    }

    fn text_of(result: &ToolResult) -> &str {
        match &result.content[0] {
            Content::Text { text } => text,
        }
    }

    #[test]
    fn test_second_unforced_run_is_skipped() {
        let ctx = context();

        let first = run_auto_optimize(&ctx, false).unwrap();
        assert!(matches!(first, AutoOptimizeOutcome::Ran { .. }));

        let second = run_auto_optimize(&ctx, false).unwrap();
        assert!(matches!(second, AutoOptimizeOutcome::Skipped { .. }));
    }

    #[test]
    fn test_forced_run_always_executes() {
        let ctx = context();
        run_auto_optimize(&ctx, false).unwrap();

        let forced = run_auto_optimize(&ctx, true).unwrap();
        assert!(matches!(forced, AutoOptimizeOutcome::Ran { .. }));
    }

    #[test]
    fn test_skip_does_not_mutate() {
        let ctx = context();
        run_auto_optimize(&ctx, false).unwrap();

        let (score_before, runs_before) = {
            let state = ctx.lock_state().unwrap();
            (
                state.performance().productivity_score,
                state.performance().optimizations_succeeded,
            )
        };

        run_auto_optimize(&ctx, false).unwrap();

        let state = ctx.lock_state().unwrap();
        assert_eq!(state.performance().productivity_score, score_before);
        assert_eq!(state.performance().optimizations_succeeded, runs_before);
    }

    #[test]
    fn test_run_nudges_scores_and_appends_summary_fact() {
        let ctx = context();

        // Fresh state: zero scores and zero tool usage flag improvements.
        let outcome = run_auto_optimize(&ctx, false).unwrap();
        let AutoOptimizeOutcome::Ran { improvements } = outcome else {
            panic!("expected a run");
        };
        assert!(!improvements.is_empty());

        let state = ctx.lock_state().unwrap();
        assert_eq!(state.performance().productivity_score, 0.05);
        assert!((state.productivity().efficiency_score - 0.03).abs() < 1e-9);
        let summaries = state
            .facts()
            .iter()
            .filter(|f| f.source == FactSource::AutoOptimization)
            .count();
        assert_eq!(summaries, 1);
        assert!(state.auto_optimization().last_run.is_some());
    }

    #[test]
    fn test_repeated_forced_runs_never_overshoot_cap() {
        let ctx = context();
        for _ in 0..50 {
            run_auto_optimize(&ctx, true).unwrap();
        }

        let state = ctx.lock_state().unwrap();
        assert!(state.performance().productivity_score <= 1.0);
        assert!(state.productivity().efficiency_score <= 1.0);
    }

    #[test]
    fn test_handle_auto_optimize_reports_skip() {
        let ctx = context();
        handle_auto_optimize(&ctx, &json!({})).unwrap();

        let result = handle_auto_optimize(&ctx, &json!({})).unwrap();
        assert!(text_of(&result).contains("skipped"));
        assert!(text_of(&result).contains("Next eligible"));
    }

    #[test]
    fn test_optimize_performance_no_data() {
        let ctx = context();
        let result = handle_optimize_performance(&ctx).unwrap();
        assert!(!result.is_error());
        assert!(text_of(&result).contains("No performance data"));
    }

    #[test]
    fn test_optimize_performance_reports_duplicates() {
        let ctx = context();
        {
            let mut state = ctx.lock_state().unwrap();
            state.add_interaction(NewInteraction {
                user_input: "hi".into(),
                ai_response: "hello".into(),
                feedback: None,
                success: Some(true),
                context: None,
            });
            state.add_pattern("repeat", "answer", 0.4).unwrap();
            state.add_pattern("repeat", "answer", 0.6).unwrap();
        }

        let result = handle_optimize_performance(&ctx).unwrap();
        assert!(text_of(&result).contains("duplicate pattern"));
    }

    #[test]
    fn test_optimize_performance_does_not_mutate() {
        let ctx = context();
        {
            let mut state = ctx.lock_state().unwrap();
            state.track_tool_usage("echo", true);
        }
        let facts_before = ctx.lock_state().unwrap().facts().len();

        handle_optimize_performance(&ctx).unwrap();

        let state = ctx.lock_state().unwrap();
        assert_eq!(state.facts().len(), facts_before);
        assert_eq!(state.performance().tool_usage_count["echo"], 1);
    }

    #[test]
    fn test_enhance_tool_usage_sentinel_and_filter() {
        let ctx = context();
        let result = handle_enhance_tool_usage(&ctx, &json!({})).unwrap();
        assert!(text_of(&result).contains("No tool usage recorded yet"));

        {
            let mut state = ctx.lock_state().unwrap();
            state.track_tool_usage("echo", true);
            state.track_tool_usage("echo", false);
        }

        let result = handle_enhance_tool_usage(&ctx, &json!({})).unwrap();
        assert!(text_of(&result).contains("echo: 2 uses, success rate 50.0%"));

        let result =
            handle_enhance_tool_usage(&ctx, &json!({"toolName": "missing"})).unwrap();
        assert!(text_of(&result).contains("No usage recorded"));
    }
}

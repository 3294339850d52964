use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::ToolContext;
use crate::mcp::protocol::ToolResult;
use crate::state::FactSource;
use crate::validate;

/// Record an interaction and mine its feedback text for signals. The two
/// keyword checks are independent: feedback containing triggers for both
/// records both a reinforcing fact and an avoid pattern.
pub fn handle_learn_from_interaction(ctx: &ToolContext, args: &Value) -> Result<ToolResult> {
    let input = match validate::learn_input(args) {
        Ok(input) => input,
        Err(e) => return Ok(ToolResult::error(e.to_string())),
    };

    let mut state = ctx.lock_state()?;

    let feedback = input.interaction.feedback.clone();
    let user_input = input.interaction.user_input.clone();
    let id = state.add_interaction(input.interaction);
    debug!(interaction = %id, "Interaction recorded");

    let mut notes = Vec::new();
    if let Some(text) = feedback {
        let lowered = text.to_lowercase();

        if lowered.contains("good") || lowered.contains("great") {
            state.add_fact(
                format!("Positive feedback for response to: {}", excerpt(&user_input)),
                0.8,
                FactSource::UserFeedback,
            )?;
            notes.push("reinforce the current response style".to_string());
        }

        if lowered.contains("bad") || lowered.contains("improve") {
            state.add_pattern(
                format!("avoid response style used for: {}", excerpt(&user_input)),
                "avoid",
                0.2,
            )?;
            notes.push("adjust responses to similar inputs".to_string());
        }
    }

    let mut output = format!(
        "Interaction recorded ({})\nTotal interactions: {}",
        id,
        state.performance().total_interactions
    );
    if !notes.is_empty() {
        output.push_str("\nLearned: ");
        output.push_str(&notes.join("; "));
    }

    Ok(ToolResult::text(output))
}

/// Read-only summary of accumulated learning. Never mutates; absence of
/// data renders as explicit text rather than an error.
pub fn handle_get_learning_insights(ctx: &ToolContext) -> Result<ToolResult> {
    let state = ctx.lock_state()?;
    let perf = state.performance();

    let success_line = match state.success_rate() {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "no interactions recorded yet".to_string(),
    };

    let mut output = format!(
        "## Learning Insights\n\n\
         Interactions: {} ({} successful, success rate: {})\n\
         Feedback entries: {}\n\
         Facts: {} | Patterns: {}",
        perf.total_interactions,
        perf.successful_interactions,
        success_line,
        state.feedback().len(),
        state.facts().len(),
        state.patterns().len(),
    );

    let recent: Vec<_> = state.facts().iter().rev().take(5).collect();
    if recent.is_empty() {
        output.push_str("\n\nNo facts recorded yet.");
    } else {
        output.push_str("\n\nRecent facts:");
        for fact in recent {
            output.push_str(&format!(
                "\n  [{}] {} (confidence {:.2})",
                fact.source, fact.content, fact.confidence
            ));
        }
    }

    let mut ranked: Vec<_> = state.patterns().iter().collect();
    ranked.sort_by(|a, b| {
        b.effectiveness
            .partial_cmp(&a.effectiveness)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if ranked.is_empty() {
        output.push_str("\n\nNo patterns recorded yet.");
    } else {
        output.push_str("\n\nTop patterns:");
        for pattern in ranked.into_iter().take(5) {
            output.push_str(&format!(
                "\n  {} -> {} (effectiveness {:.2})",
                pattern.pattern, pattern.response_type, pattern.effectiveness
            ));
        }
    }

    let prefs = state.preferences();
    output.push_str(&format!(
        "\n\nPreferences: {:?} style, {:?} detail, {:?} proactivity, learning rate {}",
        prefs.communication_style,
        prefs.response_detail_level,
        prefs.proactivity_level,
        prefs.learning_rate,
    ));

    Ok(ToolResult::text(output))
}

// Keeps fact/pattern text short when user input runs long.
fn excerpt(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

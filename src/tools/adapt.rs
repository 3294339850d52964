use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::ToolContext;
use crate::mcp::protocol::ToolResult;
use crate::state::FactSource;
use crate::validate;

/// Merge explicitly present adaptation fields into the preferences record.
/// Every effective adaptation appends exactly one audit fact summarizing
/// the diff.
pub fn handle_adapt_behavior(ctx: &ToolContext, args: &Value) -> Result<ToolResult> {
    let update = match validate::adaptation_input(args) {
        Ok(update) => update,
        Err(e) => return Ok(ToolResult::error(e.to_string())),
    };

    if update.is_empty() {
        return Ok(ToolResult::text(
            "No adaptation fields provided; preferences unchanged.",
        ));
    }

    let mut state = ctx.lock_state()?;
    let changes = state.merge_preferences(update);
    debug!(changes = changes.len(), "Preferences adapted");

    state.add_fact(
        format!("Adapted preferences: {}", changes.join(", ")),
        0.85,
        FactSource::BehavioralAdaptation,
    )?;

    let mut output = String::from("Behavior adapted:");
    for change in &changes {
        output.push_str(&format!("\n  {}", change));
    }

    Ok(ToolResult::text(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::state::{CommunicationStyle, FactSource};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ToolContext {
        ToolContext::new(Arc::new(ServerConfig::default()))
    }

    fn adaptation_facts(ctx: &ToolContext) -> usize {
        ctx.lock_state()
            .unwrap()
            .facts()
            .iter()
            .filter(|fact| fact.source == FactSource::BehavioralAdaptation)
            .count()
    }

    #[test]
    fn test_adapt_sets_field_and_appends_one_fact() {
        let ctx = context();
        let args = json!({"adaptation": {"communicationStyle": "formal"}});

        let result = handle_adapt_behavior(&ctx, &args).unwrap();
        assert!(!result.is_error());

        let state = ctx.lock_state().unwrap();
        assert_eq!(
            state.preferences().communication_style,
            CommunicationStyle::Formal
        );
        drop(state);
        assert_eq!(adaptation_facts(&ctx), 1);
    }

    #[test]
    fn test_invalid_enum_leaves_state_untouched() {
        let ctx = context();
        let args = json!({
            "adaptation": {"communicationStyle": "loud", "proactivityLevel": "high"}
        });

        let result = handle_adapt_behavior(&ctx, &args).unwrap();
        assert!(result.is_error());

        let state = ctx.lock_state().unwrap();
        assert_eq!(
            state.preferences().communication_style,
            CommunicationStyle::Casual
        );
        drop(state);
        assert_eq!(adaptation_facts(&ctx), 0);
    }

    #[test]
    fn test_empty_adaptation_appends_no_fact() {
        let ctx = context();
        let args = json!({"adaptation": {}});

        let result = handle_adapt_behavior(&ctx, &args).unwrap();
        assert!(!result.is_error());
        assert_eq!(adaptation_facts(&ctx), 0);
    }

    #[test]
    fn test_custom_preferences_merge() {
        let ctx = context();
        handle_adapt_behavior(
            &ctx,
            &json!({"adaptation": {"customPreferences": {"theme": "dark"}}}),
        )
        .unwrap();
        handle_adapt_behavior(
            &ctx,
            &json!({"adaptation": {"customPreferences": {"theme": "light", "pace": "fast"}}}),
        )
        .unwrap();

        let state = ctx.lock_state().unwrap();
        assert_eq!(state.preferences().custom["theme"], "light");
        assert_eq!(state.preferences().custom["pace"], "fast");
        drop(state);
        assert_eq!(adaptation_facts(&ctx), 2);
    }
}

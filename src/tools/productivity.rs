use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::ToolContext;
use crate::mcp::protocol::ToolResult;
use crate::validate::{self, ProductivityAction};

/// Five-way productivity dispatch. Validation happens before any mutation;
/// an unknown or malformed action comes back as an in-band error result.
pub fn handle_track_productivity(ctx: &ToolContext, args: &Value) -> Result<ToolResult> {
    let action = match validate::productivity_action(args) {
        Ok(action) => action,
        Err(e) => return Ok(ToolResult::error(e.to_string())),
    };

    match action {
        ProductivityAction::AddTask {
            name,
            efficiency,
            tools_used,
        } => add_task(ctx, &name, efficiency, &tools_used),
        ProductivityAction::CompleteTask { goal_id } => complete_task(ctx, &goal_id),
        ProductivityAction::SetGoal {
            description,
            priority,
            deadline,
        } => set_goal(ctx, description, priority, deadline),
        ProductivityAction::GetMetrics => get_metrics(ctx),
        ProductivityAction::AnalyzeEfficiency => analyze_efficiency(ctx),
    }
}

fn add_task(
    ctx: &ToolContext,
    name: &str,
    efficiency: Option<f64>,
    tools_used: &[String],
) -> Result<ToolResult> {
    let mut state = ctx.lock_state()?;

    if let Err(e) = state.record_task(tools_used, efficiency) {
        return Ok(ToolResult::error(e.to_string()));
    }
    debug!(task = %name, tools = tools_used.len(), "Task recorded");

    let mut output = format!(
        "Task recorded: {}\nTasks completed: {}",
        name,
        state.productivity().tasks_completed
    );
    if efficiency.is_some() {
        output.push_str(&format!(
            "\nEfficiency score: {:.2}",
            state.productivity().efficiency_score
        ));
    }
    if !tools_used.is_empty() {
        output.push_str(&format!("\nTools credited: {}", tools_used.join(", ")));
    }

    Ok(ToolResult::text(output))
}

fn complete_task(ctx: &ToolContext, goal_id: &str) -> Result<ToolResult> {
    let mut state = ctx.lock_state()?;

    match state.complete_goal(goal_id) {
        Ok(goal) => Ok(ToolResult::text(format!(
            "Goal completed: {}\nActive goals: {} | Completed goals: {}",
            goal.description,
            state.productivity().user_goals.len(),
            state.productivity().completed_goals.len(),
        ))),
        Err(e) => Ok(ToolResult::error(e.to_string())),
    }
}

fn set_goal(
    ctx: &ToolContext,
    description: String,
    priority: crate::state::GoalPriority,
    deadline: Option<String>,
) -> Result<ToolResult> {
    let mut state = ctx.lock_state()?;
    let goal = state.add_goal(description, priority, deadline);

    Ok(ToolResult::text(format!(
        "Goal set: {} ({:?} priority)\nid: {}\nActive goals: {}",
        goal.description,
        goal.priority,
        goal.id,
        state.productivity().user_goals.len(),
    )))
}

fn get_metrics(ctx: &ToolContext) -> Result<ToolResult> {
    let state = ctx.lock_state()?;
    Ok(ToolResult::text(serde_json::to_string_pretty(
        state.productivity(),
    )?))
}

fn analyze_efficiency(ctx: &ToolContext) -> Result<ToolResult> {
    let state = ctx.lock_state()?;
    let productivity = state.productivity();

    if productivity.tasks_completed == 0 && productivity.tool_effectiveness.is_empty() {
        return Ok(ToolResult::text(
            "No productivity data recorded yet. Add tasks to start tracking efficiency.",
        ));
    }

    let mut output = format!(
        "## Efficiency Analysis\n\n\
         Tasks completed: {}\n\
         Efficiency score: {:.2}\n\
         Goals: {} active, {} completed",
        productivity.tasks_completed,
        productivity.efficiency_score,
        productivity.user_goals.len(),
        productivity.completed_goals.len(),
    );

    if !productivity.tool_effectiveness.is_empty() {
        output.push_str("\n\nTool effectiveness:");
        for (tool, eff) in &productivity.tool_effectiveness {
            let rate = match eff.success_rate() {
                Some(rate) => format!("{:.1}%", rate * 100.0),
                None => "N/A".to_string(),
            };
            output.push_str(&format!("\n  {}: {} uses, {}", tool, eff.uses, rate));
        }
    }

    Ok(ToolResult::text(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::mcp::protocol::Content;
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
    fn test_add_task_happy_path() {
        let ctx = context();
        let args = json!({
            "action": "add_task",
            "task": {"name": "refactor", "efficiency": 0.9, "toolsUsed": ["editor"]}
        });

        let result = handle_track_productivity(&ctx, &args).unwrap();
        assert!(!result.is_error());

        let state = ctx.lock_state().unwrap();
        assert_eq!(state.productivity().tasks_completed, 1);
        assert_eq!(state.productivity().tool_effectiveness["editor"].uses, 1);
    }

    #[test]
    fn test_add_task_out_of_range_efficiency_no_partial_mutation() {
        let ctx = context();
        let args = json!({
            "action": "add_task",
            "task": {"name": "t", "efficiency": 1.5, "toolsUsed": ["editor"]}
        });

        let result = handle_track_productivity(&ctx, &args).unwrap();
        assert!(result.is_error());
        assert!(text_of(&result).contains("between 0 and 1"));

        let state = ctx.lock_state().unwrap();
        assert_eq!(state.productivity().tasks_completed, 0);
        assert!(state.productivity().tool_effectiveness.is_empty());
    }

    #[test]
    fn test_goal_set_then_complete_by_id() {
        let ctx = context();
        let result = handle_track_productivity(
            &ctx,
            &json!({"action": "set_goal", "goal": {"description": "ship", "priority": "high"}}),
        )
        .unwrap();

        let id_line = text_of(&result)
            .lines()
            .find(|line| line.starts_with("id: "))
            .unwrap();
        let goal_id = id_line.trim_start_matches("id: ").to_string();

        let result = handle_track_productivity(
            &ctx,
            &json!({"action": "complete_task", "goalId": goal_id}),
        )
        .unwrap();
        assert!(!result.is_error());
        assert!(text_of(&result).contains("Goal completed: ship"));
    }

    #[test]
    fn test_complete_unknown_goal_is_error_result() {
        let ctx = context();
        let result = handle_track_productivity(
            &ctx,
            &json!({"action": "complete_task", "goalId": "nope"}),
        )
        .unwrap();
        assert!(result.is_error());
        assert!(text_of(&result).contains("no goal found"));
    }

    #[test]
    fn test_unknown_action_is_error_result() {
        let ctx = context();
        let result =
            handle_track_productivity(&ctx, &json!({"action": "defragment"})).unwrap();
        assert!(result.is_error());
    }

    #[test]
    fn test_get_metrics_renders_json() {
        let ctx = context();
        let result =
            handle_track_productivity(&ctx, &json!({"action": "get_metrics"})).unwrap();
        assert!(text_of(&result).contains("tasksCompleted"));
    }

    #[test]
    fn test_analyze_efficiency_no_data() {
        let ctx = context();
        let result =
            handle_track_productivity(&ctx, &json!({"action": "analyze_efficiency"})).unwrap();
        assert!(text_of(&result).contains("No productivity data"));
    }
}

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::state::{
    CommunicationStyle, GoalPriority, NewInteraction, PreferenceUpdate, ProactivityLevel,
    ResponseDetailLevel,
};

/// Preference field names callers may not shadow through the custom map.
const RESERVED_PREFERENCE_KEYS: [&str; 5] = [
    "communicationStyle",
    "responseDetailLevel",
    "proactivityLevel",
    "learningRate",
    "custom",
];

/// A structurally invalid tool input. Validation is all-or-nothing: either
/// the full validated structure comes back or one of these, and the caller
/// must not have mutated anything.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} {problem}")]
    Invalid { field: &'static str, problem: String },
}

impl ValidationError {
    fn missing(field: &'static str) -> Self {
        Self::Missing { field }
    }

    fn invalid(field: &'static str, problem: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            problem: problem.into(),
        }
    }
}

/// Validated `learn_from_interaction` input
#[derive(Debug, Clone)]
pub struct LearnInput {
    pub interaction: NewInteraction,
}

pub fn learn_input(args: &Value) -> Result<LearnInput, ValidationError> {
    let interaction = args
        .get("interaction")
        .ok_or_else(|| ValidationError::missing("interaction"))?;
    let interaction = interaction
        .as_object()
        .ok_or_else(|| ValidationError::invalid("interaction", "must be an object"))?;

    let user_input = non_empty_string(interaction.get("userInput"), "interaction.userInput")?;
    let ai_response = non_empty_string(interaction.get("aiResponse"), "interaction.aiResponse")?;

    let success = match interaction.get("success") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => {
            return Err(ValidationError::invalid(
                "interaction.success",
                "must be a boolean",
            ))
        }
    };

    Ok(LearnInput {
        interaction: NewInteraction {
            user_input,
            ai_response,
            feedback: optional_string(interaction.get("userFeedback")),
            success,
            context: optional_string(interaction.get("context")),
        },
    })
}

/// Validated `adapt_behavior` input
pub fn adaptation_input(args: &Value) -> Result<PreferenceUpdate, ValidationError> {
    let adaptation = args
        .get("adaptation")
        .ok_or_else(|| ValidationError::missing("adaptation"))?;
    if adaptation.is_array() {
        return Err(ValidationError::invalid(
            "adaptation",
            "must be an object, not an array",
        ));
    }
    let adaptation = adaptation
        .as_object()
        .ok_or_else(|| ValidationError::invalid("adaptation", "must be an object"))?;

    let communication_style = match adaptation.get("communicationStyle").and_then(Value::as_str) {
        None => None,
        Some("formal") => Some(CommunicationStyle::Formal),
        Some("casual") => Some(CommunicationStyle::Casual),
        Some("technical") => Some(CommunicationStyle::Technical),
        Some("friendly") => Some(CommunicationStyle::Friendly),
        Some(other) => {
            return Err(ValidationError::invalid(
                "adaptation.communicationStyle",
                format!(
                    "must be one of formal, casual, technical, friendly (got {:?})",
                    other
                ),
            ))
        }
    };

    let response_detail_level = match adaptation
        .get("responseDetailLevel")
        .and_then(Value::as_str)
    {
        None => None,
        Some("concise") => Some(ResponseDetailLevel::Concise),
        Some("balanced") => Some(ResponseDetailLevel::Balanced),
        Some("detailed") => Some(ResponseDetailLevel::Detailed),
        Some(other) => {
            return Err(ValidationError::invalid(
                "adaptation.responseDetailLevel",
                format!(
                    "must be one of concise, balanced, detailed (got {:?})",
                    other
                ),
            ))
        }
    };

    let proactivity_level = match adaptation.get("proactivityLevel").and_then(Value::as_str) {
        None => None,
        Some("low") => Some(ProactivityLevel::Low),
        Some("medium") => Some(ProactivityLevel::Medium),
        Some("high") => Some(ProactivityLevel::High),
        Some(other) => {
            return Err(ValidationError::invalid(
                "adaptation.proactivityLevel",
                format!("must be one of low, medium, high (got {:?})", other),
            ))
        }
    };

    let learning_rate = match adaptation.get("learningRate") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let rate = value.as_f64().ok_or_else(|| {
                ValidationError::invalid("adaptation.learningRate", "must be a number")
            })?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(ValidationError::invalid(
                    "adaptation.learningRate",
                    format!("must be between 0 and 1 (got {})", rate),
                ));
            }
            Some(rate)
        }
    };

    let mut custom = BTreeMap::new();
    if let Some(map) = adaptation.get("customPreferences") {
        let map = map.as_object().ok_or_else(|| {
            ValidationError::invalid("adaptation.customPreferences", "must be an object")
        })?;
        for (key, value) in map {
            if RESERVED_PREFERENCE_KEYS.contains(&key.as_str()) {
                return Err(ValidationError::invalid(
                    "adaptation.customPreferences",
                    format!("may not override the reserved key {:?}", key),
                ));
            }
            custom.insert(key.clone(), value.clone());
        }
    }

    Ok(PreferenceUpdate {
        communication_style,
        response_detail_level,
        proactivity_level,
        learning_rate,
        custom,
    })
}

/// The five `track_productivity` actions as a tagged union. Dispatch over
/// this enum is exhaustive; an unknown tag never reaches the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductivityAction {
    AddTask {
        name: String,
        efficiency: Option<f64>,
        tools_used: Vec<String>,
    },
    CompleteTask {
        goal_id: String,
    },
    SetGoal {
        description: String,
        priority: GoalPriority,
        deadline: Option<String>,
    },
    GetMetrics,
    AnalyzeEfficiency,
}

pub fn productivity_action(args: &Value) -> Result<ProductivityAction, ValidationError> {
    let action = args
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::missing("action"))?;

    match action {
        "add_task" => add_task_action(args),
        "complete_task" => {
            let goal_id = non_empty_string(args.get("goalId"), "goalId")?;
            Ok(ProductivityAction::CompleteTask { goal_id })
        }
        "set_goal" => set_goal_action(args),
        "get_metrics" => Ok(ProductivityAction::GetMetrics),
        "analyze_efficiency" => Ok(ProductivityAction::AnalyzeEfficiency),
        other => Err(ValidationError::invalid(
            "action",
            format!(
                "must be one of add_task, complete_task, set_goal, get_metrics, \
                 analyze_efficiency (got {:?})",
                other
            ),
        )),
    }
}

fn add_task_action(args: &Value) -> Result<ProductivityAction, ValidationError> {
    let task = args
        .get("task")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::missing("task"))?;

    let name = non_empty_string(task.get("name"), "task.name")?;

    let efficiency = match task.get("efficiency") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let sample = value.as_f64().ok_or_else(|| {
                ValidationError::invalid("task.efficiency", "must be a number")
            })?;
            if !(0.0..=1.0).contains(&sample) {
                return Err(ValidationError::invalid(
                    "task.efficiency",
                    format!("must be between 0 and 1 (got {})", sample),
                ));
            }
            Some(sample)
        }
    };

    let tools_used = match task.get("toolsUsed") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => {
            let items = value.as_array().ok_or_else(|| {
                ValidationError::invalid("task.toolsUsed", "must be an array of strings")
            })?;
            let mut tools = Vec::with_capacity(items.len());
            for item in items {
                let tool = item.as_str().ok_or_else(|| {
                    ValidationError::invalid(
                        "task.toolsUsed",
                        "must contain only strings",
                    )
                })?;
                tools.push(tool.to_string());
            }
            tools
        }
    };

    Ok(ProductivityAction::AddTask {
        name,
        efficiency,
        tools_used,
    })
}

fn set_goal_action(args: &Value) -> Result<ProductivityAction, ValidationError> {
    let goal = args
        .get("goal")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::missing("goal"))?;

    let description = non_empty_string(goal.get("description"), "goal.description")?;

    let priority = match goal.get("priority").and_then(Value::as_str) {
        None => GoalPriority::Medium,
        Some("low") => GoalPriority::Low,
        Some("medium") => GoalPriority::Medium,
        Some("high") => GoalPriority::High,
        Some(other) => {
            return Err(ValidationError::invalid(
                "goal.priority",
                format!("must be one of low, medium, high (got {:?})", other),
            ))
        }
    };

    Ok(ProductivityAction::SetGoal {
        description,
        priority,
        deadline: optional_string(goal.get("deadline")),
    })
}

fn non_empty_string(value: Option<&Value>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::missing(field)),
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(ValidationError::invalid(field, "must not be empty")),
        Some(_) => Err(ValidationError::invalid(field, "must be a string")),
    }
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(String::from)
}

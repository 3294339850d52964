use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Keys stripped from tool arguments at every nesting level. Arguments are
/// later merged into long-lived state (custom preferences in particular),
/// so these must never survive into a handler.
pub const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("argument nesting exceeds the maximum depth of {max_depth}")]
    DepthExceeded { max_depth: usize },
}

/// Strip dangerous keys from an untrusted argument value, recursively.
///
/// Runs once, centrally, before arguments reach any tool handler. Exceeding
/// `max_depth` fails the whole call rather than returning a partial result;
/// the caller must treat that as an input rejection, not a tool error.
pub fn sanitize(value: &Value, max_depth: usize) -> Result<Value, SanitizeError> {
    sanitize_at(value, 1, max_depth, "$")
}

fn sanitize_at(
    value: &Value,
    depth: usize,
    max_depth: usize,
    path: &str,
) -> Result<Value, SanitizeError> {
    match value {
        Value::Object(map) => {
            if depth > max_depth {
                return Err(SanitizeError::DepthExceeded { max_depth });
            }
            let mut clean = Map::with_capacity(map.len());
            for (key, inner) in map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    warn!(key = %key, context = %path, "Dropped dangerous key from tool arguments");
                    continue;
                }
                let child_path = format!("{}.{}", path, key);
                clean.insert(
                    key.clone(),
                    sanitize_at(inner, depth + 1, max_depth, &child_path)?,
                );
            }
            Ok(Value::Object(clean))
        }
        Value::Array(items) => {
            if depth > max_depth {
                return Err(SanitizeError::DepthExceeded { max_depth });
            }
            let mut clean = Vec::with_capacity(items.len());
            for (idx, inner) in items.iter().enumerate() {
                let child_path = format!("{}[{}]", path, idx);
                clean.push(sanitize_at(inner, depth + 1, max_depth, &child_path)?);
            }
            Ok(Value::Array(clean))
        }
        scalar => Ok(scalar.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strips_dangerous_keys_at_top_level() {
        let input = json!({
            "message": "hi",
            "__proto__": {"polluted": true},
            "constructor": "x",
            "prototype": 1
        });

        let clean = sanitize(&input, 10).unwrap();
        assert_eq!(clean, json!({"message": "hi"}));
    }

    #[test]
    fn test_strips_nested_and_inside_arrays() {
        let input = json!({
            "outer": {
                "__proto__": {"bad": 1},
                "list": [
                    {"constructor": "x", "ok": true},
                    "plain"
                ]
            }
        });

        let clean = sanitize(&input, 10).unwrap();
        assert_eq!(
            clean,
            json!({"outer": {"list": [{"ok": true}, "plain"]}})
        );
    }

    #[test]
    fn test_leaves_other_structure_untouched() {
        let input = json!({
            "a": [1, 2, {"b": null}],
            "c": {"d": "e"},
            "f": 1.5
        });

        let clean = sanitize(&input, 10).unwrap();
        assert_eq!(clean, input);
    }

    #[test]
    fn test_idempotent() {
        let input = json!({"x": {"__proto__": 1, "y": [{"prototype": 2}]}});

        let once = sanitize(&input, 10).unwrap();
        let twice = sanitize(&once, 10).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_depth_cap_fails_whole_input() {
        // Build a value nested beyond depth 10.
        let mut value = json!("leaf");
        for _ in 0..12 {
            value = json!({ "inner": value });
        }

        let result = sanitize(&value, 10);
        assert!(matches!(result, Err(SanitizeError::DepthExceeded { .. })));
    }

    #[test]
    fn test_depth_exactly_at_cap_is_accepted() {
        let mut value = json!("leaf");
        for _ in 0..10 {
            value = json!({ "inner": value });
        }

        assert!(sanitize(&value, 10).is_ok());
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(sanitize(&json!(42), 10).unwrap(), json!(42));
        assert_eq!(sanitize(&json!(null), 10).unwrap(), json!(null));
        assert_eq!(sanitize(&json!("s"), 10).unwrap(), json!("s"));
    }
}

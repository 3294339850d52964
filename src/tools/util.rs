use anyhow::Result;
use serde_json::Value;

use crate::mcp::protocol::ToolResult;

/// Environment values `system_info` may report. Everything else stays
/// hidden regardless of the requested detail level.
const ENV_ALLOW_LIST: [&str; 2] = ["HOME", "LANG"];

pub fn handle_echo(args: &Value) -> Result<ToolResult> {
    let message = match args.get("message").and_then(Value::as_str) {
        Some(text) => text,
        None => return Ok(ToolResult::error("Missing required parameter: message")),
    };
    Ok(ToolResult::text(format!("Echo: {}", message)))
}

pub fn handle_system_info(args: &Value) -> Result<ToolResult> {
    let detail_level = args
        .get("detailLevel")
        .and_then(Value::as_str)
        .unwrap_or("basic");

    let mut output = format!(
        "Server: {} v{}\nOS: {}\nArch: {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    );

    if detail_level == "detailed" {
        output.push_str("\n\nEnvironment:");
        for name in ENV_ALLOW_LIST {
            let value = std::env::var(name).unwrap_or_else(|_| "unset".to_string());
            output.push_str(&format!("\n  {} = {}", name, value));
        }
    }

    Ok(ToolResult::text(output))
}

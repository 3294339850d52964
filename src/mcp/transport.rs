use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, trace};

use super::protocol::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};

pub trait Handler: Send + Sync {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse;
}

/// Run the MCP server over stdio transport.
///
/// Reads newline-delimited JSON from stdin, writes to stdout. All
/// logging/tracing goes to stderr only; stdout is the wire.
pub async fn run_stdio<H: Handler>(handler: H) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    debug!("MCP server started, listening on stdio");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        trace!("Received line: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let response =
                    JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e));
                write_response(&mut stdout, &response).await?;
                continue;
            }
        };

        debug!(
            "Processing request: method={}, id={:?}",
            request.method, request.id
        );

        let response = handler.handle(request).await;

        // Notifications get no reply unless they failed
        if response.id.is_some() || response.error.is_some() {
            write_response(&mut stdout, &response).await?;
        }
    }

    debug!("MCP server shutting down");
    Ok(())
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &JsonRpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    trace!("Sending response: {}", json);

    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    Ok(())
}

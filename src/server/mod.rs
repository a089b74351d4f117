//! Stdio protocol loop
//!
//! Requests arrive as newline-delimited JSON on stdin and responses leave as
//! newline-delimited JSON on stdout. Stdout is the wire: nothing else in the
//! process may write to it while serving (all diagnostics go to stderr, and
//! the merge engine forces engine verbosity off for the same reason).
//!
//! Requests are handled one at a time. A malformed line or an unknown tool
//! becomes an `ok:false` response; no request error terminates the loop.
//! Stdin EOF triggers best-effort session teardown and a clean exit.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::tools::{self, spawn_startup_version_check, AppContext};

/// One inbound tool invocation.
#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    /// Opaque correlation id echoed back in the response.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One outbound result.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub ok: bool,
    pub content: String,
}

/// Runs the request/response loop until stdin closes.
pub async fn serve(ctx: Arc<AppContext>) -> crate::Result<()> {
    spawn_startup_version_check(ctx.http.clone());
    tracing::info!("kumo-relay serving on stdio");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => {
                let id = request.id.clone();
                match tools::dispatch(&ctx, &request.tool, request.params).await {
                    Ok(content) => ToolResponse {
                        id,
                        ok: true,
                        content,
                    },
                    Err(error) => ToolResponse {
                        id,
                        ok: false,
                        content: error,
                    },
                }
            }
            Err(e) => ToolResponse {
                id: None,
                ok: false,
                content: format!("Malformed request: {e}"),
            },
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("Input closed, shutting down");
    ctx.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

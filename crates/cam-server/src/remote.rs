//! Remote control endpoint.
//!
//! JSON-lines over TCP: each request is one line like
//! `{"action": "trigger"}` or `{"action": "expName", "value": "mouse12"}`,
//! and every request — success or failure — is acknowledged with a
//! handshake reply on its own line:
//! `{"action": "handshake", "ok": true}`.
//!
//! Actions:
//! - `trigger` — stop all cameras (closing open runs cleanly), re-enable
//!   saving, re-arm and trigger.
//! - `expName` — change the experiment name; applies between runs.
//! - `control` — generic parameter update: `camera`, `name`, `value`.
//! - `log` — route a comment line into every open run log.
//! - `ping` — liveness check.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use cam_core::CamResult;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize)]
struct Request {
    action: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    camera: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Reply {
    action: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Reply {
    fn ok() -> Self {
        Self {
            action: "handshake",
            ok: true,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            action: "handshake",
            ok: false,
            error: Some(message.into()),
        }
    }
}

/// Accept loop. Runs until the task is dropped or the listener fails.
pub async fn serve(listener: TcpListener, orchestrator: Arc<Orchestrator>) -> CamResult<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(%peer, "remote client connected");
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, orchestrator).await {
                tracing::debug!(%peer, error = %e, "remote client connection ended");
            }
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    orchestrator: Arc<Orchestrator>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&orchestrator, request).await,
            Err(e) => Reply::err(format!("malformed request: {e}")),
        };
        let mut payload = serde_json::to_string(&reply).unwrap_or_else(|_| {
            r#"{"action":"handshake","ok":false,"error":"encode failure"}"#.to_string()
        });
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
    }
    Ok(())
}

async fn dispatch(orchestrator: &Orchestrator, request: Request) -> Reply {
    match request.action.as_str() {
        "ping" => Reply::ok(),
        "trigger" => match orchestrator.retrigger().await {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::err(e.to_string()),
        },
        "expName" => match request.value.as_ref().and_then(|v| v.as_str()) {
            Some(name) => {
                orchestrator.set_experiment(name).await;
                Reply::ok()
            }
            None => Reply::err("expName requires a string 'value'"),
        },
        "log" => match request.value.as_ref().and_then(|v| v.as_str()) {
            Some(text) => {
                orchestrator.comment(text).await;
                Reply::ok()
            }
            None => Reply::err("log requires a string 'value'"),
        },
        "control" => {
            let (Some(camera), Some(name), Some(value)) =
                (request.camera, request.name, request.value)
            else {
                return Reply::err("control requires 'camera', 'name' and 'value'");
            };
            match orchestrator.set_control(&camera, &name, value).await {
                Ok(()) => Reply::ok(),
                Err(e) => Reply::err(e.to_string()),
            }
        }
        other => Reply::err(format!("unknown action '{other}'")),
    }
}

//! Newline-delimited JSON command channel served by the worker binary.
//!
//! Each input line is one command and gets exactly one JSON reply line:
//!
//! - `{"op":"submit_job","request":{...}}` replies with a [`SubmitResponse`]
//! - `{"op":"get_job","job_id":"..."}` replies with the job snapshot, or
//!   `null` for an unknown id
//! - `{"op":"cancel_job","job_id":"..."}` replies with a [`CancelOutcome`]
//!
//! A bare render request (no `op`) is accepted as a submission. Failures reply
//! with `{"error": "..."}`.

use reelsmith_core::request::RenderRequest;
use reelsmith_core::types::JobId;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::queue::CancelOutcome;
use crate::service::{RenderService, SubmitResponse};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    SubmitJob {
        request: RenderRequest,
        #[serde(default)]
        priority: Option<i32>,
    },
    GetJob {
        job_id: JobId,
    },
    CancelJob {
        job_id: JobId,
    },
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("op").is_some() {
            return serde_json::from_value(value);
        }
        let request = serde_json::from_value(value)?;
        Ok(Command::SubmitJob {
            request,
            priority: None,
        })
    }
}

/// Answer one input line.
pub async fn handle_line(service: &RenderService, line: &str) -> Value {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed command");
            return error_reply(format!("invalid command: {e}"));
        }
    };
    match dispatch(service, command).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            error_reply(e.to_string())
        }
    }
}

async fn dispatch(service: &RenderService, command: Command) -> Result<Value, CommandError> {
    let reply = match command {
        Command::SubmitJob { request, priority } => {
            let response: SubmitResponse = match priority {
                Some(priority) => service.submit_job_with_priority(request, priority).await?,
                None => service.submit_job(request).await?,
            };
            serde_json::to_value(response)?
        }
        Command::GetJob { job_id } => serde_json::to_value(service.get_job(job_id).await?)?,
        Command::CancelJob { job_id } => {
            let outcome: CancelOutcome = service.cancel_job(job_id).await?;
            serde_json::to_value(outcome)?
        }
    };
    Ok(reply)
}

fn error_reply(message: String) -> Value {
    json!({ "error": message })
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),

    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

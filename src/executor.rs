//! Execution of generated analysis code against the active dataset.
//!
//! The crate never interprets generated code itself. An [`ExecutionBridge`]
//! hands code and data to an isolated sandbox and returns its textual result.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::{AnalystError, Result};

#[async_trait]
pub trait ExecutionBridge: Send + Sync {
    /// Run `code` against `dataset` and return the rendered result.
    async fn execute(&self, dataset: &Dataset, code: &str) -> Result<String>;
}

/// Bridge used when no sandbox is configured.
#[derive(Debug, Default)]
pub struct DisabledBridge;

#[async_trait]
impl ExecutionBridge for DisabledBridge {
    async fn execute(&self, _dataset: &Dataset, _code: &str) -> Result<String> {
        Err(AnalystError::Execution(
            "Code execution is disabled (no sandbox command configured)".into(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SandboxReply {
    success: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Spawns the sandbox command once per execution.
///
/// Protocol: one JSON object `{"columns", "rows", "code"}` on stdin, one JSON
/// object `{"success": bool, "result": ..., "error"?: str}` on stdout.
#[derive(Debug, Clone)]
pub struct SubprocessBridge {
    program: String,
    args: Vec<String>,
}

impl SubprocessBridge {
    /// `command[0]` is the program, the rest are its arguments.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AnalystError::Config("sandbox command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

fn render(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[async_trait]
impl ExecutionBridge for SubprocessBridge {
    async fn execute(&self, dataset: &Dataset, code: &str) -> Result<String> {
        let mut payload = dataset.to_json_payload();
        payload["code"] = Value::String(code.to_string());
        let input = serde_json::to_vec(&payload)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalystError::Execution(format!("failed to start sandbox '{}': {e}", self.program)))?;

        // Feed stdin alongside the output drain so neither pipe can fill up
        // while the other side waits.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&input).await?;
                stdin.shutdown().await
            })
        });
        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "sandbox closed stdin before reading the payload"),
                Err(e) => warn!(error = %e, "sandbox stdin writer aborted"),
            }
        }
        debug!(status = %output.status, bytes = output.stdout.len(), "sandbox finished");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "sandbox exited with failure");
            return Err(AnalystError::Execution(format!(
                "sandbox exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let reply: SandboxReply = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalystError::Execution(format!("unreadable sandbox reply: {e}")))?;
        if reply.success {
            Ok(render(reply.result))
        } else {
            let msg = reply.error.unwrap_or_else(|| render(reply.result));
            Err(AnalystError::Execution(msg))
        }
    }
}

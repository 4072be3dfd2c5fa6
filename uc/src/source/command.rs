//! Shell command fetch source

use std::process::Stdio;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::coordinator::Fetcher;

/// Environment variable carrying the resource identifier into the command
pub const RESOURCE_ID_ENV: &str = "UC_RESOURCE_ID";

/// How command stdout is turned into a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Trimmed stdout as a JSON string
    #[default]
    Text,
    /// Stdout parsed as JSON
    Json,
}

/// Fetcher that runs `sh -c <command>` and reads its stdout
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    command: String,
    output: OutputFormat,
}

impl CommandFetcher {
    pub fn new(command: impl Into<String>, output: OutputFormat) -> Self {
        Self {
            command: command.into(),
            output,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn parse(&self, stdout: &[u8]) -> Result<Value> {
        let text = String::from_utf8_lossy(stdout);
        match self.output {
            OutputFormat::Text => Ok(Value::String(text.trim().to_string())),
            OutputFormat::Json => serde_json::from_str(text.trim()).context("Command output is not valid JSON"),
        }
    }
}

#[async_trait]
impl Fetcher<Value> for CommandFetcher {
    async fn fetch(&self, resource_id: &str) -> Result<Value> {
        debug!(command = %self.command, %resource_id, "CommandFetcher::fetch: called");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(RESOURCE_ID_ENV, resource_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context(format!("Failed to run command: {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("command exited with {}: {}", output.status, stderr.trim()));
        }

        self.parse(&output.stdout)
    }
}

//! Execution results and output formats.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Return code reported when no process exit status exists (timeout, spawn
/// failure, missing interpreter).
pub const NO_EXIT_CODE: i32 = -1;

/// Outcome of running one command, directly or in a sandbox.
///
/// Failures are data: a timed-out or unspawnable command produces a result
/// with `success == false` and `return_code == -1`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time: Duration,
    pub platform: Platform,
    pub sandbox_used: bool,
    pub correlation_id: String,
    #[serde(default)]
    pub timed_out: bool,
    /// True when stdout or stderr was cut at the output cap.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ExecutionResult {
    /// A failed result with no exit status. `stderr` carries the reason.
    pub fn failure(
        stderr: impl Into<String>,
        platform: Platform,
        correlation_id: impl Into<String>,
    ) -> Self {
        let stderr = stderr.into();
        Self {
            success: false,
            return_code: NO_EXIT_CODE,
            stdout: String::new(),
            diagnostic: Some(stderr.clone()),
            stderr,
            execution_time: Duration::ZERO,
            platform,
            sandbox_used: false,
            correlation_id: correlation_id.into(),
            timed_out: false,
            truncated: false,
        }
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time.as_millis() as u64
    }
}

/// How captured output is rendered for the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Raw,
    Json,
    Table,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Json => "json",
            OutputFormat::Table => "table",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" | "text" => Ok(OutputFormat::Raw),
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

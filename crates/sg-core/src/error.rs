//! Errors that cross the sg-core public boundary.
//!
//! Only configuration and infrastructure problems are errors. A blocked
//! command is a `ValidationResult`; a timeout or spawn failure is an
//! `ExecutionResult`.

use std::io;
use std::path::PathBuf;

use sg_sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Misconfiguration: sandbox requested while disabled, interpreter
    /// unresolvable, unreadable rule document. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("rule store {path}: {source}")]
    RuleStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("rule document {path} is invalid: {source}")]
    RuleDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

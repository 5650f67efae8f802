use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use sg_protocol::Platform;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub policy: PolicyConfig,
    pub confirmation: ConfirmationConfig,
    pub sandbox: SandboxConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Interpreter selection: "auto", "pwsh", "powershell" or "sh".
    pub interpreter: String,
    /// Hard wall-clock bound per command.
    pub timeout_secs: u64,
    /// Byte cap applied to stdout and stderr separately.
    pub max_output_bytes: usize,
    /// Dialect commands are adapted to before running: "auto" or a platform name.
    pub target_platform: String,
    /// Variables overlaid on the inherited host environment.
    pub env: BTreeMap<String, String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: "auto".to_string(),
            timeout_secs: 30,
            max_output_bytes: 100_000,
            target_platform: "auto".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Resolve `target_platform`, falling back to the host for "auto" or
    /// unknown values.
    pub fn resolve_target(&self) -> Platform {
        match self.target_platform.as_str() {
            "auto" | "" => Platform::current(),
            other => other.parse().unwrap_or_else(|e| {
                tracing::warn!("{e}, using host platform");
                Platform::current()
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Custom rule document path. Defaults to ~/.local/share/shellgate/rules.json.
    pub rules_path: Option<String>,
}

impl PolicyConfig {
    pub fn resolve_rules_path(&self) -> PathBuf {
        match self.rules_path {
            Some(ref custom) => PathBuf::from(custom),
            None => data_dir().join("rules.json"),
        }
    }
}

/// Which confirmation provider answers elevation prompts.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationMode {
    /// Ask on the terminal.
    #[default]
    Interactive,
    /// Approve everything (scripted callers that pre-screen commands).
    Approve,
    /// Deny everything.
    Deny,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub mode: ConfirmationMode,
    pub timeout_secs: u64,
    /// Require typing "yes" (not just 'y') when ADMIN is requested.
    pub require_yes_for_admin: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            mode: ConfirmationMode::Interactive,
            timeout_secs: 60,
            require_yes_for_admin: true,
        }
    }
}

impl ConfirmationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub writable: Vec<String>,
    pub readable: Vec<String>,
    pub denied: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 60,
            writable: sg_sandbox::policy::default_writable(),
            readable: sg_sandbox::policy::default_readable(),
            denied: sg_sandbox::policy::default_denied(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn policy(&self) -> sg_sandbox::SandboxPolicy {
        sg_sandbox::SandboxPolicy::from_config(&self.writable, &self.readable, &self.denied)
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Custom audit log path. Defaults to ~/.local/share/shellgate/audit.jsonl.
    pub log_path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: None,
        }
    }
}

impl AuditConfig {
    /// Resolve the audit log path, using the configured path or the XDG default.
    pub fn resolve_log_path(&self) -> PathBuf {
        match self.log_path {
            Some(ref custom) => PathBuf::from(custom),
            None => data_dir().join("audit.jsonl"),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when RUST_LOG is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn load_or_default() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("warning: failed to parse {}: {e}", path.display());
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

/// `$XDG_DATA_HOME/shellgate`, or `~/.local/share/shellgate`.
pub fn data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"));
    base.join("shellgate")
}

pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("shellgate").join("config.toml")
}

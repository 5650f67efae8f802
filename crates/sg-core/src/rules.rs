//! Default policy and the durable rule document.
//!
//! The document is a JSON array of `{pattern, action, risk, description}`
//! records. It is rewritten wholesale on every update through a temp file in
//! the same directory followed by a rename, so readers never see half a file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sg_protocol::{RiskLevel, Rule};

use crate::error::{CoreError, Result};

/// Targets that make a recursive delete unbounded: a drive root, `/`, the
/// home directory, or a bare wildcard.
const UNBOUNDED_TARGET: &str = r#"\s["']?(?:[a-z]:[\\/]?\*?|[\\/]\*?|~[\\/]?\*?|\$home[\\/]?\*?|\$env:userprofile[\\/]?\*?|\*)["']?(?:\s|$)"#;

/// PowerShell delete verbs and their aliases.
const PS_DELETE_VERB: &str = r"\b(?:remove-item|ri|rd|rmdir|del|erase|rm)\b";

/// PowerShell recursion switch, including the `-r` abbreviation.
const PS_RECURSE: &str = r"-r(?:ecurse)?\b";

/// The built-in policy: unbounded recursive deletes and disk destruction are
/// blocked outright, power and service control need confirmation, anything
/// else is allowed at low risk.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::block(
            format!(
                r"{PS_DELETE_VERB}[^|;]*?(?:{UNBOUNDED_TARGET}(?:[^|;]*\s)?{PS_RECURSE}|\s{PS_RECURSE}[^|;]*?{UNBOUNDED_TARGET})"
            ),
            RiskLevel::Critical,
            "Recursive delete of a drive root, home directory or wildcard",
        ),
        Rule::block(
            format!(r"\brm\b(?:\s+-[-a-z]+)*\s+-(?:[a-z]*r[a-z]*|-recursive)\b(?:\s+-[-a-z]+)*{UNBOUNDED_TARGET}"),
            RiskLevel::Critical,
            "Recursive rm of the filesystem root, home directory or wildcard",
        ),
        Rule::block(
            r"\brm\b[^|;]*--no-preserve-root",
            RiskLevel::Critical,
            "rm with --no-preserve-root",
        ),
        Rule::block(
            r"\bformat-volume\b",
            RiskLevel::Critical,
            "Formats a volume",
        ),
        Rule::block(
            r"\bformat(?:\.com)?\s+[a-z]:",
            RiskLevel::Critical,
            "Formats a drive",
        ),
        Rule::block(
            r"\b(?:clear-disk|initialize-disk)\b",
            RiskLevel::Critical,
            "Wipes or reinitializes a disk",
        ),
        Rule::block(
            r"\bmkfs(?:\.[a-z0-9]+)?\b",
            RiskLevel::Critical,
            "Creates a filesystem over an existing device",
        ),
        Rule::block(
            r"\bdiskpart\b",
            RiskLevel::Critical,
            "Runs the disk partitioning tool",
        ),
        Rule::block(
            r"\bdd\b[^|;]*\bof=/dev/",
            RiskLevel::Critical,
            "Writes raw data to a block device",
        ),
        Rule::confirm(
            r"\b(?:stop-computer|restart-computer|shutdown|reboot|poweroff|halt)\b",
            RiskLevel::High,
            "Shuts down or restarts the machine",
        ),
        Rule::confirm(
            r"\b(?:start|stop|restart|set|suspend|resume)-service\b|\bsc(?:\.exe)?\s+(?:start|stop|config|delete)\b|\bsystemctl\s+(?:start|stop|restart|reload|enable|disable)\b|\bservice\s+\S+\s+(?:start|stop|restart)\b",
            RiskLevel::Medium,
            "Starts, stops or reconfigures a system service",
        ),
    ]
}

/// The rule document on disk.
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. `Ok(None)` when it does not exist yet.
    pub fn load(&self) -> Result<Option<Vec<Rule>>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CoreError::RuleStore {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let rules = parse_rules(&contents).map_err(|source| CoreError::RuleDocument {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(rules))
    }

    /// Replace the whole document with `rules`.
    pub fn save(&self, rules: &[Rule]) -> Result<()> {
        let io_err = |source: std::io::Error| CoreError::RuleStore {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let body = serde_json::to_string_pretty(rules).map_err(|source| CoreError::RuleDocument {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(body.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        tracing::debug!(path = %self.path.display(), rules = rules.len(), "rule document saved");
        Ok(())
    }
}

/// Parse a rule document.
pub fn parse_rules(contents: &str) -> std::result::Result<Vec<Rule>, serde_json::Error> {
    serde_json::from_str(contents)
}

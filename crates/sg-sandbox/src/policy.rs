//! Filesystem policy handed to the sandboxed child.
//!
//! Config lists hold strings with placeholders (`$CWD`, `$HOME`, `~`,
//! `$TMPDIR`); [`SandboxPolicy::from_config`] resolves them once in the
//! parent, and the resolved policy travels to the child as JSON in
//! [`SANDBOX_ENV_VAR`].

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const SANDBOX_ENV_VAR: &str = "__SG_SANDBOX_POLICY";

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Working directory, temp space and shellgate's own data dir.
pub fn default_writable() -> Vec<String> {
    owned(&["$CWD", "$TMPDIR", "/tmp", "~/.local/share/shellgate"])
}

/// Interpreter and library locations a shell needs to start.
pub fn default_readable() -> Vec<String> {
    let mut paths = owned(&[
        "/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc", "/opt", "/proc/self",
        "/dev/null", "/dev/zero", "/dev/urandom", "/dev/tty",
    ]);
    if cfg!(target_os = "macos") {
        paths.extend(owned(&[
            "/System",
            "/Library",
            "/private/tmp",
            "/private/var/db",
            "/usr/local/microsoft",
        ]));
    }
    paths
}

/// Credential stores. Never granted, even when a parent directory is.
pub fn default_denied() -> Vec<String> {
    owned(&["~/.ssh", "~/.gnupg", "~/.aws", "~/.kube", "~/.docker/config.json"])
}

/// Resolved filesystem policy. Anything not listed is inaccessible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxPolicy {
    /// Read and write.
    pub writable: Vec<PathBuf>,
    /// Read and execute only.
    pub readable: Vec<PathBuf>,
    /// Refused outright where the platform can express it (Seatbelt).
    pub denied: Vec<PathBuf>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::from_config(&default_writable(), &default_readable(), &default_denied())
    }
}

impl SandboxPolicy {
    /// Resolve placeholder strings. Granted paths are listed both as
    /// written and canonicalized, so `/tmp` also covers `/private/tmp`.
    pub fn from_config(writable: &[String], readable: &[String], denied: &[String]) -> Self {
        let mut policy = Self {
            writable: Vec::new(),
            readable: Vec::new(),
            denied: Vec::new(),
        };
        for entry in writable {
            if let Some(path) = resolve(entry) {
                push_with_canonical(&mut policy.writable, path);
            }
        }
        for entry in readable {
            if let Some(path) = resolve(entry) {
                push_with_canonical(&mut policy.readable, path);
            }
        }
        for entry in denied {
            if let Some(path) = resolve(entry) {
                push_unique(&mut policy.denied, path);
            }
        }
        policy
    }

    /// Add read access for `path` unless it is already granted.
    pub fn allow_read(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.grants(&path) {
            push_with_canonical(&mut self.readable, path);
        }
    }

    /// Whether `path` lies under a writable or readable entry and under no
    /// denied one.
    pub fn grants(&self, path: &Path) -> bool {
        let denied = self.denied.iter().any(|d| path.starts_with(d));
        let granted = self
            .writable
            .iter()
            .chain(&self.readable)
            .any(|g| path.starts_with(g));
        granted && !denied
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} writable, {} readable, {} denied",
            self.writable.len(),
            self.readable.len(),
            self.denied.len()
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The policy the parent left in [`SANDBOX_ENV_VAR`], if any.
    pub fn from_env() -> Option<Self> {
        let json = env::var(SANDBOX_ENV_VAR).ok()?;
        Self::from_json(&json).ok()
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) {
    if !list.contains(&path) {
        list.push(path);
    }
}

fn push_with_canonical(list: &mut Vec<PathBuf>, path: PathBuf) {
    if let Ok(canonical) = path.canonicalize() {
        push_unique(list, canonical);
    }
    push_unique(list, path);
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading placeholder. `None` for an empty entry or an unset
/// `$TMPDIR`.
fn resolve(entry: &str) -> Option<PathBuf> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    let (head, rest) = match entry.find('/') {
        Some(i) => (&entry[..i], Some(&entry[i + 1..])),
        None => (entry, None),
    };
    let base = match head {
        "$CWD" => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        "$HOME" | "~" => home_dir(),
        "$TMPDIR" => PathBuf::from(env::var_os("TMPDIR")?),
        _ => return Some(PathBuf::from(entry)),
    };
    Some(match rest {
        Some(rest) if !rest.is_empty() => base.join(rest),
        _ => base,
    })
}

//! Direct command execution.
//!
//! The dispatcher finds an interpreter once, caches what it found, and runs
//! each command through it with a bounded wall clock, a UTF-8 environment
//! overlay, and capped output. Every failure mode comes back as an
//! [`ExecutionResult`], never as an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use sg_protocol::{ExecutionResult, OutputFormat, Platform, NO_EXIT_CODE};

use crate::config::ExecutionConfig;
use crate::output;
use crate::process::{self, ProcessOutput, ProcessSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterKind {
    /// `pwsh`, PowerShell 7+.
    PowerShellCore,
    /// `powershell.exe`, Windows PowerShell 5.x.
    WindowsPowerShell,
    PosixShell,
}

impl InterpreterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterKind::PowerShellCore => "pwsh",
            InterpreterKind::WindowsPowerShell => "powershell",
            InterpreterKind::PosixShell => "sh",
        }
    }

    pub fn is_powershell(&self) -> bool {
        !matches!(self, InterpreterKind::PosixShell)
    }

    /// The interpreter's fixed leading arguments, before the command text.
    fn leading_args(&self) -> &'static [&'static str] {
        match self {
            InterpreterKind::PowerShellCore => {
                &["-NoLogo", "-NoProfile", "-NonInteractive", "-Command"]
            }
            // Desktop edition defaults to Restricted on client SKUs.
            InterpreterKind::WindowsPowerShell => &[
                "-ExecutionPolicy",
                "Bypass",
                "-NoLogo",
                "-NoProfile",
                "-NonInteractive",
                "-Command",
            ],
            InterpreterKind::PosixShell => &["-c"],
        }
    }
}

/// The interpreter the dispatcher runs commands through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentDescriptor {
    pub interpreter: InterpreterKind,
    pub program: String,
    pub available: bool,
    /// "Core", "Desktop" or "posix".
    pub edition: String,
}

impl EnvironmentDescriptor {
    pub fn new(interpreter: InterpreterKind, program: impl Into<String>) -> Self {
        Self {
            interpreter,
            program: program.into(),
            available: true,
            edition: edition_of(interpreter).to_string(),
        }
    }

    pub fn unavailable(interpreter: InterpreterKind, program: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(interpreter, program)
        }
    }

    /// Full argv for running `command`.
    pub fn invocation(&self, command: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(6);
        argv.push(self.program.clone());
        argv.extend(
            self.interpreter
                .leading_args()
                .iter()
                .map(|a| a.to_string()),
        );
        argv.push(command.to_string());
        argv
    }
}

fn edition_of(kind: InterpreterKind) -> &'static str {
    match kind {
        InterpreterKind::PowerShellCore => "Core",
        InterpreterKind::WindowsPowerShell => "Desktop",
        InterpreterKind::PosixShell => "posix",
    }
}

/// Finds the interpreter to use.
pub trait InterpreterDetector: Send + Sync {
    fn detect(&self) -> EnvironmentDescriptor;
}

/// Searches `PATH`, honouring an explicit preference.
#[derive(Debug, Clone)]
pub struct PathDetector {
    preference: String,
    search_path: Option<String>,
}

impl PathDetector {
    /// `preference` is "auto", "pwsh", "powershell" or "sh".
    pub fn new(preference: impl Into<String>) -> Self {
        Self {
            preference: preference.into(),
            search_path: None,
        }
    }

    /// Search `path` (a `PATH`-style list) instead of the process `PATH`.
    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    fn find(&self, names: &[&str]) -> Option<PathBuf> {
        let path = match self.search_path {
            Some(ref p) => p.clone().into(),
            None => std::env::var_os("PATH")?,
        };
        std::env::split_paths(&path).find_map(|dir| {
            names
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| is_executable(candidate))
        })
    }

    fn lookup(&self, kind: InterpreterKind) -> EnvironmentDescriptor {
        let names: &[&str] = match kind {
            InterpreterKind::PowerShellCore => &["pwsh", "pwsh.exe"],
            InterpreterKind::WindowsPowerShell => &["powershell", "powershell.exe"],
            InterpreterKind::PosixShell => &["sh"],
        };
        match self.find(names) {
            Some(path) => EnvironmentDescriptor::new(kind, path.to_string_lossy()),
            None => EnvironmentDescriptor::unavailable(kind, names[0]),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl InterpreterDetector for PathDetector {
    fn detect(&self) -> EnvironmentDescriptor {
        let explicit = match self.preference.to_ascii_lowercase().as_str() {
            "pwsh" => Some(InterpreterKind::PowerShellCore),
            "powershell" => Some(InterpreterKind::WindowsPowerShell),
            "sh" => Some(InterpreterKind::PosixShell),
            "auto" | "" => None,
            other => {
                tracing::warn!(interpreter = other, "unknown interpreter preference, detecting");
                None
            }
        };
        if let Some(kind) = explicit {
            return self.lookup(kind);
        }

        let mut order = vec![
            InterpreterKind::PowerShellCore,
            InterpreterKind::WindowsPowerShell,
        ];
        if cfg!(unix) {
            order.push(InterpreterKind::PosixShell);
        }
        order
            .iter()
            .map(|kind| self.lookup(*kind))
            .find(|d| d.available)
            .unwrap_or_else(|| {
                EnvironmentDescriptor::unavailable(InterpreterKind::PowerShellCore, "pwsh")
            })
    }
}

/// Always reports the same descriptor.
#[derive(Debug, Clone)]
pub struct FixedDetector(pub EnvironmentDescriptor);

impl InterpreterDetector for FixedDetector {
    fn detect(&self) -> EnvironmentDescriptor {
        self.0.clone()
    }
}

/// Per-call execution settings.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub correlation_id: String,
    pub cwd: Option<PathBuf>,
    /// Overlaid after the configured environment.
    pub env: BTreeMap<String, String>,
    /// Overrides the configured timeout.
    pub timeout: Option<Duration>,
    /// Overrides the configured target platform.
    pub target: Option<Platform>,
}

impl ExecutionContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

pub struct ExecutionDispatcher {
    detector: Box<dyn InterpreterDetector>,
    descriptor: RwLock<Arc<EnvironmentDescriptor>>,
    timeout: Duration,
    max_output_bytes: usize,
    env: BTreeMap<String, String>,
    target: Platform,
}

impl ExecutionDispatcher {
    pub fn new(detector: Box<dyn InterpreterDetector>, config: &ExecutionConfig) -> Self {
        let descriptor = detector.detect();
        tracing::debug!(
            interpreter = descriptor.interpreter.as_str(),
            program = %descriptor.program,
            available = descriptor.available,
            "interpreter detected"
        );
        Self {
            detector,
            descriptor: RwLock::new(Arc::new(descriptor)),
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
            env: config.env.clone(),
            target: config.resolve_target(),
        }
    }

    /// Dispatcher for `config`, detecting along `PATH`.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(Box::new(PathDetector::new(&config.interpreter)), config)
    }

    /// The cached interpreter.
    pub fn descriptor(&self) -> Arc<EnvironmentDescriptor> {
        self.descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-run detection and replace the cache.
    pub fn refresh(&self) -> Arc<EnvironmentDescriptor> {
        let fresh = Arc::new(self.detector.detect());
        *self
            .descriptor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        fresh
    }

    pub fn target(&self) -> Platform {
        self.target
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Variables overlaid on the host environment: configured values, then
    /// per-call values, then UTF-8 and telemetry settings nobody set.
    pub fn environment(
        &self,
        descriptor: &EnvironmentDescriptor,
        ctx: &ExecutionContext,
    ) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        env.extend(ctx.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut default = |key: &str, value: &str| {
            if !env.contains_key(key) && std::env::var_os(key).is_none() {
                env.insert(key.to_string(), value.to_string());
            }
        };
        default("PYTHONIOENCODING", "utf-8");
        if cfg!(unix) {
            default("LC_ALL", "C.UTF-8");
        }
        let target = ctx.target.unwrap_or(self.target);
        if target.is_windows() || descriptor.interpreter.is_powershell() {
            default("POWERSHELL_TELEMETRY_OPTOUT", "1");
        }
        env.into_iter().collect()
    }

    /// The process to spawn for `command`.
    pub fn prepare(
        &self,
        descriptor: &EnvironmentDescriptor,
        command: &str,
        ctx: &ExecutionContext,
    ) -> ProcessSpec {
        let mut argv = descriptor.invocation(command);
        let program = argv.remove(0);
        ProcessSpec {
            program,
            args: argv,
            env: self.environment(descriptor, ctx),
            cwd: ctx.cwd.clone(),
            timeout: ctx.timeout.unwrap_or(self.timeout),
        }
    }

    /// Run `command` through the cached interpreter.
    pub async fn execute_command(&self, command: &str, ctx: &ExecutionContext) -> ExecutionResult {
        let started = Instant::now();
        let descriptor = self.descriptor();
        if !descriptor.available {
            tracing::warn!(program = %descriptor.program, "interpreter not available");
            return ExecutionResult::failure(
                format!("interpreter '{}' is not available", descriptor.program),
                Platform::current(),
                ctx.correlation_id.clone(),
            );
        }

        let spec = self.prepare(&descriptor, command, ctx);
        tracing::debug!(
            correlation_id = %ctx.correlation_id,
            program = %spec.program,
            timeout_ms = spec.timeout.as_millis() as u64,
            "dispatching command"
        );
        match process::run(&spec).await {
            Ok(out) => into_result(
                out,
                spec.timeout,
                self.max_output_bytes,
                &ctx.correlation_id,
            ),
            Err(e) => ExecutionResult::failure(
                format!("failed to start {}: {e}", spec.program),
                Platform::current(),
                ctx.correlation_id.clone(),
            )
            .with_execution_time(started.elapsed()),
        }
    }

    /// Render captured output in `format`.
    pub fn format_output(&self, raw: &str, format: OutputFormat) -> String {
        output::format_output(raw, format)
    }
}

/// "30s" for whole seconds, "0.2s" otherwise.
pub fn format_seconds(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Build the result for a finished (or killed) process.
pub(crate) fn into_result(
    out: ProcessOutput,
    timeout: Duration,
    cap: usize,
    correlation_id: &str,
) -> ExecutionResult {
    if out.timed_out {
        let mut result = ExecutionResult::failure(
            format!("Command timed out after {}", format_seconds(timeout)),
            Platform::current(),
            correlation_id,
        );
        result.timed_out = true;
        return result.with_execution_time(out.duration);
    }

    let truncated = out.stdout.len() > cap || out.stderr.len() > cap;
    let return_code = out.exit_code.unwrap_or(NO_EXIT_CODE);
    let mut notes = out.read_errors;
    if out.exit_code.is_none() {
        notes.insert(0, "process terminated by a signal".to_string());
    }
    let diagnostic = (!notes.is_empty()).then(|| notes.join("; "));
    ExecutionResult {
        success: return_code == 0,
        return_code,
        stdout: output::truncate_output(&out.stdout, cap),
        stderr: output::truncate_output(&out.stderr, cap),
        execution_time: out.duration,
        platform: Platform::current(),
        sandbox_used: false,
        correlation_id: correlation_id.to_string(),
        timed_out: false,
        truncated,
        diagnostic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            interpreter: "sh".to_string(),
            target_platform: "linux".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn invocation_per_interpreter() {
        let ps = EnvironmentDescriptor::new(InterpreterKind::PowerShellCore, "pwsh");
        assert_eq!(
            ps.invocation("Get-Date"),
            vec!["pwsh", "-NoLogo", "-NoProfile", "-NonInteractive", "-Command", "Get-Date"]
        );
        let desktop = EnvironmentDescriptor::new(InterpreterKind::WindowsPowerShell, "powershell");
        assert_eq!(
            desktop.invocation("Get-Date"),
            vec![
                "powershell",
                "-ExecutionPolicy",
                "Bypass",
                "-NoLogo",
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "Get-Date"
            ]
        );
        assert_eq!(desktop.edition, "Desktop");
        let sh = EnvironmentDescriptor::new(InterpreterKind::PosixShell, "/bin/sh");
        assert_eq!(sh.invocation("date"), vec!["/bin/sh", "-c", "date"]);
        assert_eq!(sh.edition, "posix");
    }

    #[test]
    fn path_detector_honours_preference() {
        let dir = tempfile::tempdir().unwrap();
        let detector =
            PathDetector::new("pwsh").with_search_path(dir.path().to_string_lossy().to_string());
        let found = detector.detect();
        assert_eq!(found.interpreter, InterpreterKind::PowerShellCore);
        assert!(!found.available);
    }

    #[cfg(unix)]
    #[test]
    fn path_detector_finds_executables_in_order() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("powershell");
        std::fs::write(&fake, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let found = PathDetector::new("auto")
            .with_search_path(dir.path().to_string_lossy().to_string())
            .detect();
        assert_eq!(found.interpreter, InterpreterKind::WindowsPowerShell);
        assert_eq!(found.edition, "Desktop");
        assert!(found.available);
        assert_eq!(found.program, fake.to_string_lossy());
    }

    #[test]
    fn refresh_replaces_the_cache() {
        let dispatcher = ExecutionDispatcher::new(
            Box::new(FixedDetector(EnvironmentDescriptor::new(
                InterpreterKind::PosixShell,
                "sh",
            ))),
            &config(),
        );
        let before = dispatcher.descriptor();
        let after = dispatcher.refresh();
        assert_eq!(*before, *after);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn environment_layers() {
        let mut cfg = config();
        cfg.env.insert("SG_A".into(), "config".into());
        cfg.env.insert("SG_B".into(), "config".into());
        let dispatcher = ExecutionDispatcher::new(
            Box::new(FixedDetector(EnvironmentDescriptor::new(
                InterpreterKind::PowerShellCore,
                "pwsh",
            ))),
            &cfg,
        );
        let ctx = ExecutionContext::new("c1").with_env("SG_B", "call");
        let env: BTreeMap<String, String> = dispatcher
            .environment(&dispatcher.descriptor(), &ctx)
            .into_iter()
            .collect();
        assert_eq!(env["SG_A"], "config");
        assert_eq!(env["SG_B"], "call");
        if std::env::var_os("POWERSHELL_TELEMETRY_OPTOUT").is_none() {
            assert_eq!(env["POWERSHELL_TELEMETRY_OPTOUT"], "1");
        }
        if std::env::var_os("PYTHONIOENCODING").is_none() {
            assert_eq!(env["PYTHONIOENCODING"], "utf-8");
        }
    }

    #[test]
    fn seconds_formatting() {
        assert_eq!(format_seconds(Duration::from_secs(30)), "30s");
        assert_eq!(format_seconds(Duration::from_millis(200)), "0.2s");
    }

    #[test]
    fn timed_out_output_becomes_failure() {
        let out = ProcessOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_secs(2),
            timed_out: true,
            read_errors: Vec::new(),
        };
        let result = into_result(out, Duration::from_secs(2), 100, "c9");
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.stderr, "Command timed out after 2s");
        assert_eq!(result.correlation_id, "c9");
    }

    #[test]
    fn oversized_streams_are_capped() {
        let out = ProcessOutput {
            exit_code: Some(0),
            stdout: "y".repeat(50),
            stderr: "short".to_string(),
            duration: Duration::from_millis(5),
            timed_out: false,
            read_errors: Vec::new(),
        };
        let result = into_result(out, Duration::from_secs(1), 10, "c1");
        assert!(result.success);
        assert!(result.truncated);
        assert!(result.stdout.starts_with(&"y".repeat(10)));
        assert_eq!(result.stderr, "short");
        assert_eq!(result.diagnostic, None);
    }

    #[test]
    fn stream_read_errors_land_in_the_diagnostic() {
        let out = ProcessOutput {
            exit_code: Some(0),
            stdout: "partial".to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
            timed_out: false,
            read_errors: vec!["stdout read failed: pipe closed".to_string()],
        };
        let result = into_result(out, Duration::from_secs(1), 100, "c2");
        assert!(result.success);
        assert_eq!(result.stdout, "partial");
        assert_eq!(result.diagnostic.as_deref(), Some("stdout read failed: pipe closed"));
    }
}

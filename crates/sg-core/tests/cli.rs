//! Tests for the `shellgate` binary.
//!
//! Each test points XDG_CONFIG_HOME and XDG_DATA_HOME at a temp dir so the
//! rule document, audit log and config stay isolated.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use sg_sandbox::policy::SANDBOX_ENV_VAR;

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config").join("shellgate");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[execution]\ninterpreter = \"sh\"\ntarget_platform = \"linux\"\n\n[confirmation]\nmode = \"deny\"\n",
        )
        .unwrap();
        Self { dir }
    }

    fn data_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("data").join("shellgate")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_shellgate"));
        cmd.env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env("XDG_DATA_HOME", self.dir.path().join("data"))
            .env_remove("RUST_LOG")
            .env_remove(SANDBOX_ENV_VAR);
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().unwrap()
    }

    fn run_with_stdin(&self, args: &[&str], input: &str) -> Output {
        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
        child.wait_with_output().unwrap()
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn audit_types(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["type"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn version_and_help() {
    let sb = Sandbox::new();
    let out = sb.run(&["--version"]);
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("shellgate "));

    let out = sb.run(&["--help"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Usage:"));
}

#[test]
fn unknown_command_is_a_usage_error() {
    let out = Sandbox::new().run(&["frobnicate"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("unknown command"));
}

#[test]
fn validate_prints_verdict() {
    let sb = Sandbox::new();
    let out = sb.run(&["validate", "Get-Process", "|", "Sort-Object", "CPU"]);
    assert_eq!(out.status.code(), Some(0));
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(v["is_valid"], true);

    let out = sb.run(&["validate", r"Remove-Item C:\* -Recurse -Force"]);
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(v["is_valid"], false);
    assert_eq!(v["risk_assessment"], "CRITICAL");
}

#[test]
fn permissions_and_adapt() {
    let sb = Sandbox::new();
    let out = sb.run(&["permissions", "Stop-Service -Name Spooler"]);
    assert!(out.status.success());
    let labels: Vec<String> = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(labels, vec!["ADMIN"]);

    let out = sb.run(&["adapt", "--target", "windows", "ls", "/tmp"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "Get-ChildItem $env:TEMP");

    let out = sb.run(&["adapt", "ls"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn format_reads_stdin() {
    let sb = Sandbox::new();
    let out = sb.run_with_stdin(&["format", "--format", "json"], "not json");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(v["output"], "not json");

    let out = sb.run_with_stdin(&["format", "--format", "xml"], "");
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn run_executes_and_audits() {
    let sb = Sandbox::new();
    let out = sb.run(&["run", "Write-Output", "hello"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hello\n");

    let types = audit_types(&sb.data_dir().join("audit.jsonl"));
    assert_eq!(types, vec!["validation", "executed"]);
}

#[test]
fn run_propagates_exit_code() {
    let out = Sandbox::new().run(&["run", "exit 3"]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn run_refuses_blocked_commands() {
    let sb = Sandbox::new();
    let out = sb.run(&["run", "Format-Volume", "-DriveLetter", "D"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("blocked"), "{err}");
    assert!(err.contains("Get-Volume"), "{err}");
    assert!(stdout(&out).is_empty());

    let types = audit_types(&sb.data_dir().join("audit.jsonl"));
    assert_eq!(types, vec!["validation", "blocked"]);
}

#[test]
fn run_respects_denied_confirmation_and_yes() {
    let sb = Sandbox::new();
    let out = sb.run(&["run", "echo", "reboot"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("confirmation denied"));

    let out = sb.run(&["run", "--yes", "echo", "reboot"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "reboot\n");
}

#[test]
fn sandbox_flag_requires_enabled_sandbox() {
    let out = Sandbox::new().run(&["run", "--sandbox", "echo", "hi"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("disabled"));
}

#[test]
fn rules_load_show_and_reset() {
    let sb = Sandbox::new();
    let custom = sb.dir.path().join("custom.json");
    std::fs::write(
        &custom,
        r#"[{"pattern": "\\bzap\\b", "action": "BLOCK", "risk": "HIGH", "description": "zaps"}]"#,
    )
    .unwrap();

    let out = sb.run(&["rules", "load", custom.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let out = sb.run(&["rules", "show"]);
    let rules: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(rules.as_array().unwrap().len(), 1);
    assert_eq!(sb.run(&["validate", "zap"]).status.code(), Some(1));

    assert!(sb.run(&["rules", "reset"]).status.success());
    assert_eq!(sb.run(&["validate", "zap"]).status.code(), Some(0));

    let out = sb.run(&["rules", "load", "/nonexistent/rules.json"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn sandbox_exec_without_policy_fails_with_126() {
    let out = Sandbox::new().run(&["--sandbox-exec", "true"]);
    assert_eq!(out.status.code(), Some(126));
    assert!(stderr(&out).contains("[sg:sandbox]"));
}

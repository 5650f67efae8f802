//! End-to-end behaviour of the library surface: the validator, analyzer,
//! translator, output shaping and dispatcher working together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sg_core::audit::AuditLogger;
use sg_core::config::ExecutionConfig;
use sg_core::confirmation::{ConfirmationCoordinator, ScriptedProvider};
use sg_core::dispatch::{
    EnvironmentDescriptor, ExecutionContext, ExecutionDispatcher, FixedDetector, InterpreterKind,
};
use sg_core::output::{format_output, truncate_output, truncation_marker};
use sg_core::permissions::PermissionAnalyzer;
use sg_core::policy::WhitelistValidator;
use sg_core::rules::RuleStore;
use sg_core::translate::adapt_for_platform;
use sg_core::{CommandPipeline, PipelineOutcome, PipelineRequest, SecurityOrchestrator};
use sg_protocol::{OutputFormat, Permission, Platform, RiskLevel, Rule};

fn sh_dispatcher(timeout_secs: u64) -> ExecutionDispatcher {
    let config = ExecutionConfig {
        timeout_secs,
        target_platform: "linux".to_string(),
        ..Default::default()
    };
    ExecutionDispatcher::new(
        Box::new(FixedDetector(EnvironmentDescriptor::new(
            InterpreterKind::PosixShell,
            "sh",
        ))),
        &config,
    )
}

#[test]
fn recursive_drive_delete_is_blocked_with_enumeration_alternative() {
    let result = WhitelistValidator::with_defaults().validate(r"Remove-Item C:\* -Recurse -Force");
    assert!(!result.is_valid);
    assert_eq!(result.risk_assessment, RiskLevel::Critical);
    assert!(!result.blocked_reasons.is_empty());
    assert!(result
        .suggested_alternatives
        .iter()
        .any(|a| a.starts_with("Get-ChildItem")));
}

#[test]
fn read_only_pipeline_is_allowed_at_low_risk() {
    let result = WhitelistValidator::with_defaults().validate("Get-Process | Sort-Object CPU");
    assert!(result.is_valid);
    assert_eq!(result.risk_assessment, RiskLevel::Low);
    assert!(result.required_permissions.is_empty());
    assert!(result.blocked_reasons.is_empty());
}

#[test]
fn service_stop_needs_admin() {
    let perms = PermissionAnalyzer::new().check_permissions("Stop-Service -Name Spooler");
    assert_eq!(perms.len(), 1);
    assert!(perms.contains(Permission::Admin));
}

#[test]
fn listing_tmp_adapts_to_windows() {
    let adapted = adapt_for_platform("ls /tmp", Platform::Windows);
    assert!(adapted.contains("Get-ChildItem"));
    assert!(adapted.contains("$env:TEMP"));
}

#[test]
fn non_json_output_gets_an_envelope() {
    let out = format_output("not json", OutputFormat::Json);
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["output"], "not json");
    assert_eq!(value["format"], "text");
    assert!(value["timestamp"].is_string());
}

#[cfg(unix)]
#[tokio::test]
async fn slow_command_times_out() {
    let dispatcher = sh_dispatcher(30);
    let ctx = ExecutionContext::new("slow-1").with_timeout(Duration::from_millis(300));
    let started = Instant::now();
    let result = dispatcher.execute_command("sleep 20", &ctx).await;
    assert!(!result.success);
    assert_eq!(result.return_code, -1);
    assert!(result.timed_out);
    assert!(result.stderr.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn missing_interpreter_never_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let dispatcher = ExecutionDispatcher::new(
        Box::new(FixedDetector(EnvironmentDescriptor::unavailable(
            InterpreterKind::PowerShellCore,
            "sh",
        ))),
        &ExecutionConfig::default(),
    );
    let command = format!("touch {}", marker.display());
    let result = dispatcher
        .execute_command(&command, &ExecutionContext::new("c1"))
        .await;
    assert!(!result.success);
    assert_eq!(result.return_code, -1);
    assert!(!marker.exists());
}

#[test]
fn no_block_rule_means_valid() {
    let validator = WhitelistValidator::with_defaults();
    for cmd in [
        "Get-ChildItem -Recurse",
        "rm -rf ./build",
        "Stop-Service Spooler",
        "Restart-Computer",
        "echo hello > out.txt",
        "",
    ] {
        assert!(validator.validate(cmd).is_valid, "{cmd}");
    }
}

#[test]
fn every_critical_block_offers_alternatives() {
    let validator = WhitelistValidator::new(vec![Rule::block(
        r"\bzap\b",
        RiskLevel::Critical,
        "zaps things",
    )]);
    let result = validator.validate("zap everything");
    assert!(!result.is_valid);
    assert_eq!(result.risk_assessment, RiskLevel::Critical);
    assert!(!result.suggested_alternatives.is_empty());
}

#[test]
fn adaptation_is_idempotent_and_round_trips() {
    for platform in [Platform::Windows, Platform::Linux, Platform::MacOs] {
        for cmd in ["ls /tmp", "cat ~/.config/app.toml", "Get-Process | Sort-Object CPU"] {
            let once = adapt_for_platform(cmd, platform);
            assert_eq!(adapt_for_platform(&once, platform), once, "{cmd} on {platform}");
        }
    }
    for verb in ["ls", "cat", "pwd", "ps", "date"] {
        let there = adapt_for_platform(verb, Platform::Windows);
        assert_eq!(adapt_for_platform(&there, Platform::Linux), verb);
    }
}

#[test]
fn truncation_stays_within_bound() {
    for (len, cap) in [(0, 0), (10, 10), (11, 10), (5000, 100), (3, 1)] {
        let text = "ab".repeat(len);
        let out = truncate_output(&text, cap);
        if text.len() <= cap {
            assert_eq!(out, text);
        } else {
            assert!(out.len() <= cap + truncation_marker(text.len(), cap).len());
        }
    }
}

#[test]
fn rules_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");

    let first = WhitelistValidator::load(RuleStore::new(&path)).unwrap();
    first
        .update_rules(vec![Rule::block(r"\bzap\b", RiskLevel::High, "zaps")])
        .unwrap();

    let second = WhitelistValidator::load(RuleStore::new(&path)).unwrap();
    assert_eq!(second.rules().len(), 1);
    assert!(!second.validate("zap it").is_valid);
    assert!(second.validate("rm -rf /").is_valid);
}

#[cfg(unix)]
#[tokio::test]
async fn pipeline_audits_under_one_correlation_id() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.jsonl");
    let audit = Arc::new(AuditLogger::new(&log_path).unwrap());
    let orchestrator = SecurityOrchestrator::new(
        Arc::new(WhitelistValidator::with_defaults()),
        Arc::new(ConfirmationCoordinator::new(
            Box::new(ScriptedProvider::approve_all()),
            audit.clone(),
        )),
        Arc::new(sh_dispatcher(10)),
        audit.clone(),
    );
    let pipeline = CommandPipeline::new(Arc::new(orchestrator));

    let outcome = pipeline
        .handle(PipelineRequest {
            correlation_id: Some("corr-audit".to_string()),
            ..PipelineRequest::new("echo shutdown")
        })
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Executed { .. }));
    drop(pipeline);
    drop(audit);

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let events: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        [
            "validation",
            "confirmation_issued",
            "confirmation_resolved",
            "executed"
        ]
    );
    assert!(events.iter().all(|e| e["correlation_id"] == "corr-audit"));
}

#[cfg(unix)]
#[tokio::test]
async fn concurrent_dispatches_are_independent() {
    let dispatcher = sh_dispatcher(10);
    let contexts: Vec<ExecutionContext> = (0..4)
        .map(|i| ExecutionContext::new(format!("par-{i}")).with_env("SG_INDEX", i.to_string()))
        .collect();
    let started = Instant::now();
    let results = futures::future::join_all(
        contexts
            .iter()
            .map(|ctx| dispatcher.execute_command("sleep 0.5; echo $SG_INDEX", ctx)),
    )
    .await;
    assert!(started.elapsed() < Duration::from_secs(2));
    for (i, result) in results.iter().enumerate() {
        assert!(result.success);
        assert_eq!(result.correlation_id, format!("par-{i}"));
        assert_eq!(result.stdout, format!("{i}\n"));
    }
}

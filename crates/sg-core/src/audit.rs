//! Append-only JSONL audit logger for the security pipeline.
//!
//! Writes one JSON object per line, keyed by correlation id: validation
//! verdicts, blocks, confirmation requests and their responses, and execution
//! results. A failed write never aborts the caller: it is counted and reported
//! through `tracing` instead.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sg_protocol::{ConfirmationRequest, ConfirmationResponse, ExecutionResult, ValidationResult};

/// Append-only JSONL audit logger. Safe to share between threads.
pub struct AuditLogger {
    writer: Option<Mutex<BufWriter<File>>>,
    session_id: String,
    failures: AtomicU64,
}

impl AuditLogger {
    /// Create a new audit logger that appends to the given path.
    /// Creates parent directories if they don't exist.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Some(Mutex::new(BufWriter::new(file))),
            session_id: generate_session_id(),
            failures: AtomicU64::new(0),
        })
    }

    /// Create a no-op logger that discards all events.
    pub fn noop() -> Self {
        Self {
            writer: None,
            session_id: generate_session_id(),
            failures: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Number of events that could not be written.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Log the verdict for a candidate command.
    pub fn log_validation(&self, correlation_id: &str, command: &str, result: &ValidationResult) {
        self.write_event(serde_json::json!({
            "ts": timestamp(),
            "session": self.session_id,
            "correlation_id": correlation_id,
            "type": "validation",
            "command": command,
            "is_valid": result.is_valid,
            "risk": result.risk_assessment.as_str(),
            "required_permissions": result.required_permissions.labels(),
            "matched_rules": result.matched_rules,
            "requires_confirmation": result.requires_confirmation,
        }));
    }

    /// Log that a command was refused by the policy engine.
    pub fn log_blocked(&self, correlation_id: &str, command: &str, result: &ValidationResult) {
        self.write_event(serde_json::json!({
            "ts": timestamp(),
            "session": self.session_id,
            "correlation_id": correlation_id,
            "type": "blocked",
            "command": command,
            "risk": result.risk_assessment.as_str(),
            "reasons": result.blocked_reasons,
            "alternatives": result.suggested_alternatives,
        }));
    }

    /// Log that an elevation prompt was issued.
    pub fn log_confirmation_issued(&self, request: &ConfirmationRequest) {
        self.write_event(serde_json::json!({
            "ts": timestamp(),
            "session": self.session_id,
            "correlation_id": request.correlation_id,
            "type": "confirmation_issued",
            "request_id": request.id,
            "confirmation_session": request.session_id,
            "command": request.command,
            "permissions": request.permissions.labels(),
            "risk_description": request.risk_description,
            "timeout_ms": request.timeout.as_millis() as u64,
        }));
    }

    /// Log the single response recorded for a prompt.
    pub fn log_confirmation_resolved(
        &self,
        request: &ConfirmationRequest,
        response: &ConfirmationResponse,
    ) {
        self.write_event(serde_json::json!({
            "ts": timestamp(),
            "session": self.session_id,
            "correlation_id": request.correlation_id,
            "type": "confirmation_resolved",
            "request_id": response.request_id,
            "outcome": response.outcome.as_str(),
            "latency_ms": response.latency.as_millis() as u64,
            "detail": response.detail,
        }));
    }

    /// Log a command execution result.
    pub fn log_executed(&self, command: &str, result: &ExecutionResult) {
        self.write_event(serde_json::json!({
            "ts": timestamp(),
            "session": self.session_id,
            "correlation_id": result.correlation_id,
            "type": "executed",
            "command": command,
            "success": result.success,
            "exit_code": result.return_code,
            "duration_ms": result.execution_time_ms(),
            "platform": result.platform.as_str(),
            "sandbox_used": result.sandbox_used,
            "timed_out": result.timed_out,
            "truncated": result.truncated,
        }));
    }

    fn write_event(&self, value: serde_json::Value) {
        let Some(ref writer) = self.writer else {
            return;
        };
        if let Err(e) = self.try_write(writer, &value) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "audit event dropped");
        }
    }

    fn try_write(&self, writer: &Mutex<BufWriter<File>>, value: &serde_json::Value) -> io::Result<()> {
        let line = serde_json::to_string(value)?;
        let mut writer = writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit writer lock poisoned"))?;
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn generate_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("s{}", &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_protocol::{ConfirmationOutcome, Permission, Platform, RiskLevel};
    use std::time::Duration;

    fn read_log_lines(path: &Path) -> Vec<serde_json::Value> {
        let content = std::fs::read_to_string(path).unwrap();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            id: "req-1".to_string(),
            command: "Restart-Computer".to_string(),
            permissions: [Permission::Admin].into_iter().collect(),
            risk_description: "reboots".to_string(),
            session_id: "sess".to_string(),
            correlation_id: "corr-1".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn new_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("audit.jsonl");
        let _logger = AuditLogger::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn noop_logger_discards() {
        let logger = AuditLogger::noop();
        logger.log_validation("c", "ls", &ValidationResult::default());
        assert_eq!(logger.failures(), 0);
    }

    #[test]
    fn validation_event_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path).unwrap();

        let mut result = ValidationResult::default();
        result.escalate(RiskLevel::High);
        result.required_permissions.insert(Permission::Admin);
        logger.log_validation("corr-9", "Restart-Computer", &result);

        let lines = read_log_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "validation");
        assert_eq!(lines[0]["correlation_id"], "corr-9");
        assert_eq!(lines[0]["risk"], "high");
        assert_eq!(lines[0]["required_permissions"][0], "admin");
    }

    #[test]
    fn blocked_event_carries_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path).unwrap();

        let result = ValidationResult {
            is_valid: false,
            blocked_reasons: vec!["recursive delete".to_string()],
            suggested_alternatives: vec!["Get-ChildItem".to_string()],
            risk_assessment: RiskLevel::Critical,
            ..Default::default()
        };
        logger.log_blocked("c1", "rm -rf /", &result);

        let lines = read_log_lines(&path);
        assert_eq!(lines[0]["type"], "blocked");
        assert_eq!(lines[0]["risk"], "critical");
        assert_eq!(lines[0]["reasons"][0], "recursive delete");
        assert_eq!(lines[0]["alternatives"][0], "Get-ChildItem");
    }

    #[test]
    fn confirmation_pair_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path).unwrap();

        let req = request();
        let resp = ConfirmationResponse::for_request(
            &req,
            ConfirmationOutcome::Denied,
            Duration::from_millis(40),
        );
        logger.log_confirmation_issued(&req);
        logger.log_confirmation_resolved(&req, &resp);

        let lines = read_log_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "confirmation_issued");
        assert_eq!(lines[1]["type"], "confirmation_resolved");
        assert_eq!(lines[0]["request_id"], lines[1]["request_id"]);
        assert_eq!(lines[1]["outcome"], "denied");
        assert_eq!(lines[1]["latency_ms"], 40);
        assert_eq!(lines[1]["correlation_id"], "corr-1");
    }

    #[test]
    fn executed_event_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path).unwrap();

        let result = ExecutionResult::failure("timed out", Platform::Linux, "c7")
            .with_execution_time(Duration::from_millis(42));
        logger.log_executed("sleep 10", &result);

        let lines = read_log_lines(&path);
        assert_eq!(lines[0]["type"], "executed");
        assert_eq!(lines[0]["exit_code"], -1);
        assert_eq!(lines[0]["duration_ms"], 42);
        assert_eq!(lines[0]["sandbox_used"], false);
    }

    #[test]
    fn session_id_consistent_and_timestamp_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path).unwrap();

        logger.log_validation("a", "ls", &ValidationResult::default());
        logger.log_validation("b", "pwd", &ValidationResult::default());

        let lines = read_log_lines(&path);
        assert_eq!(lines[0]["session"], lines[1]["session"]);
        assert!(lines[0]["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = std::sync::Arc::new(AuditLogger::new(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for j in 0..20 {
                        logger.log_validation(&format!("{i}-{j}"), "ls", &ValidationResult::default());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(read_log_lines(&path).len(), 160);
    }
}

//! Elevation confirmation.
//!
//! The coordinator owns no UI. It hands each [`ConfirmationRequest`] to the
//! [`ConfirmationProvider`] it was built with, measures the latency, records
//! the pair, and audits both halves. Providers are either interactive
//! (terminal prompt with a deadline) or scripted (fixed answers for automated
//! callers and tests).

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sg_protocol::{
    ConfirmationOutcome, ConfirmationRequest, ConfirmationResponse, Permission, PermissionSet,
};

use crate::audit::AuditLogger;

/// Why a provider could not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("prompt I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("prompt input closed")]
    InputClosed,
}

/// Answers confirmation requests.
pub trait ConfirmationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide one request. Must return within `request.timeout` (as
    /// `Timeout`) when it involves waiting on a person.
    fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationOutcome, ProviderError>;
}

type Answer = Result<String, ProviderError>;

/// Prompts on a terminal.
///
/// One reader thread, started at the first prompt, feeds every line into a
/// channel the provider owns. Lines typed while no prompt was open are
/// dropped before the next prompt is shown.
pub struct InteractiveProvider {
    input: Mutex<Option<Box<dyn BufRead + Send>>>,
    answers: Mutex<Option<mpsc::Receiver<Answer>>>,
    output: Mutex<Box<dyn Write + Send>>,
    require_yes_for_admin: bool,
}

impl InteractiveProvider {
    /// Prompt on stderr, read from stdin.
    pub fn stdio(require_yes_for_admin: bool) -> Self {
        Self::with_io(
            io::BufReader::new(io::stdin()),
            io::stderr(),
            require_yes_for_admin,
        )
    }

    pub fn with_io(
        input: impl BufRead + Send + 'static,
        output: impl Write + Send + 'static,
        require_yes_for_admin: bool,
    ) -> Self {
        Self {
            input: Mutex::new(Some(Box::new(input))),
            answers: Mutex::new(None),
            output: Mutex::new(Box::new(output)),
            require_yes_for_admin,
        }
    }

    fn render(&self, request: &ConfirmationRequest, full_yes: bool) -> io::Result<()> {
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out)?;
        writeln!(out, "[sg] elevated command needs confirmation")?;
        writeln!(out, "  command:     {}", request.command)?;
        writeln!(out, "  permissions: {}", request.permissions.labels().join(", "))?;
        writeln!(out, "  risk:        {}", request.risk_description)?;
        let hint = if full_yes { "type 'yes'" } else { "[y/N]" };
        write!(
            out,
            "  approve? {hint} ({}s) ",
            request.timeout.as_secs().max(1)
        )?;
        out.flush()
    }

    /// Drop lines that arrived after an earlier prompt gave up.
    fn discard_typeahead(&self) {
        let answers = self.answers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = answers.as_ref() {
            let mut dropped = 0usize;
            while let Ok(Ok(_)) = rx.try_recv() {
                dropped += 1;
            }
            if dropped > 0 {
                tracing::debug!(dropped, "discarded stale confirmation input");
            }
        }
    }

    fn read_answer(&self, timeout: Duration) -> Option<Answer> {
        let mut answers = self.answers.lock().unwrap_or_else(PoisonError::into_inner);
        if answers.is_none() {
            let input = self.input.lock().unwrap_or_else(PoisonError::into_inner).take();
            *answers = input.map(spawn_reader);
        }
        let Some(rx) = answers.as_ref() else {
            return Some(Err(ProviderError::InputClosed));
        };
        match rx.recv_timeout(timeout) {
            Ok(answer) => Some(answer),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(ProviderError::InputClosed)),
        }
    }
}

/// Forward lines until the input ends, fails, or the provider is dropped.
fn spawn_reader(mut input: Box<dyn BufRead + Send>) -> mpsc::Receiver<Answer> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || loop {
        let mut line = String::new();
        let (answer, done) = match input.read_line(&mut line) {
            Ok(0) => (Err(ProviderError::InputClosed), true),
            Ok(_) => (Ok(line), false),
            Err(e) => (Err(ProviderError::Io(e)), true),
        };
        if tx.send(answer).is_err() || done {
            break;
        }
    });
    rx
}

impl ConfirmationProvider for InteractiveProvider {
    fn name(&self) -> &'static str {
        "interactive"
    }

    fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationOutcome, ProviderError> {
        let full_yes = self.require_yes_for_admin && request.permissions.contains(Permission::Admin);
        self.discard_typeahead();
        self.render(request, full_yes)?;

        match self.read_answer(request.timeout) {
            Some(answer) => Ok(parse_answer(&answer?, full_yes)),
            None => {
                let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
                let _ = writeln!(out, "\n[sg] no answer, request timed out");
                Ok(ConfirmationOutcome::Timeout)
            }
        }
    }
}

/// `yes` always approves; `y` approves unless the full word is required.
fn parse_answer(line: &str, full_yes: bool) -> ConfirmationOutcome {
    match line.trim().to_lowercase().as_str() {
        "yes" => ConfirmationOutcome::Approved,
        "y" if !full_yes => ConfirmationOutcome::Approved,
        _ => ConfirmationOutcome::Denied,
    }
}

/// Answers without a person: a fixed outcome, or a queue consumed one
/// request at a time. An exhausted queue denies.
pub struct ScriptedProvider {
    fixed: Option<ConfirmationOutcome>,
    queue: Mutex<VecDeque<ConfirmationOutcome>>,
}

impl ScriptedProvider {
    pub fn fixed(outcome: ConfirmationOutcome) -> Self {
        Self {
            fixed: Some(outcome),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn approve_all() -> Self {
        Self::fixed(ConfirmationOutcome::Approved)
    }

    pub fn deny_all() -> Self {
        Self::fixed(ConfirmationOutcome::Denied)
    }

    pub fn sequence(outcomes: impl IntoIterator<Item = ConfirmationOutcome>) -> Self {
        Self {
            fixed: None,
            queue: Mutex::new(outcomes.into_iter().collect()),
        }
    }
}

impl ConfirmationProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn confirm(&self, _request: &ConfirmationRequest) -> Result<ConfirmationOutcome, ProviderError> {
        if let Some(outcome) = self.fixed {
            return Ok(outcome);
        }
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(queue.pop_front().unwrap_or(ConfirmationOutcome::Denied))
    }
}

/// One escalation attempt, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationRecord {
    pub request_id: String,
    pub session_id: String,
    pub command: String,
    pub permissions: PermissionSet,
    pub outcome: ConfirmationOutcome,
    pub latency: Duration,
    pub at: DateTime<Utc>,
}

/// Counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EscalationSummary {
    pub total: usize,
    pub approved: usize,
    pub denied: usize,
    pub timeout: usize,
    pub error: usize,
}

/// Every escalation attempt the coordinator has seen.
#[derive(Debug, Default)]
pub struct EscalationLog {
    records: Mutex<Vec<EscalationRecord>>,
}

impl EscalationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, request: &ConfirmationRequest, response: &ConfirmationResponse) {
        let record = EscalationRecord {
            request_id: response.request_id.clone(),
            session_id: request.session_id.clone(),
            command: request.command.clone(),
            permissions: request.permissions.clone(),
            outcome: response.outcome,
            latency: response.latency,
            at: Utc::now(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn records(&self) -> Vec<EscalationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn summary(&self) -> EscalationSummary {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = EscalationSummary {
            total: records.len(),
            ..Default::default()
        };
        for r in records.iter() {
            match r.outcome {
                ConfirmationOutcome::Approved => summary.approved += 1,
                ConfirmationOutcome::Denied => summary.denied += 1,
                ConfirmationOutcome::Timeout => summary.timeout += 1,
                ConfirmationOutcome::Error => summary.error += 1,
            }
        }
        summary
    }
}

/// Default risk text, chosen by the highest-priority permission requested.
pub fn describe_risk(permissions: &PermissionSet) -> String {
    let text = match permissions.highest() {
        Some(Permission::Admin) => {
            "Requires administrator privileges and can change system-wide state"
        }
        Some(Permission::Write) => "Creates, modifies or deletes files",
        Some(Permission::Execute) => "Launches other programs or scripts",
        Some(Permission::Read) | None => "Elevated operation requested",
    };
    text.to_string()
}

/// Routes elevation requests to a provider and keeps the history.
pub struct ConfirmationCoordinator {
    provider: Box<dyn ConfirmationProvider>,
    audit: Arc<AuditLogger>,
    default_timeout: Duration,
    history: Mutex<Vec<(ConfirmationRequest, ConfirmationResponse)>>,
    escalations: EscalationLog,
}

impl ConfirmationCoordinator {
    pub fn new(provider: Box<dyn ConfirmationProvider>, audit: Arc<AuditLogger>) -> Self {
        Self {
            provider,
            audit,
            default_timeout: Duration::from_secs(60),
            history: Mutex::new(Vec::new()),
            escalations: EscalationLog::new(),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Ask for approval of `command`. An empty `risk_description` is
    /// replaced with one derived from `permissions`.
    pub fn request_permission_confirmation(
        &self,
        command: &str,
        permissions: &PermissionSet,
        session_id: &str,
        risk_description: &str,
        timeout: Option<Duration>,
    ) -> ConfirmationResponse {
        self.submit(ConfirmationRequest {
            id: String::new(),
            command: command.to_string(),
            permissions: permissions.clone(),
            risk_description: risk_description.to_string(),
            session_id: session_id.to_string(),
            correlation_id: String::new(),
            timeout: timeout.unwrap_or(self.default_timeout),
        })
    }

    /// Run a prepared request. Exactly one response is produced and recorded
    /// for it, whatever the provider does.
    pub fn submit(&self, mut request: ConfirmationRequest) -> ConfirmationResponse {
        if request.id.is_empty() {
            request.id = uuid::Uuid::new_v4().to_string();
        }
        if request.risk_description.trim().is_empty() {
            request.risk_description = describe_risk(&request.permissions);
        }

        self.audit.log_confirmation_issued(&request);

        let start = Instant::now();
        let (outcome, detail) = match self.provider.confirm(&request) {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                tracing::warn!(request_id = %request.id, error = %e, "confirmation provider failed");
                (ConfirmationOutcome::Error, Some(e.to_string()))
            }
        };
        let mut response = ConfirmationResponse::for_request(&request, outcome, start.elapsed());
        if let Some(detail) = detail {
            response = response.with_detail(detail);
        }

        tracing::info!(
            request_id = %request.id,
            provider = self.provider.name(),
            outcome = outcome.as_str(),
            latency_ms = response.latency.as_millis() as u64,
            "confirmation resolved"
        );
        self.audit.log_confirmation_resolved(&request, &response);
        self.escalations.record(&request, &response);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request, response.clone()));

        response
    }

    /// Every request/response pair so far, oldest first.
    pub fn history(&self) -> Vec<(ConfirmationRequest, ConfirmationResponse)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn escalations(&self) -> &EscalationLog {
        &self.escalations
    }
}

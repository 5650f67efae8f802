//! Composition root for the security pipeline.

use std::sync::Arc;
use std::time::Duration;

use sg_protocol::{ExecutionResult, PermissionSet, ValidationResult};
use sg_sandbox::SandboxGateway;

use crate::audit::AuditLogger;
use crate::config::{Config, ConfirmationMode};
use crate::confirmation::{
    ConfirmationCoordinator, ConfirmationProvider, InteractiveProvider, ScriptedProvider,
};
use crate::dispatch::ExecutionDispatcher;
use crate::error::{CoreError, Result};
use crate::permissions::PermissionAnalyzer;
use crate::policy::WhitelistValidator;
use crate::rules::RuleStore;
use crate::sandbox::OsSandboxGateway;
use crate::translate::{self, Translator};

pub struct SecurityOrchestrator {
    validator: Arc<WhitelistValidator>,
    analyzer: PermissionAnalyzer,
    coordinator: Arc<ConfirmationCoordinator>,
    dispatcher: Arc<ExecutionDispatcher>,
    gateway: Option<Arc<dyn SandboxGateway>>,
    sandbox_enabled: bool,
    sandbox_timeout: Duration,
    audit: Arc<AuditLogger>,
}

impl SecurityOrchestrator {
    /// Orchestrator with sandboxing disabled.
    pub fn new(
        validator: Arc<WhitelistValidator>,
        coordinator: Arc<ConfirmationCoordinator>,
        dispatcher: Arc<ExecutionDispatcher>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            validator,
            analyzer: PermissionAnalyzer::new(),
            coordinator,
            dispatcher,
            gateway: None,
            sandbox_enabled: false,
            sandbox_timeout: Duration::from_secs(60),
            audit,
        }
    }

    /// Enable sandboxed execution through `gateway`.
    pub fn with_sandbox(mut self, gateway: Arc<dyn SandboxGateway>, timeout: Duration) -> Self {
        self.gateway = Some(gateway);
        self.sandbox_enabled = true;
        self.sandbox_timeout = timeout;
        self
    }

    /// Wire every component from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let audit = if config.audit.enabled {
            let path = config.audit.resolve_log_path();
            match AuditLogger::new(&path) {
                Ok(logger) => logger,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "audit log unavailable");
                    AuditLogger::noop()
                }
            }
        } else {
            AuditLogger::noop()
        };
        let audit = Arc::new(audit);

        let validator = WhitelistValidator::load(RuleStore::new(
            config.policy.resolve_rules_path(),
        ))?;

        let provider: Box<dyn ConfirmationProvider> = match config.confirmation.mode {
            ConfirmationMode::Interactive => Box::new(InteractiveProvider::stdio(
                config.confirmation.require_yes_for_admin,
            )),
            ConfirmationMode::Approve => Box::new(ScriptedProvider::approve_all()),
            ConfirmationMode::Deny => Box::new(ScriptedProvider::deny_all()),
        };
        let coordinator = ConfirmationCoordinator::new(provider, audit.clone())
            .with_default_timeout(config.confirmation.timeout());

        let dispatcher = Arc::new(ExecutionDispatcher::from_config(&config.execution));
        if !dispatcher.descriptor().available {
            tracing::warn!(
                interpreter = %config.execution.interpreter,
                "no interpreter found; commands will fail until one is installed"
            );
        }

        let mut orchestrator = Self::new(
            Arc::new(validator),
            Arc::new(coordinator),
            dispatcher.clone(),
            audit,
        );
        if config.sandbox.enabled {
            let gateway = OsSandboxGateway::new(dispatcher, config.sandbox.policy());
            orchestrator = orchestrator.with_sandbox(Arc::new(gateway), config.sandbox.timeout());
        }
        Ok(orchestrator)
    }

    pub fn validate_command(&self, command: &str) -> ValidationResult {
        self.validator.validate(command)
    }

    pub fn check_permissions(&self, command: &str) -> PermissionSet {
        self.analyzer.check_permissions(command)
    }

    /// Run `command` through the sandbox gateway. Errors when sandboxing is
    /// disabled or the isolation runtime is unreachable.
    pub async fn execute_in_sandbox(
        &self,
        command: &str,
        timeout: Option<Duration>,
        correlation_id: &str,
    ) -> Result<ExecutionResult> {
        if !self.sandbox_enabled {
            return Err(CoreError::config("sandboxed execution is disabled"));
        }
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| CoreError::config("no sandbox gateway configured"))?;
        let result = gateway
            .execute(
                command,
                timeout.unwrap_or(self.sandbox_timeout),
                correlation_id,
            )
            .await?;
        Ok(result)
    }

    pub fn sandbox_enabled(&self) -> bool {
        self.sandbox_enabled
    }

    pub fn validator(&self) -> &WhitelistValidator {
        &self.validator
    }

    pub fn coordinator(&self) -> &Arc<ConfirmationCoordinator> {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &ExecutionDispatcher {
        &self.dispatcher
    }

    pub fn translator(&self) -> &'static Translator {
        translate::translator()
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}

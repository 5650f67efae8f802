//! Request routing: validate, confirm, adapt, then execute directly or in
//! the sandbox. Every step is audited under one correlation id.

use std::sync::Arc;
use std::time::Duration;

use sg_protocol::{
    ConfirmationOutcome, ConfirmationRequest, ConfirmationResponse, ExecutionResult, Permission,
    Platform, ValidationResult,
};

use crate::dispatch::ExecutionContext;
use crate::error::Result;
use crate::orchestrator::SecurityOrchestrator;

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub command: String,
    /// Route through the sandbox gateway instead of direct dispatch.
    pub sandbox: bool,
    /// Dialect to adapt to. Defaults to the interpreter's own dialect.
    pub target: Option<Platform>,
    /// Generated when absent.
    pub correlation_id: Option<String>,
}

impl PipelineRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Nothing ran. The result carries reasons and alternatives.
    Blocked {
        correlation_id: String,
        validation: ValidationResult,
    },
    /// Confirmation was not granted.
    Declined {
        correlation_id: String,
        validation: ValidationResult,
        response: ConfirmationResponse,
    },
    Executed {
        /// The command as adapted and run.
        command: String,
        validation: ValidationResult,
        result: ExecutionResult,
    },
}

impl PipelineOutcome {
    pub fn correlation_id(&self) -> &str {
        match self {
            PipelineOutcome::Blocked { correlation_id, .. }
            | PipelineOutcome::Declined { correlation_id, .. } => correlation_id,
            PipelineOutcome::Executed { result, .. } => &result.correlation_id,
        }
    }

    pub fn validation(&self) -> &ValidationResult {
        match self {
            PipelineOutcome::Blocked { validation, .. }
            | PipelineOutcome::Declined { validation, .. }
            | PipelineOutcome::Executed { validation, .. } => validation,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, PipelineOutcome::Executed { result, .. } if result.success)
    }
}

pub struct CommandPipeline {
    orchestrator: Arc<SecurityOrchestrator>,
}

impl CommandPipeline {
    pub fn new(orchestrator: Arc<SecurityOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &SecurityOrchestrator {
        &self.orchestrator
    }

    /// Route one request. `Err` only for configuration or sandbox
    /// infrastructure problems.
    pub async fn handle(&self, request: PipelineRequest) -> Result<PipelineOutcome> {
        let orch = &self.orchestrator;
        let audit = orch.audit();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let command = request.command.as_str();

        let validation = orch.validate_command(command);
        audit.log_validation(&correlation_id, command, &validation);
        if !validation.is_valid {
            audit.log_blocked(&correlation_id, command, &validation);
            tracing::info!(
                correlation_id = %correlation_id,
                risk = validation.risk_assessment.as_str(),
                "command blocked"
            );
            return Ok(PipelineOutcome::Blocked {
                correlation_id,
                validation,
            });
        }

        if validation.requires_confirmation
            || validation.required_permissions.contains(Permission::Admin)
        {
            let response = self.confirm(command, &validation, &correlation_id).await;
            if !response.outcome.is_approved() {
                tracing::info!(
                    correlation_id = %correlation_id,
                    outcome = response.outcome.as_str(),
                    "command not confirmed"
                );
                return Ok(PipelineOutcome::Declined {
                    correlation_id,
                    validation,
                    response,
                });
            }
        }

        let target = request.target.unwrap_or_else(|| self.default_dialect());
        let adapted = orch.translator().adapt(command, target);
        if adapted != command {
            tracing::debug!(correlation_id = %correlation_id, %adapted, "command adapted");
            let recheck = orch.validate_command(&adapted);
            if !recheck.is_valid {
                audit.log_blocked(&correlation_id, &adapted, &recheck);
                return Ok(PipelineOutcome::Blocked {
                    correlation_id,
                    validation: recheck,
                });
            }
        }

        let result = if request.sandbox {
            orch.execute_in_sandbox(&adapted, None, &correlation_id)
                .await?
        } else {
            let ctx = ExecutionContext {
                target: Some(target),
                ..ExecutionContext::new(correlation_id.clone())
            };
            orch.dispatcher().execute_command(&adapted, &ctx).await
        };

        audit.log_executed(&adapted, &result);
        tracing::info!(
            correlation_id = %correlation_id,
            success = result.success,
            return_code = result.return_code,
            sandbox = result.sandbox_used,
            elapsed_ms = result.execution_time_ms(),
            "command executed"
        );
        Ok(PipelineOutcome::Executed {
            command: adapted,
            validation,
            result,
        })
    }

    /// PowerShell speaks the Windows dialect wherever it runs.
    fn default_dialect(&self) -> Platform {
        let dispatcher = self.orchestrator.dispatcher();
        if dispatcher.descriptor().interpreter.is_powershell() {
            Platform::Windows
        } else {
            dispatcher.target()
        }
    }

    /// The provider may block on a terminal, so it runs off the async workers.
    async fn confirm(
        &self,
        command: &str,
        validation: &ValidationResult,
        correlation_id: &str,
    ) -> ConfirmationResponse {
        let coordinator = self.orchestrator.coordinator().clone();
        let request = ConfirmationRequest {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.to_string(),
            permissions: validation.required_permissions.clone(),
            risk_description: validation.confirmation_reasons.join("; "),
            session_id: self.orchestrator.audit().session_id().to_string(),
            correlation_id: correlation_id.to_string(),
            timeout: coordinator.default_timeout(),
        };
        let pending = request.clone();
        match tokio::task::spawn_blocking(move || coordinator.submit(request)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "confirmation task failed");
                ConfirmationResponse::for_request(&pending, ConfirmationOutcome::Error, Duration::ZERO)
                    .with_detail(e.to_string())
            }
        }
    }
}

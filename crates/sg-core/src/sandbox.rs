//! OS sandbox gateway: re-executes this binary as
//! `shellgate --sandbox-exec <interpreter argv>` with the policy in the
//! environment, so the filesystem restrictions land on the child only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sg_protocol::ExecutionResult;
use sg_sandbox::gateway::mark_sandboxed;
use sg_sandbox::policy::SANDBOX_ENV_VAR;
use sg_sandbox::{SandboxError, SandboxGateway, SandboxPolicy, SANDBOX_EXEC_FAILURE};

use crate::dispatch::{self, ExecutionContext, ExecutionDispatcher};
use crate::process;

/// Prefix the launcher puts on its own diagnostics.
const LAUNCHER_PREFIX: &str = "[sg:sandbox]";

pub struct OsSandboxGateway {
    dispatcher: Arc<ExecutionDispatcher>,
    policy: SandboxPolicy,
    launcher: Option<PathBuf>,
}

impl OsSandboxGateway {
    /// Gateway that launches through the running executable.
    pub fn new(dispatcher: Arc<ExecutionDispatcher>, policy: SandboxPolicy) -> Self {
        let launcher = std::env::current_exe().ok();
        Self {
            dispatcher,
            policy,
            launcher,
        }
    }

    /// Use `launcher` instead of the running executable.
    pub fn with_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }
}

#[async_trait]
impl SandboxGateway for OsSandboxGateway {
    fn name(&self) -> &'static str {
        if cfg!(target_os = "macos") {
            "seatbelt"
        } else {
            "landlock"
        }
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        correlation_id: &str,
    ) -> Result<ExecutionResult, SandboxError> {
        if !sg_sandbox::is_supported() {
            return Err(SandboxError::Unavailable(
                "no OS sandbox on this platform".to_string(),
            ));
        }
        let launcher = match self.launcher {
            Some(ref p) if p.is_file() => p.clone(),
            Some(ref p) => {
                return Err(SandboxError::Unavailable(format!(
                    "launcher {} not found",
                    p.display()
                )))
            }
            None => {
                return Err(SandboxError::Unavailable(
                    "cannot locate the sandbox launcher".to_string(),
                ))
            }
        };
        let ctx = ExecutionContext::new(correlation_id).with_timeout(timeout);
        let descriptor = self.dispatcher.descriptor();
        if !descriptor.available {
            let mut result = self.dispatcher.execute_command(command, &ctx).await;
            result.sandbox_used = true;
            return Ok(result);
        }

        // The interpreter may live outside the system paths (/snap, /opt/microsoft).
        let mut policy = self.policy.clone();
        if let Some(dir) = Path::new(&descriptor.program).parent() {
            if dir.is_absolute() {
                policy.allow_read(dir);
            }
        }
        let policy_json = policy
            .to_json()
            .map_err(|e| SandboxError::Platform(format!("policy serialization: {e}")))?;

        let mut spec = self.dispatcher.prepare(&descriptor, command, &ctx);
        let mut args = vec!["--sandbox-exec".to_string(), spec.program];
        args.append(&mut spec.args);
        spec.program = launcher.to_string_lossy().into_owned();
        spec.args = args;
        spec.env.push((SANDBOX_ENV_VAR.to_string(), policy_json));

        tracing::debug!(
            correlation_id,
            launcher = %spec.program,
            policy = %policy.summary(),
            "sandboxed dispatch"
        );
        let out = process::run(&spec)
            .await
            .map_err(|e| SandboxError::Unavailable(format!("failed to start launcher: {e}")))?;

        if out.exit_code == Some(SANDBOX_EXEC_FAILURE) && out.stderr.starts_with(LAUNCHER_PREFIX) {
            let reason = out.stderr.trim_start_matches(LAUNCHER_PREFIX).trim();
            return Err(SandboxError::Unavailable(reason.to_string()));
        }

        let result = dispatch::into_result(
            out,
            spec.timeout,
            self.dispatcher.max_output_bytes(),
            correlation_id,
        );
        Ok(mark_sandboxed(result))
    }
}

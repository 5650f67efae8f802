//! The sandbox gateway contract.
//!
//! A gateway runs a command in isolation and is functionally substitutable for
//! direct dispatch: identical [`ExecutionResult`] shape, with `sandbox_used`
//! set. A command that fails, times out, or cannot be found inside the sandbox
//! is a normal result. `Err` is reserved for the isolation runtime itself
//! being unreachable.

use std::time::Duration;

use async_trait::async_trait;
use sg_protocol::ExecutionResult;

use crate::SandboxError;

#[async_trait]
pub trait SandboxGateway: Send + Sync {
    /// Short name for logs and audit records.
    fn name(&self) -> &'static str;

    /// Run `command` in isolation, bounded by `timeout`.
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        correlation_id: &str,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Stamp a result as produced by a sandbox.
pub fn mark_sandboxed(mut result: ExecutionResult) -> ExecutionResult {
    result.sandbox_used = true;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_protocol::Platform;

    struct Unreachable;

    #[async_trait]
    impl SandboxGateway for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn execute(
            &self,
            _command: &str,
            _timeout: Duration,
            _correlation_id: &str,
        ) -> Result<ExecutionResult, SandboxError> {
            Err(SandboxError::Unavailable("runtime not reachable".into()))
        }
    }

    struct Echo;

    #[async_trait]
    impl SandboxGateway for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(
            &self,
            command: &str,
            _timeout: Duration,
            correlation_id: &str,
        ) -> Result<ExecutionResult, SandboxError> {
            let mut result = ExecutionResult::failure("", Platform::Linux, correlation_id);
            result.success = true;
            result.return_code = 0;
            result.stdout = command.to_string();
            result.diagnostic = None;
            Ok(mark_sandboxed(result))
        }
    }

    #[tokio::test]
    async fn infrastructure_failure_is_an_error() {
        let gateway: Box<dyn SandboxGateway> = Box::new(Unreachable);
        let err = gateway
            .execute("ls", Duration::from_secs(1), "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }

    #[tokio::test]
    async fn results_are_marked_sandboxed() {
        let gateway: Box<dyn SandboxGateway> = Box::new(Echo);
        let result = gateway
            .execute("hello", Duration::from_secs(1), "c2")
            .await
            .unwrap();
        assert!(result.sandbox_used);
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.correlation_id, "c2");
        assert_eq!(gateway.name(), "echo");
    }
}

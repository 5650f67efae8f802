//! OS-level filesystem sandbox and the sandbox gateway contract for shellgate.
//!
//! Two halves:
//!
//! - [`SandboxGateway`] is the contract the security pipeline consumes: run a
//!   command in isolation with a timeout and return the same
//!   [`sg_protocol::ExecutionResult`] shape as direct dispatch. Only genuine
//!   infrastructure unavailability is an error.
//! - [`apply`] / [`exec_sandboxed`] implement one such isolation: kernel-enforced
//!   filesystem restrictions using Landlock (Linux) or Seatbelt (macOS),
//!   applied in a re-executed child right before it execs the command.
//!
//! # Re-exec flow
//!
//! The parent process stays unsandboxed. Sandboxed commands run via
//! `shellgate --sandbox-exec <argv...>`, which:
//! 1. Deserializes the policy from the `__SG_SANDBOX_POLICY` env var
//! 2. Applies the OS sandbox (irreversible)
//! 3. Execs the requested argv
//!
//! ```no_run
//! use sg_sandbox::{apply, SandboxPolicy};
//!
//! let policy = SandboxPolicy::default();
//! apply(&policy).expect("sandbox application failed");
//! ```

pub mod gateway;
pub mod policy;

#[cfg(target_os = "linux")]
pub mod landlock;

#[cfg(target_os = "macos")]
pub mod seatbelt;

pub use gateway::SandboxGateway;
pub use policy::SandboxPolicy;

/// Exit code of the `--sandbox-exec` launcher when it cannot run the command.
pub const SANDBOX_EXEC_FAILURE: i32 = 126;

/// Errors from the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Platform-specific sandbox error (Landlock or Seatbelt).
    #[error("sandbox error: {0}")]
    Platform(String),
    /// Policy not found in environment.
    #[error("sandbox error: {} env var not set", policy::SANDBOX_ENV_VAR)]
    NoPolicyInEnv,
    /// The isolation runtime cannot be reached at all. Command-level
    /// failures are never reported this way.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

/// Whether this build has an OS sandbox implementation.
pub fn is_supported() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos"))
}

/// Apply the filesystem sandbox to the current process. Irreversible.
///
/// On macOS, uses Seatbelt (`sandbox_init`).
/// On Linux, uses Landlock.
/// On other platforms, returns an error.
pub fn apply(policy: &SandboxPolicy) -> Result<(), SandboxError> {
    #[cfg(target_os = "macos")]
    {
        seatbelt::apply_seatbelt(policy)
    }
    #[cfg(target_os = "linux")]
    {
        landlock::apply_landlock(policy)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = policy;
        Err(SandboxError::Platform(
            "no sandbox implementation for this platform".to_string(),
        ))
    }
}

/// Deserialize policy from env, apply sandbox, exec command. Does not return on success.
///
/// This is the entry point for `shellgate --sandbox-exec <args...>`.
/// On failure, prints an error to stderr and exits with code 126.
#[cfg(unix)]
pub fn exec_sandboxed(args: &[String]) -> ! {
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    let policy = match SandboxPolicy::from_env() {
        Some(p) => p,
        None => {
            eprintln!("[sg:sandbox] {}", SandboxError::NoPolicyInEnv);
            std::process::exit(SANDBOX_EXEC_FAILURE);
        }
    };

    if args.is_empty() {
        eprintln!("[sg:sandbox] error: no command specified");
        std::process::exit(SANDBOX_EXEC_FAILURE);
    }

    if let Err(e) = apply(&policy) {
        eprintln!("[sg:sandbox] {e}");
        std::process::exit(SANDBOX_EXEC_FAILURE);
    }

    // Replaces this process; only returns on error.
    let err = Command::new(&args[0]).args(&args[1..]).exec();

    eprintln!("[sg:sandbox] exec failed: {err}");
    std::process::exit(SANDBOX_EXEC_FAILURE);
}

#[cfg(not(unix))]
pub fn exec_sandboxed(_args: &[String]) -> ! {
    eprintln!("[sg:sandbox] error: no sandbox implementation for this platform");
    std::process::exit(SANDBOX_EXEC_FAILURE);
}

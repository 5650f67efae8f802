//! sg-protocol: Shared types for the shellgate command-safety pipeline.
//!
//! This crate defines the data model passed between the validator, the
//! confirmation flow, the execution dispatcher, the sandbox gateway and any
//! upstream caller.

pub mod confirmation;
pub mod execution;
pub mod platform;
pub mod rule;
pub mod validation;

pub use confirmation::{ConfirmationOutcome, ConfirmationRequest, ConfirmationResponse};
pub use execution::{ExecutionResult, OutputFormat, NO_EXIT_CODE};
pub use platform::Platform;
pub use rule::{RiskLevel, Rule, RuleAction};
pub use validation::{Permission, PermissionSet, ValidationResult};

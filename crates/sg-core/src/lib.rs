//! sg-core: the shellgate command-safety pipeline.
//!
//! Commands pass through validation against the rule set, privilege
//! analysis, confirmation for elevated work, dialect adaptation and finally
//! direct or sandboxed execution. Exposed as a library for integration
//! testing and embedding; the `shellgate` binary is a thin CLI over it.

pub mod audit;
pub mod config;
pub mod confirmation;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod permissions;
pub mod pipeline;
pub mod policy;
pub mod process;
pub mod rules;
pub mod sandbox;
pub mod translate;

pub use error::{CoreError, Result};
pub use orchestrator::SecurityOrchestrator;
pub use pipeline::{CommandPipeline, PipelineOutcome, PipelineRequest};

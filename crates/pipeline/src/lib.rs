//! Job orchestration: parameterize a template, submit it, wait for the
//! backend to finish, and collect the produced artifacts.
//!
//! [`orchestrator::Orchestrator`] is the single entry point; the API
//! server and the CLI are thin front ends over it.

pub mod artifacts;
pub mod completion;
pub mod error;
pub mod orchestrator;
pub mod progress;

pub use error::OrchestrationError;
pub use orchestrator::{GenerateOptions, GenerationOutput, Orchestrator};

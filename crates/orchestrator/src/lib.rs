//! # Conclave Orchestrator
//!
//! The single entry point of the engine. [`Orchestrator::process`] takes a
//! session id, a message and an [`ExecutionMode`]:
//!
//! - **single**: one agent answers
//! - **parallel**: every selected agent answers the same input concurrently;
//!   failed branches are recovered into a partial result
//! - **sequential**: a pipeline where stage *n* sees stage *n − 1*'s output;
//!   the first failure aborts with the completed stages attached
//! - **loop**: generate, evaluate, refine until the [`Evaluator`] reports
//!   convergence or the iteration cap is hit
//!
//! Every mode writes its outputs to the session before returning and
//! emits one observability record per agent invocation.

mod context;
pub mod evaluator;
pub mod mode;
mod modes;
pub mod options;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use evaluator::{Evaluation, Evaluator, FnEvaluator, grading_prompt, refinement_prompt};
pub use mode::ExecutionMode;
pub use options::{ProcessOptions, ProcessResult, ResumeOutcome, SystemStatus};
pub use orchestrator::Orchestrator;

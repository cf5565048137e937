//! Agents — the lifecycle state machine, the registry, and the runner.
//!
//! Every agent lives in the [`AgentRegistry`] as an [`AgentHandle`]: its
//! descriptor plus a state slot that serializes transitions. The
//! [`AgentRunner`] drives one invocation at a time per agent:
//!
//! 1. **Dispatch**: `idle → busy`, storing the initial checkpoint
//! 2. **Generate**: one model call with the session context
//! 3. **Tool steps**: one per `use_tool:` directive in the generated text
//! 4. **Finish**: `busy → idle` with the output, or `busy → failed`
//!
//! A pause takes effect at the next step boundary. Resuming continues from
//! the saved checkpoint, either in the parked invocation or, if that is
//! gone, from the blob alone via [`AgentRunner::continue_from`].

pub mod registry;
pub mod runner;
pub mod slot;

pub use registry::{AgentFilter, AgentRegistry};
pub use runner::{AgentRunner, InvocationOutcome};
pub use slot::{AgentHandle, Resumed};

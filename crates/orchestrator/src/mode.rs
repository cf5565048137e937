//! Execution modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a request is coordinated across agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One agent answers.
    #[default]
    Single,
    /// Every selected agent answers the same input concurrently.
    Parallel,
    /// Each agent refines the previous agent's output, in order.
    Sequential,
    /// One agent iterates until an evaluator is satisfied.
    Loop,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 4] = [
        ExecutionMode::Single,
        ExecutionMode::Parallel,
        ExecutionMode::Sequential,
        ExecutionMode::Loop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Single => "single",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Loop => "loop",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown execution mode '{s}' (expected single, parallel, sequential or loop)")
            })
    }
}

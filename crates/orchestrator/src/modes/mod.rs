//! The four coordination algorithms, as `impl Orchestrator` blocks.

mod iterate;
mod parallel;
mod sequential;
mod single;

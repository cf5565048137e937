//! Session memory for Conclave.
//!
//! Each session keeps an append-only episodic log, a bounded long-term fact
//! map and a running size estimate. When the log outgrows its limits, the
//! oldest entries are folded into one synthetic summary entry by a
//! [`Summarizer`]; the most recent entries and every fact survive verbatim.

pub mod session;
pub mod store;
pub mod summarizer;
pub mod token;

pub use session::SessionSnapshot;
pub use store::SessionStore;
pub use summarizer::{ModelSummarizer, Summarizer};
pub use token::estimate_tokens;

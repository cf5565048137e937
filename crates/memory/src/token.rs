//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! Budgets are expressed in these estimated tokens.

use conclave_core::Message;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Render one episodic entry the way it appears in a context view.
pub fn render_entry(message: &Message) -> String {
    format!("[{}] {}", message.sender(), message.content())
}

/// Estimated tokens of one rendered entry, including its line break.
pub fn estimate_entry_tokens(message: &Message) -> usize {
    estimate_tokens(&render_entry(message)) + 1
}

/// Estimate tokens for a slice of entries.
pub fn estimate_entries_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_entry_tokens).sum()
}

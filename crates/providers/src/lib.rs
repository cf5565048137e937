//! Model provider implementations for Conclave.
//!
//! Every backend implements `conclave_core::ModelProvider`. One adapter
//! covers the OpenAI-compatible chat completions API, which is what Groq,
//! OpenAI, OpenRouter and local servers such as Ollama expose.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

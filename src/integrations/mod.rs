//! External service clients.
//!
//! - OpenAI chat completions (plain, structured output, tool calling)

pub mod openai;

pub use openai::{ModelSettings, OpenAIClient, OpenAIModel};

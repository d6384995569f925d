//! Knowledge-graph reader for long documents
//!
//! This library provides tools to:
//! - Split documents into sentence-aligned chunks
//! - Extract keyed atomic facts from chunks with a language model
//! - Normalize keys and build a co-occurrence knowledge graph
//! - Index graph nodes in a similarity index (Qdrant or local)
//! - Answer questions by planning, selecting nodes, exploring facts and reading chunks

pub mod analysis;
pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod integrations;
pub mod llm;
pub mod metrics;
pub mod prompts;
pub mod reader;

// Re-export common types
pub use config::Config;
pub use error::{Error, Result};
pub use graph::KnowledgeGraph;
pub use integrations::{OpenAIClient, OpenAIModel};
pub use prompts::{load_prompt, Prompt, PromptSet};
pub use reader::GraphReader;

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;

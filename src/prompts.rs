//! System prompt loader.
//!
//! Prompts are Markdown files stored in the `prompts/` directory at the project root.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Atomic fact + key extraction per chunk.
    KeyAtomic,
    /// Rational plan for a question.
    RationalPlan,
    /// Initial node selection from the shortlist.
    SelectNodes,
    /// Fact exploration over nodes and neighbours.
    ReadAtomicFacts,
    /// Chunk reading and final answer.
    ReadChunks,
}

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::KeyAtomic => "key_atomic.md",
            Prompt::RationalPlan => "rational_plan.md",
            Prompt::SelectNodes => "select_nodes.md",
            Prompt::ReadAtomicFacts => "read_atomic_facts.md",
            Prompt::ReadChunks => "read_chunks.md",
        }
    }

    /// Load the prompt from the default prompts directory.
    pub fn load(&self) -> Result<String> {
        load_prompt(&prompts_dir(), self.filename())
    }
}

/// Load a prompt file from `dir`.
pub fn load_prompt(dir: &Path, filename: &str) -> Result<String> {
    let path = dir.join(filename);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        Error::Configuration(format!("Failed to load prompt {}: {}", path.display(), e))
    })?;
    if text.trim().is_empty() {
        return Err(Error::Configuration(format!(
            "Prompt {} is empty",
            path.display()
        )));
    }
    Ok(text)
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    // Look for prompts/ relative to the current or parent directory
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from("../../prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    // Fallback
    PathBuf::from("prompts")
}

/// All available prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![
        Prompt::KeyAtomic,
        Prompt::RationalPlan,
        Prompt::SelectNodes,
        Prompt::ReadAtomicFacts,
        Prompt::ReadChunks,
    ]
}

/// Every prompt the pipeline needs, loaded up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub key_atomic: String,
    pub rational_plan: String,
    pub select_nodes: String,
    pub read_atomic_facts: String,
    pub read_chunks: String,
}

impl PromptSet {
    /// Load all prompts from `dir`; any missing file is a configuration error.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            key_atomic: load_prompt(dir, Prompt::KeyAtomic.filename())?,
            rational_plan: load_prompt(dir, Prompt::RationalPlan.filename())?,
            select_nodes: load_prompt(dir, Prompt::SelectNodes.filename())?,
            read_atomic_facts: load_prompt(dir, Prompt::ReadAtomicFacts.filename())?,
            read_chunks: load_prompt(dir, Prompt::ReadChunks.filename())?,
        })
    }

    pub fn get(&self, prompt: Prompt) -> &str {
        match prompt {
            Prompt::KeyAtomic => &self.key_atomic,
            Prompt::RationalPlan => &self.rational_plan,
            Prompt::SelectNodes => &self.select_nodes,
            Prompt::ReadAtomicFacts => &self.read_atomic_facts,
            Prompt::ReadChunks => &self.read_chunks,
        }
    }
}

//! Persistent id → text mapping of document chunks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::chunker::Chunk;
use crate::{Error, Result};

/// Ordered chunk storage with random access by id and id±1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkStore {
    chunks: BTreeMap<usize, String>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        Self {
            chunks: chunks
                .into_iter()
                .filter(|c| !c.text.is_empty())
                .map(|c| (c.id, c.text))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        usize::try_from(id)
            .map(|id| self.chunks.contains_key(&id))
            .unwrap_or(false)
    }

    /// Text of chunk `id`.
    pub fn get(&self, id: i64) -> Result<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|key| self.chunks.get(&key))
            .map(String::as_str)
            .ok_or(Error::ReferentialIntegrity(id))
    }

    /// Text of the chunk following `id`.
    pub fn next(&self, id: i64) -> Result<&str> {
        let next = id.checked_add(1).ok_or(Error::ReferentialIntegrity(id))?;
        self.get(next)
    }

    /// Text of the chunk preceding `id`.
    pub fn previous(&self, id: i64) -> Result<&str> {
        let previous = id.checked_sub(1).ok_or(Error::ReferentialIntegrity(id))?;
        self.get(previous)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.chunks.iter().map(|(id, text)| (*id, text.as_str()))
    }

    /// Write the store as a JSON object, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Chunks exported to {} ({} chunks)", path.display(), self.len());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Document(format!("failed to read chunks {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

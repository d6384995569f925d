//! Split a document into the chunk store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::document::{Document, PageTrim};

pub struct ChunkArgs {
    pub document: PathBuf,
    /// Overrides `document.chunk_len`
    pub chunk_len: Option<usize>,
    /// Characters dropped at the start of each page
    pub header: usize,
    /// Offset where each page is cut, 0 keeps the rest of the page
    pub footer: usize,
    /// Overrides `paths.chunks`
    pub out: Option<PathBuf>,
}

/// Chunk the document and write the store; returns the chunk count.
pub fn run(config: &Config, args: ChunkArgs) -> Result<usize> {
    let chunk_len = args.chunk_len.unwrap_or(config.document.chunk_len);
    let document = Document::open(&args.document, chunk_len)?;
    let store = document.chunks(PageTrim::new(args.header, args.footer));

    let out = args.out.unwrap_or_else(|| config.paths.chunks.clone());
    store
        .save(&out)
        .with_context(|| format!("Failed to write chunks to {}", out.display()))?;

    info!(
        "{} -> {} chunks of at most {} characters",
        args.document.display(),
        store.len(),
        chunk_len
    );
    println!("{} chunks written to {}", store.len(), out.display());
    Ok(store.len())
}

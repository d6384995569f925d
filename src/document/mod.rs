//! Document loading and chunking.
//!
//! A [`Document`] reads a PDF (or plain text) file, trims page headers and
//! footers, and hands the joined text to the sentence [`Chunker`]. The
//! resulting chunks are stored in a [`ChunkStore`] that the graph pipeline
//! and the reader share.

pub mod chunk_store;
pub mod chunker;

pub use chunk_store::ChunkStore;
pub use chunker::{split_sentences, Chunk, Chunker};

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Character offsets used to cut headers and footers from every page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTrim {
    /// First character kept on each page
    pub start: usize,
    /// Character offset where the page is cut; 0 keeps everything after `start`
    pub end: usize,
}

impl PageTrim {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Apply the trim to one page of text.
    pub fn apply<'a>(&self, page: &'a str) -> &'a str {
        let total = page.chars().count();
        let end = if self.end == 0 { total } else { self.end.min(total) };
        if self.start >= end {
            return "";
        }

        let byte_at = |n: usize| {
            page.char_indices()
                .nth(n)
                .map(|(idx, _)| idx)
                .unwrap_or(page.len())
        };
        &page[byte_at(self.start)..byte_at(end)]
    }
}

/// Source document with its chunk budget.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    chunker: Chunker,
    pages: Vec<String>,
}

impl Document {
    /// Open a `.pdf` or plain-text document.
    pub fn open(path: impl AsRef<Path>, chunk_len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        let raw = if is_pdf {
            read_pdf(&path)?
        } else {
            std::fs::read_to_string(&path).map_err(|e| {
                Error::Document(format!("Error reading {}: {}", path.display(), e))
            })?
        };

        let pages = raw.split('\x0C').map(str::to_string).collect::<Vec<_>>();
        info!("Opened {} ({} pages)", path.display(), pages.len());

        Ok(Self {
            path,
            chunker: Chunker::new(chunk_len),
            pages,
        })
    }

    /// Build a document from in-memory pages.
    pub fn from_pages(pages: Vec<String>, chunk_len: usize) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            chunker: Chunker::new(chunk_len),
            pages,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Joined page text after header/footer trimming.
    pub fn text(&self, trim: PageTrim) -> String {
        let mut text = String::new();
        for (idx, page) in self.pages.iter().enumerate() {
            if page.trim().is_empty() {
                warn!("Page {} of {} returned no text", idx + 1, self.path.display());
                continue;
            }
            text.push(' ');
            text.push_str(trim.apply(page));
        }
        text
    }

    /// Split the trimmed text into a chunk store.
    pub fn chunks(&self, trim: PageTrim) -> ChunkStore {
        let chunks = self.chunker.chunk(&self.text(trim));
        debug!("Chunked {} into {} chunks", self.path.display(), chunks.len());
        ChunkStore::from_chunks(chunks)
    }
}

#[cfg(feature = "pdf")]
fn read_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| {
        Error::Document(format!("Error reading the PDF file at {}: {}", path.display(), e))
    })
}

#[cfg(not(feature = "pdf"))]
fn read_pdf(path: &Path) -> Result<String> {
    Err(Error::Document(format!(
        "PDF support is disabled, cannot read {}",
        path.display()
    )))
}

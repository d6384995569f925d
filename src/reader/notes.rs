//! Append-only notebook written by the chunk-reading agent.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::Result;

/// Notes file shared by every query of a process.
///
/// Each append takes an exclusive file lock, so concurrent queries (or
/// processes) never interleave partial lines.
#[derive(Debug, Clone)]
pub struct NotesSink {
    path: PathBuf,
}

impl NotesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one note followed by a newline.
    pub fn append(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;
        let written = writeln!(file, "{}", text.trim_end()).and_then(|_| file.flush());
        let _ = file.unlock();
        written?;

        debug!("Note appended to {}", self.path.display());
        Ok(())
    }

    /// Everything written so far; empty when nothing was appended.
    pub fn read_all(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_notes_line_by_line() {
        let dir = tempdir().unwrap();
        let sink = NotesSink::new(dir.path().join("notes/run.txt"));

        sink.append("Paris is the capital").unwrap();
        sink.append("France is in Europe\n").unwrap();

        assert_eq!(
            sink.read_all().unwrap(),
            "Paris is the capital\nFrance is in Europe\n"
        );
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let sink = NotesSink::new(dir.path().join("absent.txt"));
        assert_eq!(sink.read_all().unwrap(), "");
    }

    #[test]
    fn existing_content_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "earlier\n").unwrap();

        NotesSink::new(&path).append("later").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }
}

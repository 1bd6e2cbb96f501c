use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::DocumentChunk;

pub const DEFAULT_ANNOUNCEMENT_TEXT: &str =
    "RELIANCE INDUSTRIES: Board meeting scheduled for Dividend on 2026-01-22.";

/// Static corporate announcement kept as a text file in the data directory.
///
/// The file is seeded with a default text the first time it is read and is
/// never overwritten afterwards.
#[derive(Debug, Clone)]
pub struct AnnouncementSource {
    path: PathBuf,
    label: String,
}

impl AnnouncementSource {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> io::Result<Option<DocumentChunk>> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, DEFAULT_ANNOUNCEMENT_TEXT)?;
            tracing::info!(path = %self.path.display(), "seeded announcement artifact");
        }

        let text = fs::read_to_string(&self.path)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(DocumentChunk::announcement(self.label.clone(), text)))
    }
}

//! # Transient Upload Storage
//!
//! An uploaded file only exists for the duration of one analysis. This module
//! turns the raw multipart bytes into an `AudioSource` the decoder can read:
//!
//! - **Memory**: the bytes are shared behind an `Arc<[u8]>` and read through a
//!   cursor. Nothing touches the filesystem.
//! - **Spooled**: the bytes are written to a `tempfile::NamedTempFile`. The
//!   file is unlinked when the source is dropped, which happens when the
//!   pipeline returns, whether it succeeded or failed.

use crate::config::UploadConfig;
use anyhow::{Context, Result};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A file part received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-side filename, if one was sent
    pub filename: Option<String>,
    /// Raw file content
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: Option<String>, bytes: Vec<u8>) -> Self {
        Self { filename, bytes }
    }

    /// Lower-cased filename extension, used as a container hint for the decoder.
    pub fn extension(&self) -> Option<String> {
        self.filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Where the decoder reads the upload from.
enum Storage {
    Memory(Arc<[u8]>),
    Spooled(NamedTempFile),
}

/// An acquired upload. Dropping it releases the underlying storage.
pub struct AudioSource {
    storage: Storage,
    extension: Option<String>,
    len: usize,
}

impl AudioSource {
    /// Acquire an upload according to the upload configuration.
    ///
    /// ## Errors:
    /// Only spooling can fail (temp directory missing, disk full, ...).
    pub fn acquire(upload: Upload, config: &UploadConfig) -> Result<Self> {
        if config.spool_to_disk {
            Self::spooled(upload, config.spool_dir.as_deref())
        } else {
            Ok(Self::in_memory(upload))
        }
    }

    /// Keep the upload in memory.
    pub fn in_memory(upload: Upload) -> Self {
        let extension = upload.extension();
        let len = upload.bytes.len();
        Self {
            storage: Storage::Memory(Arc::from(upload.bytes)),
            extension,
            len,
        }
    }

    /// Write the upload to a temporary file in `dir` (system temp dir if `None`).
    pub fn spooled(upload: Upload, dir: Option<&Path>) -> Result<Self> {
        let extension = upload.extension();
        let suffix = extension
            .as_ref()
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-").suffix(&suffix);
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("creating spool file")?;

        file.write_all(&upload.bytes).context("writing spool file")?;
        file.flush().context("flushing spool file")?;

        tracing::debug!(path = %file.path().display(), bytes = upload.bytes.len(), "Upload spooled to disk");

        Ok(Self {
            storage: Storage::Spooled(file),
            len: upload.bytes.len(),
            extension,
        })
    }

    /// Container hint (file extension without the dot).
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Size of the upload in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the spooled file, if the upload was spooled.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::Spooled(file) => Some(file.path()),
        }
    }

    /// Open a fresh reader over the upload.
    pub fn open(&self) -> Result<SourceReader> {
        match &self.storage {
            Storage::Memory(bytes) => Ok(SourceReader::Memory(Cursor::new(Arc::clone(bytes)))),
            Storage::Spooled(file) => {
                let file = file.reopen().context("reopening spool file")?;
                Ok(SourceReader::File(file))
            }
        }
    }
}

/// A reader handed to the decoder.
pub enum SourceReader {
    Memory(Cursor<Arc<[u8]>>),
    File(std::fs::File),
}

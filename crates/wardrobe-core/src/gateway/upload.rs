//! Narrow upload interface shared by real files and in-memory payloads.

use crate::{Result, WardrobeError};
use std::path::{Path, PathBuf};

/// Something that can be uploaded as an asset.
pub trait UploadSource: Send + Sync {
    fn read(&self) -> Result<Vec<u8>>;
    fn name(&self) -> &str;
    fn content_type(&self) -> &str;
}

/// Content type from a file extension; unknown extensions are sent as JPEG.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// An asset file on the local disk.
#[derive(Debug, Clone)]
pub struct FileUpload {
    path: PathBuf,
    name: String,
    content_type: &'static str,
}

impl FileUpload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = content_type_for(&path);
        Self {
            path,
            name,
            content_type,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for FileUpload {
    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| WardrobeError::io_with_path(e, &self.path))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn content_type(&self) -> &str {
        self.content_type
    }
}

/// An already-loaded payload.
#[derive(Debug, Clone)]
pub struct MemoryUpload {
    bytes: Vec<u8>,
    name: String,
    content_type: String,
}

impl MemoryUpload {
    pub fn new(bytes: Vec<u8>, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            name: name.into(),
            content_type: content_type.into(),
        }
    }

    /// Payload that was read from `source`, keeping its name and content type.
    pub fn from_source(source: &dyn UploadSource, bytes: Vec<u8>) -> Self {
        Self::new(bytes, source.name(), source.content_type())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl UploadSource for MemoryUpload {
    fn read(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }
}

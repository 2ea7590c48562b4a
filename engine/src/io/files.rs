//! Reading and writing configuration documents on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::document::Document;

/// Read a document, naming it after the file.
pub fn read_document(path: &Path) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Document::parse(&name, &text))
}

/// Atomically replace `path` with the rendered document (temp file + rename).
pub fn write_document(path: &Path, doc: &Document) -> Result<()> {
    debug!(path = %path.display(), lines = doc.len(), "writing document");
    write_atomic(path, &doc.render())
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Read, transform and write back one file in place.
pub fn rewrite<F>(path: &Path, transform: F) -> Result<()>
where
    F: FnOnce(&Document) -> crate::core::error::SimResult<Document>,
{
    let doc = read_document(path)?;
    let out = transform(&doc).with_context(|| format!("rewrite {}", path.display()))?;
    write_document(path, &out)
}

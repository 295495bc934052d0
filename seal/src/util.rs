use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bincode::{deserialize, serialize};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

/// Replaces `path` with `bytes` through a temporary file in the same
/// directory, so readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("could not create temp file in {:?}", dir))?;
    tmp.write_all(bytes)
        .with_context(|| format!("could not write temp file for {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("could not sync temp file for {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("could not persist {:?}", path))?;
    Ok(())
}

/// Removes `path`; a file that is already gone is not an error.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("could not remove {:?}", path)),
    }
}

pub fn persist_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serialize(value).with_context(|| format!("could not serialize {:?}", path))?;
    write_atomic(path, &bytes)
}

pub fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("could not read file={:?}", path))?;
    deserialize(&bytes).with_context(|| format!("could not deserialize file={:?}", path))
}

/// Short hex prefix of an id for log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

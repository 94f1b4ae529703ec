//! Capability-scoped file helpers for configuration and hand-off artifacts.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Raised when a file system operation fails.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to access {path}: {message}")]
pub struct FileError {
    /// Path that could not be accessed.
    pub path: Utf8PathBuf,
    /// Human-readable error message.
    pub message: String,
}

impl FileError {
    fn new(path: &Utf8Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), FileError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| FileError::new(path, "path is missing a filename"))?;
    Ok((parent, file_name))
}

fn open_dir(path: &Utf8Path) -> Result<Dir, FileError> {
    Dir::open_ambient_dir(path, ambient_authority())
        .map_err(|err| FileError::new(path, err.to_string()))
}

/// Reads a UTF-8 file into memory.
///
/// # Errors
///
/// Returns [`FileError`] when the parent directory or the file cannot be read.
pub fn read_to_string(path: &Utf8Path) -> Result<String, FileError> {
    let (parent, file_name) = split(path)?;
    open_dir(parent)?
        .read_to_string(file_name)
        .map_err(|err| FileError::new(path, err.to_string()))
}

/// Writes `contents` to `path`, creating parent directories and replacing any
/// existing file.
///
/// # Errors
///
/// Returns [`FileError`] when directories cannot be created or the write
/// fails.
pub fn write(path: &Utf8Path, contents: &str) -> Result<(), FileError> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| FileError::new(parent, err.to_string()))?;
    open_dir(parent)?
        .write(file_name, contents)
        .map_err(|err| FileError::new(path, err.to_string()))
}

/// Removes `path`. Returns `false` when the file did not exist.
///
/// # Errors
///
/// Returns [`FileError`] for any failure other than the file being absent.
pub fn remove(path: &Utf8Path) -> Result<bool, FileError> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(FileError::new(parent, err.to_string())),
    };
    match dir.remove_file(file_name) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FileError::new(path, err.to_string())),
    }
}

//! Single shared JSON documents (registry, response history) and the file
//! helpers the lease store builds on.
//!
//! Writers go through [`DocumentStore::update`], which holds the document's
//! mutex token across load, modify and save. Readers call `load` without
//! the token and may see a slightly old document.

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, WardenError};
use crate::mutex::{FileToken, RetryPolicy, token_path_for};

/// Reads a JSON document. A missing or empty file is the default value;
/// anything unparsable is [`WardenError::Corrupt`] and nothing is applied.
pub fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match read_json_opt(path)? {
        Some(value) => Ok(value),
        None => Ok(T::default()),
    }
}

/// Like [`read_json`] but distinguishes "absent" from "present".
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WardenError::io(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| WardenError::corrupt(path, e))
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = temp_in_parent(path)?;
    tmp.write_all(data).map_err(|e| WardenError::io(path, e))?;
    tmp.flush().map_err(|e| WardenError::io(path, e))?;
    tmp.persist(path).map_err(|e| WardenError::io(path, e.error))?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| WardenError::corrupt(path, e))?;
    write_atomic(path, &data)
}

/// Creates `path` with `data` only if it does not exist yet. The content is
/// complete the moment the file becomes visible. Returns `false` if the
/// path was already taken.
pub fn create_json_exclusive<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| WardenError::corrupt(path, e))?;
    let mut tmp = temp_in_parent(path)?;
    tmp.write_all(&data).map_err(|e| WardenError::io(path, e))?;
    tmp.flush().map_err(|e| WardenError::io(path, e))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(WardenError::io(path, e.error)),
    }
}

/// Removes a file, treating "already gone" as success. Returns whether
/// this call removed it.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(WardenError::io(path, e)),
    }
}

fn temp_in_parent(path: &Path) -> Result<tempfile::NamedTempFile> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| WardenError::io(parent, e))?;
    tempfile::NamedTempFile::new_in(parent).map_err(|e| WardenError::io(parent, e))
}

/// A single shared document guarded by a document-scoped mutex.
pub trait DocumentStore<T> {
    type Guard;

    /// Takes the document mutex (bounded retries).
    fn lock(&self) -> Result<Self::Guard>;

    /// Reads the current document without taking the mutex.
    fn load(&self) -> Result<T>;

    /// Replaces the document. Requires the mutex guard.
    fn save(&self, guard: &Self::Guard, doc: &T) -> Result<()>;

    /// Load, modify and save as one critical section.
    fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let guard = self.lock()?;
        let mut doc = self.load()?;
        let out = f(&mut doc);
        self.save(&guard, &doc)?;
        Ok(out)
    }
}

/// [`DocumentStore`] backed by a JSON file and a sibling `.mutex` token.
#[derive(Debug, Clone)]
pub struct JsonDocument<T> {
    path: PathBuf,
    scope: String,
    policy: RetryPolicy,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T> {
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        let path = path.into();
        let scope = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Self {
            path,
            scope,
            policy,
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token_path(&self) -> PathBuf {
        token_path_for(&self.path)
    }
}

impl<T> DocumentStore<T> for JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    type Guard = FileToken;

    fn lock(&self) -> Result<FileToken> {
        FileToken::acquire(&self.token_path(), &self.scope, &self.policy)
    }

    fn load(&self) -> Result<T> {
        read_json(&self.path)
    }

    fn save(&self, _guard: &FileToken, doc: &T) -> Result<()> {
        write_json(&self.path, doc)
    }
}

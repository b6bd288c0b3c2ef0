//! Filesystem-backed [`LeaseStore`]: `locks/<resource>.json` holds the
//! lease, `locks/<resource>.mutex` is the token.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::document::{read_json_opt, remove_if_exists, write_json};
use crate::error::{Result, WardenError};
use crate::infrastructure::LeaseStore;
use crate::mutex::FileToken;
use crate::types::Lease;

const LEASE_EXT: &str = "json";
const TOKEN_EXT: &str = "mutex";

#[derive(Debug, Clone)]
pub struct FsLeaseStore {
    dir: PathBuf,
    token_stale_after: Duration,
}

impl FsLeaseStore {
    pub fn new(dir: impl Into<PathBuf>, token_stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            token_stale_after,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resource names are arbitrary strings (often paths with `/`), so
    /// they are percent-encoded into a flat file name.
    fn file_stem(resource: &str) -> String {
        urlencoding::encode(resource).into_owned()
    }

    pub fn lease_path(&self, resource: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{LEASE_EXT}", Self::file_stem(resource)))
    }

    pub fn token_path(&self, resource: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{TOKEN_EXT}", Self::file_stem(resource)))
    }
}

impl LeaseStore for FsLeaseStore {
    type Token = FileToken;

    fn try_lock(&self, resource: &str) -> Result<Option<FileToken>> {
        FileToken::try_create(&self.token_path(resource), self.token_stale_after)
    }

    fn get(&self, resource: &str) -> Result<Option<Lease>> {
        read_json_opt(&self.lease_path(resource))
    }

    fn put(&self, _token: &FileToken, lease: &Lease) -> Result<()> {
        write_json(&self.lease_path(&lease.resource), lease)
    }

    fn remove(&self, _token: &FileToken, resource: &str) -> Result<bool> {
        remove_if_exists(&self.lease_path(resource))
    }

    fn list(&self) -> Result<Vec<Lease>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WardenError::io(&self.dir, e)),
        };

        let mut leases = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| WardenError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LEASE_EXT) {
                continue;
            }
            // Released between read_dir and read: skip.
            if let Some(lease) = read_json_opt::<Lease>(&path)? {
                leases.push(lease);
            }
        }
        leases.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(leases)
    }
}

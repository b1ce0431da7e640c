//! The local manifest of installed mods and its on-disk store.
//!
//! The manifest is never rewritten in place. A timestamped, byte-identical
//! archive of the previous file is written first, then the new manifest
//! lands via a temp-file write and atomic rename. That ordering is the
//! write-ahead guarantee the commit engine relies on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::{Result, UpdateError};

/// Current manifest format marker.
pub const MANIFEST_FORMAT: u32 = 1;

/// One installed mod as recorded at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledMod {
    pub version: String,
    /// SHA1 hex digest recorded when the archive was committed.
    pub sha1: String,
    /// Archive file name inside the live mod directory.
    pub file_name: String,
}

/// Ordered record of which release is installed per mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_format")]
    pub format: u32,
    /// Mod name to installed release; a name appears at most once.
    #[serde(default)]
    pub mods: BTreeMap<String, InstalledMod>,
}

fn default_format() -> u32 {
    MANIFEST_FORMAT
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            format: MANIFEST_FORMAT,
            mods: BTreeMap::new(),
        }
    }
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

/// Reads, archives, and writes the manifest file.
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current manifest.
    ///
    /// An absent file is the first-run case and yields an empty manifest; a
    /// present-but-malformed file is a hard error.
    pub async fn load(&self) -> Result<Manifest> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no manifest at {}, starting empty", self.path.display());
                return Ok(Manifest::default());
            }
            Err(e) => {
                return Err(UpdateError::ManifestReadFailed {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| UpdateError::ManifestReadFailed {
            path: self.path.clone(),
            reason: format!("malformed manifest: {e}"),
        })
    }

    /// Copy the current manifest file, byte for byte, to a timestamped
    /// archive name next to it. Existing archives are never overwritten; a
    /// same-second collision gets a numeric suffix.
    ///
    /// Returns the archive path, or `None` when there is no manifest file
    /// yet (first run) and nothing needs preserving.
    pub async fn archive(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            debug!("no manifest to archive (first run)");
            return Ok(None);
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let base = format!("{}.{timestamp}", self.path.display());
        let mut archive_path = PathBuf::from(&base);
        let mut suffix = 0u32;
        while archive_path.exists() {
            suffix += 1;
            archive_path = PathBuf::from(format!("{base}.{suffix}"));
        }

        tokio::fs::copy(&self.path, &archive_path)
            .await
            .map_err(|e| UpdateError::ArchiveFailed {
                path: self.path.clone(),
                archive_path: archive_path.clone(),
                source: e,
            })?;
        info!("archived manifest -> {}", archive_path.display());
        Ok(Some(archive_path))
    }

    /// Persist a new manifest: write to a temp file in the same directory,
    /// then atomically rename over the primary path.
    ///
    /// Callers must have run [`archive`](Self::archive) for the prior state
    /// first; the commit engine enforces that ordering.
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        let body =
            serde_json::to_vec_pretty(manifest).map_err(|e| UpdateError::ManifestWriteFailed {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?;

        let tmp_path = self.path.with_extension("part");
        let write = async {
            tokio::fs::write(&tmp_path, &body).await?;
            tokio::fs::rename(&tmp_path, &self.path).await
        };
        write.await.map_err(|e| UpdateError::ManifestWriteFailed {
            path: self.path.clone(),
            source: e,
        })?;
        debug!("wrote manifest {}", self.path.display());
        Ok(())
    }
}

//! Promote verified downloads into the live mod directory.
//!
//! Runs single-threaded, strictly after every download in the plan has
//! verified. The manifest write is the last step, after all file moves have
//! succeeded, so the manifest never claims an archive that is not actually
//! on disk. Any filesystem failure aborts before the manifest is touched;
//! the prior manifest file stays recoverable under its archived name.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{FileOperation, Result, UpdateError};
use crate::fetch::StagedMod;
use crate::manifest::{InstalledMod, Manifest, ManifestStore};

/// Applies a fully verified set of staged mods to the live directory and
/// persists the updated manifest.
pub struct CommitEngine {
    mods_dir: PathBuf,
    store: ManifestStore,
}

impl CommitEngine {
    pub fn new<P: Into<PathBuf>>(mods_dir: P, store: ManifestStore) -> Self {
        Self {
            mods_dir: mods_dir.into(),
            store,
        }
    }

    /// Commit the run: move staged archives into place, drop superseded
    /// archives left under old file names, then archive and save the
    /// manifest.
    ///
    /// Returns the manifest that was written.
    pub async fn commit(&self, current: &Manifest, staged: Vec<StagedMod>) -> Result<Manifest> {
        // Step 1: every staged archive into the live directory. A rename
        // over an existing file replaces a stale archive of the same name.
        let mut landed = Vec::with_capacity(staged.len());
        for item in staged {
            let dest = self.mods_dir.join(&item.release.file_name);
            move_file(&item.path, &dest)
                .await
                .map_err(|e| UpdateError::CommitFailed {
                    operation: FileOperation::Move,
                    path: dest.clone(),
                    source: e,
                })?;
            info!(
                "installed {} {} -> {}",
                item.release.name,
                item.release.version,
                dest.display()
            );
            landed.push(item);
        }

        // Step 2: a version bump usually changes the archive file name;
        // remove the old file so the game does not load both.
        for item in &landed {
            let Some(installed) = &item.installed else {
                continue;
            };
            if installed.file_name == item.release.file_name {
                continue;
            }
            let old = self.mods_dir.join(&installed.file_name);
            match tokio::fs::remove_file(&old).await {
                Ok(()) => debug!("removed superseded archive {}", old.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(UpdateError::CommitFailed {
                        operation: FileOperation::Delete,
                        path: old,
                        source: e,
                    });
                }
            }
        }

        // Step 3: manifest entries are built from what actually landed on
        // disk, archive the prior file, then write the new one.
        let mut next = current.clone();
        for item in &landed {
            next.mods.insert(
                item.release.name.clone(),
                InstalledMod {
                    version: item.release.version.to_string(),
                    sha1: item.release.sha1.to_lowercase(),
                    file_name: item.release.file_name.clone(),
                },
            );
        }
        self.store.archive().await?;
        self.store.save(&next).await?;
        Ok(next)
    }
}

/// Move a file, falling back to copy-and-delete when staging and the live
/// directory sit on different filesystems.
async fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(src, dest).await?;
            tokio::fs::remove_file(src).await
        }
        Err(e) => Err(e),
    }
}

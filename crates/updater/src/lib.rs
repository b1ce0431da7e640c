//! Factorio mod synchronization engine.
//!
//! Keeps a game server's local mod archives in sync with the remote mod
//! portal. One run: fetch the catalog for the installed game version,
//! compare it against the local manifest by checksum, download and verify
//! stale mods into staging, then atomically promote them and persist the
//! updated manifest. On any failure nothing in the live mod directory or
//! manifest changes; the next scheduled run retries from the last
//! known-good state.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use updater::{RunOutcome, Updater, UpdaterConfig};
//!
//! # async fn example() -> updater::Result<()> {
//! let config = UpdaterConfig::load(std::path::Path::new("config.json"))?;
//! config.validate_paths()?;
//!
//! match Updater::new(config).run().await? {
//!     RunOutcome::UpToDate => println!("nothing to do"),
//!     RunOutcome::Updated { mods } => println!("updated {} mod(s)", mods.len()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Overlapping invocations are unsafe (they race on the manifest file);
//! the invoking scheduler must serialize runs.

pub mod catalog;
pub mod commit;
pub mod config;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod plan;
pub mod run;

pub use catalog::{Catalog, CatalogClient, GameVersion, ModRelease};
pub use commit::CommitEngine;
pub use config::UpdaterConfig;
pub use error::{Result, UpdateError};
pub use fetch::{Fetcher, StagedMod};
pub use manifest::{InstalledMod, Manifest, ManifestStore};
pub use plan::{HighestVersion, PlannedUpdate, ReleasePolicy, SYSTEM_MODS, UpdatePlan, compute_plan};
pub use run::{RunOutcome, Updater};

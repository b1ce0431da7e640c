//! One full synchronization run, wired together.
//!
//! Read the game version, fetch the catalog, load the manifest, compute the
//! plan, fetch and verify everything, then commit. Any error aborts the run
//! with the live mod directory and manifest unchanged; an empty plan exits
//! without rewriting the manifest file at all.
//!
//! Overlapping runs are unsafe: two invocations would race on the manifest
//! file. The external scheduler must let each run finish before starting
//! the next.

use tracing::info;

use crate::catalog::{CatalogClient, GameVersion};
use crate::commit::CommitEngine;
use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::manifest::ManifestStore;
use crate::plan::{HighestVersion, ReleasePolicy, compute_plan};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was stale; the manifest file was not touched.
    UpToDate,
    /// These mods were fetched, committed, and recorded.
    Updated { mods: Vec<String> },
}

/// The synchronization engine entry point.
pub struct Updater {
    config: UpdaterConfig,
    policy: Box<dyn ReleasePolicy + Send + Sync>,
}

impl Updater {
    pub fn new(config: UpdaterConfig) -> Self {
        Self {
            config,
            policy: Box::new(HighestVersion),
        }
    }

    /// Override the release selection policy.
    pub fn with_policy(mut self, policy: Box<dyn ReleasePolicy + Send + Sync>) -> Self {
        self.policy = policy;
        self
    }

    /// Execute one full run.
    pub async fn run(&self) -> Result<RunOutcome> {
        let game_version = GameVersion::from_file(&self.config.factorio_version_file)?;
        info!("game version: {game_version}");

        let catalog = CatalogClient::new(&self.config)?.fetch(&game_version).await?;

        let store = ManifestStore::new(self.config.mod_packs_path.clone());
        let manifest = store.load().await?;
        info!("manifest tracks {} mod(s)", manifest.mods.len());

        let plan = compute_plan(&manifest, &catalog, &game_version, self.policy.as_ref());
        if plan.is_empty() {
            info!("no updates - all mods are up to date");
            return Ok(RunOutcome::UpToDate);
        }

        info!("found {} update(s):", plan.len());
        for update in &plan.updates {
            match &update.installed {
                Some(installed) => info!(
                    "  {}: {} -> {}",
                    update.release.name, installed.version, update.release.version
                ),
                None => info!("  {}: new install {}", update.release.name, update.release.version),
            }
        }

        let fetcher = Fetcher::new(&self.config)?;
        let (staging, staged) = fetcher.fetch_all(&plan).await?;

        let engine = CommitEngine::new(self.config.mods_dir.clone(), store);
        let committed = engine.commit(&manifest, staged).await?;

        // Staging cleanup happens here on success; the TempDir drop also
        // covers every early-return error path above.
        drop(staging);

        let mods: Vec<String> = plan
            .updates
            .iter()
            .map(|u| u.release.name.clone())
            .collect();
        info!(
            "updated {} mod(s), manifest now tracks {}",
            mods.len(),
            committed.mods.len()
        );
        Ok(RunOutcome::Updated { mods })
    }
}

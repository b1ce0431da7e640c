//! Staleness detection: manifest + catalog in, update plan out.
//!
//! This is a pure function of its inputs with no I/O, so it carries most of
//! the unit tests. Checksums, not version strings, decide whether an
//! installed mod matches a release: portal version metadata is not trusted
//! as evidence of file identity.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashSet};

use crate::catalog::{Catalog, GameVersion, ModRelease};
use crate::manifest::{InstalledMod, Manifest};

/// Protected mods bundled with the base game; never planned for update.
pub static SYSTEM_MODS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["base", "space-age", "quality", "elevated-rails"].into());

/// One planned fetch: the release to install and, for upgrades, the entry it
/// supersedes.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub release: ModRelease,
    /// `None` for a new install.
    pub installed: Option<InstalledMod>,
}

/// The set of mods to fetch and commit this run. Transient, rebuilt every
/// run, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    pub updates: Vec<PlannedUpdate>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }
}

/// Policy for choosing among multiple compatible releases of one mod.
///
/// The upstream behavior here is underspecified, so the choice is pluggable.
/// Candidates arrive already filtered to the current game version, in
/// catalog order.
pub trait ReleasePolicy {
    fn select<'a>(&self, candidates: &[&'a ModRelease]) -> Option<&'a ModRelease>;
}

/// Default policy: numerically highest version; exact ties go to the entry
/// appearing later in the catalog response.
#[derive(Debug, Default)]
pub struct HighestVersion;

impl ReleasePolicy for HighestVersion {
    fn select<'a>(&self, candidates: &[&'a ModRelease]) -> Option<&'a ModRelease> {
        let mut best: Option<&'a ModRelease> = None;
        for candidate in candidates.iter().copied() {
            match best {
                Some(current) if candidate.version < current.version => {}
                // >= keeps the later catalog entry on exact ties
                _ => best = Some(candidate),
            }
        }
        best
    }
}

/// Compute the update plan for one run.
///
/// For every non-system release targeting the current game version: absent
/// from the manifest means new install; present with a differing checksum
/// means update; matching checksum means nothing to do. Manifest entries the
/// catalog offers nothing compatible for are left untouched. Deterministic:
/// the plan is ordered by mod name.
pub fn compute_plan(
    manifest: &Manifest,
    catalog: &Catalog,
    game_version: &GameVersion,
    policy: &dyn ReleasePolicy,
) -> UpdatePlan {
    let mut candidates: BTreeMap<&str, Vec<&ModRelease>> = BTreeMap::new();
    for release in &catalog.releases {
        if SYSTEM_MODS.contains(release.name.as_str()) {
            continue;
        }
        if !game_version.matches(&release.game_version) {
            continue;
        }
        candidates.entry(release.name.as_str()).or_default().push(release);
    }

    let mut updates = Vec::new();
    for (name, releases) in &candidates {
        let Some(selected) = policy.select(releases) else {
            continue;
        };
        match manifest.mods.get(*name) {
            None => updates.push(PlannedUpdate {
                release: selected.clone(),
                installed: None,
            }),
            Some(installed) => {
                if !installed.sha1.eq_ignore_ascii_case(&selected.sha1) {
                    updates.push(PlannedUpdate {
                        release: selected.clone(),
                        installed: Some(installed.clone()),
                    });
                }
            }
        }
    }
    UpdatePlan { updates }
}

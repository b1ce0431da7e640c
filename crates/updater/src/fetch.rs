//! Download and verify staged archives.
//!
//! Every plan entry is fetched into a staging directory distinct from the
//! live mod directory, streamed to disk, and hashed against the catalog's
//! SHA1. Downloads run concurrently under a bounded limit; the run is
//! all-or-nothing, so the first failure aborts everything. The staging
//! directory is a `TempDir`, removed on every exit path by its drop.

use futures::StreamExt;
use futures::stream;
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

use crate::catalog::ModRelease;
use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::manifest::InstalledMod;
use crate::plan::{PlannedUpdate, UpdatePlan};

/// A downloaded, checksum-verified archive waiting in staging.
#[derive(Debug)]
pub struct StagedMod {
    pub release: ModRelease,
    /// Location inside the staging directory.
    pub path: PathBuf,
    /// The manifest entry this supersedes, if any.
    pub installed: Option<InstalledMod>,
}

/// One failed download attempt; decides whether a bounded retry is worth it.
#[derive(Debug)]
enum FetchFailure {
    Http(reqwest::Error),
    Status(reqwest::StatusCode),
    Io(std::io::Error),
    BadUrl(url::ParseError),
}

impl FetchFailure {
    fn is_transient(&self) -> bool {
        match self {
            // Transport errors are worth retrying unless the server said 4xx.
            FetchFailure::Http(e) => e
                .status()
                .map_or(true, |status| status.is_server_error() || status.as_u16() == 429),
            FetchFailure::Status(status) => {
                status.is_server_error() || status.as_u16() == 429
            }
            FetchFailure::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            FetchFailure::BadUrl(_) => false,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Http(e) => write!(f, "request failed: {e}"),
            FetchFailure::Status(status) => write!(f, "HTTP {status}"),
            FetchFailure::Io(e) => write!(f, "storage error: {e}"),
            FetchFailure::BadUrl(e) => write!(f, "bad download URL: {e}"),
        }
    }
}

/// Fetches plan entries into staging and verifies them.
pub struct Fetcher {
    client: reqwest::Client,
    config: UpdaterConfig,
}

impl Fetcher {
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| UpdateError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
                field: None,
            })?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fetch and verify every entry in the plan.
    ///
    /// Returns the staging directory handle together with the staged mods;
    /// the caller keeps the handle alive until commit has promoted the
    /// files. On any error the directory is dropped and cleaned up with
    /// whatever partial artifacts it holds.
    pub async fn fetch_all(&self, plan: &UpdatePlan) -> Result<(TempDir, Vec<StagedMod>)> {
        let staging = tempfile::Builder::new()
            .prefix("factorio-mods-")
            .tempdir()
            .map_err(|e| UpdateError::DownloadFailed {
                mod_name: String::new(),
                reason: format!("could not create staging directory: {e}"),
            })?;
        debug!("staging directory: {}", staging.path().display());

        let results: Vec<Result<StagedMod>> =
            stream::iter(plan.updates.iter().map(|update| self.fetch_one(update, staging.path())))
                .buffer_unordered(self.config.max_concurrent_downloads.max(1))
                .collect()
                .await;

        let mut staged = Vec::with_capacity(results.len());
        for result in results {
            staged.push(result?);
        }
        Ok((staging, staged))
    }

    /// Download one release with bounded retries, then hash it.
    async fn fetch_one(&self, update: &PlannedUpdate, staging: &Path) -> Result<StagedMod> {
        let release = &update.release;
        let dest = staging.join(&release.file_name);

        let mut last_failure: Option<FetchFailure> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_delay(attempt - 1);
                debug!(
                    "retrying download of '{}' (attempt {attempt}) after {delay:?}",
                    release.name
                );
                tokio::time::sleep(delay).await;
            }

            match self.try_download(release, &dest).await {
                Ok(()) => {
                    let actual = sha1_hex(&dest).await.map_err(|e| {
                        UpdateError::DownloadFailed {
                            mod_name: release.name.clone(),
                            reason: format!("could not hash staged file: {e}"),
                        }
                    })?;
                    if !actual.eq_ignore_ascii_case(&release.sha1) {
                        return Err(UpdateError::IntegrityMismatch {
                            mod_name: release.name.clone(),
                            expected: release.sha1.to_lowercase(),
                            actual,
                        });
                    }
                    info!(
                        "downloaded and verified {} {} ({})",
                        release.name, release.version, release.file_name
                    );
                    return Ok(StagedMod {
                        release: release.clone(),
                        path: dest,
                        installed: update.installed.clone(),
                    });
                }
                Err(failure) => {
                    let transient = failure.is_transient();
                    debug!(
                        "download of '{}' failed (transient: {transient}): {failure}",
                        release.name
                    );
                    if !transient {
                        return Err(self.download_failed(release, failure));
                    }
                    last_failure = Some(failure);
                }
            }
        }

        let failure = last_failure.expect("retry loop ran at least once");
        Err(self.download_failed(release, failure))
    }

    fn download_failed(&self, release: &ModRelease, failure: FetchFailure) -> UpdateError {
        UpdateError::DownloadFailed {
            mod_name: release.name.clone(),
            reason: format!("'{}' from {}: {failure}", release.name, release.download_url),
        }
    }

    /// One streaming download attempt, authenticated with the configured
    /// portal credentials as query parameters.
    async fn try_download(
        &self,
        release: &ModRelease,
        dest: &Path,
    ) -> std::result::Result<(), FetchFailure> {
        let mut url = Url::parse(&release.download_url).map_err(FetchFailure::BadUrl)?;
        url.query_pairs_mut()
            .append_pair("username", &self.config.username)
            .append_pair("token", &self.config.token);
        // Credentials stay out of the logs.
        debug!("downloading {} -> {}", release.download_url, dest.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchFailure::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status));
        }

        let mut file = tokio::fs::File::create(dest).await.map_err(FetchFailure::Io)?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FetchFailure::Http)?;
            file.write_all(&chunk).await.map_err(FetchFailure::Io)?;
        }
        file.flush().await.map_err(FetchFailure::Io)?;
        Ok(())
    }
}

/// Streaming SHA1 of a file, as a lowercase hex digest.
pub async fn sha1_hex(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> UpdaterConfig {
        UpdaterConfig {
            username: "operator".into(),
            token: "secret".into(),
            max_retries: 0,
            retry_delay_ms: 1,
            max_retry_delay_ms: 1,
            ..UpdaterConfig::default()
        }
    }

    fn sha1_of(data: &[u8]) -> String {
        hex::encode(Sha1::digest(data))
    }

    fn planned(server: &MockServer, name: &str, data: &[u8]) -> PlannedUpdate {
        PlannedUpdate {
            release: ModRelease {
                name: name.to_string(),
                version: Version::new(1, 0, 0),
                download_url: format!("{}/download/{name}", server.uri()),
                sha1: sha1_of(data),
                file_name: format!("{name}_1.0.0.zip"),
                game_version: "2.0".to_string(),
            },
            installed: None,
        }
    }

    #[tokio::test]
    async fn downloads_verify_and_stage() {
        let server = MockServer::start().await;
        let payload = b"fake mod archive bytes";
        Mock::given(method("GET"))
            .and(path("/download/mod-a"))
            .and(query_param("username", "operator"))
            .and(query_param("token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.as_slice()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let plan = UpdatePlan {
            updates: vec![planned(&server, "mod-a", payload)],
        };

        let (staging, staged) = fetcher.fetch_all(&plan).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert!(staged[0].path.starts_with(staging.path()));
        assert_eq!(
            tokio::fs::read(&staged[0].path).await.unwrap(),
            payload.as_slice()
        );
    }

    #[tokio::test]
    async fn checksum_mismatch_names_both_digests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/mod-a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".as_slice()))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let update = planned(&server, "mod-a", b"original bytes");
        let expected = update.release.sha1.clone();

        let err = fetcher
            .fetch_all(&UpdatePlan { updates: vec![update] })
            .await
            .unwrap_err();
        let UpdateError::IntegrityMismatch {
            mod_name,
            expected: reported,
            actual,
        } = err
        else {
            panic!("expected IntegrityMismatch, got {err:?}");
        };
        assert_eq!(mod_name, "mod-a");
        assert_eq!(reported, expected);
        assert_eq!(actual, sha1_of(b"tampered"));
    }

    #[tokio::test]
    async fn client_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/mod-a"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let config = UpdaterConfig {
            max_retries: 3,
            ..test_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let plan = UpdatePlan {
            updates: vec![planned(&server, "mod-a", b"whatever")],
        };

        let err = fetcher.fetch_all(&plan).await.unwrap_err();
        assert!(matches!(err, UpdateError::DownloadFailed { ref mod_name, .. } if mod_name == "mod-a"));
    }

    #[tokio::test]
    async fn server_error_retries_up_to_the_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/mod-a"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3) // initial attempt + 2 retries
            .mount(&server)
            .await;

        let config = UpdaterConfig {
            max_retries: 2,
            ..test_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let plan = UpdatePlan {
            updates: vec![planned(&server, "mod-a", b"whatever")],
        };

        let err = fetcher.fetch_all(&plan).await.unwrap_err();
        assert!(matches!(err, UpdateError::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn one_failure_fails_the_whole_batch() {
        let server = MockServer::start().await;
        let good = b"good mod bytes";
        Mock::given(method("GET"))
            .and(path("/download/mod-good"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(good.as_slice()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/mod-bad"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let plan = UpdatePlan {
            updates: vec![
                planned(&server, "mod-good", good),
                planned(&server, "mod-bad", b"never arrives"),
            ],
        };

        assert!(fetcher.fetch_all(&plan).await.is_err());
    }

    #[tokio::test]
    async fn sha1_hex_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        assert_eq!(
            sha1_hex(&path).await.unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }
}

//! Remote catalog access.
//!
//! One HTTP GET per run against the mod portal's query endpoint, flattened
//! into [`ModRelease`] records. Transient failures are not retried here: a
//! broken catalog aborts the run and the next scheduled run tries again.

use semver::Version;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};

/// The installed game build, truncated to `major.minor`.
///
/// Release compatibility tags on the portal carry only those two components,
/// so that is the granularity everything compares at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameVersion {
    major: u64,
    minor: u64,
}

impl GameVersion {
    /// Read the game version from the server's version file, a JSON object
    /// with a full `version` string (e.g. `{"version": "2.0.28"}`).
    pub fn from_file(path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct VersionFile {
            version: String,
        }

        let body = std::fs::read_to_string(path).map_err(|e| UpdateError::Configuration {
            message: format!("could not read version file '{}': {e}", path.display()),
            field: Some("factorio_version_file".into()),
        })?;
        let parsed: VersionFile =
            serde_json::from_str(&body).map_err(|e| UpdateError::Configuration {
                message: format!("invalid version file '{}': {e}", path.display()),
                field: Some("factorio_version_file".into()),
            })?;
        Self::parse(&parsed.version).ok_or_else(|| UpdateError::Configuration {
            message: format!("invalid version format: {}", parsed.version),
            field: Some("factorio_version_file".into()),
        })
    }

    /// Parse `major.minor[.anything]` into a game version.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = parts.next()?.trim().parse().ok()?;
        Some(Self { major, minor })
    }

    /// Whether a release's compatibility tag targets this game version.
    /// Unparseable tags never match.
    pub fn matches(&self, tag: &str) -> bool {
        Self::parse(tag) == Some(*self)
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One downloadable release of one mod, as reported by the portal.
#[derive(Debug, Clone, PartialEq)]
pub struct ModRelease {
    pub name: String,
    pub version: Version,
    /// Absolute download URL (portal-relative paths are resolved at parse time).
    pub download_url: String,
    /// SHA1 hex digest of the archive, lowercased.
    pub sha1: String,
    pub file_name: String,
    /// Game version this release targets (`major.minor` tag).
    pub game_version: String,
}

/// The portal's current list of downloadable releases, in response order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub releases: Vec<ModRelease>,
}

#[derive(Debug, Deserialize)]
struct PortalResponse {
    #[serde(default)]
    results: Vec<PortalMod>,
}

#[derive(Debug, Deserialize)]
struct PortalMod {
    name: String,
    #[serde(default)]
    releases: Vec<PortalRelease>,
    latest_release: Option<PortalRelease>,
}

#[derive(Debug, Deserialize)]
struct PortalRelease {
    version: String,
    download_url: String,
    sha1: String,
    file_name: String,
    #[serde(default)]
    info_json: InfoJson,
}

#[derive(Debug, Deserialize, Default)]
struct InfoJson {
    #[serde(default)]
    factorio_version: String,
}

/// Client for the portal's catalog endpoint.
pub struct CatalogClient {
    client: reqwest::Client,
    api_url: String,
}

impl CatalogClient {
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| UpdateError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
                field: None,
            })?;
        Ok(Self {
            client,
            api_url: config.mods_api_url.clone(),
        })
    }

    /// Fetch every release the portal reports for the given game version.
    ///
    /// Exactly one request; pagination is pre-aggregated by the query
    /// parameters in the configured URL.
    pub async fn fetch(&self, game_version: &GameVersion) -> Result<Catalog> {
        let url = self.api_url.replace("{version}", &game_version.to_string());
        info!("fetching mod catalog: {url}");

        let base = Url::parse(&url).map_err(|e| UpdateError::CatalogUnavailable {
            url: url.clone(),
            reason: format!("invalid catalog URL: {e}"),
        })?;

        let response =
            self.client
                .get(base.clone())
                .send()
                .await
                .map_err(|e| UpdateError::CatalogUnavailable {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::CatalogUnavailable {
                url,
                reason: format!("HTTP {status}"),
            });
        }

        let body: PortalResponse =
            response
                .json()
                .await
                .map_err(|e| UpdateError::CatalogUnavailable {
                    url: url.clone(),
                    reason: format!("malformed response body: {e}"),
                })?;

        let catalog = flatten_response(body, &base);
        info!("catalog lists {} releases", catalog.releases.len());
        Ok(catalog)
    }
}

/// Flatten the portal response into release records, in response order.
///
/// Entries use the full `releases` list when present and fall back to
/// `latest_release`. Releases with unparseable versions or download URLs are
/// skipped rather than failing the whole catalog.
fn flatten_response(response: PortalResponse, base: &Url) -> Catalog {
    let mut releases = Vec::new();
    for entry in response.results {
        let mut raw = entry.releases;
        if raw.is_empty() {
            raw.extend(entry.latest_release);
        }
        for release in raw {
            let Some(version) = parse_release_version(&release.version) else {
                debug!(
                    "skipping {} {}: unparseable version",
                    entry.name, release.version
                );
                continue;
            };
            let Ok(download_url) = base.join(&release.download_url) else {
                debug!(
                    "skipping {} {}: bad download URL '{}'",
                    entry.name, release.version, release.download_url
                );
                continue;
            };
            releases.push(ModRelease {
                name: entry.name.clone(),
                version,
                download_url: download_url.to_string(),
                sha1: release.sha1.to_lowercase(),
                file_name: release.file_name,
                game_version: release.info_json.factorio_version,
            });
        }
    }
    Catalog { releases }
}

/// Portal versions are usually `x.y.z` but occasionally two-part; pad with
/// zeros so standard semver precedence applies.
pub(crate) fn parse_release_version(raw: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }
    let mut parts = raw.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Version::new(major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> UpdaterConfig {
        UpdaterConfig {
            mods_api_url: format!("{}/api/mods?version={{version}}", server.uri()),
            ..UpdaterConfig::default()
        }
    }

    #[test]
    fn game_version_truncates_to_major_minor() {
        let version = GameVersion::parse("2.0.28").unwrap();
        assert_eq!(version.to_string(), "2.0");
        assert!(version.matches("2.0"));
        assert!(version.matches("2.0.55"));
        assert!(!version.matches("1.1"));
        assert!(!version.matches("two.oh"));
    }

    #[test]
    fn release_versions_parse_leniently() {
        assert_eq!(
            parse_release_version("1.2.3"),
            Some(Version::new(1, 2, 3))
        );
        assert_eq!(parse_release_version("1.1"), Some(Version::new(1, 1, 0)));
        assert_eq!(parse_release_version("not-a-version"), None);
        assert_eq!(parse_release_version("1.2.3.4"), None);
    }

    #[tokio::test]
    async fn fetch_flattens_releases_and_resolves_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/mods"))
            .and(query_param("version", "2.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {
                        "name": "mod-a",
                        "releases": [
                            {
                                "version": "1.0.0",
                                "download_url": "/download/mod-a/1.0.0",
                                "sha1": "AAAA",
                                "file_name": "mod-a_1.0.0.zip",
                                "info_json": {"factorio_version": "2.0"}
                            },
                            {
                                "version": "1.1.0",
                                "download_url": "/download/mod-a/1.1.0",
                                "sha1": "BBBB",
                                "file_name": "mod-a_1.1.0.zip",
                                "info_json": {"factorio_version": "2.0"}
                            }
                        ]
                    },
                    {
                        "name": "mod-b",
                        "latest_release": {
                            "version": "0.5.2",
                            "download_url": "/download/mod-b/0.5.2",
                            "sha1": "CCCC",
                            "file_name": "mod-b_0.5.2.zip",
                            "info_json": {"factorio_version": "2.0"}
                        }
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CatalogClient::new(&test_config(&server)).unwrap();
        let game_version = GameVersion::parse("2.0.28").unwrap();
        let catalog = client.fetch(&game_version).await.unwrap();

        assert_eq!(catalog.releases.len(), 3);
        assert_eq!(catalog.releases[0].name, "mod-a");
        assert_eq!(catalog.releases[0].sha1, "aaaa");
        assert_eq!(
            catalog.releases[2].download_url,
            format!("{}/download/mod-b/0.5.2", server.uri())
        );
    }

    #[tokio::test]
    async fn http_error_is_catalog_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/mods"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = CatalogClient::new(&test_config(&server)).unwrap();
        let game_version = GameVersion::parse("2.0.28").unwrap();
        let err = client.fetch(&game_version).await.unwrap_err();
        assert!(matches!(err, UpdateError::CatalogUnavailable { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_catalog_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/mods"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = CatalogClient::new(&test_config(&server)).unwrap();
        let game_version = GameVersion::parse("2.0.28").unwrap();
        let err = client.fetch(&game_version).await.unwrap_err();
        assert!(matches!(err, UpdateError::CatalogUnavailable { .. }));
    }

    #[test]
    fn game_version_reads_version_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-info.json");
        std::fs::write(&path, r#"{"version": "2.0.28", "name": "base"}"#).unwrap();
        assert_eq!(
            GameVersion::from_file(&path).unwrap(),
            GameVersion::parse("2.0").unwrap()
        );

        std::fs::write(&path, r#"{"version": "2"}"#).unwrap();
        assert!(GameVersion::from_file(&path).is_err());
    }
}

//! Run configuration and the source catalog.
//!
//! [`RunConfig`] is built once at process start from the [`Cli`] (which in turn
//! reads the environment) and is passed by reference everywhere afterwards.
//! Nothing re-reads the environment mid-run.
//!
//! The source catalog is a YAML file describing each portal declaratively:
//!
//! ```yaml
//! sources:
//!   - base_url: https://dagsordener.esbjergkommune.dk
//!     committee: Økonomiudvalget
//!     listing_url: https://dagsordener.esbjergkommune.dk/?udvalg=okonomi
//!     session: browser
//!     pagination: { kind: scroll_until_stable, stable_passes: 1 }
//!     link_selector: "a[href^='/vis?Referat-']"
//!     date: url
//!     document: { kind: template, template: "{base}/pdf/GetDagsorden/{id}" }
//!     fetch: download
//! ```

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::dates::DateField;
use crate::error::ConfigError;
use crate::models::DocumentFormat;
use crate::utils::{slugify, source_slug_from_url};

/// Which meetings a run admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    All,
    /// Only meetings dated today or later.
    NewOnly,
}

impl FromStr for ScrapeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(ScrapeMode::All),
            "NEW" | "NEW_ONLY" => Ok(ScrapeMode::NewOnly),
            other => Err(format!("unknown scrape mode {other:?}")),
        }
    }
}

/// Process-wide scrape policy, read-only for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapePolicy {
    pub mode: ScrapeMode,
    /// Cap on newly satisfied meetings per source per run.
    pub quota: Option<NonZeroUsize>,
}

impl Default for ScrapePolicy {
    fn default() -> Self {
        Self {
            mode: ScrapeMode::All,
            quota: None,
        }
    }
}

/// Parse `DOWNLOAD_LIMIT`. Absent, `none`, `null`, empty, zero, negative or
/// non-numeric values all mean unlimited.
pub fn parse_download_limit(raw: Option<&str>) -> Option<NonZeroUsize> {
    let raw = raw?.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    raw.parse::<NonZeroUsize>().ok()
}

/// Deployment target. The two are mutually exclusive: one storage backend per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Workstation run: archive to local disk.
    Local,
    /// Scheduled cloud run: stage in ephemeral storage, archive remotely.
    Unattended,
}

/// Endpoint and credentials for S3-compatible storage.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Where rendered sessions are served from.
#[derive(Debug, Clone)]
pub struct BrowserlessConfig {
    pub url: String,
    pub token: Option<String>,
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub deployment: DeploymentMode,
    pub policy: ScrapePolicy,
    /// "Today" as fixed at run start.
    pub today: NaiveDate,
    pub output_dir: PathBuf,
    pub staging_root: PathBuf,
    pub sources_path: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub browserless: Option<BrowserlessConfig>,
    pub municipality_filter: Vec<String>,
    pub committee_filter: Option<String>,
    pub max_parallel: usize,
}

impl RunConfig {
    /// Resolve the run configuration from parsed arguments.
    ///
    /// An unknown scrape mode falls back to `ALL` with a warning; an invalid
    /// download limit means "unlimited". "Today" is fixed here for the whole run.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when unattended mode is requested without
    /// remote storage credentials.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let deployment = if cli.render {
            DeploymentMode::Unattended
        } else {
            DeploymentMode::Local
        };

        let mode = cli.scrape_mode.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to scrape mode ALL");
            ScrapeMode::All
        });
        let policy = ScrapePolicy {
            mode,
            quota: parse_download_limit(cli.download_limit.as_deref()),
        };

        let remote = match (&cli.remote_access_key, &cli.remote_secret_key) {
            (Some(access_key), Some(secret_key)) => Some(RemoteConfig {
                endpoint: cli.remote_endpoint.clone(),
                region: cli.remote_region.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        };
        if deployment == DeploymentMode::Unattended && remote.is_none() {
            return Err(ConfigError::Missing(
                "unattended mode needs WASABI_ACCESS_KEY and WASABI_SECRET_KEY".into(),
            ));
        }

        let staging_root = match (&cli.staging_dir, deployment) {
            (Some(dir), _) => dir.clone(),
            (None, DeploymentMode::Unattended) => std::env::temp_dir().join("minutes_harvest"),
            (None, DeploymentMode::Local) => cli.output_dir.join(".staging"),
        };

        let config = Self {
            deployment,
            policy,
            today: Local::now().date_naive(),
            output_dir: cli.output_dir.clone(),
            staging_root,
            sources_path: cli.sources.clone(),
            remote,
            browserless: cli.browserless_url.as_ref().map(|url| BrowserlessConfig {
                url: url.clone(),
                token: cli.browserless_token.clone(),
            }),
            municipality_filter: parse_filter(cli.municipality_filter.as_deref()),
            committee_filter: cli
                .committee_source
                .as_deref()
                .map(slugify)
                .filter(|s| !s.is_empty()),
            max_parallel: cli.max_parallel.max(1),
        };
        config.log_summary();
        Ok(config)
    }

    /// Whether the municipality and committee filters select this source.
    pub fn selects(&self, source: &SourceConfig) -> bool {
        let slug = source.slug().to_lowercase();
        let by_name = self.municipality_filter.is_empty()
            || self.municipality_filter.iter().any(|f| slug.contains(f));
        let by_committee = match &self.committee_filter {
            None => true,
            Some(wanted) => {
                source.category_slug().as_deref() == Some(wanted.as_str())
                    || source.committee_tag() == *wanted
            }
        };
        by_name && by_committee
    }

    /// Staging directory owned by one source's pipeline.
    pub fn staging_dir_for(&self, source: &SourceConfig) -> PathBuf {
        self.staging_root.join(source.id())
    }

    fn log_summary(&self) {
        info!(
            deployment = ?self.deployment,
            mode = ?self.policy.mode,
            quota = ?self.policy.quota,
            today = %self.today,
            output_dir = %self.output_dir.display(),
            staging_root = %self.staging_root.display(),
            remote = self.remote.as_ref().map(|r| r.endpoint.as_str()).unwrap_or("<not set>"),
            browserless = self.browserless.as_ref().map(|b| b.url.as_str()).unwrap_or("<not set>"),
            filter = ?self.municipality_filter,
            "Config loaded"
        );
    }
}

fn parse_filter(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

/// How a source's pages are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Plain HTTP for server-rendered portals.
    #[default]
    Http,
    /// A rendering browser for script-driven portals.
    Browser,
}

/// Listing pagination shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationConfig {
    ScrollUntilStable {
        #[serde(default = "default_stable_passes")]
        stable_passes: usize,
        #[serde(default = "default_max_advances")]
        max_advances: usize,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    PagedTable {
        next_selector: String,
        #[serde(default = "default_disabled_class")]
        disabled_class: String,
        #[serde(default = "default_max_advances")]
        max_pages: usize,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    AccordionGate {
        section_selector: String,
    },
}

impl Default for PaginationConfig {
    fn default() -> Self {
        PaginationConfig::ScrollUntilStable {
            stable_passes: default_stable_passes(),
            max_advances: default_max_advances(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_stable_passes() -> usize {
    1
}

fn default_max_advances() -> usize {
    200
}

fn default_settle_ms() -> u64 {
    2500
}

fn default_disabled_class() -> String {
    "disabled".to_string()
}

/// How the document URL is obtained from a meeting's detail URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentRule {
    /// Build it from placeholders: `{base}`, `{id}` (UUID in the detail URL), `{url}`.
    Template { template: String },
    /// Load the detail page and read an attribute of the first matching element.
    Selector { selector: String, attribute: String },
    /// Load the detail page and take the first capture group of a regex.
    Pattern { pattern: String },
}

/// Fetch strategy declared by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    /// HTTP byte-stream download of the resolved document.
    #[default]
    Direct,
    /// Trigger a browser download and wait for it in the staging directory.
    Download,
    /// Print the rendered detail page to PDF.
    Print,
}

/// One portal/committee pairing.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Municipality slug; derived from `base_url` when absent.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Committee name, slugified into the artifact name.
    pub committee: String,
    /// Optional committee category suffix for storage namespaces.
    #[serde(default)]
    pub category: Option<String>,
    pub listing_url: String,
    #[serde(default)]
    pub session: SessionKind,
    #[serde(default)]
    pub pagination: PaginationConfig,
    pub link_selector: String,
    /// Row container for tables; the row text becomes the candidate label.
    #[serde(default)]
    pub row_selector: Option<String>,
    /// Regex an href must match to count as a meeting link.
    #[serde(default)]
    pub link_pattern: Option<String>,
    #[serde(default)]
    pub date: DateField,
    #[serde(default)]
    pub document: Option<DocumentRule>,
    #[serde(default)]
    pub fetch: FetchKind,
    /// Element clicked on the detail page to start a browser download.
    #[serde(default)]
    pub download_trigger: Option<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<DocumentFormat>,
    /// Page chrome hidden before print-to-PDF.
    #[serde(default)]
    pub hide_selectors: Vec<String>,
    #[serde(default)]
    pub cookie_selector: Option<String>,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

fn default_extensions() -> Vec<DocumentFormat> {
    vec![DocumentFormat::Pdf, DocumentFormat::Docx]
}

fn default_download_timeout() -> u64 {
    60
}

impl SourceConfig {
    /// Municipality slug: explicit `slug`, else derived from `base_url`, else
    /// from `listing_url`.
    pub fn slug(&self) -> String {
        self.slug
            .as_deref()
            .map(slugify)
            .or_else(|| self.base_url.as_deref().and_then(source_slug_from_url))
            .or_else(|| source_slug_from_url(&self.listing_url))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Slugified committee name, e.g. `oekonomiudvalget`.
    pub fn committee_tag(&self) -> String {
        slugify(&self.committee)
    }

    pub fn category_slug(&self) -> Option<String> {
        self.category.as_deref().map(slugify).filter(|c| !c.is_empty())
    }

    /// Unique id within the catalog: slug plus committee tag.
    pub fn id(&self) -> String {
        format!("{}-{}", self.slug(), self.committee_tag())
    }

    /// Local archive directory name: `raw_files_{slug}[_{category}]`.
    pub fn local_dir_name(&self) -> String {
        match self.category_slug() {
            Some(cat) => format!("raw_files_{}_{}", self.slug(), cat),
            None => format!("raw_files_{}", self.slug()),
        }
    }

    /// Remote bucket name: `raw-files-{slug}[-{category}]`, dashes only.
    pub fn bucket_name(&self) -> String {
        let name = match self.category_slug() {
            Some(cat) => format!("raw-files-{}-{}", self.slug(), cat),
            None => format!("raw-files-{}", self.slug()),
        };
        name.replace('_', "-")
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// All configured sources.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceCatalog {
    pub sources: Vec<SourceConfig>,
}

impl SourceCatalog {
    /// Parse a catalog from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse the catalog file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read, [`ConfigError::Catalog`]
    /// if it is not a valid catalog.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), count = catalog.sources.len(), "Loaded source catalog");
        Ok(catalog)
    }

    /// Look a source up by [`SourceConfig::id`].
    pub fn find(&self, id: &str) -> Result<&SourceConfig, ConfigError> {
        self.sources
            .iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| ConfigError::UnknownSource(id.to_string()))
    }

    /// Sources the run's municipality and committee filters select, in catalog order.
    pub fn selected<'a>(&'a self, config: &'a RunConfig) -> impl Iterator<Item = &'a SourceConfig> {
        self.sources.iter().filter(move |s| config.selects(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const CATALOG: &str = r#"
sources:
  - base_url: https://dagsordener.esbjergkommune.dk
    committee: Økonomiudvalget
    listing_url: https://dagsordener.esbjergkommune.dk/?udvalg=oko
    session: browser
    link_selector: "a[href^='/vis?Referat-']"
    date: url
    document: { kind: template, template: "{base}/pdf/GetDagsorden/{id}" }
    fetch: download
  - slug: Esbjerg
    committee: Teknik & Miljø
    category: teknikmiljoe
    listing_url: https://dagsordener.esbjergkommune.dk/?udvalg=tm
    pagination: { kind: paged_table, next_selector: "li.pager__item--next a" }
    link_selector: "td a"
    row_selector: tr
    extensions: [pdf]
  - base_url: https://referater.aalborg.dk
    slug: aalborg
    committee: oekonomiudvalget
    listing_url: https://referater.aalborg.dk/politiske-udvalg/oekonomiudvalget
    pagination: { kind: accordion_gate, section_selector: bui-accordion-item }
    link_selector: "a[href*='moedetitel=']"
    document: { kind: pattern, pattern: "window\\.open\\('([^']+)'\\)" }
"#;

    fn run_config(args: &[&str]) -> RunConfig {
        let mut argv = vec!["minutes_harvest"];
        argv.extend_from_slice(args);
        RunConfig::from_cli(&Cli::parse_from(argv)).unwrap()
    }

    #[test]
    fn test_parse_download_limit() {
        assert_eq!(parse_download_limit(None), None);
        assert_eq!(parse_download_limit(Some("")), None);
        assert_eq!(parse_download_limit(Some("None")), None);
        assert_eq!(parse_download_limit(Some("null")), None);
        assert_eq!(parse_download_limit(Some("abc")), None);
        assert_eq!(parse_download_limit(Some("0")), None);
        assert_eq!(parse_download_limit(Some("-3")), None);
        assert_eq!(parse_download_limit(Some(" 5 ")), NonZeroUsize::new(5));
    }

    #[test]
    fn test_scrape_mode_parsing() {
        assert_eq!("all".parse::<ScrapeMode>(), Ok(ScrapeMode::All));
        assert_eq!("NEW".parse::<ScrapeMode>(), Ok(ScrapeMode::NewOnly));
        assert_eq!("new_only".parse::<ScrapeMode>(), Ok(ScrapeMode::NewOnly));
        assert!("sometimes".parse::<ScrapeMode>().is_err());
    }

    #[test]
    fn test_catalog_parsing_and_names() {
        let catalog = SourceCatalog::from_yaml(CATALOG).unwrap();
        assert_eq!(catalog.sources.len(), 3);

        let esbjerg = &catalog.sources[0];
        assert_eq!(esbjerg.slug(), "esbjerg");
        assert_eq!(esbjerg.committee_tag(), "oekonomiudvalget");
        assert_eq!(esbjerg.id(), "esbjerg-oekonomiudvalget");
        assert_eq!(esbjerg.session, SessionKind::Browser);
        assert_eq!(esbjerg.fetch, FetchKind::Download);
        assert_eq!(esbjerg.date, DateField::Url);
        assert_eq!(esbjerg.pagination, PaginationConfig::default());
        assert_eq!(esbjerg.local_dir_name(), "raw_files_esbjerg");
        assert_eq!(esbjerg.bucket_name(), "raw-files-esbjerg");
        assert_eq!(esbjerg.extensions, vec![DocumentFormat::Pdf, DocumentFormat::Docx]);

        let teknik = &catalog.sources[1];
        assert_eq!(teknik.committee_tag(), "teknik-miljoe");
        assert_eq!(teknik.local_dir_name(), "raw_files_esbjerg_teknikmiljoe");
        assert_eq!(teknik.bucket_name(), "raw-files-esbjerg-teknikmiljoe");
        assert!(matches!(
            teknik.pagination,
            PaginationConfig::PagedTable { ref disabled_class, max_pages: 200, .. } if disabled_class == "disabled"
        ));

        let aalborg = &catalog.sources[2];
        assert!(matches!(aalborg.document, Some(DocumentRule::Pattern { .. })));
        assert_eq!(aalborg.download_timeout(), Duration::from_secs(60));
        assert!(catalog.find("aalborg-oekonomiudvalget").is_ok());
        assert!(matches!(catalog.find("nope"), Err(ConfigError::UnknownSource(_))));
    }

    #[test]
    fn test_filters_select_sources() {
        let catalog = SourceCatalog::from_yaml(CATALOG).unwrap();

        let config = run_config(&["--municipality-filter", " ESBJERG , odense"]);
        let ids: Vec<String> = catalog.selected(&config).map(|s| s.id()).collect();
        assert_eq!(ids, vec!["esbjerg-oekonomiudvalget", "esbjerg-teknik-miljoe"]);

        let config = run_config(&["--committee-source", "teknikmiljoe"]);
        let ids: Vec<String> = catalog.selected(&config).map(|s| s.id()).collect();
        assert_eq!(ids, vec!["esbjerg-teknik-miljoe"]);

        let config = run_config(&[]);
        assert_eq!(catalog.selected(&config).count(), 3);
    }

    #[test]
    fn test_local_run_config_defaults() {
        let config = run_config(&["--output-dir", "/srv/archive", "--download-limit", "none"]);
        assert_eq!(config.deployment, DeploymentMode::Local);
        assert_eq!(config.policy, ScrapePolicy::default());
        assert_eq!(config.staging_root, PathBuf::from("/srv/archive/.staging"));
    }

    #[test]
    fn test_unattended_mode_requires_credentials() {
        let cli = Cli::parse_from(["minutes_harvest", "--render"]);
        let cli = Cli {
            remote_access_key: None,
            remote_secret_key: None,
            ..cli
        };
        assert!(matches!(RunConfig::from_cli(&cli), Err(ConfigError::Missing(_))));
    }
}

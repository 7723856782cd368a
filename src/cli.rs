//! Command-line interface definitions.
//!
//! Every option can also come from the environment, which is how scheduled
//! cloud runs configure the harvester.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the minutes harvester.
///
/// # Examples
///
/// ```sh
/// # Harvest every source in the catalog to ./archive
/// minutes_harvest --sources sources.yaml --output-dir ./archive
///
/// # Only new meetings for two municipalities, at most 5 each
/// SCRAPE_MODE=NEW DOWNLOAD_LIMIT=5 MUNICIPALITY_FILTER=esbjerg,aalborg minutes_harvest
///
/// # Unattended mode uploading to S3-compatible storage
/// RENDER=true WASABI_ACCESS_KEY=... WASABI_SECRET_KEY=... minutes_harvest
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Source catalog (YAML)
    #[arg(short, long, env = "SOURCES_FILE", default_value = "sources.yaml")]
    pub sources: PathBuf,

    /// Root directory for the local archive
    #[arg(short, long, env = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Override the staging directory root for in-flight downloads
    #[arg(long, env = "STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Unattended (cloud) mode: stage in temp storage and archive to remote storage
    #[arg(long, env = "RENDER")]
    pub render: bool,

    /// ALL or NEW (only meetings dated today or later)
    #[arg(long, env = "SCRAPE_MODE", default_value = "ALL")]
    pub scrape_mode: String,

    /// Per-source cap on newly satisfied meetings; absent or invalid means unlimited
    #[arg(long, env = "DOWNLOAD_LIMIT")]
    pub download_limit: Option<String>,

    /// Comma-separated, case-insensitive substrings selecting sources to run
    #[arg(long, env = "MUNICIPALITY_FILTER")]
    pub municipality_filter: Option<String>,

    /// Restrict the run to one committee category
    #[arg(long, env = "COMMITTEE_SOURCE")]
    pub committee_source: Option<String>,

    /// Remote storage access key
    #[arg(long, env = "WASABI_ACCESS_KEY", hide_env_values = true)]
    pub remote_access_key: Option<String>,

    /// Remote storage secret key
    #[arg(long, env = "WASABI_SECRET_KEY", hide_env_values = true)]
    pub remote_secret_key: Option<String>,

    /// Remote storage endpoint (S3-compatible)
    #[arg(
        long,
        env = "WASABI_ENDPOINT",
        default_value = "https://s3.eu-central-1.wasabisys.com"
    )]
    pub remote_endpoint: String,

    /// Remote storage signing region
    #[arg(long, env = "WASABI_REGION", default_value = "eu-central-1")]
    pub remote_region: String,

    /// Browserless endpoint used by sources that need a rendering browser
    #[arg(long, env = "BROWSERLESS_URL")]
    pub browserless_url: Option<String>,

    /// Browserless API token
    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    pub browserless_token: Option<String>,

    /// How many source processes run at once
    #[arg(long, env = "MAX_PARALLEL", default_value_t = 4)]
    pub max_parallel: usize,

    /// Run a single source in this process (used by the coordinator)
    #[arg(long, hide = true)]
    pub source: Option<String>,

    /// Where a single-source run writes its JSON report
    #[arg(long, hide = true)]
    pub report: Option<PathBuf>,
}

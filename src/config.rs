// Runtime settings
//
// Layered with the `config` crate: built-in defaults, then an optional TOML
// file, then WIPE_ATTEST__* environment variables.

use crate::EraseResult;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const FALLBACK_DATA_DIR: &str = "/var/lib/wipe-attest";
pub const ENV_PREFIX: &str = "WIPE_ATTEST";

/// Where the temporary ATA security password comes from
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AtaPasswordPolicy {
    /// Fresh 16-character alphanumeric password per run
    #[default]
    Random,
    Fixed(String),
}

impl fmt::Debug for AtaPasswordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtaPasswordPolicy::Random => f.write_str("Random"),
            AtaPasswordPolicy::Fixed(_) => f.write_str("Fixed(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub certificate_dir: PathBuf,
    pub key_dir: PathBuf,
    pub log_dir: PathBuf,
    pub operator: String,
    pub default_passes: u32,
    pub dry_run: bool,
    pub ata_password: AtaPasswordPolicy,
    /// Seconds between SIGTERM and SIGKILL when a wipe is cancelled
    pub cancel_grace_secs: u64,
    pub sysfs_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let data = data_dir();
        Self {
            certificate_dir: data.join("certificates"),
            key_dir: data.join("keys"),
            log_dir: data.join("logs"),
            operator: default_operator(),
            default_passes: 1,
            dry_run: false,
            ata_password: AtaPasswordPolicy::Random,
            cancel_grace_secs: 10,
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl Settings {
    /// Load settings. An explicit path must exist; the platform default
    /// `config.toml` is optional.
    pub fn load(explicit: Option<&Path>) -> EraseResult<Self> {
        let defaults = Settings::default();

        let mut builder = Config::builder()
            .set_default("certificate_dir", path_str(&defaults.certificate_dir))?
            .set_default("key_dir", path_str(&defaults.key_dir))?
            .set_default("log_dir", path_str(&defaults.log_dir))?
            .set_default("operator", defaults.operator.clone())?
            .set_default("default_passes", i64::from(defaults.default_passes))?
            .set_default("dry_run", defaults.dry_run)?
            .set_default("ata_password", "random")?
            .set_default("cancel_grace_secs", defaults.cancel_grace_secs as i64)?
            .set_default("sysfs_root", path_str(&defaults.sysfs_root))?;

        builder = match explicit {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => match config_file() {
                Some(path) => builder.add_source(File::from(path).required(false)),
                None => builder,
            },
        };

        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        tracing::debug!(
            certificate_dir = %settings.certificate_dir.display(),
            key_dir = %settings.key_dir.display(),
            "Settings loaded"
        );
        Ok(settings)
    }

    pub fn effective_passes(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_passes).max(1)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "wipe-attest", "wipe-attest")
}

pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(FALLBACK_DATA_DIR),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

pub fn config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// The invoking operator, looking through sudo when present
fn default_operator() -> String {
    std::env::var("SUDO_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}

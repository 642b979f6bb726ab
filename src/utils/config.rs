use crate::backup::exclusion::DEFAULT_EXCLUDES;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "USB_BACKUP";
const CONFIG_PATH_VAR: &str = "USB_BACKUP_CONFIG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory tree to mirror
    pub source_root: PathBuf,

    /// Where the mirror goes, usually on the target volume. Wiped on every run.
    pub destination_root: PathBuf,

    /// Label of the volume whose attachment triggers a run
    pub target_volume_id: String,

    /// Seconds to wait after attach before touching the volume
    pub countdown_secs: u64,

    /// Directory names skipped while counting and copying
    pub exclude_dirs: Vec<String>,

    /// Only mounts beneath these count as removable volumes
    pub mount_roots: Vec<PathBuf>,

    /// Kernel mount table to watch
    pub mount_table: PathBuf,

    /// Fallback rescan interval for the mount table
    pub poll_interval_secs: u64,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            destination_root: PathBuf::new(),
            target_volume_id: String::new(),
            countdown_secs: 5,
            exclude_dirs: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            mount_roots: vec![
                PathBuf::from("/media"),
                PathBuf::from("/run/media"),
                PathBuf::from("/mnt/chromeos/removable"),
            ],
            mount_table: PathBuf::from("/proc/self/mounts"),
            poll_interval_secs: 2,
            log_format: LogFormat::Text,
        }
    }
}

/// The three values a backup run is parameterised by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub target_volume_id: String,
}

impl Config {
    /// Load config from defaults, an optional TOML file and the environment
    pub fn load() -> Result<Self> {
        // A missing .env is fine
        let _ = dotenvy::dotenv();

        let file = std::env::var_os(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .or_else(default_config_file);

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exclude_dirs")
                .with_list_parse_key("mount_roots"),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_root.as_os_str().is_empty() {
            bail!("source_root is not configured");
        }
        if self.destination_root.as_os_str().is_empty() {
            bail!("destination_root is not configured");
        }
        if self.target_volume_id.trim().is_empty() {
            bail!("target_volume_id is not configured");
        }
        if self.destination_root.starts_with(&self.source_root) {
            bail!(
                "destination_root {} lies inside source_root {}",
                self.destination_root.display(),
                self.source_root.display()
            );
        }
        // The resync wipes the destination before the source is read
        if self.source_root.starts_with(&self.destination_root) {
            bail!(
                "source_root {} lies inside destination_root {}",
                self.source_root.display(),
                self.destination_root.display()
            );
        }
        Ok(())
    }

    pub fn backup(&self) -> BackupConfig {
        BackupConfig {
            source_root: self.source_root.clone(),
            destination_root: self.destination_root.clone(),
            target_volume_id: self.target_volume_id.clone(),
        }
    }

    /// Defaults with the three required values filled in.
    pub fn for_paths(source: &Path, destination: &Path, target: &str) -> Self {
        Self {
            source_root: source.to_path_buf(),
            destination_root: destination.to_path_buf(),
            target_volume_id: target.to_string(),
            ..Self::default()
        }
    }
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("usb-backup-watcher").join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    Config::load()
}

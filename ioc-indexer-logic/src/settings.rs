use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use ipnet::Ipv4Net;
use serde::Deserialize;
use serde_with::serde_as;

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IndexerSettings {
    pub telegram: TelegramSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub ioc: IocSettings,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Defaults to four jobs per worker.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default = "default_restart_delay")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub restart_delay: Duration,
    #[serde(default = "default_shutdown_grace")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl IndexerSettings {
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(4 * self.worker_count)
    }

    /// Configuration errors are fatal at boot, before anything connects.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be positive");
        }
        if let Some(capacity) = self.queue_capacity {
            if capacity == 0 {
                anyhow::bail!("queue_capacity must be positive");
            }
        }
        if self.telegram.channels.is_empty() {
            anyhow::bail!("at least one channel must be configured");
        }
        self.ioc.cidrs().context("invalid ioc configuration")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelegramSettings {
    pub phone: String,
    pub api_id: i32,
    pub api_hash: String,
    /// Channel usernames or numeric identifiers the session subscribes to.
    pub channels: Vec<String>,
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
    /// Two-factor password, only needed on the first interactive login.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("ioc-indexer.session")
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageSettings {
    /// Content store root; extraction work dirs live in a sibling tree.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IocSettings {
    /// Domain suffixes of interest, e.g. `example.gov`.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Address suffixes of interest, e.g. `@example.gov`.
    #[serde(default)]
    pub emails: Vec<String>,
    /// CIDR ranges an IPv4 hit must fall into to be retained.
    #[serde(default)]
    pub ipv4_cidrs: Vec<String>,
}

impl IocSettings {
    pub fn cidrs(&self) -> anyhow::Result<Vec<Ipv4Net>> {
        self.ipv4_cidrs
            .iter()
            .map(|raw| {
                raw.parse()
                    .with_context(|| format!("malformed CIDR range: {raw}"))
            })
            .collect()
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DownloadSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub max_delay: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtractionSettings {
    #[serde(default = "default_max_decompressed_bytes")]
    pub max_decompressed_bytes: u64,
    #[serde(default = "default_max_decompression_ratio")]
    pub max_decompression_ratio: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_decompressed_bytes: default_max_decompressed_bytes(),
            max_decompression_ratio: default_max_decompression_ratio(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_decompressed_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_decompression_ratio() -> u64 {
    100
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

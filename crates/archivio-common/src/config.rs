//! Configuration types for ArchivIO
//!
//! This module defines configuration structures used across components.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::types::Provider;

/// Root configuration for ArchivIO
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Archive API server configuration
    pub server: ServerConfig,
    /// File-storage gateway configuration
    pub gateway: GatewayConfig,
    /// Archive pipeline configuration
    pub archive: ArchiveConfig,
    /// Registration registry configuration
    pub registry: RegistryConfig,
    /// Notification configuration
    pub notify: NotifyConfig,
}

/// Archive API server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the archive API
    pub listen: SocketAddr,
    /// Externally reachable base URL, used in status and callback links
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8750".parse().unwrap(),
            public_url: "http://localhost:8750".to_string(),
        }
    }
}

/// File-storage gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the file-storage gateway
    pub url: String,
    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,
    /// Maximum in-flight gateway requests per archive run
    pub max_concurrent_requests: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7777".to_string(),
            timeout_ms: 30_000,
            max_concurrent_requests: 16,
        }
    }
}

/// Archive pipeline configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Provider that receives archived copies
    pub archive_provider: String,
    /// Maximum total registration size (bytes, default: 5 GiB)
    pub max_archive_size: u64,
    /// Concurrent file-tree walks per registration
    pub stat_concurrency: usize,
    /// Concurrent copy requests per registration
    pub copy_concurrency: usize,
    /// Age after which an unfinished archive counts as stalled (seconds)
    pub archive_timeout_secs: u64,
    /// Interval between stalled-archive sweeps (seconds)
    pub sweep_interval_secs: u64,
    /// Providers eligible for archiving
    pub providers: Vec<ProviderConfig>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_provider: "archivestore".to_string(),
            max_archive_size: 5 * 1024 * 1024 * 1024, // 5 GiB
            stat_concurrency: 8,
            copy_concurrency: 8,
            archive_timeout_secs: 24 * 60 * 60, // 1 day
            sweep_interval_secs: 600,
            providers: default_providers(),
        }
    }
}

/// One archivable provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider short name ("dropbox")
    pub name: String,
    /// Display name override; falls back to the built-in mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

fn default_providers() -> Vec<ProviderConfig> {
    [
        "archivestore",
        "box",
        "dataverse",
        "dropbox",
        "figshare",
        "github",
        "googledrive",
        "onedrive",
        "owncloud",
        "s3",
    ]
    .into_iter()
    .map(|name| ProviderConfig {
        name: name.to_string(),
        display_name: None,
    })
    .collect()
}

impl ArchiveConfig {
    /// Whether a provider may be archived from. The archive provider itself
    /// always counts, even when left out of the configured set.
    #[must_use]
    pub fn is_archivable(&self, provider: &Provider) -> bool {
        provider.as_str() == self.archive_provider
            || self.providers.iter().any(|p| p.name == provider.as_str())
    }

    /// Display name for a provider, honoring config overrides
    #[must_use]
    pub fn display_name_for(&self, provider: &Provider) -> String {
        self.providers
            .iter()
            .find(|p| p.name == provider.as_str())
            .and_then(|p| p.display_name.clone())
            .unwrap_or_else(|| provider.display_name())
    }
}

/// Registration registry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Data directory for the registry store
    pub data_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/archivio"),
        }
    }
}

/// Notification configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Mail gateway endpoint; when unset, notifications are logged only
    pub mail_endpoint: Option<String>,
    /// Sender address for outgoing mail
    pub from_addr: String,
    /// Support inbox copied on every archive failure
    pub support_addr: String,
    /// Per-request timeout for the mail gateway (milliseconds)
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mail_endpoint: None,
            from_addr: "notifications@archivio.example".to_string(),
            support_addr: "support@archivio.example".to_string(),
            timeout_ms: 10_000,
        }
    }
}

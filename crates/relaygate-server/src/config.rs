//! Gateway configuration: TOML file + CLI overrides.

use crate::resolver::ResolverSettings;
use relaygate_core::{ClusterConfig, GatewayError, GatewayResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default, rename = "cluster")]
    pub clusters: Vec<ClusterConfig>,
}

/// `[resolver]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    /// Seconds between background DNS refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Seconds a single domain resolution may take.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            lookup_timeout: default_lookup_timeout(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    5
}
fn default_lookup_timeout() -> u64 {
    2
}

/// Resolved gateway configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub path: PathBuf,
    pub resolver: ResolverSettings,
    pub clusters: Vec<ClusterConfig>,
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides. A missing file
    /// yields the defaults and no clusters.
    pub fn load(config_path: &Path, cli_refresh_interval: Option<u64>) -> GatewayResult<Self> {
        let path = expand_tilde(config_path);

        let file_config = if path.exists() {
            info!(path = %path.display(), "loading config file");
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<ConfigFile>(&content)
                .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            ConfigFile::default()
        };

        let refresh_interval =
            cli_refresh_interval.unwrap_or(file_config.resolver.refresh_interval);
        if refresh_interval == 0 {
            return Err(GatewayError::Config(
                "resolver refresh_interval must be positive".to_string(),
            ));
        }

        Ok(Self {
            path,
            resolver: ResolverSettings {
                refresh_interval: Duration::from_secs(refresh_interval),
                lookup_timeout: Duration::from_secs(file_config.resolver.lookup_timeout),
            },
            clusters: file_config.clusters,
        })
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::ClusterType;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_clusters() {
        let file = write_config(
            r#"
[resolver]
refresh_interval = 10

[[cluster]]
name = "media-plane"
type = "STATIC"
endpoints = ["10.0.0.0/24", "192.168.1.1"]

[[cluster]]
name = "sfu"
type = "STRICT_DNS"
endpoints = ["sfu.default.svc.cluster.local"]
"#,
        );

        let config = GatewayConfig::load(file.path(), None).unwrap();
        assert_eq!(config.resolver.refresh_interval, Duration::from_secs(10));
        assert_eq!(config.resolver.lookup_timeout, Duration::from_secs(2));
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.clusters[0].name, "media-plane");
        assert_eq!(config.clusters[1].validate().unwrap(), ClusterType::StrictDns);
    }

    #[test]
    fn test_cli_override() {
        let file = write_config("[resolver]\nrefresh_interval = 10\n");
        let config = GatewayConfig::load(file.path(), Some(30)).unwrap();
        assert_eq!(config.resolver.refresh_interval, Duration::from_secs(30));
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(&dir.path().join("absent.toml"), None).unwrap();
        assert_eq!(config.resolver, ResolverSettings::default());
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn test_unknown_type_is_not_a_parse_error() {
        let file = write_config(
            "[[cluster]]\nname = \"x\"\ntype = \"EDS\"\nendpoints = []\n",
        );
        let config = GatewayConfig::load(file.path(), None).unwrap();
        assert!(config.clusters[0].validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let file = write_config("[[cluster]]\nname = 42\n");
        assert!(matches!(
            GatewayConfig::load(file.path(), None),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let file = write_config("[resolver]\nrefresh_interval = 0\n");
        assert!(GatewayConfig::load(file.path(), None).is_err());
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(
            expand_tilde(Path::new("/etc/relaygate.toml")),
            PathBuf::from("/etc/relaygate.toml")
        );
    }
}

use std::path::{Path, PathBuf};

use sendgate_common::Identity;
use sendgate_metrics::MetricsConfig;
use sendgate_quota::{DistributionStrategy, EngineConfig};
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SENDGATE_CONFIG";

/// Top-level configuration file
///
/// ```ron
/// (
///     engine: (utc_offset_minutes: 0, rng_seed: Some(7)),
///     metrics: (enabled: false),
///     strategy: (kind: least_used),
///     identities: [
///         (id: "mail-1", tenant: "acme", created_at: "2024-01-01T00:00:00Z", warmup: completed),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Default strategy used when none is given on the command line
    #[serde(default)]
    pub strategy: DistributionStrategy,
    /// Identities seeded into the in-memory registry
    #[serde(default)]
    pub identities: Vec<Identity>,
}

impl Settings {
    /// Read and parse a RON configuration file
    ///
    /// # Errors
    ///
    /// If the file cannot be read or is not valid configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }
}

/// Find the configuration file using the following precedence:
/// 1. An explicit path (`--config`)
/// 2. `SENDGATE_CONFIG` environment variable
/// 3. ./sendgate.config.ron (current working directory)
/// 4. /etc/sendgate/sendgate.config.ron (system-wide config)
///
/// # Errors
///
/// If an explicitly named file does not exist, or no candidate exists.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let default_paths = [
        PathBuf::from("./sendgate.config.ron"),
        PathBuf::from("/etc/sendgate/sendgate.config.ron"),
    ];

    locate(explicit, std::env::var(CONFIG_ENV).ok(), &default_paths)
}

fn locate(
    explicit: Option<&Path>,
    from_env: Option<String>,
    default_paths: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

use serde::{Deserialize, Serialize};

/// Runtime settings for the fee core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// SQLite path, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Rows per cache rebuild transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
}

fn default_db_path() -> String {
    ":memory:".into()
}

fn default_batch_size() -> usize {
    1000
}

fn default_histogram_bins() -> usize {
    20
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            db_path:        default_db_path(),
            batch_size:     default_batch_size(),
            histogram_bins: default_histogram_bins(),
        }
    }
}

impl FeeConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: FeeConfig = serde_json::from_str(&content)?;
        if config.batch_size == 0 {
            anyhow::bail!("batch_size in {path} must be at least 1");
        }
        Ok(config)
    }

    /// Small batches so tests cross several transaction boundaries.
    pub fn default_test() -> Self {
        Self {
            batch_size: 2,
            histogram_bins: 4,
            ..Self::default()
        }
    }
}

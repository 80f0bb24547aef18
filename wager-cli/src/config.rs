use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub verbose: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("wager"),
            verbose: false,
        }
    }
}

impl CliConfig {
    pub fn new(data_dir: Option<PathBuf>, verbose: bool) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: data_dir.unwrap_or(defaults.data_dir),
            verbose,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("wager.db")
    }

    /// `WAGER_LOG` wins over the verbosity flag.
    pub fn log_filter(&self) -> String {
        std::env::var("WAGER_LOG").unwrap_or_else(|_| {
            let level = if self.verbose { "debug" } else { "info" };
            format!("wager_cli={},wager_core={}", level, level)
        })
    }
}

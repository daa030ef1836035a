//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Default for `check`: stop at the first problem.
    pub fail_on_error: bool,

    /// Default for `check`: repair `lastState` breaks.
    pub fix: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("ft.db"),
            fail_on_error: true,
            fix: false,
        }
    }
}

impl Config {
    /// Loads configuration from default locations, then `config_path`, then `FT_*`.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // FT_DATABASE_PATH, FT_FAIL_ON_ERROR, FT_FIX
        figment = figment.merge(Env::prefixed("FT_"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for ft.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ft"))
}

/// Returns the platform-specific data directory for ft.
///
/// On Linux: `~/.local/share/ft`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ft"))
}

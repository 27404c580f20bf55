use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Allocator, Consensus, Coordination, Discovery, Error, General, IndexDefaults, Udf};

/// Top-level `searchdog.toml` shape, loaded once at process start and
/// re-read on `SIGHUP` for the hot-reloadable subset of fields (spec.md
/// §4.6, and SPEC_FULL.md §1.3 "Configuration").
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub consensus: Consensus,
    #[serde(default)]
    pub allocator: Allocator,
    #[serde(default)]
    pub coordination: Coordination,
    #[serde(default)]
    pub index_defaults: IndexDefaults,
    #[serde(default)]
    pub udf: Udf,
}

impl Config {
    /// Load configuration from disk, or fall back to defaults with a
    /// warning.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Config = if let Ok(contents) = read_to_string(path) {
            let config = toml::from_str(&contents)
                .map_err(|err| Error::Parse(path.to_path_buf(), err))?;
            info!("loaded \"{}\"", path.display());
            config
        } else {
            warn!(
                "\"{}\" doesn't exist, loading defaults instead",
                path.display()
            );
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.index_defaults.num_shards == 0 {
            return Err(Error::Validation(
                "index_defaults.num_shards must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply the hot-reloadable subset of `other` onto `self` in place,
    /// used by the `SIGHUP` handler. `general` (identity, bind addresses,
    /// data_dir) is intentionally left untouched.
    pub fn reload_from(&mut self, other: Config) {
        self.discovery = other.discovery;
        self.consensus = other.consensus;
        self.allocator = other.allocator;
        self.coordination = other.coordination;
        self.index_defaults = other.index_defaults;
        self.udf = other.udf;
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("searchdog.toml")
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("searchdog.toml");
        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("searchdog.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "[general]\nrole = \"coordination\"\nbogus = true\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_shards_rejected() {
        let mut config = Config::default();
        config.index_defaults.num_shards = 0;
        assert!(config.validate().is_err());
    }
}

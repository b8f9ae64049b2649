//! Configuration options for the compaction core.
//!
//! This module provides structures and functions to manage configuration options,
//! including reading from files and environment variables.
//!
//! # Examples
//!
//! Loading the default configuration for `Settings`:
//!
//! ```rust
//! use slatedb_compaction::config::Settings;
//! let config = Settings::default();
//! ```
//!
//! Loading `Settings` from environment variables:
//!
//! ```rust
//! use slatedb_compaction::config::Settings;
//! let config = Settings::from_env("SLATEDB_").expect("Failed to load options from env");
//! ```
//!
//! Loading `Settings` from predefined files, SlateDbCompaction.toml, SlateDbCompaction.json,
//! SlateDbCompaction.yaml, or SlateDbCompaction.yml. This method also merges any environment
//! variable that starts with `SLATEDB_` to the final `Settings` struct:
//!
//! ```rust
//! use slatedb_compaction::config::Settings;
//! let config = Settings::load().expect("Failed to load options");
//! ```
//!
//! # Configuration formats
//!
//! Three configuration formats are supported: TOML, JSON, and YAML.
//!
//! ## TOML
//!
//! ```toml
//! sst_block_size = "Block8Kib"
//!
//! [scan]
//! max_fetch_tasks = 4
//! blocks_to_fetch = 16
//! ```
//!
//! ## YAML
//!
//! ```yaml
//! sst_block_size: Block8Kib
//! scan:
//!   max_fetch_tasks: 4
//!   blocks_to_fetch: 16
//! ```
use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::{Figment, Metadata, Provider};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SlateDBError;

/// Enum representing valid SST block sizes
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum SstBlockSize {
    /// 1KiB blocks
    Block1Kib,
    /// 2KiB blocks
    Block2Kib,
    /// 4KiB blocks (default)
    #[default]
    Block4Kib,
    /// 8KiB blocks
    Block8Kib,
    /// 16KiB blocks
    Block16Kib,
    /// 32KiB blocks
    Block32Kib,
    /// 64KiB blocks
    Block64Kib,
}

impl SstBlockSize {
    /// Get the block size in bytes
    pub fn as_bytes(&self) -> usize {
        match self {
            SstBlockSize::Block1Kib => 1024,
            SstBlockSize::Block2Kib => 2048,
            SstBlockSize::Block4Kib => 4096,
            SstBlockSize::Block8Kib => 8192,
            SstBlockSize::Block16Kib => 16384,
            SstBlockSize::Block32Kib => 32768,
            SstBlockSize::Block64Kib => 65536,
        }
    }
}

/// Read-ahead settings for scanning a single SST.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SstIteratorOptions {
    /// Maximum number of block fetch tasks in flight at once.
    pub max_fetch_tasks: usize,
    /// Number of blocks each fetch task reads.
    pub blocks_to_fetch: usize,
}

impl Default for SstIteratorOptions {
    fn default() -> Self {
        SstIteratorOptions {
            max_fetch_tasks: 1,
            blocks_to_fetch: 1,
        }
    }
}

impl SstIteratorOptions {
    pub fn new(max_fetch_tasks: usize, blocks_to_fetch: usize) -> Result<Self, SlateDBError> {
        let options = Self {
            max_fetch_tasks,
            blocks_to_fetch,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), SlateDBError> {
        if self.max_fetch_tasks == 0 || self.blocks_to_fetch == 0 {
            return Err(SlateDBError::InvalidIteratorOptions {
                max_fetch_tasks: self.max_fetch_tasks,
                blocks_to_fetch: self.blocks_to_fetch,
            });
        }
        Ok(())
    }
}

/// Scan settings as they appear in configuration files.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ScanSettings {
    /// Maximum number of block fetch tasks per SST.
    pub max_fetch_tasks: usize,
    /// Number of blocks fetched by each task.
    pub blocks_to_fetch: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let defaults = SstIteratorOptions::default();
        Self {
            max_fetch_tasks: defaults.max_fetch_tasks,
            blocks_to_fetch: defaults.blocks_to_fetch,
        }
    }
}

impl ScanSettings {
    /// Converts the settings into validated iterator options.
    pub fn iterator_options(&self) -> Result<SstIteratorOptions, crate::Error> {
        SstIteratorOptions::new(self.max_fetch_tasks, self.blocks_to_fetch).map_err(Into::into)
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Target size of each data block in newly written SSTs.
    pub sst_block_size: SstBlockSize,
    /// Read-ahead used when scanning sorted runs.
    pub scan: ScanSettings,
}

impl Settings {
    /// Loads Settings from a file.
    ///
    /// The file format is determined by its extension:
    /// - ".json" for JSON format
    /// - ".toml" for TOML format
    /// - ".yaml" or ".yml" for YAML format
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The file extension is not recognized (not json, toml, yaml, or yml).
    /// - The file cannot be read or parsed according to its presumed format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Settings, crate::Error> {
        let path = path.as_ref();
        let Some(ext) = path.extension() else {
            return Err(SlateDBError::UnknownConfigurationFormat(path.into()).into());
        };

        let mut builder = Figment::from(Settings::default());
        match ext.to_str().unwrap_or_default() {
            "json" => builder = builder.merge(Json::file(path)),
            "toml" => builder = builder.merge(Toml::file(path)),
            "yaml" | "yml" => builder = builder.merge(Yaml::file(path)),
            _ => return Err(SlateDBError::UnknownConfigurationFormat(path.into()).into()),
        }
        builder
            .extract()
            .map_err(|e| SlateDBError::InvalidConfigurationFormat(Box::new(e)).into())
    }

    /// Loads Settings from environment variables with a specified prefix.
    ///
    /// Nested options are separated by a dot (.) in the environment variable names.
    /// For example, with the prefix "SLATEDB_", the variable "SLATEDB_SCAN.MAX_FETCH_TASKS"
    /// sets `scan.max_fetch_tasks`.
    pub fn from_env(prefix: &str) -> Result<Settings, crate::Error> {
        Figment::from(Settings::default())
            .merge(Env::prefixed(prefix))
            .extract()
            .map_err(|e| SlateDBError::InvalidConfigurationFormat(Box::new(e)).into())
    }

    /// Loads Settings from multiple configuration sources in a specific order.
    ///
    /// 1. Default options
    /// 2. JSON file ("SlateDbCompaction.json")
    /// 3. TOML file ("SlateDbCompaction.toml")
    /// 4. YAML files ("SlateDbCompaction.yaml" and "SlateDbCompaction.yml")
    /// 5. Environment variables prefixed with "SLATEDB_"
    ///
    /// Each subsequent source overrides the values from the previous sources if they exist.
    pub fn load() -> Result<Settings, crate::Error> {
        Figment::from(Settings::default())
            .merge(Json::file("SlateDbCompaction.json"))
            .merge(Toml::file("SlateDbCompaction.toml"))
            .merge(Yaml::file("SlateDbCompaction.yaml"))
            .merge(Yaml::file("SlateDbCompaction.yml"))
            .admerge(Env::prefixed("SLATEDB_"))
            .extract()
            .map_err(|e| SlateDBError::InvalidConfigurationFormat(Box::new(e)).into())
    }
}

impl Provider for Settings {
    fn metadata(&self) -> Metadata {
        Metadata::named("SlateDB compaction configuration options")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.sst_block_size.as_bytes(), 4096);
        assert_eq!(
            settings.scan.iterator_options().unwrap(),
            SstIteratorOptions::default()
        );
    }

    #[test]
    fn test_iterator_options_reject_zero_values() {
        assert!(matches!(
            SstIteratorOptions::new(0, 1),
            Err(SlateDBError::InvalidIteratorOptions {
                max_fetch_tasks: 0,
                blocks_to_fetch: 1
            })
        ));
        assert!(SstIteratorOptions::new(1, 0).is_err());
        let err = ScanSettings {
            max_fetch_tasks: 1,
            blocks_to_fetch: 0,
        }
        .iterator_options()
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_settings_load_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SLATEDB_SCAN.MAX_FETCH_TASKS", "4");
            jail.set_env("SLATEDB_SST_BLOCK_SIZE", "Block8Kib");

            let settings =
                Settings::from_env("SLATEDB_").expect("failed to load settings from environment");
            assert_eq!(settings.scan.max_fetch_tasks, 4);
            assert_eq!(settings.scan.blocks_to_fetch, 1);
            assert_eq!(settings.sst_block_size, SstBlockSize::Block8Kib);
            Ok(())
        });
    }

    #[test]
    fn test_settings_load_from_json_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.json",
                r#"
{
    "sst_block_size": "Block1Kib",
    "scan": {
        "max_fetch_tasks": 2,
        "blocks_to_fetch": 8
    }
}
"#,
            )
            .expect("failed to create config file");

            let settings =
                Settings::from_file("config.json").expect("failed to load settings from file");
            assert_eq!(settings.sst_block_size, SstBlockSize::Block1Kib);
            assert_eq!(settings.scan.max_fetch_tasks, 2);
            assert_eq!(settings.scan.blocks_to_fetch, 8);
            Ok(())
        });
    }

    #[test]
    fn test_settings_load_from_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
[scan]
max_fetch_tasks = 3
blocks_to_fetch = 5
"#,
            )
            .expect("failed to create config file");

            let settings =
                Settings::from_file("config.toml").expect("failed to load settings from file");
            assert_eq!(settings.sst_block_size, SstBlockSize::Block4Kib);
            assert_eq!(settings.scan.max_fetch_tasks, 3);
            assert_eq!(settings.scan.blocks_to_fetch, 5);
            Ok(())
        });
    }

    #[test]
    fn test_settings_load_from_yaml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
sst_block_size: Block16Kib
"#,
            )
            .expect("failed to create config file");

            let settings =
                Settings::from_file("config.yaml").expect("failed to load settings from file");
            assert_eq!(settings.sst_block_size, SstBlockSize::Block16Kib);
            assert_eq!(settings.scan, ScanSettings::default());
            Ok(())
        });
    }

    #[test]
    fn test_settings_load_merges_files_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "SlateDbCompaction.toml",
                r#"
[scan]
max_fetch_tasks = 2
blocks_to_fetch = 2
"#,
            )
            .expect("failed to create config file");
            jail.set_env("SLATEDB_SCAN.BLOCKS_TO_FETCH", "9");

            let settings = Settings::load().expect("failed to load settings");
            assert_eq!(settings.scan.max_fetch_tasks, 2);
            assert_eq!(settings.scan.blocks_to_fetch, 9);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_file_extension_is_rejected() {
        let err = Settings::from_file("config.ini").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        let err = Settings::from_file("config").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}

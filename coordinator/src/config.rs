// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a migration
//! coordinator configuration

use crate::db::model::MigrationMode;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::{Deserialize, Serialize};
use slog_error_chain::SlogInlineError;
use std::time::Duration;
use thiserror::Error;

/// Configuration for a migration coordinator
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Coordinator-wide logging configuration.
    pub log: ConfigLogging,
    /// Tunables for migrations.
    #[serde(default)]
    pub migration: MigrationPolicy,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MigrationPolicy {
    /// Mode the model is left in once a migration completes successfully.
    pub success_mode: MigrationMode,
    /// How many times to build and attempt a transaction whose preconditions
    /// were invalidated by a concurrent writer.
    pub txn_max_attempts: u32,
    /// Upper bound of the random delay between transaction attempts.
    pub max_retry_backoff_ms: u64,
}

impl MigrationPolicy {
    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        MigrationPolicy {
            success_mode: MigrationMode::None,
            txn_max_attempts: 3,
            max_retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

// NetSecSim: Containerized BGP lab orchestration written in Rust
// Copyright (C) 2023 The NetSecSim Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! This module contains the code for reading the lab configuration.
//!
//! The configuration is read from a TOML file, whose path is either passed on the command line
//! (`--config`) or taken from the environment variable `NETSECSIM_CONFIG`. Every field has a
//! default, so an empty (or missing) file yields a usable configuration.
//!
//! ```toml
//! image = "frrouting/frr:v8.4.0"
//! privileged = true
//! state_dir = "./netsecsim-state"
//!
//! [network]
//! name = "netsecsim"
//!
//! [timeouts]
//! command_secs = 15
//! ready_secs = 60
//! session_secs = 90
//! poll_interval_ms = 1000
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

/// Environment variable that points to the configuration file.
pub const CONFIG_ENV: &str = "NETSECSIM_CONFIG";

/// Configuration of the lab environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabConfig {
    /// Container image running the routing daemons.
    pub image: String,
    /// Run the containers in privileged mode (required for FRR to manage the kernel routing
    /// table).
    pub privileged: bool,
    /// Directory in which the per-node configuration files and the lock file are stored.
    pub state_dir: PathBuf,
    /// Properties of the container network.
    pub network: NetworkConfig,
    /// Bounds on all waiting operations.
    pub timeouts: TimeoutConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            image: String::from("frrouting/frr:v8.4.0"),
            privileged: true,
            state_dir: PathBuf::from("./netsecsim-state"),
            network: Default::default(),
            timeouts: Default::default(),
        }
    }
}

/// Configuration of the container network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Name of the container network. The address block of the network is given by the
    /// scenario.
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: String::from("netsecsim"),
        }
    }
}

/// Timeouts, given in seconds (or milliseconds for the poll interval).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Maximum time for a single container or CLI command.
    pub command_secs: u64,
    /// Maximum time to wait until the routing daemons of a node accept commands.
    pub ready_secs: u64,
    /// Maximum time to wait for sessions to become established.
    pub session_secs: u64,
    /// Time between two polls.
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 15,
            ready_secs: 60,
            session_secs: 90,
            poll_interval_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    /// Timeout of a single command
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    /// Timeout until a node must be ready
    pub fn ready(&self) -> Duration {
        Duration::from_secs(self.ready_secs)
    }

    /// Timeout until sessions must be established
    pub fn session(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }

    /// Interval between two polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LabConfig {
    /// Parse the configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read the configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml(&content)
    }

    /// Load the configuration. If `path` is given, read that file. Otherwise, read the file in
    /// `NETSECSIM_CONFIG`, or fall back to the defaults if the variable is not set.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => Self::from_file(PathBuf::from(p)),
                None => {
                    log::debug!("{CONFIG_ENV} is not set. Using the default configuration");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Directory that holds the configuration files of the given node. This directory is mounted
    /// into the container at `/etc/frr`.
    pub fn node_config_dir(&self, node: &str) -> PathBuf {
        self.state_dir.join(node)
    }

    /// Path of the lock file.
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join(crate::lock::LOCK_FILE)
    }
}

/// Error while reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read the file
    #[error("Cannot read {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    /// Cannot parse the file
    #[error("Cannot parse the configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

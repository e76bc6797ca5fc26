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

//! # NetSecSim: Containerized BGP lab orchestration
//!
//! This library deploys a multi-AS BGP network, where every Autonomous System is an FRRouting
//! instance running in its own container, and verifies that all peering sessions come up. The lab
//! is the playground for attack simulations (prefix hijacks, route leaks, AS path prepending),
//! which are issued against the running routers by a separate driver.
//!
//! ## Structure
//!
//! The data flows through the following components:
//!
//! 1. The [`topology`] module declares the AS nodes and the peering edges between them, and
//!    validates that they are consistent ([`topology::Topology`]).
//! 2. The [`export`] module renders the startup configuration of each node (the `daemons`
//!    manifest, `vtysh.conf` and `frr.conf`) into a per-node directory.
//! 3. The [`router`] module starts and stops the router containers through a
//!    [`docker::ContainerRuntime`], and establishes the peering sessions on the running routers
//!    ([`router::peering`]).
//! 4. The [`verify`] module samples the control-plane state of each router and produces a
//!    per-node [`verify::StatusReport`].
//!
//! All of these steps are driven by a [`Lab`], which is the explicit context of one simulated
//! topology. Multiple labs (with different network names and state directories) can exist at the
//! same time.
//!
//! ## Locking Mechanism
//!
//! The virtual network and the router containers are shared state. Therefore, setting up or
//! tearing down a topology requires exclusive access. The main structure [`Lab`] contains a type
//! parameter `S` which is either [`Inactive`] or [`Active`]. In `Inactive` state, you can render
//! configurations and query the status of the routers. In `Active` state, you can also create,
//! reconfigure and destroy routers. To go from `Inactive` to `Active`, the lab creates the lock
//! file `netsecsim.lock` in its state directory. When the lock already exists, [`Lab::activate`]
//! fails with [`LabError::CannotObtainLock`]. The lock is released when the active lab is
//! dropped (or deactivated).
//!
//! ## Convergence
//!
//! Routing daemons initialize asynchronously, and sessions take some time to establish. Every
//! wait is implemented as polling with a timeout (see [`config::TimeoutConfig`]). Exceeding a timeout
//! never aborts the run: the result is reported as degraded, and the caller may decide to retry
//! (e.g., by running the session configuration again). All long-running steps observe the
//! [`cancel::CancelToken`] of the lab.

#![deny(missing_debug_implementations, rust_2018_idioms)]
#![warn(missing_docs)]

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;

pub mod cancel;
pub mod config;
pub mod docker;
pub mod export;
mod lock;
pub mod router;
pub mod topology;
pub mod verify;

#[cfg(test)]
mod test;

use cancel::{CancelToken, Cancelled};
use config::{ConfigError, LabConfig};
use docker::{ContainerRuntime, RuntimeError};
use export::GenerationError;
use lock::LabLock;
use router::{peering::PeeringReport, Readiness, StartError};
use topology::{Topology, ValidationError};
use verify::{StatusReport, VerificationError};

/// The `Lab` is in offline mode. It will not create or destroy anything, but you can still
/// generate configurations and observe the routers.
#[derive(Debug)]
pub struct Inactive;

/// The `Lab` owns the lock of its state directory and is allowed to create, reconfigure and
/// destroy routers.
#[derive(Debug)]
pub struct Active {
    _lock: LabLock,
}

/// One simulated topology, together with the runtime used to realize it. See the [crate-level
/// documentation](crate) for details on the type parameter `S`.
#[derive(Debug)]
pub struct Lab<S = Inactive> {
    pub(crate) topo: Arc<Topology>,
    pub(crate) config: Arc<LabConfig>,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) cancel: CancelToken,
    /// One mutex per node, held while a command stream is sent to that node.
    pub(crate) cli_locks: Arc<BTreeMap<String, Arc<Mutex<()>>>>,
    state: S,
}

impl Lab<Inactive> {
    /// Create a new lab for the given topology. This will only allocate structures, and not touch
    /// the container runtime.
    pub fn new(
        topo: Topology,
        config: LabConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let cli_locks = topo
            .nodes()
            .map(|n| (n.name.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            topo: Arc::new(topo),
            config: Arc::new(config),
            runtime,
            cancel: CancelToken::new(),
            cli_locks: Arc::new(cli_locks),
            state: Inactive,
        }
    }

    /// Obtain the lock of the state directory, and turn the lab into an active one.
    pub fn activate(self) -> Result<Lab<Active>, LabError> {
        let lock = LabLock::acquire(self.config.lock_file())?;
        Ok(Lab {
            topo: self.topo,
            config: self.config,
            runtime: self.runtime,
            cancel: self.cancel,
            cli_locks: self.cli_locks,
            state: Active { _lock: lock },
        })
    }
}

impl Lab<Active> {
    /// Release the lock and return the inactive lab. Running routers are left untouched.
    pub fn deactivate(self) -> Lab<Inactive> {
        Lab {
            topo: self.topo,
            config: self.config,
            runtime: self.runtime,
            cancel: self.cancel,
            cli_locks: self.cli_locks,
            state: Inactive,
        }
    }
}

impl Lab<Active> {
    /// Set up the entire lab: render the configuration of all nodes, start all routers,
    /// configure all sessions, and observe the resulting state. This function only fails if the
    /// configuration cannot be generated, the network cannot be created, or if it is cancelled.
    /// Failures of individual routers and sessions are part of the report.
    pub async fn setup(&mut self) -> Result<SetupReport, LabError> {
        self.render()?;
        let starts = self.start_all().await?;
        let sessions = self.configure_sessions().await?;
        let status = self.status().await?;
        Ok(SetupReport {
            starts,
            sessions,
            status,
        })
    }
}

/// Result of [`Lab::setup`].
#[derive(Debug)]
pub struct SetupReport {
    /// Outcome of starting each router.
    pub starts: BTreeMap<String, Result<Readiness, StartError>>,
    /// Outcome of configuring the sessions.
    pub sessions: PeeringReport,
    /// State of the lab after configuring the sessions.
    pub status: StatusReport,
}

impl<S> Lab<S> {
    /// Get the topology of this lab.
    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    /// Get the configuration of this lab.
    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Get the cancellation token. Cancelling it stops all running and future waits and commands
    /// of this lab.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Replace the cancellation token, e.g., to share one token between multiple labs.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Directory that contains the rendered configuration of a node.
    pub fn node_config_dir(&self, node: &str) -> PathBuf {
        self.config.node_config_dir(node)
    }

    /// Render the configuration of all nodes and write them into the state directory. Existing
    /// files are overwritten. Nothing is written if the configuration of any node cannot be
    /// generated.
    pub fn render(&self) -> Result<BTreeMap<String, PathBuf>, GenerationError> {
        export::write_all(&self.topo, &self.config.state_dir)
    }
}

/// Error type thrown while managing the lab.
#[derive(Debug, Error)]
pub enum LabError {
    /// The topology is inconsistent.
    #[error("Invalid topology: {0}")]
    Validation(#[from] ValidationError),
    /// The configuration could not be generated.
    #[error("Cannot generate configuration: {0}")]
    Generation(#[from] GenerationError),
    /// The lab configuration could not be read.
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// Error at the container runtime boundary.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    /// A direct query of a node failed.
    #[error("{0}")]
    Verification(#[from] VerificationError),
    /// The node does not exist in the topology.
    #[error("Node {0} is not part of the topology")]
    UnknownNode(String),
    /// Cannot obtain the lock.
    #[error("Cannot obtain the lock! {0} owns the lock to the lab.")]
    CannotObtainLock(String),
    /// I/O Error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Cannot join a parallel job
    #[error("Cannot join task: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// The operation was cancelled.
    #[error("{0}")]
    Cancelled(#[from] Cancelled),
}

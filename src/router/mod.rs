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

//! This module is responsible to manage the router containers. It starts and stops the routers,
//! and provides a handle to the shell of each running router ([`Vtysh`]). The sessions between
//! the routers are established in [`peering`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};

use crate::{
    cancel::{CancelToken, Cancelled},
    config::LabConfig,
    docker::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError},
    topology::AsNode,
    Active, Lab, LabError,
};

pub mod bgp;
pub mod peering;
mod vtysh;

pub use bgp::{BgpNeighbor, BgpRoute, BgpState, ParseError};
pub use vtysh::{Vtysh, VtyshError};

/// Mount point of the configuration directory inside the router containers.
pub const CONFIG_MOUNT: &str = "/etc/frr";

/// Whether a started router accepts commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The routing daemons answer on the shell.
    Ready,
    /// The container runs, but the daemons did not answer in time. The reason is the last error.
    Degraded(String),
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => f.write_str("ready"),
            Readiness::Degraded(reason) => write!(f, "degraded ({reason})"),
        }
    }
}

/// Everything required to operate on a single node from a spawned task.
#[derive(Debug, Clone)]
pub(crate) struct NodeHandle {
    pub(crate) node: AsNode,
    pub(crate) vtysh: Vtysh,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) config: Arc<LabConfig>,
    pub(crate) cli_lock: Arc<Mutex<()>>,
    pub(crate) cancel: CancelToken,
}

impl NodeHandle {
    /// Name of the node
    pub(crate) fn name(&self) -> &str {
        &self.node.name
    }

    /// Start the router, replacing any existing container of the same name. The network must
    /// already exist.
    async fn start(self) -> Result<Readiness, StartError> {
        let name = self.name().to_string();
        let err = |source: RuntimeError| StartError::Runtime {
            node: name.clone(),
            source,
        };

        let state = self.cancel.run(self.runtime.container_state(&name)).await?;
        let state = state.map_err(err)?;
        if state != ContainerState::Missing {
            log::debug!("[{name}] Remove existing container ({state:?})");
            self.cancel
                .run(self.runtime.remove_container(&name))
                .await?
                .map_err(err)?;
        }

        let spec = ContainerSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            network: self.config.network.name.clone(),
            address: self.node.address,
            config_dir: self.config.node_config_dir(&name),
            mount_point: CONFIG_MOUNT.to_string(),
            privileged: self.config.privileged,
        };
        log::debug!("[{name}] Start container at {}", spec.address);
        self.cancel
            .run(self.runtime.run_container(&spec))
            .await?
            .map_err(err)?;

        self.wait_ready().await
    }

    /// Poll the shell until the daemons answer, or until the ready timeout elapses. Fails as soon
    /// as the container is no longer running.
    pub(crate) async fn wait_ready(&self) -> Result<Readiness, StartError> {
        let timeouts = &self.config.timeouts;
        let start = Instant::now();
        loop {
            let reason = match self.cancel.run(self.vtysh.version()).await? {
                Ok(_) => {
                    log::debug!("[{}] ready after {:?}", self.name(), start.elapsed());
                    return Ok(Readiness::Ready);
                }
                Err(e) => e.to_string(),
            };
            match self
                .cancel
                .run(self.runtime.container_state(self.name()))
                .await?
            {
                Ok(ContainerState::Running) => {}
                Ok(state) => {
                    return Err(StartError::Exited {
                        node: self.name().to_string(),
                        state,
                    })
                }
                Err(e) => log::debug!("[{}] Cannot get the container state: {e}", self.name()),
            }
            if start.elapsed() >= timeouts.ready() {
                log::warn!(
                    "[{}] not ready after {:?}: {reason}",
                    self.name(),
                    timeouts.ready()
                );
                return Ok(Readiness::Degraded(reason));
            }
            log::trace!("[{}] not yet ready: {reason}", self.name());
            self.cancel.sleep(timeouts.poll_interval()).await?;
        }
    }
}

impl<S> Lab<S> {
    /// Get the handle to a node.
    pub(crate) fn handle(&self, node: &str) -> Result<NodeHandle, LabError> {
        let n = self
            .topo
            .node(node)
            .ok_or_else(|| LabError::UnknownNode(node.to_string()))?;
        let cli_lock = self
            .cli_locks
            .get(node)
            .ok_or_else(|| LabError::UnknownNode(node.to_string()))?;
        Ok(NodeHandle {
            node: n.clone(),
            vtysh: self.vtysh(node),
            runtime: self.runtime.clone(),
            config: self.config.clone(),
            cli_lock: cli_lock.clone(),
            cancel: self.cancel.clone(),
        })
    }

    /// Get a handle to the shell of a router. This does not check that the router is running.
    pub fn vtysh(&self, node: &str) -> Vtysh {
        Vtysh::new(node, self.runtime.clone())
    }
}

impl Lab<Active> {
    /// Create the container network if it does not exist yet.
    pub async fn ensure_network(&self) -> Result<(), LabError> {
        let name = &self.config.network.name;
        if self.cancel.run(self.runtime.network_exists(name)).await?? {
            log::debug!("[{name}] network already exists");
            return Ok(());
        }
        log::info!("[{name}] Create network {}", self.topo.subnet());
        self.cancel
            .run(
                self.runtime
                    .create_network(name, self.topo.subnet(), self.topo.gateway()),
            )
            .await??;
        Ok(())
    }

    /// Start a single router with the configuration in its configuration directory (see
    /// [`Lab::render`]). An existing container with the same name is removed first. After the
    /// container is started, this function waits until the daemons accept commands. If they do
    /// not within the ready timeout, the result is [`Readiness::Degraded`].
    pub async fn start(&mut self, node: &str) -> Result<Readiness, StartError> {
        let handle = self
            .handle(node)
            .map_err(|_| StartError::UnknownNode(node.to_string()))?;
        self.ensure_network()
            .await
            .map_err(|e| StartError::Network(e.to_string()))?;
        let result = handle.start().await;
        log_start(node, &result);
        result
    }

    /// Start all routers concurrently. The failure of a router does not affect the others. This
    /// function only fails if the network cannot be created.
    pub async fn start_all(
        &mut self,
    ) -> Result<BTreeMap<String, Result<Readiness, StartError>>, LabError> {
        log::info!("Start all routers");
        self.ensure_network().await?;

        let jobs = self
            .topo
            .nodes()
            .map(|n| self.handle(&n.name))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|h| (h.name().to_string(), tokio::spawn(h.start())))
            .collect::<Vec<(String, JoinHandle<Result<Readiness, StartError>>)>>();

        let mut result = BTreeMap::new();
        for (node, job) in jobs {
            let r = job.await?;
            log_start(&node, &r);
            result.insert(node, r);
        }
        Ok(result)
    }

    /// Stop and remove a single router. Stopping a router that does not run is not an error.
    pub async fn stop(&mut self, node: &str) -> Result<(), LabError> {
        if self.topo.node(node).is_none() {
            return Err(LabError::UnknownNode(node.to_string()));
        }
        log::debug!("[{node}] Stop container");
        self.cancel.run(self.runtime.remove_container(node)).await??;
        Ok(())
    }

    /// Remove all routers and the network. Missing routers or a missing network are not an
    /// error. All parts are removed even if removing one of them fails, in which case the first
    /// error is returned.
    pub async fn teardown(&mut self) -> Result<(), LabError> {
        log::info!("Teardown the lab");

        let jobs = self
            .topo
            .nodes()
            .map(|n| {
                let runtime = self.runtime.clone();
                let cancel = self.cancel.clone();
                let name = n.name.clone();
                (
                    n.name.clone(),
                    tokio::spawn(async move { cancel.run(runtime.remove_container(&name)).await }),
                )
            })
            .collect::<Vec<_>>();

        let mut first_err: Option<LabError> = None;
        for (node, job) in jobs {
            match job.await? {
                Ok(Ok(())) => log::debug!("[{node}] removed"),
                Ok(Err(e)) => {
                    log::error!("[{node}] Cannot remove the container: {e}");
                    first_err.get_or_insert(e.into());
                }
                Err(e) => {
                    first_err.get_or_insert(e.into());
                }
            }
        }

        // containers on the network that are not part of the topology prevent its removal.
        let network = &self.config.network.name;
        if let Ok(Ok(remaining)) = self
            .cancel
            .run(self.runtime.list_containers(network))
            .await
        {
            if !remaining.is_empty() {
                log::warn!(
                    "[{network}] Containers still attached to the network: {}",
                    remaining.join(", ")
                );
            }
        }

        if let Err(e) = self
            .cancel
            .run(self.runtime.remove_network(network))
            .await
            .map_err(LabError::from)
            .and_then(|r| r.map_err(LabError::from))
        {
            log::error!("[{network}] Cannot remove the network: {e}");
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn log_start(node: &str, result: &Result<Readiness, StartError>) {
    match result {
        Ok(Readiness::Ready) => log::info!("[{node}] started"),
        Ok(r) => log::warn!("[{node}] started, but {r}"),
        Err(e) => log::error!("[{node}] Cannot start: {e}"),
    }
}

/// Error while starting a router. It only affects that router.
#[derive(Debug, Error)]
pub enum StartError {
    /// The node is not part of the topology.
    #[error("Node {0} is not part of the topology")]
    UnknownNode(String),
    /// The network could not be created.
    #[error("Cannot create the network: {0}")]
    Network(String),
    /// The container runtime failed.
    #[error("[{node}] {source}")]
    Runtime {
        /// Name of the node
        node: String,
        /// Underlying error
        source: RuntimeError,
    },
    /// The container stopped before its daemons answered.
    #[error("[{node}] Container exited while starting ({state:?})")]
    Exited {
        /// Name of the node
        node: String,
        /// State of the container after it exited
        state: ContainerState,
    },
    /// The operation was cancelled.
    #[error("{0}")]
    Cancelled(#[from] Cancelled),
}

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

//! Establish the BGP sessions on running routers.
//!
//! The startup configuration already declares all neighbors, but a router might have been
//! started with an older configuration, or a session might have been broken by hand (or by an
//! attack). The session configurator therefore brings every node into the declared state using
//! "ensure" semantics: a neighbor is only declared if it is missing, a neighbor with a wrong AS
//! number is removed and declared again, and all remaining properties are set-style commands that
//! can be repeated without effect. Running the configurator twice yields the same state.
//!
//! Each node is configured while holding its CLI lock, so command streams to the same node never
//! interleave. Different nodes are configured concurrently. After configuring, the configurator
//! waits until the sessions are established, or until the session timeout elapses. A session that
//! is not established in time is reported as [`SessionOutcome::Degraded`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    net::Ipv4Addr,
};

use frr_cfg::{RouterBgp, RouterBgpNeighbor};
use itertools::Itertools;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};

use super::{bgp::BgpNeighbor, NodeHandle, VtyshError};
use crate::{
    cancel::Cancelled,
    export::{bgp_base, neighbor_config, neighbor_description},
    topology::{AsNode, PeerRelation},
    Active, Lab, LabError,
};

/// Commands that bring a node into the declared state.
#[derive(Debug, Clone)]
pub struct EnsurePlan {
    /// The BGP configuration that must be applied.
    pub config: RouterBgp,
    /// Neighbors that were declared or repaired by this plan.
    pub changed: BTreeSet<Ipv4Addr>,
}

impl EnsurePlan {
    /// Compute the commands required to bring `node` into the declared state, given its current
    /// neighbors (from `show bgp neighbors json`).
    ///
    /// - A missing neighbor is declared.
    /// - A neighbor with the wrong AS number is removed and declared again.
    /// - A neighbor with the correct AS number is not declared again.
    ///
    /// Description, activation, the policy knobs and the advertised prefix are always
    /// re-asserted. Neighbors that are not part of the topology are left untouched.
    pub fn new(
        node: &AsNode,
        peers: &[(&AsNode, PeerRelation)],
        current: &BTreeMap<Ipv4Addr, BgpNeighbor>,
    ) -> Self {
        let mut config = bgp_base(node);
        let mut changed = BTreeSet::new();
        for (sibling, relation) in peers {
            match current.get(&sibling.address) {
                None => {
                    config.neighbor(neighbor_config(sibling, *relation));
                    changed.insert(sibling.address);
                }
                Some(n) if n.remote_as != sibling.asn => {
                    log::warn!(
                        "[{}] neighbor {} has {}, but {} is declared. Repair it",
                        node.name,
                        sibling.address,
                        n.remote_as,
                        sibling.asn
                    );
                    config
                        .no_neighbor(RouterBgpNeighbor::new(sibling.address))
                        .neighbor(neighbor_config(sibling, *relation));
                    changed.insert(sibling.address);
                }
                Some(_) => {
                    config.neighbor(
                        RouterBgpNeighbor::new(sibling.address)
                            .description(neighbor_description(sibling, *relation))
                            .activate(),
                    );
                }
            }
        }
        for stale in current.keys().filter(|a| !peers.iter().any(|(s, _)| s.address == **a)) {
            log::debug!("[{}] neighbor {stale} is not part of the topology", node.name);
        }
        Self { config, changed }
    }
}

/// Result of establishing one side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The session is established.
    Established,
    /// The session was configured, but did not become established in time. The reason contains
    /// the last observed state.
    Degraded(String),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Established => f.write_str("established"),
            SessionOutcome::Degraded(reason) => write!(f, "degraded ({reason})"),
        }
    }
}

/// Result of one side of a session, i.e., of one node towards one sibling.
#[derive(Debug)]
pub struct SideReport {
    /// The configured node
    pub node: String,
    /// The sibling
    pub sibling: String,
    /// Whether the neighbor was declared or repaired in this run.
    pub changed: bool,
    /// Outcome
    pub outcome: Result<SessionOutcome, SessionError>,
}

/// Result of configuring all sessions.
#[derive(Debug, Default)]
pub struct PeeringReport {
    /// One entry per node and sibling, sorted by node and sibling.
    pub sides: Vec<SideReport>,
}

impl PeeringReport {
    /// Number of sides that are established.
    pub fn established(&self) -> usize {
        self.sides
            .iter()
            .filter(|s| matches!(s.outcome, Ok(SessionOutcome::Established)))
            .count()
    }

    /// Number of sides that were declared or repaired.
    pub fn changed(&self) -> usize {
        self.sides.iter().filter(|s| s.changed).count()
    }

    /// Whether every side is established.
    pub fn is_complete(&self) -> bool {
        self.established() == self.sides.len()
    }

    /// Get the report of `node` towards `sibling`.
    pub fn side(&self, node: &str, sibling: &str) -> Option<&SideReport> {
        self.sides
            .iter()
            .find(|s| s.node == node && s.sibling == sibling)
    }
}

impl fmt::Display for PeeringReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in self.sides.iter() {
            write!(f, "{} -> {}: ", s.node, s.sibling)?;
            match &s.outcome {
                Ok(o) => write!(f, "{o}")?,
                Err(e) => write!(f, "error ({e})")?,
            }
            if s.changed {
                f.write_str(" [changed]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Lab<Active> {
    /// Configure the sessions of all nodes, and wait until they are established. Failures are
    /// reported per session, and never affect other nodes. See the [module-level
    /// documentation](self).
    pub async fn configure_sessions(&mut self) -> Result<PeeringReport, LabError> {
        log::info!("Configure all sessions");

        let mut jobs: Vec<(String, Vec<String>, JoinHandle<_>)> = Vec::new();
        for node in self.topo.nodes() {
            let handle = self.handle(&node.name)?;
            let mut peers = Vec::new();
            let mut names = Vec::new();
            for (sibling, relation) in self.topo.peers_of(&node.name) {
                names.push(sibling.to_string());
                let s = self
                    .topo
                    .node(sibling)
                    .ok_or_else(|| LabError::UnknownNode(sibling.to_string()))?;
                peers.push((s.clone(), relation));
            }
            if peers.is_empty() {
                continue;
            }
            jobs.push((
                node.name.clone(),
                names,
                tokio::spawn(configure_node(handle, peers)),
            ));
        }

        let mut report = PeeringReport::default();
        for (node, names, job) in jobs {
            match job.await? {
                Ok(sides) => report.sides.extend(sides),
                Err(SessionError::Cancelled(c)) => {
                    log::warn!("[{node}] Session configuration cancelled");
                    return Err(LabError::Cancelled(c));
                }
                Err(e) => {
                    log::error!("[{node}] Cannot configure sessions: {e}");
                    let msg = e.to_string();
                    report.sides.extend(names.into_iter().map(|sibling| SideReport {
                        node: node.clone(),
                        sibling,
                        changed: false,
                        outcome: Err(SessionError::Node(msg.clone())),
                    }));
                }
            }
        }
        report
            .sides
            .sort_by(|a, b| (&a.node, &a.sibling).cmp(&(&b.node, &b.sibling)));

        log::info!(
            "{} of {} session sides established ({} changed)",
            report.established(),
            report.sides.len(),
            report.changed()
        );
        Ok(report)
    }
}

/// Configure all sessions of a single node, and wait until they are established.
async fn configure_node(
    handle: NodeHandle,
    peers: Vec<(AsNode, PeerRelation)>,
) -> Result<Vec<SideReport>, SessionError> {
    let name = handle.name().to_string();
    let cancel = handle.cancel.clone();

    let changed = {
        let _guard = cancel.run(handle.cli_lock.lock()).await?;

        let current = cancel.run(handle.vtysh.bgp_neighbors()).await??;
        let peer_refs = peers.iter().map(|(n, r)| (n, *r)).collect::<Vec<_>>();
        let plan = EnsurePlan::new(&handle.node, &peer_refs, &current);

        cancel
            .run(handle.vtysh.configure(plan.config.build()))
            .await??;

        for addr in plan.changed.iter().copied() {
            // a refresh is rejected while the session is still down.
            if let Err(e) = cancel.run(handle.vtysh.refresh_routes(addr)).await? {
                log::debug!("[{name}] Cannot refresh routes of {addr}: {e}");
            }
        }
        if !plan.changed.is_empty() {
            log::debug!(
                "[{name}] changed neighbors: {}",
                plan.changed.iter().join(", ")
            );
        }
        plan.changed
    };

    let outcomes = wait_established(&handle, &peers).await?;

    Ok(peers
        .iter()
        .zip(outcomes)
        .map(|((sibling, _), outcome)| SideReport {
            node: name.clone(),
            sibling: sibling.name.clone(),
            changed: changed.contains(&sibling.address),
            outcome,
        })
        .collect())
}

/// Poll the neighbors of the node until all sessions are established, or until the session
/// timeout elapses. The outcome is returned in the order of `peers`.
async fn wait_established(
    handle: &NodeHandle,
    peers: &[(AsNode, PeerRelation)],
) -> Result<Vec<Result<SessionOutcome, SessionError>>, Cancelled> {
    let timeouts = &handle.config.timeouts;
    let start = Instant::now();
    loop {
        let observed = handle.cancel.run(handle.vtysh.bgp_neighbors()).await?;
        let timed_out = start.elapsed() >= timeouts.session();
        match observed {
            Ok(current) => {
                let states = peers
                    .iter()
                    .map(|(s, _)| current.get(&s.address))
                    .collect::<Vec<_>>();
                if states
                    .iter()
                    .all(|n| n.map(|n| n.state.is_established()).unwrap_or(false))
                {
                    log::debug!(
                        "[{}] all sessions established after {:?}",
                        handle.name(),
                        start.elapsed()
                    );
                    return Ok(peers.iter().map(|_| Ok(SessionOutcome::Established)).collect());
                }
                if timed_out {
                    return Ok(peers
                        .iter()
                        .zip(states)
                        .map(|((s, _), n)| match n {
                            Some(n) if n.state.is_established() => Ok(SessionOutcome::Established),
                            Some(n) => {
                                log::warn!(
                                    "[{}] session with {} is {} after {:?}",
                                    handle.name(),
                                    s.name,
                                    n.state,
                                    timeouts.session()
                                );
                                Ok(SessionOutcome::Degraded(format!("state {}", n.state)))
                            }
                            None => {
                                log::warn!(
                                    "[{}] neighbor {} is not configured",
                                    handle.name(),
                                    s.name
                                );
                                Ok(SessionOutcome::Degraded(String::from("not configured")))
                            }
                        })
                        .collect());
                }
            }
            Err(e) if timed_out => {
                log::warn!("[{}] Cannot read the session state: {e}", handle.name());
                let msg = e.to_string();
                return Ok(peers
                    .iter()
                    .map(|_| Err(SessionError::Node(msg.clone())))
                    .collect());
            }
            Err(e) => log::trace!("[{}] Cannot read the session state: {e}", handle.name()),
        }
        handle.cancel.sleep(timeouts.poll_interval()).await?;
    }
}

/// Error while configuring a session. It only affects the sessions of that node.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The shell of the node failed or rejected the configuration.
    #[error("{0}")]
    Vtysh(#[from] VtyshError),
    /// Configuring the node failed. The message is the original error.
    #[error("{0}")]
    Node(String),
    /// The operation was cancelled.
    #[error("{0}")]
    Cancelled(#[from] Cancelled),
}

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

//! Observe the control-plane state of the routers.
//!
//! The verifier only issues `show` commands and never takes the CLI lock of a node. A node that
//! is not running, or whose daemons do not answer, is a regular (reportable) state.

use std::{
    collections::BTreeMap,
    fmt,
    net::Ipv4Addr,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    docker::{ContainerState, RuntimeError},
    router::{BgpNeighbor, BgpRoute, BgpState, NodeHandle, VtyshError},
    topology::{AsId, AsNode, PeerRelation},
    Lab, LabError,
};

/// Whether a node can be queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum Reachability {
    /// There is no running container for the node.
    NotRunning,
    /// The container runs, but the routing daemons do not answer.
    DaemonUnresponsive(String),
    /// The routing daemons answer.
    Responsive,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::NotRunning => f.write_str("not running"),
            Reachability::DaemonUnresponsive(_) => f.write_str("unresponsive"),
            Reachability::Responsive => f.write_str("responsive"),
        }
    }
}

/// Observable state of one side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBucket {
    /// The neighbor is not configured on the node (or the node cannot be queried).
    NotConfigured,
    /// The neighbor is configured, but the session is not established.
    NotEstablished,
    /// The session is established.
    Established,
}

impl SessionBucket {
    /// Classify an observed neighbor.
    pub fn of(neighbor: Option<&BgpNeighbor>) -> Self {
        match neighbor.map(|n| &n.state) {
            None => Self::NotConfigured,
            Some(BgpState::Established) => Self::Established,
            Some(_) => Self::NotEstablished,
        }
    }
}

impl fmt::Display for SessionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionBucket::NotConfigured => "not configured",
            SessionBucket::NotEstablished => "not established",
            SessionBucket::Established => "established",
        })
    }
}

/// Observed state of a declared neighbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborStatus {
    /// Name of the sibling
    pub sibling: String,
    /// Address of the sibling
    pub address: Ipv4Addr,
    /// Relation of the sibling from the point of view of the node
    pub relation: PeerRelation,
    /// State reported by the router, if the neighbor is configured.
    pub state: Option<BgpState>,
    /// Observable bucket
    pub bucket: SessionBucket,
    /// Number of prefixes received from the sibling
    pub prefixes_received: u64,
}

/// Observed state of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// Name of the node
    pub name: String,
    /// AS number of the node
    pub asn: AsId,
    /// Whether the node can be queried
    pub reachability: Reachability,
    /// Number of declared neighbors whose session is established.
    pub established: usize,
    /// Number of declared neighbors that are configured on the node.
    pub configured: usize,
    /// Number of prefixes with a best route.
    pub routes: usize,
    /// Number of prefixes whose best route was learned from a neighbor.
    pub learned: usize,
    /// State of every declared neighbor.
    pub neighbors: Vec<NeighborStatus>,
    /// Neighbors configured on the node that are not part of the topology.
    pub undeclared_neighbors: Vec<Ipv4Addr>,
    /// Error while reading the state, if any.
    pub error: Option<String>,
}

impl NodeStatus {
    fn new(node: &AsNode, reachability: Reachability) -> Self {
        Self {
            name: node.name.clone(),
            asn: node.asn,
            reachability,
            established: 0,
            configured: 0,
            routes: 0,
            learned: 0,
            neighbors: Vec::new(),
            undeclared_neighbors: Vec::new(),
            error: None,
        }
    }

    /// Get the bucket of the session towards `sibling`.
    pub fn bucket(&self, sibling: &str) -> SessionBucket {
        self.neighbors
            .iter()
            .find(|n| n.sibling == sibling)
            .map(|n| n.bucket)
            .unwrap_or(SessionBucket::NotConfigured)
    }
}

/// Observed state of a peering edge, once from each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeStatus {
    /// First endpoint
    pub a: String,
    /// Second endpoint
    pub b: String,
    /// State observed at `a`
    pub a_side: SessionBucket,
    /// State observed at `b`
    pub b_side: SessionBucket,
}

impl EdgeStatus {
    /// Whether the session is established on both sides.
    pub fn is_established(&self) -> bool {
        self.a_side == SessionBucket::Established && self.b_side == SessionBucket::Established
    }
}

/// Status of the entire lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Status of every node, sorted by name.
    pub nodes: Vec<NodeStatus>,
    /// Status of every edge, in the order of declaration.
    pub edges: Vec<EdgeStatus>,
    /// Prefixes advertised by multiple nodes.
    pub overlapping_prefixes: BTreeMap<Ipv4Net, Vec<String>>,
}

impl StatusReport {
    /// Number of sessions (logical edges) that are established on both sides.
    pub fn established_sessions(&self) -> usize {
        self.edges.iter().filter(|e| e.is_established()).count()
    }

    /// Number of established neighbor states, summed over all nodes.
    pub fn established_sides(&self) -> usize {
        self.nodes.iter().map(|n| n.established).sum()
    }

    /// Get the status of a node.
    pub fn node(&self, name: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Whether every node is responsive and every session is established.
    pub fn is_healthy(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.reachability == Reachability::Responsive)
            && self.established_sessions() == self.edges.len()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:<10} {:<14} {:>11} {:>7} {:>8}",
            "node", "asn", "state", "established", "routes", "learned"
        )?;
        for n in self.nodes.iter() {
            writeln!(
                f,
                "{:<12} {:<10} {:<14} {:>11} {:>7} {:>8}",
                n.name,
                n.asn.0,
                n.reachability.to_string(),
                format!("{}/{}", n.established, n.neighbors.len()),
                n.routes,
                n.learned
            )?;
            if let Reachability::DaemonUnresponsive(reason) = &n.reachability {
                writeln!(f, "    {reason}")?;
            }
            if let Some(e) = n.error.as_ref() {
                writeln!(f, "    error: {e}")?;
            }
        }
        writeln!(f)?;
        for e in self.edges.iter() {
            writeln!(
                f,
                "{} -- {}: {} / {}",
                e.a, e.b, e.a_side, e.b_side
            )?;
        }
        writeln!(
            f,
            "\n{} of {} sessions established",
            self.established_sessions(),
            self.edges.len()
        )?;
        for (prefix, origins) in self.overlapping_prefixes.iter() {
            writeln!(f, "{prefix} is advertised by {}", origins.iter().join(", "))?;
        }
        Ok(())
    }
}

impl<S> Lab<S> {
    /// Observe the state of all nodes concurrently. Nodes that are not running or whose daemons
    /// do not answer are reported as such. This function only fails if it is cancelled.
    pub async fn status(&self) -> Result<StatusReport, LabError> {
        let jobs = self
            .topo
            .nodes()
            .map(|n| {
                let handle = self.handle(&n.name)?;
                let peers = self
                    .topo
                    .peers_of(&n.name)
                    .filter_map(|(s, r)| Some((self.topo.node(s)?.clone(), r)))
                    .collect::<Vec<_>>();
                Ok(tokio::spawn(node_status(handle, peers)))
            })
            .collect::<Result<Vec<JoinHandle<_>>, LabError>>()?;

        let mut nodes = Vec::new();
        for job in jobs {
            nodes.push(job.await??);
        }

        let edges = self
            .topo
            .edges()
            .iter()
            .map(|e| {
                let side = |node: &str, sibling: &str| {
                    nodes
                        .iter()
                        .find(|n: &&NodeStatus| n.name == node)
                        .map(|n| n.bucket(sibling))
                        .unwrap_or(SessionBucket::NotConfigured)
                };
                EdgeStatus {
                    a: e.a.clone(),
                    b: e.b.clone(),
                    a_side: side(&e.a, &e.b),
                    b_side: side(&e.b, &e.a),
                }
            })
            .collect();

        Ok(StatusReport {
            nodes,
            edges,
            overlapping_prefixes: self.topo.overlapping_prefixes(),
        })
    }

    /// Get the BGP table of a node. If `prefix` is given, only routes for that prefix are
    /// returned.
    pub async fn routes(
        &self,
        node: &str,
        prefix: Option<Ipv4Net>,
    ) -> Result<Vec<BgpRoute>, LabError> {
        let handle = self.handle(node)?;
        let table = self
            .cancel
            .run(handle.vtysh.bgp_routes())
            .await?
            .map_err(VerificationError::from)?;
        Ok(table
            .into_iter()
            .filter(|(net, _)| prefix.map(|p| p == *net).unwrap_or(true))
            .flat_map(|(_, routes)| routes)
            .collect())
    }

    /// List all nodes of the topology that have no running container.
    pub async fn missing_nodes(&self) -> Result<Vec<String>, LabError> {
        let mut missing = Vec::new();
        for node in self.topo.nodes() {
            let state = self
                .cancel
                .run(self.runtime.container_state(&node.name))
                .await?
                .map_err(VerificationError::from)?;
            if state != ContainerState::Running {
                missing.push(node.name.clone());
            }
        }
        Ok(missing)
    }
}

/// Observe the state of a single node.
async fn node_status(
    handle: NodeHandle,
    peers: Vec<(AsNode, PeerRelation)>,
) -> Result<NodeStatus, crate::cancel::Cancelled> {
    let cancel = handle.cancel.clone();

    let state = match cancel.run(handle.runtime.container_state(handle.name())).await? {
        Ok(s) => s,
        Err(e) => {
            let e = VerificationError::from(e);
            log::warn!("[{}] {e}", handle.name());
            let mut status = NodeStatus::new(&handle.node, Reachability::NotRunning);
            status.error = Some(e.to_string());
            return Ok(status);
        }
    };
    if state != ContainerState::Running {
        log::debug!("[{}] not running ({state:?})", handle.name());
        return Ok(NodeStatus::new(&handle.node, Reachability::NotRunning));
    }

    let neighbors = match cancel.run(handle.vtysh.bgp_neighbors()).await? {
        Ok(n) => n,
        Err(e) => {
            let e = VerificationError::from(e);
            log::debug!("[{}] unresponsive: {e}", handle.name());
            return Ok(NodeStatus::new(
                &handle.node,
                Reachability::DaemonUnresponsive(e.to_string()),
            ));
        }
    };

    let mut status = NodeStatus::new(&handle.node, Reachability::Responsive);
    for (sibling, relation) in peers.iter() {
        let n = neighbors.get(&sibling.address);
        status.neighbors.push(NeighborStatus {
            sibling: sibling.name.clone(),
            address: sibling.address,
            relation: *relation,
            state: n.map(|n| n.state.clone()),
            bucket: SessionBucket::of(n),
            prefixes_received: n.map(|n| n.prefixes_received).unwrap_or_default(),
        });
    }
    status.configured = status
        .neighbors
        .iter()
        .filter(|n| n.bucket != SessionBucket::NotConfigured)
        .count();
    status.established = status
        .neighbors
        .iter()
        .filter(|n| n.bucket == SessionBucket::Established)
        .count();
    status.undeclared_neighbors = neighbors
        .keys()
        .filter(|a| !peers.iter().any(|(s, _)| s.address == **a))
        .copied()
        .collect();

    match cancel.run(handle.vtysh.bgp_routes()).await? {
        Ok(table) => {
            let best = table
                .values()
                .filter_map(|routes| routes.iter().find(|r| r.best))
                .collect::<Vec<_>>();
            status.routes = best.len();
            status.learned = best.iter().filter(|r| r.is_learned()).count();
        }
        Err(e) => {
            let e = VerificationError::from(e);
            log::warn!("[{}] {e}", handle.name());
            status.error = Some(e.to_string());
        }
    }

    Ok(status)
}

/// Error while observing a node. It is always reported as part of the status, and only raised by
/// the direct queries ([`Lab::routes`] and [`Lab::missing_nodes`]).
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The container runtime failed.
    #[error("Cannot query the container runtime: {0}")]
    Runtime(#[from] RuntimeError),
    /// The shell failed.
    #[error("Cannot query the router: {0}")]
    Vtysh(#[from] VtyshError),
}

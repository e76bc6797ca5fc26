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

//! This module renders the startup configuration of every router.
//!
//! Every node gets its own directory (named after the node) containing three files:
//!
//! - `daemons`: which FRR daemons to start (only `bgpd` besides the always-running `zebra`
//!   and `staticd`),
//! - `vtysh.conf`: settings of the CLI front-end,
//! - `frr.conf`: the integrated routing configuration.
//!
//! The configuration is first rendered into a typed [`RenderedConfig`] and only serialized when
//! written. All neighbor statements are built from the sibling [`AsNode`] as declared in the
//! topology, so the AS number and address on both sides of a session always match. The same
//! helpers ([`bgp_base`] and [`neighbor_config`]) are used by the session configurator on the
//! running routers.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use frr_cfg::{
    Daemon, Daemons, FrrConf, LogTarget, RouterBgp, RouterBgpNeighbor, StaticRoute, VtyshConf,
};
use thiserror::Error;

use crate::topology::{AsNode, PeerRelation, Topology};

/// Name of the daemon manifest
pub const DAEMONS_FILE: &str = "daemons";
/// Name of the CLI front-end configuration
pub const VTYSH_FILE: &str = "vtysh.conf";
/// Name of the integrated routing configuration
pub const FRR_FILE: &str = "frr.conf";

/// Rendered configuration of a single node.
#[derive(Debug, Clone)]
pub struct RenderedConfig {
    node: String,
    daemons: Daemons,
    vtysh: VtyshConf,
    frr: FrrConf,
}

impl RenderedConfig {
    /// Name of the node
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The daemon manifest
    pub fn daemons(&self) -> &Daemons {
        &self.daemons
    }

    /// The CLI front-end settings
    pub fn vtysh(&self) -> &VtyshConf {
        &self.vtysh
    }

    /// The routing configuration
    pub fn frr(&self) -> &FrrConf {
        &self.frr
    }

    /// All BGP neighbors configured on this node.
    pub fn neighbors(&self) -> impl Iterator<Item = &RouterBgpNeighbor> {
        self.frr.get_bgp().into_iter().flat_map(|b| b.neighbors())
    }

    /// Serialize the configuration into `(file name, content)` pairs.
    pub fn files(&self) -> [(&'static str, String); 3] {
        [
            (DAEMONS_FILE, self.daemons.build()),
            (VTYSH_FILE, self.vtysh.build()),
            (FRR_FILE, self.frr.build()),
        ]
    }

    /// Write all files into `dir`, overwriting existing files.
    pub fn write(&self, dir: &Path) -> Result<(), GenerationError> {
        std::fs::create_dir_all(dir).map_err(|source| GenerationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for (name, content) in self.files() {
            let path = dir.join(name);
            std::fs::write(&path, content)
                .map_err(|source| GenerationError::Io { path, source })?;
        }
        Ok(())
    }
}

/// The BGP section of a node without any neighbors: router-id, the permissive policy knobs (so
/// that sessions exchange routes without route-maps, and the prefix is originated without a
/// matching IGP route), and the advertised prefix.
pub fn bgp_base(node: &AsNode) -> RouterBgp {
    let mut bgp = RouterBgp::new(node.asn);
    bgp.router_id(node.address)
        .ebgp_requires_policy(false)
        .network_import_check(false)
        .network(node.prefix);
    bgp
}

/// The neighbor statement for `sibling`, as seen from a node for which the sibling has the
/// given relation.
pub fn neighbor_config(sibling: &AsNode, relation: PeerRelation) -> RouterBgpNeighbor {
    let mut neighbor = RouterBgpNeighbor::new(sibling.address);
    neighbor
        .remote_as(sibling.asn)
        .description(neighbor_description(sibling, relation))
        .activate();
    neighbor
}

/// Description attached to a neighbor, e.g., `provider:as200`.
pub fn neighbor_description(sibling: &AsNode, relation: PeerRelation) -> String {
    format!("{relation}:{}", sibling.name)
}

/// Render the configuration of a single node.
pub fn render(topo: &Topology, node: &str) -> Result<RenderedConfig, GenerationError> {
    let n = topo
        .node(node)
        .ok_or_else(|| GenerationError::UnknownNode(node.to_string()))?;

    let mut bgp = bgp_base(n);
    for (sibling, relation) in topo.peers_of(node) {
        let s = topo
            .node(sibling)
            .ok_or_else(|| GenerationError::MissingSibling {
                node: node.to_string(),
                sibling: sibling.to_string(),
            })?;
        bgp.neighbor(neighbor_config(s, relation));
    }

    let mut frr = FrrConf::new(&n.name);
    frr.log(LogTarget::Stdout)
        .static_route(StaticRoute::new(n.prefix))
        .bgp(bgp);

    let mut daemons = Daemons::new();
    daemons.enable(Daemon::Bgpd);

    let mut vtysh = VtyshConf::new();
    vtysh.hostname(&n.name);

    Ok(RenderedConfig {
        node: n.name.clone(),
        daemons,
        vtysh,
        frr,
    })
}

/// Render the configuration of all nodes. Fails if any node cannot be rendered.
pub fn render_all(topo: &Topology) -> Result<BTreeMap<String, RenderedConfig>, GenerationError> {
    topo.nodes()
        .map(|n| Ok((n.name.clone(), render(topo, &n.name)?)))
        .collect()
}

/// Render the configuration of all nodes, and write each one into `<dir>/<node>/`. Rendering
/// happens before anything is written, so nothing is written if any node fails. Returns the
/// directory of each node.
pub fn write_all(
    topo: &Topology,
    dir: impl AsRef<Path>,
) -> Result<BTreeMap<String, PathBuf>, GenerationError> {
    let dir = dir.as_ref();
    let configs = render_all(topo)?;
    let mut result = BTreeMap::new();
    for (node, cfg) in configs {
        let node_dir = dir.join(&node);
        cfg.write(&node_dir)?;
        log::debug!("[{node}] Configuration written to {}", node_dir.display());
        result.insert(node, node_dir);
    }
    Ok(result)
}

/// Error thrown while generating the configuration.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The node is not part of the topology.
    #[error("Node {0} is not part of the topology")]
    UnknownNode(String),
    /// The data of a sibling is missing.
    #[error("Cannot configure {node}: the data of its sibling {sibling} is missing")]
    MissingSibling {
        /// Node that is rendered
        node: String,
        /// Sibling that is missing
        sibling: String,
    },
    /// Cannot write the configuration.
    #[error("Cannot write {path:?}: {source}")]
    Io {
        /// Path of the file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

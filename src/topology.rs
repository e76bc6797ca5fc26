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

//! The topology model: AS nodes, their addressing and the peering edges between them.
//!
//! A [`Topology`] can only be obtained through [`TopologyBuilder::build`] (or the TOML and
//! built-in constructors that use it), which guarantees that the topology is internally
//! consistent:
//!
//! - node names, ASNs and management addresses are unique,
//! - every management address is a host address of the simulation subnet (and not its gateway),
//! - every edge connects two distinct, declared nodes, and no two edges connect the same pair,
//! - the provider of a provider-customer edge is one of its endpoints,
//! - advertised prefixes are unique, unless the topology models a hijack. In that case, duplicate
//!   prefixes are the test condition and are reported by [`Topology::overlapping_prefixes`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    net::Ipv4Addr,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use frr_cfg::AsId;

/// Informational role of an AS within the scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Transit provider
    Transit,
    /// Settlement-free peer
    #[default]
    Peer,
    /// Stub customer
    Customer,
    /// AS that will be used to launch attacks.
    Attacker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Transit => "transit",
            Role::Peer => "peer",
            Role::Customer => "customer",
            Role::Attacker => "attacker",
        })
    }
}

/// A single Autonomous System, realized as one router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AsNode {
    /// Unique name, also used as container name and hostname (e.g., `as300`).
    pub name: String,
    /// Unique AS number.
    pub asn: AsId,
    /// Unique management address within the simulation subnet. It is used both as BGP router-id
    /// and as the session address.
    pub address: Ipv4Addr,
    /// Prefix advertised by this AS.
    pub prefix: Ipv4Net,
    /// Informational role of the AS.
    #[serde(default)]
    pub role: Role,
}

impl AsNode {
    /// Create a new node with the default role.
    pub fn new(
        name: impl Into<String>,
        asn: impl Into<AsId>,
        address: Ipv4Addr,
        prefix: Ipv4Net,
    ) -> Self {
        Self {
            name: name.into(),
            asn: asn.into(),
            address,
            prefix,
            role: Role::default(),
        }
    }

    /// Set the role of the node.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// The business relationship of a peering edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Relationship {
    /// The `provider` sells transit to the other endpoint.
    ProviderCustomer {
        /// Name of the provider.
        provider: String,
    },
    /// Settlement-free peering.
    PeerPeer,
}

/// What a sibling is, seen from one endpoint of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRelation {
    /// The sibling is our provider.
    Provider,
    /// The sibling is our customer.
    Customer,
    /// The sibling is a peer.
    Peer,
}

impl fmt::Display for PeerRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeerRelation::Provider => "provider",
            PeerRelation::Customer => "customer",
            PeerRelation::Peer => "peer",
        })
    }
}

/// An unordered pair of nodes that establish a BGP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeringEdge {
    /// First endpoint
    pub a: String,
    /// Second endpoint
    pub b: String,
    /// Relationship between both endpoints
    pub kind: Relationship,
}

impl PeeringEdge {
    /// Create a settlement-free peering edge.
    pub fn peer(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            kind: Relationship::PeerPeer,
        }
    }

    /// Create a provider-customer edge.
    pub fn provider_customer(provider: impl Into<String>, customer: impl Into<String>) -> Self {
        let provider = provider.into();
        Self {
            a: provider.clone(),
            b: customer.into(),
            kind: Relationship::ProviderCustomer { provider },
        }
    }

    /// Check if `node` is one of the endpoints.
    pub fn touches(&self, node: &str) -> bool {
        self.a == node || self.b == node
    }

    /// Get the other endpoint, if `node` is one of the endpoints.
    pub fn sibling(&self, node: &str) -> Option<&str> {
        if self.a == node {
            Some(&self.b)
        } else if self.b == node {
            Some(&self.a)
        } else {
            None
        }
    }

    /// What the sibling of `node` is from the point of view of `node`. Returns `None` if `node` is
    /// not an endpoint.
    pub fn relation_from(&self, node: &str) -> Option<PeerRelation> {
        let sibling = self.sibling(node)?;
        Some(match &self.kind {
            Relationship::PeerPeer => PeerRelation::Peer,
            Relationship::ProviderCustomer { provider } if provider == sibling => {
                PeerRelation::Provider
            }
            Relationship::ProviderCustomer { .. } => PeerRelation::Customer,
        })
    }

    /// Key of the unordered pair, used to detect duplicate edges.
    fn key(&self) -> (&str, &str) {
        if self.a <= self.b {
            (&self.a, &self.b)
        } else {
            (&self.b, &self.a)
        }
    }
}

/// A validated topology. See the [module-level documentation](self) for the invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    subnet: Ipv4Net,
    gateway: Option<Ipv4Addr>,
    models_hijack: bool,
    nodes: BTreeMap<String, AsNode>,
    edges: Vec<PeeringEdge>,
}

impl Topology {
    /// Create a new builder.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// The simulation subnet that contains all management addresses.
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// The gateway of the simulation subnet, if it is fixed by the scenario.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    /// Whether this topology intentionally advertises the same prefix from multiple nodes.
    pub fn models_hijack(&self) -> bool {
        self.models_hijack
    }

    /// Iterate over all nodes, sorted by name.
    pub fn nodes(&self) -> impl Iterator<Item = &AsNode> {
        self.nodes.values()
    }

    /// Get a node by its name.
    pub fn node(&self, name: &str) -> Option<&AsNode> {
        self.nodes.get(name)
    }

    /// Get all edges in the order of their declaration.
    pub fn edges(&self) -> &[PeeringEdge] {
        &self.edges
    }

    /// Get all edges that touch the given node.
    pub fn edges_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PeeringEdge> + 'a {
        self.edges.iter().filter(move |e| e.touches(name))
    }

    /// Get the name of every sibling of the given node, together with the relation of that sibling
    /// as seen from `name`. The sibling is not resolved, such that callers can report missing
    /// nodes themselves.
    pub fn peers_of<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a str, PeerRelation)> + 'a {
        self.edges_of(name).filter_map(move |e| {
            let sibling = e.sibling(name)?;
            Some((sibling, e.relation_from(name)?))
        })
    }

    /// All prefixes that are advertised by more than one node, with the names of those nodes.
    pub fn overlapping_prefixes(&self) -> BTreeMap<Ipv4Net, Vec<String>> {
        let mut origins: BTreeMap<Ipv4Net, Vec<String>> = BTreeMap::new();
        for n in self.nodes.values() {
            origins.entry(n.prefix).or_default().push(n.name.clone());
        }
        origins.retain(|_, v| v.len() > 1);
        origins
    }

    /// Parse and validate a topology from a TOML scenario file.
    ///
    /// ```toml
    /// subnet = "172.20.0.0/16"
    /// gateway = "172.20.0.1"
    /// models_hijack = false
    ///
    /// [[node]]
    /// name = "as100"
    /// asn = 65100
    /// address = "172.20.0.10"
    /// prefix = "10.1.0.0/24"
    /// role = "customer"
    ///
    /// [[edge]]
    /// a = "as100"
    /// b = "as200"
    /// provider = "as200"
    /// ```
    pub fn from_toml(s: &str) -> Result<Self, ValidationError> {
        let scenario: ScenarioFile = toml::from_str(s)?;
        let mut builder = Topology::builder();
        if let Some(subnet) = scenario.subnet {
            builder.subnet(subnet);
        }
        builder.gateway(scenario.gateway);
        builder.models_hijack(scenario.models_hijack);
        for node in scenario.node {
            builder.node(node);
        }
        for edge in scenario.edge {
            builder.edge(match edge.provider {
                Some(provider) => PeeringEdge {
                    a: edge.a,
                    b: edge.b,
                    kind: Relationship::ProviderCustomer { provider },
                },
                None => PeeringEdge::peer(edge.a, edge.b),
            });
        }
        builder.build()
    }

    /// The default scenario with five Autonomous Systems. AS200 is a transit provider for AS100
    /// and AS300, and peers with AS400. AS300 is the provider of AS500, which is the attacker.
    /// AS300 originates `8.8.8.0/24`, the prefix that is typically hijacked.
    ///
    /// ```text
    ///            as400
    ///              |
    ///   as100 -- as200 -- as300 -- as500
    /// ```
    pub fn netsec_default() -> Self {
        let node = |i: u8, prefix: &str, role: Role| {
            AsNode {
                name: format!("as{}", i as u32 * 100),
                asn: AsId(65000 + i as u32 * 100),
                address: Ipv4Addr::new(172, 20, 0, i * 10),
                prefix: prefix.parse().unwrap_or_else(|_| unreachable!()),
                role,
            }
        };
        let mut builder = Topology::builder();
        builder
            .node(node(1, "10.1.0.0/24", Role::Customer))
            .node(node(2, "10.2.0.0/24", Role::Transit))
            .node(node(3, "8.8.8.0/24", Role::Customer))
            .node(node(4, "10.4.0.0/24", Role::Peer))
            .node(node(5, "10.5.0.0/24", Role::Attacker))
            .edge(PeeringEdge::provider_customer("as200", "as100"))
            .edge(PeeringEdge::provider_customer("as200", "as300"))
            .edge(PeeringEdge::peer("as200", "as400"))
            .edge(PeeringEdge::provider_customer("as300", "as500"));
        builder
            .build()
            .unwrap_or_else(|e| unreachable!("the default topology is valid: {e}"))
    }

    /// Build a topology without validating it.
    #[cfg(test)]
    pub(crate) fn unchecked(nodes: Vec<AsNode>, edges: Vec<PeeringEdge>) -> Self {
        Self {
            subnet: DEFAULT_SUBNET.parse().unwrap(),
            gateway: None,
            models_hijack: false,
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            edges,
        }
    }
}

/// The default simulation subnet.
pub const DEFAULT_SUBNET: &str = "172.20.0.0/16";

/// Builder for a [`Topology`].
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    subnet: Option<Ipv4Net>,
    gateway: Option<Ipv4Addr>,
    models_hijack: bool,
    nodes: Vec<AsNode>,
    edges: Vec<PeeringEdge>,
}

impl TopologyBuilder {
    /// Set the simulation subnet. By default, this is `172.20.0.0/16`.
    pub fn subnet(&mut self, subnet: Ipv4Net) -> &mut Self {
        self.subnet = Some(subnet.trunc());
        self
    }

    /// Fix the gateway of the simulation subnet. No node may use this address.
    pub fn gateway(&mut self, gateway: Option<Ipv4Addr>) -> &mut Self {
        self.gateway = gateway;
        self
    }

    /// Declare that this topology models a hijack, i.e., that multiple nodes may advertise the
    /// same prefix.
    pub fn models_hijack(&mut self, hijack: bool) -> &mut Self {
        self.models_hijack = hijack;
        self
    }

    /// Declare a node.
    pub fn node(&mut self, node: AsNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Declare an edge.
    pub fn edge(&mut self, edge: PeeringEdge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    /// Validate the declarations and build the topology.
    pub fn build(&self) -> Result<Topology, ValidationError> {
        lazy_static! {
            static ref NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap();
        }

        let subnet = match self.subnet {
            Some(s) => s,
            None => DEFAULT_SUBNET.parse()?,
        };
        if let Some(gateway) = self.gateway {
            if !subnet.contains(&gateway) {
                return Err(ValidationError::GatewayOutsideSubnet { gateway, subnet });
            }
        }

        let mut nodes: BTreeMap<String, AsNode> = BTreeMap::new();
        let mut asns: HashMap<AsId, &str> = HashMap::new();
        let mut addrs: HashMap<Ipv4Addr, &str> = HashMap::new();
        let mut prefixes: HashMap<Ipv4Net, &str> = HashMap::new();

        for node in self.nodes.iter() {
            if !NAME_RE.is_match(&node.name) {
                return Err(ValidationError::InvalidName(node.name.clone()));
            }
            if nodes.contains_key(&node.name) {
                return Err(ValidationError::DuplicateName(node.name.clone()));
            }
            if let Some(other) = asns.insert(node.asn, &node.name) {
                return Err(ValidationError::DuplicateAsn(
                    node.asn,
                    other.to_string(),
                    node.name.clone(),
                ));
            }
            if let Some(other) = addrs.insert(node.address, &node.name) {
                return Err(ValidationError::DuplicateAddress(
                    node.address,
                    other.to_string(),
                    node.name.clone(),
                ));
            }
            if !subnet.contains(&node.address) {
                return Err(ValidationError::AddressOutsideSubnet {
                    node: node.name.clone(),
                    address: node.address,
                    subnet,
                });
            }
            if Some(node.address) == self.gateway
                || (subnet.prefix_len() < 31
                    && (node.address == subnet.network() || node.address == subnet.broadcast()))
            {
                return Err(ValidationError::ReservedAddress {
                    node: node.name.clone(),
                    address: node.address,
                });
            }
            let prefix = node.prefix.trunc();
            if prefix != node.prefix {
                log::warn!(
                    "Prefix {} of {} has host bits set, using {}",
                    node.prefix,
                    node.name,
                    prefix
                );
            }
            if let Some(other) = prefixes.insert(prefix, &node.name) {
                if !self.models_hijack {
                    return Err(ValidationError::DuplicatePrefix(
                        prefix,
                        other.to_string(),
                        node.name.clone(),
                    ));
                }
            }
            nodes.insert(
                node.name.clone(),
                AsNode {
                    prefix,
                    ..node.clone()
                },
            );
        }

        let mut seen_edges: HashSet<(&str, &str)> = HashSet::new();
        for edge in self.edges.iter() {
            for endpoint in [&edge.a, &edge.b] {
                if !nodes.contains_key(endpoint) {
                    return Err(ValidationError::UnknownNode {
                        a: edge.a.clone(),
                        b: edge.b.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
            if edge.a == edge.b {
                return Err(ValidationError::SelfLoop(edge.a.clone()));
            }
            if let Relationship::ProviderCustomer { provider } = &edge.kind {
                if !edge.touches(provider) {
                    return Err(ValidationError::InvalidProvider {
                        a: edge.a.clone(),
                        b: edge.b.clone(),
                        provider: provider.clone(),
                    });
                }
            }
            if !seen_edges.insert(edge.key()) {
                return Err(ValidationError::DuplicateEdge(edge.a.clone(), edge.b.clone()));
            }
        }

        let topo = Topology {
            subnet,
            gateway: self.gateway,
            models_hijack: self.models_hijack,
            nodes,
            edges: self.edges.clone(),
        };

        let overlapping = topo.overlapping_prefixes();
        if !overlapping.is_empty() {
            log::info!(
                "Topology models a hijack: {}",
                overlapping
                    .iter()
                    .map(|(p, n)| format!("{p} advertised by {}", n.iter().join(", ")))
                    .join("; ")
            );
        }

        Ok(topo)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    subnet: Option<Ipv4Net>,
    gateway: Option<Ipv4Addr>,
    #[serde(default)]
    models_hijack: bool,
    #[serde(default)]
    node: Vec<AsNode>,
    #[serde(default)]
    edge: Vec<EdgeDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EdgeDecl {
    a: String,
    b: String,
    provider: Option<String>,
}

/// Error thrown when a topology is inconsistent. A topology that fails validation is never
/// realized.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A node name cannot be used as container name.
    #[error("Invalid node name: {0:?}")]
    InvalidName(String),
    /// Two nodes have the same name.
    #[error("Node {0} is declared twice")]
    DuplicateName(String),
    /// Two nodes have the same AS number.
    #[error("{0} is used by both {1} and {2}")]
    DuplicateAsn(AsId, String, String),
    /// Two nodes have the same management address.
    #[error("Address {0} is used by both {1} and {2}")]
    DuplicateAddress(Ipv4Addr, String, String),
    /// The management address is not part of the simulation subnet.
    #[error("Address {address} of {node} is outside of the simulation subnet {subnet}")]
    AddressOutsideSubnet {
        /// Node name
        node: String,
        /// Declared address
        address: Ipv4Addr,
        /// Simulation subnet
        subnet: Ipv4Net,
    },
    /// The gateway is not part of the simulation subnet.
    #[error("Gateway {gateway} is outside of the simulation subnet {subnet}")]
    GatewayOutsideSubnet {
        /// Declared gateway
        gateway: Ipv4Addr,
        /// Simulation subnet
        subnet: Ipv4Net,
    },
    /// The management address is the network, broadcast or gateway address of the subnet.
    #[error("Address {address} of {node} is not a host address")]
    ReservedAddress {
        /// Node name
        node: String,
        /// Declared address
        address: Ipv4Addr,
    },
    /// Two nodes advertise the same prefix, but the topology does not model a hijack.
    #[error("Prefix {0} is advertised by both {1} and {2} (set `models_hijack` to allow this)")]
    DuplicatePrefix(Ipv4Net, String, String),
    /// An edge references a node that was never declared.
    #[error("Edge {a} -- {b} references the undeclared node {node}")]
    UnknownNode {
        /// First endpoint
        a: String,
        /// Second endpoint
        b: String,
        /// The undeclared endpoint
        node: String,
    },
    /// An edge connects a node to itself.
    #[error("Node {0} cannot peer with itself")]
    SelfLoop(String),
    /// The same pair of nodes is connected twice.
    #[error("Edge {0} -- {1} is declared twice")]
    DuplicateEdge(String, String),
    /// The provider of an edge is not one of its endpoints.
    #[error("Edge {a} -- {b} names {provider} as provider, which is not an endpoint")]
    InvalidProvider {
        /// First endpoint
        a: String,
        /// Second endpoint
        b: String,
        /// The declared provider
        provider: String,
    },
    /// Cannot parse the scenario file.
    #[error("Cannot parse the scenario: {0}")]
    Parse(#[from] toml::de::Error),
    /// Cannot parse the subnet
    #[error("Cannot parse the subnet: {0}")]
    Subnet(#[from] ipnet::AddrParseError),
}

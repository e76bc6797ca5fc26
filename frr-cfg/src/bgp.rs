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

//! Builders for the `router bgp` section.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::AsId;

/// BGP router configuration builder. Neighbors are written in two parts: the session parameters
/// (remote AS, description) are placed in the global section, while everything related to the
/// IPv4 unicast address family (activating the neighbor, advertised networks) is collected in the
/// `address-family ipv4 unicast` block.
///
/// ```
/// use frr_cfg::{RouterBgp, RouterBgpNeighbor};
/// use ipnet::Ipv4Net;
/// use std::net::Ipv4Addr;
///
/// let router_id = Ipv4Addr::new(172, 20, 0, 30);
/// let neighbor = Ipv4Addr::new(172, 20, 0, 20);
/// let network: Ipv4Net = "8.8.8.0/24".parse().unwrap();
/// assert_eq!(
///     RouterBgp::new(65300)
///         .router_id(router_id)
///         .ebgp_requires_policy(false)
///         .network_import_check(false)
///         .network(network)
///         .neighbor(
///             RouterBgpNeighbor::new(neighbor)
///                 .remote_as(65200)
///                 .description("as200")
///                 .activate()
///         )
///         .build(),
///     "\
/// router bgp 65300
///   bgp router-id 172.20.0.30
///   no bgp ebgp-requires-policy
///   no bgp network import-check
///   neighbor 172.20.0.20 remote-as 65200
///   neighbor 172.20.0.20 description as200
///   address-family ipv4 unicast
///     network 8.8.8.0/24
///     neighbor 172.20.0.20 activate
///   exit-address-family
/// exit
/// "
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RouterBgp {
    as_id: AsId,
    router_id: Option<Ipv4Addr>,
    ebgp_requires_policy: Option<bool>,
    network_import_check: Option<bool>,
    neighbors: Vec<(RouterBgpNeighbor, bool)>,
    networks: Vec<Ipv4Net>,
}

impl RouterBgp {
    /// Create a new BGP configuration builder
    pub fn new(as_id: impl Into<AsId>) -> Self {
        Self {
            as_id: as_id.into(),
            router_id: Default::default(),
            ebgp_requires_policy: Default::default(),
            network_import_check: Default::default(),
            neighbors: Default::default(),
            networks: Default::default(),
        }
    }

    /// Get the AS number of that router.
    pub fn as_id(&self) -> AsId {
        self.as_id
    }

    /// Set the router-id for the BGP router instance.
    pub fn router_id(&mut self, id: Ipv4Addr) -> &mut Self {
        self.router_id = Some(id);
        self
    }

    /// Require (or not require) an explicit inbound and outbound policy on eBGP sessions. Recent
    /// FRR versions refuse to exchange any route on eBGP sessions without a policy, unless this is
    /// disabled.
    ///
    /// ```
    /// # use frr_cfg::RouterBgp;
    /// assert_eq!(
    ///     RouterBgp::new(10).ebgp_requires_policy(false).build(),
    ///     "router bgp 10\n  no bgp ebgp-requires-policy\nexit\n"
    /// );
    /// ```
    pub fn ebgp_requires_policy(&mut self, required: bool) -> &mut Self {
        self.ebgp_requires_policy = Some(required);
        self
    }

    /// Enable or disable the check that an advertised network exists in the RIB.
    pub fn network_import_check(&mut self, check: bool) -> &mut Self {
        self.network_import_check = Some(check);
        self
    }

    /// Advertise the specific network over BGP.
    pub fn network(&mut self, network: Ipv4Net) -> &mut Self {
        self.networks.push(network);
        self
    }

    /// Configure a BGP Neighbor using [`RouterBgpNeighbor`]
    pub fn neighbor(&mut self, neighbor: impl Into<RouterBgpNeighbor>) -> &mut Self {
        self.neighbors.push((neighbor.into(), true));
        self
    }

    /// Remove a neighbor.
    ///
    /// ```
    /// # use frr_cfg::{RouterBgp, RouterBgpNeighbor};
    /// # use std::net::Ipv4Addr;
    /// let neighbor = Ipv4Addr::new(20, 0, 0, 1);
    /// assert_eq!(
    ///     RouterBgp::new(10).no_neighbor(RouterBgpNeighbor::new(neighbor)).build(),
    ///     "router bgp 10\n  no neighbor 20.0.0.1\nexit\n"
    /// );
    /// ```
    pub fn no_neighbor(&mut self, neighbor: impl Into<RouterBgpNeighbor>) -> &mut Self {
        self.neighbors.push((neighbor.into(), false));
        self
    }

    /// Iterate over all neighbors that are configured (not removed) by this builder.
    pub fn neighbors(&self) -> impl Iterator<Item = &RouterBgpNeighbor> {
        self.neighbors.iter().filter(|(_, mode)| *mode).map(|(n, _)| n)
    }

    /// Generate the configuration.
    pub fn build(&self) -> String {
        let mut global = String::new();
        let mut af = String::new();

        if let Some(id) = self.router_id {
            global.push_str(&format!("  bgp router-id {id}\n"));
        }
        match self.ebgp_requires_policy {
            Some(true) => global.push_str("  bgp ebgp-requires-policy\n"),
            Some(false) => global.push_str("  no bgp ebgp-requires-policy\n"),
            None => {}
        }
        match self.network_import_check {
            Some(true) => global.push_str("  bgp network import-check\n"),
            Some(false) => global.push_str("  no bgp network import-check\n"),
            None => {}
        }

        for network in self.networks.iter() {
            af.push_str(&format!("    network {network}\n"));
        }

        for (neighbor, mode) in self.neighbors.iter() {
            if *mode {
                global.push_str(&neighbor.build_global());
                af.push_str(&neighbor.build_af());
            } else {
                global.push_str(&neighbor.no());
            }
        }

        let af = if af.is_empty() {
            String::new()
        } else {
            format!("  address-family ipv4 unicast\n{af}  exit-address-family\n")
        };

        format!("router bgp {}\n{global}{af}exit\n", self.as_id.0)
    }
}

/// BGP neighbor configuration for FRR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterBgpNeighbor {
    neighbor_id: Ipv4Addr,
    remote_as: Option<AsId>,
    description: Option<String>,
    activate: bool,
}

impl RouterBgpNeighbor {
    /// Create a new BGP Neighbor builder.
    pub fn new(neighbor_id: Ipv4Addr) -> Self {
        Self {
            neighbor_id,
            remote_as: Default::default(),
            description: Default::default(),
            activate: false,
        }
    }

    /// Address of the neighbor.
    pub fn id(&self) -> Ipv4Addr {
        self.neighbor_id
    }

    /// The remote AS configured for that neighbor, if any.
    pub fn get_remote_as(&self) -> Option<AsId> {
        self.remote_as
    }

    /// The description configured for that neighbor, if any.
    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Remove the neighbor from the configuration.
    ///
    /// ```
    /// # use frr_cfg::RouterBgpNeighbor;
    /// # use std::net::Ipv4Addr;
    /// let neighbor_addr = Ipv4Addr::new(20, 0, 0, 1);
    /// assert_eq!(RouterBgpNeighbor::new(neighbor_addr).no(), "  no neighbor 20.0.0.1\n");
    /// ```
    pub fn no(&self) -> String {
        format!("  no neighbor {}\n", self.neighbor_id)
    }

    /// Set the remote-as.
    pub fn remote_as(&mut self, remote_as: impl Into<AsId>) -> &mut Self {
        self.remote_as = Some(remote_as.into());
        self
    }

    /// Set a free-text description. Whitespace is replaced by underscores, as FRR would otherwise
    /// only store the first word.
    ///
    /// ```
    /// # use frr_cfg::RouterBgpNeighbor;
    /// # use std::net::Ipv4Addr;
    /// let mut n = RouterBgpNeighbor::new(Ipv4Addr::new(20, 0, 0, 1));
    /// n.description("as200 provider");
    /// assert_eq!(n.get_description(), Some("as200_provider"));
    /// ```
    pub fn description(&mut self, description: impl AsRef<str>) -> &mut Self {
        self.description = Some(
            description
                .as_ref()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("_"),
        );
        self
    }

    /// Activate the neighbor in the IPv4 unicast address family.
    pub fn activate(&mut self) -> &mut Self {
        self.activate = true;
        self
    }

    fn build_global(&self) -> String {
        let mut cfg = String::new();
        if let Some(id) = self.remote_as {
            cfg.push_str(&format!("  neighbor {} remote-as {}\n", self.neighbor_id, id.0));
        }
        if let Some(desc) = self.description.as_ref() {
            cfg.push_str(&format!("  neighbor {} description {desc}\n", self.neighbor_id));
        }
        cfg
    }

    fn build_af(&self) -> String {
        if self.activate {
            format!("    neighbor {} activate\n", self.neighbor_id)
        } else {
            String::new()
        }
    }
}

impl From<&mut RouterBgp> for RouterBgp {
    fn from(val: &mut RouterBgp) -> Self {
        val.clone()
    }
}

impl From<&mut RouterBgpNeighbor> for RouterBgpNeighbor {
    fn from(val: &mut RouterBgpNeighbor) -> Self {
        val.clone()
    }
}

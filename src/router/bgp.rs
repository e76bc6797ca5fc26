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

//! Module to parse the BGP state of FRR routers from the JSON output of `vtysh`.

use std::{collections::BTreeMap, fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::AsId;

/// State of a BGP session, as reported by the router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BgpState {
    /// No connection is attempted.
    Idle,
    /// Waiting for the TCP connection to complete.
    Connect,
    /// Trying to initiate a TCP connection.
    Active,
    /// OPEN message was sent.
    OpenSent,
    /// OPEN message was received.
    OpenConfirm,
    /// The session is up and routes are exchanged.
    Established,
    /// Any other state reported by the router (e.g., `Clearing`).
    Other(String),
}

impl BgpState {
    /// Whether routes are exchanged on this session.
    pub fn is_established(&self) -> bool {
        matches!(self, BgpState::Established)
    }
}

impl From<&str> for BgpState {
    fn from(s: &str) -> Self {
        match s {
            "Idle" => Self::Idle,
            "Connect" => Self::Connect,
            "Active" => Self::Active,
            "OpenSent" => Self::OpenSent,
            "OpenConfirm" => Self::OpenConfirm,
            "Established" => Self::Established,
            x => Self::Other(x.to_string()),
        }
    }
}

impl fmt::Display for BgpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BgpState::Idle => f.write_str("Idle"),
            BgpState::Connect => f.write_str("Connect"),
            BgpState::Active => f.write_str("Active"),
            BgpState::OpenSent => f.write_str("OpenSent"),
            BgpState::OpenConfirm => f.write_str("OpenConfirm"),
            BgpState::Established => f.write_str("Established"),
            BgpState::Other(s) => f.write_str(s),
        }
    }
}

/// Structure that contains information about a BGP neighbor. This is the parsed output of the
/// command `show bgp neighbors json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BgpNeighbor {
    /// Address of the BGP neighbor.
    pub id: Ipv4Addr,
    /// AS number of the neighbor
    pub remote_as: AsId,
    /// Description of the neighbor
    pub description: Option<String>,
    /// State of the session
    pub state: BgpState,
    /// Number of IPv4 unicast prefixes accepted from that neighbor.
    pub prefixes_received: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNeighbor {
    remote_as: u32,
    nbr_desc: Option<String>,
    bgp_state: String,
    #[serde(default)]
    address_family_info: RawAddressFamilyInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddressFamilyInfo {
    ipv4_unicast: Option<RawAddressFamily>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddressFamily {
    #[serde(default)]
    accepted_prefix_counter: u64,
}

impl BgpNeighbor {
    /// Parse the output of `show bgp neighbors json` into a mapping from the neighbor address to
    /// the neighbor. An empty output (no BGP instance configured) yields an empty map.
    pub fn from_json(s: &str) -> Result<BTreeMap<Ipv4Addr, BgpNeighbor>, ParseError> {
        if s.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(s)?;
        let mut result = BTreeMap::new();
        for (key, value) in raw {
            // neighbors configured on an interface, or global keys, are not keyed by an address.
            let id: Ipv4Addr = match key.parse() {
                Ok(id) => id,
                Err(_) => continue,
            };
            let n: RawNeighbor = serde_json::from_value(value)?;
            result.insert(
                id,
                BgpNeighbor {
                    id,
                    remote_as: AsId(n.remote_as),
                    description: n.nbr_desc,
                    state: BgpState::from(n.bgp_state.as_str()),
                    prefixes_received: n
                        .address_family_info
                        .ipv4_unicast
                        .map(|af| af.accepted_prefix_counter)
                        .unwrap_or_default(),
                },
            );
        }
        Ok(result)
    }
}

/// A single path in the BGP table of a router. It is parsed from `show ip bgp json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BgpRoute {
    /// The network of this route.
    pub net: Ipv4Net,
    /// Whether this route is valid.
    pub valid: bool,
    /// Whether this route is selected
    pub best: bool,
    /// The AS Path stored in the route. It is empty for locally originated routes.
    pub path: Vec<AsId>,
    /// The next-hop attribute (`0.0.0.0` for locally originated routes).
    pub next_hop: Option<Ipv4Addr>,
}

impl BgpRoute {
    /// Whether this route was learned from a neighbor.
    pub fn is_learned(&self) -> bool {
        !self.path.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    routes: BTreeMap<String, Vec<RawPath>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPath {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    bestpath: bool,
    #[serde(default)]
    path: String,
    #[serde(default)]
    nexthops: Vec<RawNextHop>,
}

#[derive(Debug, Deserialize)]
struct RawNextHop {
    ip: Option<Ipv4Addr>,
}

impl BgpRoute {
    /// Parse the output of `show ip bgp json` into a mapping of a destination prefix to a vector
    /// of routes.
    pub fn from_json(s: &str) -> Result<BTreeMap<Ipv4Net, Vec<BgpRoute>>, ParseError> {
        if s.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let table: RawTable = serde_json::from_str(s)?;
        let mut result = BTreeMap::new();
        for (net, paths) in table.routes {
            let net: Ipv4Net = net.parse()?;
            let routes = paths
                .into_iter()
                .map(|p| {
                    Ok(BgpRoute {
                        net,
                        valid: p.valid,
                        best: p.bestpath,
                        path: parse_as_path(&p.path)?,
                        next_hop: p.nexthops.iter().find_map(|nh| nh.ip),
                    })
                })
                .collect::<Result<Vec<_>, ParseError>>()?;
            result.insert(net, routes);
        }
        Ok(result)
    }
}

/// Parse an AS path like `65200 65300`. AS sets (`{65400,65500}`) are flattened.
fn parse_as_path(s: &str) -> Result<Vec<AsId>, ParseError> {
    s.split(|c: char| c.is_whitespace() || c == ',' || c == '{' || c == '}')
        .filter(|x| !x.is_empty())
        .map(|x| Ok(AsId(x.parse()?)))
        .collect()
}

/// Error while parsing output from an FRR router.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Invalid JSON, or unexpected structure
    #[error("Cannot parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Cannot parse IP network
    #[error("Cannot parse IP network: {0}")]
    IpNetParse(#[from] ipnet::AddrParseError),
    /// Cannot parse int
    #[error("Cannot parse integer: {0}")]
    IntParse(#[from] std::num::ParseIntError),
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const NEIGHBORS: &str = r#"{
  "172.20.0.10":{
    "remoteAs":65100,
    "localAs":65200,
    "nbrExternalLink":true,
    "nbrDesc":"customer:as100",
    "bgpVersion":4,
    "remoteRouterId":"172.20.0.10",
    "bgpState":"Established",
    "bgpTimerUpMsec":12000,
    "addressFamilyInfo":{
      "ipv4Unicast":{
        "commAttriSentToNbr":"extendedAndStandard",
        "acceptedPrefixCounter":1
      }
    }
  },
  "172.20.0.40":{
    "remoteAs":65400,
    "localAs":65200,
    "bgpState":"Active",
    "addressFamilyInfo":{}
  }
}"#;

    const ROUTES: &str = r#"{
 "vrfId": 0,
 "vrfName": "default",
 "tableVersion": 3,
 "routerId": "172.20.0.20",
 "defaultLocPrf": 100,
 "localAS": 65200,
 "routes": { "10.1.0.0/24": [
  {
    "valid":true,
    "bestpath":true,
    "selectionReason":"First path received",
    "pathFrom":"external",
    "prefix":"10.1.0.0",
    "prefixLen":24,
    "network":"10.1.0.0/24",
    "metric":0,
    "weight":0,
    "peerId":"172.20.0.10",
    "path":"65100",
    "origin":"IGP",
    "nexthops":[{"ip":"172.20.0.10","hostname":"as100","afi":"ipv4","used":true}]
  }
],"10.2.0.0/24": [
  {
    "valid":true,
    "bestpath":true,
    "pathFrom":"external",
    "prefix":"10.2.0.0",
    "prefixLen":24,
    "network":"10.2.0.0/24",
    "weight":32768,
    "peerId":"(unspec)",
    "path":"",
    "origin":"IGP",
    "nexthops":[{"ip":"0.0.0.0","hostname":"as200","afi":"ipv4","used":true}]
  }
] }  }"#;

    #[test]
    fn parse_neighbors() {
        let neighbors = BgpNeighbor::from_json(NEIGHBORS).unwrap();
        assert_eq!(neighbors.len(), 2);
        let n = &neighbors[&Ipv4Addr::new(172, 20, 0, 10)];
        assert_eq!(n.remote_as, AsId(65100));
        assert_eq!(n.description.as_deref(), Some("customer:as100"));
        assert_eq!(n.state, BgpState::Established);
        assert_eq!(n.prefixes_received, 1);
        let n = &neighbors[&Ipv4Addr::new(172, 20, 0, 40)];
        assert_eq!(n.state, BgpState::Active);
        assert_eq!(n.description, None);
        assert_eq!(n.prefixes_received, 0);
    }

    #[test]
    fn parse_empty_neighbors() {
        assert!(BgpNeighbor::from_json("").unwrap().is_empty());
        assert!(BgpNeighbor::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn parse_unknown_state() {
        let s = r#"{"10.0.0.1": {"remoteAs": 1, "bgpState": "Clearing"}}"#;
        let n = BgpNeighbor::from_json(s).unwrap();
        assert_eq!(
            n[&Ipv4Addr::new(10, 0, 0, 1)].state,
            BgpState::Other("Clearing".to_string())
        );
    }

    #[test]
    fn parse_routes() {
        let routes = BgpRoute::from_json(ROUTES).unwrap();
        assert_eq!(routes.len(), 2);
        let learned = &routes[&"10.1.0.0/24".parse::<Ipv4Net>().unwrap()];
        assert_eq!(
            learned,
            &vec![BgpRoute {
                net: "10.1.0.0/24".parse().unwrap(),
                valid: true,
                best: true,
                path: vec![AsId(65100)],
                next_hop: Some(Ipv4Addr::new(172, 20, 0, 10)),
            }]
        );
        assert!(learned[0].is_learned());
        let local = &routes[&"10.2.0.0/24".parse::<Ipv4Net>().unwrap()][0];
        assert!(local.path.is_empty());
        assert!(!local.is_learned());
    }

    #[test]
    fn parse_as_set() {
        assert_eq!(
            parse_as_path("65200 {65300,65400}").unwrap(),
            vec![AsId(65200), AsId(65300), AsId(65400)]
        );
        assert!(parse_as_path("65200 x").is_err());
    }
}

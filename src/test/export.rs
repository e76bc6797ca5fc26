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

//! Rendering and writing of the startup configuration.

use std::{collections::BTreeMap, net::Ipv4Addr};

use frr_cfg::Daemon;
use pretty_assertions::assert_eq;
use test_log::test;

use crate::{
    export::*,
    topology::{AsId, AsNode, PeeringEdge, Topology},
};

#[test]
fn one_neighbor_per_edge() {
    let topo = Topology::netsec_default();
    let configs = render_all(&topo).unwrap();
    assert_eq!(configs.len(), 5);
    assert_eq!(
        configs.values().map(|c| c.neighbors().count()).sum::<usize>(),
        2 * topo.edges().len()
    );

    for edge in topo.edges() {
        for (node, sibling) in [(&edge.a, &edge.b), (&edge.b, &edge.a)] {
            let sibling = topo.node(sibling).unwrap();
            let matching = configs[node]
                .neighbors()
                .filter(|n| n.id() == sibling.address)
                .collect::<Vec<_>>();
            assert_eq!(matching.len(), 1, "{node} must have exactly one neighbor {}", sibling.name);
            assert_eq!(matching[0].get_remote_as(), Some(sibling.asn));
        }
    }
}

#[test]
fn neighbor_descriptions() {
    let topo = Topology::netsec_default();
    let descriptions = |node: &str| {
        render(&topo, node)
            .unwrap()
            .neighbors()
            .map(|n| n.get_description().unwrap_or_default().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(descriptions("as100"), vec!["provider:as200"]);
    assert_eq!(
        descriptions("as200"),
        vec!["customer:as100", "customer:as300", "peer:as400"]
    );
    assert_eq!(descriptions("as300"), vec!["provider:as200", "customer:as500"]);
}

#[test]
fn rendered_files() {
    let topo = Topology::netsec_default();
    let cfg = render(&topo, "as300").unwrap();
    assert_eq!(cfg.node(), "as300");
    assert!(cfg.daemons().is_enabled(Daemon::Bgpd));
    assert!(!cfg.daemons().is_enabled(Daemon::Ospfd));
    assert_eq!(cfg.frr().get_hostname(), "as300");

    let files = cfg.files();
    assert_eq!(
        files.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        vec![DAEMONS_FILE, VTYSH_FILE, FRR_FILE]
    );
    assert!(files[0].1.contains("bgpd=yes"));
    assert!(files[1].1.contains("hostname as300"));

    let frr = &files[2].1;
    for line in [
        "hostname as300",
        "ip route 8.8.8.0/24 Null0",
        "router bgp 65300",
        "bgp router-id 172.20.0.30",
        "no bgp ebgp-requires-policy",
        "network 8.8.8.0/24",
        "neighbor 172.20.0.20 remote-as 65200",
        "neighbor 172.20.0.20 description provider:as200",
        "neighbor 172.20.0.50 remote-as 65500",
        "neighbor 172.20.0.50 activate",
    ] {
        assert!(frr.contains(line), "frr.conf is missing `{line}`:\n{frr}");
    }
}

#[test]
fn isolated_node() {
    let mut b = Topology::builder();
    b.node(AsNode::new(
        "lonely",
        64999,
        Ipv4Addr::new(172, 20, 0, 99),
        "192.0.2.0/24".parse().unwrap(),
    ));
    let topo = b.build().unwrap();
    let cfg = render(&topo, "lonely").unwrap();
    assert_eq!(cfg.neighbors().count(), 0);
    let bgp = cfg.frr().get_bgp().unwrap();
    assert_eq!(bgp.as_id(), AsId(64999));
    assert_eq!(bgp.networks().count(), 1);
}

#[test]
fn unknown_node() {
    let topo = Topology::netsec_default();
    assert!(matches!(
        render(&topo, "as600"),
        Err(GenerationError::UnknownNode(n)) if n == "as600"
    ));
}

#[test]
fn write_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let topo = Topology::netsec_default();

    let read_all = |dirs: &BTreeMap<String, std::path::PathBuf>| {
        dirs.iter()
            .flat_map(|(node, d)| {
                [DAEMONS_FILE, VTYSH_FILE, FRR_FILE]
                    .into_iter()
                    .map(move |f| ((node.clone(), f), std::fs::read(d.join(f)).unwrap()))
            })
            .collect::<BTreeMap<_, _>>()
    };

    let first = write_all(&topo, dir.path()).unwrap();
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        vec!["as100", "as200", "as300", "as400", "as500"]
    );
    assert_eq!(first["as100"], dir.path().join("as100"));
    let first_content = read_all(&first);

    let second = write_all(&topo, dir.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first_content, read_all(&second));
}

#[test]
fn missing_sibling_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let topo = Topology::unchecked(
        vec![
            AsNode::new(
                "as100",
                65100,
                Ipv4Addr::new(172, 20, 0, 10),
                "10.1.0.0/24".parse().unwrap(),
            ),
            AsNode::new(
                "as200",
                65200,
                Ipv4Addr::new(172, 20, 0, 20),
                "10.2.0.0/24".parse().unwrap(),
            ),
        ],
        vec![
            PeeringEdge::peer("as100", "as200"),
            PeeringEdge::provider_customer("as200", "as900"),
        ],
    );

    assert!(render(&topo, "as100").is_ok());
    match write_all(&topo, dir.path()) {
        Err(GenerationError::MissingSibling { node, sibling }) => {
            assert_eq!((node.as_str(), sibling.as_str()), ("as200", "as900"))
        }
        r => panic!("unexpected result: {r:?}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

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

//! Lifecycle, session configuration and verification of a lab on the mock runtime.

use std::{net::Ipv4Addr, sync::Arc};

use ipnet::Ipv4Net;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use test_log::test;

use super::{active_lab, test_config, MockRuntime};
use crate::{
    docker::{ContainerRuntime, ContainerState},
    router::{
        peering::{SessionError, SessionOutcome},
        Readiness, StartError,
    },
    topology::{AsId, Topology},
    verify::{Reachability, SessionBucket},
    Lab, LabError,
};

fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

fn addr(node: &str) -> Ipv4Addr {
    Topology::netsec_default().node(node).unwrap().address
}

/// The default scenario, where `as500` also originates `8.8.8.0/24`.
fn hijack_topology() -> Topology {
    let default = Topology::netsec_default();
    let mut b = Topology::builder();
    b.models_hijack(true);
    for n in default.nodes() {
        let mut n = n.clone();
        if n.name == "as500" {
            n.prefix = net("8.8.8.0/24");
        }
        b.node(n);
    }
    for e in default.edges() {
        b.edge(e.clone());
    }
    b.build().unwrap()
}

#[test]
fn lock_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let topo = Topology::netsec_default();
    let runtime = Arc::new(MockRuntime::new());

    let first = Lab::new(topo.clone(), test_config(dir.path()), runtime.clone())
        .activate()
        .unwrap();
    assert!(test_config(dir.path()).lock_file().exists());

    match Lab::new(topo.clone(), test_config(dir.path()), runtime.clone()).activate() {
        Err(LabError::CannotObtainLock(owner)) => assert!(owner.contains("pid"), "{owner}"),
        r => panic!("unexpected result: {r:?}"),
    }

    // a different state directory is independent
    let other = tempfile::tempdir().unwrap();
    assert!(Lab::new(topo.clone(), test_config(other.path()), runtime.clone())
        .activate()
        .is_ok());

    let inactive = first.deactivate();
    assert!(!test_config(dir.path()).lock_file().exists());
    let again = inactive.activate().unwrap();
    drop(again);
    assert!(!test_config(dir.path()).lock_file().exists());
}

#[test(tokio::test)]
async fn setup_default_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());

    let report = lab.setup().await.unwrap();

    assert_eq!(report.starts.len(), 5);
    assert!(report
        .starts
        .values()
        .all(|r| matches!(r, Ok(Readiness::Ready))));
    assert!(dir.path().join("as300").join("frr.conf").exists());
    assert_eq!(
        mock.containers(),
        vec!["as100", "as200", "as300", "as400", "as500"]
    );
    assert!(mock.network_exists("netsecsim").await.unwrap());

    assert_eq!(report.sessions.sides.len(), 8);
    assert_eq!(report.sessions.established(), 8);
    assert_eq!(report.sessions.changed(), 0);
    assert!(report.sessions.is_complete());

    let status = report.status;
    assert!(status.is_healthy());
    assert_eq!(status.established_sessions(), 4);
    assert_eq!(status.established_sides(), 8);
    assert!(status.overlapping_prefixes.is_empty());

    let as100 = status.node("as100").unwrap();
    assert_eq!(as100.reachability, Reachability::Responsive);
    assert_eq!(as100.asn, AsId(65100));
    assert_eq!((as100.established, as100.configured), (1, 1));
    assert_eq!((as100.routes, as100.learned), (5, 4));
    assert_eq!(as100.neighbors[0].prefixes_received, 1);
    assert!(as100.undeclared_neighbors.is_empty());
    assert_eq!(status.node("as200").unwrap().established, 3);
    assert_eq!(status.node("as300").unwrap().established, 2);
}

#[test(tokio::test)]
async fn configure_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    for _ in 0..2 {
        let report = lab.configure_sessions().await.unwrap();
        assert_eq!(report.established(), 8);
        assert_eq!(report.changed(), 0);
    }

    let neighbors = mock.neighbors("as200");
    assert_eq!(neighbors.len(), 3);
    assert!(neighbors.iter().all(|n| n.declarations == 1));
    assert_eq!(
        neighbors
            .iter()
            .map(|n| n.description.clone().unwrap_or_default())
            .collect::<Vec<_>>(),
        vec!["customer:as100", "customer:as300", "peer:as400"]
    );
    assert_eq!(lab.status().await.unwrap().established_sessions(), 4);
}

#[test(tokio::test)]
async fn repair_wrong_remote_as() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    mock.set_neighbor("as100", addr("as200"), 65999);
    let status = lab.status().await.unwrap();
    assert_eq!(
        status.node("as100").unwrap().bucket("as200"),
        SessionBucket::NotEstablished
    );
    assert_eq!(status.established_sessions(), 3);

    let report = lab.configure_sessions().await.unwrap();
    assert!(report.side("as100", "as200").unwrap().changed);
    assert!(!report.side("as200", "as100").unwrap().changed);
    assert_eq!(report.changed(), 1);
    assert_eq!(report.established(), 8);

    let neighbors = mock.neighbors("as100");
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].remote_as, AsId(65200));
    assert_eq!(lab.status().await.unwrap().established_sessions(), 4);
}

#[test(tokio::test)]
async fn redeclare_missing_neighbors() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    mock.clear_neighbors("as300");
    assert_eq!(lab.status().await.unwrap().established_sessions(), 2);

    let report = lab.configure_sessions().await.unwrap();
    assert_eq!(report.changed(), 2);
    assert!(report.side("as300", "as200").unwrap().changed);
    assert!(report.side("as300", "as500").unwrap().changed);
    assert!(report.is_complete());

    let neighbors = mock.neighbors("as300");
    assert_eq!(
        neighbors.iter().map(|n| n.addr).collect::<Vec<_>>(),
        vec![addr("as200"), addr("as500")]
    );
    assert!(neighbors.iter().all(|n| n.declarations == 1 && n.active));
}

#[test(tokio::test)]
async fn undeclared_neighbors_are_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    mock.set_neighbor("as400", addr("as100"), 65100);
    let report = lab.configure_sessions().await.unwrap();
    assert_eq!(report.changed(), 0);
    assert_eq!(mock.neighbors("as400").len(), 2);

    let status = lab.status().await.unwrap();
    let as400 = status.node("as400").unwrap();
    assert_eq!(as400.undeclared_neighbors, vec![addr("as100")]);
    assert_eq!(as400.established, 1);
    assert_eq!(status.established_sessions(), 4);
}

#[test(tokio::test)]
async fn stopped_node_degrades_its_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    mock.kill("as500");
    let report = lab.configure_sessions().await.unwrap();
    assert_eq!(report.sides.len(), 8);
    assert_eq!(report.established(), 6);
    assert!(!report.is_complete());
    assert!(matches!(
        report.side("as300", "as500").unwrap().outcome,
        Ok(SessionOutcome::Degraded(_))
    ));
    assert!(matches!(
        report.side("as500", "as300").unwrap().outcome,
        Err(SessionError::Node(_))
    ));
    assert_eq!(
        report.side("as300", "as200").unwrap().outcome.as_ref().ok(),
        Some(&SessionOutcome::Established)
    );

    let status = lab.status().await.unwrap();
    assert_eq!(status.node("as500").unwrap().reachability, Reachability::NotRunning);
    assert_eq!(
        status.node("as300").unwrap().bucket("as500"),
        SessionBucket::NotEstablished
    );
    assert_eq!(status.established_sessions(), 3);
    assert!(!status.is_healthy());
    assert_eq!(lab.missing_nodes().await.unwrap(), vec!["as500"]);
}

#[test(tokio::test)]
async fn unresponsive_node() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    mock.set_unresponsive("as400", true);

    let report = lab.setup().await.unwrap();
    assert!(matches!(report.starts["as400"], Ok(Readiness::Degraded(_))));
    assert!(matches!(report.starts["as200"], Ok(Readiness::Ready)));

    let as400 = report.status.node("as400").unwrap();
    assert!(matches!(
        as400.reachability,
        Reachability::DaemonUnresponsive(_)
    ));
    assert_eq!(
        report.status.node("as200").unwrap().bucket("as400"),
        SessionBucket::NotEstablished
    );
    assert_eq!(report.status.established_sessions(), 3);
    // the container runs, even though its daemons do not answer
    assert!(lab.missing_nodes().await.unwrap().is_empty());

    mock.set_unresponsive("as400", false);
    let status = lab.status().await.unwrap();
    assert!(status.is_healthy());
}

#[test(tokio::test)]
async fn failed_start_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    mock.fail_start("as100");

    let report = lab.setup().await.unwrap();
    assert!(matches!(
        &report.starts["as100"],
        Err(StartError::Runtime { node, .. }) if node == "as100"
    ));
    assert_eq!(
        report
            .starts
            .values()
            .filter(|r| matches!(r, Ok(Readiness::Ready)))
            .count(),
        4
    );
    assert_eq!(
        report.status.node("as100").unwrap().reachability,
        Reachability::NotRunning
    );
    assert_eq!(
        report.status.node("as200").unwrap().bucket("as100"),
        SessionBucket::NotEstablished
    );
    assert_eq!(report.status.established_sessions(), 3);
    assert_eq!(lab.missing_nodes().await.unwrap(), vec!["as100"]);
}

#[test(tokio::test)]
async fn exited_container_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.timeouts.ready_secs = 30;
    let mock = Arc::new(MockRuntime::new());
    let mut lab = Lab::new(Topology::netsec_default(), config, mock.clone())
        .activate()
        .unwrap();
    mock.exit_on_start("as300");
    lab.render().unwrap();

    let start = tokio::time::Instant::now();
    let starts = lab.start_all().await.unwrap();
    assert!(start.elapsed() < std::time::Duration::from_secs(5));
    assert!(matches!(
        &starts["as300"],
        Err(StartError::Exited { node, state: ContainerState::Stopped }) if node == "as300"
    ));
    assert!(matches!(starts["as100"], Ok(Readiness::Ready)));
    assert_eq!(lab.missing_nodes().await.unwrap(), vec!["as300".to_string()]);
}

#[test(tokio::test)]
async fn routes_of_a_node() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, _mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    assert_eq!(lab.routes("as100", None).await.unwrap().len(), 5);

    let routes = lab.routes("as100", Some(net("8.8.8.0/24"))).await.unwrap();
    assert_eq!(routes.len(), 1);
    assert!(routes[0].best && routes[0].valid);
    assert_eq!(routes[0].path, vec![AsId(65200), AsId(65300)]);
    assert_eq!(routes[0].next_hop, Some(addr("as200")));

    let local = lab.routes("as100", Some(net("10.1.0.0/24"))).await.unwrap();
    assert_eq!(local.len(), 1);
    assert!(!local[0].is_learned());

    assert!(lab
        .routes("as100", Some(net("192.0.2.0/24")))
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        lab.routes("as999", None).await,
        Err(LabError::UnknownNode(_))
    ));
}

#[test(tokio::test)]
async fn hijacked_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, _mock) = active_lab(hijack_topology(), dir.path());
    let report = lab.setup().await.unwrap();

    assert!(report.status.is_healthy());
    assert_eq!(
        report.status.overlapping_prefixes,
        btreemap! {net("8.8.8.0/24") => vec!["as300".to_string(), "as500".to_string()]}
    );

    let routes = lab.routes("as100", Some(net("8.8.8.0/24"))).await.unwrap();
    assert_eq!(routes.len(), 2);
    let best = routes.iter().find(|r| r.best).unwrap();
    assert_eq!(best.path.last(), Some(&AsId(65300)));
    let other = routes.iter().find(|r| !r.best).unwrap();
    assert_eq!(other.path, vec![AsId(65200), AsId(65300), AsId(65500)]);
}

#[test(tokio::test)]
async fn status_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    mock.clear_exec_log();
    lab.status().await.unwrap();
    let log = mock.exec_log();
    assert!(!log.is_empty());
    for (node, args) in log {
        assert_eq!(args.len(), 3, "[{node}] {args:?}");
        assert_eq!(&args[..2], ["vtysh", "-c"]);
        assert!(args[2].starts_with("show "), "[{node}] {args:?}");
    }
}

#[test(tokio::test)]
async fn inactive_lab_observes() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, _mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    let lab = lab.deactivate();
    assert!(!test_config(dir.path()).lock_file().exists());
    assert_eq!(lab.status().await.unwrap().established_sessions(), 4);
    assert!(lab.missing_nodes().await.unwrap().is_empty());
}

#[test(tokio::test)]
async fn restart_a_node() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    assert_eq!(lab.start("as100").await.unwrap(), Readiness::Ready);
    assert_eq!(mock.containers().len(), 5);
    assert!(matches!(
        lab.start("as999").await,
        Err(StartError::UnknownNode(_))
    ));

    lab.stop("as100").await.unwrap();
    lab.stop("as100").await.unwrap();
    assert_eq!(lab.missing_nodes().await.unwrap(), vec!["as100"]);
    assert!(matches!(lab.stop("as999").await, Err(LabError::UnknownNode(_))));

    assert_eq!(lab.start("as100").await.unwrap(), Readiness::Ready);
    let report = lab.configure_sessions().await.unwrap();
    assert!(report.is_complete());
}

#[test(tokio::test)]
async fn teardown_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    lab.teardown().await.unwrap();
    assert!(mock.containers().is_empty());
    assert!(!mock.network_exists("netsecsim").await.unwrap());
    assert_eq!(lab.missing_nodes().await.unwrap().len(), 5);

    // tearing down an empty lab is not an error
    lab.teardown().await.unwrap();

    let status = lab.status().await.unwrap();
    assert!(status
        .nodes
        .iter()
        .all(|n| n.reachability == Reachability::NotRunning));
    assert_eq!(status.established_sessions(), 0);
}

#[test(tokio::test)]
async fn cancelled_lab() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.cancel_token().cancel();

    assert!(matches!(lab.setup().await, Err(LabError::Cancelled(_))));
    assert!(mock.containers().is_empty());
}

#[test(tokio::test)]
async fn cancel_while_configuring_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (mut lab, mock) = active_lab(Topology::netsec_default(), dir.path());
    lab.setup().await.unwrap();

    // as300 keeps waiting for its session to as500 until cancelled
    mock.kill("as500");
    let token = lab.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        token.cancel();
    });

    let start = tokio::time::Instant::now();
    assert!(matches!(
        lab.configure_sessions().await,
        Err(LabError::Cancelled(_))
    ));
    assert!(start.elapsed() < std::time::Duration::from_secs(1));
}

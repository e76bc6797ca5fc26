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

//! Reading the lab configuration.

use std::{path::PathBuf, time::Duration};

use pretty_assertions::assert_eq;
use test_log::test;

use crate::config::*;

#[test]
fn defaults() {
    let cfg = LabConfig::from_toml("").unwrap();
    assert_eq!(cfg, LabConfig::default());
    assert_eq!(cfg.network.name, "netsecsim");
    assert_eq!(cfg.timeouts.poll_interval(), Duration::from_secs(1));
    assert_eq!(cfg.timeouts.session(), Duration::from_secs(90));
}

#[test]
fn partial_file() {
    let cfg = LabConfig::from_toml(
        r#"
image = "quay.io/frrouting/frr:9.0.1"
state_dir = "/tmp/lab"

[timeouts]
ready_secs = 5
"#,
    )
    .unwrap();
    assert_eq!(cfg.image, "quay.io/frrouting/frr:9.0.1");
    assert!(cfg.privileged);
    assert_eq!(cfg.timeouts.ready(), Duration::from_secs(5));
    assert_eq!(cfg.timeouts.command(), Duration::from_secs(15));
    assert_eq!(cfg.node_config_dir("as100"), PathBuf::from("/tmp/lab/as100"));
    assert_eq!(cfg.lock_file(), PathBuf::from("/tmp/lab/netsecsim.lock"));
}

#[test]
fn unknown_keys() {
    assert!(matches!(
        LabConfig::from_toml("imgae = \"frr\""),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        LabConfig::from_toml("[network]\nsubnet = \"10.0.0.0/8\""),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lab.toml");
    std::fs::write(&path, "[network]\nname = \"attack-lab\"\n").unwrap();

    let cfg = LabConfig::load(Some(&path)).unwrap();
    assert_eq!(cfg.network.name, "attack-lab");

    let missing = dir.path().join("missing.toml");
    match LabConfig::load(Some(&missing)) {
        Err(ConfigError::Io(p, _)) => assert_eq!(p, missing),
        r => panic!("unexpected result: {r:?}"),
    }
}

#[test]
fn bundled_config() {
    let cfg = LabConfig::from_toml(include_str!("../../netsecsim.toml")).unwrap();
    assert_eq!(cfg, LabConfig::default());
}

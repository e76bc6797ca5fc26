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

//! Tests of the lab against an in-memory container runtime.

use std::{path::Path, sync::Arc};

use crate::{
    config::{LabConfig, TimeoutConfig},
    topology::Topology,
    Active, Lab,
};

mod config;
mod export;
mod lab;

pub(crate) use mock::MockRuntime;

/// Configuration with short timeouts, storing its state in `dir`.
pub(crate) fn test_config(dir: &Path) -> LabConfig {
    LabConfig {
        state_dir: dir.to_path_buf(),
        timeouts: TimeoutConfig {
            command_secs: 1,
            ready_secs: 1,
            session_secs: 1,
            poll_interval_ms: 10,
        },
        ..Default::default()
    }
}

/// Create an active lab for the topology, backed by a fresh mock runtime.
pub(crate) fn active_lab(topo: Topology, dir: &Path) -> (Lab<Active>, Arc<MockRuntime>) {
    let runtime = Arc::new(MockRuntime::new());
    let lab = Lab::new(topo, test_config(dir), runtime.clone())
        .activate()
        .unwrap();
    (lab, runtime)
}

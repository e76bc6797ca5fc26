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

//! Typed builders for FRRouting configuration.
//!
//! Every builder collects the desired state as plain values and only renders text when calling
//! `build`. This separates the content of a configuration (which neighbor, which AS, which
//! network) from its syntax. The builders are used both to render the startup files that are
//! mounted into a router container (see [`FrrConf`], [`Daemons`] and [`VtyshConf`]), and to
//! generate command sequences that are sent to a running router through `vtysh`.
//!
//! ```
//! use frr_cfg::{RouterBgp, RouterBgpNeighbor};
//! use std::net::Ipv4Addr;
//!
//! let neighbor = Ipv4Addr::new(172, 20, 0, 10);
//! assert_eq!(
//!     RouterBgp::new(65200)
//!         .router_id(Ipv4Addr::new(172, 20, 0, 20))
//!         .neighbor(RouterBgpNeighbor::new(neighbor).remote_as(65100).activate())
//!         .build(),
//!     "\
//! router bgp 65200
//!   bgp router-id 172.20.0.20
//!   neighbor 172.20.0.10 remote-as 65100
//!   address-family ipv4 unicast
//!     neighbor 172.20.0.10 activate
//!   exit-address-family
//! exit
//! "
//! );
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

mod bgp;
mod files;
mod static_route;

pub use bgp::{RouterBgp, RouterBgpNeighbor};
pub use files::{Daemon, Daemons, FrrConf, LogTarget, VtyshConf};
pub use static_route::StaticRoute;

/// AS Number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsId(pub u32);

impl From<u32> for AsId {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

impl From<i32> for AsId {
    fn from(x: i32) -> Self {
        Self(x as u32)
    }
}

impl fmt::Display for AsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

/// Turn a rendered configuration snippet into the list of commands that must be typed into the
/// shell, one after the other. Empty lines and comments (starting with `!`) are skipped, and the
/// indentation is removed.
///
/// ```
/// use frr_cfg::command_lines;
///
/// let conf = "!\nip route 8.8.8.0/24 Null0\n  \nrouter bgp 10\n  network 8.8.8.0/24\nexit\n";
/// assert_eq!(
///     command_lines(conf),
///     vec!["ip route 8.8.8.0/24 Null0", "router bgp 10", "network 8.8.8.0/24", "exit"]
/// );
/// ```
pub fn command_lines(conf: &str) -> Vec<&str> {
    conf.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('!'))
        .collect()
}

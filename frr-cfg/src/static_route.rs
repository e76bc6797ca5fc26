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
//! Static routes

use ipnet::Ipv4Net;

/// Black-hole static route for a destination. A router only originates a `network` over BGP if a
/// matching route exists in its RIB, which this route provides.
///
/// ```
/// # use frr_cfg::StaticRoute;
/// use ipnet::Ipv4Net;
///
/// let dest: Ipv4Net = "8.8.8.0/24".parse().unwrap();
/// assert_eq!(StaticRoute::new(dest).build(), "ip route 8.8.8.0/24 Null0\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    destination: Ipv4Net,
}

impl StaticRoute {
    /// Create a black hole for the given destination.
    pub fn new(destination: Ipv4Net) -> Self {
        Self { destination }
    }

    /// Build the command.
    pub fn build(&self) -> String {
        format!("ip route {} Null0\n", self.destination)
    }
}

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

//! Startup files of an FRR instance: the daemon manifest (`daemons`), the vtysh front-end
//! settings (`vtysh.conf`) and the integrated routing configuration (`frr.conf`).

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::{RouterBgp, StaticRoute};

/// Routing daemons that can be enabled in the `daemons` manifest. `zebra`, `staticd` and
/// `watchfrr` are always started by FRR and are not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Daemon {
    Bgpd,
    Ospfd,
    Ospf6d,
    Ripd,
    Ripngd,
    Isisd,
    Pimd,
    Ldpd,
    Nhrpd,
    Eigrpd,
    Babeld,
    Sharpd,
    Pbrd,
    Bfdd,
    Fabricd,
    Vrrpd,
    Pathd,
}

impl Daemon {
    /// All daemons in the order in which they appear in the manifest.
    pub const ALL: [Daemon; 17] = [
        Daemon::Bgpd,
        Daemon::Ospfd,
        Daemon::Ospf6d,
        Daemon::Ripd,
        Daemon::Ripngd,
        Daemon::Isisd,
        Daemon::Pimd,
        Daemon::Ldpd,
        Daemon::Nhrpd,
        Daemon::Eigrpd,
        Daemon::Babeld,
        Daemon::Sharpd,
        Daemon::Pbrd,
        Daemon::Bfdd,
        Daemon::Fabricd,
        Daemon::Vrrpd,
        Daemon::Pathd,
    ];

    /// Name of the daemon as used in the manifest.
    pub fn name(&self) -> &'static str {
        match self {
            Daemon::Bgpd => "bgpd",
            Daemon::Ospfd => "ospfd",
            Daemon::Ospf6d => "ospf6d",
            Daemon::Ripd => "ripd",
            Daemon::Ripngd => "ripngd",
            Daemon::Isisd => "isisd",
            Daemon::Pimd => "pimd",
            Daemon::Ldpd => "ldpd",
            Daemon::Nhrpd => "nhrpd",
            Daemon::Eigrpd => "eigrpd",
            Daemon::Babeld => "babeld",
            Daemon::Sharpd => "sharpd",
            Daemon::Pbrd => "pbrd",
            Daemon::Bfdd => "bfdd",
            Daemon::Fabricd => "fabricd",
            Daemon::Vrrpd => "vrrpd",
            Daemon::Pathd => "pathd",
        }
    }
}

/// The `daemons` manifest read by `watchfrr` on startup.
///
/// ```
/// use frr_cfg::{Daemon, Daemons};
///
/// let manifest = Daemons::new().enable(Daemon::Bgpd).build();
/// assert!(manifest.starts_with("bgpd=yes\nospfd=no\n"));
/// assert!(manifest.contains("vtysh_enable=yes\n"));
/// assert!(manifest.contains("bgpd_options=\"   -A 127.0.0.1\"\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Daemons {
    enabled: BTreeSet<Daemon>,
}

impl Daemons {
    /// Create a manifest with all optional daemons disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the given daemon.
    pub fn enable(&mut self, daemon: Daemon) -> &mut Self {
        self.enabled.insert(daemon);
        self
    }

    /// Check whether a daemon is enabled.
    pub fn is_enabled(&self, daemon: Daemon) -> bool {
        self.enabled.contains(&daemon)
    }

    /// Generate the manifest.
    pub fn build(&self) -> String {
        let mut s = Daemon::ALL
            .iter()
            .map(|d| format!("{}={}\n", d.name(), if self.is_enabled(*d) { "yes" } else { "no" }))
            .join("");
        s.push_str("\nvtysh_enable=yes\n");
        s.push_str("zebra_options=\"  -A 127.0.0.1 -s 90000000\"\n");
        for d in Daemon::ALL.iter().filter(|d| self.is_enabled(**d)) {
            s.push_str(&format!("{}_options=\"   -A 127.0.0.1\"\n", d.name()));
        }
        s.push_str("staticd_options=\"-A 127.0.0.1\"\n");
        s
    }
}

/// The `vtysh.conf` file.
///
/// ```
/// use frr_cfg::VtyshConf;
///
/// assert_eq!(
///     VtyshConf::new().hostname("as100").build(),
///     "service integrated-vtysh-config\nhostname as100\n"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct VtyshConf {
    hostname: Option<String>,
}

impl VtyshConf {
    /// Create a new vtysh configuration, using the integrated configuration file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname shown in the prompt.
    pub fn hostname(&mut self, hostname: impl Into<String>) -> &mut Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Generate the file.
    pub fn build(&self) -> String {
        let mut s = String::from("service integrated-vtysh-config\n");
        if let Some(h) = self.hostname.as_ref() {
            s.push_str(&format!("hostname {h}\n"));
        }
        s
    }
}

/// Where FRR writes its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Log to standard output (visible with `docker logs`).
    Stdout,
}

/// The integrated `frr.conf` configuration file.
///
/// ```
/// use frr_cfg::{FrrConf, LogTarget, RouterBgp, StaticRoute};
/// use ipnet::Ipv4Net;
///
/// let net: Ipv4Net = "10.100.0.0/24".parse().unwrap();
/// let conf = FrrConf::new("as100")
///     .log(LogTarget::Stdout)
///     .static_route(StaticRoute::new(net))
///     .bgp(RouterBgp::new(65100).network(net))
///     .build();
/// assert_eq!(
///     conf,
///     "\
/// frr defaults traditional
/// hostname as100
/// log stdout
/// service integrated-vtysh-config
/// !
/// ip route 10.100.0.0/24 Null0
/// !
/// router bgp 65100
///   address-family ipv4 unicast
///     network 10.100.0.0/24
///   exit-address-family
/// exit
/// !
/// line vty
/// !
/// "
/// );
/// ```
#[derive(Debug, Clone)]
pub struct FrrConf {
    hostname: String,
    log: Option<LogTarget>,
    static_routes: Vec<StaticRoute>,
    bgp: Option<RouterBgp>,
}

impl FrrConf {
    /// Create a new, empty configuration for the given host.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            log: None,
            static_routes: Vec::new(),
            bgp: None,
        }
    }

    /// Set the logging target.
    pub fn log(&mut self, target: LogTarget) -> &mut Self {
        self.log = Some(target);
        self
    }

    /// Add a static route.
    pub fn static_route(&mut self, route: StaticRoute) -> &mut Self {
        self.static_routes.push(route);
        self
    }

    /// Set the BGP router section.
    pub fn bgp(&mut self, bgp: impl Into<RouterBgp>) -> &mut Self {
        self.bgp = Some(bgp.into());
        self
    }

    /// Get the BGP section, if any.
    pub fn get_bgp(&self) -> Option<&RouterBgp> {
        self.bgp.as_ref()
    }

    /// Get the hostname.
    pub fn get_hostname(&self) -> &str {
        &self.hostname
    }

    /// Generate the file.
    pub fn build(&self) -> String {
        let mut s = String::from("frr defaults traditional\n");
        s.push_str(&format!("hostname {}\n", self.hostname));
        match self.log.as_ref() {
            Some(LogTarget::Stdout) => s.push_str("log stdout\n"),
            None => {}
        }
        s.push_str("service integrated-vtysh-config\n!\n");
        if !self.static_routes.is_empty() {
            self.static_routes.iter().for_each(|r| s.push_str(&r.build()));
            s.push_str("!\n");
        }
        if let Some(bgp) = self.bgp.as_ref() {
            s.push_str(&bgp.build());
            s.push_str("!\n");
        }
        s.push_str("line vty\n!\n");
        s
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use crate::*;

    #[test]
    fn frr_conf() {
        let mut bgp = RouterBgp::new(65100);
        bgp.router_id(Ipv4Addr::new(172, 20, 0, 10))
            .ebgp_requires_policy(false)
            .network_import_check(false)
            .network("10.1.0.0/24".parse().unwrap())
            .neighbor(
                RouterBgpNeighbor::new(Ipv4Addr::new(172, 20, 0, 20))
                    .remote_as(65200)
                    .description("provider:as200")
                    .activate(),
            );
        let mut conf = FrrConf::new("as100");
        conf.log(LogTarget::Stdout)
            .static_route(StaticRoute::new("10.1.0.0/24".parse().unwrap()))
            .bgp(bgp);

        assert_eq!(
            conf.build(),
            "\
frr defaults traditional
hostname as100
log stdout
service integrated-vtysh-config
!
ip route 10.1.0.0/24 Null0
!
router bgp 65100
  bgp router-id 172.20.0.10
  no bgp ebgp-requires-policy
  no bgp network import-check
  neighbor 172.20.0.20 remote-as 65200
  neighbor 172.20.0.20 description provider:as200
  address-family ipv4 unicast
    network 10.1.0.0/24
    neighbor 172.20.0.20 activate
  exit-address-family
exit
!
line vty
!
"
        );
    }

    #[test]
    fn replace_neighbor() {
        let neighbor = Ipv4Addr::new(172, 20, 0, 20);
        let mut bgp = RouterBgp::new(65100);
        bgp.no_neighbor(RouterBgpNeighbor::new(neighbor))
            .neighbor(RouterBgpNeighbor::new(neighbor).remote_as(65200).activate());
        let conf = bgp.build();
        assert_eq!(
            command_lines(&conf),
            vec![
                "router bgp 65100",
                "no neighbor 172.20.0.20",
                "neighbor 172.20.0.20 remote-as 65200",
                "address-family ipv4 unicast",
                "neighbor 172.20.0.20 activate",
                "exit-address-family",
                "exit",
            ]
        );
    }

    #[test]
    fn config_lines_skip_comments() {
        let conf = FrrConf::new("as100").build();
        assert_eq!(
            command_lines(&conf),
            vec![
                "frr defaults traditional",
                "hostname as100",
                "service integrated-vtysh-config",
                "line vty",
            ]
        );
    }
}

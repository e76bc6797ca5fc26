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

//! Command sessions with the FRR shell (`vtysh`) of a running router.

use std::{collections::BTreeMap, net::Ipv4Addr, sync::Arc};

use frr_cfg::command_lines;
use ipnet::Ipv4Net;
use itertools::Itertools;
use thiserror::Error;

use super::bgp::{BgpNeighbor, BgpRoute, ParseError};
use crate::docker::{ContainerRuntime, RuntimeError};

/// A handle to the `vtysh` shell of a single router. Each call spawns `vtysh` inside the
/// container, passing every command line with `-c`.
///
/// The shell does not protect concurrent configuration sessions. Callers that send configuration
/// must hold the CLI lock of the node.
#[derive(Debug, Clone)]
pub struct Vtysh {
    node: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Vtysh {
    /// Create a new handle to the shell of the given node.
    pub fn new(node: impl Into<String>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            node: node.into(),
            runtime,
        }
    }

    /// Name of the node
    pub fn name(&self) -> &str {
        &self.node
    }

    /// Run a sequence of commands in a single shell invocation, and return STDOUT.
    async fn run(&self, cmds: &[impl AsRef<str>]) -> Result<String, VtyshError> {
        let cmd_str = || cmds.iter().map(AsRef::as_ref).join("; ");
        log::trace!("[{}] vtysh `{}`", self.node, cmd_str());
        let mut args = vec![String::from("vtysh")];
        for cmd in cmds {
            args.push(String::from("-c"));
            args.push(cmd.as_ref().to_string());
        }
        let out = self.runtime.exec(&self.node, &args).await?;
        if !out.success() {
            log::debug!(
                "[{}] vtysh `{}` exited with code {}{}{}",
                self.node,
                cmd_str(),
                out.code,
                if out.stdout.is_empty() {
                    String::new()
                } else {
                    format!("\nSTDOUT:\n{}", out.stdout)
                },
                if out.stderr.is_empty() {
                    String::new()
                } else {
                    format!("\nSTDERR:\n{}", out.stderr)
                },
            );
            return Err(VtyshError::CommandError {
                node: self.node.clone(),
                cmd: cmd_str(),
                output: format!("{}{}", out.stdout, out.stderr).trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    /// Execute the show command with the provided arguments, e.g., `show("version")`.
    pub async fn show(&self, cmd: impl AsRef<str>) -> Result<String, VtyshError> {
        self.run(&[format!("show {}", cmd.as_ref())]).await
    }

    /// Execute a command that is expected to produce no output. Any output containing an error
    /// marker (`%`) is treated as a rejection.
    pub async fn execute(&self, cmd: impl AsRef<str>) -> Result<(), VtyshError> {
        let out = self.run(&[cmd.as_ref()]).await?;
        check_rejected(&self.node, cmd.as_ref(), out)
    }

    /// Apply the configuration in configuration mode. Empty lines and comments (`!`) are skipped.
    pub async fn configure(&self, config: impl AsRef<str>) -> Result<(), VtyshError> {
        let lines = command_lines(config.as_ref());
        if lines.is_empty() {
            return Ok(());
        }
        log::debug!(
            "[{}] configure:\n{}",
            self.node,
            lines.iter().map(|l| format!("  {l}")).join("\n")
        );
        let cmds = std::iter::once("configure terminal")
            .chain(lines.iter().copied())
            .chain(std::iter::once("end"))
            .collect::<Vec<&str>>();
        let out = self.run(&cmds[..]).await?;
        check_rejected(&self.node, &lines.join("; "), out)
    }

    /// Get the version string of the routing suite. This is used to check that the daemons
    /// accept commands.
    pub async fn version(&self) -> Result<String, VtyshError> {
        self.show("version").await
    }

    /// Get all BGP neighbors.
    pub async fn bgp_neighbors(&self) -> Result<BTreeMap<Ipv4Addr, BgpNeighbor>, VtyshError> {
        let out = self.show("bgp neighbors json").await?;
        Ok(BgpNeighbor::from_json(&out)?)
    }

    /// Get the BGP table.
    pub async fn bgp_routes(&self) -> Result<BTreeMap<Ipv4Net, Vec<BgpRoute>>, VtyshError> {
        let out = self.show("ip bgp json").await?;
        Ok(BgpRoute::from_json(&out)?)
    }

    /// Send the command `clear ip bgp {neighbor} soft` to request a route refresh from that
    /// neighbor and to re-advertise all routes to it.
    pub async fn refresh_routes(&self, neighbor: Ipv4Addr) -> Result<(), VtyshError> {
        self.execute(format!("clear ip bgp {neighbor} soft")).await
    }
}

fn check_rejected(node: &str, cmd: &str, out: String) -> Result<(), VtyshError> {
    if out.contains('%') {
        log::warn!("[{node}] `{cmd}` was rejected:\n{}", out.trim());
        Err(VtyshError::Rejected {
            node: node.to_string(),
            cmd: cmd.to_string(),
            output: out.trim().to_string(),
        })
    } else {
        Ok(())
    }
}

/// Error while interacting with the shell of a router.
#[derive(Debug, Error)]
pub enum VtyshError {
    /// Cannot execute the shell.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
    /// The shell exited with an error
    #[error("[{node}] `{cmd}` failed: {output}")]
    CommandError {
        /// Name of the node
        node: String,
        /// Command
        cmd: String,
        /// Output of the shell
        output: String,
    },
    /// The router rejected the command
    #[error("[{node}] `{cmd}` was rejected: {output}")]
    Rejected {
        /// Name of the node
        node: String,
        /// Command
        cmd: String,
        /// Output of the shell
        output: String,
    },
    /// Cannot parse the output
    #[error("Cannot parse the output: {0}")]
    Parse(#[from] ParseError),
}

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

//! Module for managing containers and the container network.
//!
//! The lab never talks to the container runtime directly, but through the [`ContainerRuntime`]
//! trait. The production implementation [`DockerCli`] spawns `docker` subprocesses.

use std::{
    ffi::OsStr,
    fmt,
    net::Ipv4Addr,
    path::PathBuf,
    process::Output,
    time::Duration,
};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use itertools::Itertools;
use thiserror::Error;
use tokio::{process::Command, time::timeout};

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// No container with that name exists.
    Missing,
    /// The container exists, but is not running.
    Stopped,
    /// The container is running.
    Running,
}

/// Everything required to create a router container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name and hostname.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Network to attach the container to.
    pub network: String,
    /// Static address within the network.
    pub address: Ipv4Addr,
    /// Host directory that is mounted into the container.
    pub config_dir: PathBuf,
    /// Mount point of `config_dir` inside the container.
    pub mount_point: String,
    /// Run with elevated privileges.
    pub privileged: bool,
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code of the command.
    pub code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited successfully
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Boundary to the container runtime.
#[async_trait]
pub trait ContainerRuntime: fmt::Debug + Send + Sync {
    /// Check if a network with the given name exists.
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Create a bridge network with the given address block.
    async fn create_network(
        &self,
        name: &str,
        subnet: Ipv4Net,
        gateway: Option<Ipv4Addr>,
    ) -> Result<(), RuntimeError>;

    /// Remove the network. Removing a missing network is not an error.
    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Get the state of a container.
    async fn container_state(&self, name: &str) -> Result<ContainerState, RuntimeError>;

    /// Create and start a container in the background.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Stop and remove a container. Removing a missing container is not an error.
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Execute a command inside a running container. A non-zero exit code is not an error, but
    /// reported in the output.
    async fn exec(&self, name: &str, args: &[String]) -> Result<ExecOutput, RuntimeError>;

    /// List the names of all containers attached to the given network.
    async fn list_containers(&self, network: &str) -> Result<Vec<String>, RuntimeError>;
}

/// Container runtime that calls the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    cmd_timeout: Duration,
}

impl DockerCli {
    /// Create a new client calling `docker`, where every command must finish within `cmd_timeout`.
    pub fn new(cmd_timeout: Duration) -> Self {
        Self {
            program: String::from("docker"),
            cmd_timeout,
        }
    }

    /// Use a different executable with a docker-compatible interface (e.g., `podman`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Create a raw command with `kill_on_drop = true`, such that a timeout terminates the
    /// subprocess.
    fn raw_command(&self, args: &[impl AsRef<OsStr>]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd.kill_on_drop(true);
        log::trace!("[tokio::process::Command] {:?}", cmd);
        cmd
    }

    /// Execute the command and return its raw output, without checking the exit code.
    async fn output(&self, target: &str, args: &[impl AsRef<str>]) -> Result<Output, RuntimeError> {
        let cmd_str = self.cmd_str(args);
        log::trace!("[{}] `{}`", target, cmd_str);
        let args = args.iter().map(AsRef::as_ref).collect::<Vec<&str>>();
        let mut cmd = self.raw_command(&args[..]);
        match timeout(self.cmd_timeout, cmd.output()).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => {
                log::error!("[{}] {} failed: {}", target, cmd_str, e);
                Err(RuntimeError::Client(e))
            }
            Err(_) => {
                log::warn!("[{}] {} timed out!", target, cmd_str);
                Err(RuntimeError::Timeout(target.to_string(), cmd_str))
            }
        }
    }

    /// Execute the command and check that it exits successfully. Returns STDOUT.
    async fn execute(&self, target: &str, args: &[impl AsRef<str>]) -> Result<String, RuntimeError> {
        let output = self.output(target, args).await?;
        check_output(target, output, || self.cmd_str(args))
    }

    fn cmd_str(&self, args: &[impl AsRef<str>]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(AsRef::as_ref))
            .join(" ")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let out = self.output(name, &["network", "inspect", name]).await?;
        Ok(out.status.success())
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: Ipv4Net,
        gateway: Option<Ipv4Addr>,
    ) -> Result<(), RuntimeError> {
        let mut args = vec![
            String::from("network"),
            String::from("create"),
            String::from("--driver"),
            String::from("bridge"),
            format!("--subnet={subnet}"),
        ];
        if let Some(gw) = gateway {
            args.push(format!("--gateway={gw}"));
        }
        args.push(name.to_string());
        self.execute(name, &args[..]).await.map(|_| ())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.network_exists(name).await? {
            log::debug!("[{}] network does not exist.", name);
            return Ok(());
        }
        self.execute(name, &["network", "rm", name]).await.map(|_| ())
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        let out = self
            .output(name, &["inspect", "-f", "{{.State.Running}}", name])
            .await?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !out.status.success() {
            if stderr.contains("No such") {
                Ok(ContainerState::Missing)
            } else {
                Err(RuntimeError::CommandError(
                    name.to_string(),
                    format!("inspect {name}: {}", stderr.trim()),
                    out.status.code().unwrap_or_default(),
                ))
            }
        } else if stdout.trim() == "true" {
            Ok(ContainerState::Running)
        } else {
            Ok(ContainerState::Stopped)
        }
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let config_dir = std::fs::canonicalize(&spec.config_dir)?;
        let mut args = vec![
            String::from("run"),
            String::from("-d"),
            format!("--name={}", spec.name),
            format!("--hostname={}", spec.name),
            format!("--network={}", spec.network),
            format!("--ip={}", spec.address),
            format!("--volume={}:{}", config_dir.display(), spec.mount_point),
        ];
        if spec.privileged {
            args.push(String::from("--privileged"));
        }
        args.push(spec.image.clone());
        self.execute(&spec.name, &args[..]).await.map(|_| ())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let out = self.output(name, &["rm", "-f", name]).await?;
        let stderr = String::from_utf8_lossy(&out.stderr);
        if out.status.success() || stderr.contains("No such") {
            Ok(())
        } else {
            check_output(name, out, || format!("{} rm -f {name}", self.program)).map(|_| ())
        }
    }

    async fn exec(&self, name: &str, args: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut full = vec![String::from("exec"), name.to_string()];
        full.extend(args.iter().cloned());
        let out = self.output(name, &full[..]).await?;
        Ok(ExecOutput {
            code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8(out.stdout)?,
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    async fn list_containers(&self, network: &str) -> Result<Vec<String>, RuntimeError> {
        let filter = format!("network={network}");
        let stdout = self
            .execute(
                network,
                &["ps", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            )
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Check the output for successful exit code, and return STDOUT.
fn check_output<F, S>(target: &str, output: Output, cmd: F) -> Result<String, RuntimeError>
where
    F: FnOnce() -> S,
    S: fmt::Display,
{
    if output.status.success() {
        Ok(String::from_utf8(output.stdout)?)
    } else {
        let cmd = cmd().to_string();
        log::error!(
            "[{}] {} exited with exit code {}{}{}",
            target,
            cmd,
            output.status.code().unwrap_or_default(),
            if !output.stdout.is_empty() {
                format!("\nSTDOUT:\n{}", String::from_utf8_lossy(&output.stdout))
            } else {
                String::new()
            },
            if !output.stderr.is_empty() {
                format!("\nSTDERR:\n{}", String::from_utf8_lossy(&output.stderr))
            } else {
                String::new()
            }
        );
        Err(RuntimeError::CommandError(
            target.to_string(),
            cmd,
            output.status.code().unwrap_or_default(),
        ))
    }
}

/// Error at the boundary to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Cannot spawn the client.
    #[error("Container runtime client error: {0}")]
    Client(#[from] std::io::Error),
    /// A command did not finish in time.
    #[error("[{0}] Timeout while executing `{1}`")]
    Timeout(String, String),
    /// A command exited with a non-zero exit code.
    #[error("[{0}] `{1}` exited with exit code {2}")]
    CommandError(String, String, i32),
    /// The output is not valid UTF-8.
    #[error("Output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// The operation was cancelled.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl From<crate::cancel::Cancelled> for RuntimeError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        Self::Cancelled
    }
}

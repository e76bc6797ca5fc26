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

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use ipnet::Ipv4Net;
use itertools::Itertools;

use netsecsim::{
    config::LabConfig,
    docker::DockerCli,
    export,
    router::Readiness,
    topology::Topology,
    Lab, LabError,
};

/// Deploy a multi-AS BGP lab of FRRouting containers, and observe its state.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Configuration file of the lab. If not given, the file in `NETSECSIM_CONFIG` is read, or the
    /// defaults are used.
    #[clap(long, short = 'c', global = true)]
    config: Option<PathBuf>,
    /// Scenario file describing the topology. If not given, the built-in scenario with five
    /// Autonomous Systems is used.
    #[clap(long, short = 's', global = true)]
    scenario: Option<PathBuf>,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the scenario and write the configuration of every node, without touching any
    /// container.
    Render {
        /// Output directory. Defaults to the state directory.
        #[clap(long, short)]
        out: Option<PathBuf>,
    },
    /// Render the configuration, start all routers, establish all sessions and print the status.
    Setup,
    /// Establish (or repair) the sessions on the running routers.
    Configure,
    /// Print the state of every router and session.
    Status {
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
    /// Print the BGP table of a router.
    Routes {
        /// Name of the router
        node: String,
        /// Only show routes for this prefix
        #[clap(long, short)]
        prefix: Option<Ipv4Net>,
        /// Print the routes as JSON
        #[clap(long)]
        json: bool,
    },
    /// Remove all routers and the network.
    Teardown,
}

fn main() -> ExitCode {
    pretty_env_logger::init_timed();

    let args = Cli::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Cannot start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_fatal(&e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::SUCCESS
        }
    }
}

/// Errors caused by the input (or by another lab holding the lock) make the process fail. Other
/// errors are reported, since a partially working lab is still a usable result.
fn is_fatal(e: &LabError) -> bool {
    matches!(
        e,
        LabError::Validation(_)
            | LabError::Generation(_)
            | LabError::Config(_)
            | LabError::CannotObtainLock(_)
            | LabError::UnknownNode(_)
            | LabError::Io(_)
    )
}

async fn run(args: Cli) -> Result<(), LabError> {
    let config = LabConfig::load(args.config.as_deref())?;
    let topo = match args.scenario.as_ref() {
        Some(path) => Topology::from_toml(&std::fs::read_to_string(path)?)?,
        None => Topology::netsec_default(),
    };
    let runtime = Arc::new(DockerCli::new(config.timeouts.command()));
    let lab = Lab::new(topo, config, runtime);

    let cancel = lab.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted! Cancelling all operations");
            cancel.cancel();
        }
    });

    match args.cmd {
        Command::Render { out } => {
            let dirs = match out {
                Some(out) => export::write_all(lab.topology(), out)?,
                None => lab.render()?,
            };
            for (node, dir) in dirs {
                println!("{node}: {}", dir.display());
            }
        }
        Command::Setup => {
            let mut lab = lab.activate()?;
            let report = lab.setup().await?;
            for (node, result) in report.starts.iter() {
                match result {
                    Ok(Readiness::Ready) => {}
                    Ok(r) => println!("{node}: {r}"),
                    Err(e) => println!("{node}: failed to start: {e}"),
                }
            }
            print!("{}\n{}", report.sessions, report.status);
        }
        Command::Configure => {
            let mut lab = lab.activate()?;
            let report = lab.configure_sessions().await?;
            let status = lab.status().await?;
            print!("{report}\n{status}");
        }
        Command::Status { json } => {
            let status = lab.status().await?;
            if json {
                match serde_json::to_string_pretty(&status) {
                    Ok(s) => println!("{s}"),
                    Err(e) => log::error!("Cannot serialize the status: {e}"),
                }
            } else {
                print!("{status}");
            }
        }
        Command::Routes { node, prefix, json } => {
            let routes = lab.routes(&node, prefix).await?;
            if json {
                match serde_json::to_string_pretty(&routes) {
                    Ok(s) => println!("{s}"),
                    Err(e) => log::error!("Cannot serialize the routes: {e}"),
                }
            } else {
                println!("   {:<20} {:<16} path", "prefix", "next-hop");
                for r in routes {
                    println!(
                        "{}{} {:<20} {:<16} {}",
                        if r.valid { '*' } else { ' ' },
                        if r.best { '>' } else { ' ' },
                        r.net.to_string(),
                        r.next_hop.map(|a| a.to_string()).unwrap_or_default(),
                        r.path.iter().map(|a| a.0).join(" ")
                    );
                }
            }
        }
        Command::Teardown => {
            let mut lab = lab.activate()?;
            lab.teardown().await?;
        }
    }

    Ok(())
}

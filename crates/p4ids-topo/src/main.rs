//! P4 IDS test topology
//!
//! Builds the two-host IDS test network (`h1 -- s1 -- h2`, controller
//! reference `c0`), starts it, hands control to an interactive shell and
//! tears everything down on exit, Ctrl-D, Ctrl-C or a failed start.

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use p4ids_net::{DryRunRunner, Network, Runner, SystemRunner, Topology, TopologyConfig};
use p4ids_topo::session::{run_session, Console, Signals};
use p4ids_topo::shell::Shell;
use tracing_subscriber::EnvFilter;

/// Two-host P4 IDS test topology.
#[derive(Parser, Debug)]
#[command(name = "p4ids-topo", about = "Two-host P4 IDS test topology")]
struct Cli {
    /// TOML topology file. Without it the default IDS topology is used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the OS commands instead of executing them.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Run OS commands through sudo.
    #[arg(long, default_value_t = false)]
    sudo: bool,

    /// Print the resolved topology as JSON and exit.
    #[arg(long, default_value_t = false)]
    print_topology: bool,

    /// Start the network and stop it again without opening the shell.
    #[arg(long, default_value_t = false)]
    no_shell: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TopologyConfig::from_path(path)
            .with_context(|| format!("failed to load topology from {}", path.display()))?,
        None => TopologyConfig::default(),
    };
    let topology = config.build().context("invalid topology")?;

    if cli.print_topology {
        println!("{}", serde_json::to_string_pretty(&topology)?);
        return Ok(());
    }

    tracing::info!(
        hosts = topology.hosts().len(),
        switches = topology.switches().len(),
        links = topology.links().len(),
        dry_run = cli.dry_run,
        "p4ids-topo starting"
    );

    if cli.dry_run {
        run(topology, DryRunRunner::new(), cli.no_shell)
    } else {
        run(topology, SystemRunner::new(cli.sudo), cli.no_shell)
    }
}

fn run<R: Runner>(topology: Topology, runner: R, no_shell: bool) -> anyhow::Result<()> {
    // installed before start in every mode so an interrupt during
    // provisioning still ends in teardown instead of killing the process
    let signals = Signals::install().context("failed to install signal handler")?;

    let mut net = Network::new(topology, runner);
    net.start().context("failed to start network")?;

    let result = if no_shell {
        if signals.interrupted() {
            tracing::info!("interrupted during start");
        }
        Ok(())
    } else {
        interact(&mut net, &mut Console::spawn(signals))
    };

    let report = net.stop();
    if report.failed > 0 {
        tracing::warn!(
            removed = report.removed,
            failed = report.failed,
            "teardown incomplete, leftover interfaces or namespaces may remain"
        );
    }
    result
}

fn interact<R: Runner>(net: &mut Network<R>, console: &mut Console) -> anyhow::Result<()> {
    tracing::info!("*** Running CLI");
    let mut shell = Shell::new(net, io::stdout());
    let end = run_session(&mut shell, console).context("shell output failed")?;
    tracing::debug!(?end, "session ended");
    Ok(())
}

//! vcluster CLI
//!
//! Drives a label-scoped virtual cluster on a Peloton scheduler:
//!
//! - `vcluster setup --label ci-1` brings the cluster up and prints its endpoints
//! - `vcluster teardown --label ci-1 [--remove]` stops (and deletes) its jobs
//! - `vcluster leader` prints the elected Mesos master
//! - `vcluster status --label ci-1` lists the cluster's jobs
//! - `vcluster logs NAME...` copies container output into the log

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vcluster::{
    container::dump_logs, ClusterSpec, DriverConfig, ErrorKind, LeaderLookup, VirtualCluster,
};
use vcluster_coordination::ZkRestStore;
use vcluster_docker::DockerEngine;
use vcluster_id::Label;
use vcluster_scheduler::{format_stats, RpcConfig, SchedulerClient, YarpcSchedulerClient};

/// Virtual test cluster driver.
#[derive(Debug, Parser)]
#[command(name = "vcluster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Label scoping every job of the cluster.
    #[arg(long, global = true, env = "VCLUSTER_LABEL", default_value = "vcluster")]
    label: String,

    /// Cluster spec (TOML). Built-in defaults are used when omitted.
    #[arg(long, global = true, env = "VCLUSTER_SPEC")]
    spec: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bring the cluster up.
    Setup,

    /// Stop the cluster's jobs.
    Teardown {
        /// Also delete the jobs once they are fully stopped.
        #[arg(long)]
        remove: bool,
    },

    /// Print the elected Mesos master.
    Leader,

    /// List the cluster's jobs and their states.
    Status,

    /// Copy the output of containers into the log.
    Logs {
        /// Container names.
        #[arg(required = true)]
        containers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DriverConfig::from_env()?;
    init_tracing(&config);

    if let Err(e) = run(cli, config).await {
        print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(config: &DriverConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let json = config.log_json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run(cli: Cli, config: DriverConfig) -> Result<()> {
    let label = Label::parse(&cli.label)?;
    let spec = match &cli.spec {
        Some(path) => ClusterSpec::load(path)?,
        None => ClusterSpec::default(),
    };

    let client: Arc<dyn SchedulerClient> = Arc::new(YarpcSchedulerClient::new(RpcConfig {
        jobmgr_url: config.jobmgr_url.clone(),
        resmgr_url: config.resmgr_url.clone(),
        timeout: config.rpc_timeout,
        ..RpcConfig::default()
    })?);
    let store = ZkRestStore::new(config.zk_rest_url.clone(), config.rpc_timeout)
        .context("failed to create coordination client")?;
    let leader = LeaderLookup::new(Arc::new(store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        label = %label,
        jobmgr_url = %config.jobmgr_url,
        resmgr_url = %config.resmgr_url,
        "Configuration loaded"
    );

    let mut cluster = VirtualCluster::new(label.clone(), spec, Arc::clone(&client))
        .with_poll_config(config.poll_config())
        .with_shutdown(shutdown_rx)
        .with_leader_lookup(leader.clone());

    match cli.command {
        Commands::Setup => {
            let info = cluster.setup().await?;
            println!("{} {}", "Cluster up:".green().bold(), info.label);
            println!("  zookeeper   {}", info.zookeeper);
            if let Some((host, port)) = &info.mesos_leader {
                println!("  mesos       {host}:{port}");
            }
            println!("  cassandra   {}", info.cassandra);
            for (module, job_id) in &info.jobs {
                println!("  {:<20} {}", module, job_id.to_string().dimmed());
            }
        }
        Commands::Teardown { remove } => {
            let ids = cluster.teardown(remove).await?;
            let verb = if remove { "Removed" } else { "Stopped" };
            println!(
                "{} {} job(s) of {}",
                verb.green().bold(),
                ids.len(),
                label
            );
        }
        Commands::Leader => {
            let (host, port) = leader.leader().await?;
            println!("{host}:{port}");
        }
        Commands::Status => {
            let statuses = cluster.status().await?;
            if statuses.is_empty() {
                println!("{}", "No jobs found.".dimmed());
            }
            for entry in statuses {
                println!(
                    "{:<20} {} {:<10} {}",
                    entry.module,
                    entry.job_id.to_string().dimmed(),
                    entry.status.state.to_string().bold(),
                    format_stats(&entry.status.task_stats)
                );
            }
        }
        Commands::Logs { containers } => {
            let engine = DockerEngine::new(&config.docker_socket);
            if !engine.socket_exists() {
                anyhow::bail!("docker socket {} not found", config.docker_socket);
            }
            let lines = dump_logs(&engine, &containers).await;
            println!("{} {lines} line(s)", "Dumped".green().bold());
        }
    }

    Ok(())
}

/// Print an error in a user-friendly format.
fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let Some(err) = err.downcast_ref::<vcluster::Error>() else {
        return;
    };
    let hint = match err.kind() {
        ErrorKind::Launch => {
            "Hint: the failed job was left in place; inspect it, then run `vcluster teardown`."
        }
        ErrorKind::Timeout => "Hint: raise VCLUSTER_MAX_ATTEMPTS or VCLUSTER_POLL_INTERVAL_SECS.",
        ErrorKind::FetchExhausted | ErrorKind::Client => {
            "Hint: check VCLUSTER_JOBMGR_URL, VCLUSTER_RESMGR_URL and VCLUSTER_ZK_REST_URL."
        }
        _ => return,
    };
    eprintln!("\n{}", hint.yellow());
}

//! CLI commands

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;

use crate::config::Config;
use crate::monitor::{GroupEvent, MonitoringMode};
use crate::session::SimulatedSession;

#[derive(Parser)]
#[command(name = "opcmon")]
#[command(about = "Watch groups of OPC UA monitored items", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config path (default: ~/.opcmon/config.yml)
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured group
    Show,

    /// Register the group on a simulated server and print value changes
    Watch {
        /// Stop after this many changes
        #[arg(long, default_value = "10")]
        count: usize,

        /// Monitoring mode to switch to after registration
        #[arg(long)]
        mode: Option<String>,

        /// Stop after this many seconds without a change
        #[arg(long, default_value = "10")]
        idle_secs: u64,

        /// Print changes as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run() -> Result<()> {
    let Cli { command, config: config_file } = Cli::parse();

    // Create a multi-threaded runtime for CLI operations
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        match command {
        Commands::Show => {
            let config = Config::load(config_file.as_deref())?;
            let session = Arc::new(SimulatedSession::new(config.simulation.clone()));
            let group = config.build_group(session)?;

            println!("{}", group);
            Ok(())
        }

        Commands::Watch { count, mode, idle_secs, json } => {
            let options = WatchOptions {
                count,
                mode: mode.map(|m| MonitoringMode::from_str(&m)).transpose()?,
                json,
                idle: Duration::from_secs(idle_secs),
            };
            let config = Config::load(config_file.as_deref())?;

            let seen = watch(config, options, &mut std::io::stdout()).await?;
            println!("Terminated group after {} changes", seen);
            Ok(())
        }

        Commands::InitConfig { force } => {
            let path = Config::config_path(config_file.as_deref())?;
            if path.exists() && !force {
                anyhow::bail!("Config already exists at {:?} (use --force to overwrite)", path);
            }

            Config::default().save(config_file.as_deref())?;
            println!("Wrote config to {}", path.display());
            Ok(())
        }
        }
    })
}

/// Settings for [`watch`]
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Stop after this many changes
    pub count: usize,
    /// Mode to switch to once registered
    pub mode: Option<MonitoringMode>,
    pub json: bool,
    /// Longest wait for the next event before giving up
    pub idle: Duration,
}

/// Register the configured group on a simulated session and write its changes to `out`.
///
/// Returns the number of changes written. The group is terminated before returning,
/// whether the loop ended on `count`, on the idle limit, or on Ctrl-C.
pub async fn watch<W: Write>(config: Config, options: WatchOptions, out: &mut W) -> Result<usize> {
    let session = Arc::new(SimulatedSession::new(config.simulation.clone()));
    let group = config.build_group(session.clone())?;
    let mut events = group.events();

    group.monitor().await?;
    if let Some(mode) = options.mode {
        group.set_monitoring_mode(mode).await?;
        if mode != MonitoringMode::Reporting {
            tracing::warn!(%mode, "Items in this mode report no changes");
        }
    }
    tracing::info!("Watching {} items", group.len());

    let publisher = session.spawn_publisher();
    let mut seen = 0;

    while seen < options.count {
        tokio::select! {
            event = tokio::time::timeout(options.idle, events.next()) => {
                let event = match event {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::info!(idle = ?options.idle, "No changes received, stopping");
                        break;
                    }
                };
                if let GroupEvent::Changed { index, item, value } = event {
                    seen += 1;
                    if options.json {
                        let line = serde_json::json!({
                            "index": index,
                            "node_id": item.target().node_id.to_string(),
                            "value": value,
                        });
                        writeln!(out, "{}", line)?;
                    } else {
                        writeln!(out, "[{}] {} = {}", index, item.target().node_id, value)?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    publisher.abort();
    group.terminate().await?;
    Ok(seen)
}

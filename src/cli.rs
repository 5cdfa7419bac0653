use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sipmon::capture::create_capture;
use sipmon::cdr::{self, CdrStore};
use sipmon::config::Config;
use sipmon::engine::Engine;

#[derive(Parser)]
#[command(name = "sipmon")]
#[command(author, version, about = "Passive SIP/RTP call monitor")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor calls on a network interface
    Live {
        /// Interface to capture from
        interface: String,
    },

    /// Replay a pcap file through the engine
    Replay {
        /// PCAP file to read
        file: PathBuf,

        /// Don't write per-call archives
        #[arg(long)]
        no_archive: bool,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Live { interface } => {
            let mut config = Config::load_or_default(cli.config.as_deref())?;
            config.capture.interface = Some(interface);
            config.capture.pcap_file = None;
            run_monitor(config)
        }
        Commands::Replay { file, no_archive } => {
            let mut config = Config::load_or_default(cli.config.as_deref())?;
            config.capture.pcap_file = Some(file.display().to_string());
            if no_archive {
                config.engine.archive = false;
            }
            run_monitor(config)
        }
        Commands::GenConfig { output } => {
            let text = toml::to_string_pretty(&Config::default())
                .context("Failed to serialize default config")?;
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{text}"),
            }
            Ok(())
        }
    }
}

/// Run the capture-dispatch loop with a CDR writer alongside, until the
/// source is exhausted or a termination signal arrives.
fn run_monitor(config: Config) -> Result<()> {
    let mut capture = create_capture(&config.capture)?;
    let mut engine = Engine::new(config.engine.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .context("Failed to install signal handler")?;
    }

    // the persistence worker is the only other thread; it sees calls
    // exclusively through the handoff queue
    let writer_stop = Arc::new(AtomicBool::new(false));
    let writer = if config.cdr.enabled {
        let store = CdrStore::open(&config.cdr.db_path)?;
        Some(cdr::spawn_writer(
            engine.handoff_queue(),
            store,
            Arc::clone(&writer_stop),
        ))
    } else {
        None
    };

    engine.run(capture.as_mut(), &shutdown);

    let stats = &engine.stats;
    info!(
        packets = stats.packets,
        media = stats.media_packets,
        signaling = stats.signaling_packets,
        calls = stats.calls_created,
        archived = stats.packets_archived,
        "monitor finished"
    );

    // stop the writer only after the final drain has been queued
    writer_stop.store(true, Ordering::Relaxed);
    if let Some(handle) = writer {
        if handle.join().is_err() {
            warn!("cdr writer thread panicked");
        }
    }

    Ok(())
}

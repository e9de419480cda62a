//! Strix - a packet-capture decoding engine
//!
//! Command-line entry point: reads a capture file, decodes it through the
//! engine, logs TCP session events, and prints throughput statistics.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};

use strix::capture::pcap::PcapFileSource;
use strix::capture::PacketSource;
use strix::config::StrixConfig;
use strix::core::Engine;
use strix::utils::logger;

/// Command line arguments for Strix
#[derive(Parser, Debug)]
#[clap(
    author = "Strix Team",
    version,
    about = "A packet-capture decoding engine with per-flow TCP tracking"
)]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, default_value = "config/strix.toml")]
    config: String,

    /// PCAP file to read packets from
    #[clap(short, long)]
    pcap: Option<String>,

    /// Verbose output
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args: Args = Args::parse();

    let log_level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let mut config: StrixConfig = if Path::new(&args.config).exists() {
        match StrixConfig::from_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                StrixConfig::default()
            }
        }
    } else {
        StrixConfig::default()
    };

    if let Some(pcap) = args.pcap {
        config.capture.pcap_file = Some(pcap);
    }

    let log_level = config
        .logging
        .log_level
        .parse::<Level>()
        .unwrap_or(log_level);
    logger::init_logging(log_level, config.logging.log_file.as_deref());

    info!("Starting Strix packet decode engine");

    let Some(pcap_file) = config.capture.pcap_file.clone() else {
        bail!("no capture source: pass --pcap or set capture.pcap_file");
    };

    let mut engine = Engine::new(&config);
    register_session_logging(&engine);

    engine.start()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .context("failed to install interrupt handler")?;
    }

    let mut source = PcapFileSource::open(&pcap_file)
        .with_context(|| format!("cannot open capture file {}", pcap_file))?;
    let channel = engine.channel();
    match source.run(&channel, &stop) {
        Ok(stats) => info!(
            packets = stats.packets,
            bytes = stats.bytes,
            "capture finished"
        ),
        Err(e) => error!("capture failed: {}", e),
    }

    engine.shutdown();
    println!("{}", engine.metrics().format());

    Ok(())
}

/// Log the lifecycle of every TCP session as its events fire.
fn register_session_logging(engine: &Engine) {
    let registry = engine.registry();
    let p_id = registry.lookup_param("tcp.id");
    let p_rtt = registry.lookup_param("tcp.rtt_3wh");
    let p_tx_server = registry.lookup_param("tcp.tx_server");
    let p_tx_client = registry.lookup_param("tcp.tx_client");

    let (Some(p_id), Some(p_rtt), Some(p_tx_server), Some(p_tx_client)) =
        (p_id, p_rtt, p_tx_server, p_tx_client)
    else {
        warn!("tcp module parameters missing, session logging disabled");
        return;
    };

    engine.on("tcp.new_session", move |prop| {
        info!(
            ssn = prop.value_u64(p_id).unwrap_or(0),
            src_port = prop.src_port(),
            dst_port = prop.dst_port(),
            "new session"
        );
    });
    engine.on("tcp.established", move |prop| {
        info!(
            ssn = prop.value_u64(p_id).unwrap_or(0),
            rtt_us = prop.value_u32(p_rtt).unwrap_or(0),
            "session established"
        );
    });
    engine.on("tcp.closed", move |prop| {
        info!(
            ssn = prop.value_u64(p_id).unwrap_or(0),
            tx_server = prop.value_u64(p_tx_server).unwrap_or(0),
            tx_client = prop.value_u64(p_tx_client).unwrap_or(0),
            "session closed"
        );
    });
}

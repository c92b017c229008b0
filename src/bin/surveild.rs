//! surveild - Drone surveillance stream server
//!
//! This daemon:
//! 1. Loads the feed table and detector settings
//! 2. Serves annotated MJPEG streams and detection statistics over HTTP
//! 3. Runs until Ctrl-C, then closes every open stream

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use drone_surveillance::{
    api::{ApiConfig, ApiServer},
    Surveillance, SurveildConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Serve annotated drone video feeds with civilian/soldier statistics"
)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "SURVEIL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file and SURVEIL_API_ADDR.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SurveildConfig::load_from(args.config.as_deref())?;
    let app = Arc::new(Surveillance::from_config(&config)?);
    for feed in app.feeds() {
        log::info!(
            "feed {}: source {} (overlay {:?}, {:?} counting)",
            feed.name,
            feed.source,
            feed.overlay,
            feed.counting
        );
    }
    log::info!(
        "detector backend {} (available: {}), tracking {}",
        app.detectors().default_name().unwrap_or("none"),
        app.detectors().list().join(", "),
        if app.detectors().tracking() { "on" } else { "off" }
    );

    let mut api_config = ApiConfig::from(&config.api);
    if let Some(addr) = args.addr {
        api_config.addr = addr;
    }
    let api_handle = ApiServer::new(api_config, app.clone()).spawn()?;
    log::info!(
        "surveillance api listening on {} (default feed {})",
        api_handle.addr,
        app.default_feed()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("surveild waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, closing streams...");
    api_handle.stop()?;

    Ok(())
}

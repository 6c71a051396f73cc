use std::sync::Arc;

use sox_bus::{bus::Bus, tool::Sox};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;

fn init_logging() {
    if std::env::var_os("LOG_DISABLED").is_some() {
        return;
    }
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("sox_bus", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let sox = Sox::new(config.sox_path());
    match sox.version().await {
        Ok(version) => log::info!("using {}", version),
        Err(e) => log::warn!("sox is not usable, playback will fail: {:#}", e),
    }
    let bus = Arc::new(Bus::new("radio", config.bus_config(), Arc::new(sox)));

    let cancel = CancellationToken::new();

    let state = api::AppState::new(bus.clone(), config.public_dir());
    if let Err(e) = api::start_api_server(&config.addr(), state, cancel.clone()).await {
        log::error!("Error starting API server on {}: {:#}", config.addr(), e);
        std::process::exit(1);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    bus.shutdown();
    std::process::exit(0);
}

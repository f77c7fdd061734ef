//! ==============================================================================
//! main.rs - hermie entry point
//! ==============================================================================
//!
//! purpose:
//!     starts one of three roles, chosen by `cluster.role` (or HERMIE_ROLE):
//!
//!     server:  sensor reader task + http api (port 5000)
//!     client:  polls a server's /sensor and drives buzzer, lcd and leds
//!     watch:   sensor reader + notifier in one process, no http
//!
//! architecture (server + client):
//!
//!     ┌──────────────── server ────────────────┐      ┌───────── client ─────────┐
//!     │ ┌──────────────┐     ┌──────────────┐  │ http │ ┌──────────────────────┐ │
//!     │ │ sensor reader│     │   web api    │◄─┼──────┼─│ notifier (cooldown)  │ │
//!     │ │ (15s cycle)  │     │ /sensor ...  │  │      │ └───┬─────────┬────────┘ │
//!     │ └──────┬───────┘     └──────┬───────┘  │      │     ▼         ▼          │
//!     │        └──► SharedState ◄───┘          │      │  buzzer    lcd + leds    │
//!     │                     ▲ relays           │      └──────────────────────────┘
//!     └─────────────────────┼──────────────────┘
//!
//! shutdown:
//!     ctrl-c flips a watch channel; every loop stops at its next wait and
//!     gpio pins are released before exit.
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use hermie::config::{HostConfig, Role};
use hermie::control::DeviceControlGateway;
use hermie::hal::{self, DisabledGpio, GpioDriver};
use hermie::notifier::{Notifier, SnapshotSource};
use hermie::sensor::start_reader;
use hermie::server::{self, ApiState};
use hermie::state::SharedState;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Hermie - Environmental Monitor");
    println!("===========================================================");

    // step 1: load configuration
    let config = HostConfig::load_or_default()?;
    init_tracing(&config.logging.level);
    config.print_summary();

    // step 2: shutdown signal shared by every loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // keep the sender alive; without a handler we run until killed
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    });

    // step 3: run the selected role
    match config.cluster.role {
        Role::Server => run_server_role(&config, shutdown_rx).await,
        Role::Client => run_client_role(&config, shutdown_rx).await,
        Role::Watch => run_watch_role(&config, shutdown_rx).await,
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            format!("{app_name}={level},tower_http={level}").into()
        }))
        .init();
}

async fn run_server_role(config: &HostConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let state = SharedState::new(config.devices.keys().cloned());

    let gpio: Arc<dyn GpioDriver> = match hal::open_gpio() {
        Ok(gpio) => gpio,
        Err(e) => {
            tracing::error!(error = %e, "gpio init failed, device control disabled");
            Arc::new(DisabledGpio::new(e.to_string()))
        }
    };
    let gateway = Arc::new(DeviceControlGateway::new(gpio, config.devices.clone(), state.clone()));
    gateway.init_relays();

    let reader = start_reader(hal::open_sensor(config), &state, config, &shutdown).await;

    let api = ApiState { state, gateway: gateway.clone() };
    let served = server::run_server(api, &config.server.bind, shutdown).await;

    if let Some(reader) = reader {
        // a failed bind never flips the shutdown signal
        if served.is_err() {
            reader.abort();
        }
        let _ = reader.await;
    }
    gateway.shutdown();
    served
}

async fn run_client_role(config: &HostConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let gpio = hal::open_gpio()?;
    let lcd = hal::open_lcd(config)?;
    let source = SnapshotSource::http(&config.cluster.server_url)?;

    let notifier = Notifier::new(source, gpio, lcd, config);
    notifier.init_outputs();
    notifier.run(shutdown).await;
    Ok(())
}

async fn run_watch_role(config: &HostConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let state = SharedState::new(config.devices.keys().cloned());
    let gpio = hal::open_gpio()?;
    let lcd = hal::open_lcd(config)?;

    let reader = start_reader(hal::open_sensor(config), &state, config, &shutdown).await;

    let notifier = Notifier::new(SnapshotSource::Local(state), gpio, lcd, config);
    notifier.init_outputs();
    notifier.run(shutdown).await;

    if let Some(reader) = reader {
        let _ = reader.await;
    }
    Ok(())
}

//! duet-relay binary entry point.
//!
//! Usage:
//! ```bash
//! duet-relay --config duet.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use duet_relay::cleanup;
use duet_relay::config::Config;
use duet_relay::error::RelayError;
use duet_relay::http::{self, health};
use duet_relay::push::{HttpPushTransport, NoopPushTransport, PushTransport};
use duet_relay::state::RelayState;
use duet_relay::storage::SqliteStore;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        info!("no config file at {:?}, using defaults", config_path);
        Config::default()
    };

    // The migration pass runs here; any failure aborts before the
    // listener binds.
    info!("opening database at {:?}", config.storage.database);
    let store = SqliteStore::new(&config.storage.database).await?;

    let push: Arc<dyn PushTransport> = if config.push.enabled {
        Arc::new(HttpPushTransport::new(Duration::from_secs(
            config.push.request_timeout_secs,
        )))
    } else {
        info!("push delivery disabled");
        Arc::new(NoopPushTransport)
    };

    let state = Arc::new(RelayState::new(config.clone(), store, push));

    health::init_start_time();
    cleanup::spawn_storage_cleanup(state.store.clone(), config.cleanup.clone());
    cleanup::spawn_directory_sweep(state.clone(), config.cleanup.clone());

    let app = http::build_router(state);

    info!("duet-relay listening on {}", config.server.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("duet.toml"))
}

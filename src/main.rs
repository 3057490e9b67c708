use std::{sync::Arc, time::Duration};

use crate::{
    backend::BookingBackend, cleanup::CleanupService, configuration::Configuration,
    configuration_handler::ConfigurationHandler, database_interface::DatabaseInterface,
    http::create_app, local_backend::LocalBackend, notifier::HttpNotifier,
};
use anyhow::Context;
use tokio::{net::TcpListener, time::sleep};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod availability;
mod backend;
mod cleanup;
mod configuration;
mod configuration_handler;
mod coupon;
mod database_interface;
mod error;
mod http;
mod local_backend;
mod matching;
mod notifier;
mod payment;
mod schema;
#[cfg(test)]
mod testutils;
mod types;

async fn serve<T: BookingBackend>(
    backend: T,
    configuration: ConfigurationHandler,
    listener: TcpListener,
) -> anyhow::Result<()> {
    let cleanup = CleanupService::start(backend.clone(), configuration.cleanup_interval());
    let notifier = Arc::new(HttpNotifier::new(configuration.notifier_settings()));
    let app = create_app(backend, notifier, configuration);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(?err, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
        })
        .await
        .context("Server terminated unexpectedly");

    cleanup.stop().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("#####################");
    println!("# Interview Booking #");
    println!("#####################");

    let configuration = ConfigurationHandler::parse_arguments();

    let address = format!("0.0.0.0:{}", configuration.port());
    println!("Accessible at:\n{address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. Unset DATABASE_URL to run with the in-memory backend.");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        serve(backend, configuration, listener).await
    } else {
        let backend = match configuration.seed_file() {
            Some(path) => LocalBackend::from_seed_file(&path)
                .with_context(|| format!("Failed to load seed file {}", path.display()))?,
            None => LocalBackend::default(),
        };
        info!("Running with the in-memory backend, data is lost on restart");
        serve(backend, configuration, listener).await
    }
}

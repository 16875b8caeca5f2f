mod config;
mod services;

use clap::Parser;
use config::Config;
use joblib::{ArtifactStore, EventHub, JobRunner, TelemetrySampler};
use std::future::{Future, IntoFuture};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    pub store: ArtifactStore,
    pub runner: JobRunner,
    pub hub: EventHub,
    pub sampler: TelemetrySampler,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub async fn new(config: &Config) -> joblib::error::Result<Self> {
        let store = ArtifactStore::open(&config.upload_dir).await?;
        let sampler = TelemetrySampler::new(&config.nvidia_smi);
        let hub = EventHub::spawn(sampler.clone(), config.telemetry_interval());
        Ok(Self {
            store,
            runner: JobRunner::new(config.tool()),
            hub,
            sampler,
            static_dir: config.static_dir.clone(),
            max_upload_bytes: config.max_upload_bytes(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    if !config.accept_insecure && !acknowledge_insecure()? {
        return Ok(());
    }

    let state = AppState::new(&config).await?;
    serve(config.bind, state, shutdown_signal()).await
}

/// Serve until `shutdown` resolves, then remove every upload.
async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let store = state.store.clone();
    let server = axum::serve(listener, services::router(state)).into_future();
    tokio::select! {
        result = server => result?,
        _ = shutdown => tracing::info!("shutting down"),
    }

    tracing::info!("Cleaning up uploads directory...");
    store.purge_all().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn acknowledge_insecure() -> io::Result<bool> {
    print!("I, the user of this service, understand that this service is insecure, etc. (Y/N)? ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use cacher::config::Config;
use cacher::metrics::{App as MetricsApp, MethodLabel, Metrics};
use cacher::{admin, service};
use cacher_core::{Readiness, Store, WatchDispatcher};
use cacher_ingest::{run_ingest, IngestConfig, UpstreamClient};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::sync::watch as shutdown_watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let _args = Args::parse();
	let cfg = Config::from_env()?;

	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));

	let store = Arc::new(Store::new());
	let watch = WatchDispatcher::new();
	let readiness = Arc::new(Readiness::new());
	let active_tasks = Arc::new(AtomicU64::new(0));
	let (shutdown_tx, shutdown_rx) = shutdown_watch::channel(());
	let ingest_shutdown = CancellationToken::new();

	let client = Arc::new(UpstreamClient::new(
		cfg.packet_api_url.parse()?,
		&cfg.packet_consumer_token,
		&cfg.packet_api_auth_token,
	)?);

	let mut run_set = JoinSet::new();

	{
		let client = Arc::clone(&client);
		let store = Arc::clone(&store);
		let readiness = Arc::clone(&readiness);
		let facility = cfg.facility.clone();
		let mut ingest_cfg = IngestConfig::new(facility);
		ingest_cfg.concurrent_fetches = cfg.concurrent_fetches;
		ingest_cfg.fetch_per_page = cfg.fetch_per_page;
		active_tasks.fetch_add(1, Ordering::Relaxed);
		let active_tasks = Arc::clone(&active_tasks);
		let metrics = Arc::clone(&metrics);
		let ingest_shutdown = ingest_shutdown.clone();
		run_set.spawn(async move {
			let label = MethodLabel { method: "Ingest".to_string() };
			metrics.ingest_count.get_or_create(&label).inc();
			let timer = std::time::Instant::now();

			let result = run_ingest(client, store, readiness, ingest_cfg, ingest_shutdown).await;

			active_tasks.fetch_sub(1, Ordering::Relaxed);
			metrics
				.ingest_duration_seconds
				.get_or_create(&label)
				.observe(timer.elapsed().as_secs_f64());
			if let Err(e) = &result {
				metrics.ingest_errors.get_or_create(&label).inc();
				error!(error = %e, "ingestion is done");
			} else {
				info!("ingestion is done");
			}
			result.map_err(anyhow::Error::from)
		});
	}

	{
		let state = service::AppState {
			store: Arc::clone(&store),
			watch: Arc::clone(&watch),
			readiness: Arc::clone(&readiness),
			metrics: Arc::clone(&metrics),
			shutdown: shutdown_rx.clone(),
		};
		let router = service::router(state);
		let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.grpc_port)).await?;
		active_tasks.fetch_add(1, Ordering::Relaxed);
		let active_tasks = Arc::clone(&active_tasks);
		run_set.spawn(async move {
			let result = axum::serve(listener, router)
				.with_graceful_shutdown(shutdown_signal(shutdown_rx))
				.await;
			active_tasks.fetch_sub(1, Ordering::Relaxed);
			result.map_err(anyhow::Error::from)
		});
	}

	{
		let metrics_app = MetricsApp::new(Arc::new(registry));
		let admin_app = admin::App::new(
			cfg.cacher_tls_cert.clone().unwrap_or_default().into_bytes(),
			Arc::clone(&active_tasks),
		);
		let router = metrics_app
			.router()
			.merge(admin_app.router())
			.layer(tower_http::cors::CorsLayer::permissive());
		let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.http_port)).await?;
		let shutdown_rx = shutdown_rx.clone();
		active_tasks.fetch_add(1, Ordering::Relaxed);
		let active_tasks = Arc::clone(&active_tasks);
		run_set.spawn(async move {
			let result = axum::serve(listener, router)
				.with_graceful_shutdown(shutdown_signal(shutdown_rx))
				.await;
			active_tasks.fetch_sub(1, Ordering::Relaxed);
			result.map_err(anyhow::Error::from)
		});
	}

	{
		let ingest_shutdown = ingest_shutdown.clone();
		run_set.spawn(async move {
			tokio::signal::ctrl_c().await?;
			info!("received shutdown signal");
			ingest_shutdown.cancel();
			let _ = shutdown_tx.send(());
			Ok(())
		});
	}

	while let Some(result) = run_set.join_next().await {
		result??;
	}
	Ok(())
}

async fn shutdown_signal(mut shutdown_rx: shutdown_watch::Receiver<()>) {
	let _ = shutdown_rx.changed().await;
}

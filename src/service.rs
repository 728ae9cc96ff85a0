use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cacher_core::{Readiness, Store, WatchDispatcher};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch as shutdown_watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::metrics::{MethodLabel, Metrics};

/// Shared state behind every request-surface handler: the store, the
/// watch dispatcher, the readiness gate, metrics, and a shutdown
/// signal that Watch streams select on so they exit promptly.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<Store>,
	pub watch: Arc<WatchDispatcher>,
	pub readiness: Arc<Readiness>,
	pub metrics: Arc<Metrics>,
	pub shutdown: shutdown_watch::Receiver<()>,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/v1/push", post(push_handler))
		.route("/v1/ingest", post(ingest_handler))
		.route("/v1/hardware/by-id/{id}", get(by_id_handler))
		.route("/v1/hardware/by-ip/{ip}", get(by_ip_handler))
		.route("/v1/hardware/by-mac/{mac}", get(by_mac_handler))
		.route("/v1/hardware", get(all_handler))
		.route("/v1/watch/{id}", get(watch_handler))
		.route("/v1/healthz", get(healthz_handler))
		.layer(CorsLayer::permissive())
		.with_state(state)
}

#[derive(Serialize)]
struct HardwareBody {
	json: String,
}

#[derive(Serialize)]
struct HealthBody {
	status: &'static str,
}

async fn push_handler(
	State(state): State<AppState>,
	body: String,
) -> Result<impl IntoResponse, ServiceError> {
	let label = MethodLabel { method: "Push".to_string() };
	state.metrics.cache_totals.get_or_create(&label).inc();
	state.metrics.cache_in_flight.get_or_create(&label).inc();
	let timer = Instant::now();

	let result = state.store.add(&body);

	state.metrics.cache_in_flight.get_or_create(&label).dec();
	state
		.metrics
		.cache_duration_seconds
		.get_or_create(&label)
		.observe(timer.elapsed().as_secs_f64());

	let id = result.map_err(|e| {
		state.metrics.cache_errors.get_or_create(&label).inc();
		warn!(error = %e, "push failed");
		ServiceError::from(e)
	})?;

	if state.watch.publish(&id, body) {
		state.metrics.watch_miss_total.inc();
	}
	Ok(axum::http::StatusCode::OK)
}

async fn ingest_handler() -> impl IntoResponse {
	info!("ingest endpoint called but is deprecated");
	axum::http::StatusCode::OK
}

/// Centralizes the "count it, time it, and gate empty results on
/// readiness" policy shared by the three point lookups.
fn lookup(
	state: &AppState,
	method: &'static str,
	payload: Option<String>,
) -> Result<HardwareBody, ServiceError> {
	let label = MethodLabel { method: method.to_string() };
	state.metrics.cache_totals.get_or_create(&label).inc();

	match payload {
		Some(json) => {
			state.metrics.cache_hits.get_or_create(&label).inc();
			Ok(HardwareBody { json })
		}
		None => {
			if state.readiness.is_ready() {
				state.metrics.cache_hits.get_or_create(&label).inc();
				Ok(HardwareBody { json: String::new() })
			} else {
				state.metrics.cache_stalls.get_or_create(&label).inc();
				Err(ServiceError::NotReady)
			}
		}
	}
}

async fn by_id_handler(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<HardwareBody>, ServiceError> {
	let uuid = Uuid::parse_str(id.trim())
		.map_err(|_| ServiceError::Store(cacher_core::CacherError::InvalidId(id)))?;
	let payload = state.store.by_id(&uuid);
	lookup(&state, "ByID", payload).map(Json)
}

async fn by_ip_handler(
	State(state): State<AppState>,
	Path(ip): Path<String>,
) -> Result<Json<HardwareBody>, ServiceError> {
	let ip: IpAddr = cacher_core::record::normalize_ip_query(&ip).map_err(ServiceError::Store)?;
	let payload = state.store.by_ip(&ip);
	lookup(&state, "ByIP", payload).map(Json)
}

async fn by_mac_handler(
	State(state): State<AppState>,
	Path(mac): Path<String>,
) -> Result<Json<HardwareBody>, ServiceError> {
	let normalized = cacher_core::record::normalize_mac_query(&mac)
		.map_err(ServiceError::Store)?;
	let payload = state.store.by_mac(&normalized);
	lookup(&state, "ByMAC", payload).map(Json)
}

async fn all_handler(
	State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
	let label = MethodLabel { method: "All".to_string() };
	state.metrics.cache_totals.get_or_create(&label).inc();

	if !state.readiness.is_ready() {
		state.metrics.cache_stalls.get_or_create(&label).inc();
		return Err(ServiceError::NotReady);
	}

	let payloads = state.store.all();
	state.metrics.cache_hits.get_or_create(&label).inc();

	let events = stream::iter(payloads).map(|json| Ok::<_, Infallible>(Event::default().data(json)));
	Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn watch_handler(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
	let uuid = Uuid::parse_str(id.trim())
		.map_err(|_| ServiceError::Store(cacher_core::CacherError::InvalidId(id)))?;

	let (mut rx, guard) = state.watch.subscribe(uuid);
	let mut shutdown = state.shutdown.clone();

	let stream = async_stream::stream! {
		let _guard = guard;
		loop {
			tokio::select! {
				_ = shutdown.changed() => {
					info!(id = %uuid, "server is shutting down");
					break;
				}
				payload = rx.recv() => {
					match payload {
						Some(json) => yield Ok::<_, Infallible>(Event::default().data(json)),
						None => {
							info!(id = %uuid, "watch evicted");
							yield Ok::<_, Infallible>(Event::default().event("evicted").data(""));
							break;
						}
					}
				}
			}
		}
	};

	Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn healthz_handler(State(state): State<AppState>) -> Json<HealthBody> {
	let status = if state.readiness.is_ready() { "SERVING" } else { "NOT_READY" };
	Json(HealthBody { status })
}

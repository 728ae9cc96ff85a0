// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Creates the metrics sub registry for the cache service.
pub fn sub_registry(registry: &mut Registry) -> &mut Registry {
	registry.sub_registry_with_prefix("cacher")
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MethodLabel {
	pub method: String,
}

/// Per-method request counters and timings, mirroring the labels the
/// reference service records on every lookup/push/watch call.
pub struct Metrics {
	pub cache_totals: Family<MethodLabel, Counter>,
	pub cache_errors: Family<MethodLabel, Counter>,
	pub cache_hits: Family<MethodLabel, Counter>,
	pub cache_stalls: Family<MethodLabel, Counter>,
	pub cache_in_flight: Family<MethodLabel, Gauge>,
	pub cache_duration_seconds: Family<MethodLabel, Histogram>,
	pub watch_miss_total: Counter,
	pub ingest_count: Family<MethodLabel, Counter>,
	pub ingest_duration_seconds: Family<MethodLabel, Histogram>,
	pub ingest_errors: Family<MethodLabel, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let registry = sub_registry(registry);

		let cache_totals = Family::default();
		registry.register("cache_total", "Total cache operations", cache_totals.clone());

		let cache_errors = Family::default();
		registry.register("cache_errors", "Total cache operation errors", cache_errors.clone());

		let cache_hits = Family::default();
		registry.register("cache_hits", "Total cache hits", cache_hits.clone());

		let cache_stalls = Family::default();
		registry.register(
			"cache_stalls",
			"Total reads that returned 'DB is not ready'",
			cache_stalls.clone(),
		);

		let cache_in_flight = Family::default();
		registry.register("cache_in_flight", "In-flight cache operations", cache_in_flight.clone());

		let cache_duration_seconds: Family<MethodLabel, Histogram> =
			Family::new_with_constructor(|| Histogram::new(prometheus_client::metrics::histogram::exponential_buckets(0.001, 2.0, 12)));
		registry.register(
			"cache_duration_seconds",
			"Cache operation duration",
			cache_duration_seconds.clone(),
		);

		let watch_miss_total = Counter::default();
		registry.register(
			"watch_miss_total",
			"Watch publishes dropped because the subscriber had not drained",
			watch_miss_total.clone(),
		);

		let ingest_count = Family::default();
		registry.register("ingest_count", "Ingest phase invocations", ingest_count.clone());

		let ingest_duration_seconds: Family<MethodLabel, Histogram> =
			Family::new_with_constructor(|| Histogram::new(prometheus_client::metrics::histogram::exponential_buckets(0.01, 2.0, 12)));
		registry.register(
			"ingest_duration_seconds",
			"Ingest phase duration",
			ingest_duration_seconds.clone(),
		);

		let ingest_errors = Family::default();
		registry.register("ingest_errors", "Ingest phase errors", ingest_errors.clone());

		Metrics {
			cache_totals,
			cache_errors,
			cache_hits,
			cache_stalls,
			cache_in_flight,
			cache_duration_seconds,
			watch_miss_total,
			ingest_count,
			ingest_duration_seconds,
			ingest_errors,
		}
	}
}

#[derive(Clone)]
pub struct App {
	registry: Arc<Registry>,
}

impl App {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}
	pub fn router(&self) -> Router {
		Router::new()
			.route("/metrics", get(metrics_handler))
			.with_state(self.clone())
	}
}

async fn metrics_handler(State(app): State<App>) -> Result<String, StatusCode> {
	let mut buffer = String::new();
	encode(&mut buffer, &app.registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
	Ok(buffer)
}

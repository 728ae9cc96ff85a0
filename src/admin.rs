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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use httpdate::HttpDate;
use serde::Serialize;

const GIT_REV: &str = env!("CARGO_PKG_VERSION");

/// Side-channel administrative endpoints: certificate, version, and
/// health, kept separate from the request surface the same way the
/// reference service runs them on a second listener.
#[derive(Clone)]
pub struct App {
	cert: Arc<Vec<u8>>,
	started_at: Instant,
	started_at_wall: SystemTime,
	active_tasks: Arc<AtomicU64>,
}

impl App {
	pub fn new(cert: Vec<u8>, active_tasks: Arc<AtomicU64>) -> Self {
		Self {
			cert: Arc::new(cert),
			started_at: Instant::now(),
			started_at_wall: SystemTime::now(),
			active_tasks,
		}
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/cert", get(cert_handler))
			.route("/version", get(version_handler))
			.route("/_packet/healthcheck", get(healthcheck_handler))
			.with_state(self.clone())
	}
}

async fn cert_handler(State(app): State<App>) -> impl IntoResponse {
	let last_modified = HttpDate::from(app.started_at_wall).to_string();
	(
		[
			(header::CONTENT_TYPE, "application/x-pem-file".to_string()),
			(header::LAST_MODIFIED, last_modified),
		],
		(*app.cert).clone(),
	)
}

#[derive(Serialize)]
struct VersionBody {
	git_rev: String,
	service_name: String,
}

async fn version_handler(State(_app): State<App>) -> impl IntoResponse {
	axum::Json(VersionBody {
		git_rev: GIT_REV.to_string(),
		service_name: "cacher".to_string(),
	})
}

#[derive(Serialize)]
struct HealthcheckBody {
	git_rev: String,
	uptime: u64,
	goroutines: u64,
}

async fn healthcheck_handler(State(app): State<App>) -> Result<impl IntoResponse, StatusCode> {
	Ok(axum::Json(HealthcheckBody {
		git_rev: GIT_REV.to_string(),
		uptime: app.started_at.elapsed().as_secs(),
		goroutines: app.active_tasks.load(Ordering::Relaxed),
	}))
}

use std::sync::Arc;

use cacher_core::{Readiness, Store};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::upstream::UpstreamClient;

const HANDOFF_CHANNEL_CAPACITY: usize = 1;
const DEFAULT_CONCURRENT_FETCHES: usize = 4;
const DEFAULT_FETCH_PER_PAGE: u32 = 50;
const MAX_FETCH_PER_PAGE: u32 = 1000;

pub struct IngestConfig {
    pub facility: String,
    pub concurrent_fetches: usize,
    pub fetch_per_page: u32,
}

impl IngestConfig {
    pub fn new(facility: impl Into<String>) -> Self {
        IngestConfig {
            facility: facility.into(),
            concurrent_fetches: DEFAULT_CONCURRENT_FETCHES,
            fetch_per_page: DEFAULT_FETCH_PER_PAGE,
        }
    }
}

/// Run the full bulk ingest once: probe the facility for its total
/// record count, fan out page fetches across a bounded worker pool,
/// hand pages to a single indexer over a capacity-1 channel, and mark
/// the store ready once every page has been indexed.
///
/// `shutdown` is the embedding context's cancellation handle -- when the
/// process is asked to shut down mid-ingest, it is cancelled and that
/// propagates to every in-flight fetch and the indexer promptly, rather
/// than letting ingest run to completion on its own. If either side
/// fails first, it cancels its own (child) token so the other side
/// stops promptly instead of fetching or indexing pages nobody will
/// use; only the first error is returned.
pub async fn run_ingest(
    client: Arc<UpstreamClient>,
    store: Arc<Store>,
    readiness: Arc<Readiness>,
    config: IngestConfig,
    shutdown: CancellationToken,
) -> Result<(), IngestError> {
    info!(facility = %config.facility, "ingestion is starting");

    let total = tokio::select! {
        _ = shutdown.cancelled() => return Err(IngestError::Cancelled),
        result = client.probe_total(&config.facility) => result?,
    };
    let per_page = config.fetch_per_page.clamp(1, MAX_FETCH_PER_PAGE);
    let pages = total.div_ceil(per_page);

    let (tx, rx) = mpsc::channel::<Vec<Value>>(HANDOFF_CHANNEL_CAPACITY);
    // A child token: cancelling it (on first internal error) never
    // propagates back up to `shutdown`, but `shutdown` being cancelled
    // is observed here too.
    let cancel = shutdown.child_token();

    let fetch_task = tokio::spawn(fetch_all_pages(
        Arc::clone(&client),
        config.facility.clone(),
        per_page,
        pages,
        config.concurrent_fetches.max(1),
        tx,
        cancel.clone(),
    ));
    let index_task = tokio::spawn(index_all(Arc::clone(&store), rx, cancel.clone()));

    let fetch_result = fetch_task.await.expect("fetch task panicked");
    let index_result = index_task.await.expect("index task panicked");

    let outcome = first_real_error(fetch_result, index_result);
    match outcome {
        Some(err) => {
            warn!(error = %err, "ingestion failed");
            Err(err)
        }
        None => {
            readiness.set_ready();
            info!("ingestion is done");
            Ok(())
        }
    }
}

/// `Cancelled` is a side effect of the *other* side failing first, not
/// a failure in its own right -- surface whichever result carries the
/// real error, preferring fetch's if both somehow report one.
fn first_real_error(
    fetch_result: Result<(), IngestError>,
    index_result: Result<(), IngestError>,
) -> Option<IngestError> {
    match (fetch_result, index_result) {
        (Err(IngestError::Cancelled), Err(e)) => Some(e),
        (Err(e), _) => Some(e),
        (_, Err(IngestError::Cancelled)) => None,
        (_, Err(e)) => Some(e),
        _ => None,
    }
}

async fn fetch_all_pages(
    client: Arc<UpstreamClient>,
    facility: String,
    per_page: u32,
    pages: u32,
    concurrency: usize,
    tx: mpsc::Sender<Vec<Value>>,
    cancel: CancellationToken,
) -> Result<(), IngestError> {
    let result = stream::iter(1..=pages)
        .map(Ok::<u32, IngestError>)
        .try_for_each_concurrent(Some(concurrency), |page| {
            let client = Arc::clone(&client);
            let facility = facility.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return Err(IngestError::Cancelled);
                }
                // Race the network call against cancellation rather than
                // only checking between iterations, so a shutdown mid-flight
                // drops (and so aborts) the in-flight request immediately
                // instead of waiting for it to finish on its own.
                let fetched = tokio::select! {
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                    result = client.fetch_page(&facility, per_page, page) => match result {
                        Ok(f) => f,
                        Err(e) => {
                            cancel.cancel();
                            return Err(e);
                        }
                    },
                };
                // The receiver only goes away if the indexer already
                // failed and cancelled us; either way this is not a
                // new error to report.
                tokio::select! {
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                    result = tx.send(fetched.hardware) => if result.is_err() {
                        return Err(IngestError::Cancelled);
                    },
                }
                Ok(())
            }
        })
        .await;

    result
}

async fn index_all(
    store: Arc<Store>,
    mut rx: mpsc::Receiver<Vec<Value>>,
    cancel: CancellationToken,
) -> Result<(), IngestError> {
    loop {
        let page = tokio::select! {
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            page = rx.recv() => page,
        };
        let Some(page) = page else {
            break;
        };
        for record in page {
            let payload = match serde_json::to_string(&record) {
                Ok(p) => p,
                Err(e) => {
                    cancel.cancel();
                    return Err(IngestError::Decode(e));
                }
            };
            if let Err(e) = store.add(&payload) {
                cancel.cancel();
                return Err(IngestError::Store(e));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hw_object(id: &str) -> Value {
        json!({"id": id, "state": "provisioning"})
    }

    #[tokio::test]
    async fn ingest_fetches_all_pages_and_marks_ready() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/staff/cacher/hardware"))
            .and(query_param("per_page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"current_page": 1, "last_page": 1, "total": 3},
                "hardware": [hw_object("11111111-1111-1111-1111-111111111111")],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/staff/cacher/hardware"))
            .and(query_param("per_page", "2"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"current_page": 1, "last_page": 2, "total": 3},
                "hardware": [
                    hw_object("11111111-1111-1111-1111-111111111111"),
                    hw_object("22222222-2222-2222-2222-222222222222"),
                ],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/staff/cacher/hardware"))
            .and(query_param("per_page", "2"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"current_page": 2, "last_page": 2, "total": 3},
                "hardware": [hw_object("33333333-3333-3333-3333-333333333333")],
            })))
            .mount(&server)
            .await;

        let client = Arc::new(
            UpstreamClient::new(server.uri().parse().unwrap(), "consumer", "auth").unwrap(),
        );
        let store = Arc::new(Store::new());
        let readiness = Arc::new(Readiness::new());

        let mut config = IngestConfig::new("fac-1");
        config.fetch_per_page = 2;
        config.concurrent_fetches = 2;

        run_ingest(
            client,
            Arc::clone(&store),
            Arc::clone(&readiness),
            config,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(readiness.is_ready());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn upstream_error_cancels_ingest_and_leaves_store_not_ready() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/staff/cacher/hardware"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Arc::new(
            UpstreamClient::new(server.uri().parse().unwrap(), "consumer", "auth").unwrap(),
        );
        let store = Arc::new(Store::new());
        let readiness = Arc::new(Readiness::new());

        let err = run_ingest(
            client,
            Arc::clone(&store),
            Arc::clone(&readiness),
            IngestConfig::new("fac-1"),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Fetch(_)));
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn external_shutdown_cancels_ingest_before_completion() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/staff/cacher/hardware"))
            .and(query_param("per_page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"current_page": 1, "last_page": 1, "total": 3},
                "hardware": [hw_object("11111111-1111-1111-1111-111111111111")],
            })))
            .mount(&server)
            .await;

        let client = Arc::new(
            UpstreamClient::new(server.uri().parse().unwrap(), "consumer", "auth").unwrap(),
        );
        let store = Arc::new(Store::new());
        let readiness = Arc::new(Readiness::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = run_ingest(
            client,
            Arc::clone(&store),
            Arc::clone(&readiness),
            IngestConfig::new("fac-1"),
            shutdown,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(!readiness.is_ready());
    }
}

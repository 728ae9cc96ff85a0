use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::error::IngestError;

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default, rename = "current_page")]
    #[allow(dead_code)]
    current_page: u32,
    #[serde(default, rename = "last_page")]
    last_page: u32,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Default, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    meta: PageMeta,
    #[serde(default, rename = "hardware")]
    hardware: Vec<Value>,
}

pub struct Page {
    pub hardware: Vec<Value>,
    pub last_page: u32,
    pub total: u32,
}

/// Thin client over the facility-scoped hardware listing endpoint.
/// Carries the staff and auth headers on every request rather than
/// re-attaching them per call.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
}

impl UpstreamClient {
    pub fn new(
        base_url: Url,
        consumer_token: &str,
        auth_token: &str,
    ) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Packet-Staff", HeaderValue::from_static("true"));
        if let Ok(v) = HeaderValue::from_str(consumer_token) {
            headers.insert("X-Consumer-Token", v);
        }
        if let Ok(v) = HeaderValue::from_str(auth_token) {
            headers.insert("X-Auth-Token", v);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(UpstreamClient { http, base_url })
    }

    fn page_url(&self, facility: &str, per_page: u32, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/staff/cacher/hardware");
        url.query_pairs_mut()
            .append_pair("facility", facility)
            .append_pair("sort_by", "created_at")
            .append_pair("sort_direction", "asc")
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());
        url
    }

    pub async fn fetch_page(
        &self,
        facility: &str,
        per_page: u32,
        page: u32,
    ) -> Result<Page, IngestError> {
        let url = self.page_url(facility, per_page, page);
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let body: PageEnvelope = resp.json().await?;
        Ok(Page {
            hardware: body.hardware,
            last_page: body.meta.last_page,
            total: body.meta.total,
        })
    }

    /// `per_page=1&page=1` just to discover the total record count.
    pub async fn probe_total(&self, facility: &str) -> Result<u32, IngestError> {
        let page = self.fetch_page(facility, 1, 1).await?;
        Ok(page.total)
    }
}

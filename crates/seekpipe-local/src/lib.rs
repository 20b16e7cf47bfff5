use futures_util::StreamExt;
use seekpipe_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod clustering;
pub mod config;
pub mod content;
pub mod dedup;
pub mod extract;
pub mod mrf;
pub mod oskmeans;
pub mod scoring;
pub mod stopwords;
pub mod textprep;

pub use clustering::{Centroid, Cluster, Clusterer, Clustering};
pub use config::{ContentConfig, OsKmeansConfig};
pub use content::ContentHandler;
pub use dedup::{is_near_duplicate, DedupStats, Verdict};
pub use extract::Html2TextParser;
pub use mrf::FeatureConfig;
pub use oskmeans::{cluster_query, OsKmeans};
pub use scoring::{score_against_reference, score_query_against};
pub use stopwords::StopWords;

/// Fetch every request with at most `concurrency` transfers in flight.
///
/// Slot `i` of the output belongs to `reqs[i]`; one failed URL never affects
/// the others.
pub async fn fetch_many(
    backend: &dyn FetchBackend,
    reqs: &[FetchRequest],
    concurrency: usize,
) -> Vec<Result<FetchResponse>> {
    futures_util::stream::iter(reqs.iter())
        .map(|req| backend.fetch(req))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
    proxied: Option<reqwest::Client>,
}

impl LocalFetcher {
    pub fn new(cfg: &config::ContentConfig) -> Result<Self> {
        let client = Self::client_builder(cfg)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let proxied = match cfg.proxy.as_deref() {
            Some(p) => {
                let proxy = reqwest::Proxy::all(p).map_err(|e| Error::Config(e.to_string()))?;
                Some(
                    Self::client_builder(cfg)
                        .proxy(proxy)
                        .build()
                        .map_err(|e| Error::Fetch(e.to_string()))?,
                )
            }
            None => None,
        };
        Ok(Self { client, proxied })
    }

    fn client_builder(cfg: &config::ContentConfig) -> reqwest::ClientBuilder {
        // Defaults keep a stalled host from hanging the batch; per-request
        // timeouts (FetchRequest.timeout_ms) can still override the transfer one.
        reqwest::Client::builder()
            .user_agent("seekpipe-local/0.1")
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.fetch_timeout_ms))
    }

    fn allow_unsafe_request_headers() -> bool {
        // Do not forward secrets (Authorization/Cookie) to arbitrary result URLs
        // unless explicitly opted in.
        config::env_bool("SEEKPIPE_ALLOW_UNSAFE_HEADERS")
    }

    fn is_sensitive_request_header(name: &reqwest::header::HeaderName) -> bool {
        // HeaderName::as_str() is canonical lower-case.
        matches!(
            name.as_str(),
            "authorization" | "cookie" | "proxy-authorization"
        )
    }

    fn apply_headers(
        &self,
        mut rb: reqwest::RequestBuilder,
        headers: &BTreeMap<String, String>,
    ) -> reqwest::RequestBuilder {
        let allow_unsafe = Self::allow_unsafe_request_headers();
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                if !allow_unsafe && Self::is_sensitive_request_header(&name) {
                    continue;
                }
                rb = rb.header(name, value);
            }
        }
        rb
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let mut timings_ms = BTreeMap::new();
        let t_req = std::time::Instant::now();
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let client = if req.via_proxy {
            self.proxied
                .as_ref()
                .ok_or_else(|| Error::NotConfigured("no proxy configured".to_string()))?
        } else {
            &self.client
        };

        let mut rb = client.get(url);
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        rb = self.apply_headers(rb, &req.headers);
        let resp = rb.send().await.map_err(|e| Error::Fetch(e.to_string()))?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let max_bytes = req.max_bytes.unwrap_or(u64::MAX) as usize;
        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        timings_ms.insert("network_fetch".to_string(), t_req.elapsed().as_millis());
        Ok(FetchResponse {
            url: req.url.clone(),
            final_url,
            status,
            content_type,
            bytes,
            truncated,
            timings_ms,
        })
    }
}

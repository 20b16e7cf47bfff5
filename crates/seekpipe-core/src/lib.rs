use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub mod query_context;
pub mod snippet;

pub use query_context::QueryContext;
pub use snippet::Snippet;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("no reference snippet")]
    NoReference,
    #[error("reference snippet {0} has no tf-idf features")]
    NoReferenceFeatures(SnippetId),
    #[error("unknown snippet: {0}")]
    UnknownSnippet(SnippetId),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// 32-bit identifier of a hashed token or token chain.
pub type FeatureId = u32;

/// Identifier of a snippet within a query context.
pub type SnippetId = u32;

/// Unweighted presence vector: sorted, deduplicated feature ids.
pub type PlainFeatures = Vec<FeatureId>;

/// TF-IDF weighted sparse vector.
pub type TfIdfVector = HashMap<FeatureId, f32>;

/// Feature id -> literal token, paired with a [`TfIdfVector`].
pub type BagOfWords = HashMap<FeatureId, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the whole transfer.
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
    /// Optional headers to add (best-effort; adapter may drop unsafe headers).
    pub headers: BTreeMap<String, String>,
    /// Route the request through the backend's configured proxy.
    pub via_proxy: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: None,
            max_bytes: None,
            headers: BTreeMap::new(),
            via_proxy: false,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub timings_ms: BTreeMap<String, u128>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

/// Markup to plain text. Implementations must not fail on malformed input;
/// an empty string means "nothing usable".
pub trait HtmlParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> String;
}

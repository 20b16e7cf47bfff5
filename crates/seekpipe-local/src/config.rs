//! Runtime knobs for the content pipeline and the clusterer.
//!
//! Every struct has sensible defaults, deserializes from partial JSON
//! (`#[serde(default)]`), and can be overridden from `SEEKPIPE_*` environment
//! variables via `from_env()`.

use seekpipe_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn env_bool(key: &str) -> bool {
    matches!(
        env(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env(key).and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Per-URL transfer timeout.
    pub fetch_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Cap on bytes read from each response body.
    pub max_bytes: u64,
    /// URLs fetched at the same time within one batch.
    pub max_concurrent_fetches: usize,
    /// Parse / feature tasks running at the same time within one batch.
    pub max_concurrent_tasks: usize,
    /// Proxy used when a pipeline call asks for proxied fetches.
    pub proxy: Option<String>,
    /// Line width handed to the HTML renderer.
    pub parser_width: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 3_000,
            connect_timeout_ms: 3_000,
            max_bytes: 2 * 1024 * 1024,
            max_concurrent_fetches: 16,
            max_concurrent_tasks: 8,
            proxy: None,
            parser_width: crate::extract::DEFAULT_WIDTH,
        }
    }
}

impl ContentConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            fetch_timeout_ms: env_parse("SEEKPIPE_FETCH_TIMEOUT_MS", d.fetch_timeout_ms),
            connect_timeout_ms: env_parse("SEEKPIPE_CONNECT_TIMEOUT_MS", d.connect_timeout_ms),
            max_bytes: env_parse("SEEKPIPE_MAX_BYTES", d.max_bytes),
            max_concurrent_fetches: env_parse(
                "SEEKPIPE_MAX_CONCURRENT_FETCHES",
                d.max_concurrent_fetches,
            ),
            max_concurrent_tasks: env_parse("SEEKPIPE_MAX_CONCURRENT_TASKS", d.max_concurrent_tasks),
            proxy: env("SEEKPIPE_PROXY"),
            parser_width: d.parser_width,
        }
    }

    pub fn builder() -> ContentConfigBuilder {
        ContentConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(Error::Config(
                "max_concurrent_fetches must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "max_concurrent_tasks must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(Error::Config("fetch_timeout_ms must be greater than zero".to_string()));
        }
        if let Some(p) = &self.proxy {
            url::Url::parse(p).map_err(|e| Error::Config(format!("proxy {p:?}: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentConfigBuilder {
    config: ContentConfig,
}

impl ContentConfigBuilder {
    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn max_bytes(mut self, n: u64) -> Self {
        self.config.max_bytes = n;
        self
    }

    pub fn max_concurrent_fetches(mut self, n: usize) -> Self {
        self.config.max_concurrent_fetches = n;
        self
    }

    pub fn max_concurrent_tasks(mut self, n: usize) -> Self {
        self.config.max_concurrent_tasks = n;
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    pub fn build(self) -> Result<ContentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Online k-means schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsKmeansConfig {
    /// Epoch budget; clustering stops after this many passes over the points.
    pub niterations: usize,
    /// Learning rate at the first step.
    pub nu0: f32,
    /// Learning rate reached at the last step.
    pub nuf: f32,
}

impl Default for OsKmeansConfig {
    fn default() -> Self {
        Self {
            niterations: 20,
            nu0: 1.0,
            nuf: 0.01,
        }
    }
}

impl OsKmeansConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            niterations: env_parse("SEEKPIPE_KMEANS_ITERATIONS", d.niterations),
            ..d
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.niterations == 0 {
            return Err(Error::Config("niterations must be greater than zero".to_string()));
        }
        if !(self.nu0 > 0.0 && self.nuf > 0.0 && self.nu0.is_finite() && self.nuf.is_finite()) {
            return Err(Error::Config(format!(
                "learning rates must be positive (nu0={}, nuf={})",
                self.nu0, self.nuf
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: ContentConfig = serde_json::from_str(r#"{"max_concurrent_tasks": 2}"#).unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 2);
        assert_eq!(cfg.fetch_timeout_ms, ContentConfig::default().fetch_timeout_ms);
    }

    #[test]
    fn builder_rejects_zero_concurrency_and_bad_proxy() {
        assert!(matches!(
            ContentConfig::builder().max_concurrent_tasks(0).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ContentConfig::builder().proxy("not a url").build(),
            Err(Error::Config(_))
        ));
        let ok = ContentConfig::builder()
            .proxy("http://127.0.0.1:8250")
            .max_concurrent_fetches(4)
            .build()
            .unwrap();
        assert_eq!(ok.max_concurrent_fetches, 4);
    }

    #[test]
    fn env_overrides_apply() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("SEEKPIPE_MAX_CONCURRENT_TASKS", "3");
        std::env::set_var("SEEKPIPE_KMEANS_ITERATIONS", "5");
        std::env::set_var("SEEKPIPE_FETCH_TIMEOUT_MS", "not-a-number");
        let c = ContentConfig::from_env();
        let k = OsKmeansConfig::from_env();
        std::env::remove_var("SEEKPIPE_MAX_CONCURRENT_TASKS");
        std::env::remove_var("SEEKPIPE_KMEANS_ITERATIONS");
        std::env::remove_var("SEEKPIPE_FETCH_TIMEOUT_MS");
        assert_eq!(c.max_concurrent_tasks, 3);
        assert_eq!(c.fetch_timeout_ms, ContentConfig::default().fetch_timeout_ms);
        assert_eq!(k.niterations, 5);
    }

    #[test]
    fn kmeans_config_validation() {
        assert!(OsKmeansConfig::default().validate().is_ok());
        let bad = OsKmeansConfig {
            nuf: 0.0,
            ..OsKmeansConfig::default()
        };
        assert!(bad.validate().is_err());
        let nan = OsKmeansConfig {
            nu0: f32::NAN,
            ..OsKmeansConfig::default()
        };
        assert!(nan.validate().is_err());
        let unbounded = OsKmeansConfig {
            nu0: f32::INFINITY,
            ..OsKmeansConfig::default()
        };
        assert!(unbounded.validate().is_err());
    }
}

//! Fetch, parse, and feature-extraction stages for a query's snippets.
//!
//! Each stage handles a batch and returns one slot per input, in input order.
//! Per-item work runs through a bounded task group; a stage finishes
//! completely before the next one reads its output, and the corpus-level IDF
//! pass waits for every document of the batch.

use futures_util::StreamExt;
use seekpipe_core::{
    BagOfWords, FetchBackend, FetchRequest, HtmlParser, PlainFeatures, QueryContext, Result,
    TfIdfVector,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ContentConfig;
use crate::dedup::DedupStats;
use crate::extract::{has_any_text, Html2TextParser};
use crate::mrf::{self, FeatureConfig};
use crate::stopwords::StopWords;
use crate::textprep::normalize_control_chars;
use crate::LocalFetcher;

pub struct ContentHandler {
    fetcher: Arc<dyn FetchBackend>,
    parser: Arc<dyn HtmlParser>,
    config: ContentConfig,
    pub(crate) dedup_stats: DedupStats,
}

impl std::fmt::Debug for ContentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContentHandler {
    pub fn new(
        fetcher: Arc<dyn FetchBackend>,
        parser: Arc<dyn HtmlParser>,
        config: ContentConfig,
    ) -> Self {
        Self {
            fetcher,
            parser,
            config,
            dedup_stats: DedupStats::default(),
        }
    }

    /// Handler over [`LocalFetcher`] and [`Html2TextParser`].
    pub fn local(config: ContentConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = LocalFetcher::new(&config)?;
        let parser = Html2TextParser::new(config.parser_width);
        Ok(Self::new(Arc::new(fetcher), Arc::new(parser), config))
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    pub fn dedup_stats(&self) -> &DedupStats {
        &self.dedup_stats
    }

    /// Fetch `urls` concurrently with the query's header overrides.
    ///
    /// Slots whose fetch failed, returned a non-2xx status, or came back empty
    /// are `None`.
    pub async fn fetch_snippets_content(
        &self,
        urls: &[String],
        use_proxy: bool,
        qc: &QueryContext,
    ) -> Vec<Option<String>> {
        if urls.is_empty() {
            return Vec::new();
        }
        let reqs: Vec<FetchRequest> = urls
            .iter()
            .map(|u| FetchRequest {
                timeout_ms: Some(self.config.fetch_timeout_ms),
                max_bytes: Some(self.config.max_bytes),
                headers: qc.headers.clone(),
                via_proxy: use_proxy,
                ..FetchRequest::get(u.clone())
            })
            .collect();

        let responses = crate::fetch_many(
            self.fetcher.as_ref(),
            &reqs,
            self.config.max_concurrent_fetches,
        )
        .await;

        let out: Vec<Option<String>> = responses
            .into_iter()
            .zip(urls)
            .map(|(res, url)| match res {
                Ok(resp) if !resp.is_success() => {
                    warn!(url = %url, status = resp.status, "non-success status");
                    None
                }
                Ok(resp) if resp.bytes.is_empty() => {
                    warn!(url = %url, "empty body");
                    None
                }
                Ok(resp) => {
                    if resp.truncated {
                        debug!(url = %url, max_bytes = self.config.max_bytes, "body truncated");
                    }
                    Some(resp.text_lossy())
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "fetch failed");
                    None
                }
            })
            .collect();
        debug!(
            requested = urls.len(),
            fetched = out.iter().filter(|c| c.is_some()).count(),
            "fetch batch done"
        );
        out
    }

    /// Parse raw contents to plain text with control whitespace collapsed.
    pub async fn parse_snippets_txt_content(&self, contents: Vec<Option<String>>) -> Vec<Option<String>> {
        let parser = Arc::clone(&self.parser);
        run_bounded(contents, self.config.max_concurrent_tasks, "parse", move |raw| {
            let text = normalize_control_chars(&parser.parse(raw.as_bytes()));
            has_any_text(&text).then_some(text)
        })
        .await
    }

    /// TF-IDF vectors and vocabularies for a batch of texts.
    ///
    /// IDF is computed across the slots that produced features; stop words
    /// follow `lang` when a list exists for it.
    pub async fn extract_tfidf_features(
        &self,
        texts: Vec<Option<String>>,
        lang: Option<&str>,
    ) -> Vec<Option<(TfIdfVector, BagOfWords)>> {
        let stopwords = lang.and_then(StopWords::for_lang);
        let cfg = FeatureConfig::fine();
        let mut out = run_bounded(texts, self.config.max_concurrent_tasks, "tfidf", move |text| {
            let (v, bow) = mrf::tfidf_features(&text, &cfg, stopwords.as_ref());
            (!v.is_empty()).then_some((v, bow))
        })
        .await;

        let mut batch: Vec<TfIdfVector> = out
            .iter_mut()
            .flatten()
            .map(|(v, _)| std::mem::take(v))
            .collect();
        mrf::compute_tf_idf(&mut batch);
        for ((v, bow), weighted) in out.iter_mut().flatten().zip(batch) {
            *v = weighted;
            bow.retain(|id, _| v.contains_key(id));
        }
        out
    }

    /// Unweighted coarse features for a batch of texts.
    pub async fn extract_plain_features(&self, texts: Vec<Option<String>>) -> Vec<Option<PlainFeatures>> {
        let cfg = FeatureConfig::coarse();
        run_bounded(texts, self.config.max_concurrent_tasks, "plain", move |text| {
            let f = mrf::plain_features(&text, &cfg);
            (!f.is_empty()).then_some(f)
        })
        .await
    }

    /// Make sure the snippets at `idxs` carry raw content and parsed text.
    ///
    /// Only snippets without raw content are fetched; cached text is kept.
    pub(crate) async fn fill_text(&self, qc: &mut QueryContext, idxs: &[usize], use_proxy: bool) {
        let to_fetch: Vec<usize> = idxs
            .iter()
            .copied()
            .filter(|&i| qc.snippets[i].cached_content.is_none())
            .collect();
        if !to_fetch.is_empty() {
            let urls: Vec<String> = to_fetch.iter().map(|&i| qc.snippets[i].url.clone()).collect();
            let contents = self.fetch_snippets_content(&urls, use_proxy, qc).await;
            for (&i, content) in to_fetch.iter().zip(contents) {
                if content.is_some() {
                    let sp = &mut qc.snippets[i];
                    sp.cached_content = content;
                    sp.cached_text = None;
                }
            }
        }

        let to_parse: Vec<usize> = idxs
            .iter()
            .copied()
            .filter(|&i| {
                let sp = &qc.snippets[i];
                sp.cached_content.is_some() && sp.cached_text.is_none()
            })
            .collect();
        if to_parse.is_empty() {
            return;
        }
        let raw: Vec<Option<String>> = to_parse
            .iter()
            .map(|&i| qc.snippets[i].cached_content.clone())
            .collect();
        let texts = self.parse_snippets_txt_content(raw).await;
        for (&i, text) in to_parse.iter().zip(texts) {
            qc.snippets[i].cached_text = text;
        }
    }

    /// Fetch missing content for every snippet, then rebuild TF-IDF features
    /// over the snippets that have text.
    ///
    /// Snippets left without text lose any stale vector.
    pub async fn fetch_and_extract(&self, qc: &mut QueryContext, use_proxy: bool) {
        let all: Vec<usize> = (0..qc.snippets.len()).collect();
        self.fill_text(qc, &all, use_proxy).await;

        let texts: Vec<Option<String>> = qc.snippets.iter().map(|sp| sp.cached_text.clone()).collect();
        let lang = qc.lang.clone();
        let features = self.extract_tfidf_features(texts, lang.as_deref()).await;
        let mut with_features = 0usize;
        for (sp, f) in qc.snippets.iter_mut().zip(features) {
            match f {
                Some((v, bow)) => {
                    sp.set_tfidf(v, bow);
                    with_features += 1;
                }
                None => sp.clear_tfidf(),
            }
        }
        qc.compute_tfidf_features = false;
        debug!(
            query = %qc.query,
            snippets = qc.snippets.len(),
            with_features,
            "content features ready"
        );
    }

    /// Fetch missing content for every snippet and cache its plain coarse
    /// features on the snippet.
    ///
    /// Snippets left without text, or whose text yields no feature, lose any
    /// stale set.
    pub async fn fetch_and_extract_plain(&self, qc: &mut QueryContext, use_proxy: bool) {
        let all: Vec<usize> = (0..qc.snippets.len()).collect();
        self.fill_text(qc, &all, use_proxy).await;

        let texts: Vec<Option<String>> = qc.snippets.iter().map(|sp| sp.cached_text.clone()).collect();
        let features = self.extract_plain_features(texts).await;
        let mut with_features = 0usize;
        for (sp, f) in qc.snippets.iter_mut().zip(features) {
            with_features += usize::from(f.is_some());
            sp.features = f;
        }
        debug!(
            query = %qc.query,
            snippets = qc.snippets.len(),
            with_features,
            "plain features ready"
        );
    }

    /// TF-IDF features from title and summary only; no network.
    pub async fn fetch_summaries_and_features(&self, qc: &mut QueryContext) {
        let all: Vec<usize> = (0..qc.snippets.len()).collect();
        self.summary_features(qc, &all).await;
        qc.compute_tfidf_features = false;
    }

    async fn summary_features(&self, qc: &mut QueryContext, idxs: &[usize]) -> usize {
        let docs: Vec<Option<String>> = idxs
            .iter()
            .map(|&i| {
                let doc = qc.snippets[i].summary_document();
                has_any_text(&doc).then_some(doc)
            })
            .collect();
        let lang = qc.lang.clone();
        let features = self.extract_tfidf_features(docs, lang.as_deref()).await;
        let mut written = 0usize;
        for (&i, f) in idxs.iter().zip(features) {
            if let Some((v, bow)) = f {
                qc.snippets[i].set_tfidf(v, bow);
                written += 1;
            }
        }
        written
    }

    /// Content features for the whole query, falling back to title and
    /// summary for snippets whose content gave nothing.
    ///
    /// Does nothing unless `qc.compute_tfidf_features` is set.
    pub async fn fetch_all_content_and_features(&self, qc: &mut QueryContext, use_proxy: bool) {
        if !qc.compute_tfidf_features {
            return;
        }
        self.fetch_and_extract(qc, use_proxy).await;

        let missing: Vec<usize> = qc
            .snippets
            .iter()
            .enumerate()
            .filter(|(_, sp)| sp.features_tfidf().is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let written = self.summary_features(qc, &missing).await;
            debug!(missing = missing.len(), written, "summary fallback");
        }
    }
}

/// Run `f` on every `Some` item on the blocking pool, at most `limit` at a time.
///
/// Output order follows input order. `None` items and tasks that panic yield
/// `None`.
pub(crate) async fn run_bounded<T, R, F>(
    items: Vec<Option<T>>,
    limit: usize,
    stage: &'static str,
    f: F,
) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Option<R> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    futures_util::stream::iter(items.into_iter().enumerate())
        .map(|(slot, item)| {
            let f = Arc::clone(&f);
            async move {
                let item = item?;
                match tokio::task::spawn_blocking(move || f(item)).await {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(stage, slot, error = %e, "task failed");
                        None
                    }
                }
            }
        })
        .buffered(limit.max(1))
        .collect()
        .await
}

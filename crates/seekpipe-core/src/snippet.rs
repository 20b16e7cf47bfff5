//! Search result snippets and the feature caches attached to them.

use serde::{Deserialize, Serialize};

use crate::{BagOfWords, PlainFeatures, SnippetId, TfIdfVector};

/// One candidate search result.
///
/// Everything below `summary` is cache: raw content and parsed text are filled
/// by the content pipeline, feature vectors by the extraction stages, and
/// `ir_score` by the scorer and the clusterer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snippet {
    pub id: SnippetId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Raw fetched payload (usually markup).
    #[serde(default)]
    pub cached_content: Option<String>,
    /// Plain text parsed out of `cached_content`.
    #[serde(default)]
    pub cached_text: Option<String>,
    #[serde(default)]
    pub features: Option<PlainFeatures>,
    #[serde(default)]
    features_tfidf: Option<TfIdfVector>,
    #[serde(default)]
    bag_of_words: Option<BagOfWords>,
    /// Externally computed rank signal. Read-only for this crate family.
    #[serde(default)]
    pub rank: f64,
    /// Similarity score written by scoring/clustering.
    #[serde(default)]
    pub ir_score: f64,
}

impl Snippet {
    pub fn new(id: SnippetId, url: &str) -> Self {
        Self {
            id,
            url: Self::normalize_url(url),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_rank(mut self, rank: f64) -> Self {
        self.rank = rank;
        self
    }

    /// URL form used for comparisons: trimmed, without a trailing slash.
    pub fn normalize_url(url: &str) -> String {
        let u = url.trim();
        u.strip_suffix('/').unwrap_or(u).to_string()
    }

    pub fn features_tfidf(&self) -> Option<&TfIdfVector> {
        self.features_tfidf.as_ref()
    }

    pub fn bag_of_words(&self) -> Option<&BagOfWords> {
        self.bag_of_words.as_ref()
    }

    /// Install a TF-IDF vector together with its vocabulary.
    ///
    /// Vocabulary entries whose id is not in the vector are dropped, so the bag's
    /// key set never exceeds the vector's.
    pub fn set_tfidf(&mut self, vector: TfIdfVector, mut bow: BagOfWords) {
        bow.retain(|id, _| vector.contains_key(id));
        self.features_tfidf = Some(vector);
        self.bag_of_words = Some(bow);
    }

    pub fn clear_tfidf(&mut self) {
        self.features_tfidf = None;
        self.bag_of_words = None;
    }

    /// Drop every cache derived from fetched content.
    pub fn invalidate_content(&mut self) {
        self.cached_content = None;
        self.cached_text = None;
        self.features = None;
        self.clear_tfidf();
    }

    /// Title and summary joined, used as a stand-in document when no page
    /// content is available.
    pub fn summary_document(&self) -> String {
        let mut doc = String::with_capacity(self.title.len() + self.summary.len() + 1);
        doc.push_str(self.title.trim());
        if !doc.is_empty() && !self.summary.trim().is_empty() {
            doc.push(' ');
        }
        doc.push_str(self.summary.trim());
        doc
    }
}

/// Descending by rank; equal ranks keep their relative order when used with a
/// stable sort.
pub fn max_rank_order(a: &Snippet, b: &Snippet) -> std::cmp::Ordering {
    b.rank
        .partial_cmp(&a.rank)
        .unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TfIdfVector;

    #[test]
    fn set_tfidf_keeps_bag_within_vector_keys() {
        let mut sp = Snippet::new(1, "https://example.com/");
        let v: TfIdfVector = [(1, 0.5), (2, 0.5)].into_iter().collect();
        let bow: BagOfWords = [(1, "alpha".to_string()), (9, "stray".to_string())]
            .into_iter()
            .collect();
        sp.set_tfidf(v, bow);
        let bow = sp.bag_of_words().unwrap();
        assert!(bow.contains_key(&1));
        assert!(!bow.contains_key(&9));
        assert!(bow.keys().all(|k| sp.features_tfidf().unwrap().contains_key(k)));
    }

    #[test]
    fn normalize_url_drops_trailing_slash() {
        assert_eq!(
            Snippet::normalize_url(" https://example.com/a/ "),
            "https://example.com/a"
        );
    }

    #[test]
    fn summary_document_joins_title_and_summary() {
        let sp = Snippet::new(1, "u").with_title("Rust").with_summary("systems language");
        assert_eq!(sp.summary_document(), "Rust systems language");
        let sp = Snippet::new(2, "u").with_summary("only summary");
        assert_eq!(sp.summary_document(), "only summary");
    }

    #[test]
    fn snippet_deserializes_with_cache_fields_absent() {
        let sp: Snippet = serde_json::from_str(
            r#"{"id": 7, "url": "https://example.com", "title": "t", "rank": 2.5}"#,
        )
        .unwrap();
        assert_eq!(sp.id, 7);
        assert_eq!(sp.rank, 2.5);
        assert!(sp.features_tfidf().is_none());
        assert!(sp.cached_text.is_none());
    }
}

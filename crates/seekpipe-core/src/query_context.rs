//! Per-query snippet collection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, Snippet, SnippetId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub query: String,
    /// Language code used to pick a stop word list, if any.
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    /// Set while TF-IDF features need (re)computation.
    #[serde(default = "default_true")]
    pub compute_tfidf_features: bool,
    /// Header overrides sent with every fetch made for this query.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl QueryContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            lang: None,
            snippets: Vec::new(),
            compute_tfidf_features: true,
            headers: BTreeMap::new(),
        }
    }

    /// Add a snippet. A snippet with an id already present replaces the old one
    /// and marks features for recomputation.
    pub fn add_snippet(&mut self, snippet: Snippet) {
        self.compute_tfidf_features = true;
        match self.snippets.iter_mut().find(|s| s.id == snippet.id) {
            Some(slot) => *slot = snippet,
            None => self.snippets.push(snippet),
        }
    }

    pub fn snippet(&self, id: SnippetId) -> Option<&Snippet> {
        self.snippets.iter().find(|s| s.id == id)
    }

    pub fn snippet_mut(&mut self, id: SnippetId) -> Option<&mut Snippet> {
        self.snippets.iter_mut().find(|s| s.id == id)
    }

    pub fn snippet_by_url(&self, url: &str) -> Option<&Snippet> {
        let url = Snippet::normalize_url(url);
        self.snippets.iter().find(|s| s.url == url)
    }

    pub fn position(&self, id: SnippetId) -> Result<usize> {
        self.snippets
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::UnknownSnippet(id))
    }

    /// Forget all fetched content and derived features.
    pub fn invalidate_features(&mut self) {
        for sp in &mut self.snippets {
            sp.invalidate_content();
        }
        self.compute_tfidf_features = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_url() {
        let mut qc = QueryContext::new("rust");
        qc.add_snippet(Snippet::new(1, "https://a.example/"));
        qc.add_snippet(Snippet::new(2, "https://b.example"));
        assert_eq!(qc.snippet(2).unwrap().url, "https://b.example");
        assert_eq!(qc.snippet_by_url("https://a.example/").unwrap().id, 1);
        assert!(qc.snippet(3).is_none());
        assert!(matches!(qc.position(3), Err(Error::UnknownSnippet(3))));
    }

    #[test]
    fn re_adding_an_id_replaces_and_flags_recompute() {
        let mut qc = QueryContext::new("q");
        qc.add_snippet(Snippet::new(1, "u1").with_rank(1.0));
        qc.compute_tfidf_features = false;
        qc.add_snippet(Snippet::new(1, "u1").with_rank(3.0));
        assert_eq!(qc.snippets.len(), 1);
        assert_eq!(qc.snippets[0].rank, 3.0);
        assert!(qc.compute_tfidf_features);
    }
}

//! Near-duplicate detection between two snippets' page texts.

use seekpipe_core::{PlainFeatures, QueryContext, Result, SnippetId};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::content::ContentHandler;
use crate::mrf::{self, FeatureConfig, DEFAULT_DELIMITERS, EPSILON};

/// Why two texts were, or were not, judged duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// One side has no text.
    Missing,
    /// Token counts differ by more than the threshold allows; no features were
    /// extracted.
    LengthMismatch,
    /// One side produced no features.
    NoFeatures,
    Distinct,
    Duplicate,
}

impl Verdict {
    pub fn is_duplicate(self) -> bool {
        self == Verdict::Duplicate
    }
}

/// Counters over the comparisons a handler has made.
#[derive(Debug, Default)]
pub struct DedupStats {
    comparisons: AtomicU64,
    prefiltered: AtomicU64,
    feature_comparisons: AtomicU64,
}

impl DedupStats {
    pub fn comparisons(&self) -> u64 {
        self.comparisons.load(Ordering::Relaxed)
    }

    /// Comparisons settled by the token-count ratio alone.
    pub fn prefiltered(&self) -> u64 {
        self.prefiltered.load(Ordering::Relaxed)
    }

    /// Comparisons that went as far as feature overlap.
    pub fn feature_comparisons(&self) -> u64 {
        self.feature_comparisons.load(Ordering::Relaxed)
    }

    fn record(&self, verdict: Verdict) {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
        match verdict {
            Verdict::LengthMismatch => {
                self.prefiltered.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Distinct | Verdict::Duplicate => {
                self.feature_comparisons.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Missing | Verdict::NoFeatures => {}
        }
    }
}

/// Overlap test on two plain feature vectors (sorted, unique).
///
/// With `c` shared ids, duplicates satisfy
/// `c² / (|f1| + |f2| - 2c + ε) >= c² / ((1 - threshold)(|f1| + |f2|) + ε)`.
pub fn features_overlap(f1: &[u32], f2: &[u32], threshold: f64) -> bool {
    let (rad, common) = mrf::radiance(f1, f2);
    if common == 0 {
        return false;
    }
    let c = common as f64;
    let bar = (c * c) / ((1.0 - threshold) * (f1.len() + f2.len()) as f64 + EPSILON);
    rad >= bar
}

/// Compare two texts.
pub fn compare_texts(text_a: Option<&str>, text_b: Option<&str>, threshold: f64) -> Verdict {
    let (Some(a), Some(b)) = (text_a, text_b) else {
        return Verdict::Missing;
    };
    let na = mrf::tokenize(a, DEFAULT_DELIMITERS).len();
    let nb = mrf::tokenize(b, DEFAULT_DELIMITERS).len();
    if na == 0 || nb == 0 {
        return Verdict::Missing;
    }
    let ratio = na.min(nb) as f64 / na.max(nb) as f64;
    if ratio < threshold {
        return Verdict::LengthMismatch;
    }

    let cfg = FeatureConfig::coarse();
    let f1: PlainFeatures = mrf::plain_features(a, &cfg);
    let f2: PlainFeatures = mrf::plain_features(b, &cfg);
    if f1.is_empty() || f2.is_empty() {
        return Verdict::NoFeatures;
    }
    if features_overlap(&f1, &f2, threshold) {
        Verdict::Duplicate
    } else {
        Verdict::Distinct
    }
}

pub fn is_near_duplicate(text_a: &str, text_b: &str, threshold: f64) -> bool {
    compare_texts(Some(text_a), Some(text_b), threshold).is_duplicate()
}

impl ContentHandler {
    /// Whether snippets `a` and `b` carry the same content.
    ///
    /// Cached text is reused; only the missing sides are fetched, through the
    /// proxy when one is configured, and the result is cached on the snippets.
    /// Content that can't be obtained gives `false`. Unknown ids are an error.
    pub async fn has_same_content(
        &self,
        qc: &mut QueryContext,
        a: SnippetId,
        b: SnippetId,
        threshold: f64,
    ) -> Result<bool> {
        let ia = qc.position(a)?;
        let ib = qc.position(b)?;
        let use_proxy = self.config().proxy.is_some();
        self.fill_text(qc, &[ia, ib], use_proxy).await;

        let verdict = compare_texts(
            qc.snippets[ia].cached_text.as_deref(),
            qc.snippets[ib].cached_text.as_deref(),
            threshold,
        );
        self.dedup_stats.record(verdict);
        debug!(a, b, threshold, ?verdict, "content comparison");
        Ok(verdict.is_duplicate())
    }
}

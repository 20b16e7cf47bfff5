//! Hashed windowed n-gram features.
//!
//! Text is split into tokens, a window of `window_length` tokens slides over the
//! stream by `step`, and inside each window token chains (with optional skip
//! gaps) are hashed into 32-bit feature ids. Two flavors come out of this:
//!
//! - plain features: a sorted, deduplicated id set, used for near-duplicate
//!   detection and cheap overlap scores;
//! - TF-IDF features: id -> raw count, plus a vocabulary of literal tokens,
//!   later rescaled across a batch by [`compute_tf_idf`].
//!
//! Hashes are stable across runs and platforms (no `std` hasher involved).

use std::collections::HashMap;

use seekpipe_core::{
    BagOfWords, Error, FeatureId, PlainFeatures, Result, Snippet, SnippetId, TfIdfVector,
};
use serde::{Deserialize, Serialize};

use crate::stopwords::StopWords;

/// Delimiters used when no configuration overrides them.
pub const DEFAULT_DELIMITERS: &str = "\n\t\x0c\r ,.;:`'!?)(-|><^·&\"\\/{}#$–";

/// Guards the radiance quotient against a zero symmetric difference.
pub const EPSILON: f64 = 1e-6;

/// Placeholder standing in for a stop word inside multi-token windows.
const STOP_WORD_TOKEN: &str = "S";

/// Hash of a skip gap inside a chain.
const SKIP_TOKEN_HASH: u32 = 0xDEAD_BEEF;

/// Position multipliers when folding token hashes into a chain hash.
const HCTABLE: [u32; 10] = [1, 3, 5, 11, 23, 47, 97, 197, 397, 797];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub delimiters: String,
    /// Maximum chain radius that still produces a feature.
    pub radius: usize,
    /// Tokens the window advances by.
    pub step: usize,
    pub window_length: usize,
}

impl FeatureConfig {
    /// Pairs of adjacent tokens plus single tokens. Used for plain features.
    pub fn coarse() -> Self {
        Self {
            delimiters: DEFAULT_DELIMITERS.to_string(),
            radius: 2,
            step: 1,
            window_length: 2,
        }
    }

    /// One token per feature. Used for TF-IDF features.
    pub fn fine() -> Self {
        Self {
            delimiters: DEFAULT_DELIMITERS.to_string(),
            radius: 1,
            step: 1,
            window_length: 1,
        }
    }

    /// Rejects windows or steps of zero tokens.
    ///
    /// Feature generation itself treats a zero step as one, so an unchecked
    /// config still terminates.
    pub fn validate(&self) -> Result<()> {
        if self.window_length == 0 {
            return Err(Error::Config("window_length must be greater than zero".to_string()));
        }
        if self.step == 0 {
            return Err(Error::Config("step must be greater than zero".to_string()));
        }
        Ok(())
    }

    fn is_delimiter(&self, c: char) -> bool {
        self.delimiters.contains(c)
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self::coarse()
    }
}

/// Split `text` on any char of `delimiters`, dropping empty tokens.
pub fn tokenize<'t>(text: &'t str, delimiters: &str) -> Vec<&'t str> {
    text.split(|c: char| delimiters.contains(c))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Plain (unweighted) features: sorted, unique ids.
pub fn plain_features(text: &str, cfg: &FeatureConfig) -> PlainFeatures {
    let tokens: Vec<&str> = text
        .split(|c: char| cfg.is_delimiter(c))
        .filter(|t| !t.is_empty())
        .collect();
    let mut out = Vec::new();
    for_each_window(&tokens, cfg, |window| {
        build_window(window, cfg, |chain| out.push(chain.hash()));
    });
    out.sort_unstable();
    out.dedup();
    out
}

/// Raw term counts per feature id plus the literal vocabulary.
///
/// Tokens are lowercased, tokens starting with a digit are dropped, and stop
/// words are either dropped or (for windows wider than one token) replaced by a
/// placeholder so they still occupy a position.
pub fn tfidf_features(
    text: &str,
    cfg: &FeatureConfig,
    stopwords: Option<&StopWords>,
) -> (TfIdfVector, BagOfWords) {
    let mut tokens: Vec<String> = Vec::new();
    for raw in text.split(|c: char| cfg.is_delimiter(c)) {
        let tok = raw.trim_start();
        let Some(first) = tok.chars().next() else {
            continue;
        };
        if first.is_ascii_digit() {
            continue;
        }
        let tok = tok.to_lowercase();
        if stopwords.is_some_and(|sw| sw.contains(&tok)) {
            if cfg.window_length > 1 {
                tokens.push(STOP_WORD_TOKEN.to_string());
            }
            continue;
        }
        tokens.push(tok);
    }

    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let mut vector = TfIdfVector::new();
    let mut bow = BagOfWords::new();
    for_each_window(&refs, cfg, |window| {
        build_window(window, cfg, |chain| {
            let h = chain.hash();
            *vector.entry(h).or_insert(0.0) += 1.0;
            if let [Some(word)] = chain.tokens.as_slice() {
                if word.len() > 2 {
                    bow.entry(h).or_insert_with(|| (*word).to_string());
                }
            }
        });
    });
    (vector, bow)
}

/// Ordered hash of the whole token sequence of `text` (first ten tokens count).
pub fn single_feature(text: &str) -> FeatureId {
    tokenize(text, DEFAULT_DELIMITERS)
        .iter()
        .take(HCTABLE.len())
        .zip(HCTABLE)
        .fold(0u32, |h, (tok, mul)| {
            h.wrapping_add(super_fast_hash(tok.as_bytes()).wrapping_mul(mul))
        })
}

/// Snippet id for a result URL; trailing slashes and surrounding whitespace
/// don't change it.
pub fn snippet_id(url: &str) -> SnippetId {
    single_feature(&Snippet::normalize_url(url))
}

/// Rescale raw counts into TF-IDF weights across the batch, in place.
///
/// `idf = ln(N / df)`, where `df` counts documents holding a non-zero weight for
/// the id. A batch of one document uses `idf = 1`. Each vector is then divided
/// by the sum of its weights (left as is when that sum is zero).
pub fn compute_tf_idf(bags: &mut [TfIdfVector]) {
    let n = bags.len();
    if n == 0 {
        return;
    }
    let mut df: HashMap<FeatureId, u32> = HashMap::new();
    for bag in bags.iter() {
        for (id, w) in bag {
            if *w != 0.0 {
                *df.entry(*id).or_insert(0) += 1;
            }
        }
    }

    for bag in bags.iter_mut() {
        let mut norm = 0.0f32;
        for (id, w) in bag.iter_mut() {
            let idf = if n == 1 {
                1.0
            } else {
                let d = df.get(id).copied().unwrap_or(0).max(1);
                (n as f32 / d as f32).ln()
            };
            *w *= idf;
            norm += *w;
        }
        if norm == 0.0 {
            continue;
        }
        for w in bag.values_mut() {
            *w /= norm;
        }
    }
}

/// Count of ids shared by two sorted feature vectors.
pub fn common_features(a: &[FeatureId], b: &[FeatureId]) -> usize {
    let (mut i, mut j, mut common) = (0usize, 0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                common += 1;
                i += 1;
                j += 1;
            }
        }
    }
    common
}

/// Ids held by exactly one of two sorted feature vectors, given their shared
/// count.
pub fn symmetric_distance(a: &[FeatureId], b: &[FeatureId], common: usize) -> usize {
    a.len() + b.len() - 2 * common
}

/// `common² / (|a| + |b| - 2·common + ε)`, with the shared count.
pub fn radiance(a: &[FeatureId], b: &[FeatureId]) -> (f64, usize) {
    let common = common_features(a, b);
    let dist = symmetric_distance(a, b, common) as f64;
    let c = common as f64;
    ((c * c) / (dist + EPSILON), common)
}

/// Paul Hsieh's SuperFastHash.
pub fn super_fast_hash(data: &[u8]) -> u32 {
    fn get16(d: &[u8]) -> u32 {
        u32::from(d[0]) | (u32::from(d[1]) << 8)
    }

    if data.is_empty() {
        return 0;
    }
    let mut hash = data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for c in &mut chunks {
        hash = hash.wrapping_add(get16(&c[0..2]));
        let tmp = (get16(&c[2..4]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }
    let tail = chunks.remainder();
    match tail.len() {
        3 => {
            hash = hash.wrapping_add(get16(&tail[0..2]));
            hash ^= hash << 16;
            hash ^= u32::from(tail[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(get16(tail));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(u32::from(tail[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }

    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

/// A token sequence inside one window; `None` marks a skip gap.
#[derive(Debug, Clone)]
struct Chain<'t> {
    tokens: Vec<Option<&'t str>>,
    radius: isize,
    skip: bool,
}

impl<'t> Chain<'t> {
    fn extended(&self, token: Option<&'t str>) -> Self {
        let mut c = self.clone();
        c.tokens.push(token);
        match token {
            Some(_) => c.radius -= 1,
            None => c.skip = true,
        }
        c
    }

    fn is_feature(&self, max_radius: usize) -> bool {
        if self.radius < 0 || self.radius > max_radius as isize {
            return false;
        }
        match self.tokens.as_slice() {
            [Some(t)] => t.len() > 1,
            [None] => false,
            _ => true,
        }
    }

    /// Chains without gaps are order independent: tokens are sorted first.
    fn hash(&self) -> FeatureId {
        let mut toks = self.tokens.clone();
        if !self.skip {
            toks.sort_unstable();
        }
        toks.iter()
            .take(HCTABLE.len())
            .zip(HCTABLE)
            .fold(0u32, |h, (tok, mul)| {
                let th = match tok {
                    Some(t) => super_fast_hash(t.as_bytes()),
                    None => SKIP_TOKEN_HASH,
                };
                h.wrapping_add(th.wrapping_mul(mul))
            })
    }
}

fn for_each_window<'t>(tokens: &[&'t str], cfg: &FeatureConfig, mut f: impl FnMut(&[&'t str])) {
    let min_len = cfg.window_length.saturating_sub(cfg.radius);
    let step = cfg.step.max(1);
    let mut start = 0usize;
    loop {
        let end = (start + cfg.window_length).min(tokens.len());
        let window = &tokens[start.min(end)..end];
        if window.is_empty() || window.len() < min_len {
            break;
        }
        f(window);
        start = if window.len() > step {
            start + step
        } else {
            end
        };
    }
}

fn build_window<'t>(window: &[&'t str], cfg: &FeatureConfig, mut emit: impl FnMut(&Chain<'t>)) {
    let Some(first) = window.first() else {
        return;
    };
    let w = cfg.window_length as isize;
    let l = window.len() as isize;
    let seed = Chain {
        tokens: vec![Some(*first)],
        radius: w - (w - l).max(1),
        skip: false,
    };
    if seed.is_feature(cfg.radius) {
        emit(&seed);
    }

    let limit = window.len().min(cfg.window_length);
    let mut level = vec![seed];
    let mut tok = 0usize;
    while !level.is_empty() {
        tok += 1;
        let mut next = Vec::with_capacity(level.len() * 2);
        for chain in &level {
            if chain.tokens.len() >= limit {
                continue;
            }
            let taken = chain.extended(Some(window[tok]));
            if taken.is_feature(cfg.radius) {
                emit(&taken);
            }
            next.push(taken);
            next.push(chain.extended(None));
        }
        level = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tokenize_splits_on_delimiters_and_drops_empties() {
        let toks = tokenize("Hello, world!  foo-bar\tbaz", DEFAULT_DELIMITERS);
        assert_eq!(toks, vec!["Hello", "world", "foo", "bar", "baz"]);
    }

    #[test]
    fn super_fast_hash_is_stable() {
        assert_eq!(super_fast_hash(b""), 0);
        assert_eq!(super_fast_hash(b"seeks"), super_fast_hash(b"seeks"));
        assert_ne!(super_fast_hash(b"seeks"), super_fast_hash(b"skees"));
        // Every tail length goes through a distinct branch.
        let hs: Vec<u32> = ["abcd", "abcde", "abcdef", "abcdefg"]
            .iter()
            .map(|s| super_fast_hash(s.as_bytes()))
            .collect();
        for (i, a) in hs.iter().enumerate() {
            for b in &hs[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn fine_config_yields_one_feature_per_distinct_word() {
        let (v, bow) = tfidf_features("Rust rust systems a", &FeatureConfig::fine(), None);
        // "a" is a single byte and never becomes a feature.
        assert_eq!(v.len(), 2);
        let rust_id = bow
            .iter()
            .find(|(_, w)| w.as_str() == "rust")
            .map(|(id, _)| *id)
            .unwrap();
        assert_eq!(v[&rust_id], 2.0);
        assert!(bow.values().any(|w| w == "systems"));
    }

    #[test]
    fn tfidf_features_skip_digit_tokens_and_stop_words() {
        let sw = StopWords::english();
        let (v, bow) = tfidf_features("the 2024 release of rust", &FeatureConfig::fine(), Some(&sw));
        let words: Vec<&str> = bow.values().map(String::as_str).collect();
        assert!(words.contains(&"release"));
        assert!(words.contains(&"rust"));
        assert!(!words.contains(&"the"));
        assert!(!words.iter().any(|w| w.starts_with('2')));
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn bag_of_words_keys_are_vector_keys() {
        let (v, bow) = tfidf_features(
            "clustering search results with online kmeans",
            &FeatureConfig::coarse(),
            None,
        );
        assert!(!bow.is_empty());
        assert!(bow.keys().all(|k| v.contains_key(k)));
        // Coarse windows also produce pair features without a literal.
        assert!(v.len() > bow.len());
    }

    #[test]
    fn coarse_pairs_are_order_independent() {
        let a = plain_features("alpha beta", &FeatureConfig::coarse());
        let b = plain_features("beta alpha", &FeatureConfig::coarse());
        assert_eq!(a, b);
        // alpha, beta, {alpha beta}.
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn zero_step_or_window_is_rejected_and_still_terminates() {
        let zero_step = FeatureConfig {
            step: 0,
            ..FeatureConfig::fine()
        };
        let zero_window = FeatureConfig {
            window_length: 0,
            ..FeatureConfig::fine()
        };
        assert!(matches!(zero_step.validate(), Err(Error::Config(_))));
        assert!(matches!(zero_window.validate(), Err(Error::Config(_))));
        assert!(FeatureConfig::coarse().validate().is_ok());

        // Generation behaves as with a step of one.
        assert_eq!(
            plain_features("alpha beta gamma", &zero_step),
            plain_features("alpha beta gamma", &FeatureConfig::fine())
        );
        assert!(plain_features("alpha beta", &zero_window).is_empty());
        let (v, _) = tfidf_features("alpha beta", &zero_step, None);
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn vocabulary_literals_need_more_than_two_bytes() {
        // "né" is two chars but three bytes; "ab" is two bytes.
        let (v, bow) = tfidf_features("né ab", &FeatureConfig::fine(), None);
        assert_eq!(v.len(), 2);
        let words: Vec<&str> = bow.values().map(String::as_str).collect();
        assert_eq!(words, vec!["né"]);
    }

    #[test]
    fn snippet_id_ignores_trailing_slash() {
        assert_eq!(
            snippet_id("https://example.com/a/"),
            snippet_id(" https://example.com/a")
        );
        assert_ne!(snippet_id("https://example.com/a"), snippet_id("https://example.com/b"));
    }

    #[test]
    fn single_feature_depends_on_token_order() {
        assert_ne!(single_feature("alpha beta"), single_feature("beta alpha"));
        assert_eq!(
            single_feature("https://example.com/a"),
            single_feature("https://example.com/a")
        );
    }

    #[test]
    fn tf_idf_singleton_corpus_only_rescales() {
        let mut bags = vec![[(1u32, 2.0f32), (2, 1.0), (3, 1.0)].into_iter().collect()];
        compute_tf_idf(&mut bags);
        let b = &bags[0];
        assert!((b[&1] - 0.5).abs() < 1e-6);
        assert!((b[&2] - 0.25).abs() < 1e-6);
        assert!((b[&1] / b[&2] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn tf_idf_zeroes_features_shared_by_every_document() {
        let mut bags: Vec<TfIdfVector> = vec![
            [(1u32, 1.0f32), (2, 1.0)].into_iter().collect(),
            [(1u32, 1.0f32), (3, 1.0)].into_iter().collect(),
        ];
        compute_tf_idf(&mut bags);
        assert_eq!(bags[0][&1], 0.0);
        assert!((bags[0][&2] - 1.0).abs() < 1e-6);
        assert!((bags[1][&3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn radiance_counts_shared_ids() {
        let (r, common) = radiance(&[1, 2, 3, 4], &[2, 4, 6]);
        assert_eq!(common, 2);
        assert_eq!(symmetric_distance(&[1, 2, 3, 4], &[2, 4, 6], common), 3);
        assert!((r - 4.0 / (3.0 + EPSILON)).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn plain_features_are_idempotent_sorted_and_unique(text in "[a-z ,.]{0,200}") {
            let cfg = FeatureConfig::coarse();
            let a = plain_features(&text, &cfg);
            let b = plain_features(&text, &cfg);
            prop_assert_eq!(&a, &b);
            prop_assert!(a.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn common_features_is_symmetric(
            a in prop::collection::btree_set(any::<u32>(), 0..50),
            b in prop::collection::btree_set(any::<u32>(), 0..50),
        ) {
            let a: Vec<u32> = a.into_iter().collect();
            let b: Vec<u32> = b.into_iter().collect();
            prop_assert_eq!(common_features(&a, &b), common_features(&b, &a));
        }

        #[test]
        fn singleton_tf_idf_preserves_relative_weights(
            weights in prop::collection::hash_map(any::<u32>(), 1u8..20, 1..30),
        ) {
            let raw: TfIdfVector = weights.iter().map(|(k, v)| (*k, f32::from(*v))).collect();
            let mut bags = vec![raw.clone()];
            compute_tf_idf(&mut bags);
            let total: f32 = raw.values().sum();
            for (k, w) in &bags[0] {
                prop_assert!((w * total - raw[k]).abs() < 1e-3);
            }
        }
    }
}

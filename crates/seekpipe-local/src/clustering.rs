//! Cluster containers, sparse-vector similarity, and the [`Clusterer`] trait.
//!
//! A clusterer borrows the snippets it groups, so its results are detached into
//! a [`Clustering`] before anything writes back into the query context
//! (`post_processing`).

use seekpipe_core::{QueryContext, SnippetId, TfIdfVector};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error};

use crate::mrf;
use crate::stopwords::StopWords;

/// Words per cluster label.
pub const LABEL_WORDS: usize = 3;

/// Unnormalized dot product over the ids both vectors hold.
///
/// Higher means closer. Products are summed in id order so the result does not
/// depend on argument order or map layout.
pub fn distance_normed_points(p1: &TfIdfVector, p2: &TfIdfVector) -> f64 {
    let (small, large) = if p1.len() <= p2.len() { (p1, p2) } else { (p2, p1) };
    let mut shared: Vec<(u32, f64)> = small
        .iter()
        .filter_map(|(id, w)| large.get(id).map(|w2| (*id, f64::from(*w) * f64::from(*w2))))
        .collect();
    shared.sort_unstable_by_key(|(id, _)| *id);
    shared.iter().map(|(_, p)| p).sum()
}

/// Euclidean norm.
pub fn enorm(p: &TfIdfVector) -> f64 {
    p.values()
        .map(|w| f64::from(*w) * f64::from(*w))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity; a zero dot product returns 0 without computing norms.
pub fn distance(p1: &TfIdfVector, p2: &TfIdfVector) -> f64 {
    let dot = distance_normed_points(p1, p2);
    if dot == 0.0 {
        return 0.0;
    }
    dot / (enorm(p1) * enorm(p2))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Centroid {
    pub features: TfIdfVector,
}

impl Centroid {
    pub fn new(features: TfIdfVector) -> Self {
        Self { features }
    }

    /// Online update: move toward `point` by `lr`.
    ///
    /// Returns the summed post-update weights of the point's ids, which is the
    /// mass [`Centroid::normalize`] divides by. Ids are visited in ascending
    /// order so the sum does not depend on map layout.
    pub fn update(&mut self, lr: f32, point: &TfIdfVector) -> f32 {
        let mut entries: Vec<(u32, f32)> = point.iter().map(|(id, w)| (*id, *w)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        let mut mass = 0.0f32;
        for (id, w) in entries {
            let slot = self.features.entry(id).or_insert(0.0);
            *slot += lr * w;
            mass += *slot;
        }
        mass
    }

    /// Divide every weight by `mass`; a zero mass leaves the centroid as is.
    pub fn normalize(&mut self, mass: f32) {
        if mass == 0.0 {
            return;
        }
        for w in self.features.values_mut() {
            *w /= mass;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Cluster {
    pub centroid: Centroid,
    pub points: BTreeSet<SnippetId>,
    /// Sum of the members' external ranks.
    pub rank: f64,
    pub label: String,
}

impl Cluster {
    pub fn with_centroid(features: TfIdfVector) -> Self {
        Self {
            centroid: Centroid::new(features),
            ..Self::default()
        }
    }

    pub fn add_point(&mut self, id: SnippetId) {
        if !self.points.insert(id) {
            error!(snippet = id, "snippet added twice to the same cluster");
        }
    }

    /// Drop the members; the centroid is kept.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn contains(&self, id: SnippetId) -> bool {
        self.points.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn compute_rank(&mut self, qc: &QueryContext) {
        self.rank = self
            .points
            .iter()
            .filter_map(|id| qc.snippet(*id))
            .map(|sp| sp.rank)
            .sum();
    }

    /// Highest-weighted member words, skipping query words and stop words.
    fn compute_label(&mut self, qc: &QueryContext, query_words: &[String], stopwords: &StopWords) {
        let members: Vec<_> = self.points.iter().filter_map(|id| qc.snippet(*id)).collect();

        let mut totals: HashMap<u32, f32> = HashMap::new();
        for sp in &members {
            if let Some(v) = sp.features_tfidf() {
                for (id, w) in v {
                    *totals.entry(*id).or_insert(0.0) += w;
                }
            }
        }
        let mut ordered: Vec<(u32, f32)> = totals.into_iter().collect();
        ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut words: Vec<&str> = Vec::new();
        for (id, _) in ordered {
            if words.len() >= LABEL_WORDS {
                break;
            }
            let literal = members
                .iter()
                .filter_map(|sp| sp.bag_of_words().and_then(|b| b.get(&id)))
                .find(|w| !query_words.iter().any(|q| q == *w) && !stopwords.contains(w));
            if let Some(w) = literal {
                words.push(w.as_str());
            }
        }
        self.label = words.join(" ");
    }
}

/// Grouping of a query's snippets into `k` clusters plus a garbage bucket.
pub trait Clusterer {
    /// Reset state and pick the initial centroids.
    fn initialize(&mut self);

    /// Run to completion; calls [`Clusterer::initialize`] first.
    fn clusterize(&mut self);

    /// Similarity of each member of `cluster` to its centroid.
    fn rank_elements(&self, cluster: &Cluster) -> Vec<(SnippetId, f64)>;

    fn clusters(&self) -> &[Cluster];

    /// Points that matched no centroid.
    fn garbage(&self) -> &Cluster;

    /// Effective cluster count.
    fn k(&self) -> usize;
}

/// Results of a clustering run, detached from the borrowed snippets.
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    pub clusters: Vec<Cluster>,
    pub garbage: Cluster,
    /// Per-member similarity to its cluster's centroid.
    pub scores: Vec<(SnippetId, f64)>,
}

impl Clustering {
    pub fn collect<C: Clusterer + ?Sized>(clusterer: &C) -> Self {
        let clusters = clusterer.clusters().to_vec();
        let scores = clusters
            .iter()
            .flat_map(|c| clusterer.rank_elements(c))
            .collect();
        Self {
            clusters,
            garbage: clusterer.garbage().clone(),
            scores,
        }
    }
}

/// Write member scores back as IR scores, then rank, sort, and label clusters.
///
/// Clusters come back ordered by rank (sum of member ranks), highest first;
/// equal ranks keep their clustering order.
pub fn post_processing(run: Clustering, qc: &mut QueryContext) -> Vec<Cluster> {
    for (id, score) in &run.scores {
        if let Some(sp) = qc.snippet_mut(*id) {
            sp.ir_score = *score;
        }
    }

    let mut clusters = run.clusters;
    for c in clusters.iter_mut() {
        c.compute_rank(qc);
    }
    clusters.sort_by(|a, b| {
        b.rank
            .partial_cmp(&a.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let query_words: Vec<String> = mrf::tokenize(&qc.query, " ")
        .into_iter()
        .map(str::to_lowercase)
        .collect();
    // Results in other languages still carry English filler words.
    let stopwords = StopWords::english();
    for c in clusters.iter_mut() {
        c.compute_label(qc, &query_words, &stopwords);
        debug!(label = %c.label, rank = c.rank, members = c.len(), "cluster ready");
    }
    clusters
}

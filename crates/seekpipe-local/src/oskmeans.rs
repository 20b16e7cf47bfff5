//! Online k-means with rank-weighted seeding.
//!
//! Points are the TF-IDF vectors of the snippets, borrowed for the whole run
//! and visited in snippet-id order. Each visit moves the closest centroid
//! toward the point with a learning rate that decays geometrically from `nu0`
//! to `nuf` over the epoch budget. Points with zero similarity to every
//! centroid land in the garbage cluster.

use seekpipe_core::{
    snippet::max_rank_order, QueryContext, Result, Snippet, SnippetId, TfIdfVector,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use crate::clustering::{self, distance_normed_points, Cluster, Clusterer, Clustering};
use crate::config::OsKmeansConfig;

#[derive(Debug, Clone, Copy)]
struct Point<'a> {
    features: &'a TfIdfVector,
    rank: f64,
}

#[derive(Debug)]
pub struct OsKmeans<'a> {
    snippets: &'a [Snippet],
    points: BTreeMap<SnippetId, Point<'a>>,
    k: usize,
    clusters: Vec<Cluster>,
    garbage: Cluster,
    config: OsKmeansConfig,
    /// Global step, across points and epochs.
    t: u64,
    iterations: usize,
}

impl<'a> OsKmeans<'a> {
    pub fn new(snippets: &'a [Snippet], k: usize) -> Self {
        Self::build(snippets, k, OsKmeansConfig::default())
    }

    /// Snippets without a TF-IDF vector are not points. `k` is clamped to the
    /// point count. Fails with `Error::Config` on a schedule that can't run.
    pub fn with_config(snippets: &'a [Snippet], k: usize, config: OsKmeansConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(snippets, k, config))
    }

    fn build(snippets: &'a [Snippet], k: usize, config: OsKmeansConfig) -> Self {
        let points: BTreeMap<SnippetId, Point<'a>> = snippets
            .iter()
            .filter_map(|sp| {
                sp.features_tfidf().map(|features| {
                    (
                        sp.id,
                        Point {
                            features,
                            rank: sp.rank,
                        },
                    )
                })
            })
            .collect();
        let k = k.min(points.len());
        Self {
            snippets,
            points,
            k,
            clusters: vec![Cluster::default(); k],
            garbage: Cluster::default(),
            config,
            t: 0,
            iterations: 0,
        }
    }

    pub fn npoints(&self) -> usize {
        self.points.len()
    }

    /// Epochs completed by the last run.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Index and similarity of the centroid closest to `point`, or `None` when
    /// every similarity is zero.
    pub fn get_closest_cluster(&self, point: &TfIdfVector) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        let mut best_sim = 0.0;
        for (c, cluster) in self.clusters.iter().enumerate() {
            let sim = distance_normed_points(point, &cluster.centroid.features);
            if sim > best_sim {
                best_sim = sim;
                best = Some((c, sim));
            }
        }
        best
    }

    fn kmeans_pp(&mut self) {
        if self.k == 0 {
            return;
        }

        let snippets = self.snippets;
        let mut ranked: Vec<&'a Snippet> = snippets
            .iter()
            .filter(|sp| sp.features_tfidf().is_some())
            .collect();
        ranked.sort_by(|a, b| max_rank_order(a, b));
        let Some(first) = ranked.first() else {
            return;
        };
        let Some(seed) = first.features_tfidf() else {
            return;
        };
        self.clusters[0].centroid.features = seed.clone();
        let mut chosen: BTreeSet<SnippetId> = BTreeSet::new();
        chosen.insert(first.id);
        debug!(cluster = 0, snippet = first.id, "seeded centroid");

        for c in 1..self.k {
            let scores: Vec<(SnippetId, f64)> = self
                .points
                .iter()
                .filter(|(id, _)| !chosen.contains(id))
                .map(|(id, p)| {
                    let sim = self.get_closest_cluster(p.features).map_or(0.0, |(_, s)| s);
                    (*id, (1.0 - sim) * (1.0 - sim) * p.rank)
                })
                .collect();

            let total: f64 = scores.iter().map(|(_, s)| s).sum();
            for (id, s) in &scores {
                trace!(cluster = c, snippet = *id, prob = s / total, "seeding probability");
            }

            // Deterministic: the first maximum wins, nothing is sampled.
            let mut best: Option<(SnippetId, f64)> = None;
            for &(id, s) in &scores {
                if best.map_or(true, |(_, b)| s > b) {
                    best = Some((id, s));
                }
            }
            let Some((id, score)) = best else {
                break;
            };
            let Some(p) = self.points.get(&id) else {
                break;
            };
            self.clusters[c].centroid.features = p.features.clone();
            chosen.insert(id);
            debug!(cluster = c, snippet = id, score, "seeded centroid");
        }
    }

    fn assign_cluster(&mut self, id: SnippetId, point: &TfIdfVector) -> Option<usize> {
        match self.get_closest_cluster(point) {
            Some((c, _)) => {
                self.clusters[c].add_point(id);
                Some(c)
            }
            None => {
                self.garbage.add_point(id);
                None
            }
        }
    }

    fn learning_rate(&self) -> f32 {
        let OsKmeansConfig {
            niterations,
            nu0,
            nuf,
        } = self.config;
        let horizon = (self.points.len() * niterations) as f64;
        let exponent = self.t as f64 / horizon;
        (f64::from(nu0) * (f64::from(nuf) / f64::from(nu0)).powf(exponent)) as f32
    }

    fn stopping_criterion(&self) -> bool {
        self.iterations >= self.config.niterations
    }
}

impl<'a> Clusterer for OsKmeans<'a> {
    fn initialize(&mut self) {
        self.iterations = 0;
        self.t = 0;
        self.clusters = vec![Cluster::default(); self.k];
        self.garbage = Cluster::default();
        self.kmeans_pp();
    }

    fn clusterize(&mut self) {
        self.initialize();
        if self.points.is_empty() {
            return;
        }

        let points: Vec<(SnippetId, &'a TfIdfVector)> =
            self.points.iter().map(|(id, p)| (*id, p.features)).collect();
        while !self.stopping_criterion() {
            for c in self.clusters.iter_mut() {
                c.clear();
            }
            self.garbage.clear();

            for (id, features) in &points {
                let lr = self.learning_rate();
                if let Some(c) = self.assign_cluster(*id, features) {
                    let centroid = &mut self.clusters[c].centroid;
                    let mass = centroid.update(lr, features);
                    centroid.normalize(mass);
                }
                self.t += 1;
            }
            self.iterations += 1;
            trace!(
                epoch = self.iterations,
                garbage = self.garbage.len(),
                "epoch done"
            );
        }
        debug!(
            k = self.k,
            points = self.points.len(),
            garbage = self.garbage.len(),
            epochs = self.iterations,
            "clustering done"
        );
    }

    fn rank_elements(&self, cluster: &Cluster) -> Vec<(SnippetId, f64)> {
        cluster
            .points
            .iter()
            .filter_map(|id| {
                self.points
                    .get(id)
                    .map(|p| (*id, distance_normed_points(p.features, &cluster.centroid.features)))
            })
            .collect()
    }

    fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    fn garbage(&self) -> &Cluster {
        &self.garbage
    }

    fn k(&self) -> usize {
        self.k
    }
}

/// Cluster a query's snippets into at most `k` groups.
///
/// Members' IR scores are overwritten with their similarity to their cluster's
/// centroid; clusters come back ranked and labelled. An invalid schedule is
/// rejected before any snippet is touched.
pub fn cluster_query(
    qc: &mut QueryContext,
    k: usize,
    config: &OsKmeansConfig,
) -> Result<Vec<Cluster>> {
    let run = {
        let mut km = OsKmeans::with_config(&qc.snippets, k, config.clone())?;
        km.clusterize();
        Clustering::collect(&km)
    };
    Ok(clustering::post_processing(run, qc))
}

//! Public facade crate for `seekpipe`.
//!
//! Re-exports the backend-agnostic types and traits from `seekpipe-core`, and
//! the local implementations (fetcher, parser, feature extraction, clustering,
//! scoring) from `seekpipe-local` under [`local`].

pub use seekpipe_core::*;
pub use seekpipe_local as local;
pub use seekpipe_local::{
    cluster_query, fetch_many, Cluster, Clusterer, ContentConfig, ContentHandler, OsKmeans,
    OsKmeansConfig,
};

//! Ibis - an in-memory social-network graph analytics engine
//!
//! Answers four fixed analytic queries over a delimited-file dataset:
//! - Bounded shortest path with a minimum reciprocal-interaction count
//! - Largest connected component per interest tag over a birthday cutoff
//! - Top-k person pairs by shared interests within a hop limit of a place
//! - Top-k persons by closeness centrality inside a tag's forums
//!
//! The runtime ingests the dataset into compact in-memory indices with
//! dependency-driven, priority-scheduled tasks over a fixed worker pool,
//! then executes per-type query batches. Everything is rebuilt per run;
//! nothing persists.

pub mod engine;
pub mod error;
pub mod index;
pub mod io;
pub mod model;
pub mod queries;
pub mod scheduler;
pub mod structures;
#[cfg(test)]
mod tests;
pub mod tokenizer;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use io::MappedFile;
pub use queries::{
    Query, QueryBatcher, QueryFileSource, QueryParamSource, QuerySource, SearchStrategy,
};

//! Query parsing and batching
//!
//! Queries arrive either from a query file (one `query<digit>(...)` per
//! line) or as a single parameterised query from the command line; both
//! feed the same [`QuerySource`] trait. The batcher packs queries of one
//! type into bounded batches and records the tag names referenced by
//! centrality queries so indexing can pre-select them.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::io::MappedFile;
use crate::model::{encode_birthday, Birthday};
use crate::tokenizer::Tokenizer;

pub const QUERY_TYPES: usize = 4;

/// Payload budget per batch.
pub const BATCH_PAYLOAD_BYTES: usize = 4096;

/// Maximum queries per batch, per type. Shortest-path queries are cheap
/// and amortise over large batches; the other types run one per task.
pub const BATCH_QUERY_LIMITS: [usize; QUERY_TYPES] = [200, 1, 1, 1];

/// A parsed query of one of the four fixed kinds.
#[derive(Debug, Clone)]
pub enum Query {
    /// Q1: bounded shortest path with a minimum interaction count.
    ShortestPath {
        person_a: u64,
        person_b: u64,
        min_interactions: i32,
    },
    /// Q2: top-k tags by largest component over a birthday cutoff.
    TagComponents { k: u32, cutoff: Birthday },
    /// Q3: top-k person pairs by shared interests around a place.
    SharedInterests { k: u32, hops: u32, place: String },
    /// Q4: top-k persons by closeness centrality in a tag's forums.
    Centrality { k: u32, tag: String },
}

impl Query {
    #[inline]
    pub fn type_index(&self) -> usize {
        match self {
            Query::ShortestPath { .. } => 0,
            Query::TagComponents { .. } => 1,
            Query::SharedInterests { .. } => 2,
            Query::Centrality { .. } => 3,
        }
    }

    /// Serialized payload footprint counted against the batch budget.
    fn payload_size(&self) -> usize {
        let string_bytes = match self {
            Query::SharedInterests { place, .. } => place.len() + 1,
            Query::Centrality { tag, .. } => tag.len() + 1,
            _ => 0,
        };
        std::mem::size_of::<Query>() + string_bytes
    }
}

/// One query slot inside a batch; the result is written once by the
/// executing task and read by the output task.
pub struct QueryEntry {
    pub ignore: bool,
    pub query: Query,
    pub result: Arc<OnceLock<String>>,
}

/// Up to [`BATCH_QUERY_LIMITS`] queries of one type within the payload
/// budget.
pub struct QueryBatch {
    pub query_type: usize,
    pub entries: Vec<QueryEntry>,
}

/// Source of parsed queries; the file-backed parser and the
/// single-parameter source share this contract.
pub trait QuerySource: Send {
    fn read_next(&mut self) -> Result<Option<Query>>;
}

/// Parser over a mapped query file. The query kind is decided by the
/// digit at byte offset 5 of each line.
pub struct QueryFileSource {
    file: Arc<MappedFile>,
    name: String,
    pos: usize,
}

impl QueryFileSource {
    pub fn new(file: Arc<MappedFile>) -> Self {
        let name = file.name();
        QueryFileSource { file, name, pos: 0 }
    }
}

impl QuerySource for QueryFileSource {
    fn read_next(&mut self) -> Result<Option<Query>> {
        let mut tokenizer = Tokenizer::new(self.file.bytes(), &self.name);
        tokenizer.set_position(self.pos);
        if tokenizer.finished() {
            return Ok(None);
        }
        let id = tokenizer
            .peek(5)
            .ok_or_else(|| Error::corruption(&self.name, "truncated query line"))?;
        let query = match id {
            b'1' => {
                tokenizer.skip(7);
                let person_a = tokenizer.consume_long(b',')? as u64;
                tokenizer.skip(1);
                let person_b = tokenizer.consume_long(b',')? as u64;
                tokenizer.skip(1);
                let min_interactions = tokenizer.consume_long(b')')? as i32;
                tokenizer.skip(1);
                Query::ShortestPath {
                    person_a,
                    person_b,
                    min_interactions,
                }
            }
            b'2' => {
                tokenizer.skip(7);
                let k = tokenizer.consume_long(b',')? as u32;
                tokenizer.skip(1);
                let year = tokenizer.consume_fixed_width_long(4, 1)? as u32;
                let month = tokenizer.consume_fixed_width_long(2, 1)? as u32;
                let day = tokenizer.consume_fixed_width_long(2, 2)? as u32;
                Query::TagComponents {
                    k,
                    cutoff: encode_birthday(year, month, day),
                }
            }
            b'3' => {
                tokenizer.skip(7);
                let k = tokenizer.consume_long(b',')? as u32;
                tokenizer.skip(1);
                let hops = tokenizer.consume_long(b',')? as u32;
                tokenizer.skip(1);
                let rest = tokenizer.rest();
                let len = tokenizer.skip_after_counting(b')').saturating_sub(1);
                let place = String::from_utf8_lossy(&rest[..len]).into_owned();
                tokenizer.skip(1);
                Query::SharedInterests { k, hops, place }
            }
            b'4' => {
                tokenizer.skip(7);
                let k = tokenizer.consume_long(b',')? as u32;
                tokenizer.skip(1);
                let rest = tokenizer.rest();
                let len = tokenizer.skip_after_counting(b')').saturating_sub(1);
                let tag = String::from_utf8_lossy(&rest[..len]).into_owned();
                tokenizer.skip(1);
                Query::Centrality { k, tag }
            }
            other => return Err(Error::UnknownQueryId(other as char)),
        };
        self.pos = tokenizer.position();
        Ok(Some(query))
    }
}

/// Single query assembled from command-line parameters.
pub struct QueryParamSource {
    query: Option<Query>,
}

impl QueryParamSource {
    pub fn new(query_number: u32, params: &[String]) -> Result<Self> {
        let arg = |i: usize| -> Result<&str> {
            params
                .get(i)
                .map(|s| s.as_str())
                .ok_or_else(|| Error::Query(format!("query {query_number} needs more parameters")))
        };
        let int = |i: usize| -> Result<i64> {
            arg(i)?
                .parse::<i64>()
                .map_err(|e| Error::Query(format!("parameter {}: {e}", i + 1)))
        };
        let query = match query_number {
            1 => Query::ShortestPath {
                person_a: int(0)? as u64,
                person_b: int(1)? as u64,
                min_interactions: int(2)? as i32,
            },
            2 => {
                let date = arg(1)?;
                let mut parts = date.split('-');
                let mut field = |what: &str| -> Result<u32> {
                    parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(|| Error::Query(format!("bad {what} in date '{date}'")))
                };
                let cutoff =
                    encode_birthday(field("year")?, field("month")?, field("day")?);
                Query::TagComponents {
                    k: int(0)? as u32,
                    cutoff,
                }
            }
            3 => Query::SharedInterests {
                k: int(0)? as u32,
                hops: int(1)? as u32,
                place: arg(2)?.to_owned(),
            },
            4 => Query::Centrality {
                k: int(0)? as u32,
                tag: arg(1)?.to_owned(),
            },
            other => {
                return Err(Error::Query(format!("unknown query number {other}")));
            }
        };
        Ok(QueryParamSource { query: Some(query) })
    }
}

impl QuerySource for QueryParamSource {
    fn read_next(&mut self) -> Result<Option<Query>> {
        Ok(self.query.take())
    }
}

/// Everything the batcher produced from one pass over the source.
pub struct BatchSet {
    pub batches: [Vec<Arc<QueryBatch>>; QUERY_TYPES],
    pub counts: [usize; QUERY_TYPES],
    pub active: [bool; QUERY_TYPES],
    /// Result slots in input order, for the output task.
    pub order: Vec<Arc<OnceLock<String>>>,
    pub used_tags: FxHashSet<String>,
}

struct OpenBatch {
    entries: Vec<QueryEntry>,
    remaining: usize,
}

impl OpenBatch {
    fn new() -> Self {
        OpenBatch {
            entries: Vec::new(),
            remaining: BATCH_PAYLOAD_BYTES,
        }
    }
}

/// Packs queries into per-type batches; `parse` runs once as the
/// query-loading task.
pub struct QueryBatcher {
    source: Mutex<Box<dyn QuerySource>>,
    parsed: OnceLock<BatchSet>,
}

impl QueryBatcher {
    pub fn new(source: Box<dyn QuerySource>) -> Arc<QueryBatcher> {
        Arc::new(QueryBatcher {
            source: Mutex::new(source),
            parsed: OnceLock::new(),
        })
    }

    /// Drain the source into sealed batches.
    pub fn parse(&self) -> Result<()> {
        let mut source = self.source.lock();

        let mut batches: [Vec<Arc<QueryBatch>>; QUERY_TYPES] = Default::default();
        let mut open: [OpenBatch; QUERY_TYPES] = [
            OpenBatch::new(),
            OpenBatch::new(),
            OpenBatch::new(),
            OpenBatch::new(),
        ];
        let mut set = BatchSet {
            batches: Default::default(),
            counts: [0; QUERY_TYPES],
            active: [false; QUERY_TYPES],
            order: Vec::new(),
            used_tags: FxHashSet::default(),
        };

        while let Some(query) = source.read_next()? {
            let query_type = query.type_index();
            let required = query.payload_size() + std::mem::size_of::<QueryEntry>();
            set.active[query_type] = true;

            let current = &mut open[query_type];
            if !current.entries.is_empty()
                && (current.remaining < required
                    || current.entries.len() == BATCH_QUERY_LIMITS[query_type])
            {
                let sealed = std::mem::replace(current, OpenBatch::new());
                batches[query_type].push(Arc::new(QueryBatch {
                    query_type,
                    entries: sealed.entries,
                }));
            }

            if let Query::Centrality { tag, .. } = &query {
                set.used_tags.insert(tag.clone());
            }

            let result = Arc::new(OnceLock::new());
            set.order.push(Arc::clone(&result));
            let current = &mut open[query_type];
            current.entries.push(QueryEntry {
                ignore: false,
                query,
                result,
            });
            current.remaining = current.remaining.saturating_sub(required);
        }

        for (query_type, current) in open.into_iter().enumerate() {
            if !current.entries.is_empty() {
                batches[query_type].push(Arc::new(QueryBatch {
                    query_type,
                    entries: current.entries,
                }));
            }
        }
        for query_type in 0..QUERY_TYPES {
            set.counts[query_type] = batches[query_type].len();
            log::debug!(
                "parsed {} batches of query type {}",
                batches[query_type].len(),
                query_type + 1
            );
        }
        set.batches = batches;

        if self.parsed.set(set).is_err() {
            return Err(Error::Internal("query batches parsed twice".into()));
        }
        Ok(())
    }

    fn parsed(&self) -> &BatchSet {
        self.parsed
            .get()
            .expect("query batches read before parsing")
    }

    pub fn batches(&self, query_type: usize) -> &[Arc<QueryBatch>] {
        &self.parsed().batches[query_type]
    }

    pub fn batch_counts(&self) -> [usize; QUERY_TYPES] {
        self.parsed().counts
    }

    pub fn active_types(&self) -> [bool; QUERY_TYPES] {
        self.parsed().active
    }

    /// Tag names referenced by any centrality query.
    pub fn used_tags(&self) -> FxHashSet<String> {
        self.parsed().used_tags.clone()
    }

    /// Results in input order; empty string for queries never executed.
    pub fn results_in_order(&self) -> Vec<String> {
        self.parsed()
            .order
            .iter()
            .map(|slot| slot.get().cloned().unwrap_or_default())
            .collect()
    }
}

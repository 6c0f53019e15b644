//! Grouping builders: two-column CSV relations into keyed value lists
//!
//! Two build modes over the same chunked parse:
//!
//! - **Unsorted grouping** keeps per-key chained blocks; parallel shards
//!   are unioned at join by grafting chains.
//! - **Sorted grouping** flattens every key's blocks into one contiguous
//!   arena at join and sorts each list ascending.
//!
//! Workers recycle shards through an idle pool, so the number of live
//! shards is bounded by the number of concurrently running chunk tasks.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::io::MappedFile;
use crate::scheduler::{Task, TaskGroup};
use crate::structures::{AdjacencyIndex, BlockList, HashIndex};
use crate::tokenizer::{ChunkedFile, Tokenizer};

/// Chunking defaults for grouping builds.
pub const GROUPING_CHUNK_SIZE: usize = 1 << 22;
pub const GROUPING_MAX_CHUNKS: usize = 512;

/// Row interpretation for a two-column relation file.
#[derive(Clone, Default)]
pub struct GroupingSpec {
    /// Key is the second column instead of the first.
    pub reverse: bool,
    /// The value column is not the last one on the line.
    pub trailing_columns: bool,
    /// Collect the set of all values seen (forum discovery).
    pub collect_values: bool,
    /// Only keep rows whose key is in this set.
    pub key_filter: Option<Arc<FxHashSet<u32>>>,
}

/// Mapping from a raw CSV integer to a (possibly densified) id. `None`
/// drops the row.
pub type IdMap = Arc<dyn Fn(i64) -> Option<u32> + Send + Sync>;

/// Identity mapping for relations whose ids are used as-is.
pub fn identity_map() -> IdMap {
    Arc::new(|raw| Some(raw as u32))
}

/// One shard of grouped rows; merged pairwise at join time.
pub struct GroupedRelation {
    pub index: HashIndex<u32, BlockList<u32>>,
    pub values: FxHashSet<u32>,
    pub num_values: usize,
}

impl GroupedRelation {
    fn new() -> Self {
        GroupedRelation {
            index: HashIndex::new(),
            values: FxHashSet::default(),
            num_values: 0,
        }
    }

    fn merge(&mut self, other: GroupedRelation) {
        self.index
            .merge_with(other.index, |target, extra| target.merge(extra));
        self.values.extend(other.values);
        self.num_values += other.num_values;
    }
}

/// Accumulates the current key run before pushing it as one block.
struct RunAccumulator {
    key: Option<u32>,
    run: Vec<u32>,
}

impl RunAccumulator {
    fn new() -> Self {
        RunAccumulator {
            key: None,
            run: Vec::new(),
        }
    }

    fn push(&mut self, shard: &mut GroupedRelation, key: u32, value: u32) {
        if self.key != Some(key) {
            self.flush(shard);
            self.key = Some(key);
        }
        self.run.push(value);
    }

    fn flush(&mut self, shard: &mut GroupedRelation) {
        let Some(key) = self.key.take() else { return };
        if self.run.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.run);
        shard.num_values += block.len();
        match shard.index.retrieve_mut(&key) {
            Some(list) => list.push_block(block),
            None => {
                let mut list = BlockList::new();
                list.push_block(block);
                shard.index.insert(key, list);
            }
        }
    }
}

/// Parse one record-aligned region into `shard`.
pub fn load_grouped_region(
    tokenizer: &mut Tokenizer<'_>,
    spec: &GroupingSpec,
    key_map: &IdMap,
    value_map: &IdMap,
    shard: &mut GroupedRelation,
) -> Result<()> {
    let mut acc = RunAccumulator::new();
    // Rows arrive grouped by key; remembering the last filtered key skips
    // whole runs without probing the filter set again.
    let mut last_filtered: Option<u32> = None;

    while !tokenizer.finished() {
        let (first, second) = if spec.trailing_columns {
            let pair = tokenizer.consume_two_longs(b'|', b'|')?;
            tokenizer.skip_after(b'\n');
            pair
        } else {
            tokenizer.consume_two_longs(b'|', b'\n')?
        };
        let (raw_key, raw_value) = if spec.reverse {
            (second, first)
        } else {
            (first, second)
        };
        let Some(key) = key_map(raw_key) else { continue };
        if let Some(filter) = &spec.key_filter {
            if last_filtered == Some(key) {
                continue;
            }
            if !filter.contains(&key) {
                last_filtered = Some(key);
                continue;
            }
        }
        let Some(value) = value_map(raw_value) else {
            continue;
        };
        if spec.collect_values {
            shard.values.insert(value);
        }
        acc.push(shard, key, value);
    }
    acc.flush(shard);
    Ok(())
}

/// Sequential whole-file unsorted grouping.
pub fn load_grouped_file(
    file: &Arc<MappedFile>,
    spec: &GroupingSpec,
    key_map: &IdMap,
    value_map: &IdMap,
) -> Result<GroupedRelation> {
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);
    tokenizer.skip_after(b'\n'); // header
    let mut shard = GroupedRelation::new();
    load_grouped_region(&mut tokenizer, spec, key_map, value_map, &mut shard)?;
    Ok(shard)
}

struct ShardPool {
    idle: Mutex<Vec<GroupedRelation>>,
}

impl ShardPool {
    fn take(&self) -> GroupedRelation {
        self.idle.lock().pop().unwrap_or_else(GroupedRelation::new)
    }

    fn give_back(&self, shard: GroupedRelation) {
        self.idle.lock().push(shard);
    }

    fn drain_merged(&self) -> GroupedRelation {
        let mut shards = self.idle.lock();
        let mut merged = shards.pop().unwrap_or_else(GroupedRelation::new);
        while let Some(shard) = shards.pop() {
            merged.merge(shard);
        }
        merged
    }
}

/// Parallel unsorted grouping: one chunk task per region, the join task
/// merges all shards and hands the result to `finish`.
pub fn unsorted_grouping_group(
    file: Arc<MappedFile>,
    spec: GroupingSpec,
    key_map: IdMap,
    value_map: IdMap,
    label: &'static str,
    on_error: fn(crate::error::Error),
    finish: impl FnOnce(GroupedRelation) + Send + 'static,
) -> TaskGroup {
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);
    tokenizer.skip_after(b'\n'); // header
    let header_len = tokenizer.position();
    let chunks = Arc::new(ChunkedFile::new(
        file,
        header_len,
        GROUPING_CHUNK_SIZE,
        GROUPING_MAX_CHUNKS,
    ));
    let pool = Arc::new(ShardPool {
        idle: Mutex::new(Vec::new()),
    });

    let mut group = TaskGroup::new();
    for c in 0..chunks.num_chunks() {
        let chunks = Arc::clone(&chunks);
        let pool = Arc::clone(&pool);
        let spec = spec.clone();
        let key_map = Arc::clone(&key_map);
        let value_map = Arc::clone(&value_map);
        group.schedule(Task::new(label, move || {
            let mut shard = pool.take();
            let mut tokenizer = chunks.tokenizer(c);
            let result =
                load_grouped_region(&mut tokenizer, &spec, &key_map, &value_map, &mut shard);
            pool.give_back(shard);
            if let Err(e) = result {
                on_error(e);
            }
        }));
    }
    group.join(Task::new(label, move || {
        finish(pool.drain_merged());
    }));
    group
}

/// Flatten grouped shards into a sorted adjacency index.
pub fn flatten_sorted(shards: GroupedRelation, num_keys: usize) -> AdjacencyIndex {
    let arena_slots = shards.index.len() + shards.num_values;
    let mut index = AdjacencyIndex::with_arena_capacity(num_keys, arena_slots);
    // Deterministic arena layout: keys ascending.
    let mut keys: Vec<u32> = shards.index.iter().map(|(&k, _)| k).collect();
    keys.sort_unstable();
    for key in keys {
        let list = shards
            .index
            .retrieve(&key)
            .expect("key enumerated from the index");
        if list.is_empty() {
            continue;
        }
        let offset = list.flatten_into(index.arena_mut());
        index.insert(key, offset);
    }
    index
}

/// Parallel sorted grouping over a dense key space: chunk tasks group
/// shard-locally, the join concatenates every shard's blocks per key into
/// a fresh arena and sorts each list.
pub fn sorted_grouping_group(
    file: Arc<MappedFile>,
    spec: GroupingSpec,
    key_map: IdMap,
    value_map: IdMap,
    num_keys: usize,
    label: &'static str,
    on_error: fn(crate::error::Error),
    finish: impl FnOnce(AdjacencyIndex) + Send + 'static,
) -> TaskGroup {
    unsorted_grouping_group(
        file,
        spec,
        key_map,
        value_map,
        label,
        on_error,
        move |merged| finish(flatten_sorted(merged, num_keys)),
    )
}

/// Sequential sorted grouping for relations too small to chunk.
pub fn load_sorted_file(
    file: &Arc<MappedFile>,
    spec: &GroupingSpec,
    key_map: &IdMap,
    value_map: &IdMap,
    num_keys: usize,
) -> Result<AdjacencyIndex> {
    let shard = load_grouped_file(file, spec, key_map, value_map)?;
    Ok(flatten_sorted(shard, num_keys))
}

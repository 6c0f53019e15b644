//! Knows-graph builder: parallel sorted grouping
//!
//! `person_knows_person.csv` holds both directions of every friendship,
//! so grouping by the first column yields a symmetric adjacency whose
//! lists come out sorted ascending after the join pass.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::grouping::{sorted_grouping_group, GroupingSpec};
use crate::index::{data_file, files, publish, FileIndexes};
use crate::io::MappedFile;
use crate::scheduler::TaskGroup;

/// Task group building the knows graph; the join publishes the index.
pub fn person_graph_group(
    data_dir: &Path,
    indexes: &Arc<FileIndexes>,
    on_error: fn(Error),
) -> Result<TaskGroup> {
    let file = MappedFile::open(data_file(data_dir, files::PERSON_KNOWS_PERSON))?;
    let num_keys = indexes.person_mapper().count() as usize;

    let key_indexes = Arc::clone(indexes);
    let value_indexes = Arc::clone(indexes);
    let publish_indexes = Arc::clone(indexes);
    Ok(sorted_grouping_group(
        file,
        GroupingSpec::default(),
        Arc::new(move |raw| key_indexes.person_mapper().to_dense(raw as u64)),
        Arc::new(move |raw| value_indexes.person_mapper().to_dense(raw as u64)),
        num_keys,
        "person_graph",
        on_error,
        move |index| {
            log::debug!(
                "person graph: {} arena slots for {} persons",
                index.arena_slots(),
                num_keys
            );
            publish(&publish_indexes.person_graph, index, "person graph");
        },
    ))
}

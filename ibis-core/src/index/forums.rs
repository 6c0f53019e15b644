//! Forum indices, built only for tags that centrality queries reference

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::grouping::{
    identity_map, load_grouped_file, unsorted_grouping_group, GroupingSpec,
};
use crate::index::{data_file, files, publish, FileIndexes, TagForumsIndex};
use crate::io::MappedFile;
use crate::scheduler::TaskGroup;

/// Forums per used tag from `forum_hasTag_tag.csv` (sequential unsorted
/// grouping; key is the tag column). The collected value set is the set
/// of forums the member index later restricts itself to.
pub fn build_tag_forums(data_dir: &Path, indexes: &FileIndexes) -> Result<TagForumsIndex> {
    let file = MappedFile::open(data_file(data_dir, files::FORUM_HAS_TAG))?;
    let used_tags = Arc::new(indexes.tags().used_tags.clone());
    let spec = GroupingSpec {
        reverse: true,
        collect_values: true,
        key_filter: Some(used_tags),
        ..Default::default()
    };
    let shard = load_grouped_file(&file, &spec, &identity_map(), &identity_map())?;
    log::debug!(
        "tag forums: {} tags over {} forums",
        shard.index.len(),
        shard.values.len()
    );
    Ok(TagForumsIndex {
        index: shard.index,
        forums: shard.values,
    })
}

/// Members of the used forums from `forum_hasMember_person.csv` (parallel
/// unsorted grouping; the join date column trails the value).
pub fn forum_members_group(
    data_dir: &Path,
    indexes: &Arc<FileIndexes>,
    on_error: fn(Error),
) -> Result<TaskGroup> {
    let file = MappedFile::open(data_file(data_dir, files::FORUM_HAS_MEMBER))?;
    let used_forums = Arc::new(indexes.tag_forums().forums.clone());
    let spec = GroupingSpec {
        trailing_columns: true,
        key_filter: Some(used_forums),
        ..Default::default()
    };
    let value_indexes = Arc::clone(indexes);
    let publish_indexes = Arc::clone(indexes);
    Ok(unsorted_grouping_group(
        file,
        spec,
        identity_map(),
        Arc::new(move |raw| value_indexes.person_mapper().to_dense(raw as u64)),
        "forum_members",
        on_error,
        move |merged| {
            publish(&publish_indexes.forum_members, merged.index, "forum members");
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PersonMapper;
    use crate::scheduler::{run_worker, Priority, Scheduler};
    use crate::structures::HashIndex;
    use rustc_hash::FxHashSet;
    use std::io::Write;

    fn write(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_only_used_tags_and_their_forums_materialise() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            files::FORUM_HAS_TAG,
            "Forum.id|Tag.id\n100|1\n200|1\n300|2\n",
        );
        write(
            dir.path(),
            files::FORUM_HAS_MEMBER,
            "Forum.id|Person.id|joinDate\n100|10|d\n100|20|d\n200|20|d\n300|30|d\n",
        );

        let indexes = FileIndexes::new();
        let mut mapper = PersonMapper::with_capacity(3);
        for raw in [10u64, 20, 30] {
            mapper.insert(raw);
        }
        indexes.person_mapper.set(mapper).ok().unwrap();
        indexes
            .tags
            .set(crate::index::TagIndex {
                id_to_name: HashIndex::new(),
                name_to_id: HashIndex::new(),
                used_tags: [1u32].into_iter().collect::<FxHashSet<_>>(),
            })
            .ok()
            .unwrap();

        let tag_forums = build_tag_forums(dir.path(), &indexes).unwrap();
        assert_eq!(tag_forums.index.retrieve(&1).unwrap().len(), 2);
        assert!(tag_forums.index.retrieve(&2).is_none());
        assert!(tag_forums.forums.contains(&100));
        assert!(!tag_forums.forums.contains(&300));
        indexes.tag_forums.set(tag_forums).ok().unwrap();

        let group = forum_members_group(dir.path(), &indexes, |e| panic!("{e}")).unwrap();
        let scheduler = Scheduler::new();
        scheduler.schedule_all(group.close(), Priority::Critical, true);
        scheduler.set_close_on_empty();
        run_worker(&scheduler, true);

        let members = indexes.forum_members();
        let mut forum_100: Vec<u32> = members.retrieve(&100).unwrap().iter().copied().collect();
        forum_100.sort_unstable();
        assert_eq!(forum_100, vec![0, 1]);
        assert_eq!(members.retrieve(&200).unwrap().len(), 1);
        assert!(members.retrieve(&300).is_none());
    }
}

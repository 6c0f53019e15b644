//! Interest lists and per-tag statistics

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::index::grouping::{identity_map, load_sorted_file, GroupingSpec, IdMap};
use crate::index::{data_file, files, FileIndexes};
use crate::io::MappedFile;
use crate::model::{InterestStat, TagId};
use crate::structures::AdjacencyIndex;

/// Sorted interest lists per person from `person_hasInterest_tag.csv`.
pub fn build_has_interest(data_dir: &Path, indexes: &Arc<FileIndexes>) -> Result<AdjacencyIndex> {
    let file = MappedFile::open(data_file(data_dir, files::PERSON_HAS_INTEREST))?;
    let num_keys = indexes.person_mapper().count() as usize;
    let key_indexes = Arc::clone(indexes);
    let key_map: IdMap =
        Arc::new(move |raw| key_indexes.person_mapper().to_dense(raw as u64));
    load_sorted_file(
        &file,
        &GroupingSpec::default(),
        &key_map,
        &identity_map(),
        num_keys,
    )
}

/// Per-tag person count and maximum birthday, ordered by count
/// descending. The descending order carries the monotone stop used by the
/// component query.
pub fn build_interest_stats(indexes: &FileIndexes) -> Vec<InterestStat> {
    let interests = indexes.has_interest();
    let birthdays = indexes.birthdays();
    let num_persons = indexes.person_mapper().count();

    let mut stats: FxHashMap<TagId, InterestStat> = FxHashMap::default();
    for person in 0..num_persons {
        let Some(list) = interests.list(person) else {
            continue;
        };
        let birthday = birthdays[person as usize];
        for &tag in list.entries() {
            let stat = stats.entry(tag).or_insert_with(|| InterestStat {
                tag,
                num_persons: 0,
                max_birthday: 0,
            });
            stat.num_persons += 1;
            if birthday >= stat.max_birthday {
                stat.max_birthday = birthday;
            }
        }
    }

    let mut ordered: Vec<InterestStat> = stats.into_values().collect();
    ordered.sort_unstable_by(|a, b| {
        b.num_persons
            .cmp(&a.num_persons)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{encode_birthday, PersonMapper};
    use std::io::Write;

    #[test]
    fn test_interest_lists_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut f =
            std::fs::File::create(dir.path().join(files::PERSON_HAS_INTEREST)).unwrap();
        f.write_all(b"Person.id|Tag.id\n10|7\n10|3\n20|3\n30|3\n").unwrap();
        drop(f);

        let indexes = FileIndexes::new();
        let mut mapper = PersonMapper::with_capacity(3);
        for raw in [10u64, 20, 30] {
            mapper.insert(raw);
        }
        indexes.person_mapper.set(mapper).ok().unwrap();

        let interests = build_has_interest(dir.path(), &indexes).unwrap();
        assert_eq!(interests.list(0).unwrap().entries(), &[3, 7]);
        assert_eq!(interests.list(1).unwrap().entries(), &[3]);
        indexes.has_interest.set(interests).ok().unwrap();

        let birthdays = vec![
            encode_birthday(1980, 1, 1),
            encode_birthday(1990, 6, 15),
            encode_birthday(1985, 2, 2),
        ];
        indexes.birthdays.set(birthdays).ok().unwrap();

        let stats = build_interest_stats(&indexes);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].tag, 3);
        assert_eq!(stats[0].num_persons, 3);
        assert_eq!(stats[0].max_birthday, encode_birthday(1990, 6, 15));
        assert_eq!(stats[1].tag, 7);
        assert_eq!(stats[1].num_persons, 1);
        assert_eq!(stats[1].max_birthday, encode_birthday(1980, 1, 1));
    }
}

//! Tag name index

use std::path::Path;

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::index::{data_file, files, TagIndex};
use crate::io::MappedFile;
use crate::model::TagId;
use crate::structures::HashIndex;
use crate::tokenizer::Tokenizer;

/// Parse `tag.csv` into the id <-> name bijection. Tags whose name occurs
/// in `used_tag_names` (the tags referenced by centrality queries) are
/// flagged so the forum indices only materialise for them.
pub fn build_tag_index(data_dir: &Path, used_tag_names: &FxHashSet<String>) -> Result<TagIndex> {
    let file = MappedFile::open(data_file(data_dir, files::TAG))?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);

    let num_tags = tokenizer.count_lines().saturating_sub(1) as usize;
    let mut index = TagIndex {
        id_to_name: HashIndex::with_capacity(num_tags),
        name_to_id: HashIndex::with_capacity(num_tags),
        used_tags: FxHashSet::default(),
    };

    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let id = tokenizer.consume_long(b'|')? as TagId;
        let rest = tokenizer.rest();
        let len = tokenizer.skip_after_counting(b'|').saturating_sub(1);
        let tag_name = String::from_utf8_lossy(&rest[..len]).into_owned();

        if used_tag_names.contains(&tag_name) {
            index.used_tags.insert(id);
        }
        index.name_to_id.insert(tag_name.clone(), id);
        index.id_to_name.insert(id, tag_name);
        tokenizer.skip_after(b'\n');
    }
    log::debug!(
        "tag index: {} tags, {} used by centrality queries",
        index.id_to_name.len(),
        index.used_tags.len()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tag_bijection_and_used_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(files::TAG)).unwrap();
        f.write_all(b"id|name|url\n3|rock|u\n7|jazz|u\n12|noise rock|u\n")
            .unwrap();
        drop(f);

        let used: FxHashSet<String> = ["jazz".to_owned()].into_iter().collect();
        let index = build_tag_index(dir.path(), &used).unwrap();

        assert_eq!(index.id("rock"), Some(3));
        assert_eq!(index.id("noise rock"), Some(12));
        assert_eq!(index.name(7), Some("jazz"));
        assert_eq!(index.id("pop"), None);
        assert!(index.used_tags.contains(&7));
        assert!(!index.used_tags.contains(&3));
    }
}

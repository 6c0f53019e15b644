//! Place hierarchy, name resolution and person places
//!
//! The place forest gets DFS intervals so that containment reduces to two
//! comparisons; a person's places are the union of residence, study and
//! work organisation locations, stored as one sentinel-terminated run per
//! person.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::index::{data_file, files, FileIndexes, NamePlaceIndex, PersonPlaceIndex, PlaceBoundsIndex};
use crate::io::MappedFile;
use crate::model::{PlaceBound, PlaceBounds, PlaceId};
use crate::tokenizer::Tokenizer;

struct PlaceNode {
    place: PlaceId,
    children: Vec<usize>,
}

struct PlaceForest {
    nodes: Vec<PlaceNode>,
    roots: Vec<usize>,
}

/// Parse `place_isPartOf_place.csv` into an index-linked forest.
fn build_place_forest(data_dir: &Path) -> Result<PlaceForest> {
    let file = MappedFile::open(data_file(data_dir, files::PLACE_PART_OF))?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);

    let mut nodes: Vec<PlaceNode> = Vec::new();
    let mut by_place: FxHashMap<PlaceId, usize> = FxHashMap::default();
    let mut is_root: Vec<bool> = Vec::new();

    let mut intern = |place: PlaceId,
                      root: bool,
                      nodes: &mut Vec<PlaceNode>,
                      is_root: &mut Vec<bool>|
     -> usize {
        *by_place.entry(place).or_insert_with(|| {
            nodes.push(PlaceNode {
                place,
                children: Vec::new(),
            });
            is_root.push(root);
            nodes.len() - 1
        })
    };

    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let (child, parent) = tokenizer.consume_two_longs(b'|', b'\n')?;
        // A child has a parent by definition; a place first seen as a
        // parent stays a root until it shows up as a child.
        let child_idx = intern(child as PlaceId, false, &mut nodes, &mut is_root);
        is_root[child_idx] = false;
        let parent_idx = intern(parent as PlaceId, true, &mut nodes, &mut is_root);
        nodes[parent_idx].children.push(child_idx);
    }

    let roots = (0..nodes.len()).filter(|&i| is_root[i]).collect();
    Ok(PlaceForest { nodes, roots })
}

fn assign_bounds(
    forest: &PlaceForest,
    node: usize,
    next: &mut PlaceBound,
    out: &mut PlaceBoundsIndex,
) {
    let lower = *next;
    for &child in &forest.nodes[node].children {
        assign_bounds(forest, child, next, out);
        *next += 1;
    }
    out.insert(
        forest.nodes[node].place,
        PlaceBounds {
            lower,
            upper: *next,
        },
    );
}

/// DFS intervals for every place in the forest.
pub fn build_place_bounds(data_dir: &Path) -> Result<PlaceBoundsIndex> {
    let forest = build_place_forest(data_dir)?;
    let mut bounds = PlaceBoundsIndex::default();
    let mut next: PlaceBound = 0;
    for &root in &forest.roots {
        assign_bounds(&forest, root, &mut next, &mut bounds);
        next += 1;
    }
    Ok(bounds)
}

/// Name -> place ids multimap from `place.csv` (names repeat across the
/// hierarchy).
pub fn build_name_places(data_dir: &Path) -> Result<NamePlaceIndex> {
    let file = MappedFile::open(data_file(data_dir, files::PLACE))?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);

    let mut mapping = NamePlaceIndex::default();
    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let place = tokenizer.consume_long(b'|')? as PlaceId;
        let rest = tokenizer.rest();
        let len = tokenizer.skip_after_counting(b'|').saturating_sub(1);
        let place_name = String::from_utf8_lossy(&rest[..len]).into_owned();
        mapping.entry(place_name).or_default().push(place);
        tokenizer.skip_after(b'\n');
    }
    Ok(mapping)
}

/// Organisation id -> place id; organisation ids arrive in steps of ten,
/// so `id / 10` indexes the table directly.
fn build_organisation_places(data_dir: &Path) -> Result<Vec<PlaceId>> {
    let file = MappedFile::open(data_file(data_dir, files::ORGANISATION_LOCATED_IN))?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);

    let mut places = Vec::with_capacity(tokenizer.count_lines().saturating_sub(1) as usize);
    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let (organisation, place) = tokenizer.consume_two_longs(b'|', b'\n')?;
        debug_assert_eq!(organisation as usize, places.len() * 10);
        places.push(place as PlaceId);
    }
    Ok(places)
}

fn read_organisation_places(
    path: &Path,
    indexes: &FileIndexes,
    organisation_places: &[PlaceId],
    person_places: &mut [Vec<PlaceId>],
) -> Result<()> {
    let file = MappedFile::open(path)?;
    let name = file.name();
    let mut tokenizer = Tokenizer::new(file.bytes(), &name);
    let mapper = indexes.person_mapper();

    tokenizer.skip_after(b'\n'); // header
    while !tokenizer.finished() {
        let (raw_person, organisation) = tokenizer.consume_two_longs(b'|', b'|')?;
        tokenizer.skip_after(b'\n');
        let person = mapper.to_dense(raw_person as u64).ok_or_else(|| {
            Error::corruption(&name, format!("person {raw_person} missing from mapping"))
        })?;
        let place = organisation_places
            .get(organisation as usize / 10)
            .copied()
            .ok_or_else(|| {
                Error::corruption(&name, format!("organisation {organisation} has no place"))
            })?;
        person_places[person as usize].push(place);
    }
    Ok(())
}

/// Flatten each person's place set into interval runs terminated by the
/// explicit separator record.
pub fn build_person_places(
    data_dir: &Path,
    indexes: &FileIndexes,
    bounds: &PlaceBoundsIndex,
) -> Result<PersonPlaceIndex> {
    let mapper = indexes.person_mapper();
    let num_persons = mapper.count() as usize;
    let mut per_person: Vec<Vec<PlaceId>> = vec![Vec::new(); num_persons];

    {
        let file = MappedFile::open(data_file(data_dir, files::PERSON_LOCATED_IN))?;
        let name = file.name();
        let mut tokenizer = Tokenizer::new(file.bytes(), &name);
        tokenizer.skip_after(b'\n'); // header
        while !tokenizer.finished() {
            let (raw_person, place) = tokenizer.consume_two_longs(b'|', b'\n')?;
            let person = mapper.to_dense(raw_person as u64).ok_or_else(|| {
                Error::corruption(&name, format!("person {raw_person} missing from mapping"))
            })?;
            per_person[person as usize].push(place as PlaceId);
        }
    }

    let organisation_places = build_organisation_places(data_dir)?;
    read_organisation_places(
        &data_file(data_dir, files::PERSON_STUDY_AT),
        indexes,
        &organisation_places,
        &mut per_person,
    )?;
    read_organisation_places(
        &data_file(data_dir, files::PERSON_WORK_AT),
        indexes,
        &organisation_places,
        &mut per_person,
    )?;

    let total: usize = per_person.iter().map(|p| p.len() + 1).sum();
    let mut starts = Vec::with_capacity(num_persons);
    let mut data = Vec::with_capacity(total);
    for places in &per_person {
        starts.push(data.len() as u32);
        for place in places {
            let interval = bounds.get(place).copied().ok_or_else(|| {
                Error::corruption(
                    files::PLACE_PART_OF,
                    format!("place {place} missing from the hierarchy"),
                )
            })?;
            data.push(interval);
        }
        data.push(PlaceBounds::SEPARATOR);
    }
    Ok(PersonPlaceIndex::new(starts, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PersonMapper;
    use std::io::Write;

    fn write(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    /// Two-root forest:
    ///   1 (continent) <- 2 (country) <- 3, 4 (cities);  9 <- 8
    fn place_fixture(dir: &Path) {
        write(
            dir,
            files::PLACE_PART_OF,
            "Place.id|Place.id\n2|1\n3|2\n4|2\n8|9\n",
        );
        write(
            dir,
            files::PLACE,
            "id|name|url|type\n1|Asia|u|continent\n2|India|u|country\n3|Delhi|u|city\n\
             4|Mumbai|u|city\n8|Berlin|u|city\n9|Europe|u|continent\n",
        );
    }

    #[test]
    fn test_bounds_containment_follows_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        place_fixture(dir.path());
        let bounds = build_place_bounds(dir.path()).unwrap();

        let continent = bounds[&1];
        let country = bounds[&2];
        let city = bounds[&3];
        let other_city = bounds[&8];

        assert!(continent.contains(&country));
        assert!(continent.contains(&city));
        assert!(country.contains(&city));
        assert!(!city.contains(&country));
        assert!(!continent.contains(&other_city));
        assert!(bounds[&9].contains(&other_city));
    }

    #[test]
    fn test_name_places_multimap() {
        let dir = tempfile::tempdir().unwrap();
        place_fixture(dir.path());
        let names = build_name_places(dir.path()).unwrap();
        assert_eq!(names["Asia"], vec![1]);
        assert_eq!(names["Berlin"], vec![8]);
        assert!(names.get("Atlantis").is_none());
    }

    #[test]
    fn test_person_places_cover_residence_study_and_work() {
        let dir = tempfile::tempdir().unwrap();
        place_fixture(dir.path());
        write(dir.path(), files::PERSON_LOCATED_IN, "p|pl\n10|3\n20|8\n");
        write(
            dir.path(),
            files::ORGANISATION_LOCATED_IN,
            "org|pl\n0|4\n10|8\n",
        );
        write(dir.path(), files::PERSON_STUDY_AT, "p|org|year\n10|10|2001\n");
        write(dir.path(), files::PERSON_WORK_AT, "p|org|year\n20|0|2005\n");

        let indexes = FileIndexes::new();
        let mut mapper = PersonMapper::with_capacity(2);
        mapper.insert(10);
        mapper.insert(20);
        indexes.person_mapper.set(mapper).ok().unwrap();

        let bounds = build_place_bounds(dir.path()).unwrap();
        let places = build_person_places(dir.path(), &indexes, &bounds).unwrap();

        // Person 0 lives in Delhi (inside Asia) and studied in Berlin.
        assert!(places.person_at_place(0, bounds[&1]));
        assert!(places.person_at_place(0, bounds[&3]));
        assert!(places.person_at_place(0, bounds[&8]));
        assert!(!places.person_at_place(0, bounds[&4]));
        // Person 1 lives in Berlin and works in Mumbai.
        assert!(places.person_at_place(1, bounds[&9]));
        assert!(places.person_at_place(1, bounds[&4]));
        assert!(!places.person_at_place(1, bounds[&3]));
    }
}

//! Whole-engine consistency tests
//!
//! Generates a deterministic pseudo-random dataset, runs the engine over
//! a mixed query file, and checks every result line against independent
//! brute-force evaluations of the same queries.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Write;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{Engine, EngineConfig};
use crate::index::files;
use crate::io::MappedFile;
use crate::model::encode_birthday;
use crate::queries::{QueryFileSource, SearchStrategy};

const NUM_PERSONS: usize = 60;
const NUM_TAGS: u32 = 8;
const NUM_COMMENTS: usize = 400;
const NUM_FORUMS: u32 = 6;

const TAG_NAMES: [&str; NUM_TAGS as usize] = [
    "anime", "bossa", "cricket", "dubstep", "espresso", "folklore", "gamelan", "haiku",
];

/// (id, name, parent); parent 0 marks a root.
const PLACES: [(u32, &str, u32); 14] = [
    (1, "Asia", 0),
    (2, "Europe", 0),
    (3, "India", 1),
    (4, "China", 1),
    (5, "France", 2),
    (6, "Spain", 2),
    (7, "Delhi", 3),
    (8, "Springfield", 3),
    (9, "Beijing", 4),
    (10, "Shanghai", 4),
    (11, "Paris", 5),
    (12, "Lyon", 5),
    (13, "Springfield", 6),
    (14, "Madrid", 6),
];

/// Organisation ids come in steps of ten; each maps to a city.
const ORGANISATIONS: [(u32, u32); 4] = [(0, 7), (10, 9), (20, 11), (30, 13)];

struct Model {
    raw_ids: Vec<u64>,
    birthdays: Vec<u32>,
    birthday_strings: Vec<String>,
    knows: Vec<BTreeSet<u32>>,
    /// Reply counts keyed by (base author, reply author), dense ids.
    reply_counts: BTreeMap<(u32, u32), u32>,
    interests: Vec<BTreeSet<u32>>,
    residence: Vec<u32>,
    study_at: Vec<Option<u32>>,
    work_at: Vec<Option<u32>>,
    comment_creators: Vec<u32>,
    replies: Vec<(usize, usize)>,
    forum_members: BTreeMap<u32, BTreeSet<u32>>,
}

impl Model {
    fn generate() -> Model {
        let mut rng = StdRng::seed_from_u64(42);

        let raw_ids: Vec<u64> = (0..NUM_PERSONS).map(|i| 1000 + 3 * i as u64).collect();
        let mut birthdays = Vec::new();
        let mut birthday_strings = Vec::new();
        for i in 0..NUM_PERSONS {
            let year = 1970 + ((i * 13) % 40) as u32;
            let month = 1 + (i % 12) as u32;
            let day = 1 + (i % 28) as u32;
            birthdays.push(encode_birthday(year, month, day));
            birthday_strings.push(format!("{year:04}-{month:02}-{day:02}"));
        }

        let mut knows: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); NUM_PERSONS];
        for a in 0..NUM_PERSONS {
            for b in a + 1..NUM_PERSONS {
                if rng.gen_bool(0.08) {
                    knows[a].insert(b as u32);
                    knows[b].insert(a as u32);
                }
            }
        }

        let mut interests: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); NUM_PERSONS];
        for person in interests.iter_mut() {
            let count = 1 + rng.gen_range(0..5);
            for _ in 0..count {
                person.insert(1 + rng.gen_range(0..NUM_TAGS));
            }
        }

        let residence: Vec<u32> = (0..NUM_PERSONS).map(|_| rng.gen_range(7..=14)).collect();
        let study_at: Vec<Option<u32>> = (0..NUM_PERSONS)
            .map(|_| rng.gen_bool(0.3).then(|| ORGANISATIONS[rng.gen_range(0..4)].0))
            .collect();
        let work_at: Vec<Option<u32>> = (0..NUM_PERSONS)
            .map(|_| rng.gen_bool(0.3).then(|| ORGANISATIONS[rng.gen_range(0..4)].0))
            .collect();

        let comment_creators: Vec<u32> = (0..NUM_COMMENTS)
            .map(|_| rng.gen_range(0..NUM_PERSONS as u32))
            .collect();
        let mut replies = Vec::new();
        let mut reply_counts: BTreeMap<(u32, u32), u32> = BTreeMap::new();
        for comment in 1..NUM_COMMENTS {
            if !rng.gen_bool(0.7) {
                continue;
            }
            let gap = 1 + rng.gen_range(0..comment.min(100));
            let base = comment - gap;
            replies.push((comment, base));
            let base_author = comment_creators[base];
            let reply_author = comment_creators[comment];
            if base_author != reply_author
                && knows[base_author as usize].contains(&reply_author)
            {
                *reply_counts.entry((base_author, reply_author)).or_default() += 1;
            }
        }

        let mut forum_members: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for forum in 0..NUM_FORUMS {
            let members = forum_members.entry((forum + 1) * 100).or_default();
            for person in 0..NUM_PERSONS as u32 {
                if rng.gen_bool(0.25) {
                    members.insert(person);
                }
            }
        }

        Model {
            raw_ids,
            birthdays,
            birthday_strings,
            knows,
            reply_counts,
            interests,
            residence,
            study_at,
            work_at,
            comment_creators,
            replies,
            forum_members,
        }
    }

    fn write_dataset(&self, dir: &Path) {
        let write = |name: &str, content: String| {
            let mut f = std::fs::File::create(dir.join(name)).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        };

        let mut person = String::from("id|firstName|lastName|gender|birthday|creationDate\n");
        for i in 0..NUM_PERSONS {
            person.push_str(&format!(
                "{}|P{}|L{}|x|{}|c\n",
                self.raw_ids[i], i, i, self.birthday_strings[i]
            ));
        }
        write(files::PERSON, person);

        let mut knows = String::from("Person.id|Person.id\n");
        for (a, neighbours) in self.knows.iter().enumerate() {
            for &b in neighbours {
                knows.push_str(&format!(
                    "{}|{}\n",
                    self.raw_ids[a], self.raw_ids[b as usize]
                ));
            }
        }
        write(files::PERSON_KNOWS_PERSON, knows);

        let mut has_interest = String::from("Person.id|Tag.id\n");
        for (person, tags) in self.interests.iter().enumerate() {
            for tag in tags {
                has_interest.push_str(&format!("{}|{}\n", self.raw_ids[person], tag));
            }
        }
        write(files::PERSON_HAS_INTEREST, has_interest);

        let mut tags = String::from("id|name|url\n");
        for (i, name) in TAG_NAMES.iter().enumerate() {
            tags.push_str(&format!("{}|{}|u\n", i + 1, name));
        }
        write(files::TAG, tags);

        let mut places = String::from("id|name|url|type\n");
        for (id, name, _) in PLACES {
            places.push_str(&format!("{id}|{name}|u|t\n"));
        }
        write(files::PLACE, places);
        let mut part_of = String::from("Place.id|Place.id\n");
        for (id, _, parent) in PLACES {
            if parent != 0 {
                part_of.push_str(&format!("{id}|{parent}\n"));
            }
        }
        write(files::PLACE_PART_OF, part_of);

        let mut located = String::from("Person.id|Place.id\n");
        for person in 0..NUM_PERSONS {
            located.push_str(&format!(
                "{}|{}\n",
                self.raw_ids[person], self.residence[person]
            ));
        }
        write(files::PERSON_LOCATED_IN, located);

        let mut organisations = String::from("Organisation.id|Place.id\n");
        for (org, place) in ORGANISATIONS {
            organisations.push_str(&format!("{org}|{place}\n"));
        }
        write(files::ORGANISATION_LOCATED_IN, organisations);

        let mut study = String::from("Person.id|Organisation.id|classYear\n");
        for person in 0..NUM_PERSONS {
            if let Some(org) = self.study_at[person] {
                study.push_str(&format!("{}|{}|2005\n", self.raw_ids[person], org));
            }
        }
        write(files::PERSON_STUDY_AT, study);
        let mut work = String::from("Person.id|Organisation.id|workFrom\n");
        for person in 0..NUM_PERSONS {
            if let Some(org) = self.work_at[person] {
                work.push_str(&format!("{}|{}|2010\n", self.raw_ids[person], org));
            }
        }
        write(files::PERSON_WORK_AT, work);

        let mut forum_tags = String::from("Forum.id|Tag.id\n");
        for forum in 0..NUM_FORUMS {
            forum_tags.push_str(&format!("{}|{}\n", (forum + 1) * 100, forum % NUM_TAGS + 1));
        }
        write(files::FORUM_HAS_TAG, forum_tags);

        let mut members = String::from("Forum.id|Person.id|joinDate\n");
        for (forum, persons) in &self.forum_members {
            for &person in persons {
                members.push_str(&format!(
                    "{}|{}|d\n",
                    forum, self.raw_ids[person as usize]
                ));
            }
        }
        write(files::FORUM_HAS_MEMBER, members);

        let mut creators = String::from("Comment.id|Person.id\n");
        for (comment, &creator) in self.comment_creators.iter().enumerate() {
            creators.push_str(&format!(
                "{}|{}\n",
                comment * 10,
                self.raw_ids[creator as usize]
            ));
        }
        write(files::COMMENT_CREATOR, creators);

        let mut replies = String::from("Comment.id|Comment.id\n");
        for &(comment, base) in &self.replies {
            replies.push_str(&format!("{}|{}\n", comment * 10, base * 10));
        }
        write(files::COMMENT_REPLY_OF, replies);
    }

    // ---- brute-force references ----

    fn weight(&self, from: u32, to: u32) -> u32 {
        self.reply_counts.get(&(from, to)).copied().unwrap_or(0)
    }

    fn edge_qualifies(&self, a: u32, b: u32, threshold: i32) -> bool {
        if threshold < 0 {
            return true;
        }
        self.weight(a, b) as i32 > threshold && self.weight(b, a) as i32 > threshold
    }

    fn brute_q1(&self, a: u32, b: u32, threshold: i32) -> String {
        if a == b {
            return "0".to_owned();
        }
        let mut seen = vec![false; NUM_PERSONS];
        let mut queue = VecDeque::new();
        seen[a as usize] = true;
        queue.push_back((a, 0u32));
        while let Some((person, distance)) = queue.pop_front() {
            for &friend in &self.knows[person as usize] {
                if seen[friend as usize] || !self.edge_qualifies(person, friend, threshold) {
                    continue;
                }
                if friend == b {
                    return (distance + 1).to_string();
                }
                seen[friend as usize] = true;
                queue.push_back((friend, distance + 1));
            }
        }
        "-1".to_owned()
    }

    /// Largest component within `members` under the full knows graph.
    fn max_component(&self, members: &BTreeSet<u32>) -> u32 {
        let mut seen: BTreeSet<u32> = BTreeSet::new();
        let mut best = 0u32;
        for &seed in members {
            if seen.contains(&seed) {
                continue;
            }
            let mut size = 0u32;
            let mut queue = VecDeque::new();
            queue.push_back(seed);
            seen.insert(seed);
            while let Some(person) = queue.pop_front() {
                size += 1;
                for &friend in &self.knows[person as usize] {
                    if members.contains(&friend) && seen.insert(friend) {
                        queue.push_back(friend);
                    }
                }
            }
            best = best.max(size);
        }
        best
    }

    fn brute_q2(&self, k: usize, cutoff: u32) -> String {
        let mut results: Vec<(u32, &str)> = Vec::new();
        for tag in 1..=NUM_TAGS {
            let members: BTreeSet<u32> = (0..NUM_PERSONS as u32)
                .filter(|&p| {
                    self.birthdays[p as usize] >= cutoff
                        && self.interests[p as usize].contains(&tag)
                })
                .collect();
            if members.is_empty() {
                continue;
            }
            let size = self.max_component(&members);
            if size > 0 {
                results.push((size, TAG_NAMES[(tag - 1) as usize]));
            }
        }
        results.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        results.truncate(k);
        results
            .iter()
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn person_places(&self, person: usize) -> BTreeSet<u32> {
        let org_place = |org: Option<u32>| {
            org.map(|o| ORGANISATIONS.iter().find(|(id, _)| *id == o).unwrap().1)
        };
        let mut places = BTreeSet::new();
        places.insert(self.residence[person]);
        if let Some(place) = org_place(self.study_at[person]) {
            places.insert(place);
        }
        if let Some(place) = org_place(self.work_at[person]) {
            places.insert(place);
        }
        places
    }

    /// A place and everything transitively inside it.
    fn descendants(&self, place: u32) -> BTreeSet<u32> {
        let mut result: BTreeSet<u32> = [place].into();
        loop {
            let before = result.len();
            for (id, _, parent) in PLACES {
                if result.contains(&parent) {
                    result.insert(id);
                }
            }
            if result.len() == before {
                return result;
            }
        }
    }

    fn brute_q3(&self, k: usize, hops: u32, place_name: &str) -> String {
        let mut covered: BTreeSet<u32> = BTreeSet::new();
        for (id, name, _) in PLACES {
            if name == place_name {
                covered.extend(self.descendants(id));
            }
        }
        if covered.is_empty() {
            return String::new();
        }
        let qualified: Vec<u32> = (0..NUM_PERSONS as u32)
            .filter(|&p| !self.person_places(p as usize).is_disjoint(&covered))
            .collect();

        let mut pairs: Vec<((u64, u64), u32)> = Vec::new();
        for (i, &a) in qualified.iter().enumerate() {
            // Hop-limited distances over the full graph.
            let mut distance: BTreeMap<u32, u32> = [(a, 0)].into();
            let mut queue = VecDeque::from([a]);
            while let Some(person) = queue.pop_front() {
                let d = distance[&person];
                if d == hops {
                    continue;
                }
                for &friend in &self.knows[person as usize] {
                    if !distance.contains_key(&friend) {
                        distance.insert(friend, d + 1);
                        queue.push_back(friend);
                    }
                }
            }
            for &b in &qualified[i + 1..] {
                if !distance.contains_key(&b) {
                    continue;
                }
                let common = self.interests[a as usize]
                    .intersection(&self.interests[b as usize])
                    .count() as u32;
                pairs.push((
                    (self.raw_ids[a as usize], self.raw_ids[b as usize]),
                    common,
                ));
            }
        }
        pairs.sort_by(|x, y| y.1.cmp(&x.1).then_with(|| x.0.cmp(&y.0)));
        pairs.truncate(k);
        pairs
            .iter()
            .map(|((a, b), _)| format!("{a}|{b}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn brute_q4(&self, k: usize, tag_name: &str) -> String {
        let Some(tag_pos) = TAG_NAMES.iter().position(|n| *n == tag_name) else {
            return String::new();
        };
        let tag = tag_pos as u32 + 1;
        let mut members: BTreeSet<u32> = BTreeSet::new();
        for forum in 0..NUM_FORUMS {
            if forum % NUM_TAGS + 1 == tag {
                members.extend(&self.forum_members[&((forum + 1) * 100)]);
            }
        }
        // Drop members without a member friend.
        let kept: BTreeSet<u32> = members
            .iter()
            .copied()
            .filter(|&p| self.knows[p as usize].iter().any(|f| members.contains(f)))
            .collect();
        if kept.is_empty() {
            return String::new();
        }
        let n = kept.len() as u32;

        let mut scored: Vec<(f64, u64)> = Vec::new();
        for &seed in &kept {
            let mut distance: BTreeMap<u32, u32> = [(seed, 0)].into();
            let mut queue = VecDeque::from([seed]);
            let mut total = 0u64;
            let mut reached = 0u32;
            while let Some(person) = queue.pop_front() {
                let d = distance[&person];
                if person != seed {
                    total += d as u64;
                    reached += 1;
                }
                for &friend in &self.knows[person as usize] {
                    if kept.contains(&friend) && !distance.contains_key(&friend) {
                        distance.insert(friend, d + 1);
                        queue.push_back(friend);
                    }
                }
            }
            let closeness = if total > 0 && reached > 0 && n > 0 {
                let r = (reached - 1) as f64;
                (r * r) / ((n - 1) as f64 * total as f64)
            } else {
                0.0
            };
            scored.push((closeness, self.raw_ids[seed as usize]));
        }
        scored.sort_by(|a, b| {
            let delta = a.0 - b.0;
            if delta > 1e-12 {
                std::cmp::Ordering::Less
            } else if delta < -1e-12 {
                std::cmp::Ordering::Greater
            } else {
                a.1.cmp(&b.1)
            }
        });
        scored.truncate(k);
        scored
            .iter()
            .map(|(_, raw)| raw.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Query lines plus the brute-force expectations in the same order.
fn build_queries(model: &Model) -> (String, Vec<String>) {
    let raw = |dense: usize| model.raw_ids[dense];
    let mut lines = String::new();
    let mut expected = Vec::new();

    let q1_cases = [
        (0usize, 5usize, -1i32),
        (3, 3, -1),
        (10, 50, -1),
        (7, 20, 0),
        (1, 40, 0),
        (12, 33, 1),
    ];
    for (a, b, threshold) in q1_cases {
        lines.push_str(&format!("query1({}, {}, {})\n", raw(a), raw(b), threshold));
        expected.push(model.brute_q1(a as u32, b as u32, threshold));
    }

    let q2_cases = [(3usize, 1985, 1, 1), (5, 1995, 7, 15), (2, 1970, 1, 1)];
    for (k, year, month, day) in q2_cases {
        lines.push_str(&format!("query2({k}, {year:04}-{month:02}-{day:02})\n"));
        expected.push(model.brute_q2(k, encode_birthday(year, month, day)));
    }

    let q3_cases = [
        (4usize, 2u32, "Asia"),
        (3, 3, "Springfield"),
        (5, 1, "Europe"),
        (2, 2, "Atlantis"),
    ];
    for (k, hops, place) in q3_cases {
        lines.push_str(&format!("query3({k}, {hops}, {place})\n"));
        expected.push(model.brute_q3(k, hops, place));
    }

    let q4_cases = [(3usize, "cricket"), (4, "espresso"), (2, "zydeco")];
    for (k, tag) in q4_cases {
        lines.push_str(&format!("query4({k}, {tag})\n"));
        expected.push(model.brute_q4(k, tag));
    }

    (lines, expected)
}

fn run_engine(dir: &Path, queries: &str, strategy: SearchStrategy) -> Vec<String> {
    let query_path = dir.join("queries.txt");
    std::fs::write(&query_path, queries).unwrap();
    let file = MappedFile::open(&query_path).unwrap();
    let source = Box::new(QueryFileSource::new(file));
    let config = EngineConfig {
        workers: 4,
        q4_strategy: strategy,
    };
    Engine::new(dir.to_path_buf(), source, [true; 4], config).execute()
}

#[test]
fn test_engine_matches_brute_force() {
    let model = Model::generate();
    let dir = tempfile::tempdir().unwrap();
    model.write_dataset(dir.path());
    let (queries, expected) = build_queries(&model);

    let results = run_engine(dir.path(), &queries, SearchStrategy::Morsels);
    assert_eq!(results.len(), expected.len());
    for (i, (got, want)) in results.iter().zip(&expected).enumerate() {
        assert_eq!(got, want, "query line {}", i + 1);
    }
}

#[test]
fn test_backoff_strategy_matches_brute_force() {
    let model = Model::generate();
    let dir = tempfile::tempdir().unwrap();
    model.write_dataset(dir.path());
    let (queries, expected) = build_queries(&model);

    let results = run_engine(dir.path(), &queries, SearchStrategy::ExpBackoff);
    assert_eq!(results, expected);
}

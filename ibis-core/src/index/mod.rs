//! In-memory indices over the dataset files
//!
//! [`FileIndexes`] is the single owner of every built index. Builder tasks
//! populate the write-once slots; the dependency graph guarantees that a
//! query task only runs after the slots it reads are set.

pub mod forums;
pub mod grouping;
pub mod interests;
pub mod knows;
pub mod person;
pub mod places;
pub mod tags;
pub mod weights;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::model::{Birthday, ForumId, InterestStat, PersonId, PlaceBounds, PlaceId, TagId};
use crate::queries::batch::QueryBatcher;
use crate::scheduler::graph::{ScheduleGraph, TaskNode};
use crate::scheduler::{Priority, Task};
use crate::structures::{AdjacencyIndex, BlockList, HashIndex};

/// Dataset file names.
pub mod files {
    pub const PERSON: &str = "person.csv";
    pub const PERSON_KNOWS_PERSON: &str = "person_knows_person.csv";
    pub const PERSON_LOCATED_IN: &str = "person_isLocatedIn_place.csv";
    pub const PERSON_HAS_INTEREST: &str = "person_hasInterest_tag.csv";
    pub const PERSON_STUDY_AT: &str = "person_studyAt_organisation.csv";
    pub const PERSON_WORK_AT: &str = "person_workAt_organisation.csv";
    pub const PLACE: &str = "place.csv";
    pub const PLACE_PART_OF: &str = "place_isPartOf_place.csv";
    pub const ORGANISATION_LOCATED_IN: &str = "organisation_isLocatedIn_place.csv";
    pub const TAG: &str = "tag.csv";
    pub const FORUM_HAS_TAG: &str = "forum_hasTag_tag.csv";
    pub const FORUM_HAS_MEMBER: &str = "forum_hasMember_person.csv";
    pub const COMMENT_CREATOR: &str = "comment_hasCreator_person.csv";
    pub const COMMENT_REPLY_OF: &str = "comment_replyOf_comment.csv";
}

/// Bidirectional tag name index plus the tags referenced by centrality
/// queries (only those get forum indices built).
pub struct TagIndex {
    pub id_to_name: HashIndex<TagId, String>,
    pub name_to_id: HashIndex<String, TagId>,
    pub used_tags: FxHashSet<TagId>,
}

impl TagIndex {
    #[inline]
    pub fn name(&self, id: TagId) -> Option<&str> {
        self.id_to_name.retrieve(&id).map(|s| s.as_str())
    }

    #[inline]
    pub fn id(&self, name: &str) -> Option<TagId> {
        self.name_to_id.retrieve(name).copied()
    }
}

/// Forums per used tag, plus the set of all forums reached this way.
pub struct TagForumsIndex {
    pub index: HashIndex<TagId, BlockList<ForumId>>,
    pub forums: FxHashSet<ForumId>,
}

pub type ForumMembersIndex = HashIndex<ForumId, BlockList<PersonId>>;

pub type PlaceBoundsIndex = FxHashMap<PlaceId, PlaceBounds>;

/// Place names are not unique; a name resolves to every matching place.
pub type NamePlaceIndex = FxHashMap<String, Vec<PlaceId>>;

/// Per-person place intervals (residence, study, work), stored as one
/// flat run per person terminated by [`PlaceBounds::SEPARATOR`].
pub struct PersonPlaceIndex {
    starts: Vec<u32>,
    data: Vec<PlaceBounds>,
}

impl PersonPlaceIndex {
    pub fn new(starts: Vec<u32>, data: Vec<PlaceBounds>) -> Self {
        PersonPlaceIndex { starts, data }
    }

    /// Does `person` live, study or work anywhere inside `bounds`?
    pub fn person_at_place(&self, person: PersonId, bounds: PlaceBounds) -> bool {
        let mut i = self.starts[person as usize] as usize;
        while self.data[i] != PlaceBounds::SEPARATOR {
            if bounds.contains(&self.data[i]) {
                return true;
            }
            i += 1;
        }
        false
    }
}

/// Per-edge interaction counters, one slot per knows-arena slot.
///
/// The weight of the edge stored at arena slot `i` lives at index `i`;
/// count slots own unused weight slots, keeping the offset mapping
/// identical to the adjacency layout. Increments saturate at 255.
pub struct CommentWeights {
    weights: Vec<AtomicU8>,
}

impl CommentWeights {
    pub fn new(slots: usize) -> Self {
        let mut weights = Vec::with_capacity(slots);
        weights.resize_with(slots, || AtomicU8::new(0));
        CommentWeights { weights }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    #[inline]
    pub fn get(&self, slot: usize) -> u8 {
        self.weights[slot].load(Ordering::Relaxed)
    }

    /// Saturating concurrent increment.
    pub fn increment(&self, slot: usize) {
        let cell = &self.weights[slot];
        let mut current = cell.load(Ordering::Relaxed);
        while current < u8::MAX {
            match cell.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Write-once slots for every index, populated by builder tasks.
pub struct FileIndexes {
    pub person_mapper: OnceLock<crate::model::PersonMapper>,
    pub person_graph: OnceLock<AdjacencyIndex>,
    pub comment_weights: OnceLock<Arc<CommentWeights>>,
    pub birthdays: OnceLock<Vec<Birthday>>,
    pub has_interest: OnceLock<AdjacencyIndex>,
    pub tags: OnceLock<TagIndex>,
    pub place_bounds: OnceLock<PlaceBoundsIndex>,
    pub person_places: OnceLock<PersonPlaceIndex>,
    pub name_places: OnceLock<NamePlaceIndex>,
    pub tag_forums: OnceLock<TagForumsIndex>,
    pub forum_members: OnceLock<ForumMembersIndex>,
    pub interest_stats: OnceLock<Vec<InterestStat>>,
}

fn built<'a, T>(slot: &'a OnceLock<T>, what: &'static str) -> &'a T {
    // The dependency graph orders every reader after the builder task.
    slot.get()
        .unwrap_or_else(|| panic!("{what} index read before it was built"))
}

pub(crate) fn publish<T>(slot: &OnceLock<T>, value: T, what: &'static str) {
    if slot.set(value).is_err() {
        panic!("{what} index built twice");
    }
}

impl FileIndexes {
    pub fn new() -> Arc<FileIndexes> {
        Arc::new(FileIndexes {
            person_mapper: OnceLock::new(),
            person_graph: OnceLock::new(),
            comment_weights: OnceLock::new(),
            birthdays: OnceLock::new(),
            has_interest: OnceLock::new(),
            tags: OnceLock::new(),
            place_bounds: OnceLock::new(),
            person_places: OnceLock::new(),
            name_places: OnceLock::new(),
            tag_forums: OnceLock::new(),
            forum_members: OnceLock::new(),
            interest_stats: OnceLock::new(),
        })
    }

    pub fn person_mapper(&self) -> &crate::model::PersonMapper {
        built(&self.person_mapper, "person mapper")
    }

    pub fn person_graph(&self) -> &AdjacencyIndex {
        built(&self.person_graph, "person graph")
    }

    pub fn comment_weights(&self) -> &Arc<CommentWeights> {
        built(&self.comment_weights, "comment weights")
    }

    pub fn birthdays(&self) -> &[Birthday] {
        built(&self.birthdays, "birthday").as_slice()
    }

    pub fn has_interest(&self) -> &AdjacencyIndex {
        built(&self.has_interest, "interest")
    }

    pub fn tags(&self) -> &TagIndex {
        built(&self.tags, "tag")
    }

    pub fn place_bounds(&self) -> &PlaceBoundsIndex {
        built(&self.place_bounds, "place bounds")
    }

    pub fn person_places(&self) -> &PersonPlaceIndex {
        built(&self.person_places, "person places")
    }

    pub fn name_places(&self) -> &NamePlaceIndex {
        built(&self.name_places, "name places")
    }

    pub fn tag_forums(&self) -> &TagForumsIndex {
        built(&self.tag_forums, "tag forums")
    }

    pub fn forum_members(&self) -> &ForumMembersIndex {
        built(&self.forum_members, "forum members")
    }

    pub fn interest_stats(&self) -> &[InterestStat] {
        built(&self.interest_stats, "interest statistics").as_slice()
    }
}

/// Abort the process on a fatal build error; there is no partial-result
/// mode.
pub fn abort_on_error<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => fatal(error),
    }
}

pub fn fatal(error: Error) -> ! {
    log::error!("fatal: {error}");
    eprintln!("fatal: {error}");
    std::process::exit(2);
}

fn fatal_fn(error: Error) {
    fatal(error);
}

pub fn data_file(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(name)
}

/// Attach every ingestion task to the dependency graph and declare the
/// build/query ordering edges.
pub fn setup_index_tasks(
    graph: &Arc<ScheduleGraph>,
    indexes: &Arc<FileIndexes>,
    data_dir: &Arc<PathBuf>,
    batcher: &Arc<QueryBatcher>,
) {
    let scheduler = Arc::clone(graph.scheduler());

    // Person mapping: scans person.csv once, fixing the dense id space.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        graph.set_task(
            Priority::Critical,
            TaskNode::PersonMapping,
            Task::new("person_mapping", move || {
                let mapper = abort_on_error(person::build_person_mapping(&data_dir));
                publish(&indexes.person_mapper, mapper, "person mapper");
            }),
        );
    }

    // Knows graph: parallel sorted grouping over person_knows_person.csv.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        let graph_ref = Arc::clone(graph);
        let scheduler = Arc::clone(&scheduler);
        graph.set_task(
            Priority::Critical,
            TaskNode::PersonGraph,
            Task::new("person_graph", move || {
                let mut group =
                    abort_on_error(knows::person_graph_group(&data_dir, &indexes, fatal_fn));
                graph_ref.update_task(TaskNode::PersonGraph, 1);
                let graph_done = Arc::clone(&graph_ref);
                group.join(Task::new("person_graph", move || {
                    graph_done.update_task(TaskNode::PersonGraph, -1);
                }));
                scheduler.schedule_all(group.close(), Priority::Critical, true);
            }),
        );
    }

    // Comment weights: streaming reply-graph scan.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        let graph_ref = Arc::clone(graph);
        let scheduler = Arc::clone(&scheduler);
        graph.set_task(
            Priority::Critical,
            TaskNode::CommentCreators,
            Task::new("comment_weights", move || {
                let mut group = abort_on_error(weights::comment_weights_group(
                    &data_dir, &indexes, fatal_fn,
                ));
                graph_ref.update_task(TaskNode::CommentCreators, 1);
                let graph_done = Arc::clone(&graph_ref);
                group.join(Task::new("comment_weights", move || {
                    graph_done.update_task(TaskNode::CommentCreators, -1);
                }));
                scheduler.schedule_all(group.close(), Priority::Urgent, true);
            }),
        );
    }

    // Interests: sequential sorted grouping (small file).
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        graph.set_task(
            Priority::Critical,
            TaskNode::HasInterest,
            Task::new("has_interest", move || {
                let index = abort_on_error(interests::build_has_interest(&data_dir, &indexes));
                publish(&indexes.has_interest, index, "interest");
            }),
        );
    }

    // Birthdays.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        graph.set_task(
            Priority::Critical,
            TaskNode::Birthdays,
            Task::new("birthdays", move || {
                let birthdays =
                    abort_on_error(person::build_birthday_index(&data_dir, &indexes));
                publish(&indexes.birthdays, birthdays, "birthday");
            }),
        );
    }

    // Place bounds + person places.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        graph.set_task(
            Priority::Critical,
            TaskNode::PersonPlaces,
            Task::new("person_places", move || {
                let bounds = abort_on_error(places::build_place_bounds(&data_dir));
                let person_places =
                    abort_on_error(places::build_person_places(&data_dir, &indexes, &bounds));
                publish(&indexes.place_bounds, bounds, "place bounds");
                publish(&indexes.person_places, person_places, "person places");
            }),
        );
    }

    // Name -> place multimap.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        graph.set_task(
            Priority::Critical,
            TaskNode::NamePlaces,
            Task::new("name_places", move || {
                let names = abort_on_error(places::build_name_places(&data_dir));
                publish(&indexes.name_places, names, "name places");
            }),
        );
    }

    // Tag names; flags the tags referenced by centrality queries.
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        let batcher = Arc::clone(batcher);
        graph.set_task(
            Priority::Critical,
            TaskNode::Tags,
            Task::new("tags", move || {
                let tags =
                    abort_on_error(tags::build_tag_index(&data_dir, &batcher.used_tags()));
                publish(&indexes.tags, tags, "tag");
            }),
        );
    }

    // Forums carrying used tags (sequential unsorted grouping).
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        graph.set_task(
            Priority::Critical,
            TaskNode::TagForums,
            Task::new("tag_forums", move || {
                let tag_forums = abort_on_error(forums::build_tag_forums(&data_dir, &indexes));
                publish(&indexes.tag_forums, tag_forums, "tag forums");
            }),
        );
    }

    // Members of those forums (parallel unsorted grouping).
    {
        let indexes = Arc::clone(indexes);
        let data_dir = Arc::clone(data_dir);
        let graph_ref = Arc::clone(graph);
        let scheduler = Arc::clone(&scheduler);
        graph.set_task(
            Priority::Critical,
            TaskNode::ForumMembers,
            Task::new("forum_members", move || {
                let mut group =
                    abort_on_error(forums::forum_members_group(&data_dir, &indexes, fatal_fn));
                graph_ref.update_task(TaskNode::ForumMembers, 1);
                let graph_done = Arc::clone(&graph_ref);
                group.join(Task::new("forum_members", move || {
                    graph_done.update_task(TaskNode::ForumMembers, -1);
                }));
                scheduler.schedule_all(group.close(), Priority::Critical, true);
            }),
        );
    }

    // Per-tag person counts and max birthdays.
    {
        let indexes = Arc::clone(indexes);
        graph.set_task(
            Priority::Critical,
            TaskNode::InterestStats,
            Task::new("interest_stats", move || {
                let stats = interests::build_interest_stats(&indexes);
                publish(&indexes.interest_stats, stats, "interest statistics");
            }),
        );
    }

    // Build ordering.
    graph.add_edge(TaskNode::Initialize, TaskNode::PersonMapping);
    graph.add_edge(TaskNode::PersonMapping, TaskNode::PersonGraph);
    graph.add_edge(TaskNode::PersonMapping, TaskNode::HasInterest);
    graph.add_edge(TaskNode::PersonMapping, TaskNode::Birthdays);
    graph.add_edge(TaskNode::PersonMapping, TaskNode::PersonPlaces);
    graph.add_edge(TaskNode::PersonGraph, TaskNode::CommentCreators);
    graph.add_edge(TaskNode::NeedQ2orQ3, TaskNode::HasInterest);
    graph.add_edge(TaskNode::NeedQ2, TaskNode::Birthdays);
    graph.add_edge(TaskNode::NeedQ3, TaskNode::PersonPlaces);
    graph.add_edge(TaskNode::NeedQ3, TaskNode::NamePlaces);
    graph.add_edge(TaskNode::NeedQ4, TaskNode::ForumMembers);
    graph.add_edge(TaskNode::NeedQ4, TaskNode::TagForums);
    graph.add_edge(TaskNode::NeedQ2orQ4, TaskNode::Tags);
    graph.add_edge(TaskNode::QueryLoading, TaskNode::Tags);
    graph.add_edge(TaskNode::Tags, TaskNode::TagForums);
    graph.add_edge(TaskNode::TagForums, TaskNode::ForumMembers);
    graph.add_edge(TaskNode::HasInterest, TaskNode::InterestStats);
    graph.add_edge(TaskNode::Birthdays, TaskNode::InterestStats);

    // Query readiness.
    graph.add_edge(TaskNode::PersonGraph, TaskNode::Query1);
    graph.add_edge(TaskNode::CommentCreators, TaskNode::Query1);
    graph.add_edge(TaskNode::PersonGraph, TaskNode::Query2);
    graph.add_edge(TaskNode::HasInterest, TaskNode::Query2);
    graph.add_edge(TaskNode::Birthdays, TaskNode::Query2);
    graph.add_edge(TaskNode::InterestStats, TaskNode::Query2);
    graph.add_edge(TaskNode::Tags, TaskNode::Query2);
    graph.add_edge(TaskNode::PersonGraph, TaskNode::Query3);
    graph.add_edge(TaskNode::HasInterest, TaskNode::Query3);
    graph.add_edge(TaskNode::PersonPlaces, TaskNode::Query3);
    graph.add_edge(TaskNode::NamePlaces, TaskNode::Query3);
    graph.add_edge(TaskNode::PersonGraph, TaskNode::Query4);
    graph.add_edge(TaskNode::ForumMembers, TaskNode::Query4);
    graph.add_edge(TaskNode::Tags, TaskNode::Query4);
    graph.add_edge(TaskNode::TagForums, TaskNode::Query4);
}

//! Entity identifiers, packed birthdays and id mappers

use rustc_hash::FxHashMap;

pub type PersonId = u32;
pub type CommentId = u64;
pub type TagId = u32;
pub type PlaceId = u32;
pub type OrganisationId = u32;
pub type ForumId = u32;

/// Birthday packed as `(year << 16) | (month << 8) | day`, so the natural
/// integer order is the calendar order.
pub type Birthday = u32;

#[inline]
pub fn encode_birthday(year: u32, month: u32, day: u32) -> Birthday {
    (year << 16) | (month << 8) | day
}

/// Order-preserving densification of raw person ids.
///
/// The first appearance in `person.csv` fixes the dense id; the mapping is
/// built once by the person-mapping task and read-only afterwards.
pub struct PersonMapper {
    to_dense: FxHashMap<u64, PersonId>,
    to_raw: Vec<u64>,
}

impl PersonMapper {
    pub fn with_capacity(num_persons: usize) -> Self {
        PersonMapper {
            to_dense: FxHashMap::with_capacity_and_hasher(num_persons, Default::default()),
            to_raw: Vec::with_capacity(num_persons),
        }
    }

    /// Assign the next dense id to `raw` on first appearance.
    pub fn insert(&mut self, raw: u64) -> PersonId {
        if let Some(&id) = self.to_dense.get(&raw) {
            return id;
        }
        let id = self.to_raw.len() as PersonId;
        self.to_dense.insert(raw, id);
        self.to_raw.push(raw);
        id
    }

    /// Dense id of an already-mapped person.
    #[inline]
    pub fn to_dense(&self, raw: u64) -> Option<PersonId> {
        self.to_dense.get(&raw).copied()
    }

    /// Raw source id for a dense id.
    #[inline]
    pub fn to_raw(&self, id: PersonId) -> u64 {
        self.to_raw[id as usize]
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.to_raw.len() as u32
    }
}

/// Comment ids are multiples of ten in the source data; scaling by ten
/// yields a compact key without a lookup table. Not densified.
#[inline]
pub fn scale_comment_id(raw: u64) -> CommentId {
    raw / 10
}

pub type PlaceBound = u32;

/// DFS interval of a place in the place forest. A place `P` contains `Q`
/// iff `P.lower <= Q.lower && P.upper >= Q.upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceBounds {
    pub lower: PlaceBound,
    pub upper: PlaceBound,
}

impl PlaceBounds {
    /// Terminator of a person's place run. Encoded explicitly; never a real
    /// interval because bounds are assigned from zero upwards.
    pub const SEPARATOR: PlaceBounds = PlaceBounds {
        lower: PlaceBound::MAX,
        upper: PlaceBound::MAX,
    };

    #[inline]
    pub fn contains(&self, other: &PlaceBounds) -> bool {
        self.lower <= other.lower && self.upper >= other.upper
    }
}

/// Per-tag aggregate feeding the component query's scan order.
#[derive(Debug, Clone)]
pub struct InterestStat {
    pub tag: TagId,
    pub num_persons: u32,
    pub max_birthday: Birthday,
}

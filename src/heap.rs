//! The storage heap the admission controller sits in front of.
//!
//! The controller never stores bytes itself: it asks a [Heap] for capacities and
//! occupancies, and hands it the objects it admitted.
//! [MemoryHeap] is an in-process implementation of the contract.

use crate::{
    magnitude::Magnitude,
    requisition::{Direction, Medium, Space},
};
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
    sync::Mutex,
};
use uuid::Uuid;

/// Identifier of a stored object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From,
)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ObjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

/// Where the initial extent of a new object comes from.
///
/// The handles of the simple media are opaque to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    File(u64),
    Bulk(u64),
    Heap(u64),
    /// A slice of an existing object, possibly spanning several media.
    Object(ObjectId),
}

impl Location {
    /// The medium of a simple location, `None` for composite ones.
    pub fn medium(&self) -> Option<Medium> {
        match self {
            Location::File(_) => Some(Medium::File),
            Location::Bulk(_) => Some(Medium::Bulk),
            Location::Heap(_) => Some(Medium::Heap),
            Location::Object(_) => None,
        }
    }
}

/// A contiguous run of an object on one medium.
pub type Extent = (Medium, u64);

/// Description of the initial content of a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSource {
    pub location: Option<Location>,
    pub offset: u64,
    pub length: u64,
}

impl ObjectSource {
    /// An object with no initial extent.
    pub const fn empty() -> Self {
        Self {
            location: None,
            offset: 0,
            length: 0,
        }
    }

    pub const fn new(location: Location, offset: u64, length: u64) -> Self {
        Self {
            location: Some(location),
            offset,
            length,
        }
    }

    /// Resolves the extents the new object will be made of.
    ///
    /// `lookup` returns the extents of an existing object.
    pub fn extents(
        &self,
        lookup: impl FnOnce(ObjectId) -> Result<Vec<Extent>, HeapError>,
    ) -> Result<Vec<Extent>, HeapError> {
        match self.location {
            None => Ok(Vec::new()),
            Some(Location::Object(id)) => slice(&lookup(id)?, self.offset, self.length),
            Some(simple) => Ok(simple
                .medium()
                .map(|medium| vec![(medium, self.length)])
                .unwrap_or_default()),
        }
    }
}

/// Whether the requested space was already granted by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reservation {
    /// The heap must not count the new object against its limits again.
    Reserved,
    /// The heap checks its own limits.
    Unreserved,
}

/// Everything a heap needs to construct an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewObject {
    pub direction: Direction,
    pub source: ObjectSource,
    pub reservation: Reservation,
    /// Created for an inbound requester that was not willing to wait.
    pub provisional: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapError {
    #[error("object {0} not found")]
    NotFound(ObjectId),
    #[error("range {offset}+{length} exceeds object length {total}")]
    OutOfRange { offset: u64, length: u64, total: u64 },
    #[error("not enough {0} space")]
    Insufficient(Medium),
    #[error("storage backend: {0}")]
    Backend(String),
}

/// The transactional storage heap, as seen by admission control.
pub trait Heap: Send + Sync + 'static {
    /// Capacity of `medium` for objects of `direction`.
    fn max_occupancy(&self, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError>;

    /// Space currently occupied on `medium` by objects of `direction`.
    fn occupancy(&self, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError>;

    /// Per-medium lengths of `length` bytes of `object` starting at `offset`.
    fn aggregate_length(
        &self,
        object: ObjectId,
        offset: u64,
        length: u64,
    ) -> Result<Space, HeapError>;

    fn create_object(&self, object: NewObject) -> Result<ObjectId, HeapError>;

    /// Destroys an object, returning the direction whose occupancy decreased.
    fn destroy_object(&self, object: ObjectId) -> Result<Direction, HeapError>;
}

/// Cuts `length` bytes starting at `offset` out of a sequence of extents.
pub fn slice(extents: &[Extent], offset: u64, length: u64) -> Result<Vec<Extent>, HeapError> {
    let total: u64 = extents.iter().map(|&(_, len)| len).sum();
    match offset.checked_add(length) {
        Some(end) if end <= total => {}
        _ => {
            return Err(HeapError::OutOfRange {
                offset,
                length,
                total,
            })
        }
    }

    let mut skip = offset;
    let mut remaining = length;
    let mut output = Vec::new();
    for &(medium, len) in extents {
        if remaining == 0 {
            break;
        }
        if skip >= len {
            skip -= len;
            continue;
        }

        let take = (len - skip).min(remaining);
        output.push((medium, take));
        remaining -= take;
        skip = 0;
    }
    Ok(output)
}

/// Total space taken by `extents` on each medium.
pub fn aggregate(extents: &[Extent]) -> Space {
    let mut space = Space::ZERO;
    for &(medium, len) in extents {
        space[medium] += Magnitude::from(len);
    }
    space
}

#[derive(Debug)]
struct StoredObject {
    direction: Direction,
    extents: Vec<Extent>,
    provisional: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    limits: [Space; 2],
    objects: HashMap<ObjectId, StoredObject>,
}

impl MemoryState {
    fn occupancy(&self, direction: Direction) -> Space {
        let mut space = Space::ZERO;
        for object in self.objects.values() {
            if object.direction == direction {
                let used = aggregate(&object.extents);
                for (medium, amount) in used.iter() {
                    space[medium] += amount;
                }
            }
        }
        space
    }
}

/// A heap that keeps object descriptions in memory.
///
/// Every capacity starts at zero.
#[derive(Debug, Default)]
pub struct MemoryHeap {
    state: Mutex<MemoryState>,
}

impl MemoryHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_max_occupancy(&self, direction: Direction, medium: Medium, max: Magnitude) {
        self.state.lock().expect("poisoned").limits[direction.index()][medium] = max;
    }

    /// Extents of an object, with its provisional flag.
    pub fn object(&self, id: ObjectId) -> Option<(Vec<Extent>, bool)> {
        let state = self.state.lock().expect("poisoned");
        state
            .objects
            .get(&id)
            .map(|object| (object.extents.clone(), object.provisional))
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("poisoned").objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Heap for MemoryHeap {
    fn max_occupancy(&self, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError> {
        Ok(self.state.lock().expect("poisoned").limits[direction.index()][medium])
    }

    fn occupancy(&self, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError> {
        Ok(self.state.lock().expect("poisoned").occupancy(direction)[medium])
    }

    fn aggregate_length(
        &self,
        object: ObjectId,
        offset: u64,
        length: u64,
    ) -> Result<Space, HeapError> {
        let state = self.state.lock().expect("poisoned");
        let stored = state.objects.get(&object).ok_or(HeapError::NotFound(object))?;
        Ok(aggregate(&slice(&stored.extents, offset, length)?))
    }

    fn create_object(&self, object: NewObject) -> Result<ObjectId, HeapError> {
        let mut state = self.state.lock().expect("poisoned");
        let extents = object.source.extents(|id| {
            state
                .objects
                .get(&id)
                .map(|stored| stored.extents.clone())
                .ok_or(HeapError::NotFound(id))
        })?;

        if object.reservation == Reservation::Unreserved {
            let mut available = state.limits[object.direction.index()];
            available -= &state.occupancy(object.direction);
            let needed = aggregate(&extents);
            let short = needed
                .iter()
                .find(|&(medium, amount)| amount > available[medium].or_zero());
            if let Some((medium, _)) = short {
                return Err(HeapError::Insufficient(medium));
            }
        }

        let id = ObjectId::generate();
        log::debug!("{id} created for {} with {extents:?}", object.direction);
        state.objects.insert(
            id,
            StoredObject {
                direction: object.direction,
                extents,
                provisional: object.provisional,
            },
        );
        Ok(id)
    }

    fn destroy_object(&self, object: ObjectId) -> Result<Direction, HeapError> {
        let mut state = self.state.lock().expect("poisoned");
        let stored = state
            .objects
            .remove(&object)
            .ok_or(HeapError::NotFound(object))?;
        log::debug!("{object} destroyed");
        Ok(stored.direction)
    }
}

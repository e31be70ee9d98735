//! Types exchanged between the `zsd` daemon and its clients.
//!
//! Bodies are encoded with `postcard`; magnitudes travel in their packed form.

use crate::{
    heap::{Location, ObjectSource},
    magnitude::Magnitude,
    queue::SlotId,
    requisition::{Direction, Medium, Priority, Space},
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Where the initial extent named in [CreateParams] lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Bulk,
    Heap,
    Object,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("invalid {kind:?} location {location:?}")]
    Location { kind: SourceKind, location: String },
}

/// Form accepted by `POST /{direction}/objects`.
///
/// Without a `medium` the object is created empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateParams {
    #[serde(default)]
    pub medium: Option<SourceKind>,
    /// Numeric handle for the simple media, object id otherwise.
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub coarse: u8,
    #[serde(default)]
    pub fine: u8,
    /// Wait for space instead of giving up.
    #[serde(default)]
    pub wait: bool,
}

impl CreateParams {
    pub fn priority(&self) -> Priority {
        Priority::new(self.coarse, self.fine)
    }

    pub fn source(&self) -> Result<ObjectSource, ParamsError> {
        let Some(kind) = self.medium else {
            return Ok(ObjectSource::empty());
        };

        let invalid = || ParamsError::Location {
            kind,
            location: self.location.clone(),
        };
        let handle = || self.location.parse::<u64>().map_err(|_| invalid());
        let location = match kind {
            SourceKind::File => Location::File(handle()?),
            SourceKind::Bulk => Location::Bulk(handle()?),
            SourceKind::Heap => Location::Heap(handle()?),
            SourceKind::Object => Location::Object(self.location.parse().map_err(|_| invalid())?),
        };
        Ok(ObjectSource::new(location, self.offset, self.length))
    }
}

/// Capacity and occupancy of one medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumUsage {
    pub medium: Medium,
    pub max: Magnitude,
    pub occupancy: Magnitude,
}

/// A queued requisition as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub slot: SlotId,
    pub priority: Priority,
    pub needed: Space,
    pub blocking: bool,
    pub serviced: bool,
}

/// State of one direction's queue, head first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub direction: Direction,
    pub media: Vec<MediumUsage>,
    pub entries: Vec<QueueEntry>,
}

impl Display for QueueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} queued)", self.direction, self.entries.len())?;
        for MediumUsage {
            medium,
            max,
            occupancy,
        } in &self.media
        {
            writeln!(f, "  {medium}: {occupancy}/{max}")?;
        }
        for entry in &self.entries {
            writeln!(
                f,
                "  {} {} {} [{}] {}",
                entry.slot,
                entry.priority,
                if entry.blocking { "blocking" } else { "non-blocking" },
                if entry.serviced { "serviced" } else { "pending" },
                entry.needed,
            )?;
        }
        Ok(())
    }
}

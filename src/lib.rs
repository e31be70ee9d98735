//! Priority-ordered admission control for the storage of a DTN node.
//!
//! Objects are only created once the space they need, on every storage medium at
//! once, has been granted by an [AdmissionController].
//! Quantities are tracked as exact [Magnitude]s and persisted with the [codec].

pub mod api;
pub mod codec;
pub mod controller;
pub mod heap;
pub mod magnitude;
pub mod queue;
pub mod requisition;

pub use controller::{Admission, AdmissionController, Config, Creation, WaitOutcome};
pub use heap::{Heap, Location, MemoryHeap, ObjectId, ObjectSource};
pub use magnitude::Magnitude;
pub use requisition::{Attendant, Direction, Medium, Priority, Space};

//! The Resource Tree and Data Hub facade (spec.md §3, §4.2–§4.5): arena
//! storage, per-resource state, the Observation pipeline, the streaming
//! JSON reader, and `DataHub` tying them all together over `hub-backup`.

pub mod arena;
pub mod hub;
pub mod observation;
pub mod reader;
pub mod resource;
pub mod tree;

pub use arena::EntryId;
pub use hub::{DataHub, PushResult};
pub use observation::{ObsState, RejectReason, Transform, THIRTY_YEARS_SECS};
pub use reader::{ReadOutcome, ReaderStep};
pub use resource::{Entry, HandlerId, ResourceKind};
pub use tree::Tree;

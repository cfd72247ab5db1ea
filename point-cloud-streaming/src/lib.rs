//! Viewport-driven streaming loader for massive point clouds.
//!
//! Loads cloud-optimized (COPC) and directory-tiled (EPT) octree datasets
//! over byte-range sources, maps the current camera viewport to an octree
//! depth, and streams the visible nodes through a prioritized, budgeted,
//! concurrency-limited fetch-and-decode pipeline. Decoded batches arrive as
//! flat attribute arrays with positions stored as precision-preserving
//! offsets from a session origin.
//!
//! The entry point is [`StreamingSession`]: construct it over a
//! [`source::BinaryRangeSource`], `initialize`, register callbacks, then
//! feed it camera updates.

pub mod budget;
pub mod decode;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod schedule;
pub mod select;
pub mod session;
pub mod source;
pub mod viewport;

pub use budget::PointBudgetManager;
pub use decode::{CoordinateOrigin, PointBatch, PointRecordDecoder};
pub use error::{SourceError, StreamError};
pub use events::SessionEvent;
pub use hierarchy::{Aabb, DatasetLayout, HierarchyIndex, NodeDescriptor, NodeKey};
pub use schedule::{FetchScheduler, NodeState};
pub use session::{DatasetSummary, SessionState, StreamConfig, StreamingSession};
pub use source::{BinaryRangeSource, FileRangeSource, HttpRangeSource, MemoryRangeSource};
pub use viewport::{CameraState, ViewportInfo, ViewportTracker};

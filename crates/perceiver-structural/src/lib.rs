//! Accessibility/DOM snapshots across the frame graph of a page.

pub mod api;
pub mod cache;
mod dom;
pub mod errors;
pub mod interactive;
pub mod limits;
pub mod metrics;
pub mod model;
pub mod structural;

pub use api::StructuralPerceiver;
pub use errors::SnapshotError;
pub use interactive::{
    collect_interactive, paginate, ElementFilter, ElementPage, ElementQuery, InteractiveElement,
    Pagination,
};
pub use limits::SnapshotLimits;
pub use model::{AxNode, FrameSnapshot, SkippedFrame, Snapshot, SnapshotId};
pub use structural::{capture, StructuralPerceiverImpl};

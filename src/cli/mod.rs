pub mod cache;
pub mod info;
pub mod output;
pub mod snapshot;

pub use cache::{cmd_cache, CacheArgs};
pub use info::cmd_info;
pub use output::OutputFormat;
pub use snapshot::{cmd_snapshot, SnapshotArgs};

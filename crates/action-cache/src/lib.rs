//! Persisted action sequences keyed by instruction and page.
//!
//! A successful planner run is stored as JSON under a hash of the instruction, the page URL
//! and the variable names. Repeating the instruction replays the stored steps without the
//! planner, and a step whose selector stopped resolving can be re-resolved and written back.

pub mod api;
pub mod errors;
pub mod executor;
pub mod fs;
pub mod hash;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod store;

pub use api::{ActCache, ActionExecutor, ActionPlanner};
pub use errors::CacheError;
pub use executor::PageActionExecutor;
pub use hash::cache_key;
pub use model::{
    ActRequest, ActResult, CacheEntry, CacheListing, CacheStatus, CachedAction, PlannedRun,
    CACHE_VERSION,
};
pub use policy::CachePolicy;
pub use store::{CacheStore, FileCacheStore};

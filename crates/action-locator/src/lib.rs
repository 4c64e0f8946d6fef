//! Selector resolution for pagewright.
//!
//! This crate turns selector strings into elements across a page's frame graph:
//! - CSS, XPath and `text=` selectors, with `>>` hops into child frames
//! - transparent shadow DOM piercing, including closed roots recorded by an init script
//! - innermost-only matching for text selectors
//! - `nth`/`first`/`last`/`count`/`all` multiplicity, scoped to a single frame
//! - polling waits for attached/visible/hidden/detached states

pub mod errors;
pub mod handle;
pub mod locator;
pub mod piercer;
pub(crate) mod scripts;
pub mod selector;
pub mod types;
pub mod wait;

pub use errors::*;
pub use handle::{frame_offset, ElementHandle};
pub use locator::Locator;
pub use piercer::install_piercer;
pub use scripts::SHADOW_PIERCER_SCRIPT;
pub use selector::{Selector, SelectorKind, SelectorPart};
pub use types::*;
pub use wait::wait_for_selector;

//! Action execution for Pagewright
//!
//! This crate turns resolved elements or raw coordinates into low-level input events:
//! - 6 core primitives: click, hover, type_text, press, scroll, drag_and_drop
//! - `{Key}` / `{Modifier+Key}` grammar for special keys and chords
//! - Typing strategy selection (direct assignment, progressive chunks, key simulation)
//! - Screenshot masking with scoped overlay cleanup

pub mod errors;
mod input;
pub mod keys;
pub mod mask;
mod primitives;
mod scripts;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use errors::*;
pub use keys::{parse_keys, KeyChord, KeyDef, KeyToken, Modifiers};
pub use mask::{screenshot_with_masks, MaskGuard};
pub use primitives::*;
pub use types::*;

//! Layer-stack compositing for bitmap painting.
//!
//! A [`LayerStack`] owns an ordered set of layers (index 0 is the
//! bottom-most), a composited result buffer, and a tile journal for
//! undo/redo. It handles:
//! - layer CRUD (add, delete, merge down, duplicate)
//! - compositing visible image layers into the result, whole-stack or
//!   restricted to a rectangle
//! - previewing and committing in-progress paint strokes through a
//!   scratch buffer, with alpha-locked layers forced to
//!   destination-alpha-preserving blending
//! - journaling stroke tiles and replaying them backward and forward

pub mod layer;
pub mod stack;

pub use layer::{FolderLayer, ImageLayer, Layer, LayerKind};
pub use stack::{alpha_mode_for, LayerStack};

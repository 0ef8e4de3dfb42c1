//! Tile-granular undo/redo journal.
//!
//! Paint strokes are journaled as the set of pixel tiles they touch, not as
//! whole-layer snapshots. Tiles are appended to two on-disk binary streams
//! (one for undo state, one for redo state) while record boundaries and
//! per-record tile counts are tracked in memory only. The log is a
//! process-lifetime structure and is not meant to survive a restart.

pub mod format;
pub mod journal;

pub use format::TileEntry;
pub use journal::{JournalConfig, TileJournal, UndoStep};

//! The tile journal: record lifecycle, cursors, and file I/O.

use crate::format::TileEntry;
use common::error::PaintResult;
use common::geometry::Rect;
use common::id::LayerId;
use raster::PixelBuffer;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Locations of the two journal streams.
///
/// Each open document gets its own config; sharing paths between two live
/// journals corrupts both.
#[derive(Clone, Debug)]
pub struct JournalConfig {
    pub undo_path: PathBuf,
    pub redo_path: PathBuf,
}

impl JournalConfig {
    /// The conventional `undos.save` / `redos.save` pair inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            undo_path: dir.join("undos.save"),
            redo_path: dir.join("redos.save"),
        }
    }
}

/// One undo step read back from the journal.
pub struct UndoStep {
    /// Tiles to restore, in the order they were recorded.
    pub entries: Vec<TileEntry>,
    /// True when this record's redo state has not been captured yet; the
    /// caller must snapshot each affected tile's current pixels via
    /// [`TileJournal::stage_redo_tile`] before overwriting it, then call
    /// [`TileJournal::finish_undo`].
    pub capture_redo: bool,
}

/// Append-only, tile-granular undo/redo log.
///
/// A record is the set of tiles staged between [`begin_record`] and
/// [`end_record`]. Records are indexed by the in-memory `positions` /
/// `undo_counts` / `redo_counts` arrays (parallel, always at least one
/// sentinel slot); `cursor` points at the slot the next record would
/// occupy, so `cursor - 1` is the most recent record available to undo.
///
/// [`begin_record`]: TileJournal::begin_record
/// [`end_record`]: TileJournal::end_record
pub struct TileJournal {
    config: JournalConfig,
    /// Byte offset of each record in the undo file (the redo file reuses
    /// the same offsets, since a record's redo tiles mirror its undo tiles
    /// byte for byte).
    positions: Vec<u64>,
    /// Tiles per record in the undo file.
    undo_counts: Vec<u32>,
    /// Tiles per record in the redo file; zero until first captured.
    redo_counts: Vec<u32>,
    cursor: usize,
    staging: Vec<u8>,
    redo_staging: Vec<u8>,
    redo_staged: u32,
    capturing_redo: bool,
}

impl TileJournal {
    pub fn new(config: JournalConfig) -> Self {
        Self {
            config,
            positions: vec![0],
            undo_counts: vec![0],
            redo_counts: vec![0],
            cursor: 0,
            staging: Vec::new(),
            redo_staging: Vec::new(),
            redo_staged: 0,
            capturing_redo: false,
        }
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Number of records currently in history.
    pub fn record_count(&self) -> usize {
        self.positions.len() - 1
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.positions.len() && self.redo_counts[self.cursor] > 0
    }

    /// Drop all history and delete both backing files. Deletion is best
    /// effort: a missing file is fine and a real failure only logs.
    pub fn clear(&mut self) {
        for path in [&self.config.undo_path, &self.config.redo_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete journal file"),
            }
        }
        self.positions = vec![0];
        self.undo_counts = vec![0];
        self.redo_counts = vec![0];
        self.cursor = 0;
        self.staging.clear();
        self.redo_staging.clear();
        self.redo_staged = 0;
        self.capturing_redo = false;
    }

    /// Open a new record.
    ///
    /// At the bottom of history this starts the log over from scratch.
    /// After one or more undos it discards the redo branch: everything
    /// beyond the cursor is dropped, so the discarded strokes can no
    /// longer be redone.
    pub fn begin_record(&mut self) {
        self.staging.clear();
        if self.cursor == 0 {
            self.clear();
        } else if self.cursor + 1 < self.positions.len() {
            self.positions.truncate(self.cursor + 1);
            self.undo_counts.truncate(self.cursor + 1);
            self.redo_counts.truncate(self.cursor + 1);
            self.undo_counts[self.cursor] = 0;
            self.redo_counts[self.cursor] = 0;
            debug!(records = self.record_count(), "discarded redo branch");
        }
    }

    /// Stage the current pixels of one tile of `source` into the open
    /// record. Called before the tile is mutated, so the record holds the
    /// pre-stroke state.
    pub fn stage_tile(
        &mut self,
        layer: LayerId,
        tile_x: u8,
        tile_y: u8,
        tile_width: u32,
        tile_height: u32,
        source: &PixelBuffer,
    ) {
        let Some(entry) = read_tile(layer, tile_x, tile_y, tile_width, tile_height, source) else {
            debug!(%layer, tile_x, tile_y, "tile outside layer bounds, not staged");
            return;
        };
        entry.encode_into(&mut self.staging);
        self.undo_counts[self.cursor] += 1;
    }

    /// Close the open record and flush it to the undo file. A record with
    /// zero staged tiles writes nothing and does not advance the cursor.
    pub fn end_record(&mut self) -> PaintResult<()> {
        if self.undo_counts[self.cursor] == 0 {
            return Ok(());
        }
        let position = self.positions[self.cursor];
        if let Err(e) = write_at(&self.config.undo_path, position, &self.staging) {
            self.undo_counts[self.cursor] = 0;
            self.staging.clear();
            return Err(e.into());
        }
        self.positions.push(position + self.staging.len() as u64);
        self.undo_counts.push(0);
        self.redo_counts.push(0);
        self.cursor += 1;
        self.staging.clear();
        debug!(record = self.cursor - 1, "undo record flushed");
        Ok(())
    }

    /// Step the cursor back one record and read its tiles from the undo
    /// file. Returns `None` at the bottom of history. The cursor only
    /// moves when the read succeeds.
    pub fn begin_undo(&mut self) -> PaintResult<Option<UndoStep>> {
        if self.cursor == 0 {
            return Ok(None);
        }
        let target = self.cursor - 1;
        let entries = self.read_record(
            &self.config.undo_path,
            self.positions[target],
            self.undo_counts[target],
        )?;
        self.cursor = target;
        let capture_redo = self.redo_counts[target] == 0;
        self.redo_staging.clear();
        self.redo_staged = 0;
        self.capturing_redo = capture_redo;
        Ok(Some(UndoStep {
            entries,
            capture_redo,
        }))
    }

    /// Snapshot one tile's current (pre-undo) pixels so the in-flight undo
    /// step can be redone later. Only meaningful between a
    /// [`begin_undo`] that requested redo capture and [`finish_undo`].
    ///
    /// [`begin_undo`]: TileJournal::begin_undo
    /// [`finish_undo`]: TileJournal::finish_undo
    pub fn stage_redo_tile(
        &mut self,
        layer: LayerId,
        tile_x: u8,
        tile_y: u8,
        tile_width: u32,
        tile_height: u32,
        source: &PixelBuffer,
    ) {
        if !self.capturing_redo {
            debug!(%layer, "redo tile staged outside a capture window, ignored");
            return;
        }
        let Some(entry) = read_tile(layer, tile_x, tile_y, tile_width, tile_height, source) else {
            return;
        };
        entry.encode_into(&mut self.redo_staging);
        self.redo_staged += 1;
    }

    /// Flush any redo tiles captured during the current undo step. The
    /// redo file is written at the record's own offset rather than
    /// appended, because undo steps arrive in reverse record order.
    pub fn finish_undo(&mut self) -> PaintResult<()> {
        if !self.capturing_redo {
            return Ok(());
        }
        self.capturing_redo = false;
        if self.redo_staged == 0 {
            return Ok(());
        }
        write_at(
            &self.config.redo_path,
            self.positions[self.cursor],
            &self.redo_staging,
        )?;
        self.redo_counts[self.cursor] = self.redo_staged;
        self.redo_staging.clear();
        self.redo_staged = 0;
        Ok(())
    }

    /// Read the tiles needed to re-apply the record at the cursor and step
    /// the cursor forward. Returns `None` when there is nothing to redo.
    pub fn begin_redo(&mut self) -> PaintResult<Option<Vec<TileEntry>>> {
        if !self.can_redo() {
            return Ok(None);
        }
        let entries = self.read_record(
            &self.config.redo_path,
            self.positions[self.cursor],
            self.redo_counts[self.cursor],
        )?;
        self.cursor += 1;
        Ok(Some(entries))
    }

    fn read_record(&self, path: &Path, position: u64, count: u32) -> PaintResult<Vec<TileEntry>> {
        let data = fs::read(path)?;
        let mut offset = position as usize;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (entry, next) = TileEntry::decode(&data, offset)?;
            entries.push(entry);
            offset = next;
        }
        Ok(entries)
    }
}

/// Read one tile's pixels out of `source`, clamped to its bounds. `None`
/// when the tile lies entirely outside the buffer.
fn read_tile(
    layer: LayerId,
    tile_x: u8,
    tile_y: u8,
    tile_width: u32,
    tile_height: u32,
    source: &PixelBuffer,
) -> Option<TileEntry> {
    let nominal = Rect::new(
        tile_x as u32 * tile_width,
        tile_y as u32 * tile_height,
        tile_width,
        tile_height,
    );
    let clamped = nominal.intersection(&source.bounds())?;
    Some(TileEntry {
        layer,
        tile_x,
        tile_y,
        width: tile_width,
        height: tile_height,
        pixels: source.read_rect(clamped),
    })
}

fn write_at(path: &Path, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

impl std::fmt::Debug for TileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileJournal")
            .field("records", &self.record_count())
            .field("cursor", &self.cursor)
            .field("undo_path", &self.config.undo_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::color::Color;
    use tempfile::TempDir;

    const TILE: u32 = 8;

    fn journal_in(dir: &TempDir) -> TileJournal {
        TileJournal::new(JournalConfig::in_dir(dir.path()))
    }

    fn buffer_filled(color: Color) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(16, 16);
        buffer.fill(color);
        buffer
    }

    fn record_one_tile(journal: &mut TileJournal, layer: LayerId, source: &PixelBuffer) {
        journal.begin_record();
        journal.stage_tile(layer, 0, 0, TILE, TILE, source);
        journal.end_record().unwrap();
    }

    #[test]
    fn test_empty_record_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);

        journal.begin_record();
        journal.end_record().unwrap();

        assert_eq!(journal.record_count(), 0);
        assert!(!journal.can_undo());
        assert!(!journal.config().undo_path.exists());
    }

    #[test]
    fn test_record_and_undo_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(1);

        let before = buffer_filled(Color::RED);
        record_one_tile(&mut journal, layer, &before);
        assert_eq!(journal.record_count(), 1);
        assert!(journal.can_undo());

        let step = journal.begin_undo().unwrap().unwrap();
        assert!(step.capture_redo);
        assert_eq!(step.entries.len(), 1);
        assert_eq!(step.entries[0].layer, layer);
        assert_eq!(step.entries[0].pixels, before.read_rect(Rect::new(0, 0, TILE, TILE)));

        // The caller snapshots the post-stroke pixels before overwriting.
        let after = buffer_filled(Color::BLUE);
        journal.stage_redo_tile(layer, 0, 0, TILE, TILE, &after);
        journal.finish_undo().unwrap();

        assert!(!journal.can_undo());
        assert!(journal.can_redo());

        let entries = journal.begin_redo().unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pixels, after.read_rect(Rect::new(0, 0, TILE, TILE)));
        assert!(journal.can_undo());
        assert!(!journal.can_redo());
    }

    #[test]
    fn test_records_append_back_to_back() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(1);
        let source = buffer_filled(Color::GREEN);

        record_one_tile(&mut journal, layer, &source);
        let first_len = fs::metadata(&journal.config().undo_path).unwrap().len();

        record_one_tile(&mut journal, layer, &source);
        let second_len = fs::metadata(&journal.config().undo_path).unwrap().len();

        assert_eq!(second_len, first_len * 2);
        assert_eq!(journal.record_count(), 2);
    }

    #[test]
    fn test_new_record_after_undo_discards_redo_branch() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(1);

        for _ in 0..3 {
            record_one_tile(&mut journal, layer, &buffer_filled(Color::RED));
        }
        assert_eq!(journal.record_count(), 3);

        // Undo two records, capturing redo state for both.
        for _ in 0..2 {
            let step = journal.begin_undo().unwrap().unwrap();
            assert!(step.capture_redo);
            journal.stage_redo_tile(layer, 0, 0, TILE, TILE, &buffer_filled(Color::BLUE));
            journal.finish_undo().unwrap();
        }
        assert!(journal.can_redo());

        // A new stroke at this point discards the undone branch.
        record_one_tile(&mut journal, layer, &buffer_filled(Color::WHITE));
        assert_eq!(journal.record_count(), 2);
        assert!(!journal.can_redo());
        assert!(journal.begin_redo().unwrap().is_none());
    }

    #[test]
    fn test_record_at_bottom_of_history_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(1);

        record_one_tile(&mut journal, layer, &buffer_filled(Color::RED));
        let step = journal.begin_undo().unwrap().unwrap();
        assert_eq!(step.entries.len(), 1);
        journal.stage_redo_tile(layer, 0, 0, TILE, TILE, &buffer_filled(Color::BLUE));
        journal.finish_undo().unwrap();

        // Back at the bottom; a new record wipes everything, including the
        // captured redo state.
        record_one_tile(&mut journal, layer, &buffer_filled(Color::GREEN));
        assert_eq!(journal.record_count(), 1);
        assert!(!journal.can_redo());
    }

    #[test]
    fn test_undo_at_bottom_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        assert!(journal.begin_undo().unwrap().is_none());
    }

    #[test]
    fn test_redo_capture_happens_once() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(1);

        record_one_tile(&mut journal, layer, &buffer_filled(Color::RED));

        let step = journal.begin_undo().unwrap().unwrap();
        assert!(step.capture_redo);
        journal.stage_redo_tile(layer, 0, 0, TILE, TILE, &buffer_filled(Color::BLUE));
        journal.finish_undo().unwrap();

        journal.begin_redo().unwrap().unwrap();

        // Undoing the same record again finds its redo state already
        // captured.
        let step = journal.begin_undo().unwrap().unwrap();
        assert!(!step.capture_redo);
        journal.finish_undo().unwrap();
    }

    #[test]
    fn test_clear_removes_files_and_history() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(1);

        record_one_tile(&mut journal, layer, &buffer_filled(Color::RED));
        assert!(journal.config().undo_path.exists());

        journal.clear();
        assert_eq!(journal.record_count(), 0);
        assert!(!journal.can_undo());
        assert!(!journal.config().undo_path.exists());

        // Clearing an already-clean journal is fine.
        journal.clear();
    }

    #[test]
    fn test_multi_tile_record_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut journal = journal_in(&dir);
        let layer = LayerId::from_raw(4);
        let source = buffer_filled(Color::RED);

        journal.begin_record();
        journal.stage_tile(layer, 0, 0, TILE, TILE, &source);
        journal.stage_tile(layer, 1, 0, TILE, TILE, &source);
        journal.stage_tile(layer, 1, 1, TILE, TILE, &source);
        journal.end_record().unwrap();

        let step = journal.begin_undo().unwrap().unwrap();
        let coords: Vec<(u8, u8)> = step.entries.iter().map(|e| (e.tile_x, e.tile_y)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0), (1, 1)]);
    }
}

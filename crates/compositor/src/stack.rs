//! The layer stack: ordering, compositing, stroke preview, and undo
//! orchestration.

use crate::layer::{FolderLayer, ImageLayer, Layer};
use common::color::Color;
use common::error::{PaintError, PaintResult};
use common::geometry::Rect;
use common::id::LayerId;
use journal::{JournalConfig, TileJournal};
use raster::{AlphaMode, BlendMode, BlendOptions, PixelBuffer, Workers};
use tracing::{debug, warn};

/// Alpha-locked layers paint with [`AlphaMode::Back`] so a stroke can
/// never change their coverage; unlocked layers use the requested mode.
/// Shared by the stroke preview and commit paths.
pub fn alpha_mode_for(alpha_locked: bool, requested: AlphaMode) -> AlphaMode {
    if alpha_locked {
        AlphaMode::Back
    } else {
        requested
    }
}

/// Parameters of an in-progress stroke being composited through the
/// scratch buffer.
struct StrokeInput<'a> {
    delta: &'a PixelBuffer,
    opacity: f32,
    mode: BlendMode,
    alpha_mode: AlphaMode,
}

/// An ordered stack of layers composited into a result buffer.
///
/// Index 0 is the bottom-most layer. The stack owns a scratch buffer used
/// to preview in-progress strokes without committing them, and a
/// [`TileJournal`] recording the tiles each stroke touches.
///
/// All operations are single-writer: the stack is driven from one thread,
/// and the rect-scoped composite variants used while a stroke is active
/// pin the blend work to that thread ([`Workers::Serial`]) so partial
/// recomposites never race the stroke's own tile writers.
pub struct LayerStack {
    width: u32,
    height: u32,
    layers: Vec<Layer>,
    result: PixelBuffer,
    temp: PixelBuffer,
    current: usize,
    next_id: u64,
    journal: TileJournal,
    damage: Option<Rect>,
}

impl LayerStack {
    /// Create a stack with one blank default layer.
    pub fn new(width: u32, height: u32, journal: JournalConfig) -> PaintResult<Self> {
        let mut stack = Self::empty(width, height, journal)?;
        stack.add_layer(None);
        stack.compute_result_block();
        Ok(stack)
    }

    /// Create a stack at `source`'s dimensions with the first layer
    /// deep-copied from it.
    pub fn from_buffer(source: &PixelBuffer, journal: JournalConfig) -> PaintResult<Self> {
        let mut stack = Self::empty(source.width(), source.height(), journal)?;
        stack.add_layer_from_buffer(source, None, None);
        stack.compute_result_block();
        Ok(stack)
    }

    fn empty(width: u32, height: u32, journal: JournalConfig) -> PaintResult<Self> {
        if width == 0 || height == 0 {
            return Err(PaintError::invalid(format!(
                "layer stack dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            layers: Vec::new(),
            result: PixelBuffer::new(width, height),
            temp: PixelBuffer::new(width, height),
            current: 0,
            next_id: 0,
            journal: TileJournal::new(journal),
            damage: None,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    /// The composited result, valid as of the last compute call.
    pub fn result(&self) -> &PixelBuffer {
        &self.result
    }

    /// Layers in stacking order, bottom first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn journal(&self) -> &TileJournal {
        &self.journal
    }

    /// Find a layer by id, descending into folders.
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        find_layer(&self.layers, id)
    }

    /// Mutable lookup by id, descending into folders.
    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        find_layer_mut(&mut self.layers, id)
    }

    fn alloc_id(&mut self) -> LayerId {
        self.next_id += 1;
        LayerId::from_raw(self.next_id)
    }

    fn insert_layer(&mut self, layer: Layer, at: Option<usize>) {
        match at {
            Some(index) if index < self.layers.len() => self.layers.insert(index, layer),
            _ => self.layers.push(layer),
        }
    }

    /// Add a blank stack-sized image layer named `"Layer <N>"`, N being the
    /// current top-level layer count. Inserted at `at` when in range,
    /// appended otherwise.
    pub fn add_layer(&mut self, at: Option<usize>) -> LayerId {
        let name = format!("Layer {}", self.layers.len());
        let id = self.alloc_id();
        debug!(%id, %name, "adding layer");
        self.insert_layer(
            Layer::Image(ImageLayer::new(id, name, self.width, self.height)),
            at,
        );
        id
    }

    /// Add an image layer whose content is deep-copied from `source`,
    /// resampled to the stack dimensions when they differ.
    pub fn add_layer_from_buffer(
        &mut self,
        source: &PixelBuffer,
        name: Option<&str>,
        at: Option<usize>,
    ) -> LayerId {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("Layer {}", self.layers.len()),
        };
        let buffer = source.resized(self.width, self.height);
        let id = self.alloc_id();
        debug!(%id, %name, "adding layer from buffer");
        self.insert_layer(Layer::Image(ImageLayer::from_buffer(id, name, buffer)), at);
        id
    }

    /// Add an empty folder layer.
    pub fn add_folder(&mut self, name: impl Into<String>, at: Option<usize>) -> LayerId {
        let id = self.alloc_id();
        self.insert_layer(Layer::Folder(FolderLayer::new(id, name)), at);
        id
    }

    fn remove_layer_at(&mut self, index: usize) -> Layer {
        let removed = self.layers.remove(index);
        if index == 0 {
            self.current = 0;
        } else {
            self.current = self.current.saturating_sub(1);
        }
        removed
    }

    /// Remove the layer at `index`. Out-of-range indices are ignored.
    ///
    /// Deleting the last remaining layer is permitted here; keeping at
    /// least one layer alive is a UI-side rule.
    pub fn delete_layer(&mut self, index: usize) {
        if index >= self.layers.len() {
            return;
        }
        let removed = self.remove_layer_at(index);
        debug!(id = %removed.id(), name = removed.name(), "deleted layer");
        self.compute_result_block();
    }

    /// Remove the top-level layer with the given id. Unknown ids are
    /// ignored.
    pub fn delete_layer_by_id(&mut self, id: LayerId) {
        if let Some(index) = self.layers.iter().position(|layer| layer.id() == id) {
            self.delete_layer(index);
        }
    }

    /// Blend the named layer onto the image layer directly below it at
    /// full opacity with its own blend mode, then delete it. No-op unless
    /// both layers are top-level image layers.
    pub fn merge_down(&mut self, id: LayerId) {
        let Some(index) = self.layers.iter().position(|layer| layer.id() == id) else {
            return;
        };
        if index == 0 {
            return;
        }
        let rect = self.bounds();
        let (below_layers, top_layers) = self.layers.split_at_mut(index);
        let Some(Layer::Image(top)) = top_layers.first() else {
            return;
        };
        let Some(Layer::Image(below)) = below_layers.last_mut() else {
            return;
        };
        let options = BlendOptions {
            mode: top.blend_mode(),
            alpha_mode: AlphaMode::Normal,
            opacity: 1.0,
            workers: Workers::Default,
        };
        below.buffer_mut().blend_rect(top.buffer(), rect, &options);
        let removed = self.remove_layer_at(index);
        debug!(id = %removed.id(), "merged layer down");
        self.compute_result_block();
    }

    /// Insert a copy of the named image layer directly above it, named
    /// `"<original>_Copy"`, with the visual properties copied and the
    /// pixel buffer deep-copied. No-op for folders and unknown ids.
    pub fn duplicate(&mut self, id: LayerId) {
        let Some(index) = self.layers.iter().position(|layer| layer.id() == id) else {
            return;
        };
        let Some(original) = self.layers[index].as_image() else {
            return;
        };
        let name = format!("{}_Copy", original.name());
        let buffer = original.buffer().clone();
        let new_id = self.alloc_id();
        let mut copy = ImageLayer::from_buffer(new_id, name, buffer);
        if let Some(original) = self.layers[index].as_image() {
            copy.copy_properties_from(original);
        }
        self.layers.insert(index + 1, Layer::Image(copy));
        debug!(original = %id, copy = %new_id, "duplicated layer");
        self.compute_result_block();
    }

    pub fn current_layer_index(&self) -> usize {
        self.current
    }

    /// Select the active layer for drawing. Out-of-range indices are
    /// silently ignored.
    pub fn set_current_layer_index(&mut self, index: usize) {
        if index < self.layers.len() {
            self.current = index;
        }
    }

    pub fn current_layer(&self) -> Option<&Layer> {
        self.layers.get(self.current)
    }

    pub fn current_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.current)
    }

    /// Clear the current layer to transparent. Image layers only.
    pub fn clear_current_layer(&mut self) {
        let Some(layer) = self.layers.get_mut(self.current).and_then(Layer::as_image_mut) else {
            return;
        };
        layer.buffer_mut().clear();
        self.compute_result_block();
    }

    /// Fill the current layer with a color. Image layers only.
    pub fn fill_current_layer(&mut self, color: Color) {
        let Some(layer) = self.layers.get_mut(self.current).and_then(Layer::as_image_mut) else {
            return;
        };
        layer.buffer_mut().fill(color);
        self.compute_result_block();
    }

    /// Recomposite the whole stack into the result buffer.
    ///
    /// Clears the result, then blends every visible image layer bottom to
    /// top with its own blend mode and opacity. Folders and hidden layers
    /// are skipped.
    pub fn compute_result_block(&mut self) {
        self.composite_rect(self.bounds(), Workers::Default, None);
    }

    /// Recomposite only `rect`. Used for incremental redraw while
    /// painting, so the blend work stays on the calling thread.
    pub fn compute_result_block_rect(&mut self, rect: Rect) {
        self.composite_rect(rect, Workers::Serial, None);
    }

    /// Recomposite `rect` with the in-progress stroke `delta` previewed on
    /// top of the current layer, without committing it.
    ///
    /// The current layer's committed pixels are copied into the scratch
    /// buffer, `delta` is blended onto the scratch with the stroke's
    /// mode/opacity (alpha mode forced to [`AlphaMode::Back`] when the
    /// layer is alpha-locked), and the scratch stands in for the layer in
    /// the composite.
    pub fn preview_stroke(
        &mut self,
        rect: Rect,
        delta: &PixelBuffer,
        opacity: f32,
        mode: BlendMode,
        alpha_mode: AlphaMode,
    ) {
        self.composite_rect(
            rect,
            Workers::Serial,
            Some(&StrokeInput {
                delta,
                opacity,
                mode,
                alpha_mode,
            }),
        );
    }

    /// Commit the stroke `delta` to the current layer's real buffer (same
    /// alpha-lock handling as the preview), then recomposite `rect`.
    pub fn commit_stroke(
        &mut self,
        rect: Rect,
        delta: &PixelBuffer,
        opacity: f32,
        mode: BlendMode,
        alpha_mode: AlphaMode,
    ) {
        let current = self.current;
        let Some(layer) = self.layers.get_mut(current).and_then(Layer::as_image_mut) else {
            return;
        };
        let options = BlendOptions {
            mode,
            alpha_mode: alpha_mode_for(layer.is_alpha_locked(), alpha_mode),
            opacity,
            workers: Workers::Serial,
        };
        layer.buffer_mut().blend_rect(delta, rect, &options);
        self.compute_result_block_rect(rect);
    }

    fn composite_rect(&mut self, rect: Rect, workers: Workers, stroke: Option<&StrokeInput<'_>>) {
        let Some(rect) = rect.intersection(&self.bounds()) else {
            return;
        };
        self.result.clear_rect(rect);
        for index in 0..self.layers.len() {
            let Some(layer) = self.layers[index].as_image() else {
                continue;
            };
            if !layer.is_visible() {
                continue;
            }
            let layer_options = BlendOptions {
                mode: layer.blend_mode(),
                alpha_mode: AlphaMode::Normal,
                opacity: layer.opacity(),
                workers,
            };
            match stroke {
                Some(stroke) if index == self.current => {
                    let stroke_options = BlendOptions {
                        mode: stroke.mode,
                        alpha_mode: alpha_mode_for(layer.is_alpha_locked(), stroke.alpha_mode),
                        opacity: stroke.opacity,
                        workers,
                    };
                    self.temp.copy_rect_from(layer.buffer(), rect);
                    self.temp.blend_rect(stroke.delta, rect, &stroke_options);
                    self.result.blend_rect(&self.temp, rect, &layer_options);
                }
                _ => {
                    self.result.blend_rect(layer.buffer(), rect, &layer_options);
                }
            }
        }
        self.add_damage(rect);
    }

    /// The canonical ordered blend-mode display names, index-correlated
    /// with [`BlendMode::ALL`].
    pub fn blending_mode_names() -> &'static [&'static str] {
        BlendMode::names()
    }

    fn add_damage(&mut self, rect: Rect) {
        self.damage = Some(match self.damage {
            Some(damage) => damage.union(&rect),
            None => rect,
        });
    }

    /// Take the accumulated result-buffer damage since the last call.
    /// Downstream consumers use this to scope texture re-uploads.
    pub fn take_damage(&mut self) -> Option<Rect> {
        self.damage.take()
    }

    // Undo/redo wiring. Strokes journal the tiles they are about to touch
    // (`begin_record` / `save_tile` / `end_record`); `undo` and `redo`
    // replay them.

    /// Open an undo record for the stroke about to start.
    pub fn begin_record(&mut self) {
        self.journal.begin_record();
    }

    /// Journal the current layer's pixels for one tile, before the stroke
    /// mutates it. `tile_x`/`tile_y` index a grid of
    /// `tile_width` x `tile_height` tiles over the layer.
    pub fn save_tile(&mut self, tile_x: u8, tile_y: u8, tile_width: u32, tile_height: u32) {
        let Some(layer) = self.layers.get(self.current).and_then(Layer::as_image) else {
            debug!("save_tile with no current image layer, ignored");
            return;
        };
        self.journal.stage_tile(
            layer.id(),
            tile_x,
            tile_y,
            tile_width,
            tile_height,
            layer.buffer(),
        );
    }

    /// Close and flush the undo record opened by [`begin_record`]. A
    /// stroke that staged no tiles leaves no record.
    ///
    /// [`begin_record`]: LayerStack::begin_record
    pub fn end_record(&mut self) -> PaintResult<()> {
        self.journal.end_record()
    }

    /// Step one record backward: restore every journaled tile of that
    /// record and recomposite the affected rects. Returns `false` when
    /// there is nothing to undo or a tile references a layer that no
    /// longer exists.
    pub fn undo(&mut self) -> bool {
        let step = match self.journal.begin_undo() {
            Ok(Some(step)) => step,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "undo failed to read journal");
                return false;
            }
        };
        let bounds = self.bounds();
        let mut dirty = Vec::with_capacity(step.entries.len());
        for entry in &step.entries {
            let Some(layer) = find_image_mut(&mut self.layers, entry.layer) else {
                warn!(layer = %entry.layer, "undo tile references a layer no longer in the stack");
                return false;
            };
            if step.capture_redo {
                self.journal.stage_redo_tile(
                    entry.layer,
                    entry.tile_x,
                    entry.tile_y,
                    entry.width,
                    entry.height,
                    layer.buffer(),
                );
            }
            let Some(rect) = entry.target_rect().intersection(&bounds) else {
                continue;
            };
            if let Err(e) = layer.buffer_mut().write_rect(rect, &entry.pixels) {
                warn!(error = %e, "undo tile could not be applied");
                return false;
            }
            dirty.push(rect);
        }
        if let Err(e) = self.journal.finish_undo() {
            warn!(error = %e, "failed to flush captured redo state");
        }
        for rect in dirty {
            self.compute_result_block_rect(rect);
        }
        true
    }

    /// Step one record forward again: re-apply the redo tiles captured
    /// when the record was undone. Returns `false` when there is nothing
    /// to redo or a tile references a layer that no longer exists.
    pub fn redo(&mut self) -> bool {
        let entries = match self.journal.begin_redo() {
            Ok(Some(entries)) => entries,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "redo failed to read journal");
                return false;
            }
        };
        let bounds = self.bounds();
        let mut dirty = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(layer) = find_image_mut(&mut self.layers, entry.layer) else {
                warn!(layer = %entry.layer, "redo tile references a layer no longer in the stack");
                return false;
            };
            let Some(rect) = entry.target_rect().intersection(&bounds) else {
                continue;
            };
            if let Err(e) = layer.buffer_mut().write_rect(rect, &entry.pixels) {
                warn!(error = %e, "redo tile could not be applied");
                return false;
            }
            dirty.push(rect);
        }
        for rect in dirty {
            self.compute_result_block_rect(rect);
        }
        true
    }

    /// Drop all undo/redo history and delete the journal files.
    pub fn clear_history(&mut self) {
        self.journal.clear();
    }
}

impl std::fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerStack")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layers", &self.layers.len())
            .field("current", &self.current)
            .finish()
    }
}

fn find_layer(layers: &[Layer], id: LayerId) -> Option<&Layer> {
    for layer in layers {
        if layer.id() == id {
            return Some(layer);
        }
        if let Layer::Folder(folder) = layer {
            if let Some(found) = find_layer(folder.children(), id) {
                return Some(found);
            }
        }
    }
    None
}

fn find_layer_mut(layers: &mut [Layer], id: LayerId) -> Option<&mut Layer> {
    for layer in layers {
        if layer.id() == id {
            return Some(layer);
        }
        if let Layer::Folder(folder) = layer {
            if let Some(found) = find_layer_mut(folder.children_mut(), id) {
                return Some(found);
            }
        }
    }
    None
}

fn find_image_mut(layers: &mut [Layer], id: LayerId) -> Option<&mut ImageLayer> {
    match find_layer_mut(layers, id) {
        Some(Layer::Image(layer)) => Some(layer),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stack(width: u32, height: u32) -> (LayerStack, TempDir) {
        let dir = TempDir::new().unwrap();
        let stack = LayerStack::new(width, height, JournalConfig::in_dir(dir.path())).unwrap();
        (stack, dir)
    }

    fn current_image(stack: &mut LayerStack) -> &mut ImageLayer {
        stack.current_layer_mut().and_then(Layer::as_image_mut).unwrap()
    }

    #[test]
    fn test_new_stack_has_default_layer() {
        let (stack, _dir) = stack(64, 64);
        assert_eq!(stack.layer_count(), 1);
        assert_eq!(stack.layers()[0].name(), "Layer 0");
        assert_eq!(stack.current_layer_index(), 0);
    }

    #[test]
    fn test_zero_sized_stack_rejected() {
        let dir = TempDir::new().unwrap();
        let result = LayerStack::new(0, 64, JournalConfig::in_dir(dir.path()));
        assert!(matches!(result, Err(PaintError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_buffer_copies_source() {
        let dir = TempDir::new().unwrap();
        let mut source = PixelBuffer::new(8, 8);
        source.fill(Color::GREEN);

        let stack = LayerStack::from_buffer(&source, JournalConfig::in_dir(dir.path())).unwrap();
        assert_eq!(stack.width(), 8);
        assert_eq!(stack.layer_count(), 1);
        assert_eq!(stack.result().get_pixel(4, 4), Color::GREEN);
    }

    #[test]
    fn test_fill_then_half_opacity_blue_over_red() {
        let (mut stack, _dir) = stack(64, 64);

        stack.fill_current_layer(Color::RED);
        assert_eq!(stack.result().get_pixel(0, 0), Color::RED);
        assert_eq!(stack.result().get_pixel(63, 63), Color::RED);

        let id = stack.add_layer(None);
        stack.set_current_layer_index(1);
        if let Some(Layer::Image(layer)) = stack.layer_mut(id) {
            layer.set_opacity(0.5);
            layer.set_blend_mode(BlendMode::Normal);
        }
        stack.fill_current_layer(Color::BLUE);

        // 50% blue over opaque red averages the channels (127.5 rounds up).
        assert_eq!(stack.result().get_pixel(32, 32), Color::rgba(128, 0, 128, 255));
    }

    #[test]
    fn test_hidden_and_folder_layers_skipped() {
        let (mut stack, _dir) = stack(16, 16);
        stack.fill_current_layer(Color::RED);

        stack.add_folder("group", None);
        let top = stack.add_layer(None);
        stack.set_current_layer_index(2);
        stack.fill_current_layer(Color::BLUE);
        assert_eq!(stack.result().get_pixel(8, 8), Color::BLUE);

        stack.layer_mut(top).unwrap().set_visible(false);
        stack.compute_result_block();
        assert_eq!(stack.result().get_pixel(8, 8), Color::RED);
    }

    #[test]
    fn test_rect_scoped_composite_matches_full() {
        let (mut stack, _dir) = stack(32, 32);
        stack.fill_current_layer(Color::RED);
        let id = stack.add_layer(None);
        if let Some(Layer::Image(layer)) = stack.layer_mut(id) {
            layer.set_opacity(0.4);
            layer.set_blend_mode(BlendMode::Screen);
            layer.buffer_mut().fill_rect(Rect::new(5, 5, 20, 20), Color::rgba(40, 200, 90, 180));
        }

        stack.compute_result_block();
        let full = stack.result().as_bytes().to_vec();

        stack.compute_result_block_rect(Rect::new(3, 3, 24, 24));
        assert_eq!(stack.result().as_bytes(), full.as_slice());
    }

    #[test]
    fn test_add_layer_out_of_range_appends() {
        let (mut stack, _dir) = stack(8, 8);
        let id = stack.add_layer(Some(99));
        assert_eq!(stack.layers().last().unwrap().id(), id);

        let id = stack.add_layer(Some(0));
        assert_eq!(stack.layers()[0].id(), id);
        assert_eq!(stack.layer_count(), 3);
    }

    #[test]
    fn test_delete_layer_adjusts_current_index() {
        let (mut stack, _dir) = stack(8, 8);
        stack.add_layer(None);
        stack.add_layer(None);
        stack.set_current_layer_index(2);

        stack.delete_layer(1);
        assert_eq!(stack.current_layer_index(), 1);
        assert_eq!(stack.layer_count(), 2);

        stack.delete_layer(0);
        assert_eq!(stack.current_layer_index(), 0);

        // Out-of-range delete is ignored.
        stack.delete_layer(10);
        assert_eq!(stack.layer_count(), 1);

        // Deleting the last layer is allowed at this level.
        stack.delete_layer(0);
        assert_eq!(stack.layer_count(), 0);
        assert_eq!(stack.current_layer_index(), 0);
    }

    #[test]
    fn test_delete_layer_by_id() {
        let (mut stack, _dir) = stack(8, 8);
        let id = stack.add_layer(None);
        stack.delete_layer_by_id(id);
        assert_eq!(stack.layer_count(), 1);

        // Unknown ids are ignored.
        stack.delete_layer_by_id(LayerId::from_raw(999));
        assert_eq!(stack.layer_count(), 1);
    }

    #[test]
    fn test_merge_down() {
        let (mut stack, _dir) = stack(16, 16);
        stack.fill_current_layer(Color::RED);

        let top = stack.add_layer(None);
        stack.set_current_layer_index(1);
        stack.fill_current_layer(Color::rgba(0, 0, 255, 128));

        stack.merge_down(top);
        assert_eq!(stack.layer_count(), 1);

        // Merged content equals the full-opacity normal blend of the two.
        let merged = stack.layers()[0].as_image().unwrap();
        let pixel = merged.buffer().get_pixel(8, 8);
        assert_eq!(pixel, Color::rgba(127, 0, 128, 255));
        assert_eq!(stack.result().get_pixel(8, 8), pixel);
    }

    #[test]
    fn test_merge_down_preconditions() {
        let (mut stack, _dir) = stack(8, 8);
        let bottom = stack.layers()[0].id();

        // Bottom-most layer cannot merge down.
        stack.merge_down(bottom);
        assert_eq!(stack.layer_count(), 1);

        // A layer above a folder cannot merge down.
        stack.add_folder("group", None);
        let top = stack.add_layer(None);
        stack.merge_down(top);
        assert_eq!(stack.layer_count(), 3);
    }

    #[test]
    fn test_duplicate_layer() {
        let (mut stack, _dir) = stack(8, 8);
        let id = stack.layers()[0].id();
        {
            let layer = current_image(&mut stack);
            layer.set_opacity(0.7);
            layer.set_blend_mode(BlendMode::Multiply);
            layer.set_alpha_locked(true);
            layer.buffer_mut().fill(Color::GREEN);
        }

        stack.duplicate(id);
        assert_eq!(stack.layer_count(), 2);

        let copy = stack.layers()[1].as_image().unwrap();
        assert_eq!(copy.name(), "Layer 0_Copy");
        assert_eq!(copy.opacity(), 0.7);
        assert_eq!(copy.blend_mode(), BlendMode::Multiply);
        assert!(copy.is_alpha_locked());
        assert_eq!(copy.buffer().get_pixel(0, 0), Color::GREEN);
        let copy_id = copy.id();

        // The buffers are independent.
        current_image(&mut stack).buffer_mut().fill(Color::RED);
        let copy = stack.layer(copy_id).unwrap().as_image().unwrap();
        assert_eq!(copy.buffer().get_pixel(0, 0), Color::GREEN);
    }

    #[test]
    fn test_set_current_layer_index_out_of_range_ignored() {
        let (mut stack, _dir) = stack(8, 8);
        stack.add_layer(None);
        stack.set_current_layer_index(1);
        stack.set_current_layer_index(5);
        assert_eq!(stack.current_layer_index(), 1);
    }

    #[test]
    fn test_clear_current_layer() {
        let (mut stack, _dir) = stack(8, 8);
        stack.fill_current_layer(Color::RED);
        stack.clear_current_layer();
        assert_eq!(stack.result().get_pixel(4, 4), Color::TRANSPARENT);
    }

    #[test]
    fn test_preview_stroke_leaves_layer_untouched() {
        let (mut stack, _dir) = stack(16, 16);
        stack.fill_current_layer(Color::RED);

        let mut delta = PixelBuffer::new(16, 16);
        delta.fill_rect(Rect::new(4, 4, 4, 4), Color::BLUE);

        let rect = Rect::new(4, 4, 4, 4);
        stack.preview_stroke(rect, &delta, 1.0, BlendMode::Normal, AlphaMode::Normal);

        assert_eq!(stack.result().get_pixel(5, 5), Color::BLUE);
        assert_eq!(stack.result().get_pixel(0, 0), Color::RED);
        // The committed layer content is unchanged.
        let layer = stack.layers()[0].as_image().unwrap();
        assert_eq!(layer.buffer().get_pixel(5, 5), Color::RED);

        // A plain recomposite drops the preview.
        stack.compute_result_block();
        assert_eq!(stack.result().get_pixel(5, 5), Color::RED);
    }

    #[test]
    fn test_commit_stroke_applies_to_layer() {
        let (mut stack, _dir) = stack(16, 16);
        stack.fill_current_layer(Color::RED);

        let mut delta = PixelBuffer::new(16, 16);
        delta.fill_rect(Rect::new(4, 4, 4, 4), Color::BLUE);

        stack.commit_stroke(Rect::new(4, 4, 4, 4), &delta, 1.0, BlendMode::Normal, AlphaMode::Normal);

        let layer = stack.layers()[0].as_image().unwrap();
        assert_eq!(layer.buffer().get_pixel(5, 5), Color::BLUE);
        assert_eq!(stack.result().get_pixel(5, 5), Color::BLUE);
        assert_eq!(stack.result().get_pixel(0, 0), Color::RED);
    }

    #[test]
    fn test_alpha_locked_layer_keeps_coverage() {
        let (mut stack, _dir) = stack(8, 8);
        {
            let layer = current_image(&mut stack);
            // Half the layer is painted, half transparent.
            layer.buffer_mut().fill_rect(Rect::new(0, 0, 4, 8), Color::RED);
            layer.set_alpha_locked(true);
        }

        let mut delta = PixelBuffer::new(8, 8);
        delta.fill(Color::BLUE);
        stack.commit_stroke(Rect::from_size(8, 8), &delta, 1.0, BlendMode::Normal, AlphaMode::Normal);

        let layer = stack.layers()[0].as_image().unwrap();
        // Painted half is recolored, transparent half stays empty.
        assert_eq!(layer.buffer().get_pixel(1, 1).b, 255);
        assert_eq!(layer.buffer().get_pixel(1, 1).a, 255);
        assert_eq!(layer.buffer().get_pixel(6, 6), Color::TRANSPARENT);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (mut stack, _dir) = stack(32, 32);
        stack.fill_current_layer(Color::RED);

        stack.begin_record();
        stack.save_tile(0, 0, 16, 16);
        current_image(&mut stack)
            .buffer_mut()
            .fill_rect(Rect::new(0, 0, 16, 16), Color::BLUE);
        stack.end_record().unwrap();
        stack.compute_result_block();
        assert_eq!(stack.result().get_pixel(8, 8), Color::BLUE);

        assert!(stack.undo());
        assert_eq!(stack.result().get_pixel(8, 8), Color::RED);
        let layer = stack.layers()[0].as_image().unwrap();
        assert_eq!(layer.buffer().get_pixel(8, 8), Color::RED);
        // Pixels outside the journaled tile were never touched.
        assert_eq!(layer.buffer().get_pixel(20, 20), Color::RED);

        assert!(stack.redo());
        assert_eq!(stack.result().get_pixel(8, 8), Color::BLUE);
        assert_eq!(stack.result().get_pixel(20, 20), Color::RED);

        // Undo twice more than available: second call finds no history.
        assert!(stack.undo());
        assert!(!stack.undo());
    }

    #[test]
    fn test_new_record_after_undo_discards_redo() {
        let (mut stack, _dir) = stack(16, 16);
        stack.fill_current_layer(Color::RED);

        for color in [Color::BLUE, Color::GREEN] {
            stack.begin_record();
            stack.save_tile(0, 0, 8, 8);
            current_image(&mut stack)
                .buffer_mut()
                .fill_rect(Rect::new(0, 0, 8, 8), color);
            stack.end_record().unwrap();
        }

        assert!(stack.undo());
        assert!(stack.journal().can_redo());

        // A new stroke here abandons the green branch.
        stack.begin_record();
        stack.save_tile(0, 0, 8, 8);
        current_image(&mut stack)
            .buffer_mut()
            .fill_rect(Rect::new(0, 0, 8, 8), Color::WHITE);
        stack.end_record().unwrap();

        assert!(!stack.journal().can_redo());
        assert!(!stack.redo());
        stack.compute_result_block();
        assert_eq!(stack.result().get_pixel(4, 4), Color::WHITE);
    }

    #[test]
    fn test_undo_fails_when_layer_deleted() {
        let (mut stack, _dir) = stack(16, 16);
        stack.add_layer(None);
        stack.set_current_layer_index(1);
        stack.fill_current_layer(Color::RED);

        stack.begin_record();
        stack.save_tile(0, 0, 8, 8);
        current_image(&mut stack)
            .buffer_mut()
            .fill_rect(Rect::new(0, 0, 8, 8), Color::BLUE);
        stack.end_record().unwrap();

        stack.delete_layer(1);
        assert!(!stack.undo());
    }

    #[test]
    fn test_empty_record_leaves_no_history() {
        let (mut stack, _dir) = stack(16, 16);
        stack.begin_record();
        stack.end_record().unwrap();
        assert!(!stack.undo());
    }

    #[test]
    fn test_clear_history() {
        let (mut stack, _dir) = stack(16, 16);
        stack.begin_record();
        stack.save_tile(0, 0, 8, 8);
        stack.end_record().unwrap();
        assert!(stack.journal().can_undo());

        stack.clear_history();
        assert!(!stack.journal().can_undo());
        assert!(!stack.undo());
    }

    #[test]
    fn test_blending_mode_names_order() {
        let names = LayerStack::blending_mode_names();
        assert_eq!(names[0], "Normal");
        assert_eq!(names.len(), BlendMode::ALL.len());
    }

    #[test]
    fn test_take_damage_accumulates() {
        let (mut stack, _dir) = stack(32, 32);
        stack.take_damage();

        stack.compute_result_block_rect(Rect::new(0, 0, 4, 4));
        stack.compute_result_block_rect(Rect::new(8, 8, 4, 4));
        assert_eq!(stack.take_damage(), Some(Rect::new(0, 0, 12, 12)));
        assert_eq!(stack.take_damage(), None);
    }
}

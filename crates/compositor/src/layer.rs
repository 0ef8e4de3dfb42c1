//! Layer data model.

use common::id::LayerId;
use raster::{BlendMode, PixelBuffer};

/// Discriminator for the layer variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Image,
    Folder,
}

/// A layer in the stack: either a paintable bitmap or a folder grouping
/// other layers.
#[derive(Clone, Debug)]
pub enum Layer {
    Image(ImageLayer),
    Folder(FolderLayer),
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Image(_) => LayerKind::Image,
            Layer::Folder(_) => LayerKind::Folder,
        }
    }

    pub fn id(&self) -> LayerId {
        match self {
            Layer::Image(layer) => layer.id,
            Layer::Folder(layer) => layer.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Layer::Image(layer) => &layer.name,
            Layer::Folder(layer) => &layer.name,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self {
            Layer::Image(layer) => layer.name = name,
            Layer::Folder(layer) => layer.name = name,
        }
    }

    pub fn is_visible(&self) -> bool {
        match self {
            Layer::Image(layer) => layer.visible,
            Layer::Folder(layer) => layer.visible,
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        match self {
            Layer::Image(layer) => layer.visible = visible,
            Layer::Folder(layer) => layer.visible = visible,
        }
    }

    /// The lock flag is advisory: it is surfaced to the UI, which decides
    /// whether to allow edits. The model itself never blocks mutation.
    pub fn is_locked(&self) -> bool {
        match self {
            Layer::Image(layer) => layer.locked,
            Layer::Folder(layer) => layer.locked,
        }
    }

    pub fn set_locked(&mut self, locked: bool) {
        match self {
            Layer::Image(layer) => layer.locked = locked,
            Layer::Folder(layer) => layer.locked = locked,
        }
    }

    pub fn as_image(&self) -> Option<&ImageLayer> {
        match self {
            Layer::Image(layer) => Some(layer),
            Layer::Folder(_) => None,
        }
    }

    pub fn as_image_mut(&mut self) -> Option<&mut ImageLayer> {
        match self {
            Layer::Image(layer) => Some(layer),
            Layer::Folder(_) => None,
        }
    }
}

/// A paintable bitmap layer.
#[derive(Clone, Debug)]
pub struct ImageLayer {
    pub(crate) id: LayerId,
    pub(crate) name: String,
    pub(crate) visible: bool,
    pub(crate) locked: bool,
    pub(crate) buffer: PixelBuffer,
    pub(crate) blend_mode: BlendMode,
    pub(crate) opacity: f32,
    pub(crate) alpha_locked: bool,
}

impl ImageLayer {
    pub(crate) fn new(id: LayerId, name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::from_buffer(id, name, PixelBuffer::new(width, height))
    }

    pub(crate) fn from_buffer(id: LayerId, name: impl Into<String>, buffer: PixelBuffer) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            locked: false,
            buffer,
            blend_mode: BlendMode::Normal,
            opacity: 1.0,
            alpha_locked: false,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Set the layer opacity, clamped to [0, 1].
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend_mode = mode;
    }

    /// Set the blend mode by display name, resolved against the canonical
    /// name table. An unknown name leaves the mode unchanged.
    pub fn set_blend_mode_by_name(&mut self, name: &str) {
        if let Some(mode) = BlendMode::from_name(name) {
            self.blend_mode = mode;
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_alpha_locked(&self) -> bool {
        self.alpha_locked
    }

    pub fn set_alpha_locked(&mut self, alpha_locked: bool) {
        self.alpha_locked = alpha_locked;
    }

    /// Copy the visual properties of another layer: opacity, blend mode,
    /// alpha lock, visibility, and lock state. Buffer contents and name
    /// are not copied.
    pub fn copy_properties_from(&mut self, other: &ImageLayer) {
        self.opacity = other.opacity;
        self.blend_mode = other.blend_mode;
        self.alpha_locked = other.alpha_locked;
        self.visible = other.visible;
        self.locked = other.locked;
    }
}

/// A folder grouping other layers.
///
/// Folders carry a blend mode for future group compositing; the
/// compositing loop currently skips them.
#[derive(Clone, Debug)]
pub struct FolderLayer {
    pub(crate) id: LayerId,
    pub(crate) name: String,
    pub(crate) visible: bool,
    pub(crate) locked: bool,
    pub(crate) blend_mode: BlendMode,
    pub(crate) children: Vec<Layer>,
}

impl FolderLayer {
    pub(crate) fn new(id: LayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            locked: false,
            blend_mode: BlendMode::Normal,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend_mode = mode;
    }

    pub fn children(&self) -> &[Layer] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.children
    }
}

//! Alpha-compositing blend engine.
//!
//! Blending operates on straight (non-premultiplied) RGBA8 pixels with
//! per-channel f32 math. The separable blend modes follow the W3C
//! compositing formulas; the final composite is Porter-Duff source-over
//! with the source alpha scaled by the per-call opacity.

use crate::buffer::PixelBuffer;
use crate::BYTES_PER_PIXEL;
use common::geometry::Rect;
use rayon::prelude::*;

/// Blend mode for compositing one buffer over another.
///
/// The declaration order is canonical: it matches the display-name table
/// returned by [`BlendMode::names`], and name lookups resolve by position
/// in that table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    /// All blend modes in canonical order.
    pub const ALL: [BlendMode; 12] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::HardLight,
        BlendMode::SoftLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
    ];

    /// Display name, index-correlated with [`BlendMode::ALL`].
    pub const fn as_str(self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// The canonical ordered list of display names.
    pub fn names() -> &'static [&'static str] {
        const NAMES: [&str; 12] = [
            "Normal",
            "Multiply",
            "Screen",
            "Overlay",
            "Darken",
            "Lighten",
            "Color Dodge",
            "Color Burn",
            "Hard Light",
            "Soft Light",
            "Difference",
            "Exclusion",
        ];
        &NAMES
    }

    /// Look up a mode by its display name. Case-sensitive exact match.
    pub fn from_name(name: &str) -> Option<BlendMode> {
        Self::ALL.iter().copied().find(|mode| mode.as_str() == name)
    }
}

/// How the destination alpha channel participates in a blend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaMode {
    /// Porter-Duff source-over: source coverage is added to the
    /// destination.
    #[default]
    Normal,
    /// Destination-alpha preserving: paint lands only where the destination
    /// already has coverage and the destination alpha is left untouched.
    /// This is the alpha-lock primitive.
    Back,
}

/// Worker hint for a blend call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Workers {
    /// Use the rayon thread pool.
    #[default]
    Default,
    /// Pin the whole blend to the calling thread.
    Serial,
}

/// Parameters for a single [`PixelBuffer::blend_rect`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlendOptions {
    pub mode: BlendMode,
    pub alpha_mode: AlphaMode,
    pub opacity: f32,
    pub workers: Workers,
}

impl BlendOptions {
    /// Source-over at the given opacity, parallel workers.
    pub fn normal(opacity: f32) -> Self {
        Self {
            mode: BlendMode::Normal,
            alpha_mode: AlphaMode::Normal,
            opacity,
            workers: Workers::Default,
        }
    }
}

impl PixelBuffer {
    /// Blend `source`'s pixels over this buffer within `rect`.
    ///
    /// The same coordinates are used on both sides; `rect` is intersected
    /// with both buffers' bounds. Source alpha is scaled by
    /// `options.opacity` before compositing.
    pub fn blend_rect(&mut self, source: &PixelBuffer, rect: Rect, options: &BlendOptions) {
        if options.opacity <= 0.0 {
            return;
        }
        let Some(rect) = rect
            .intersection(&self.bounds())
            .and_then(|r| r.intersection(&source.bounds()))
        else {
            return;
        };

        let dst_stride = self.row_stride();
        let src_stride = source.row_stride();
        let x0 = rect.x as usize * BYTES_PER_PIXEL;
        let row_len = rect.width as usize * BYTES_PER_PIXEL;
        let src_data = source.as_bytes();
        let opts = *options;

        let blend_row = |y: usize, dst_row: &mut [u8]| {
            let s = y * src_stride + x0;
            let src_row = &src_data[s..s + row_len];
            let dst_row = &mut dst_row[x0..x0 + row_len];
            for (dst, src) in dst_row
                .chunks_exact_mut(BYTES_PER_PIXEL)
                .zip(src_row.chunks_exact(BYTES_PER_PIXEL))
            {
                blend_pixel(dst, src, &opts);
            }
        };

        match options.workers {
            Workers::Serial => {
                for (y, row) in self
                    .as_bytes_mut()
                    .chunks_exact_mut(dst_stride)
                    .enumerate()
                    .skip(rect.y as usize)
                    .take(rect.height as usize)
                {
                    blend_row(y, row);
                }
            }
            Workers::Default => {
                self.as_bytes_mut()
                    .par_chunks_exact_mut(dst_stride)
                    .enumerate()
                    .skip(rect.y as usize)
                    .take(rect.height as usize)
                    .for_each(|(y, row)| blend_row(y, row));
            }
        }
    }
}

fn blend_pixel(dst: &mut [u8], src: &[u8], options: &BlendOptions) {
    let mut sa = (src[3] as f32 / 255.0) * options.opacity.min(1.0);
    if sa <= 0.0 {
        return;
    }

    let da = dst[3] as f32 / 255.0;
    let out_a = match options.alpha_mode {
        AlphaMode::Normal => sa + da * (1.0 - sa),
        AlphaMode::Back => {
            sa *= da;
            da
        }
    };
    if sa <= 0.0 || out_a <= 0.0 {
        return;
    }

    for i in 0..3 {
        let cs = src[i] as f32 / 255.0;
        let cb = dst[i] as f32 / 255.0;
        // Mix the raw source color with the blended color by backdrop
        // coverage, then composite source-over.
        let mixed = (1.0 - da) * cs + da * blend_channel(options.mode, cb, cs);
        let co = sa * mixed + (1.0 - sa) * da * cb;
        dst[i] = (co / out_a * 255.0 + 0.5) as u8;
    }
    if options.alpha_mode == AlphaMode::Normal {
        dst[3] = (out_a * 255.0 + 0.5) as u8;
    }
}

/// Separable blend formulas (W3C compositing-1). `cb` is the backdrop
/// channel, `cs` the source channel, both in [0, 1].
fn blend_channel(mode: BlendMode, cb: f32, cs: f32) -> f32 {
    match mode {
        BlendMode::Normal => cs,
        BlendMode::Multiply => cb * cs,
        BlendMode::Screen => cb + cs - cb * cs,
        BlendMode::Overlay => hard_light(cs, cb),
        BlendMode::Darken => cb.min(cs),
        BlendMode::Lighten => cb.max(cs),
        BlendMode::ColorDodge => {
            if cb <= 0.0 {
                0.0
            } else if cs >= 1.0 {
                1.0
            } else {
                (cb / (1.0 - cs)).min(1.0)
            }
        }
        BlendMode::ColorBurn => {
            if cb >= 1.0 {
                1.0
            } else if cs <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - cb) / cs).min(1.0)
            }
        }
        BlendMode::HardLight => hard_light(cb, cs),
        BlendMode::SoftLight => {
            if cs <= 0.5 {
                cb - (1.0 - 2.0 * cs) * cb * (1.0 - cb)
            } else {
                let d = if cb <= 0.25 {
                    ((16.0 * cb - 12.0) * cb + 4.0) * cb
                } else {
                    cb.sqrt()
                };
                cb + (2.0 * cs - 1.0) * (d - cb)
            }
        }
        BlendMode::Difference => (cb - cs).abs(),
        BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
    }
}

fn hard_light(base: f32, over: f32) -> f32 {
    if over <= 0.5 {
        2.0 * over * base
    } else {
        1.0 - 2.0 * (1.0 - over) * (1.0 - base)
    }
}

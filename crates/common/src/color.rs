//! Color representation and manipulation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// RGBA color with 8-bit components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 128, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);

    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[inline]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create color from floating point values (0.0 - 1.0).
    pub fn from_f32(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            r: (r.clamp(0.0, 1.0) * 255.0) as u8,
            g: (g.clamp(0.0, 1.0) * 255.0) as u8,
            b: (b.clamp(0.0, 1.0) * 255.0) as u8,
            a: (a.clamp(0.0, 1.0) * 255.0) as u8,
        }
    }

    /// Composite this color over a background (Porter-Duff source-over,
    /// straight alpha).
    pub fn blend_over(&self, background: Color) -> Color {
        let fg_a = self.a as f32 / 255.0;
        let bg_a = background.a as f32 / 255.0;

        let out_a = fg_a + bg_a * (1.0 - fg_a);

        if out_a == 0.0 {
            return Color::TRANSPARENT;
        }

        let blend = |fg: u8, bg: u8| -> u8 {
            let fg = fg as f32 / 255.0;
            let bg = bg as f32 / 255.0;
            let out = (fg * fg_a + bg * bg_a * (1.0 - fg_a)) / out_a;
            (out * 255.0) as u8
        };

        Color::rgba(
            blend(self.r, background.r),
            blend(self.g, background.g),
            blend(self.b, background.b),
            (out_a * 255.0) as u8,
        )
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.a == 255
    }

    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }

    /// The color's bytes in buffer order.
    #[inline]
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_over_opaque() {
        let fg = Color::rgba(255, 0, 0, 128);
        let bg = Color::rgb(0, 0, 255);

        let out = fg.blend_over(bg);
        assert_eq!(out.a, 255);
        assert!(out.r > 120 && out.r < 135);
        assert!(out.b > 120 && out.b < 135);
    }

    #[test]
    fn test_blend_over_transparent_background() {
        let fg = Color::rgba(10, 20, 30, 255);
        let out = fg.blend_over(Color::TRANSPARENT);
        assert_eq!(out, fg);
    }

    #[test]
    fn test_from_f32_clamps() {
        let c = Color::from_f32(2.0, -1.0, 0.5, 1.0);
        assert_eq!(c.r, 255);
        assert_eq!(c.g, 0);
        assert_eq!(c.a, 255);
    }

    #[test]
    fn test_opacity_queries() {
        assert!(Color::RED.is_opaque());
        assert!(Color::TRANSPARENT.is_transparent());
        let half = Color::rgba(0, 0, 0, 128);
        assert!(!half.is_opaque());
        assert!(!half.is_transparent());
    }
}

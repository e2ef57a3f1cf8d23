// ============================================================================
// Color primitives: RGB value type, perceptual distance, opacity blending
// ============================================================================
//
// Everything in here is pure and deterministic. The optimizer, the simulator
// and the on-canvas result must agree bit-for-bit, so `blend` truncates
// exactly the way the game's brush does.

use image::Rgb;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An 8-bit RGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `#RRGGBB` form, uppercase.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl From<Rgb<u8>> for Color {
    fn from(p: Rgb<u8>) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

impl From<&Rgb<u8>> for Color {
    fn from(p: &Rgb<u8>) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

impl From<Color> for Rgb<u8> {
    fn from(c: Color) -> Self {
        Rgb([c.r, c.g, c.b])
    }
}

impl From<[u8; 3]> for Color {
    fn from(c: [u8; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

// ============================================================================
// Hex parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorError(String);

impl fmt::Display for ParseColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid color '{}': expected #RRGGBB or RRGGBB", self.0)
    }
}

impl std::error::Error for ParseColorError {}

impl FromStr for Color {
    type Err = ParseColorError;

    /// Accepts `#RRGGBB`, `RRGGBB` and the short `#RGB` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let hex = s.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(err());
        }
        let channel = |h: &str| u8::from_str_radix(h, 16).map_err(|_| err());
        match hex.len() {
            6 => Ok(Color::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                // #RGB expands each nibble: F → FF
                let r = channel(&hex[0..1])?;
                let g = channel(&hex[1..2])?;
                let b = channel(&hex[2..3])?;
                Ok(Color::new(r * 17, g * 17, b * 17))
            }
            _ => Err(err()),
        }
    }
}

// ============================================================================
// Distance
// ============================================================================

/// Channel weights approximating luminance sensitivity (R:G:B ≈ 3:6:1).
pub const CHANNEL_WEIGHTS: [f32; 3] = [0.3, 0.6, 0.1];

/// Which color distance the optimizer uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Luminance-weighted Euclidean distance in RGB.
    #[default]
    Weighted,
    /// Plain Euclidean distance in RGB. Cheaper, less perceptual.
    Fast,
}

impl DistanceMetric {
    #[inline]
    pub fn distance(self, a: Color, b: Color) -> f32 {
        match self {
            DistanceMetric::Weighted => distance(a, b),
            DistanceMetric::Fast => fast_distance(a, b),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DistanceMetric::Weighted => "weighted",
            DistanceMetric::Fast => "fast",
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weighted" | "perceptual" => Ok(DistanceMetric::Weighted),
            "fast" | "euclidean" => Ok(DistanceMetric::Fast),
            other => Err(format!("unknown metric '{}': expected weighted or fast", other)),
        }
    }
}

/// Weighted Euclidean distance. Symmetric, zero only for identical colors.
#[inline]
pub fn distance(a: Color, b: Color) -> f32 {
    let dr = a.r as f32 - b.r as f32;
    let dg = a.g as f32 - b.g as f32;
    let db = a.b as f32 - b.b as f32;
    (dr * dr * CHANNEL_WEIGHTS[0] + dg * dg * CHANNEL_WEIGHTS[1] + db * db * CHANNEL_WEIGHTS[2]).sqrt()
}

/// Unweighted Euclidean distance.
#[inline]
pub fn fast_distance(a: Color, b: Color) -> f32 {
    let dr = a.r as f32 - b.r as f32;
    let dg = a.g as f32 - b.g as f32;
    let db = a.b as f32 - b.b as f32;
    (dr * dr + dg * dg + db * db).sqrt()
}

// ============================================================================
// Blend
// ============================================================================

/// Composite `top` over `base` at `opacity` (0..=1).
///
/// `base * (1 - opacity) + top * opacity` per channel, truncated toward zero.
/// Truncation must not be replaced by rounding: the painted canvas truncates.
#[inline]
pub fn blend(base: Color, top: Color, opacity: f32) -> Color {
    let keep = 1.0 - opacity;
    let mix = |b: u8, t: u8| (b as f32 * keep + t as f32 * opacity) as u8;
    Color::new(mix(base.r, top.r), mix(base.g, top.g), mix(base.b, top.b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_truncates_instead_of_rounding() {
        let out = blend(Color::BLACK, Color::WHITE, 0.5);
        assert_eq!(out, Color::new(127, 127, 127));
    }

    #[test]
    fn blend_endpoints() {
        let base = Color::new(10, 200, 30);
        let top = Color::new(250, 5, 90);
        assert_eq!(blend(base, top, 1.0), top);
        assert_eq!(blend(base, top, 0.0), base);
    }

    #[test]
    fn blend_quarter_steps() {
        let out = blend(Color::WHITE, Color::BLACK, 0.25);
        // 255 * 0.75 = 191.25
        assert_eq!(out, Color::new(191, 191, 191));
        let out = blend(Color::WHITE, Color::BLACK, 0.75);
        // 255 * 0.25 = 63.75
        assert_eq!(out, Color::new(63, 63, 63));
    }

    #[test]
    fn distance_is_symmetric_and_zero_only_on_equal() {
        let a = Color::new(12, 34, 56);
        let b = Color::new(200, 100, 0);
        assert_eq!(distance(a, b), distance(b, a));
        assert_eq!(distance(a, a), 0.0);
        assert!(distance(a, Color::new(12, 34, 57)) > 0.0);
        assert!(fast_distance(a, Color::new(13, 34, 56)) > 0.0);
    }

    #[test]
    fn green_weighs_more_than_blue() {
        let base = Color::new(100, 100, 100);
        let dg = distance(base, Color::new(100, 110, 100));
        let db = distance(base, Color::new(100, 100, 110));
        assert!(dg > db);
    }

    #[test]
    fn parse_hex_forms() {
        assert_eq!("#FFFFFF".parse::<Color>(), Ok(Color::WHITE));
        assert_eq!("00ff80".parse::<Color>(), Ok(Color::new(0, 255, 128)));
        assert_eq!("#fff".parse::<Color>(), Ok(Color::WHITE));
        assert!("#12345".parse::<Color>().is_err());
        assert!("#GGGGGG".parse::<Color>().is_err());
        assert_eq!(Color::new(1, 171, 255).to_hex(), "#01ABFF");
    }

    #[test]
    fn metric_from_str() {
        assert_eq!("weighted".parse::<DistanceMetric>(), Ok(DistanceMetric::Weighted));
        assert_eq!("FAST".parse::<DistanceMetric>(), Ok(DistanceMetric::Fast));
        assert!("lab".parse::<DistanceMetric>().is_err());
    }
}

// ============================================================================
// Palette and opacity tables
// ============================================================================
//
// Both tables are addressed by index everywhere else in the crate. The
// indices are persisted in layer caches and select on-screen controls, so
// entries are never reordered once a table is built.

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Largest palette whose indices still fit in a `u8`.
pub const MAX_PALETTE_LEN: usize = 256;

/// The in-game brush palette: 16 hue rows × 4 shades, row-major.
pub const DEFAULT_PALETTE: [Color; 64] = [
    // Greys
    Color::new(0, 0, 0), Color::new(115, 115, 115), Color::new(191, 191, 191), Color::new(255, 255, 255),
    // Browns and oranges
    Color::new(51, 33, 19), Color::new(101, 65, 41), Color::new(255, 133, 50), Color::new(255, 177, 128),
    // Yellows
    Color::new(51, 45, 19), Color::new(102, 90, 40), Color::new(255, 214, 52), Color::new(254, 229, 128),
    // Yellow-green
    Color::new(46, 51, 21), Color::new(90, 101, 41), Color::new(213, 255, 51), Color::new(230, 255, 127),
    // Light green
    Color::new(34, 50, 21), Color::new(64, 102, 41), Color::new(133, 254, 51), Color::new(179, 255, 128),
    // Green
    Color::new(20, 51, 20), Color::new(41, 102, 42), Color::new(52, 255, 51), Color::new(128, 255, 126),
    // Green-cyan
    Color::new(20, 51, 33), Color::new(42, 102, 66), Color::new(51, 255, 132), Color::new(127, 255, 178),
    // Cyan
    Color::new(20, 51, 45), Color::new(40, 102, 89), Color::new(50, 255, 214), Color::new(127, 255, 230),
    // Cyan-blue
    Color::new(20, 45, 50), Color::new(42, 90, 102), Color::new(51, 214, 255), Color::new(127, 229, 254),
    // Light blue
    Color::new(20, 33, 50), Color::new(41, 65, 103), Color::new(50, 133, 255), Color::new(127, 179, 255),
    // Blue
    Color::new(20, 21, 52), Color::new(41, 41, 103), Color::new(50, 51, 255), Color::new(128, 127, 255),
    // Purple
    Color::new(33, 20, 50), Color::new(65, 41, 101), Color::new(133, 52, 255), Color::new(179, 127, 254),
    // Magenta
    Color::new(45, 20, 50), Color::new(91, 41, 102), Color::new(214, 51, 254), Color::new(229, 127, 255),
    // Pink-magenta
    Color::new(50, 20, 44), Color::new(103, 41, 90), Color::new(255, 51, 214), Color::new(255, 127, 228),
    // Pink-red
    Color::new(51, 21, 33), Color::new(103, 41, 66), Color::new(254, 51, 133), Color::new(255, 127, 178),
    // Red
    Color::new(51, 19, 20), Color::new(102, 40, 41), Color::new(255, 51, 52), Color::new(255, 127, 126),
];

/// Brush opacities offered by the game, strongest first.
pub const DEFAULT_OPACITIES: [f32; 4] = [1.0, 0.75, 0.5, 0.25];

/// Ordered set of base colors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Default for Palette {
    fn default() -> Self {
        Self { colors: DEFAULT_PALETTE.to_vec() }
    }
}

impl Palette {
    /// Build a palette from an explicit color list.
    /// Validation (non-empty, at most 256 entries) happens at optimizer entry.
    pub fn new(colors: Vec<Color>) -> Self {
        Self { colors }
    }

    /// Parse a comma or whitespace separated list of hex colors.
    pub fn from_hex_list(list: &str) -> Result<Self, crate::color::ParseColorError> {
        let colors = list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Color>, _>>()?;
        Ok(Self { colors })
    }

    #[inline]
    pub fn get(&self, index: u8) -> Color {
        self.colors[index as usize]
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Index of the entry closest to `target`; first entry wins ties.
    pub fn nearest(&self, target: Color, metric: crate::color::DistanceMetric) -> Option<u8> {
        let mut best: Option<(u8, f32)> = None;
        for (i, &c) in self.colors.iter().enumerate().take(MAX_PALETTE_LEN) {
            let d = metric.distance(c, target);
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((i as u8, d));
            }
        }
        best.map(|(i, _)| i)
    }
}

/// Central opacity lookup: index → blend fraction → percentage shown in-game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpacityTable {
    levels: Vec<f32>,
}

impl Default for OpacityTable {
    fn default() -> Self {
        Self { levels: DEFAULT_OPACITIES.to_vec() }
    }
}

impl OpacityTable {
    pub fn new(levels: Vec<f32>) -> Self {
        Self { levels }
    }

    #[inline]
    pub fn get(&self, index: u8) -> f32 {
        self.levels[index as usize]
    }

    /// Whole-number percentage typed into the opacity box.
    pub fn percent(&self, index: u8) -> u8 {
        (self.get(index) * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the strongest level; used by the single-layer fallback path.
    pub fn strongest(&self) -> Option<u8> {
        let mut best: Option<(u8, f32)> = None;
        for (i, &o) in self.levels.iter().enumerate().take(MAX_PALETTE_LEN) {
            if best.is_none_or(|(_, bo)| o > bo) {
                best = Some((i as u8, o));
            }
        }
        best.map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::DistanceMetric;

    #[test]
    fn default_tables_have_expected_shape() {
        let palette = Palette::default();
        assert_eq!(palette.len(), 64);
        assert_eq!(palette.get(0), Color::BLACK);
        assert_eq!(palette.get(3), Color::WHITE);

        let opacities = OpacityTable::default();
        assert_eq!(opacities.len(), 4);
        assert_eq!(opacities.percent(0), 100);
        assert_eq!(opacities.percent(1), 75);
        assert_eq!(opacities.percent(2), 50);
        assert_eq!(opacities.percent(3), 25);
        assert_eq!(opacities.strongest(), Some(0));
    }

    #[test]
    fn nearest_prefers_first_on_ties() {
        let palette = Palette::new(vec![Color::new(10, 10, 10), Color::new(10, 10, 10), Color::WHITE]);
        assert_eq!(palette.nearest(Color::new(12, 12, 12), DistanceMetric::Weighted), Some(0));
        assert_eq!(palette.nearest(Color::new(250, 250, 250), DistanceMetric::Weighted), Some(2));
        assert_eq!(Palette::new(Vec::new()).nearest(Color::BLACK, DistanceMetric::Fast), None);
    }

    #[test]
    fn parses_hex_list() {
        let palette = Palette::from_hex_list("#000000, #FFFFFF  #ff0000").unwrap();
        assert_eq!(palette.colors(), &[Color::BLACK, Color::WHITE, Color::new(255, 0, 0)]);
        assert!(Palette::from_hex_list("#000000,nope").is_err());
    }
}

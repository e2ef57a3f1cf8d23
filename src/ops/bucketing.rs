// ============================================================================
// Color bucketing: collapse similar colors so each group is searched once
// ============================================================================

use image::RgbImage;
use std::collections::{BTreeMap, BTreeSet};

use crate::color::Color;

/// Quantized color: each channel integer-divided by the bucket width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(pub [u8; 3]);

impl BucketKey {
    /// Panics if `width` is zero; widths are validated at optimizer entry.
    #[inline]
    pub fn of(color: Color, width: u8) -> Self {
        BucketKey([color.r / width, color.g / width, color.b / width])
    }
}

/// Bucket → member colors, both in sorted order so grouping is reproducible.
pub type ColorGroups = BTreeMap<BucketKey, BTreeSet<Color>>;

/// Group colors by [`BucketKey`].
pub fn group_colors<I>(colors: I, width: u8) -> ColorGroups
where
    I: IntoIterator<Item = Color>,
{
    let mut groups = ColorGroups::new();
    for color in colors {
        groups.entry(BucketKey::of(color, width)).or_default().insert(color);
    }
    groups
}

/// Component-wise mean of the members, truncated. `None` for an empty set.
pub fn representative<'a, I>(members: I) -> Option<Color>
where
    I: IntoIterator<Item = &'a Color>,
{
    let mut sum = [0u64; 3];
    let mut n = 0u64;
    for c in members {
        sum[0] += c.r as u64;
        sum[1] += c.g as u64;
        sum[2] += c.b as u64;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some(Color::new((sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8))
}

/// Distinct colors on a `stride`-spaced grid (stride 1 = every pixel).
pub fn sample_colors(image: &RgbImage, stride: u32) -> BTreeSet<Color> {
    let stride = stride.max(1) as usize;
    let mut seen = BTreeSet::new();
    for y in (0..image.height()).step_by(stride) {
        for x in (0..image.width()).step_by(stride) {
            seen.insert(Color::from(image.get_pixel(x, y)));
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn keys_divide_each_channel() {
        assert_eq!(BucketKey::of(Color::new(0, 4, 5), 5), BucketKey([0, 0, 1]));
        assert_eq!(BucketKey::of(Color::new(255, 254, 9), 5), BucketKey([51, 50, 1]));
        assert_eq!(BucketKey::of(Color::new(7, 8, 9), 1), BucketKey([7, 8, 9]));
    }

    #[test]
    fn grouping_is_stable() {
        let colors: Vec<Color> = (0..200u32)
            .map(|i| Color::new((i * 37 % 256) as u8, (i * 11 % 256) as u8, (i * 5 % 256) as u8))
            .collect();
        let a = group_colors(colors.iter().copied(), 5);
        let b = group_colors(colors.iter().rev().copied(), 5);
        assert_eq!(a, b);
        let members: usize = a.values().map(BTreeSet::len).sum();
        assert_eq!(members, colors.iter().collect::<BTreeSet<_>>().len());
    }

    #[test]
    fn representative_truncates_mean() {
        let members = [Color::new(10, 0, 255), Color::new(11, 1, 254)];
        assert_eq!(representative(&members), Some(Color::new(10, 0, 254)));
        assert_eq!(representative(&[] as &[Color]), None);
    }

    #[test]
    fn sampling_respects_stride() {
        let img = RgbImage::from_fn(4, 4, |x, y| Rgb([x as u8, y as u8, 0]));
        assert_eq!(sample_colors(&img, 1).len(), 16);
        let sampled = sample_colors(&img, 2);
        assert_eq!(sampled.len(), 4);
        assert!(sampled.contains(&Color::new(2, 2, 0)));
        assert!(!sampled.contains(&Color::new(1, 0, 0)));
    }
}

// ============================================================================
// Simulator: rebuild the painted result from a layer map
// ============================================================================

use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::color::{Color, DistanceMetric};
use crate::layers::{LayerMap, PixelCoord};
use crate::palette::{OpacityTable, Palette};

/// Render what the canvas will look like once `layers` is painted.
///
/// Starts from a canvas filled with `background` and folds each mapped
/// pixel's stack with the same blend the search used. Output has the
/// dimensions of `image`.
pub fn simulate(
    image: &RgbImage,
    background: Color,
    palette: &Palette,
    opacities: &OpacityTable,
    layers: &LayerMap,
) -> RgbImage {
    let mut out = RgbImage::from_pixel(image.width(), image.height(), Rgb::from(background));
    for (at, stack) in layers.iter() {
        if at.x < out.width() && at.y < out.height() {
            out.put_pixel(at.x, at.y, stack.apply(background, palette, opacities).into());
        }
    }
    out
}

/// How closely a simulated preview matches its source image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationReport {
    pub painted_pixels: usize,
    pub mean_distance: f32,
    pub max_distance: f32,
}

/// Compare `preview` against `source` pixel by pixel.
pub fn verify(source: &RgbImage, preview: &RgbImage, layers: &LayerMap, metric: DistanceMetric) -> SimulationReport {
    let w = source.width().min(preview.width()) as usize;
    let h = source.height().min(preview.height()) as usize;
    if w == 0 || h == 0 {
        return SimulationReport { painted_pixels: layers.len(), mean_distance: 0.0, max_distance: 0.0 };
    }

    let (sum, max) = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut row_sum = 0.0f64;
            let mut row_max = 0.0f32;
            for x in 0..w {
                let a = Color::from(source.get_pixel(x as u32, y as u32));
                let b = Color::from(preview.get_pixel(x as u32, y as u32));
                let d = metric.distance(a, b);
                row_sum += d as f64;
                row_max = row_max.max(d);
            }
            (row_sum, row_max)
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1.max(b.1)));

    SimulationReport {
        painted_pixels: layers.len(),
        mean_distance: (sum / (w * h) as f64) as f32,
        max_distance: max,
    }
}

/// Color a single mapped pixel converges to, or the background if unmapped.
pub fn simulated_pixel(
    at: PixelCoord,
    background: Color,
    palette: &Palette,
    opacities: &OpacityTable,
    layers: &LayerMap,
) -> Color {
    layers
        .get(at)
        .map_or(background, |stack| stack.apply(background, palette, opacities))
}

// ============================================================================
// Stroke planning: the view of a layer map the painting loop consumes
// ============================================================================
//
// The painting loop selects one stack (color + opacity per pass) at a time
// and paints every pixel that uses it. Horizontal runs long enough to be
// worth a drag become lines; everything else is clicked. Vertical and
// diagonal run merging belong to the painting loop itself.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::layers::{LayerMap, LayerStack, PixelCoord};

/// Pixels sharing an identical stack, in row-major order.
pub type StackGroups = BTreeMap<LayerStack, Vec<PixelCoord>>;

/// One mouse operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stroke {
    Click(PixelCoord),
    /// Drag from `start` to `end` along one row, both inclusive.
    Line { start: PixelCoord, end: PixelCoord },
}

/// Group mapped pixels by their stack.
pub fn group_by_stack(layers: &LayerMap) -> StackGroups {
    let mut groups = StackGroups::new();
    for (&at, &stack) in layers.iter() {
        groups.entry(stack).or_default().push(at);
    }
    groups
}

/// Collapse horizontal runs of at least `min_line_width` pixels into lines.
///
/// `pixels` must be row-major sorted, which [`group_by_stack`] guarantees.
pub fn plan_strokes(pixels: &[PixelCoord], min_line_width: u32) -> Vec<Stroke> {
    let min_line_width = min_line_width.max(2);
    let mut strokes = Vec::new();
    let mut i = 0;
    while i < pixels.len() {
        let start = pixels[i];
        let mut end = start;
        let mut j = i + 1;
        while j < pixels.len() && pixels[j].y == start.y && pixels[j].x == end.x + 1 {
            end = pixels[j];
            j += 1;
        }
        let run = end.x - start.x + 1;
        if run >= min_line_width {
            strokes.push(Stroke::Line { start, end });
        } else {
            strokes.extend(pixels[i..j].iter().map(|&p| Stroke::Click(p)));
        }
        i = j;
    }
    strokes
}

/// Delays of the painting loop, used for the time estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaintTiming {
    pub click_delay: Duration,
    pub line_delay: Duration,
    /// Time to reach the control panel when switching color or opacity.
    pub control_delay: Duration,
}

impl Default for PaintTiming {
    fn default() -> Self {
        Self {
            click_delay: Duration::from_millis(20),
            line_delay: Duration::from_millis(30),
            control_delay: Duration::from_millis(180),
        }
    }
}

/// Summary of the work a layer map implies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaintStats {
    /// Distinct stacks (each needs its own control setup).
    pub stacks: usize,
    pub painted_pixels: usize,
    /// Brush passes if every pixel is clicked once per layer.
    pub layer_passes: usize,
    /// Clicks left after line collapsing, counted per layer.
    pub clicks: usize,
    /// Lines after collapsing, counted per layer.
    pub lines: usize,
    /// Whether lines beat clicking every pixel.
    pub prefer_lines: bool,
    pub estimated: Duration,
}

/// Count strokes for a map and estimate painting time.
pub fn paint_stats(layers: &LayerMap, min_line_width: u32, timing: &PaintTiming) -> PaintStats {
    let groups = group_by_stack(layers);
    let mut clicks = 0usize;
    let mut lines = 0usize;
    let mut passes = 0usize;
    let mut switches = 0usize;

    for (stack, pixels) in &groups {
        let depth = stack.len();
        for stroke in plan_strokes(pixels, min_line_width) {
            match stroke {
                Stroke::Click(_) => clicks += depth,
                Stroke::Line { .. } => lines += depth,
            }
        }
        passes += pixels.len() * depth;
        switches += depth;
    }

    // Every switch touches two controls (color and opacity); one extra for the brush
    let controls = timing.control_delay * 2 + timing.click_delay * 2;
    let setup = controls * (switches as u32 + 1);
    let with_lines = timing.click_delay * clicks as u32 + timing.line_delay * 5 * lines as u32 + setup;
    let click_only = timing.click_delay * passes as u32 + setup;
    let prefer_lines = with_lines < click_only;

    PaintStats {
        stacks: groups.len(),
        painted_pixels: layers.len(),
        layer_passes: passes,
        clicks: if prefer_lines { clicks } else { passes },
        lines: if prefer_lines { lines } else { 0 },
        prefer_lines,
        estimated: if prefer_lines { with_lines } else { click_only },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Layer;

    fn row(y: u32, xs: std::ops::Range<u32>) -> Vec<PixelCoord> {
        xs.map(|x| PixelCoord::new(x, y)).collect()
    }

    #[test]
    fn long_runs_become_lines() {
        let mut pixels = row(0, 0..12);
        pixels.extend(row(0, 20..22));
        pixels.extend(row(1, 0..3));
        let strokes = plan_strokes(&pixels, 10);
        assert_eq!(strokes[0], Stroke::Line { start: PixelCoord::new(0, 0), end: PixelCoord::new(11, 0) });
        assert_eq!(strokes.len(), 1 + 2 + 3);
        assert!(strokes[1..].iter().all(|s| matches!(s, Stroke::Click(_))));
    }

    #[test]
    fn runs_do_not_wrap_rows() {
        let pixels = vec![PixelCoord::new(9, 0), PixelCoord::new(10, 0), PixelCoord::new(11, 1)];
        let strokes = plan_strokes(&pixels, 2);
        assert_eq!(
            strokes,
            vec![
                Stroke::Line { start: PixelCoord::new(9, 0), end: PixelCoord::new(10, 0) },
                Stroke::Click(PixelCoord::new(11, 1)),
            ]
        );
    }

    #[test]
    fn stats_group_identical_stacks() {
        let a = LayerStack::from_layers(&[Layer::new(0, 0)]);
        let b = LayerStack::from_layers(&[Layer::new(1, 2), Layer::new(4, 0)]);
        let mut entries: Vec<(PixelCoord, LayerStack)> = row(0, 0..40).into_iter().map(|p| (p, a)).collect();
        entries.push((PixelCoord::new(0, 1), b));
        let map: LayerMap = entries.into_iter().collect();

        let groups = group_by_stack(&map);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&a].len(), 40);

        let stats = paint_stats(&map, 10, &PaintTiming::default());
        assert_eq!(stats.stacks, 2);
        assert_eq!(stats.painted_pixels, 41);
        assert_eq!(stats.layer_passes, 42);
        assert!(stats.prefer_lines);
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.clicks, 2);
    }
}

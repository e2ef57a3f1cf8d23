// ============================================================================
// Layer search: greedy per-color layering over a background
// ============================================================================
//
// For one target color, repeatedly pick the (palette color, opacity) pass that
// brings the accumulated color closest to the target. Greedy, not globally
// optimal: each round is O(colors × opacities) and there are at most
// `max_layers` rounds.

use std::collections::HashMap;

use crate::color::{Color, blend};
use crate::config::OptimizerConfig;
use crate::layers::{Layer, LayerStack};
use crate::palette::{OpacityTable, Palette};
use crate::progress::CancelToken;

/// Memo of finished searches keyed by (target, background).
pub type SearchCache = HashMap<(Color, Color), LayerStack>;

/// Result of one search: the chosen stack and the color it converges to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub stack: LayerStack,
    pub color: Color,
}

/// Read-only search context shared by every lookup of one computation.
#[derive(Clone, Copy, Debug)]
pub struct LayerSearch<'a> {
    pub background: Color,
    pub palette: &'a Palette,
    pub opacities: &'a OpacityTable,
    pub config: &'a OptimizerConfig,
}

impl<'a> LayerSearch<'a> {
    pub fn new(
        background: Color,
        palette: &'a Palette,
        opacities: &'a OpacityTable,
        config: &'a OptimizerConfig,
    ) -> Self {
        Self { background, palette, opacities, config }
    }

    /// Find the layer stack for `target`, consulting and filling `cache`.
    ///
    /// A cancelled token yields an empty stack and leaves the cache untouched.
    pub fn find(&self, target: Color, cache: Option<&mut SearchCache>, cancel: &CancelToken) -> LayerStack {
        if cancel.is_cancelled() {
            return LayerStack::EMPTY;
        }

        let Some(cache) = cache else {
            return self.search(target).map_or(LayerStack::EMPTY, |r| r.stack);
        };

        let key = (target, self.background);
        if let Some(hit) = cache.get(&key) {
            return *hit;
        }
        let Some(found) = self.search(target) else {
            return LayerStack::EMPTY;
        };
        if cancel.is_cancelled() {
            return LayerStack::EMPTY;
        }
        cache.insert(key, found.stack);
        found.stack
    }

    /// Uncached search that also returns the converged color.
    pub fn find_with_color(&self, target: Color) -> SearchResult {
        self.search(target).unwrap_or(SearchResult {
            stack: LayerStack::EMPTY,
            color: self.background,
        })
    }

    /// `None` when the background is already close enough (nothing cached).
    fn search(&self, target: Color) -> Option<SearchResult> {
        let cfg = self.config;
        let metric = cfg.metric;

        let mut current = self.background;
        let initial = metric.distance(current, target);
        if initial < cfg.early_stop {
            return None;
        }

        let prune_limit = cfg.prune_factor * initial;
        let mut current_distance = initial;
        let mut stack = LayerStack::EMPTY;

        for round in 0..cfg.max_layers {
            let mut best: Option<(Layer, Color, f32)> = None;

            for (ci, &color) in self.palette.colors().iter().enumerate() {
                if round > 0 && metric.distance(color, target) > prune_limit {
                    continue;
                }
                for (oi, &opacity) in self.opacities.levels().iter().enumerate() {
                    if opacity == 0.0 {
                        continue;
                    }
                    let result = blend(current, color, opacity);
                    let d = metric.distance(result, target);
                    if best.is_none_or(|(_, _, bd)| d < bd) {
                        best = Some((Layer::new(ci as u8, oi as u8), result, d));
                    }
                }
            }

            match best {
                Some((layer, result, d)) if d < current_distance - cfg.improvement => {
                    stack.push(layer);
                    current = result;
                    current_distance = d;
                    if d < cfg.good_enough {
                        break;
                    }
                }
                _ => break,
            }
        }

        Some(SearchResult { stack, color: current })
    }
}

/// Free-function form of [`LayerSearch::find`].
pub fn find_layers(
    target: Color,
    background: Color,
    palette: &Palette,
    opacities: &OpacityTable,
    config: &OptimizerConfig,
    cache: Option<&mut SearchCache>,
    cancel: &CancelToken,
) -> LayerStack {
    LayerSearch::new(background, palette, opacities, config).find(target, cache, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::distance;

    fn bw() -> (Palette, OpacityTable) {
        (
            Palette::new(vec![Color::BLACK, Color::WHITE]),
            OpacityTable::new(vec![1.0, 0.5]),
        )
    }

    #[test]
    fn grey_over_white_takes_half_black() {
        let (palette, opacities) = bw();
        let cfg = OptimizerConfig::default();
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        let result = search.find_with_color(Color::new(128, 128, 128));
        assert_eq!(result.stack, LayerStack::from_layers(&[Layer::new(0, 1)]));
        assert_eq!(result.color, Color::new(127, 127, 127));
        assert!(distance(result.color, Color::new(128, 128, 128)) < cfg.good_enough);
    }

    #[test]
    fn target_equal_to_background_needs_nothing() {
        let palette = Palette::default();
        let opacities = OpacityTable::default();
        let cfg = OptimizerConfig::default();
        let mut cache = SearchCache::new();
        let bg = Color::new(40, 80, 120);
        let stack = find_layers(bg, bg, &palette, &opacities, &cfg, Some(&mut cache), &CancelToken::new());
        assert!(stack.is_empty());
        // Early-stop results are not memoised
        assert!(cache.is_empty());
    }

    #[test]
    fn stack_respects_layer_budget() {
        let palette = Palette::default();
        let opacities = OpacityTable::default();
        for max_layers in 1..=3 {
            let cfg = OptimizerConfig::default().max_layers(max_layers).good_enough(0.0);
            let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
            for target in [Color::new(13, 200, 77), Color::new(90, 10, 250), Color::new(201, 180, 3)] {
                assert!(search.find_with_color(target).stack.len() <= max_layers);
            }
        }
    }

    #[test]
    fn every_layer_improves_by_threshold() {
        let palette = Palette::default();
        let opacities = OpacityTable::default();
        let cfg = OptimizerConfig::default().max_layers(3);
        let bg = Color::new(255, 255, 255);
        let search = LayerSearch::new(bg, &palette, &opacities, &cfg);
        for target in [Color::new(60, 140, 200), Color::new(222, 100, 37), Color::new(5, 5, 90)] {
            let result = search.find_with_color(target);
            let mut acc = bg;
            let mut d = distance(acc, target);
            for layer in result.stack.iter() {
                acc = blend(acc, palette.get(layer.color), opacities.get(layer.opacity));
                let nd = distance(acc, target);
                assert!(nd < d - cfg.improvement, "{} !< {} for {}", nd, d, target);
                d = nd;
            }
            assert_eq!(acc, result.color);
        }
    }

    // Black/white at 25% and 10% over white, aiming at grey 200: black 25%
    // lands on 191, then white 10% lifts it to 197.
    fn grey_200_setup() -> (Palette, OpacityTable, Color) {
        (
            Palette::new(vec![Color::BLACK, Color::WHITE]),
            OpacityTable::new(vec![0.25, 0.1]),
            Color::new(200, 200, 200),
        )
    }

    #[test]
    fn far_colors_are_pruned_after_first_round() {
        let (palette, opacities, target) = grey_200_setup();

        let cfg = OptimizerConfig::default();
        let full = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg).find_with_color(target);
        assert_eq!(full.stack, LayerStack::from_layers(&[Layer::new(0, 0), Layer::new(1, 1)]));
        assert_eq!(full.color, Color::new(197, 197, 197));

        // White sits 55 away from the target; a limit of 0.5 × 55 drops it
        // (and black) from every round after the first
        let cfg = OptimizerConfig::default().prune_factor(0.5);
        let pruned = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg).find_with_color(target);
        assert_eq!(pruned.stack, LayerStack::from_layers(&[Layer::new(0, 0)]));
        assert_eq!(pruned.color, Color::new(191, 191, 191));
    }

    #[test]
    fn good_enough_stops_before_budget() {
        let (palette, opacities, target) = grey_200_setup();
        // 191 is 9 away: under 10 the search stops even though a second
        // layer (197, distance 3) would still improve
        let cfg = OptimizerConfig::default().good_enough(10.0);
        let result = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg).find_with_color(target);
        assert_eq!(result.stack, LayerStack::from_layers(&[Layer::new(0, 0)]));
        assert_eq!(result.color, Color::new(191, 191, 191));
    }

    #[test]
    fn cache_is_filled_and_reused() {
        let (palette, opacities) = bw();
        let cfg = OptimizerConfig::default();
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        let mut cache = SearchCache::new();
        let cancel = CancelToken::new();
        let target = Color::new(128, 128, 128);
        let first = search.find(target, Some(&mut cache), &cancel);
        assert_eq!(cache.get(&(target, Color::WHITE)), Some(&first));

        // A poisoned entry proves the second call is served from the cache
        let poisoned = LayerStack::from_layers(&[Layer::new(1, 0)]);
        cache.insert((target, Color::WHITE), poisoned);
        assert_eq!(search.find(target, Some(&mut cache), &cancel), poisoned);
    }

    #[test]
    fn cancelled_search_returns_empty_without_caching() {
        let (palette, opacities) = bw();
        let cfg = OptimizerConfig::default();
        let mut cache = SearchCache::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let stack = find_layers(Color::BLACK, Color::WHITE, &palette, &opacities, &cfg, Some(&mut cache), &cancel);
        assert!(stack.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_opacity_levels_are_skipped() {
        let palette = Palette::new(vec![Color::BLACK]);
        let opacities = OpacityTable::new(vec![0.0, 1.0]);
        let cfg = OptimizerConfig::default();
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        let result = search.find_with_color(Color::BLACK);
        assert_eq!(result.stack, LayerStack::from_layers(&[Layer::new(0, 1)]));
    }

    #[test]
    fn no_improving_layer_gives_empty_stack() {
        // Only white paint over a white background cannot move toward black
        let palette = Palette::new(vec![Color::WHITE]);
        let opacities = OpacityTable::default();
        let cfg = OptimizerConfig::default();
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        assert!(search.find_with_color(Color::BLACK).stack.is_empty());
    }

    #[test]
    fn search_is_deterministic() {
        let palette = Palette::default();
        let opacities = OpacityTable::default();
        let cfg = OptimizerConfig::default().max_layers(3);
        let search = LayerSearch::new(Color::new(30, 30, 30), &palette, &opacities, &cfg);
        let target = Color::new(177, 66, 201);
        let a = search.find_with_color(target);
        let b = search.find_with_color(target);
        assert_eq!(a, b);
    }
}

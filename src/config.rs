// ============================================================================
// Optimizer configuration: every tunable threshold in one place
// ============================================================================
//
// Values here are empirical. They are threaded through the search, bucketing
// and orchestration code as a parameter; nothing reads them from globals.

use std::time::Duration;

use crate::color::DistanceMetric;

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Maximum layers per pixel (1..=4).
    pub max_layers: usize,
    /// Channel divisor used to build bucket keys. Smaller = finer, slower.
    pub bucket_width: u8,
    /// Skip the search entirely when the background is already this close.
    pub early_stop: f32,
    /// A new layer must improve the distance by more than this.
    pub improvement: f32,
    /// Stop adding layers once the distance drops below this.
    pub good_enough: f32,
    /// After the first layer, ignore palette colors farther than
    /// `prune_factor × initial distance` from the target.
    pub prune_factor: f32,
    /// Neighbour distance above which a pixel is recomputed exactly.
    pub contrast_threshold: f32,
    /// Phase 1 samples at most about this many pixels.
    pub sample_ceiling: usize,
    pub metric: DistanceMetric,
    /// Shard both phases across the rayon pool.
    pub parallel: bool,
    /// Minimum wall time between progress callbacks.
    pub progress_interval: Duration,
    /// On an internal failure, fall back to single-layer nearest-color mapping.
    pub fallback: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_layers: 2,
            bucket_width: 5,
            early_stop: 1.0,
            improvement: 0.05,
            good_enough: 2.0,
            prune_factor: 5.0,
            contrast_threshold: 30.0,
            sample_ceiling: 200_000,
            metric: DistanceMetric::Weighted,
            parallel: false,
            progress_interval: Duration::from_millis(250),
            fallback: true,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_layers(mut self, n: usize) -> Self {
        self.max_layers = n;
        self
    }

    pub fn bucket_width(mut self, w: u8) -> Self {
        self.bucket_width = w;
        self
    }

    pub fn early_stop(mut self, d: f32) -> Self {
        self.early_stop = d;
        self
    }

    pub fn improvement(mut self, d: f32) -> Self {
        self.improvement = d;
        self
    }

    pub fn good_enough(mut self, d: f32) -> Self {
        self.good_enough = d;
        self
    }

    pub fn prune_factor(mut self, f: f32) -> Self {
        self.prune_factor = f;
        self
    }

    pub fn contrast_threshold(mut self, d: f32) -> Self {
        self.contrast_threshold = d;
        self
    }

    pub fn sample_ceiling(mut self, n: usize) -> Self {
        self.sample_ceiling = n;
        self
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn parallel(mut self, on: bool) -> Self {
        self.parallel = on;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn fallback(mut self, on: bool) -> Self {
        self.fallback = on;
        self
    }

    /// Sampling stride for Phase 1 so that `(w/stride)·(h/stride)` stays
    /// under `sample_ceiling`.
    pub fn sample_stride(&self, width: u32, height: u32) -> u32 {
        let total = width as u64 * height as u64;
        let ceiling = self.sample_ceiling.max(1) as u64;
        if total <= ceiling {
            return 1;
        }
        let ratio = total as f64 / ceiling as f64;
        let mut stride = (ratio.sqrt().ceil() as u32).max(1);
        // Partial rows/columns at the edges can push the count over by a few
        while (width.div_ceil(stride) as u64) * (height.div_ceil(stride) as u64) > ceiling {
            stride += 1;
        }
        stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = OptimizerConfig::new()
            .max_layers(3)
            .bucket_width(8)
            .metric(DistanceMetric::Fast)
            .parallel(true);
        assert_eq!(cfg.max_layers, 3);
        assert_eq!(cfg.bucket_width, 8);
        assert_eq!(cfg.metric, DistanceMetric::Fast);
        assert!(cfg.parallel);
        assert_eq!(cfg.early_stop, 1.0);
    }

    #[test]
    fn stride_keeps_sample_under_ceiling() {
        let cfg = OptimizerConfig::new().sample_ceiling(10_000);
        assert_eq!(cfg.sample_stride(100, 100), 1);
        let stride = cfg.sample_stride(1000, 1000);
        assert_eq!(stride, 10);
        let sampled = 1000u32.div_ceil(stride) as u64 * 1000u32.div_ceil(stride) as u64;
        assert!(sampled <= 10_000);
        let stride = cfg.sample_stride(1920, 1080);
        let sampled = 1920u32.div_ceil(stride) as u64 * 1080u32.div_ceil(stride) as u64;
        assert!(sampled <= 10_000, "stride {} samples {}", stride, sampled);
    }
}

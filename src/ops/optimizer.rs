// ============================================================================
// Image optimizer: two-pass layer map construction
// ============================================================================
//
// Phase 1 (0–50%):   sample distinct colors, bucket them, search once per
//                    bucket representative.
// Phase 2 (50–100%): give every pixel its bucket's stack, except pixels next
//                    to a high-contrast neighbour, which are searched exactly.
//
// Both phases optionally shard across the rayon pool. Shards run in waves;
// between waves the calling thread reports progress and polls for cancel, so
// the progress callback never crosses threads. Every shard owns its own
// search cache and produces a disjoint slice of the output, so merging is a
// plain union.

use image::RgbImage;
use rayon::prelude::*;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use crate::color::{Color, blend};
use crate::config::OptimizerConfig;
use crate::layers::{Layer, LayerMap, LayerStack, MAX_STACK, PixelCoord};
use crate::ops::bucketing::{BucketKey, group_colors, representative, sample_colors};
use crate::ops::layer_search::{LayerSearch, SearchCache};
use crate::palette::{MAX_PALETTE_LEN, OpacityTable, Palette};
use crate::progress::{CancelToken, ProgressFn, ProgressReporter};
use crate::{log_err, log_info, log_warn};

/// Precomputed stack per bucket, shared read-only by Phase 2.
type BucketLayers = HashMap<BucketKey, LayerStack>;

// ============================================================================
// Results and errors
// ============================================================================

/// How a layer map computation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerMapOutcome {
    /// Both phases ran to completion.
    Completed(LayerMap),
    /// An internal failure occurred; the map comes from the single-layer
    /// nearest-color path instead.
    Fallback(LayerMap),
    /// The caller cancelled. Not an error, and distinct from an empty image.
    Cancelled,
}

impl LayerMapOutcome {
    pub fn layer_map(&self) -> Option<&LayerMap> {
        match self {
            LayerMapOutcome::Completed(map) | LayerMapOutcome::Fallback(map) => Some(map),
            LayerMapOutcome::Cancelled => None,
        }
    }

    /// The map, or an empty one when cancelled.
    pub fn into_layer_map(self) -> LayerMap {
        match self {
            LayerMapOutcome::Completed(map) | LayerMapOutcome::Fallback(map) => map,
            LayerMapOutcome::Cancelled => LayerMap::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LayerMapOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeError {
    /// Rejected before any work started.
    InvalidInput(String),
    /// Failure inside Phase 1/2 with the fallback path disabled.
    Internal(String),
}

impl fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizeError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            OptimizeError::Internal(e) => write!(f, "Optimizer failure: {}", e),
        }
    }
}

impl std::error::Error for OptimizeError {}

// ============================================================================
// Validation
// ============================================================================

/// Check every input the optimizer indexes into or divides by.
pub fn validate_inputs(
    image: &RgbImage,
    palette: &Palette,
    opacities: &OpacityTable,
    config: &OptimizerConfig,
) -> Result<(), OptimizeError> {
    let invalid = |msg: String| Err(OptimizeError::InvalidInput(msg));

    if image.width() == 0 || image.height() == 0 {
        return invalid(format!("image dimensions cannot be zero ({}x{})", image.width(), image.height()));
    }
    if palette.is_empty() || palette.len() > MAX_PALETTE_LEN {
        return invalid(format!("palette must hold 1..={} colors, got {}", MAX_PALETTE_LEN, palette.len()));
    }
    if opacities.is_empty() || opacities.len() > MAX_PALETTE_LEN {
        return invalid(format!("opacity list must hold 1..={} levels, got {}", MAX_PALETTE_LEN, opacities.len()));
    }
    if let Some(bad) = opacities.levels().iter().find(|o| !(0.0..=1.0).contains(*o)) {
        return invalid(format!("opacity {} is outside 0..=1", bad));
    }
    if config.max_layers == 0 || config.max_layers > MAX_STACK {
        return invalid(format!("max_layers must be 1..={}, got {}", MAX_STACK, config.max_layers));
    }
    if config.bucket_width == 0 {
        return invalid("bucket_width must be at least 1".to_string());
    }
    let thresholds = [
        ("early_stop", config.early_stop),
        ("improvement", config.improvement),
        ("good_enough", config.good_enough),
        ("prune_factor", config.prune_factor),
        ("contrast_threshold", config.contrast_threshold),
    ];
    for (name, value) in thresholds {
        if !value.is_finite() || value < 0.0 {
            return invalid(format!("{} must be a finite non-negative number, got {}", name, value));
        }
    }
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

/// Build the per-pixel layer map for `image` painted over `background`.
///
/// `progress` receives throttled, monotonic updates; returning `true` from it
/// cancels. Cancelling (through the callback or `cancel`) yields
/// [`LayerMapOutcome::Cancelled`] and discards all partial work.
pub fn compute_layer_map(
    image: &RgbImage,
    background: Color,
    palette: &Palette,
    opacities: &OpacityTable,
    config: &OptimizerConfig,
    progress: Option<&mut ProgressFn<'_>>,
    cancel: &CancelToken,
) -> Result<LayerMapOutcome, OptimizeError> {
    validate_inputs(image, palette, opacities, config)?;

    log_info!(
        "Optimizer: {}x{} over {}, {} colors × {} opacities, max {} layers, bucket {}, {}",
        image.width(),
        image.height(),
        background.to_hex(),
        palette.len(),
        opacities.len(),
        config.max_layers,
        config.bucket_width,
        if config.parallel { "parallel" } else { "sequential" }
    );

    let search = LayerSearch::new(background, palette, opacities, config);
    let mut reporter = ProgressReporter::new(progress, config.progress_interval);

    let outcome = run_guarded(image, &search, || run_phases(image, &search, &mut reporter, cancel))?;
    match &outcome {
        LayerMapOutcome::Completed(map) => {
            reporter.report(100, true);
            log_info!(
                "Optimizer: done in {:.2}s, {} pixels, {} layer passes",
                reporter.elapsed().as_secs_f64(),
                map.len(),
                map.layer_count()
            );
        }
        LayerMapOutcome::Fallback(map) => {
            log_warn!("Optimizer: fallback map with {} pixels", map.len());
        }
        LayerMapOutcome::Cancelled => {
            log_info!("Optimizer: cancelled after {:.2}s", reporter.elapsed().as_secs_f64());
        }
    }
    Ok(outcome)
}

/// Run the phases, converting a panic into the fallback map or a typed error.
fn run_guarded<F>(image: &RgbImage, search: &LayerSearch<'_>, phases: F) -> Result<LayerMapOutcome, OptimizeError>
where
    F: FnOnce() -> Option<LayerMap>,
{
    match catch_unwind(AssertUnwindSafe(phases)) {
        Ok(Some(map)) => Ok(LayerMapOutcome::Completed(map)),
        Ok(None) => Ok(LayerMapOutcome::Cancelled),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log_err!("Optimizer: internal failure: {}", msg);
            if search.config.fallback {
                Ok(LayerMapOutcome::Fallback(fallback_quantize(image, search)))
            } else {
                Err(OptimizeError::Internal(msg))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `None` means cancelled.
fn run_phases(
    image: &RgbImage,
    search: &LayerSearch<'_>,
    reporter: &mut ProgressReporter<'_, '_>,
    cancel: &CancelToken,
) -> Option<LayerMap> {
    let phase_start = Instant::now();
    let (buckets, mut cache) = bucket_pass(image, search, reporter, cancel)?;
    log_info!(
        "Optimizer: phase 1, {} buckets in {:.2}s",
        buckets.len(),
        phase_start.elapsed().as_secs_f64()
    );

    let phase_start = Instant::now();
    let map = if search.config.parallel {
        pixel_pass_parallel(image, search, &buckets, reporter, cancel)?
    } else {
        pixel_pass(image, search, &buckets, &mut cache, reporter, cancel)?
    };
    log_info!(
        "Optimizer: phase 2, {} painted pixels in {:.2}s",
        map.len(),
        phase_start.elapsed().as_secs_f64()
    );
    Some(map)
}

// ============================================================================
// Phase 1: bucket pass
// ============================================================================

fn bucket_pass(
    image: &RgbImage,
    search: &LayerSearch<'_>,
    reporter: &mut ProgressReporter<'_, '_>,
    cancel: &CancelToken,
) -> Option<(BucketLayers, SearchCache)> {
    let cfg = search.config;
    let stride = cfg.sample_stride(image.width(), image.height());
    let colors = sample_colors(image, stride);
    let groups = group_colors(colors.iter().copied(), cfg.bucket_width);
    log_info!(
        "Optimizer: sampled {} distinct colors (stride {}) into {} buckets",
        colors.len(),
        stride,
        groups.len()
    );

    let reps: Vec<(BucketKey, Color)> = groups
        .iter()
        .filter_map(|(key, members)| representative(members).map(|c| (*key, c)))
        .collect();

    let mut cache = SearchCache::new();
    let mut buckets = BucketLayers::with_capacity(reps.len());

    if cfg.parallel {
        let threads = rayon::current_num_threads().max(1);
        let shard_len = reps.len().div_ceil(threads * 4).max(1);
        let shards: Vec<&[(BucketKey, Color)]> = reps.chunks(shard_len).collect();
        let mut done = 0;
        for wave in shards.chunks(threads) {
            if cancel.is_cancelled() {
                return None;
            }
            let parts: Vec<Option<BucketLayers>> = wave
                .par_iter()
                .map(|shard| bucket_shard(shard, search, cancel))
                .collect();
            for part in parts {
                buckets.extend(part?);
            }
            done += wave.iter().map(|s| s.len()).sum::<usize>();
            if reporter.report_fraction(0, 50, done, reps.len()) {
                cancel.cancel();
                return None;
            }
        }
    } else {
        for (i, &(key, rep)) in reps.iter().enumerate() {
            if cancel.is_cancelled() {
                return None;
            }
            buckets.insert(key, search.find(rep, Some(&mut cache), cancel));
            if reporter.report_fraction(0, 50, i + 1, reps.len()) {
                cancel.cancel();
                return None;
            }
        }
    }

    if cancel.is_cancelled() {
        return None;
    }
    Some((buckets, cache))
}

/// One worker's slice of buckets, searched with a private cache.
fn bucket_shard(shard: &[(BucketKey, Color)], search: &LayerSearch<'_>, cancel: &CancelToken) -> Option<BucketLayers> {
    let mut cache = SearchCache::new();
    let mut out = BucketLayers::with_capacity(shard.len());
    for &(key, rep) in shard {
        if cancel.is_cancelled() {
            return None;
        }
        out.insert(key, search.find(rep, Some(&mut cache), cancel));
    }
    Some(out)
}

// ============================================================================
// Phase 2: pixel pass
// ============================================================================

fn pixel_pass(
    image: &RgbImage,
    search: &LayerSearch<'_>,
    buckets: &BucketLayers,
    cache: &mut SearchCache,
    reporter: &mut ProgressReporter<'_, '_>,
    cancel: &CancelToken,
) -> Option<LayerMap> {
    let height = image.height();
    let mut map = LayerMap::new();
    for y in 0..height {
        map.merge(process_rows(image, y..y + 1, search, buckets, cache, cancel)?);
        if reporter.report_fraction(50, 100, y as usize + 1, height as usize) {
            cancel.cancel();
            return None;
        }
    }
    Some(map)
}

fn pixel_pass_parallel(
    image: &RgbImage,
    search: &LayerSearch<'_>,
    buckets: &BucketLayers,
    reporter: &mut ProgressReporter<'_, '_>,
    cancel: &CancelToken,
) -> Option<LayerMap> {
    let height = image.height();
    let threads = rayon::current_num_threads().max(1);
    let strip_h = height.div_ceil(threads as u32 * 4).max(1);
    let strips: Vec<Range<u32>> = (0..height)
        .step_by(strip_h as usize)
        .map(|y0| y0..(y0 + strip_h).min(height))
        .collect();

    let mut map = LayerMap::new();
    let mut rows_done = 0usize;
    for wave in strips.chunks(threads) {
        if cancel.is_cancelled() {
            return None;
        }
        let parts: Vec<Option<LayerMap>> = wave
            .par_iter()
            .map(|rows| {
                let mut cache = SearchCache::new();
                process_rows(image, rows.clone(), search, buckets, &mut cache, cancel)
            })
            .collect();
        for part in parts {
            map.merge(part?);
        }
        rows_done += wave.iter().map(|r| r.len()).sum::<usize>();
        if reporter.report_fraction(50, 100, rows_done, height as usize) {
            cancel.cancel();
            return None;
        }
    }
    Some(map)
}

/// Assign stacks for every pixel of `rows`. `None` when cancelled.
fn process_rows(
    image: &RgbImage,
    rows: Range<u32>,
    search: &LayerSearch<'_>,
    buckets: &BucketLayers,
    cache: &mut SearchCache,
    cancel: &CancelToken,
) -> Option<LayerMap> {
    let cfg = search.config;
    let mut map = LayerMap::new();
    for y in rows {
        if cancel.is_cancelled() {
            return None;
        }
        for x in 0..image.width() {
            let color = Color::from(image.get_pixel(x, y));
            let bucketed = if is_important(image, x, y, color, cfg) {
                None
            } else {
                buckets.get(&BucketKey::of(color, cfg.bucket_width)).copied()
            };
            // Unsampled buckets (downsampled images) are searched exactly too
            let stack = match bucketed {
                Some(stack) => stack,
                None => search.find(color, Some(cache), cancel),
            };
            map.insert(PixelCoord::new(x, y), stack);
        }
    }
    if cancel.is_cancelled() {
        return None;
    }
    Some(map)
}

/// A pixel is important when any in-bounds 4-neighbour differs from it by
/// more than the contrast threshold.
pub fn is_important(image: &RgbImage, x: u32, y: u32, color: Color, config: &OptimizerConfig) -> bool {
    let (w, h) = image.dimensions();
    let neighbors = [
        (x.wrapping_sub(1), y),
        (x + 1, y),
        (x, y.wrapping_sub(1)),
        (x, y + 1),
    ];
    neighbors.into_iter().any(|(nx, ny)| {
        nx < w
            && ny < h
            && config.metric.distance(color, Color::from(image.get_pixel(nx, ny))) > config.contrast_threshold
    })
}

// ============================================================================
// Fallback: single-layer nearest palette color
// ============================================================================

/// Map every pixel to the nearest palette color at the strongest opacity,
/// keeping only pixels that the layer moves closer to their target.
pub fn fallback_quantize(image: &RgbImage, search: &LayerSearch<'_>) -> LayerMap {
    let metric = search.config.metric;
    let background = search.background;
    let Some(opacity) = search.opacities.strongest() else {
        return LayerMap::new();
    };
    let strength = search.opacities.get(opacity);

    let mut memo: HashMap<Color, LayerStack> = HashMap::new();
    let mut map = LayerMap::new();
    for (x, y, px) in image.enumerate_pixels() {
        let target = Color::from(px);
        let stack = *memo.entry(target).or_insert_with(|| {
            let bg_distance = metric.distance(background, target);
            if bg_distance < search.config.early_stop {
                return LayerStack::EMPTY;
            }
            let Some(index) = search.palette.nearest(target, metric) else {
                return LayerStack::EMPTY;
            };
            let painted = blend(background, search.palette.get(index), strength);
            if metric.distance(painted, target) < bg_distance {
                LayerStack::from_layers(&[Layer::new(index, opacity)])
            } else {
                LayerStack::EMPTY
            }
        });
        map.insert(PixelCoord::new(x, y), stack);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Duration;

    fn bw_tables() -> (Palette, OpacityTable) {
        (
            Palette::new(vec![Color::BLACK, Color::WHITE]),
            OpacityTable::new(vec![1.0, 0.5]),
        )
    }

    #[test]
    fn rejects_invalid_inputs() {
        let (palette, opacities) = bw_tables();
        let cfg = OptimizerConfig::default();
        let cancel = CancelToken::new();
        let empty = RgbImage::new(0, 5);
        let err = compute_layer_map(&empty, Color::WHITE, &palette, &opacities, &cfg, None, &cancel);
        assert!(matches!(err, Err(OptimizeError::InvalidInput(_))));

        let img = RgbImage::new(2, 2);
        let none = Palette::new(Vec::new());
        assert!(validate_inputs(&img, &none, &opacities, &cfg).is_err());
        assert!(validate_inputs(&img, &palette, &OpacityTable::new(Vec::new()), &cfg).is_err());
        assert!(validate_inputs(&img, &palette, &OpacityTable::new(vec![1.5]), &cfg).is_err());
        assert!(validate_inputs(&img, &palette, &opacities, &cfg.clone().max_layers(0)).is_err());
        assert!(validate_inputs(&img, &palette, &opacities, &cfg.clone().max_layers(MAX_STACK + 1)).is_err());
        assert!(validate_inputs(&img, &palette, &opacities, &cfg.clone().bucket_width(0)).is_err());
        assert!(validate_inputs(&img, &palette, &opacities, &cfg.clone().improvement(f32::NAN)).is_err());
        assert!(validate_inputs(&img, &palette, &opacities, &cfg).is_ok());
    }

    #[test]
    fn importance_checks_border_neighbours() {
        let mut img = RgbImage::from_pixel(3, 3, Rgb([200, 200, 200]));
        img.put_pixel(1, 0, Rgb([0, 0, 0]));
        let cfg = OptimizerConfig::default();
        assert!(is_important(&img, 0, 0, Color::new(200, 200, 200), &cfg));
        assert!(is_important(&img, 1, 1, Color::new(200, 200, 200), &cfg));
        assert!(!is_important(&img, 2, 2, Color::new(200, 200, 200), &cfg));
    }

    #[test]
    fn panic_in_phases_uses_fallback() {
        let (palette, opacities) = bw_tables();
        let cfg = OptimizerConfig::default();
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        let img = RgbImage::from_pixel(2, 1, Rgb([10, 10, 10]));
        let outcome = run_guarded(&img, &search, || panic!("out of memory")).unwrap();
        let LayerMapOutcome::Fallback(map) = outcome else {
            panic!("expected fallback, got {:?}", outcome);
        };
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(PixelCoord::new(0, 0)),
            Some(&LayerStack::from_layers(&[Layer::new(0, 0)]))
        );
    }

    #[test]
    fn panic_without_fallback_is_typed_error() {
        let (palette, opacities) = bw_tables();
        let cfg = OptimizerConfig::default().fallback(false);
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        let img = RgbImage::new(1, 1);
        let err = run_guarded(&img, &search, || panic!("boom")).unwrap_err();
        assert_eq!(err, OptimizeError::Internal("boom".to_string()));
    }

    #[test]
    fn fallback_skips_pixels_already_matching_background() {
        let (palette, opacities) = bw_tables();
        let cfg = OptimizerConfig::default();
        let search = LayerSearch::new(Color::WHITE, &palette, &opacities, &cfg);
        let mut img = RgbImage::from_pixel(2, 1, Rgb([255, 255, 255]));
        img.put_pixel(1, 0, Rgb([30, 30, 30]));
        let map = fallback_quantize(&img, &search);
        assert_eq!(map.len(), 1);
        assert!(map.get(PixelCoord::new(1, 0)).is_some());
    }

    #[test]
    fn callback_cancel_in_phase_two_discards_work() {
        let (palette, opacities) = bw_tables();
        let cfg = OptimizerConfig::default().progress_interval(Duration::ZERO);
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 90]));
        let cancel = CancelToken::new();
        let mut cb = |u: crate::progress::ProgressUpdate| u.percent > 60;
        let outcome =
            compute_layer_map(&img, Color::WHITE, &palette, &opacities, &cfg, Some(&mut cb), &cancel).unwrap();
        assert!(outcome.is_cancelled());
        assert!(cancel.is_cancelled());
        assert!(outcome.into_layer_map().is_empty());
    }
}

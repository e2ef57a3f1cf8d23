use image::RgbImage;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::color::Color;
use crate::config::OptimizerConfig;
use crate::io::{CacheKey, cache_path_for, load_image_sync, load_layer_cache, save_layer_cache};
use crate::layers::LayerMap;
use crate::logger::JobScope;
use crate::ops::optimizer::{LayerMapOutcome, OptimizeError, compute_layer_map};
use crate::ops::simulate::simulate;
use crate::palette::{OpacityTable, Palette};
use crate::progress::{CancelToken, ProgressFn};
use crate::{log_info, log_warn};

/// Where a job's layer map came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapSource {
    Cache,
    Computed,
    Fallback,
}

/// A computed layer map plus its provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobResult {
    pub layers: LayerMap,
    pub source: MapSource,
}

/// One image prepared for painting.
pub struct PaintJob {
    pub id: Uuid,
    pub image: RgbImage,
    pub background: Color,
    pub palette: Palette,
    pub opacities: OpacityTable,
    pub config: OptimizerConfig,
    pub path: PathBuf,
    /// Read and write the `.layers.bin` file beside `path`.
    pub use_cache: bool,

    /// File name, for messages.
    pub name: String,
}

impl PaintJob {
    /// Load `path`, compositing transparency onto `background`.
    pub fn from_file(path: &Path, background: Color) -> Result<Self, String> {
        let image = load_image_sync(path, background)?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        Ok(Self {
            id: Uuid::new_v4(),
            image,
            background,
            palette: Palette::default(),
            opacities: OpacityTable::default(),
            config: OptimizerConfig::default(),
            path: path.to_path_buf(),
            use_cache: true,
            name,
        })
    }

    pub fn with_palette(mut self, palette: Palette, opacities: OpacityTable) -> Self {
        self.palette = palette;
        self.opacities = opacities;
        self
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cache(mut self, on: bool) -> Self {
        self.use_cache = on;
        self
    }

    pub fn cache_path(&self) -> PathBuf {
        cache_path_for(&self.path)
    }

    /// Short form of `id` used to tag this job's log lines.
    pub fn log_tag(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.image, self.background, &self.palette, &self.opacities, &self.config)
    }

    /// Produce the layer map: from the cache when possible, otherwise by
    /// running the optimizer. Completed results are written back to the cache
    /// on a best-effort basis. `Ok(None)` means cancelled.
    pub fn compute(
        &self,
        progress: Option<&mut ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<Option<JobResult>, OptimizeError> {
        let _scope = JobScope::enter(self.log_tag());
        let cache = self.use_cache.then(|| self.cache_path());
        let key = self.cache_key();

        if let Some(path) = &cache
            && let Some(layers) = load_layer_cache(path, &key)
        {
            log_info!("{}: using cached layers", self.name);
            return Ok(Some(JobResult { layers, source: MapSource::Cache }));
        }

        log_info!("{}: computing layers (job {})", self.name, self.id);
        let outcome = compute_layer_map(
            &self.image,
            self.background,
            &self.palette,
            &self.opacities,
            &self.config,
            progress,
            cancel,
        )?;

        match outcome {
            LayerMapOutcome::Completed(layers) => {
                if let Some(path) = &cache
                    && let Err(e) = save_layer_cache(path, &key, &layers)
                {
                    log_warn!("{}: could not write cache {}: {}", self.name, path.display(), e);
                }
                Ok(Some(JobResult { layers, source: MapSource::Computed }))
            }
            // Fallback maps are not worth persisting
            LayerMapOutcome::Fallback(layers) => Ok(Some(JobResult { layers, source: MapSource::Fallback })),
            LayerMapOutcome::Cancelled => Ok(None),
        }
    }

    /// Preview of the painted canvas for `layers`.
    pub fn preview(&self, layers: &LayerMap) -> RgbImage {
        simulate(&self.image, self.background, &self.palette, &self.opacities, layers)
    }
}

use image::{ImageError, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::color::{Color, DistanceMetric, blend};
use crate::config::OptimizerConfig;
use crate::layers::{LayerMap, LayerStack, PixelCoord};
use crate::palette::{OpacityTable, Palette};
use crate::{log_info, log_warn};

// ============================================================================
// IMAGE LOADING / PREVIEW OUTPUT
// ============================================================================

/// Load an image file as opaque RGB, compositing any transparency onto
/// `background` with the same truncating blend the canvas uses.
pub fn load_image_sync(path: &Path, background: Color) -> Result<RgbImage, String> {
    let img = image::open(path).map_err(|e| format!("could not open '{}': {}", path.display(), e))?;
    Ok(flatten_onto(&img.to_rgba8(), background))
}

/// Composite an RGBA buffer onto a solid background.
pub fn flatten_onto(rgba: &image::RgbaImage, background: Color) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        match p[3] {
            255 => image::Rgb([p[0], p[1], p[2]]),
            0 => background.into(),
            a => blend(background, Color::new(p[0], p[1], p[2]), a as f32 / 255.0).into(),
        }
    })
}

/// Write a preview as PNG (or whatever the extension says).
pub fn save_preview(preview: &RgbImage, path: &Path) -> Result<(), ImageError> {
    preview.save(path)
}

// ============================================================================
// LAYER CACHE FILE FORMAT
// ============================================================================

/// Magic header for the layer cache format.
const CACHE_MAGIC: &str = "PLM1";
/// Bumped whenever the record layout or search semantics change.
pub const CACHE_VERSION: u32 = 1;
/// Appended to the source file name: `photo.png` → `photo.png.layers.bin`.
pub const CACHE_SUFFIX: &str = ".layers.bin";

/// Identity of one computation's inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    /// BLAKE3 of dimensions + pixel bytes.
    pub image_digest: [u8; 32],
    /// BLAKE3 of palette, opacities and optimizer thresholds.
    pub settings_digest: [u8; 32],
    pub background: Color,
    pub width: u32,
    pub height: u32,
    /// Table sizes and layer budget every stored stack must fit.
    pub palette_len: u16,
    pub opacity_len: u16,
    pub max_layers: u8,
}

/// The inputs that can change a computed map. Execution switches
/// (`parallel`, `fallback`, `progress_interval`) are left out.
#[derive(Serialize)]
struct SearchSettings<'a> {
    palette: &'a Palette,
    opacities: &'a OpacityTable,
    max_layers: usize,
    bucket_width: u8,
    early_stop: f32,
    improvement: f32,
    good_enough: f32,
    prune_factor: f32,
    contrast_threshold: f32,
    sample_ceiling: usize,
    metric: DistanceMetric,
}

impl<'a> SearchSettings<'a> {
    fn new(palette: &'a Palette, opacities: &'a OpacityTable, config: &OptimizerConfig) -> Self {
        Self {
            palette,
            opacities,
            max_layers: config.max_layers,
            bucket_width: config.bucket_width,
            early_stop: config.early_stop,
            improvement: config.improvement,
            good_enough: config.good_enough,
            prune_factor: config.prune_factor,
            contrast_threshold: config.contrast_threshold,
            sample_ceiling: config.sample_ceiling,
            metric: config.metric,
        }
    }
}

impl CacheKey {
    pub fn new(
        image: &RgbImage,
        background: Color,
        palette: &Palette,
        opacities: &OpacityTable,
        config: &OptimizerConfig,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&image.width().to_le_bytes());
        hasher.update(&image.height().to_le_bytes());
        hasher.update(image.as_raw());
        let image_digest = *hasher.finalize().as_bytes();

        let settings = bincode::serialize(&SearchSettings::new(palette, opacities, config)).unwrap_or_default();
        let settings_digest = *blake3::hash(&settings).as_bytes();

        Self {
            image_digest,
            settings_digest,
            background,
            width: image.width(),
            height: image.height(),
            palette_len: palette.len().min(u16::MAX as usize) as u16,
            opacity_len: opacities.len().min(u16::MAX as usize) as u16,
            max_layers: config.max_layers.min(u8::MAX as usize) as u8,
        }
    }
}

/// On-disk record.
#[derive(Serialize, Deserialize)]
struct LayerCacheFile {
    magic: String,
    version: u32,
    key: CacheKey,
    /// Seconds since the Unix epoch when the record was written.
    timestamp: u64,
    layers: LayerMap,
}

/// Metadata of a cache record, readable without trusting its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheInfo {
    pub version: u32,
    pub timestamp: u64,
    pub background: Color,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Serialize(String),
    Incompatible(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "IO error: {}", e),
            CacheError::Serialize(e) => write!(f, "Serialization error: {}", e),
            CacheError::Incompatible(e) => write!(f, "Incompatible cache: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for CacheError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CacheError::Serialize(e.to_string())
    }
}

/// Cache file path for a source image.
pub fn cache_path_for(image_path: &Path) -> PathBuf {
    let mut name = image_path.as_os_str().to_owned();
    name.push(CACHE_SUFFIX);
    PathBuf::from(name)
}

/// Write a cache record. Writes to a temporary sibling and renames it into
/// place so a crash never leaves a half-written record under the real name.
pub fn save_layer_cache(path: &Path, key: &CacheKey, layers: &LayerMap) -> Result<(), CacheError> {
    let record = LayerCacheFile {
        magic: CACHE_MAGIC.to_string(),
        version: CACHE_VERSION,
        key: *key,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        layers: layers.clone(),
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        bincode::serialize_into(&mut writer, &record)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    log_info!("Cache: wrote {} pixels to {}", layers.len(), path.display());
    Ok(())
}

fn read_record(path: &Path) -> Result<LayerCacheFile, CacheError> {
    // Slice decoding bounds every length prefix by the file size
    let bytes = std::fs::read(path)?;
    let record: LayerCacheFile = bincode::deserialize(&bytes)?;
    if record.magic != CACHE_MAGIC {
        return Err(CacheError::Incompatible(format!("bad magic '{}'", record.magic)));
    }
    if record.version != CACHE_VERSION {
        return Err(CacheError::Incompatible(format!(
            "version {} (expected {})",
            record.version, CACHE_VERSION
        )));
    }
    Ok(record)
}

/// Read a record's metadata.
pub fn read_cache_info(path: &Path) -> Result<CacheInfo, CacheError> {
    let record = read_record(path)?;
    Ok(CacheInfo {
        version: record.version,
        timestamp: record.timestamp,
        background: record.key.background,
        width: record.key.width,
        height: record.key.height,
    })
}

/// Load the cached map for `key`. Any mismatch, corruption or I/O problem is
/// a miss (`None`); only the reason is logged.
pub fn load_layer_cache(path: &Path, key: &CacheKey) -> Option<LayerMap> {
    if !path.exists() {
        return None;
    }
    let record = match read_record(path) {
        Ok(r) => r,
        Err(e) => {
            log_warn!("Cache: ignoring {}: {}", path.display(), e);
            return None;
        }
    };

    let stored = &record.key;
    let reason = if stored.background != key.background {
        Some(format!(
            "background {} != {}",
            stored.background.to_hex(),
            key.background.to_hex()
        ))
    } else if (stored.width, stored.height) != (key.width, key.height) {
        Some(format!(
            "size {}x{} != {}x{}",
            stored.width, stored.height, key.width, key.height
        ))
    } else if stored.image_digest != key.image_digest {
        Some("image content changed".to_string())
    } else if stored.settings_digest != key.settings_digest {
        Some("palette or optimizer settings changed".to_string())
    } else {
        None
    };

    if let Some(reason) = reason {
        log_info!("Cache: miss for {} ({})", path.display(), reason);
        return None;
    }
    if let Some(problem) = record.layers.iter().find_map(|(at, stack)| invalid_entry(*at, stack, key)) {
        log_warn!("Cache: ignoring {}: {}", path.display(), problem);
        return None;
    }

    log_info!("Cache: hit for {} ({} pixels)", path.display(), record.layers.len());
    Some(record.layers)
}

/// Why a stored entry cannot belong to a map computed for `key`.
fn invalid_entry(at: PixelCoord, stack: &LayerStack, key: &CacheKey) -> Option<String> {
    if at.x >= key.width || at.y >= key.height {
        return Some(format!("pixel ({}, {}) is outside the image", at.x, at.y));
    }
    if stack.len() > key.max_layers as usize {
        return Some(format!("pixel ({}, {}) has {} layers (max {})", at.x, at.y, stack.len(), key.max_layers));
    }
    stack.iter().find_map(|l| {
        if l.color as u16 >= key.palette_len {
            Some(format!("palette index {} at ({}, {})", l.color, at.x, at.y))
        } else if l.opacity as u16 >= key.opacity_len {
            Some(format!("opacity index {} at ({}, {})", l.opacity, at.x, at.y))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};

    #[test]
    fn cache_path_appends_suffix() {
        assert_eq!(
            cache_path_for(Path::new("shots/photo.png")),
            PathBuf::from("shots/photo.png.layers.bin")
        );
    }

    #[test]
    fn flatten_composites_alpha() {
        let mut rgba = RgbaImage::new(3, 1);
        rgba.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 0]));
        rgba.put_pixel(2, 0, Rgba([0, 0, 0, 51]));
        let rgb = flatten_onto(&rgba, Color::WHITE);
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
        // 255 * (1 - 0.2) lands on 204 or just under it in f32
        let half = rgb.get_pixel(2, 0);
        assert!((203..=204).contains(&half[0]), "got {:?}", half);
        assert_eq!(half[0], half[1]);
    }

    #[test]
    fn key_changes_with_inputs() {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let palette = Palette::default();
        let opacities = OpacityTable::default();
        let cfg = OptimizerConfig::default();
        let a = CacheKey::new(&img, Color::WHITE, &palette, &opacities, &cfg);
        let b = CacheKey::new(&img, Color::WHITE, &palette, &opacities, &cfg);
        assert_eq!(a, b);

        let mut other = img.clone();
        other.put_pixel(0, 0, Rgb([9, 9, 9]));
        assert_ne!(a.image_digest, CacheKey::new(&other, Color::WHITE, &palette, &opacities, &cfg).image_digest);

        let finer = cfg.clone().bucket_width(2);
        assert_ne!(a.settings_digest, CacheKey::new(&img, Color::WHITE, &palette, &opacities, &finer).settings_digest);

        let stricter = cfg.clone().good_enough(0.5);
        assert_ne!(a.settings_digest, CacheKey::new(&img, Color::WHITE, &palette, &opacities, &stricter).settings_digest);

        // Execution switches do not change the result, so they share a cache
        let execution = cfg
            .clone()
            .parallel(true)
            .fallback(false)
            .progress_interval(std::time::Duration::from_secs(5));
        assert_eq!(a, CacheKey::new(&img, Color::WHITE, &palette, &opacities, &execution));
    }
}

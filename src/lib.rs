//! Plan how to paint an image with a small palette of brush colors at a few
//! opacity levels, by stacking translucent layers per pixel.

#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod color;
pub mod config;
pub mod io;
pub mod layers;
pub mod ops;
pub mod palette;
pub mod progress;
pub mod project;

pub use color::{Color, DistanceMetric, blend, distance};
pub use config::OptimizerConfig;
pub use layers::{Layer, LayerMap, LayerStack, MAX_STACK, PixelCoord};
pub use ops::bucketing::{BucketKey, group_colors, representative};
pub use ops::layer_search::{LayerSearch, SearchCache, find_layers};
pub use ops::optimizer::{LayerMapOutcome, OptimizeError, compute_layer_map};
pub use ops::simulate::simulate;
pub use palette::{OpacityTable, Palette};
pub use progress::{CancelToken, ProgressUpdate};
pub use project::PaintJob;

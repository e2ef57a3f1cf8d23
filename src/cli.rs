// ============================================================================
// PaintLayers CLI: plan layered paint jobs from image files
// ============================================================================
//
// Usage examples:
//   PaintLayers -i photo.png                          (preview → photo_preview.png)
//   PaintLayers -i photo.png -o preview.png --max-layers 3
//   PaintLayers -i "shots/*.jpg" --output-dir previews/ --parallel
//   PaintLayers -i art.png --background "#1E1E1E" --bucket-width 3 --no-cache
//
// For every input the layer map is loaded from the cache beside the image or
// computed, a simulated preview is written, and paint statistics are printed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use paintlayers::color::{Color, DistanceMetric};
use paintlayers::config::OptimizerConfig;
use paintlayers::io::save_preview;
use paintlayers::ops::simulate::verify;
use paintlayers::ops::strokes::{PaintTiming, paint_stats};
use paintlayers::palette::{OpacityTable, Palette};
use paintlayers::progress::{CancelToken, ProgressUpdate};
use paintlayers::project::{MapSource, PaintJob};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Layered palette painter.
///
/// Works out which brush colors and opacities to stack on each pixel so an
/// image can be painted with the in-game palette, and previews the result.
#[derive(Parser, Debug)]
#[command(name = "PaintLayers", about = "Plan layered palette paintings and preview them")]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Preview output path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for previews in batch mode.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Canvas background color.
    #[arg(short, long, default_value = "#FFFFFF", value_parser = parse_color)]
    pub background: Color,

    /// Replace the built-in palette with a comma-separated hex list.
    #[arg(long, value_name = "HEX,HEX,...")]
    pub palette: Option<String>,

    /// Replace the built-in opacity levels (fractions, strongest first).
    #[arg(long, value_delimiter = ',', value_name = "1.0,0.75,...")]
    pub opacities: Option<Vec<f32>>,

    /// Maximum layers per pixel.
    #[arg(short = 'l', long, default_value_t = 2, value_name = "1-4")]
    pub max_layers: usize,

    /// Bucket width for color grouping. Smaller = finer, slower.
    #[arg(long, default_value_t = 5)]
    pub bucket_width: u8,

    /// Neighbour contrast above which a pixel is searched exactly.
    #[arg(long, default_value_t = 30.0)]
    pub contrast: f32,

    /// Stop searching once a pixel is this close to its target.
    #[arg(long, default_value_t = 2.0)]
    pub good_enough: f32,

    /// Color distance: weighted or fast.
    #[arg(long, default_value = "weighted")]
    pub metric: DistanceMetric,

    /// Shard the optimizer across all cores.
    #[arg(short, long)]
    pub parallel: bool,

    /// Ignore and do not write the .layers.bin cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Shortest horizontal run painted as a line instead of clicks.
    #[arg(long, default_value_t = 10)]
    pub min_line_width: u32,

    /// Print progress and timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_color(s: &str) -> Result<Color, String> {
    s.parse::<Color>().map_err(|e| e.to_string())
}

impl CliArgs {
    fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig::new()
            .max_layers(self.max_layers)
            .bucket_width(self.bucket_width)
            .contrast_threshold(self.contrast)
            .good_enough(self.good_enough)
            .metric(self.metric)
            .parallel(self.parallel)
    }

    fn tables(&self) -> Result<(Palette, OpacityTable), String> {
        let palette = match &self.palette {
            Some(list) => Palette::from_hex_list(list).map_err(|e| e.to_string())?,
            None => Palette::default(),
        };
        let opacities = match &self.opacities {
            Some(levels) => OpacityTable::new(levels.clone()),
            None => OpacityTable::default(),
        };
        Ok((palette, opacities))
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all inputs and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let (palette, opacities) = match args.tables() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = args.optimizer_config();

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), multi)
        else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            any_failure = true;
            continue;
        };

        let file_start = Instant::now();
        match run_one(input_path, &output_path, &args, &palette, &opacities, &config) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file pipeline
// ============================================================================

fn run_one(
    input: &Path,
    output: &Path,
    args: &CliArgs,
    palette: &Palette,
    opacities: &OpacityTable,
    config: &OptimizerConfig,
) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let job = PaintJob::from_file(input, args.background)?
        .with_palette(palette.clone(), opacities.clone())
        .with_config(config.clone())
        .with_cache(!args.no_cache);

    // -- Step 2: Layer map (cache or optimizer) --------------------------
    let cancel = CancelToken::new();
    let verbose = args.verbose;
    let mut on_progress = |u: ProgressUpdate| {
        if verbose {
            eprint!(
                "\r  {:>3}%  elapsed {:>5.1}s  remaining {:>5.1}s",
                u.percent, u.elapsed_secs, u.remaining_secs
            );
            let _ = std::io::stderr().flush();
        }
        false
    };
    let result = job
        .compute(Some(&mut on_progress), &cancel)
        .map_err(|e| e.to_string())?;
    if verbose {
        eprintln!();
    }
    let Some(result) = result else {
        return Err("cancelled".to_string());
    };
    match result.source {
        MapSource::Cache => println!("  layers loaded from cache"),
        MapSource::Fallback => println!("  warning: optimizer failed, using single-layer fallback"),
        MapSource::Computed => {}
    }

    // -- Step 3: Preview + statistics ------------------------------------
    let preview = job.preview(&result.layers);
    save_preview(&preview, output).map_err(|e| format!("save failed: {}", e))?;

    let report = verify(&job.image, &preview, &result.layers, config.metric);
    let stats = paint_stats(&result.layers, args.min_line_width, &PaintTiming::default());

    let (w, h) = job.image.dimensions();
    println!("  Dimensions:              {} x {}", w, h);
    println!("  Layer combinations:      {}", stats.stacks);
    println!("  Pixels to paint:         {}", stats.painted_pixels);
    println!("  Brush passes:            {}", stats.layer_passes);
    println!("  Clicks:                  {}", stats.clicks);
    println!("  Lines:                   {}", stats.lines);
    println!("  Est. painting time:      {}", format_duration(stats.estimated));
    println!(
        "  Preview error:           mean {:.2}, max {:.2}",
        report.mean_distance, report.max_distance
    );
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    // Never treat our own cache files as inputs
                    if entry.to_string_lossy().ends_with(paintlayers::io::CACHE_SUFFIX) {
                        continue;
                    }
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the preview path for one input.
///
/// Priority:
/// 1. `--output` (explicit path, single-file input only)
/// 2. `--output-dir` (batch directory, `<stem>_preview.png`)
/// 3. Next to the input as `<stem>_preview.png`
///
/// In a batch `--output` is ignored so previews never overwrite each other.
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>, batch: bool) -> Option<PathBuf> {
    if let Some(out) = output.filter(|_| !batch) {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let file = format!("{}_preview.png", stem);

    if let Some(dir) = output_dir {
        return Some(dir.join(file));
    }
    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(file))
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

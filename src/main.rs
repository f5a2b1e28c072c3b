use clap::Parser;
use log::{error, info};
use std::path::{Path, PathBuf};

mod analysis;
mod input;
mod output;
mod overlay;
mod schemas;

use analysis::segmentation::{CellSegmenter, PrecomputedLabels, ThresholdSegmenter};
use analysis::stack::VoxelSize;
use analysis::threshold::ThresholdMethod;
use analysis::{report_rows, run_analysis, AnalysisConfig};
use input::{read_labels, read_stack};
use output::{
    table_extension, unique_output_path, write_cell_outlines_geojson, write_cell_table,
    write_run_summary, write_spot_report,
};
use schemas::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "fishdist")]
#[command(author, version, about)]
struct Args {
    /// Multi-channel stack as a [channel, z, y, x] .npy array
    stack: PathBuf,

    /// Noise tolerance of the spot maximum finder
    #[arg(long)]
    tolerance: f32,

    /// Keep maxima whose tolerance plateau touches the image edge
    #[arg(long, default_value_t = false)]
    include_edge_maxima: bool,

    #[arg(long, default_value_t = 100.0)]
    min_region_area: f32,

    /// Rolling-ball radius in pixels for background subtraction (0 disables it)
    #[arg(long, default_value_t = 150.0)]
    rolling_ball_radius: f32,

    #[arg(long, value_enum, default_value_t = ThresholdMethod::Yen)]
    threshold_method: ThresholdMethod,

    /// Fixed foreground threshold, overriding --threshold-method
    #[arg(long, default_value = None)]
    threshold_level: Option<f32>,

    #[arg(long, default_value_t = 100.0)]
    ray_length: f32,

    /// Pixel size in microns
    #[arg(long, default_value_t = 1.0)]
    pixel_width: f32,

    #[arg(long, default_value_t = 1.0)]
    pixel_height: f32,

    /// Slice spacing in microns
    #[arg(long, default_value_t = 1.0)]
    pixel_depth: f32,

    #[arg(long, default_value_t = 1)]
    fish_channel: usize,

    #[arg(long, default_value_t = 2)]
    dapi_channel: usize,

    /// Precomputed 2D label image (.npy) for the DAPI projection, e.g. from cellpose
    #[arg(long, default_value = None)]
    labels: Option<PathBuf>,

    /// Smallest cell, in pixels, when segmenting by threshold
    #[arg(long, default_value_t = 500)]
    min_cell_area: usize,

    /// Defaults to the stack's path without its extension, suffixed with _Output
    #[arg(long, default_value = None)]
    output_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_fmt: OutputFormat,

    /// Skip the overlay and cross-section images
    #[arg(long, default_value_t = false)]
    no_images: bool,

    #[arg(long, default_value = None)]
    nthreads: Option<usize>,
}

fn default_output_dir(stack: &Path) -> PathBuf {
    let stem = stack.with_extension("");
    let mut name = stem.into_os_string();
    name.push("_Output");
    return PathBuf::from(name);
}

// Log and carry on when an output cannot be written.
fn report_write(what: &str, path: &Path, result: anyhow::Result<()>) {
    match result {
        Ok(()) => info!("Wrote {} to {}", what, path.display()),
        Err(err) => error!("Unable to write {} to {}: {:#}", what, path.display(), err),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()?;
    }
    info!("Using {} threads", rayon::current_num_threads());

    let voxel = VoxelSize::new(args.pixel_width, args.pixel_height, args.pixel_depth);
    voxel.validate()?;
    let (fish, dapi) = read_stack(&args.stack, args.fish_channel, args.dapi_channel, voxel)?;
    info!(
        "Read {} slices of {} x {} pixels from {}",
        dapi.nslices(),
        dapi.width(),
        dapi.height(),
        args.stack.display()
    );

    let segmenter: Box<dyn CellSegmenter> = match &args.labels {
        Some(path) => Box::new(PrecomputedLabels::new(read_labels(path)?)),
        None => Box::new(ThresholdSegmenter {
            method: ThresholdMethod::Otsu,
            min_area: args.min_cell_area,
        }),
    };

    let config = AnalysisConfig {
        noise_tolerance: args.tolerance,
        exclude_edge_maxima: !args.include_edge_maxima,
        min_region_area: args.min_region_area,
        rolling_ball_radius: args.rolling_ball_radius,
        threshold_method: args.threshold_method,
        threshold_level: args.threshold_level,
        ray_length: args.ray_length,
    };
    config.validate()?;

    let result = run_analysis(&fish, &dapi, segmenter.as_ref(), &config)?;
    info!("Measured {} spots", report_rows(&result).len());

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&args.stack));
    std::fs::create_dir_all(&output_dir)?;

    let extension = table_extension(args.output_fmt);

    let path = unique_output_path(&output_dir, "Distances", extension);
    report_write("distances", &path, write_spot_report(&path, args.output_fmt, &result));

    let path = unique_output_path(&output_dir, "Cells", extension);
    report_write("cell table", &path, write_cell_table(&path, args.output_fmt, &result));

    let path = unique_output_path(&output_dir, "Cells", "geojson");
    report_write(
        "cell outlines",
        &path,
        write_cell_outlines_geojson(&path, &result.outlines),
    );

    let path = unique_output_path(&output_dir, "Parameters", "json");
    report_write(
        "run summary",
        &path,
        write_run_summary(&path, &args.stack, &config, &result),
    );

    if !args.no_images {
        match overlay::write_images(&output_dir, &result, &fish, &dapi) {
            Ok(0) => info!("Wrote images to {}", output_dir.display()),
            Ok(failed) => error!("{} images could not be written to {}", failed, output_dir.display()),
            Err(err) => error!("Unable to draw images: {:#}", err),
        }
    }

    return Ok(());
}

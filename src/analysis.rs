pub mod assign;
pub mod background;
pub mod cellstats;
pub mod distance;
pub mod regions;
pub mod segmentation;
pub mod spots;
pub mod stack;
pub mod threshold;
pub mod volume;

use anyhow::{bail, Result};
use assign::assign;
use cellstats::{stats, CellStats};
use distance::{measure, IntersectionRecord, RaySegment, SpotMeasurement};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rayon::prelude::*;
use segmentation::{outlines_from_labels, CellOutline, CellSegmenter};
use spots::{detect_spots, Spot};
use stack::{Stack, VoxelSize};
use threshold::{Threshold, ThresholdMethod};
use volume::{prepare_foreground, reconstruct, CellVolume};

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    // Prominence a maximum needs over its surroundings to count as a spot.
    pub noise_tolerance: f32,
    pub exclude_edge_maxima: bool,

    // Smallest foreground region, in pixels, accepted as a slice boundary.
    pub min_region_area: f32,

    pub rolling_ball_radius: f32,
    pub threshold_method: ThresholdMethod,

    // Use this threshold level instead of computing one.
    pub threshold_level: Option<f32>,

    // Length in pixels of the ray cast from the centroid through the spot.
    pub ray_length: f32,
}

// Rays longer than this, in pixels, are rejected.
pub const MAX_RAY_LENGTH: f32 = 100_000.0;

impl AnalysisConfig {
    pub fn new(noise_tolerance: f32) -> Self {
        return AnalysisConfig {
            noise_tolerance,
            exclude_edge_maxima: true,
            min_region_area: 100.0,
            rolling_ball_radius: 150.0,
            threshold_method: ThresholdMethod::Yen,
            threshold_level: None,
            ray_length: 100.0,
        };
    }

    pub fn validate(&self) -> Result<()> {
        if !self.ray_length.is_finite() || self.ray_length <= 0.0 || self.ray_length > MAX_RAY_LENGTH {
            bail!(
                "Ray length must be positive and at most {} pixels, got {}",
                MAX_RAY_LENGTH,
                self.ray_length
            );
        }
        if !self.noise_tolerance.is_finite() || self.noise_tolerance < 0.0 {
            bail!("Noise tolerance must be non-negative, got {}", self.noise_tolerance);
        }
        return Ok(());
    }
}

pub struct AnalysisResult {
    pub voxel: VoxelSize,
    pub spots: Vec<Spot>,
    pub outlines: Vec<CellOutline>,
    pub threshold: Threshold,
    pub volumes: Vec<CellVolume>,
    pub cell_stats: Vec<CellStats>,

    // One per spot, in the same order as `spots`.
    pub measurements: Vec<SpotMeasurement>,
}

// A spot that was assigned to a cell and whose ray crossed the cell boundary.
pub struct ReportRow<'a> {
    // 1-based position among all detected spots
    pub spot_index: usize,

    // 0-based index into `outlines`
    pub cell: usize,
    pub measurement: &'a SpotMeasurement,
    pub ray: RaySegment,
    pub nearest: IntersectionRecord,
}

fn progress_bar(len: usize, msg: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {bar:40.cyan/blue} {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );
    pb.set_message(msg);
    return Ok(pb);
}

// Run every stage in order: spot detection, segmentation, volume
// reconstruction, assignment, distance measurement, and cell statistics.
// Cells and spots are processed in parallel within a stage.
pub fn run_analysis(
    fish: &Stack,
    dapi: &Stack,
    segmenter: &dyn CellSegmenter,
    config: &AnalysisConfig,
) -> Result<AnalysisResult> {
    if fish.data.dim() != dapi.data.dim() {
        bail!(
            "Spot and DAPI channels differ in shape: {:?} vs {:?}",
            fish.data.dim(),
            dapi.data.dim()
        );
    }
    let voxel = dapi.voxel;
    voxel.validate()?;
    config.validate()?;

    let spots = detect_spots(fish, dapi, config.noise_tolerance, config.exclude_edge_maxima);
    info!("Detected {} spots", spots.len());

    let labels = segmenter.segment(dapi.max_projection().view())?;
    let outlines = outlines_from_labels(labels.view());
    info!("Segmented {} cells", outlines.len());

    let foreground = prepare_foreground(
        dapi,
        config.rolling_ball_radius,
        config.threshold_method,
        config.threshold_level,
    );
    info!("Foreground threshold: {}", foreground.threshold.level);

    let pb = progress_bar(outlines.len(), "Reconstructing cells")?;
    let volumes: Vec<CellVolume> = outlines
        .par_iter()
        .map(|outline| {
            let volume = reconstruct(outline, foreground.mask.view(), config.min_region_area);
            debug!(
                "Cell {}: boundary found on {} of {} slices",
                outline.label,
                volume.nregions(),
                volume.nslices()
            );
            pb.inc(1);
            volume
        })
        .collect();
    pb.finish_and_clear();

    let cells = assign(&spots, &outlines);
    info!(
        "Assigned {} of {} spots to cells",
        cells.iter().filter(|c| c.is_some()).count(),
        spots.len()
    );

    let measurements: Vec<SpotMeasurement> = spots
        .par_iter()
        .zip(cells.par_iter())
        .map(|(spot, &cell)| measure(spot, cell, &outlines, &volumes, &voxel, config.ray_length))
        .collect();

    let cell_stats: Vec<CellStats> = volumes.par_iter().map(|volume| stats(volume, dapi)).collect();

    return Ok(AnalysisResult {
        voxel,
        spots,
        outlines,
        threshold: foreground.threshold,
        volumes,
        cell_stats,
        measurements,
    });
}

// Spots that make it into the report: assigned to a cell and with at least
// one boundary crossing.
pub fn report_rows(result: &AnalysisResult) -> Vec<ReportRow<'_>> {
    return result
        .measurements
        .iter()
        .enumerate()
        .filter_map(|(i, measurement)| {
            let cell = measurement.cell?;
            let ray = measurement.ray?;
            let nearest = measurement.nearest?;
            Some(ReportRow {
                spot_index: i + 1,
                cell,
                measurement,
                ray,
                nearest,
            })
        })
        .collect();
}

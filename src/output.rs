use anyhow::{bail, Result};
use clap::ValueEnum;
use arrow::array::{Array, Float32Array, Int64Array, RecordBatch, UInt32Array, UInt64Array};
use arrow::csv;
use flate2::write::GzEncoder;
use json::JsonValue;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::segmentation::CellOutline;
use crate::analysis::{report_rows, AnalysisConfig, AnalysisResult};
use crate::schemas::{cell_table_schema, spot_report_schema, OutputFormat};

pub fn determine_format(filename: &Path, fmt: OutputFormat) -> Result<OutputFormat> {
    if fmt != OutputFormat::Infer {
        return Ok(fmt);
    }

    let name = filename.to_string_lossy();
    if name.ends_with(".csv.gz") {
        return Ok(OutputFormat::CsvGz);
    } else if name.ends_with(".csv") {
        return Ok(OutputFormat::Csv);
    } else if name.ends_with(".parquet") {
        return Ok(OutputFormat::Parquet);
    } else {
        bail!("Unknown file format for: {}", name);
    }
}

// File extension for tables written in `fmt`. Inferred tables default to csv.
pub fn table_extension(fmt: OutputFormat) -> &'static str {
    match fmt {
        OutputFormat::Infer | OutputFormat::Csv => "csv",
        OutputFormat::CsvGz => "csv.gz",
        OutputFormat::Parquet => "parquet",
    }
}

// `dir/stem.ext`, or `dir/stem_N.ext` with the smallest N that is not taken.
pub fn unique_output_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let path = dir.join(format!("{}.{}", stem, extension));
    if !path.exists() {
        return path;
    }

    let mut n = 1;
    loop {
        let path = dir.join(format!("{}_{}.{}", stem, n, extension));
        if !path.exists() {
            return path;
        }
        n += 1;
    }
}

pub fn write_table(filename: &Path, fmt: OutputFormat, batch: &RecordBatch) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let file = File::create(filename)?;

    match fmt {
        OutputFormat::Csv => {
            let mut writer = csv::WriterBuilder::new().with_header(true).build(file);
            writer.write(batch)?;
        }
        OutputFormat::CsvGz => {
            let encoder = GzEncoder::new(file, flate2::Compression::default());
            let mut writer = csv::WriterBuilder::new().with_header(true).build(encoder);
            writer.write(batch)?;
            writer.into_inner().finish()?;
        }
        OutputFormat::Parquet => {
            let props = WriterProperties::builder()
                .set_compression(Compression::ZSTD(ZstdLevel::default()))
                .build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
        }
        OutputFormat::Infer => bail!("Indeterminable output format"),
    }

    return Ok(());
}

// Distance table: one row per assigned spot with a boundary crossing.
pub fn write_spot_report(filename: &Path, fmt: OutputFormat, result: &AnalysisResult) -> Result<()> {
    let rows = report_rows(result);
    let voxel = &result.voxel;

    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(rows.iter().map(|r| r.spot_index as u32).collect::<UInt32Array>()),
        Arc::new(rows.iter().map(|r| r.cell as u32 + 1).collect::<UInt32Array>()),
        Arc::new(
            rows.iter()
                .map(|r| result.outlines[r.cell].label)
                .collect::<UInt32Array>(),
        ),
        Arc::new(rows.iter().map(|r| r.measurement.spot.x).collect::<UInt32Array>()),
        Arc::new(rows.iter().map(|r| r.measurement.spot.y).collect::<UInt32Array>()),
        Arc::new(rows.iter().map(|r| r.measurement.spot.z as u32).collect::<UInt32Array>()),
        Arc::new(
            rows.iter()
                .map(|r| r.measurement.spot.intensity_fish)
                .collect::<Float32Array>(),
        ),
        Arc::new(
            rows.iter()
                .map(|r| r.measurement.spot.intensity_dapi)
                .collect::<Float32Array>(),
        ),
        Arc::new(
            rows.iter()
                .map(|r| result.outlines[r.cell].width() * voxel.width)
                .collect::<Float32Array>(),
        ),
        Arc::new(
            rows.iter()
                .map(|r| result.outlines[r.cell].height() * voxel.height)
                .collect::<Float32Array>(),
        ),
        Arc::new(rows.iter().map(|r| r.nearest.distance).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.nearest.x).collect::<Int64Array>()),
        Arc::new(rows.iter().map(|r| r.nearest.y).collect::<Int64Array>()),
        Arc::new(rows.iter().map(|r| r.nearest.z_index as u32).collect::<UInt32Array>()),
        Arc::new(rows.iter().map(|r| r.ray.start.0).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.ray.start.1).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.ray.end.0).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| r.ray.end.1).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| result.cell_stats[r.cell].max).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| result.cell_stats[r.cell].min).collect::<Float32Array>()),
        Arc::new(rows.iter().map(|r| result.cell_stats[r.cell].mean).collect::<Float32Array>()),
        Arc::new(
            rows.iter()
                .map(|r| result.cell_stats[r.cell].median)
                .collect::<Float32Array>(),
        ),
    ];

    let batch = RecordBatch::try_new(Arc::new(spot_report_schema()), columns)?;
    return write_table(filename, fmt, &batch);
}

// Per-cell geometry and DAPI statistics, in physical units.
pub fn write_cell_table(filename: &Path, fmt: OutputFormat, result: &AnalysisResult) -> Result<()> {
    let voxel = &result.voxel;
    let outlines = &result.outlines;
    let stats = &result.cell_stats;

    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(UInt32Array::from_iter_values(1..=outlines.len() as u32)),
        Arc::new(outlines.iter().map(|o| o.label).collect::<UInt32Array>()),
        Arc::new(
            outlines.iter()
                .map(|o| o.centroid.0 * voxel.width)
                .collect::<Float32Array>(),
        ),
        Arc::new(
            outlines.iter()
                .map(|o| o.centroid.1 * voxel.height)
                .collect::<Float32Array>(),
        ),
        Arc::new(outlines.iter().map(|o| o.width() * voxel.width).collect::<Float32Array>()),
        Arc::new(outlines.iter().map(|o| o.height() * voxel.height).collect::<Float32Array>()),
        Arc::new(
            outlines.iter()
                .map(|o| o.area() * voxel.width * voxel.height)
                .collect::<Float32Array>(),
        ),
        Arc::new(
            result.volumes.iter()
                .map(|v| v.nregions() as u32)
                .collect::<UInt32Array>(),
        ),
        Arc::new(stats.iter().map(|s| s.count as u64).collect::<UInt64Array>()),
        Arc::new(stats.iter().map(|s| s.max).collect::<Float32Array>()),
        Arc::new(stats.iter().map(|s| s.min).collect::<Float32Array>()),
        Arc::new(stats.iter().map(|s| s.mean).collect::<Float32Array>()),
        Arc::new(stats.iter().map(|s| s.median).collect::<Float32Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(cell_table_schema()), columns)?;
    return write_table(filename, fmt, &batch);
}

fn outline_feature(index: usize, outline: &CellOutline) -> Result<JsonValue> {
    let mut ring = JsonValue::new_array();
    for coord in outline.polygon().exterior().coords() {
        let mut xy = JsonValue::new_array();
        xy.push(coord.x)?;
        xy.push(coord.y)?;
        ring.push(xy)?;
    }
    let mut coordinates = JsonValue::new_array();
    coordinates.push(ring)?;

    let mut geometry = JsonValue::new_object();
    geometry.insert("type", "Polygon")?;
    geometry.insert("coordinates", coordinates)?;

    let mut properties = JsonValue::new_object();
    properties.insert("cell", index + 1)?;
    properties.insert("label", outline.label)?;
    properties.insert("centroid", JsonValue::from(vec![outline.centroid.0, outline.centroid.1]))?;

    let mut feature = JsonValue::new_object();
    feature.insert("type", "Feature")?;
    feature.insert("properties", properties)?;
    feature.insert("geometry", geometry)?;
    return Ok(feature);
}

// 2D cell outlines in pixel coordinates as a GeoJSON FeatureCollection,
// gzipped if the filename ends in .gz.
pub fn write_cell_outlines_geojson(filename: &Path, outlines: &[CellOutline]) -> Result<()> {
    let mut features = JsonValue::new_array();
    for (i, outline) in outlines.iter().enumerate() {
        features.push(outline_feature(i, outline)?)?;
    }

    let mut data = JsonValue::new_object();
    data.insert("type", "FeatureCollection")?;
    data.insert("features", features)?;

    return write_json(filename, &data);
}

fn write_json(filename: &Path, data: &JsonValue) -> Result<()> {
    let file = File::create(filename)?;
    if filename.to_string_lossy().ends_with(".gz") {
        let mut encoder = GzEncoder::new(file, flate2::Compression::default());
        data.write_pretty(&mut encoder, 2)?;
        encoder.finish()?;
    } else {
        let mut file = file;
        data.write_pretty(&mut file, 2)?;
        file.flush()?;
    }
    return Ok(());
}

// Input file, settings, and the foreground threshold that was actually applied.
pub fn write_run_summary(
    filename: &Path,
    stack: &Path,
    config: &AnalysisConfig,
    result: &AnalysisResult,
) -> Result<()> {
    let mut voxel = JsonValue::new_object();
    voxel.insert("width", result.voxel.width)?;
    voxel.insert("height", result.voxel.height)?;
    voxel.insert("depth", result.voxel.depth)?;

    let method = match config.threshold_level {
        Some(_) => "manual".to_string(),
        None => config
            .threshold_method
            .to_possible_value()
            .map_or_else(|| format!("{:?}", config.threshold_method), |v| v.get_name().to_string()),
    };

    let mut threshold = JsonValue::new_object();
    threshold.insert("method", method)?;
    if result.threshold.level.is_finite() {
        threshold.insert("level", result.threshold.level)?;
    } else {
        // flat stack, nothing is foreground
        threshold.insert("level", JsonValue::Null)?;
    }
    threshold.insert("rolling_ball_radius", config.rolling_ball_radius)?;

    let mut data = JsonValue::new_object();
    data.insert("stack", stack.to_string_lossy().to_string())?;
    data.insert("version", env!("CARGO_PKG_VERSION"))?;
    data.insert("voxel", voxel)?;
    data.insert("noise_tolerance", config.noise_tolerance)?;
    data.insert("exclude_edge_maxima", config.exclude_edge_maxima)?;
    data.insert("min_region_area", config.min_region_area)?;
    data.insert("ray_length", config.ray_length)?;
    data.insert("threshold", threshold)?;
    data.insert("spots", result.spots.len())?;
    data.insert("cells", result.outlines.len())?;
    data.insert("measured_spots", report_rows(result).len())?;

    return write_json(filename, &data);
}

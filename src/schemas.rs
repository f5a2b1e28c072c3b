// Schemas of the tables written by output.rs

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

// One row per spot that was assigned to a cell and measured.
pub fn spot_report_schema() -> Schema {
    Schema::new(vec![
        Field::new("spot", DataType::UInt32, false),
        Field::new("cell", DataType::UInt32, false),
        Field::new("cell_label", DataType::UInt32, false),
        Field::new("x", DataType::UInt32, false),
        Field::new("y", DataType::UInt32, false),
        Field::new("z", DataType::UInt32, false),
        Field::new("intensity_fish", DataType::Float32, false),
        Field::new("intensity_dapi", DataType::Float32, false),
        Field::new("cell_width", DataType::Float32, false),
        Field::new("cell_height", DataType::Float32, false),
        Field::new("distance", DataType::Float32, false),
        Field::new("boundary_x", DataType::Int64, false),
        Field::new("boundary_y", DataType::Int64, false),
        Field::new("boundary_z", DataType::UInt32, false),
        Field::new("ray_x0", DataType::Float32, false),
        Field::new("ray_y0", DataType::Float32, false),
        Field::new("ray_x1", DataType::Float32, false),
        Field::new("ray_y1", DataType::Float32, false),
        Field::new("dapi_max", DataType::Float32, false),
        Field::new("dapi_min", DataType::Float32, false),
        Field::new("dapi_mean", DataType::Float32, false),
        Field::new("dapi_median", DataType::Float32, false),
    ])
}

pub fn cell_table_schema() -> Schema {
    Schema::new(vec![
        Field::new("cell", DataType::UInt32, false),
        Field::new("cell_label", DataType::UInt32, false),
        Field::new("centroid_x", DataType::Float32, false),
        Field::new("centroid_y", DataType::Float32, false),
        Field::new("width", DataType::Float32, false),
        Field::new("height", DataType::Float32, false),
        Field::new("area", DataType::Float32, false),
        Field::new("boundary_slices", DataType::UInt32, false),
        Field::new("pixel_count", DataType::UInt64, false),
        Field::new("dapi_max", DataType::Float32, false),
        Field::new("dapi_min", DataType::Float32, false),
        Field::new("dapi_mean", DataType::Float32, false),
        Field::new("dapi_median", DataType::Float32, false),
    ])
}

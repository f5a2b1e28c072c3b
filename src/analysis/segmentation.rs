use super::regions::{extract_regions, label_components, largest_region, PixelRegion};
use super::threshold::{Histogram, Threshold, ThresholdMethod};
use anyhow::{bail, Result};
use geo::Polygon;
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;

// Anything that turns a 2D image into a label image: 0 is background and each
// distinct positive value is one cell.
pub trait CellSegmenter: Sync {
    fn segment(&self, projection: ArrayView2<f32>) -> Result<Array2<u32>>;
}

// Labels computed ahead of time by an external model (e.g. cellpose).
pub struct PrecomputedLabels {
    labels: Array2<u32>,
}

impl PrecomputedLabels {
    pub fn new(labels: Array2<u32>) -> Self {
        return PrecomputedLabels { labels };
    }
}

impl CellSegmenter for PrecomputedLabels {
    fn segment(&self, projection: ArrayView2<f32>) -> Result<Array2<u32>> {
        if self.labels.dim() != projection.dim() {
            bail!(
                "Label image has shape {:?} but the projection has shape {:?}",
                self.labels.dim(),
                projection.dim()
            );
        }
        return Ok(self.labels.clone());
    }
}

// Classical fallback: global threshold followed by 8-connected components,
// dropping components smaller than `min_area` pixels.
pub struct ThresholdSegmenter {
    pub method: ThresholdMethod,
    pub min_area: usize,
}

impl CellSegmenter for ThresholdSegmenter {
    fn segment(&self, projection: ArrayView2<f32>) -> Result<Array2<u32>> {
        let histogram = Histogram::new(projection.iter());
        let threshold = Threshold::auto(self.method, &histogram);
        let mask = projection.mapv(|v| threshold.is_foreground(v));

        let (mut labels, ncomponents) = label_components(mask.view());

        let mut sizes = vec![0_usize; ncomponents + 1];
        for &label in labels.iter() {
            sizes[label as usize] += 1;
        }

        let mut relabel = vec![0_u32; ncomponents + 1];
        let mut next = 0;
        for (label, &size) in sizes.iter().enumerate().skip(1) {
            if size >= self.min_area {
                next += 1;
                relabel[label] = next;
            }
        }

        labels.mapv_inplace(|label| relabel[label as usize]);
        return Ok(labels);
    }
}

// 2D outline of one segmented cell.
#[derive(Clone, Debug)]
pub struct CellOutline {
    pub label: u32,
    pub region: PixelRegion,
    pub centroid: (f32, f32),
}

impl CellOutline {
    pub fn polygon(&self) -> &Polygon<f32> {
        &self.region.polygon
    }

    pub fn contains_pixel(&self, x: i64, y: i64) -> bool {
        self.region.contains_pixel(x, y)
    }

    pub fn area(&self) -> f32 {
        self.region.area
    }

    pub fn width(&self) -> f32 {
        self.region.width()
    }

    pub fn height(&self) -> f32 {
        self.region.height()
    }
}

// One outline per distinct positive label, in ascending label order. A label
// whose pixels are split into several pieces is represented by its largest
// piece.
pub fn outlines_from_labels(labels: ArrayView2<u32>) -> Vec<CellOutline> {
    let mut pixels: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
    for ((y, x), &label) in labels.indexed_iter() {
        if label > 0 {
            pixels.entry(label).or_default().push((x, y));
        }
    }

    let mut outlines = Vec::with_capacity(pixels.len());
    for (label, label_pixels) in pixels {
        let x0 = label_pixels.iter().map(|p| p.0).min().unwrap_or(0);
        let x1 = label_pixels.iter().map(|p| p.0).max().unwrap_or(0);
        let y0 = label_pixels.iter().map(|p| p.1).min().unwrap_or(0);
        let y1 = label_pixels.iter().map(|p| p.1).max().unwrap_or(0);

        let mut mask = Array2::from_elem((y1 - y0 + 1, x1 - x0 + 1), false);
        for &(x, y) in &label_pixels {
            mask[[y - y0, x - x0]] = true;
        }

        let regions = extract_regions(mask.view(), (x0 as i64, y0 as i64), 0.0);
        if let Some(region) = largest_region(regions) {
            let centroid = region.centroid();
            outlines.push(CellOutline {
                label,
                region,
                centroid,
            });
        }
    }

    return outlines;
}

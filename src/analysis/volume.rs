use super::background::subtract_background;
use super::regions::{extract_regions, largest_region, PixelRegion};
use super::segmentation::CellOutline;
use super::stack::Stack;
use super::threshold::{Histogram, Threshold, ThresholdMethod};
use log::debug;
use ndarray::{s, Array2, Array3, ArrayView3};

// Boundary of a cell at one z-slice.
#[derive(Clone, Debug, PartialEq)]
pub enum SliceBoundary {
    Region(PixelRegion),

    // No foreground found at this slice. Sits at the outline centroid.
    Point { x: f32, y: f32 },
}

impl SliceBoundary {
    pub fn region(&self) -> Option<&PixelRegion> {
        match self {
            SliceBoundary::Region(region) => Some(region),
            SliceBoundary::Point { .. } => None,
        }
    }

    pub fn contains_pixel(&self, x: i64, y: i64) -> bool {
        match self {
            SliceBoundary::Region(region) => region.contains_pixel(x, y),
            SliceBoundary::Point { .. } => false,
        }
    }
}

// Per-slice boundaries of one cell. Always has one entry per slice of the
// stack it was reconstructed from, in slice order.
#[derive(Clone, Debug, PartialEq)]
pub struct CellVolume {
    pub slices: Vec<SliceBoundary>,
}

impl CellVolume {
    pub fn nslices(&self) -> usize {
        self.slices.len()
    }

    // Number of slices with a real boundary.
    pub fn nregions(&self) -> usize {
        self.slices.iter().filter(|s| s.region().is_some()).count()
    }
}

// Thresholded, background-subtracted reference channel.
pub struct Foreground {
    pub mask: Array3<bool>,
    pub threshold: Threshold,
}

// Subtract the background from every slice and apply one global threshold,
// computed over the whole stack unless a manual `level` is given.
pub fn prepare_foreground(
    stack: &Stack,
    rolling_ball_radius: f32,
    method: ThresholdMethod,
    level: Option<f32>,
) -> Foreground {
    let subtracted = subtract_background(stack, rolling_ball_radius);

    let threshold = match level {
        Some(level) => Threshold { level },
        None => Threshold::auto(method, &Histogram::new(subtracted.data.iter())),
    };
    debug!("Foreground threshold level: {}", threshold.level);

    let mask = subtracted.data.mapv(|v| threshold.is_foreground(v));
    return Foreground { mask, threshold };
}

// For every slice, the largest connected foreground region of at least
// `min_area` pixels that lies inside the outline, or a point at the outline
// centroid when there is none.
pub fn reconstruct(outline: &CellOutline, foreground: ArrayView3<bool>, min_area: f32) -> CellVolume {
    let (nslices, height, width) = foreground.dim();
    let point = SliceBoundary::Point {
        x: outline.centroid.0,
        y: outline.centroid.1,
    };

    let (xmin, ymin, xmax, ymax) = outline.region.bounds();
    let x0 = (xmin.floor().max(0.0) as usize).min(width);
    let y0 = (ymin.floor().max(0.0) as usize).min(height);
    let x1 = (xmax.ceil().max(0.0) as usize).min(width);
    let y1 = (ymax.ceil().max(0.0) as usize).min(height);

    if x0 >= x1 || y0 >= y1 {
        return CellVolume {
            slices: vec![point; nslices],
        };
    }

    let mut inside = Array2::from_elem((y1 - y0, x1 - x0), false);
    for (x, y) in outline.region.pixels() {
        if x >= x0 as i64 && y >= y0 as i64 && x < x1 as i64 && y < y1 as i64 {
            inside[[y as usize - y0, x as usize - x0]] = true;
        }
    }

    let mut slices = Vec::with_capacity(nslices);
    for z in 0..nslices {
        let mut mask = foreground.slice(s![z, y0..y1, x0..x1]).to_owned();
        mask.zip_mut_with(&inside, |m, &i| *m = *m && i);

        let regions = extract_regions(mask.view(), (x0 as i64, y0 as i64), min_area);
        match largest_region(regions) {
            Some(region) => slices.push(SliceBoundary::Region(region)),
            None => slices.push(point.clone()),
        }
    }

    return CellVolume { slices };
}

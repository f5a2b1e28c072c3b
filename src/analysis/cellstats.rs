use super::stack::Stack;
use super::volume::CellVolume;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CellStats {
    pub max: f32,
    pub min: f32,
    pub mean: f32,
    pub median: f32,
    pub count: usize,
}

// Summary of a pool of intensities. The median of an even count is the lower
// of the two middle values. An empty pool is all zeros.
pub fn summarize(mut values: Vec<f32>) -> CellStats {
    if values.is_empty() {
        return CellStats::default();
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let sum: f64 = values.iter().map(|&v| v as f64).sum();

    return CellStats {
        max: values[n - 1],
        min: values[0],
        mean: (sum / n as f64) as f32,
        median: values[(n - 1) / 2],
        count: n,
    };
}

// Statistics of every stack value inside the cell's boundary on each slice.
// Slices without a real boundary contribute nothing.
pub fn stats(volume: &CellVolume, stack: &Stack) -> CellStats {
    let (height, width) = (stack.height() as i64, stack.width() as i64);

    let mut values = Vec::new();
    for (z, boundary) in volume.slices.iter().enumerate().take(stack.nslices()) {
        let Some(region) = boundary.region() else {
            continue;
        };
        for (x, y) in region.pixels() {
            if x >= 0 && y >= 0 && x < width && y < height {
                values.push(stack.value(x as usize, y as usize, z));
            }
        }
    }

    return summarize(values);
}

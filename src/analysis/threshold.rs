use clap::ValueEnum;

pub const NBINS: usize = 256;

// Automatic global threshold methods, following the ImageJ auto-threshold
// family. All of them operate on a 256 bin histogram and pick a bin index
// `k`; pixels in bins above `k` are foreground (dark background).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ThresholdMethod {
    // Iterative intermeans ("IsoData" variant that ignores the extreme bins)
    Default,
    Yen,
    Otsu,
}

// 256 bin histogram spanning [min, max] of the values it was built from.
#[derive(Clone, Debug)]
pub struct Histogram {
    pub counts: Vec<u64>,
    pub min: f32,
    pub max: f32,
}

impl Histogram {
    pub fn new<'a, I>(values: I) -> Self
    where
        I: Iterator<Item = &'a f32> + Clone,
    {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in values.clone() {
            min = min.min(v);
            max = max.max(v);
        }

        let mut histogram = Histogram {
            counts: vec![0; NBINS],
            min,
            max,
        };

        if min > max {
            // no values
            histogram.min = 0.0;
            histogram.max = 0.0;
            return histogram;
        }

        for &v in values {
            let bin = histogram.bin(v);
            histogram.counts[bin] += 1;
        }

        return histogram;
    }

    pub fn bin_width(&self) -> f32 {
        (self.max - self.min) / NBINS as f32
    }

    pub fn bin(&self, v: f32) -> usize {
        if self.max <= self.min {
            return 0;
        }
        let bin = ((v - self.min) / (self.max - self.min) * NBINS as f32).floor();
        return (bin.max(0.0) as usize).min(NBINS - 1);
    }

    // Intensity at which foreground starts when bins above `k` are foreground.
    pub fn level(&self, k: usize) -> f32 {
        self.min + (k + 1) as f32 * self.bin_width()
    }

    pub fn is_flat(&self) -> bool {
        self.max <= self.min
    }
}

// Global threshold: a pixel is foreground when its value is >= `level`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    pub level: f32,
}

impl Threshold {
    pub fn is_foreground(&self, v: f32) -> bool {
        v >= self.level
    }

    // Pick a threshold for a histogram. A flat histogram has no foreground.
    pub fn auto(method: ThresholdMethod, histogram: &Histogram) -> Self {
        if histogram.is_flat() {
            return Threshold {
                level: f32::INFINITY,
            };
        }

        let k = match method {
            ThresholdMethod::Default => isodata_bin(&histogram.counts),
            ThresholdMethod::Yen => yen_bin(&histogram.counts),
            ThresholdMethod::Otsu => otsu_bin(&histogram.counts),
        };
        return Threshold {
            level: histogram.level(k),
        };
    }
}

// Iterative intermeans. The lowest and highest bins are left out so that
// saturated or blanked pixels do not pull the threshold.
pub fn isodata_bin(counts: &[u64]) -> usize {
    let n = counts.len();
    if n < 3 {
        return 0;
    }

    let mut data: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    data[0] = 0.0;
    data[n - 1] = 0.0;

    let mut min = 0;
    while data[min] == 0.0 && min < n - 1 {
        min += 1;
    }
    let mut max = n - 1;
    while data[max] == 0.0 && max > 0 {
        max -= 1;
    }
    if min >= max {
        return n / 2;
    }

    let mut moving = min;
    let mut result;
    loop {
        let (mut sum1, mut sum2, mut sum3, mut sum4) = (0.0, 0.0, 0.0, 0.0);
        for (i, &c) in data.iter().enumerate().take(moving + 1).skip(min) {
            sum1 += i as f64 * c;
            sum2 += c;
        }
        for (i, &c) in data.iter().enumerate().take(max + 1).skip(moving + 1) {
            sum3 += i as f64 * c;
            sum4 += c;
        }
        result = (sum1 / sum2 + sum3 / sum4) / 2.0;
        moving += 1;

        if !((moving + 1) as f64 <= result && moving < max - 1) {
            break;
        }
    }

    return (result.round() as usize).min(n - 1);
}

// Maximize the inter-class variance. First maximum wins.
pub fn otsu_bin(counts: &[u64]) -> usize {
    let total: f64 = counts.iter().map(|&c| c as f64).sum();
    if total == 0.0 {
        return 0;
    }

    let sum_total: f64 = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0.0;
    let mut max_variance = -1.0;
    let mut k_star = 0;

    for (k, &count) in counts.iter().enumerate() {
        weight_background += count as f64;
        if weight_background == 0.0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0.0 {
            break;
        }

        sum_background += k as f64 * count as f64;
        let mean_background = sum_background / weight_background;
        let mean_foreground = (sum_total - sum_background) / weight_foreground;
        let variance =
            weight_background * weight_foreground * (mean_background - mean_foreground).powi(2);

        if variance > max_variance {
            max_variance = variance;
            k_star = k;
        }
    }

    return k_star;
}

// Yen's maximum correlation criterion. First maximum wins.
pub fn yen_bin(counts: &[u64]) -> usize {
    let n = counts.len();
    let total: f64 = counts.iter().map(|&c| c as f64).sum();
    if total == 0.0 || n == 0 {
        return 0;
    }

    let norm: Vec<f64> = counts.iter().map(|&c| c as f64 / total).collect();

    let mut p1 = vec![0.0; n];
    let mut p1_sq = vec![0.0; n];
    p1[0] = norm[0];
    p1_sq[0] = norm[0] * norm[0];
    for i in 1..n {
        p1[i] = p1[i - 1] + norm[i];
        p1_sq[i] = p1_sq[i - 1] + norm[i] * norm[i];
    }

    let mut p2_sq = vec![0.0; n];
    for i in (0..n - 1).rev() {
        p2_sq[i] = p2_sq[i + 1] + norm[i + 1] * norm[i + 1];
    }

    let mut threshold = 0;
    let mut max_crit = f64::NEG_INFINITY;
    for it in 0..n {
        let a = p1_sq[it] * p2_sq[it];
        let b = p1[it] * (1.0 - p1[it]);
        let crit = -(if a > 0.0 { a.ln() } else { 0.0 }) + 2.0 * (if b > 0.0 { b.ln() } else { 0.0 });
        if crit > max_crit {
            max_crit = crit;
            threshold = it;
        }
    }

    return threshold;
}

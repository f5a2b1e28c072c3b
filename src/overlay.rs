use ab_glyph::FontRef;
use anyhow::{anyhow, Result};
use image::imageops::{replace, resize, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_line_segment_mut, draw_text_mut, text_size};
use log::{debug, error};
use ndarray::{ArrayView2, Axis};
use std::path::Path;

use crate::analysis::distance::line_pixels;
use crate::analysis::stack::Stack;
use crate::analysis::volume::SliceBoundary;
use crate::analysis::{report_rows, AnalysisResult, ReportRow};
use crate::output::unique_output_path;

const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const RAY_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const SPOT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 128, 0]);
const CAPTION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const LABEL_SCALE: f32 = 12.0;
const LINE_HEIGHT: u32 = 14;

// Text band above each cross-section: spot number and distance.
const CAPTION_HEIGHT: u32 = 2 * LINE_HEIGHT + 4;

// Cap on the rows drawn per slice in a cross-section.
const MAX_STRETCH: u32 = 16;

// Percentage of pixels allowed to saturate when stretching contrast, split
// evenly between the dark and bright ends.
const SATURATED: f32 = 0.35;

// Linear display range of an image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contrast {
    pub lo: f32,
    pub hi: f32,
}

impl Contrast {
    pub fn auto<'a, I>(values: I) -> Self
    where
        I: Iterator<Item = &'a f32>,
    {
        let mut sorted: Vec<f32> = values.cloned().collect();
        if sorted.is_empty() {
            return Contrast { lo: 0.0, hi: 0.0 };
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let tail = ((n as f32) * SATURATED / 200.0) as usize;
        let lo = sorted[tail.min(n - 1)];
        let hi = sorted[(n - 1).saturating_sub(tail)];
        return Contrast { lo, hi };
    }

    pub fn scale(&self, v: f32) -> u8 {
        if self.hi <= self.lo {
            return if v > self.lo { 255 } else { 0 };
        }
        return (((v - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

pub fn label_font() -> Result<FontRef<'static>> {
    return FontRef::try_from_slice(FONT_DATA)
        .map_err(|err| anyhow!("Unable to load label font: {}", err));
}

// DAPI in gray with the FISH channel added to green.
fn merge(dapi: u8, fish: u8) -> Rgb<u8> {
    Rgb([dapi, dapi.max(fish), dapi])
}

fn projection_image(dapi: ArrayView2<f32>, fish: ArrayView2<f32>) -> RgbImage {
    let (height, width) = dapi.dim();
    let dapi_contrast = Contrast::auto(dapi.iter());
    let fish_contrast = Contrast::auto(fish.iter());

    let mut image = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        *pixel = merge(
            dapi_contrast.scale(dapi[[y, x]]),
            fish_contrast.scale(fish[[y, x]]),
        );
    }
    return image;
}

fn draw_cell_number(image: &mut RgbImage, centroid: (f32, f32), number: usize, font: &FontRef) {
    let (x, y) = (centroid.0 as i32 + 2, centroid.1 as i32 + 2);
    draw_text_mut(image, OUTLINE_COLOR, x, y, LABEL_SCALE, font, &number.to_string());
}

fn draw_outline(image: &mut RgbImage, polygon: &geo::Polygon<f32>, color: Rgb<u8>) {
    for line in polygon.exterior().lines() {
        draw_line_segment_mut(image, (line.start.x, line.start.y), (line.end.x, line.end.y), color);
    }
}

// Max projection with numbered cell outlines, every detected spot, and for
// each reported spot the ray from the centroid to its nearest boundary
// crossing, labelled with the spot number and distance.
pub fn render_overlay(
    result: &AnalysisResult,
    fish: &Stack,
    dapi: &Stack,
    font: &FontRef,
) -> RgbImage {
    let mut image = projection_image(
        dapi.max_projection().view(),
        fish.max_projection().view(),
    );

    for (i, outline) in result.outlines.iter().enumerate() {
        draw_outline(&mut image, outline.polygon(), OUTLINE_COLOR);
        draw_cell_number(&mut image, outline.centroid, i + 1, font);
    }

    for row in report_rows(result) {
        let crossing = (row.nearest.x as f32 + 0.5, row.nearest.y as f32 + 0.5);
        draw_line_segment_mut(&mut image, row.ray.start, crossing, RAY_COLOR);
        draw_cross_mut(&mut image, BOUNDARY_COLOR, row.nearest.x as i32, row.nearest.y as i32);

        let spot = &row.measurement.spot;
        let label = format!("{}: {:.2} µm", row.spot_index, row.nearest.distance);
        draw_text_mut(
            &mut image,
            LABEL_COLOR,
            spot.x as i32 + 4,
            spot.y as i32 - LINE_HEIGHT as i32,
            LABEL_SCALE,
            font,
            &label,
        );
    }

    for spot in &result.spots {
        draw_cross_mut(&mut image, SPOT_COLOR, spot.x as i32, spot.y as i32);
    }

    return image;
}

// One z-slice of the DAPI channel with every cell's reconstructed boundary
// at that slice. Slices where a cell has no boundary show a cross at its
// centroid instead.
pub fn render_slice_outlines(
    result: &AnalysisResult,
    dapi: &Stack,
    z: usize,
    font: &FontRef,
) -> RgbImage {
    let slice = dapi.data.index_axis(Axis(0), z);
    let contrast = Contrast::auto(slice.iter());

    let mut image = RgbImage::new(dapi.width() as u32, dapi.height() as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let v = contrast.scale(slice[[y as usize, x as usize]]);
        *pixel = Rgb([v, v, v]);
    }

    for (i, (outline, volume)) in result.outlines.iter().zip(&result.volumes).enumerate() {
        match &volume.slices[z] {
            SliceBoundary::Region(region) => {
                draw_outline(&mut image, &region.polygon, OUTLINE_COLOR);
            }
            SliceBoundary::Point { x, y } => {
                draw_cross_mut(&mut image, BOUNDARY_COLOR, *x as i32, *y as i32);
            }
        }
        draw_cell_number(&mut image, outline.centroid, i + 1, font);
    }

    return image;
}

// Index along the ray's pixels of the pixel nearest to (x, y).
fn position_along(pixels: &[(i64, i64)], x: i64, y: i64) -> usize {
    let mut best = 0;
    let mut best_d2 = i64::MAX;
    for (i, &(px, py)) in pixels.iter().enumerate() {
        let d2 = (px - x) * (px - x) + (py - y) * (py - y);
        if d2 < best_d2 {
            best_d2 = d2;
            best = i;
        }
    }
    return best;
}

// Both channels sampled along the ray on every slice, one row per slice,
// stretched vertically by the voxel aspect ratio. The spot and the nearest
// boundary crossing are marked.
pub fn render_cross_section(
    row: &ReportRow,
    fish: &Stack,
    dapi: &Stack,
    font: &FontRef,
) -> RgbImage {
    let pixels = line_pixels(&row.ray);
    let nslices = dapi.nslices();
    let (height, width) = (dapi.height() as i64, dapi.width() as i64);

    let inside = |&(x, y): &(i64, i64)| x >= 0 && y >= 0 && x < width && y < height;
    let samples = |stack: &Stack| -> Vec<f32> {
        let mut values = Vec::new();
        for z in 0..nslices {
            for p in pixels.iter().filter(|p| inside(p)) {
                values.push(stack.value(p.0 as usize, p.1 as usize, z));
            }
        }
        values
    };
    let dapi_contrast = Contrast::auto(samples(dapi).iter());
    let fish_contrast = Contrast::auto(samples(fish).iter());

    let mut section = RgbImage::new(pixels.len() as u32, nslices.max(1) as u32);
    for z in 0..nslices {
        for (i, p) in pixels.iter().enumerate() {
            if !inside(p) {
                continue;
            }
            let (x, y) = (p.0 as usize, p.1 as usize);
            section.put_pixel(
                i as u32,
                z as u32,
                merge(
                    dapi_contrast.scale(dapi.value(x, y, z)),
                    fish_contrast.scale(fish.value(x, y, z)),
                ),
            );
        }
    }

    let stretch = (dapi.voxel.depth / dapi.voxel.width)
        .round()
        .clamp(1.0, MAX_STRETCH as f32) as u32;
    let mut section = resize(
        &section,
        section.width(),
        section.height() * stretch,
        FilterType::Nearest,
    );

    let row_centre = |z: usize| (z as u32 * stretch + stretch / 2) as i32;
    let spot = &row.measurement.spot;
    let spot_i = position_along(&pixels, spot.x as i64, spot.y as i64);
    let boundary_i = position_along(&pixels, row.nearest.x, row.nearest.y);
    draw_cross_mut(&mut section, SPOT_COLOR, spot_i as i32, row_centre(spot.z));
    draw_cross_mut(
        &mut section,
        BOUNDARY_COLOR,
        boundary_i as i32,
        row_centre(row.nearest.z_index),
    );

    let lines = [
        format!("Spot: {}", row.spot_index),
        format!("{:.2} µm", row.nearest.distance),
    ];
    let text_width = lines
        .iter()
        .map(|line| text_size(LABEL_SCALE, font, line).0 + 4)
        .max()
        .unwrap_or(0);

    let mut canvas = RgbImage::new(
        section.width().max(text_width),
        section.height() + CAPTION_HEIGHT,
    );
    replace(&mut canvas, &section, 0, CAPTION_HEIGHT as i64);
    for (i, line) in lines.iter().enumerate() {
        let y = 2 + (i as u32 * LINE_HEIGHT) as i32;
        draw_text_mut(&mut canvas, CAPTION_COLOR, 2, y, LABEL_SCALE, font, line);
    }

    return canvas;
}

fn save_image(image: &RgbImage, path: &Path) -> bool {
    match image.save(path) {
        Ok(()) => {
            debug!("Wrote {}", path.display());
            true
        }
        Err(err) => {
            error!("Unable to write {}: {}", path.display(), err);
            false
        }
    }
}

// Save the overlay, the boundaries of every slice, and one cross-section per
// reported spot into `dir`. A failed write is logged and the rest are still
// attempted. Returns the number of images that could not be written.
pub fn write_images(dir: &Path, result: &AnalysisResult, fish: &Stack, dapi: &Stack) -> Result<usize> {
    let font = label_font()?;
    let mut failed = 0;

    let path = unique_output_path(dir, "Overlay", "png");
    if !save_image(&render_overlay(result, fish, dapi, &font), &path) {
        failed += 1;
    }

    for z in 0..dapi.nslices() {
        let stem = format!("Slice_{}_Outlines", z);
        let path = unique_output_path(dir, &stem, "png");
        if !save_image(&render_slice_outlines(result, dapi, z, &font), &path) {
            failed += 1;
        }
    }

    for row in report_rows(result) {
        let stem = format!("Spot_{}_Section", row.spot_index);
        let path = unique_output_path(dir, &stem, "png");
        if !save_image(&render_cross_section(&row, fish, dapi, &font), &path) {
            failed += 1;
        }
    }

    return Ok(failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::segmentation::PrecomputedLabels;
    use crate::analysis::stack::VoxelSize;
    use crate::analysis::threshold::ThresholdMethod;
    use crate::analysis::{run_analysis, AnalysisConfig};
    use ndarray::{s, Array2, Array3};
    use tempfile::tempdir;

    fn scenario(voxel: VoxelSize) -> (Stack, Stack, AnalysisResult) {
        let mut dapi = Array3::<f32>::zeros((3, 40, 40));
        dapi.slice_mut(s![.., 10..30, 10..30]).fill(100.0);
        let mut fish = Array3::<f32>::zeros((3, 40, 40));
        fish[[1, 20, 22]] = 200.0;
        let mut labels = Array2::<u32>::zeros((40, 40));
        labels.slice_mut(s![10..30, 10..30]).fill(1);

        let dapi = Stack::new(dapi, voxel);
        let fish = Stack::new(fish, voxel);
        let mut config = AnalysisConfig::new(50.0);
        config.rolling_ball_radius = 0.0;
        config.threshold_method = ThresholdMethod::Otsu;
        config.ray_length = 30.0;
        let result = run_analysis(&fish, &dapi, &PrecomputedLabels::new(labels), &config).unwrap();
        (fish, dapi, result)
    }

    fn default_scenario() -> (Stack, Stack, AnalysisResult) {
        scenario(VoxelSize::new(0.5, 0.5, 1.5))
    }

    fn is_black(p: &Rgb<u8>) -> bool {
        *p == Rgb([0, 0, 0])
    }

    #[test]
    fn test_contrast() {
        let values: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        let contrast = Contrast::auto(values.iter());
        assert_eq!(contrast.lo, 1.0);
        assert_eq!(contrast.hi, 998.0);
        assert_eq!(contrast.scale(-5.0), 0);
        assert_eq!(contrast.scale(2000.0), 255);

        let flat = vec![3.0_f32; 10];
        let contrast = Contrast::auto(flat.iter());
        assert_eq!(contrast.scale(3.0), 0);
        assert_eq!(contrast.scale(4.0), 255);
    }

    #[test]
    fn test_overlay() {
        let (fish, dapi, result) = default_scenario();
        let font = label_font().unwrap();
        let image = render_overlay(&result, &fish, &dapi, &font);
        assert_eq!(image.dimensions(), (40, 40));
        assert_eq!(*image.get_pixel(14, 10), OUTLINE_COLOR);
        assert_eq!(*image.get_pixel(22, 20), SPOT_COLOR);
        assert!(is_black(image.get_pixel(0, 39)));

        // distance label drawn over the dark background right of the cell
        let mut labelled = false;
        for y in 0..20 {
            for x in 30..40 {
                let p = image.get_pixel(x, y);
                labelled |= p[0] > p[1] && p[2] == 0;
            }
        }
        assert!(labelled);
    }

    #[test]
    fn test_slice_outlines() {
        let (_, dapi, result) = default_scenario();
        let font = label_font().unwrap();
        let image = render_slice_outlines(&result, &dapi, 1, &font);
        assert_eq!(image.dimensions(), (40, 40));
        assert_eq!(*image.get_pixel(14, 10), OUTLINE_COLOR);
        assert!(is_black(image.get_pixel(0, 39)));

        // cell number over the bright cell interior
        let mut numbered = false;
        for y in 20..30 {
            for x in 20..30 {
                let p = image.get_pixel(x, y);
                numbered |= p[2] < p[0];
            }
        }
        assert!(numbered);
    }

    #[test]
    fn test_cross_section() {
        let (fish, dapi, result) = default_scenario();
        let font = label_font().unwrap();
        let rows = report_rows(&result);
        assert_eq!(rows.len(), 1);

        let section = render_cross_section(&rows[0], &fish, &dapi, &font);
        // ray from (20, 20) to (50, 20), 3 rows per slice below the caption
        assert!(section.width() >= 31);
        assert_eq!(section.height(), 9 + CAPTION_HEIGHT);
        assert_eq!(*section.get_pixel(2, 4 + CAPTION_HEIGHT), SPOT_COLOR);
        // beyond the image
        assert!(is_black(section.get_pixel(25, CAPTION_HEIGHT)));

        let caption = (0..CAPTION_HEIGHT)
            .flat_map(|y| (0..section.width()).map(move |x| (x, y)))
            .any(|(x, y)| !is_black(section.get_pixel(x, y)));
        assert!(caption);
    }

    #[test]
    fn test_cross_section_stretch_is_capped() {
        let (fish, dapi, result) = scenario(VoxelSize::new(0.001, 0.001, 10.0));
        let font = label_font().unwrap();
        let rows = report_rows(&result);
        assert_eq!(rows.len(), 1);
        let section = render_cross_section(&rows[0], &fish, &dapi, &font);
        assert_eq!(section.height(), 3 * MAX_STRETCH + CAPTION_HEIGHT);
    }

    #[test]
    fn test_write_images() {
        let (fish, dapi, result) = default_scenario();
        let dir = tempdir().unwrap();
        assert_eq!(write_images(dir.path(), &result, &fish, &dapi).unwrap(), 0);
        assert!(dir.path().join("Overlay.png").exists());
        assert!(dir.path().join("Slice_0_Outlines.png").exists());
        assert!(dir.path().join("Slice_2_Outlines.png").exists());
        assert!(dir.path().join("Spot_1_Section.png").exists());

        write_images(dir.path(), &result, &fish, &dapi).unwrap();
        assert!(dir.path().join("Overlay_1.png").exists());
    }

    #[test]
    fn test_write_images_keeps_going_after_failures() {
        let (fish, dapi, result) = default_scenario();
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        // overlay, three slices, and one cross-section
        assert_eq!(write_images(&missing, &result, &fish, &dapi).unwrap(), 5);
    }
}

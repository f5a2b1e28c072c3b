use super::segmentation::CellOutline;
use super::spots::Spot;
use super::stack::VoxelSize;
use super::volume::CellVolume;

// Measurement ray, from the outline centroid towards a spot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaySegment {
    pub start: (f32, f32),
    pub end: (f32, f32),
}

impl RaySegment {
    pub fn length(&self) -> f32 {
        let dx = self.end.0 - self.start.0;
        let dy = self.end.1 - self.start.1;
        return (dx * dx + dy * dy).sqrt();
    }
}

// Boundary crossing nearest to a spot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntersectionRecord {
    pub x: i64,
    pub y: i64,
    pub z_index: usize,

    // microns
    pub distance: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpotMeasurement {
    pub spot: Spot,
    pub cell: Option<usize>,
    pub ray: Option<RaySegment>,
    pub nearest: Option<IntersectionRecord>,
}

// Ray of `length` pixels from `centroid` in the direction of `spot`, valid in
// all four quadrants. A spot sitting exactly on the centroid has no direction
// and gets the +x ray. Axis-aligned rays stay exactly on their axis.
pub fn line_to_centroid(spot: (f32, f32), centroid: (f32, f32), length: f32) -> RaySegment {
    let (dx, dy) = (spot.0 - centroid.0, spot.1 - centroid.1);
    let norm = dx.hypot(dy);
    let (ux, uy) = if norm > 0.0 { (dx / norm, dy / norm) } else { (1.0, 0.0) };
    return RaySegment {
        start: centroid,
        end: (centroid.0 + length * ux, centroid.1 + length * uy),
    };
}

// Pixels visited walking the ray from start to end, one sample per pixel of
// length, without consecutive repeats.
pub fn line_pixels(ray: &RaySegment) -> Vec<(i64, i64)> {
    let (x0, y0) = (ray.start.0 as f64, ray.start.1 as f64);
    let (dx, dy) = (ray.end.0 as f64 - x0, ray.end.1 as f64 - y0);
    let n = (ray.length().round() as usize).max(1);

    let mut pixels: Vec<(i64, i64)> = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let x = (x0 + dx * i as f64 / n as f64).floor() as i64;
        let y = (y0 + dy * i as f64 / n as f64).floor() as i64;
        if pixels.last() != Some(&(x, y)) {
            pixels.push((x, y));
        }
    }
    return pixels;
}

// For every slice of the volume, the first pixel along the ray whose
// containment differs from that of the ray's first pixel. Slices without a
// real boundary, or where the ray never crosses it, give `None`.
pub fn intersect(ray: &RaySegment, volume: &CellVolume) -> Vec<Option<(i64, i64)>> {
    let pixels = line_pixels(ray);
    return volume
        .slices
        .iter()
        .map(|boundary| {
            // a point boundary contains nothing, so the ray never flips on it
            let (&first, rest) = pixels.split_first()?;
            let start_inside = boundary.contains_pixel(first.0, first.1);
            rest.iter()
                .find(|&&(x, y)| boundary.contains_pixel(x, y) != start_inside)
                .copied()
        })
        .collect();
}

// The candidate closest to the spot in microns, with the candidate's slice
// index as its z. When the spot sits on the centroid pixel, candidates on
// that same pixel are ignored. The first of equally near candidates wins.
pub fn nearest_intersect(
    candidates: &[Option<(i64, i64)>],
    spot: &Spot,
    centroid: (f32, f32),
    voxel: &VoxelSize,
) -> Option<IntersectionRecord> {
    let centroid_pixel = (centroid.0.floor() as i64, centroid.1.floor() as i64);
    let spot_on_centroid = (spot.x as i64, spot.y as i64) == centroid_pixel;
    let spot_position = (spot.x as f32, spot.y as f32, spot.z as f32);

    let mut nearest: Option<IntersectionRecord> = None;
    for (z, candidate) in candidates.iter().enumerate() {
        let Some((x, y)) = *candidate else {
            continue;
        };
        if spot_on_centroid && (x, y) == centroid_pixel {
            continue;
        }

        let distance = voxel.distance((x as f32, y as f32, z as f32), spot_position);
        if nearest.map_or(true, |n| distance < n.distance) {
            nearest = Some(IntersectionRecord {
                x,
                y,
                z_index: z,
                distance,
            });
        }
    }

    return nearest;
}

// Full measurement of one spot against its assigned cell.
pub fn measure(
    spot: &Spot,
    cell: Option<usize>,
    outlines: &[CellOutline],
    volumes: &[CellVolume],
    voxel: &VoxelSize,
    ray_length: f32,
) -> SpotMeasurement {
    let mut measurement = SpotMeasurement {
        spot: *spot,
        cell,
        ray: None,
        nearest: None,
    };

    let Some(cell) = cell else {
        return measurement;
    };

    let centroid = outlines[cell].centroid;
    let ray = line_to_centroid((spot.x as f32, spot.y as f32), centroid, ray_length);
    let candidates = intersect(&ray, &volumes[cell]);
    measurement.ray = Some(ray);
    measurement.nearest = nearest_intersect(&candidates, spot, centroid, voxel);

    return measurement;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::regions::PixelRegion;
    use crate::analysis::volume::SliceBoundary;

    fn square_region(x0: i64, y0: i64, size: i64) -> PixelRegion {
        let mut pixels = Vec::new();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                pixels.push((x, y));
            }
        }
        PixelRegion::from_pixels(&pixels).unwrap()
    }

    fn spot(x: u32, y: u32, z: usize) -> Spot {
        Spot {
            x,
            y,
            z,
            intensity_fish: 10.0,
            intensity_dapi: 5.0,
        }
    }

    #[test]
    fn test_ray_points_towards_spot() {
        let ray = line_to_centroid((25.0, 20.0), (20.0, 20.0), 100.0);
        assert_eq!(ray.start, (20.0, 20.0));
        assert!((ray.end.0 - 120.0).abs() < 1e-3);
        assert!((ray.end.1 - 20.0).abs() < 1e-3);

        let ray = line_to_centroid((15.0, 20.0), (20.0, 20.0), 100.0);
        assert!((ray.end.0 + 80.0).abs() < 1e-3);
    }

    #[test]
    fn test_vertical_ray() {
        let ray = line_to_centroid((20.0, 30.0), (20.0, 20.0), 50.0);
        assert!((ray.end.0 - 20.0).abs() < 1e-3);
        assert!((ray.end.1 - 70.0).abs() < 1e-3);

        let ray = line_to_centroid((20.0, 2.0), (20.0, 20.0), 50.0);
        assert!((ray.end.1 + 30.0).abs() < 1e-3);

        let pixels = line_pixels(&line_to_centroid((20.5, 30.5), (20.5, 20.5), 10.0));
        assert_eq!(pixels.len(), 11);
        assert!(pixels.iter().all(|&(x, _)| x == 20));
    }

    #[test]
    fn test_spot_on_centroid_ray() {
        let ray = line_to_centroid((20.0, 20.0), (20.0, 20.0), 10.0);
        assert_eq!(ray.end, (30.0, 20.0));
    }

    #[test]
    fn test_line_pixels_are_contiguous() {
        let ray = RaySegment {
            start: (20.0, 20.0),
            end: (30.0, 20.0),
        };
        let pixels = line_pixels(&ray);
        assert_eq!(pixels, (20..=30).map(|x| (x, 20)).collect::<Vec<_>>());

        let ray = line_to_centroid((40.0, 37.0), (3.0, 5.0), 60.0);
        let pixels = line_pixels(&ray);
        for pair in pixels.windows(2) {
            assert!((pair[0].0 - pair[1].0).abs() <= 1);
            assert!((pair[0].1 - pair[1].1).abs() <= 1);
        }
    }

    #[test]
    fn test_intersect_per_slice() {
        let volume = CellVolume {
            slices: vec![
                SliceBoundary::Region(square_region(10, 10, 20)),
                SliceBoundary::Point { x: 20.0, y: 20.0 },
                SliceBoundary::Region(square_region(14, 14, 12)),
                SliceBoundary::Region(square_region(0, 0, 200)),
            ],
        };
        let ray = line_to_centroid((22.0, 20.0), (20.0, 20.0), 100.0);
        let candidates = intersect(&ray, &volume);
        assert_eq!(candidates, vec![Some((30, 20)), None, Some((26, 20)), None]);
    }

    #[test]
    fn test_intersect_from_outside() {
        // ray starting outside the region flips on entering it
        let volume = CellVolume {
            slices: vec![SliceBoundary::Region(square_region(40, 15, 10))],
        };
        let ray = line_to_centroid((30.0, 20.0), (20.0, 20.0), 100.0);
        assert_eq!(intersect(&ray, &volume), vec![Some((40, 20))]);
    }

    #[test]
    fn test_point_slices_never_cross() {
        // even a ray starting on the point itself
        let volume = CellVolume {
            slices: vec![
                SliceBoundary::Point { x: 20.0, y: 20.0 },
                SliceBoundary::Point { x: 5.0, y: 5.0 },
            ],
        };
        let ray = line_to_centroid((5.0, 5.0), (20.0, 20.0), 40.0);
        assert_eq!(intersect(&ray, &volume), vec![None, None]);
    }

    #[test]
    fn test_nearest_is_minimum() {
        let voxel = VoxelSize::new(0.5, 0.5, 2.0);
        let candidates = vec![Some((30, 20)), None, Some((26, 20)), Some((28, 20))];
        let s = spot(22, 20, 2);
        let nearest = nearest_intersect(&candidates, &s, (20.0, 20.0), &voxel).unwrap();
        assert_eq!(nearest.z_index, 2);
        assert_eq!((nearest.x, nearest.y), (26, 20));
        assert!((nearest.distance - 2.0).abs() < 1e-6);

        for (z, candidate) in candidates.iter().enumerate() {
            if let Some((x, y)) = candidate {
                let d = voxel.distance((*x as f32, *y as f32, z as f32), (22.0, 20.0, 2.0));
                assert!(nearest.distance <= d);
            }
        }
    }

    #[test]
    fn test_nearest_first_tie_wins() {
        let voxel = VoxelSize::default();
        let candidates = vec![Some((30, 20)), Some((30, 20)), Some((30, 20))];
        let s = spot(22, 20, 1);
        let nearest = nearest_intersect(&candidates, &s, (20.0, 20.0), &voxel).unwrap();
        assert_eq!(nearest.z_index, 1);

        // slices 0 and 2 are equally far from a spot at z = 1
        let candidates = vec![Some((30, 20)), None, Some((30, 20))];
        let nearest = nearest_intersect(&candidates, &s, (20.0, 20.0), &voxel).unwrap();
        assert_eq!(nearest.z_index, 0);
    }

    #[test]
    fn test_no_crossing_gives_none() {
        let voxel = VoxelSize::default();
        let s = spot(22, 20, 0);
        assert_eq!(nearest_intersect(&[None, None], &s, (20.0, 20.0), &voxel), None);
        assert_eq!(nearest_intersect(&[], &s, (20.0, 20.0), &voxel), None);
    }

    #[test]
    fn test_centroid_candidate_skipped_for_centroid_spot() {
        let voxel = VoxelSize::default();
        let s = spot(20, 20, 0);
        let candidates = vec![Some((20, 20)), Some((30, 20))];
        let nearest = nearest_intersect(&candidates, &s, (20.0, 20.0), &voxel).unwrap();
        assert_eq!((nearest.x, nearest.y, nearest.z_index), (30, 20, 1));
        assert!(nearest.distance.is_finite());
    }

    #[test]
    fn test_measure_unassigned_spot() {
        let s = spot(5, 5, 0);
        let measurement = measure(&s, None, &[], &[], &VoxelSize::default(), 100.0);
        assert_eq!(measurement.cell, None);
        assert_eq!(measurement.ray, None);
        assert_eq!(measurement.nearest, None);
    }
}

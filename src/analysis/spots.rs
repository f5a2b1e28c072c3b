use super::stack::Stack;
use ndarray::ArrayView2;

// A detected fluorescent spot. (x, y) are pixel coordinates in the max
// projection, z is the best-focus slice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spot {
    pub x: u32,
    pub y: u32,
    pub z: usize,
    pub intensity_fish: f32,
    pub intensity_dapi: f32,
}

const LISTED: u8 = 1;
const PROCESSED: u8 = 2;
const EQUAL: u8 = 4;

const NEIGHBORS8: [(i64, i64); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

// Find local intensity maxima that stand out by more than `tolerance` from
// the surrounding regional minimum.
//
// Candidate maxima are visited from brightest to dimmest. From each one we
// flood the connected plateau of pixels within `tolerance` of its value. The
// candidate is rejected if the flood reaches a brighter pixel, a region that
// was already claimed by a brighter maximum, or (with `exclude_edges`) the
// image border. It is also rejected if the flood never meets a pixel more
// than `tolerance` below it, since then it has no surrounding minimum at all.
// Among equal-valued plateau pixels the one closest to the plateau's mean
// position is reported.
//
// Returns (x, y) pairs ordered by decreasing intensity.
pub fn find_candidates(
    projection: ArrayView2<f32>,
    tolerance: f32,
    exclude_edges: bool,
) -> Vec<(u32, u32)> {
    let (height, width) = projection.dim();
    if height == 0 || width == 0 {
        return Vec::new();
    }

    let value = |offset: usize| projection[[offset / width, offset % width]];
    let on_edge = |x: usize, y: usize| x == 0 || y == 0 || x == width - 1 || y == height - 1;

    let global_min = projection.iter().cloned().fold(f32::INFINITY, f32::min);

    // local maxima: no 8-neighbor is strictly brighter
    let mut maxima: Vec<(f32, usize)> = Vec::new();
    for ((y, x), &v) in projection.indexed_iter() {
        if v == global_min {
            continue;
        }
        if exclude_edges && on_edge(x, y) {
            continue;
        }

        let is_max = NEIGHBORS8.iter().all(|&(dx, dy)| {
            let x2 = x as i64 + dx;
            let y2 = y as i64 + dy;
            if x2 < 0 || y2 < 0 || x2 >= width as i64 || y2 >= height as i64 {
                return true;
            }
            projection[[y2 as usize, x2 as usize]] <= v
        });

        if is_max {
            maxima.push((v, y * width + x));
        }
    }

    // stable, so equal maxima stay in raster order
    maxima.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut types = vec![0_u8; width * height];
    let mut points = Vec::new();
    let mut plateau = Vec::new();

    for &(v0, offset0) in &maxima {
        if types[offset0] & PROCESSED != 0 {
            continue;
        }

        plateau.clear();
        plateau.push(offset0);
        types[offset0] |= LISTED | EQUAL;

        let mut x_equal = (offset0 % width) as f64;
        let mut y_equal = (offset0 / width) as f64;
        let mut n_equal = 1;
        let mut max_possible = true;
        let mut found_lower = false;

        let mut i = 0;
        'flood: while i < plateau.len() {
            let offset = plateau[i];
            let (x, y) = (offset % width, offset / width);

            for &(dx, dy) in &NEIGHBORS8 {
                let x2 = x as i64 + dx;
                let y2 = y as i64 + dy;
                if x2 < 0 || y2 < 0 || x2 >= width as i64 || y2 >= height as i64 {
                    continue;
                }
                let (x2, y2) = (x2 as usize, y2 as usize);
                let offset2 = y2 * width + x2;

                if types[offset2] & LISTED != 0 {
                    continue;
                }

                if types[offset2] & PROCESSED != 0 {
                    // reached territory of a brighter maximum
                    max_possible = false;
                    break 'flood;
                }

                let v2 = value(offset2);
                if v2 > v0 {
                    max_possible = false;
                    break 'flood;
                } else if v2 >= v0 - tolerance {
                    plateau.push(offset2);
                    types[offset2] |= LISTED;

                    if exclude_edges && on_edge(x2, y2) {
                        max_possible = false;
                        break 'flood;
                    }

                    if v2 == v0 {
                        types[offset2] |= EQUAL;
                        x_equal += x2 as f64;
                        y_equal += y2 as f64;
                        n_equal += 1;
                    }
                } else {
                    found_lower = true;
                }
            }
            i += 1;
        }

        if !found_lower {
            max_possible = false;
        }

        if max_possible {
            x_equal /= n_equal as f64;
            y_equal /= n_equal as f64;

            let mut nearest = offset0;
            let mut min_dist2 = f64::INFINITY;
            for &offset in &plateau {
                if types[offset] & EQUAL == 0 {
                    continue;
                }
                let dx = x_equal - (offset % width) as f64;
                let dy = y_equal - (offset / width) as f64;
                let dist2 = dx * dx + dy * dy;
                if dist2 < min_dist2 {
                    min_dist2 = dist2;
                    nearest = offset;
                }
            }
            points.push(((nearest % width) as u32, (nearest / width) as u32));
        }

        for &offset in &plateau {
            types[offset] &= !(LISTED | EQUAL);
            types[offset] |= PROCESSED;
        }
    }

    return points;
}

// Scan every slice at (x, y) and keep the brightest one in the spot channel.
// Comparison is strict, so the first slice wins ties and an all-zero column
// resolves to z = 0 with zero intensities.
pub fn resolve_z(fish: &Stack, dapi: &Stack, xy: (u32, u32)) -> Spot {
    let (x, y) = (xy.0 as usize, xy.1 as usize);
    let mut spot = Spot {
        x: xy.0,
        y: xy.1,
        z: 0,
        intensity_fish: 0.0,
        intensity_dapi: 0.0,
    };

    let mut max_intensity = 0.0;
    for z in 0..fish.nslices() {
        let intensity = fish.value(x, y, z);
        if intensity > max_intensity {
            max_intensity = intensity;
            spot.z = z;
            spot.intensity_fish = intensity;
            spot.intensity_dapi = if z < dapi.nslices() {
                dapi.value(x, y, z)
            } else {
                0.0
            };
        }
    }

    return spot;
}

pub fn detect_spots(fish: &Stack, dapi: &Stack, tolerance: f32, exclude_edges: bool) -> Vec<Spot> {
    if fish.nslices() == 0 {
        return Vec::new();
    }

    let projection = fish.max_projection();
    return find_candidates(projection.view(), tolerance, exclude_edges)
        .into_iter()
        .map(|xy| resolve_z(fish, dapi, xy))
        .collect();
}

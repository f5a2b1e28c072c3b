use geo::{Area, BoundingRect, Contains, LineString, Point, Polygon};
use ndarray::{Array2, ArrayView2};
use petgraph::unionfind::UnionFind;
use std::collections::HashSet;

// Connected regions of foreground pixels are represented by their traced
// outline. Polygon vertices sit on pixel corners, so pixel (x, y) covers the
// square [x, x+1) x [y, y+1) and is inside a region exactly when its centre
// (x + 0.5, y + 0.5) is inside the polygon.

// Neighbors already visited in a raster scan (W, NW, N, NE).
const PRIOR_NEIGHBORS8: [(i64, i64); 4] = [(-1, 0), (-1, -1), (0, -1), (1, -1)];

// Two-pass 8-connected component labelling. Returns the label image (0 is
// background, components numbered 1..=n in raster order of their first
// pixel) and the number of components.
pub fn label_components(mask: ArrayView2<bool>) -> (Array2<u32>, usize) {
    let (height, width) = mask.dim();
    let mut provisional = Array2::<usize>::zeros((height, width));
    let mut equivalences = Vec::new();
    let mut next = 0;

    for y in 0..height {
        for x in 0..width {
            if !mask[[y, x]] {
                continue;
            }

            let mut current = 0;
            for &(dx, dy) in &PRIOR_NEIGHBORS8 {
                let x2 = x as i64 + dx;
                let y2 = y as i64 + dy;
                if x2 < 0 || y2 < 0 || x2 >= width as i64 {
                    continue;
                }
                let l = provisional[[y2 as usize, x2 as usize]];
                if l == 0 {
                    continue;
                }
                if current == 0 {
                    current = l;
                } else if l != current {
                    equivalences.push((current - 1, l - 1));
                }
            }

            if current == 0 {
                next += 1;
                current = next;
            }
            provisional[[y, x]] = current;
        }
    }

    let mut uf = UnionFind::<usize>::new(next);
    for (a, b) in equivalences {
        uf.union(a, b);
    }

    let mut root_labels = vec![0_u32; next];
    let mut nlabels = 0;
    let mut labels = Array2::<u32>::zeros((height, width));
    for ((y, x), &p) in provisional.indexed_iter() {
        if p == 0 {
            continue;
        }
        let root = uf.find(p - 1);
        if root_labels[root] == 0 {
            nlabels += 1;
            root_labels[root] = nlabels as u32;
        }
        labels[[y, x]] = root_labels[root];
    }

    return (labels, nlabels);
}

type Vertex = (i64, i64);

// Directed crack edge between two pixel corners, tagged with the pixel it bounds.
type Edge = (Vertex, Vertex, Vertex);

// Trace the outer boundary of a set of pixels forming one 8-connected
// component. Every pixel side facing a non-member becomes a directed edge
// running clockwise around its pixel. Edges are chained end to start; where two
// diagonal pixels meet at a corner the walk crosses over to the other pixel, so
// diagonal neighbors share one boundary. Of the resulting rings the one
// enclosing the largest area is the outer boundary; the rest are holes.
pub fn trace_outer_boundary(pixels: &[(i64, i64)]) -> Option<Polygon<f32>> {
    if pixels.is_empty() {
        return None;
    }

    let members: HashSet<(i64, i64)> = pixels.iter().cloned().collect();

    let mut edges: Vec<Edge> = Vec::with_capacity(4 * pixels.len());
    for &(x, y) in &members {
        let p = (x, y);
        if !members.contains(&(x, y - 1)) {
            edges.push(((x, y), (x + 1, y), p));
        }
        if !members.contains(&(x + 1, y)) {
            edges.push(((x + 1, y), (x + 1, y + 1), p));
        }
        if !members.contains(&(x, y + 1)) {
            edges.push(((x + 1, y + 1), (x, y + 1), p));
        }
        if !members.contains(&(x - 1, y)) {
            edges.push(((x, y + 1), (x, y), p));
        }
    }
    edges.sort_unstable();

    let mut visited = vec![false; edges.len()];
    let mut best_ring: Vec<Vertex> = Vec::new();
    let mut best_area = 0;

    for i in 0..edges.len() {
        if visited[i] {
            continue;
        }

        let mut ring = vec![edges[i].0];
        visited[i] = true;
        let mut current = i;

        loop {
            let (_, end, owner) = edges[current];
            let first = edges.partition_point(|e| e.0 < end);
            let last = edges.partition_point(|e| e.0 <= end);

            let mut next = None;
            for j in first..last {
                if visited[j] {
                    continue;
                }
                if next.is_none() || edges[j].2 != owner {
                    next = Some(j);
                }
            }

            match next {
                Some(j) => {
                    visited[j] = true;
                    ring.push(edges[j].0);
                    current = j;
                }
                None => break,
            }
        }

        let area = twice_ring_area(&ring).abs();
        if area > best_area {
            best_area = area;
            best_ring = ring;
        }
    }

    let ring = drop_collinear(&best_ring);
    let coords: Vec<(f32, f32)> = ring.iter().map(|v| (v.0 as f32, v.1 as f32)).collect();
    return Some(Polygon::new(LineString::from(coords), Vec::new()));
}

fn twice_ring_area(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    let mut area = 0;
    for i in 0..n {
        let u = ring[i];
        let v = ring[(i + 1) % n];
        area += u.0 * v.1 - v.0 * u.1;
    }
    return area;
}

fn drop_collinear(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring.to_vec();
    }

    let mut kept = Vec::with_capacity(n);
    for i in 0..n {
        let u = ring[(i + n - 1) % n];
        let v = ring[i];
        let w = ring[(i + 1) % n];
        let cross = (v.0 - u.0) * (w.1 - v.1) - (v.1 - u.1) * (w.0 - v.0);
        if cross != 0 {
            kept.push(v);
        }
    }
    return kept;
}

// A 2D region bounded by a polygon in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelRegion {
    pub polygon: Polygon<f32>,
    pub area: f32,
    bounds: (f32, f32, f32, f32),
}

impl PixelRegion {
    pub fn from_polygon(polygon: Polygon<f32>) -> Self {
        let area = polygon.unsigned_area();
        let bounds = polygon
            .bounding_rect()
            .map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
            .unwrap_or((0.0, 0.0, 0.0, 0.0));
        return PixelRegion {
            polygon,
            area,
            bounds,
        };
    }

    pub fn from_pixels(pixels: &[(i64, i64)]) -> Option<Self> {
        trace_outer_boundary(pixels).map(PixelRegion::from_polygon)
    }

    // (xmin, ymin, xmax, ymax) in pixel-corner coordinates.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.bounds
    }

    pub fn width(&self) -> f32 {
        self.bounds.2 - self.bounds.0
    }

    pub fn height(&self) -> f32 {
        self.bounds.3 - self.bounds.1
    }

    // Area-weighted centroid of the outline, accumulated in f64 so that
    // symmetric outlines on the pixel grid land exactly on their centre.
    pub fn centroid(&self) -> (f32, f32) {
        let mut a = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for line in self.polygon.exterior().lines() {
            let (x0, y0) = (line.start.x as f64, line.start.y as f64);
            let (x1, y1) = (line.end.x as f64, line.end.y as f64);
            let cross = x0 * y1 - x1 * y0;
            a += cross;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }

        if a == 0.0 {
            return (
                (self.bounds.0 + self.bounds.2) / 2.0,
                (self.bounds.1 + self.bounds.3) / 2.0,
            );
        }
        return ((cx / (3.0 * a)) as f32, (cy / (3.0 * a)) as f32);
    }

    pub fn contains_pixel(&self, x: i64, y: i64) -> bool {
        let cx = x as f32 + 0.5;
        let cy = y as f32 + 0.5;
        if cx < self.bounds.0 || cx > self.bounds.2 || cy < self.bounds.1 || cy > self.bounds.3 {
            return false;
        }
        return self.polygon.contains(&Point::new(cx, cy));
    }

    // Every pixel whose centre lies inside the polygon, row by row.
    pub fn pixels(&self) -> Vec<(i64, i64)> {
        let mut pixels = Vec::new();
        let mut crossings = Vec::new();

        let y0 = self.bounds.1.floor() as i64;
        let y1 = self.bounds.3.ceil() as i64;
        for y in y0..y1 {
            let yc = y as f32 + 0.5;

            crossings.clear();
            for line in self.polygon.exterior().lines() {
                let (a, b) = (line.start, line.end);
                if (a.y <= yc) != (b.y <= yc) {
                    crossings.push(a.x + (yc - a.y) * (b.x - a.x) / (b.y - a.y));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));

            for pair in crossings.chunks_exact(2) {
                let first = (pair[0] - 0.5).floor() as i64 + 1;
                let last = (pair[1] - 0.5).ceil() as i64 - 1;
                for x in first..=last {
                    pixels.push((x, y));
                }
            }
        }

        return pixels;
    }
}

// Extract every connected foreground region of `mask` whose area is at least
// `min_area` pixels, in raster order of first pixel. `origin` is the image
// position of mask[[0, 0]], so polygons come back in image coordinates.
//
// Each call works only on its own inputs, so slices and cells can be
// processed independently.
pub fn extract_regions(mask: ArrayView2<bool>, origin: (i64, i64), min_area: f32) -> Vec<PixelRegion> {
    let (labels, nlabels) = label_components(mask);

    let mut component_pixels: Vec<Vec<(i64, i64)>> = vec![Vec::new(); nlabels];
    for ((y, x), &label) in labels.indexed_iter() {
        if label > 0 {
            component_pixels[label as usize - 1].push((origin.0 + x as i64, origin.1 + y as i64));
        }
    }

    return component_pixels
        .iter()
        .filter_map(|pixels| PixelRegion::from_pixels(pixels))
        .filter(|region| region.area >= min_area)
        .collect();
}

// First region of maximal area, if any.
pub fn largest_region(regions: Vec<PixelRegion>) -> Option<PixelRegion> {
    let mut largest: Option<PixelRegion> = None;
    for region in regions {
        match &largest {
            Some(l) if region.area <= l.area => {}
            _ => largest = Some(region),
        }
    }
    return largest;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn square_pixels(x0: i64, y0: i64, size: i64) -> Vec<(i64, i64)> {
        let mut pixels = Vec::new();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                pixels.push((x, y));
            }
        }
        pixels
    }

    #[test]
    fn test_label_components_diagonal_is_connected() {
        let mut mask = Array2::from_elem((5, 5), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true;
        mask[[4, 4]] = true;
        mask[[4, 3]] = true;

        let (labels, n) = label_components(mask.view());
        assert_eq!(n, 2);
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[1, 1]], 1);
        assert_eq!(labels[[4, 3]], 2);
        assert_eq!(labels[[4, 4]], 2);
        assert_eq!(labels[[2, 2]], 0);
    }

    #[test]
    fn test_label_components_u_shape_merges() {
        // two arms that only join at the bottom row
        let mut mask = Array2::from_elem((4, 5), false);
        for y in 0..4 {
            mask[[y, 0]] = true;
            mask[[y, 4]] = true;
        }
        for x in 0..5 {
            mask[[3, x]] = true;
        }
        let (labels, n) = label_components(mask.view());
        assert_eq!(n, 1);
        assert!(labels.iter().all(|&l| l <= 1));
    }

    #[test]
    fn test_single_pixel_boundary() {
        let region = PixelRegion::from_pixels(&[(3, 4)]).unwrap();
        assert_eq!(region.area, 1.0);
        assert_eq!(region.bounds(), (3.0, 4.0, 4.0, 5.0));
        assert!(region.contains_pixel(3, 4));
        assert!(!region.contains_pixel(4, 4));
        assert_eq!(region.polygon.exterior().coords().count(), 5);
    }

    #[test]
    fn test_square_boundary_and_pixels() {
        let region = PixelRegion::from_pixels(&square_pixels(10, 10, 20)).unwrap();
        assert_eq!(region.area, 400.0);
        assert_eq!(region.centroid(), (20.0, 20.0));
        assert!(region.contains_pixel(10, 10));
        assert!(region.contains_pixel(29, 29));
        assert!(!region.contains_pixel(30, 20));
        assert!(!region.contains_pixel(9, 20));
        assert_eq!(region.pixels().len(), 400);
    }

    #[test]
    fn test_hole_is_filled() {
        let mut pixels = square_pixels(0, 0, 3);
        pixels.retain(|&p| p != (1, 1));
        let region = PixelRegion::from_pixels(&pixels).unwrap();
        assert_eq!(region.area, 9.0);
        assert!(region.contains_pixel(1, 1));
        assert_eq!(region.pixels().len(), 9);
    }

    #[test]
    fn test_diagonal_pixels_share_boundary() {
        let region = PixelRegion::from_pixels(&[(0, 0), (1, 1)]).unwrap();
        assert_eq!(region.area, 2.0);
        assert!(region.contains_pixel(0, 0));
        assert!(region.contains_pixel(1, 1));
        assert!(!region.contains_pixel(1, 0));
        assert!(!region.contains_pixel(0, 1));
    }

    #[test]
    fn test_l_shape_pixels_match_members() {
        let pixels = vec![(0, 0), (0, 1), (0, 2), (1, 2), (2, 2)];
        let region = PixelRegion::from_pixels(&pixels).unwrap();
        assert_eq!(region.area, 5.0);
        let mut traced = region.pixels();
        traced.sort();
        let mut expected = pixels.clone();
        expected.sort();
        assert_eq!(traced, expected);
    }

    #[test]
    fn test_extract_regions_filters_by_area() {
        let mut mask = Array2::from_elem((20, 20), false);
        for y in 2..6 {
            for x in 2..6 {
                mask[[y, x]] = true;
            }
        }
        mask[[15, 15]] = true;

        let regions = extract_regions(mask.view(), (100, 200), 4.0);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 16.0);
        assert_eq!(regions[0].bounds(), (102.0, 202.0, 106.0, 206.0));

        let regions = extract_regions(mask.view(), (0, 0), 0.0);
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn test_largest_region_first_wins_ties() {
        let a = PixelRegion::from_pixels(&square_pixels(0, 0, 2)).unwrap();
        let b = PixelRegion::from_pixels(&square_pixels(5, 5, 2)).unwrap();
        let c = PixelRegion::from_pixels(&square_pixels(9, 9, 1)).unwrap();
        let largest = largest_region(vec![c, a.clone(), b]).unwrap();
        assert_eq!(largest, a);
        assert!(largest_region(Vec::new()).is_none());
    }
}

use super::segmentation::CellOutline;
use super::spots::Spot;

// Index of the outline containing each spot. Outlines are tested in order and
// the last one containing the spot wins, so overlapping outlines resolve to
// the highest index.
pub fn assign(spots: &[Spot], outlines: &[CellOutline]) -> Vec<Option<usize>> {
    return spots
        .iter()
        .map(|spot| {
            let mut cell = None;
            for (i, outline) in outlines.iter().enumerate() {
                if outline.contains_pixel(spot.x as i64, spot.y as i64) {
                    cell = Some(i);
                }
            }
            cell
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::regions::PixelRegion;

    fn square(x0: i64, y0: i64, size: i64, label: u32) -> CellOutline {
        let mut pixels = Vec::new();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                pixels.push((x, y));
            }
        }
        let region = PixelRegion::from_pixels(&pixels).unwrap();
        let centroid = region.centroid();
        CellOutline {
            label,
            region,
            centroid,
        }
    }

    fn spot(x: u32, y: u32) -> Spot {
        Spot {
            x,
            y,
            z: 0,
            intensity_fish: 1.0,
            intensity_dapi: 1.0,
        }
    }

    #[test]
    fn test_assign_disjoint() {
        let outlines = vec![square(0, 0, 10, 1), square(20, 0, 10, 2)];
        let spots = vec![spot(5, 5), spot(25, 3), spot(15, 5)];
        assert_eq!(assign(&spots, &outlines), vec![Some(0), Some(1), None]);
    }

    #[test]
    fn test_last_overlapping_outline_wins() {
        let outlines = vec![square(0, 0, 10, 1), square(5, 5, 10, 2), square(30, 30, 5, 3)];
        let spots = vec![spot(7, 7), spot(2, 2)];
        assert_eq!(assign(&spots, &outlines), vec![Some(1), Some(0)]);
    }

    #[test]
    fn test_assigned_spot_is_inside_its_outline() {
        let outlines = vec![square(3, 4, 6, 1), square(12, 2, 9, 2)];
        let spots: Vec<Spot> = (0..25).flat_map(|x| (0..15).map(move |y| spot(x, y))).collect();
        for (spot, cell) in spots.iter().zip(assign(&spots, &outlines)) {
            if let Some(cell) = cell {
                assert!(outlines[cell].contains_pixel(spot.x as i64, spot.y as i64));
            }
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(assign(&[], &[square(0, 0, 4, 1)]).is_empty());
        assert_eq!(assign(&[spot(1, 1)], &[]), vec![None]);
    }
}

use super::stack::Stack;
use ndarray::{Array2, ArrayView2, Zip};

// Rolling-ball background subtraction.
//
// The background under each slice is estimated as the grayscale opening of
// the slice with a spherical structuring element: the surface traced by the
// top of a ball of the given radius rolled underneath the intensity
// landscape. Large balls are applied to a block-minimum shrunken copy of the
// slice and the background is interpolated back to full size.

fn shrink_factor(radius: f32) -> usize {
    if radius <= 10.0 {
        1
    } else if radius <= 30.0 {
        2
    } else if radius <= 100.0 {
        4
    } else {
        8
    }
}

// Offsets and heights of the ball, as (dx, dy, z).
struct Ball {
    offsets: Vec<(i64, i64, f32)>,
}

impl Ball {
    fn new(radius: f32) -> Self {
        let r2 = radius * radius;
        let half = radius.floor().max(1.0) as i64;
        let mut offsets = Vec::new();
        for dy in -half..=half {
            for dx in -half..=half {
                let d2 = (dx * dx + dy * dy) as f32;
                if d2 <= r2 {
                    offsets.push((dx, dy, (r2 - d2).sqrt()));
                }
            }
        }
        return Ball { offsets };
    }
}

fn shrink(image: ArrayView2<f32>, factor: usize) -> Array2<f32> {
    let (height, width) = image.dim();
    let sh = height.div_ceil(factor);
    let sw = width.div_ceil(factor);
    let mut small = Array2::from_elem((sh, sw), f32::INFINITY);
    for ((y, x), &v) in image.indexed_iter() {
        let cell = &mut small[[y / factor, x / factor]];
        *cell = cell.min(v);
    }
    return small;
}

fn open(image: ArrayView2<f32>, ball: &Ball) -> Array2<f32> {
    let (height, width) = image.dim();
    let inside = |x: i64, y: i64| x >= 0 && y >= 0 && x < width as i64 && y < height as i64;

    let mut eroded = Array2::<f32>::zeros((height, width));
    for ((y, x), e) in eroded.indexed_iter_mut() {
        let mut v = f32::INFINITY;
        for &(dx, dy, z) in &ball.offsets {
            let (x2, y2) = (x as i64 + dx, y as i64 + dy);
            if inside(x2, y2) {
                v = v.min(image[[y2 as usize, x2 as usize]] - z);
            }
        }
        *e = v;
    }

    let mut opened = Array2::<f32>::zeros((height, width));
    for ((y, x), o) in opened.indexed_iter_mut() {
        let mut v = f32::NEG_INFINITY;
        for &(dx, dy, z) in &ball.offsets {
            let (x2, y2) = (x as i64 - dx, y as i64 - dy);
            if inside(x2, y2) {
                v = v.max(eroded[[y2 as usize, x2 as usize]] + z);
            }
        }
        *o = v;
    }

    return opened;
}

// Bilinear interpolation of the shrunken background back onto the full
// grid. Shrunken pixel (i, j) sits at the centre of its block.
fn enlarge(small: ArrayView2<f32>, factor: usize, height: usize, width: usize) -> Array2<f32> {
    let (sh, sw) = small.dim();
    if factor == 1 {
        return small.to_owned();
    }

    let centre = (factor as f32 - 1.0) / 2.0;
    let coord = |p: usize, n: usize| -> (usize, usize, f32) {
        let f = ((p as f32 - centre) / factor as f32).clamp(0.0, (n - 1) as f32);
        let i0 = f.floor() as usize;
        let i1 = (i0 + 1).min(n - 1);
        (i0, i1, f - i0 as f32)
    };

    let mut large = Array2::<f32>::zeros((height, width));
    for ((y, x), v) in large.indexed_iter_mut() {
        let (y0, y1, ty) = coord(y, sh);
        let (x0, x1, tx) = coord(x, sw);
        let top = small[[y0, x0]] * (1.0 - tx) + small[[y0, x1]] * tx;
        let bottom = small[[y1, x0]] * (1.0 - tx) + small[[y1, x1]] * tx;
        *v = top * (1.0 - ty) + bottom * ty;
    }
    return large;
}

pub fn subtract_background_slice(image: ArrayView2<f32>, radius: f32) -> Array2<f32> {
    let (height, width) = image.dim();
    if radius <= 0.0 || height == 0 || width == 0 {
        return image.to_owned();
    }

    let factor = shrink_factor(radius);
    let small = shrink(image, factor);
    let ball = Ball::new(radius / factor as f32);
    let background = enlarge(open(small.view(), &ball).view(), factor, height, width);

    let mut result = image.to_owned();
    Zip::from(&mut result)
        .and(&background)
        .for_each(|v, &bg| *v = (*v - bg.min(*v)).max(0.0));
    return result;
}

// Subtract the rolling-ball background from every slice independently.
// A non-positive radius returns an unmodified copy.
pub fn subtract_background(stack: &Stack, radius: f32) -> Stack {
    if radius <= 0.0 {
        return stack.clone();
    }

    let mut data = stack.data.clone();
    Zip::from(data.outer_iter_mut())
        .and(stack.data.outer_iter())
        .par_for_each(|mut dst, src| {
            dst.assign(&subtract_background_slice(src, radius));
        });

    return Stack::new(data, stack.voxel);
}

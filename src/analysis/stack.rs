use anyhow::{bail, Result};
use ndarray::{Array2, Array3, Axis};

// Physical size of one voxel in microns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelSize {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl VoxelSize {
    pub fn new(width: f32, height: f32, depth: f32) -> Self {
        return VoxelSize {
            width,
            height,
            depth,
        };
    }

    // Every dimension has to be a positive, finite length.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [("width", self.width), ("height", self.height), ("depth", self.depth)] {
            if !size.is_finite() || size <= 0.0 {
                bail!("Voxel {} must be a positive number of microns, got {}", name, size);
            }
        }
        return Ok(());
    }

    // Euclidean distance in microns between two voxel positions.
    pub fn distance(&self, a: (f32, f32, f32), b: (f32, f32, f32)) -> f32 {
        let dx = self.width * (a.0 - b.0);
        let dy = self.height * (a.1 - b.1);
        let dz = self.depth * (a.2 - b.2);
        return (dx * dx + dy * dy + dz * dz).sqrt();
    }
}

impl Default for VoxelSize {
    fn default() -> Self {
        return VoxelSize::new(1.0, 1.0, 1.0);
    }
}

/// One channel of a z-stack, indexed `[z, y, x]`, with its calibration.
#[derive(Clone, Debug)]
pub struct Stack {
    pub data: Array3<f32>,
    pub voxel: VoxelSize,
}

impl Stack {
    pub fn new(data: Array3<f32>, voxel: VoxelSize) -> Self {
        return Stack { data, voxel };
    }

    pub fn nslices(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn value(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[[z, y, x]]
    }

    // Maximum intensity projection along z. An empty stack projects to an
    // all-zero image of the same xy extent.
    pub fn max_projection(&self) -> Array2<f32> {
        let mut projection = Array2::<f32>::zeros((self.height(), self.width()));
        for (z, slice) in self.data.axis_iter(Axis(0)).enumerate() {
            if z == 0 {
                projection.assign(&slice);
            } else {
                projection.zip_mut_with(&slice, |p, &v| *p = p.max(v));
            }
        }
        return projection;
    }
}

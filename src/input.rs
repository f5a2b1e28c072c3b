use crate::analysis::stack::{Stack, VoxelSize};
use anyhow::{bail, Context, Result};
use ndarray::{Array2, ArrayD, Axis, Ix2, Ix3};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};
use num_traits::AsPrimitive;
use std::fs::File;
use std::path::Path;

// Read an .npy file of element type `S`, converting to `T`. Returns None if
// the file holds some other element type.
fn try_read_npy<S, T>(path: &Path) -> Result<Option<ArrayD<T>>>
where
    S: ReadableElement + AsPrimitive<T>,
    T: Copy + 'static,
{
    let file = File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    match ArrayD::<S>::read_npy(file) {
        Ok(array) => Ok(Some(array.mapv(|v| v.as_()))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Unable to read {}", path.display())),
    }
}

// Read a numeric .npy array of any common element type.
fn read_npy_any<T>(path: &Path) -> Result<ArrayD<T>>
where
    T: Copy + 'static,
    f32: AsPrimitive<T>,
    f64: AsPrimitive<T>,
    u8: AsPrimitive<T>,
    u16: AsPrimitive<T>,
    u32: AsPrimitive<T>,
    u64: AsPrimitive<T>,
    i8: AsPrimitive<T>,
    i16: AsPrimitive<T>,
    i32: AsPrimitive<T>,
    i64: AsPrimitive<T>,
{
    let readers: [fn(&Path) -> Result<Option<ArrayD<T>>>; 10] = [
        try_read_npy::<f32, T>,
        try_read_npy::<u16, T>,
        try_read_npy::<u8, T>,
        try_read_npy::<f64, T>,
        try_read_npy::<u32, T>,
        try_read_npy::<i32, T>,
        try_read_npy::<i16, T>,
        try_read_npy::<u64, T>,
        try_read_npy::<i64, T>,
        try_read_npy::<i8, T>,
    ];

    for reader in readers {
        if let Some(array) = reader(path)? {
            return Ok(array);
        }
    }
    bail!("{} does not hold a supported numeric type", path.display());
}

// Read the spot and DAPI channels from a `[c, z, y, x]` stack.
pub fn read_stack(
    path: &Path,
    fish_channel: usize,
    dapi_channel: usize,
    voxel: VoxelSize,
) -> Result<(Stack, Stack)> {
    let data = read_npy_any::<f32>(path)?;
    if data.ndim() != 4 {
        bail!(
            "{} has shape {:?}; expected a 4D [channel, z, y, x] stack",
            path.display(),
            data.shape()
        );
    }

    let nchannels = data.len_of(Axis(0));
    for channel in [fish_channel, dapi_channel] {
        if channel >= nchannels {
            bail!(
                "Channel {} requested but {} has only {} channels",
                channel,
                path.display(),
                nchannels
            );
        }
    }

    let channel = |c: usize| -> Result<Stack> {
        let data = data
            .index_axis(Axis(0), c)
            .to_owned()
            .into_dimensionality::<Ix3>()?;
        Ok(Stack::new(data, voxel))
    };

    return Ok((channel(fish_channel)?, channel(dapi_channel)?));
}

// Read a 2D label image. Negative labels are rejected.
pub fn read_labels(path: &Path) -> Result<Array2<u32>> {
    let labels = read_npy_any::<i64>(path)?;
    let labels = labels
        .into_dimensionality::<Ix2>()
        .with_context(|| format!("{} is not a 2D label image", path.display()))?;

    if labels.iter().any(|&label| label < 0 || label > u32::MAX as i64) {
        bail!("{} contains labels outside the range 0..={}", path.display(), u32::MAX);
    }
    return Ok(labels.mapv(|label| label as u32));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};
    use ndarray_npy::WriteNpyExt;
    use tempfile::tempdir;

    #[test]
    fn test_read_u16_stack() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.npy");

        let mut data = Array4::<u16>::zeros((3, 2, 4, 5));
        data[[1, 1, 2, 3]] = 700;
        data[[2, 0, 1, 1]] = 40;
        data.write_npy(File::create(&path).unwrap()).unwrap();

        let voxel = VoxelSize::new(0.1, 0.1, 0.3);
        let (fish, dapi) = read_stack(&path, 1, 2, voxel).unwrap();
        assert_eq!(fish.data.dim(), (2, 4, 5));
        assert_eq!(fish.value(3, 2, 1), 700.0);
        assert_eq!(dapi.value(1, 1, 0), 40.0);
        assert_eq!(dapi.voxel, voxel);
    }

    #[test]
    fn test_read_f32_stack() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.npy");
        let data = Array4::<f32>::from_elem((2, 1, 3, 3), 0.25);
        data.write_npy(File::create(&path).unwrap()).unwrap();

        let (fish, _) = read_stack(&path, 0, 1, VoxelSize::default()).unwrap();
        assert_eq!(fish.value(0, 0, 0), 0.25);
    }

    #[test]
    fn test_stack_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.npy");
        Array4::<u8>::zeros((2, 1, 3, 3))
            .write_npy(File::create(&path).unwrap())
            .unwrap();
        assert!(read_stack(&path, 1, 2, VoxelSize::default()).is_err());

        let flat = dir.path().join("flat.npy");
        Array2::<u8>::zeros((3, 3))
            .write_npy(File::create(&flat).unwrap())
            .unwrap();
        assert!(read_stack(&flat, 0, 0, VoxelSize::default()).is_err());

        assert!(read_stack(&dir.path().join("missing.npy"), 0, 0, VoxelSize::default()).is_err());
    }

    #[test]
    fn test_read_labels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.npy");
        let mut labels = Array2::<i32>::zeros((4, 4));
        labels[[1, 1]] = 3;
        labels.write_npy(File::create(&path).unwrap()).unwrap();

        let labels = read_labels(&path).unwrap();
        assert_eq!(labels[[1, 1]], 3);
        assert_eq!(labels[[0, 0]], 0);

        let mut negative = Array2::<i32>::zeros((2, 2));
        negative[[0, 1]] = -1;
        negative.write_npy(File::create(&path).unwrap()).unwrap();
        assert!(read_labels(&path).is_err());
    }
}

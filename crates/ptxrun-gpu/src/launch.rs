//! Block and grid dimensions for a kernel launch.

use crate::backend::{BackendError, Result};

/// Block size and grid size (in blocks) for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub block: [u32; 3],
    pub grid: [u32; 3],
}

impl LaunchDims {
    /// Derive launch dimensions from total thread counts.
    ///
    /// `global` and `local` are 1 to 3 dimensional and right-padded with 1s.
    /// Without `local` the block is `(1, 1, 1)`. Each global axis must be a
    /// multiple of the matching local axis.
    pub fn new(global: &[usize], local: Option<&[usize]>) -> Result<Self> {
        let threads = pad("global", global)?;
        let block = match local {
            Some(local) => pad("local", local)?,
            None => [1, 1, 1],
        };

        if threads.iter().any(|&g| g == 0) {
            // 0 divides evenly, but the driver rejects a zero-sized grid.
            return Err(BackendError::InvalidLaunch(format!(
                "global size {threads:?} has a zero axis; a grid cannot be empty"
            )));
        }
        if threads.iter().zip(&block).any(|(&g, &l)| l == 0 || g % l != 0) {
            return Err(BackendError::DimensionMismatch {
                global: threads,
                local: block,
            });
        }

        let mut grid = [0usize; 3];
        for i in 0..3 {
            grid[i] = threads[i] / block[i];
        }

        Ok(Self {
            block: to_u32("local", block)?,
            grid: to_u32("grid", grid)?,
        })
    }

    /// Total number of threads launched.
    pub fn total_threads(&self) -> u64 {
        (0..3)
            .map(|i| u64::from(self.block[i]) * u64::from(self.grid[i]))
            .product()
    }
}

#[cfg(feature = "cuda")]
impl From<LaunchDims> for cudarc::driver::LaunchConfig {
    fn from(dims: LaunchDims) -> Self {
        let [bx, by, bz] = dims.block;
        let [gx, gy, gz] = dims.grid;
        cudarc::driver::LaunchConfig {
            grid_dim: (gx, gy, gz),
            block_dim: (bx, by, bz),
            shared_mem_bytes: 0,
        }
    }
}

fn pad(what: &str, dims: &[usize]) -> Result<[usize; 3]> {
    if dims.is_empty() || dims.len() > 3 {
        return Err(BackendError::InvalidLaunch(format!(
            "{what} size must have 1 to 3 dimensions, got {dims:?}"
        )));
    }
    let mut out = [1usize; 3];
    out[..dims.len()].copy_from_slice(dims);
    Ok(out)
}

fn to_u32(what: &str, dims: [usize; 3]) -> Result<[u32; 3]> {
    let mut out = [0u32; 3];
    for (o, &d) in out.iter_mut().zip(&dims) {
        *o = u32::try_from(d).map_err(|_| {
            BackendError::InvalidLaunch(format!("{what} dimension {d} exceeds u32"))
        })?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_divides() {
        let dims = LaunchDims::new(&[64, 8], Some(&[16])).unwrap();
        assert_eq!(dims.block, [16, 1, 1]);
        assert_eq!(dims.grid, [4, 8, 1]);
        assert_eq!(dims.total_threads(), 512);
    }

    #[test]
    fn no_local_means_unit_blocks() {
        let dims = LaunchDims::new(&[3, 5, 7], None).unwrap();
        assert_eq!(dims.block, [1, 1, 1]);
        assert_eq!(dims.grid, [3, 5, 7]);
    }

    #[test]
    fn divisible_pairs_give_elementwise_quotient() {
        for (global, local) in [
            (vec![256], vec![32]),
            (vec![12, 6], vec![4, 3]),
            (vec![8, 8, 8], vec![2, 4, 8]),
            (vec![1], vec![1]),
        ] {
            let dims = LaunchDims::new(&global, Some(&local)).unwrap();
            for i in 0..global.len() {
                assert_eq!(dims.grid[i] as usize, global[i] / local[i]);
                assert_eq!(dims.block[i] as usize, local[i]);
            }
        }
    }

    #[test]
    fn any_indivisible_axis_is_rejected() {
        let err = LaunchDims::new(&[16, 10, 4], Some(&[4, 4, 4])).unwrap_err();
        match err {
            BackendError::DimensionMismatch { global, local } => {
                assert_eq!(global, [16, 10, 4]);
                assert_eq!(local, [4, 4, 4]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Padding makes a missing global axis 1, which a local of 2 cannot divide.
        assert!(matches!(
            LaunchDims::new(&[8], Some(&[2, 2])),
            Err(BackendError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn zero_local_axis_never_divides() {
        assert!(matches!(
            LaunchDims::new(&[8], Some(&[0])),
            Err(BackendError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn malformed_sizes() {
        assert!(matches!(
            LaunchDims::new(&[], None),
            Err(BackendError::InvalidLaunch(_))
        ));
        assert!(matches!(
            LaunchDims::new(&[1, 1, 1, 1], None),
            Err(BackendError::InvalidLaunch(_))
        ));
        assert!(matches!(
            LaunchDims::new(&[0, 4], None),
            Err(BackendError::InvalidLaunch(_))
        ));
    }

    #[test]
    fn zero_global_axis_is_rejected_even_when_divisible() {
        let err = LaunchDims::new(&[8, 0], Some(&[4, 2])).unwrap_err();
        assert!(matches!(err, BackendError::InvalidLaunch(_)));
        assert!(err.to_string().contains("grid cannot be empty"), "{err}");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_grid_is_rejected() {
        let huge = u32::MAX as usize + 1;
        assert!(matches!(
            LaunchDims::new(&[huge], None),
            Err(BackendError::InvalidLaunch(_))
        ));
    }
}

//! Regular 3D scalar volume.

use crate::data::Table;
use crate::error::{OperatorError, Result};

/// A scalar volume on a regular grid, stored x-fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    dims: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    scalars: Vec<f64>,
}

impl ImageData {
    /// Create a zero-filled volume with unit spacing at the origin.
    ///
    /// Fails when the voxel count overflows or cannot be allocated.
    pub fn new(dims: [usize; 3]) -> Result<Self> {
        let count = Self::voxel_count(dims)?;
        let mut scalars = Vec::new();
        scalars.try_reserve_exact(count).map_err(|e| {
            OperatorError::Data(format!(
                "cannot allocate a {}x{}x{} volume: {}",
                dims[0], dims[1], dims[2], e
            ))
        })?;
        scalars.resize(count, 0.0);
        Ok(Self {
            dims,
            spacing: [1.0; 3],
            origin: [0.0; 3],
            scalars,
        })
    }

    /// Number of voxels in a volume of `dims`, checked for overflow.
    pub fn voxel_count(dims: [usize; 3]) -> Result<usize> {
        dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| {
                OperatorError::Data(format!(
                    "a {}x{}x{} volume has too many voxels",
                    dims[0], dims[1], dims[2]
                ))
            })
    }

    /// Wrap existing scalars. The length must match the dimensions.
    pub fn from_scalars(dims: [usize; 3], scalars: Vec<f64>) -> Result<Self> {
        let expected = Self::voxel_count(dims)?;
        if scalars.len() != expected {
            return Err(OperatorError::Data(format!(
                "{} scalars do not fill a {}x{}x{} volume ({} expected)",
                scalars.len(),
                dims[0],
                dims[1],
                dims[2],
                expected
            )));
        }
        Ok(Self {
            dims,
            spacing: [1.0; 3],
            origin: [0.0; 3],
            scalars,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn set_spacing(&mut self, spacing: [f64; 3]) {
        self.spacing = spacing;
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn set_origin(&mut self, origin: [f64; 3]) {
        self.origin = origin;
    }

    pub fn len(&self) -> usize {
        self.scalars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    pub fn scalars(&self) -> &[f64] {
        &self.scalars
    }

    pub fn scalars_mut(&mut self) -> &mut [f64] {
        &mut self.scalars
    }

    /// Replace all scalars; the length must stay the same.
    pub fn set_scalars(&mut self, scalars: Vec<f64>) -> Result<()> {
        if scalars.len() != self.scalars.len() {
            return Err(OperatorError::Data(format!(
                "expected {} scalars, got {}",
                self.scalars.len(),
                scalars.len()
            )));
        }
        self.scalars = scalars;
        Ok(())
    }

    /// Linear index of voxel (x, y, z), if inside the volume.
    pub fn index_of(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        let [nx, ny, nz] = self.dims;
        if x < nx && y < ny && z < nz {
            Some(x + nx * (y + ny * z))
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.scalars.get(index).copied()
    }

    /// Set one scalar. Returns false when the index is out of range.
    pub fn set(&mut self, index: usize, value: f64) -> bool {
        match self.scalars.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.scalars.iter_mut().for_each(|v| *v = value);
    }

    /// Minimum and maximum scalar, ignoring NaN. `None` for empty volumes.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.scalars
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    pub fn mean(&self) -> Option<f64> {
        if self.scalars.is_empty() {
            None
        } else {
            Some(self.scalars.iter().sum::<f64>() / self.scalars.len() as f64)
        }
    }

    /// Binary mask of the same geometry: 1.0 where `lo <= v <= hi`.
    pub fn threshold(&self, lo: f64, hi: f64) -> ImageData {
        ImageData {
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            scalars: self
                .scalars
                .iter()
                .map(|&v| if v >= lo && v <= hi { 1.0 } else { 0.0 })
                .collect(),
        }
    }

    /// Histogram over the scalar range as a `value`/`count` table, where
    /// `value` is the bin centre.
    pub fn histogram(&self, bins: usize) -> Result<Table> {
        if bins == 0 {
            return Err(OperatorError::Data(
                "histogram needs at least one bin".to_string(),
            ));
        }

        let mut table = Table::new(vec!["value".to_string(), "count".to_string()]);
        let Some((lo, hi)) = self.range() else {
            return Ok(table);
        };

        let width = (hi - lo) / bins as f64;
        let mut counts = Vec::new();
        counts
            .try_reserve_exact(bins)
            .map_err(|e| OperatorError::Data(format!("cannot allocate {} bins: {}", bins, e)))?;
        counts.resize(bins, 0u64);
        for &v in self.scalars.iter().filter(|v| !v.is_nan()) {
            let bin = if width > 0.0 {
                (((v - lo) / width) as usize).min(bins - 1)
            } else {
                0
            };
            counts[bin] += 1;
        }

        for (i, count) in counts.into_iter().enumerate() {
            let centre = lo + width * (i as f64 + 0.5);
            table.add_row(vec![centre, count as f64])?;
        }
        Ok(table)
    }
}

//! `CopyToMD`: the converted X value, and the numeric vertical axis when
//! the input has one, become MD coordinates without momentum transfer.

use super::{CoordinateMapping, DimensionFrame};
use mdconv_core::{AffineTransform, DetectorGeometryCache, Error, Result, UnitKind};
use std::sync::Arc;

/// Mapping for the `CopyToMD` mode.
#[derive(Debug, Clone)]
pub struct CopyToMdMapping {
    frame: DimensionFrame,
    target: UnitKind,
    vertical_axis: Option<Vec<f64>>,
    projection: Option<AffineTransform>,
    cache: Arc<DetectorGeometryCache>,
    current_y: f64,
}

impl CopyToMdMapping {
    pub(crate) fn new(
        frame: DimensionFrame,
        target: UnitKind,
        vertical_axis: Option<Vec<f64>>,
        projection: Option<AffineTransform>,
        cache: Arc<DetectorGeometryCache>,
    ) -> Result<Self> {
        let n_matrix = 1 + usize::from(vertical_axis.is_some());
        let projection = match projection {
            Some(p) if p.in_dims() != n_matrix || p.out_dims() != n_matrix => {
                return Err(Error::DimensionMismatch(format!(
                    "CopyToMD projection maps {}D to {}D, need {n_matrix}D to {n_matrix}D",
                    p.in_dims(),
                    p.out_dims()
                )));
            }
            Some(p) if p.is_identity() => None,
            other => other,
        };
        Ok(Self {
            frame,
            target,
            vertical_axis,
            projection,
            cache,
            current_y: 0.0,
        })
    }

    fn n_matrix(&self) -> usize {
        1 + usize::from(self.vertical_axis.is_some())
    }
}

impl CoordinateMapping for CopyToMdMapping {
    fn target_unit(&self) -> UnitKind {
        self.target
    }

    fn n_dims(&self) -> usize {
        self.frame.n_dims()
    }

    fn calc_generic_coordinates(&self, coords: &mut [f64], n_dims: usize) -> bool {
        self.frame.fill_generic(coords, n_dims)
    }

    fn calc_detector_dependent_coordinates(&mut self, coords: &mut [f64], slot: usize) -> bool {
        let Some(axis) = &self.vertical_axis else {
            return true;
        };
        self.current_y = axis[self.cache.input_row(slot)];
        if self.projection.is_none() {
            if !self.frame.contains(1, self.current_y) {
                return false;
            }
            coords[1] = self.current_y;
        }
        true
    }

    #[inline]
    fn calc_sample_coordinate(
        &self,
        value: f64,
        coords: &mut [f64],
        _signal: &mut f64,
        _error_sq: &mut f64,
    ) -> bool {
        match &self.projection {
            None => {
                coords[0] = value;
                self.frame.contains(0, value)
            }
            Some(p) => {
                let n = self.n_matrix();
                let input = [value, self.current_y];
                p.apply_into(&input[..n], &mut coords[..n]);
                (0..n).all(|d| self.frame.contains(d, coords[d]))
            }
        }
    }
}

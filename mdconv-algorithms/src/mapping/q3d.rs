//! `Q3D`: momentum-transfer vector in the lab frame, projected by the
//! destination transform, with energy transfer as a fourth dimension in
//! direct and indirect geometry.

use super::{CoordinateMapping, DimensionFrame, Kinematics};
use mdconv_core::{AffineTransform, EnergyMode, Error, Result, UnitKind};
use std::f64::consts::PI;

/// Mapping for the `Q3D` mode.
#[derive(Debug, Clone)]
pub struct Q3dMapping {
    frame: DimensionFrame,
    kinematics: Kinematics,
    projection: AffineTransform,
    lorentz: bool,
    sin_theta_sq: f64,
}

impl Q3dMapping {
    pub(crate) fn new(
        frame: DimensionFrame,
        kinematics: Kinematics,
        projection: Option<AffineTransform>,
        lorentz: bool,
    ) -> Result<Self> {
        let projection = projection.unwrap_or_else(|| AffineTransform::identity(3));
        if projection.in_dims() != 3 || projection.out_dims() != 3 {
            return Err(Error::DimensionMismatch(format!(
                "Q3D projection maps {}D to {}D, need 3D to 3D",
                projection.in_dims(),
                projection.out_dims()
            )));
        }
        if lorentz && kinematics.emode() != EnergyMode::Elastic {
            return Err(Error::InvalidArgument(
                "Lorentz correction only applies to elastic geometry".to_string(),
            ));
        }
        Ok(Self {
            frame,
            kinematics,
            projection,
            lorentz,
            sin_theta_sq: 0.0,
        })
    }
}

impl CoordinateMapping for Q3dMapping {
    fn target_unit(&self) -> UnitKind {
        if self.kinematics.emode().is_inelastic() {
            UnitKind::DeltaE
        } else {
            UnitKind::Momentum
        }
    }

    fn n_dims(&self) -> usize {
        self.frame.n_dims()
    }

    fn calc_generic_coordinates(&self, coords: &mut [f64], n_dims: usize) -> bool {
        self.frame.fill_generic(coords, n_dims)
    }

    fn calc_detector_dependent_coordinates(&mut self, _coords: &mut [f64], slot: usize) -> bool {
        if !self.kinematics.advance(slot) {
            return false;
        }
        if self.lorentz {
            let sin_theta = (0.5 * self.kinematics.two_theta()).sin();
            self.sin_theta_sq = sin_theta * sin_theta;
        }
        true
    }

    #[inline]
    fn calc_sample_coordinate(
        &self,
        value: f64,
        coords: &mut [f64],
        signal: &mut f64,
        error_sq: &mut f64,
    ) -> bool {
        if self.kinematics.emode().is_inelastic() {
            if !self.frame.contains(3, value) {
                return false;
            }
            coords[3] = value;
        }
        let Some((q, k)) = self.kinematics.q_lab(value) else {
            return false;
        };
        self.projection.apply_into(&q.to_array(), &mut coords[..3]);
        if !(0..3).all(|d| self.frame.contains(d, coords[d])) {
            return false;
        }
        if self.lorentz {
            let inv_lambda = k / (2.0 * PI);
            let factor = self.sin_theta_sq * inv_lambda.powi(4);
            *signal *= factor;
            *error_sq *= factor * factor;
        }
        true
    }
}

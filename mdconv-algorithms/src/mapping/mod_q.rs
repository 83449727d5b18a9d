//! `|Q|`: modulus of the momentum transfer, with energy transfer as a
//! second dimension in direct and indirect geometry.

use super::{CoordinateMapping, DimensionFrame, Kinematics};
use mdconv_core::UnitKind;

/// Mapping for the `|Q|` mode.
#[derive(Debug, Clone)]
pub struct ModQMapping {
    frame: DimensionFrame,
    kinematics: Kinematics,
}

impl ModQMapping {
    pub(crate) fn new(frame: DimensionFrame, kinematics: Kinematics) -> Self {
        Self { frame, kinematics }
    }
}

impl CoordinateMapping for ModQMapping {
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
        self.kinematics.advance(slot)
    }

    #[inline]
    fn calc_sample_coordinate(
        &self,
        value: f64,
        coords: &mut [f64],
        _signal: &mut f64,
        _error_sq: &mut f64,
    ) -> bool {
        if self.kinematics.emode().is_inelastic() {
            if !self.frame.contains(1, value) {
                return false;
            }
            coords[1] = value;
        }
        let Some((q, _)) = self.kinematics.q_lab(value) else {
            return false;
        };
        coords[0] = q.norm();
        self.frame.contains(0, coords[0])
    }
}

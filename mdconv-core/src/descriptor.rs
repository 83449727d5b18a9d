//! Description of the destination MD event store.

use crate::geometry::EnergyMode;
use crate::transform::AffineTransform;
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One axis of the destination store.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DimensionSpec {
    pub name: String,
    pub units: String,
    pub min: f64,
    pub max: f64,
}

impl DimensionSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, units: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            min,
            max,
        }
    }

    /// Half-open range check `[min, max)`. NaN is never inside.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }
}

/// What the outer layer wants the conversion to produce.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DestinationDescriptor {
    pub dimensions: Vec<DimensionSpec>,
    /// Mapping mode id (`CopyToMD`, `|Q|`, `Q3D`).
    pub mode: String,
    /// Unit of the converted X value; `None` lets the mode decide.
    #[cfg_attr(feature = "serde", serde(default))]
    pub target_unit: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub emode: EnergyMode,
    #[cfg_attr(feature = "serde", serde(default))]
    pub fixed_energy: Option<f64>,
    /// Projection applied to the mode's matrix dimensions.
    #[cfg_attr(feature = "serde", serde(default))]
    pub projection: Option<AffineTransform>,
    /// Run logs supplying the trailing dimensions, in order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub extra_dimensions: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub run_index: u16,
    /// Scale elastic Q3D signals by sin^2(theta) / lambda^4.
    #[cfg_attr(feature = "serde", serde(default))]
    pub lorentz_correction: bool,
}

impl DestinationDescriptor {
    /// Creates a descriptor for `mode` with no dimensions yet.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            dimensions: Vec::new(),
            mode: mode.into(),
            target_unit: None,
            emode: EnergyMode::Undefined,
            fixed_energy: None,
            projection: None,
            extra_dimensions: Vec::new(),
            run_index: 0,
            lorentz_correction: false,
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dim: DimensionSpec) -> Self {
        self.dimensions.push(dim);
        self
    }

    #[must_use]
    pub fn with_target_unit(mut self, unit: impl Into<String>) -> Self {
        self.target_unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_energy_mode(mut self, emode: EnergyMode) -> Self {
        self.emode = emode;
        self
    }

    #[must_use]
    pub fn with_fixed_energy(mut self, energy: f64) -> Self {
        self.fixed_energy = Some(energy);
        self
    }

    #[must_use]
    pub fn with_projection(mut self, projection: AffineTransform) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Adds a trailing dimension filled from run log `log_name`.
    #[must_use]
    pub fn with_extra_dimension(mut self, log_name: impl Into<String>) -> Self {
        self.extra_dimensions.push(log_name.into());
        self
    }

    #[must_use]
    pub fn with_run_index(mut self, run_index: u16) -> Self {
        self.run_index = run_index;
        self
    }

    #[must_use]
    pub fn with_lorentz_correction(mut self, enabled: bool) -> Self {
        self.lorentz_correction = enabled;
        self
    }

    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of dimensions computed by the mapping mode itself.
    #[must_use]
    pub fn n_matrix_dims(&self) -> usize {
        self.n_dims().saturating_sub(self.extra_dimensions.len())
    }

    /// Checks ranges and energy settings.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for empty or inverted ranges, a
    /// non-positive fixed energy, or more extra dimensions than dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(Error::InvalidArgument(
                "destination needs at least one dimension".to_string(),
            ));
        }
        for dim in &self.dimensions {
            if !(dim.min < dim.max) {
                return Err(Error::InvalidArgument(format!(
                    "dimension '{}' has empty range [{}, {})",
                    dim.name, dim.min, dim.max
                )));
            }
        }
        if self.extra_dimensions.len() >= self.dimensions.len() {
            return Err(Error::InvalidArgument(format!(
                "{} extra dimensions leave no room in {} dimensions",
                self.extra_dimensions.len(),
                self.dimensions.len()
            )));
        }
        if let Some(e) = self.fixed_energy {
            if !(e.is_finite() && e > 0.0) {
                return Err(Error::InvalidArgument(format!(
                    "fixed energy must be positive (got {e})"
                )));
            }
        }
        Ok(())
    }

    /// `[min, max)` extents of every dimension.
    #[must_use]
    pub fn extents(&self) -> Vec<(f64, f64)> {
        self.dimensions.iter().map(|d| (d.min, d.max)).collect()
    }
}

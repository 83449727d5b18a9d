//! Instrument geometry: positions, detectors and energy-analysis modes.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Detector identifier as stored in the instrument definition.
pub type DetectorId = u32;

/// Cartesian 3-vector in metres (positions) or unit-less (directions).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct V3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl V3D {
    /// Beam axis used by the lab frame.
    pub const BEAM: V3D = V3D::new(0.0, 0.0, 1.0);

    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    #[inline]
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    #[inline]
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Euclidean distance to another point.
    #[inline]
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        self.sub(other).norm()
    }

    /// Returns the unit vector, or `None` for a zero-length vector.
    #[must_use]
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        (n > 0.0).then(|| self.scale(1.0 / n))
    }

    #[must_use]
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Energy-analysis mode of the instrument.
///
/// The integer codes (-1, 0, 1, 2) are the ones used by run metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnergyMode {
    #[default]
    Undefined,
    Elastic,
    /// Fixed incident energy (chopper spectrometers).
    Direct,
    /// Fixed final energy (analyser crystals).
    Indirect,
}

impl EnergyMode {
    /// Integer code of this mode.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            EnergyMode::Undefined => -1,
            EnergyMode::Elastic => 0,
            EnergyMode::Direct => 1,
            EnergyMode::Indirect => 2,
        }
    }

    /// True for modes that measure an energy transfer.
    #[must_use]
    pub fn is_inelastic(self) -> bool {
        matches!(self, EnergyMode::Direct | EnergyMode::Indirect)
    }
}

impl TryFrom<i32> for EnergyMode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            -1 => Ok(EnergyMode::Undefined),
            0 => Ok(EnergyMode::Elastic),
            1 => Ok(EnergyMode::Direct),
            2 => Ok(EnergyMode::Indirect),
            other => Err(Error::InvalidArgument(format!(
                "energy mode must be one of -1, 0, 1, 2 (got {other})"
            ))),
        }
    }
}

/// A single detector pixel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Detector {
    pub id: DetectorId,
    pub position: V3D,
    /// Monitors see the direct beam and never contribute events.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_monitor: bool,
    /// Analyser energy (meV) for indirect-geometry detectors.
    #[cfg_attr(feature = "serde", serde(default))]
    pub fixed_energy: Option<f64>,
}

impl Detector {
    #[must_use]
    pub fn new(id: DetectorId, position: V3D) -> Self {
        Self {
            id,
            position,
            is_monitor: false,
            fixed_energy: None,
        }
    }

    #[must_use]
    pub fn monitor(id: DetectorId, position: V3D) -> Self {
        Self {
            is_monitor: true,
            ..Self::new(id, position)
        }
    }

    #[must_use]
    pub fn with_fixed_energy(mut self, energy: f64) -> Self {
        self.fixed_energy = Some(energy);
        self
    }
}

/// Instrument definition: source, sample and detector pixels.
///
/// Workspaces hold instruments behind an `Arc`; the geometry cache uses the
/// pointer identity of that `Arc` to decide whether it is still valid.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instrument {
    pub name: String,
    pub source: Option<V3D>,
    pub sample: Option<V3D>,
    pub detectors: Vec<Detector>,
}

impl Instrument {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_source(mut self, position: V3D) -> Self {
        self.source = Some(position);
        self
    }

    #[must_use]
    pub fn with_sample(mut self, position: V3D) -> Self {
        self.sample = Some(position);
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detectors.push(detector);
        self
    }

    /// True when both source and sample are defined.
    #[must_use]
    pub fn has_beamline(&self) -> bool {
        self.source.is_some() && self.sample.is_some()
    }

    /// Source position.
    ///
    /// # Errors
    /// Returns `InstrumentDefinition` if the source is not defined.
    pub fn source_position(&self) -> Result<V3D> {
        self.source.ok_or_else(|| {
            Error::InstrumentDefinition(format!("instrument '{}' has no source", self.name))
        })
    }

    /// Sample position.
    ///
    /// # Errors
    /// Returns `InstrumentDefinition` if the sample is not defined.
    pub fn sample_position(&self) -> Result<V3D> {
        self.sample.ok_or_else(|| {
            Error::InstrumentDefinition(format!(
                "instrument '{}' has no sample position",
                self.name
            ))
        })
    }
}

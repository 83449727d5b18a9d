//! Unit registry and time-of-flight formulas.
//!
//! Every unit knows how to go to and from time-of-flight (microseconds) for
//! a given flight path. Pairs related by a plain power law (for example
//! wavelength and energy) also register a quick `factor * x^power`
//! conversion that needs no geometry.
#![allow(clippy::doc_markdown)]

use crate::geometry::EnergyMode;
use crate::{Error, Result};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Planck constant (J s).
pub const PLANCK: f64 = 6.626_068_96e-34;
/// Neutron mass (kg).
pub const NEUTRON_MASS: f64 = 1.674_927_211e-27;
/// One milli-electron-volt in joules.
pub const MEV: f64 = 1.602_176_487e-22;
/// meV to inverse centimetres.
pub const MEV_TO_WAVENUMBER: f64 = 8.065_544_65;

const MICROSECONDS: f64 = 1e6;
const ANGSTROMS: f64 = 1e10;

/// `E[meV] = WAVELENGTH_ENERGY_FACTOR / lambda[A]^2`.
#[must_use]
pub fn wavelength_energy_factor() -> f64 {
    ANGSTROMS * ANGSTROMS * PLANCK * PLANCK / (2.0 * NEUTRON_MASS * MEV)
}

/// `E[meV] = energy_to_k_squared() * k[1/A]^2`.
#[must_use]
pub fn energy_to_k_squared() -> f64 {
    wavelength_energy_factor() / (4.0 * PI * PI)
}

/// Flight time in microseconds per metre at 1 meV.
fn flight_time_per_metre() -> f64 {
    (NEUTRON_MASS / (2.0 * MEV)).sqrt() * MICROSECONDS
}

/// Registered units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnitKind {
    Tof,
    Wavelength,
    Energy,
    EnergyInWavenumber,
    /// Neutron wavevector k = 2 pi / lambda.
    Momentum,
    DSpacing,
    /// Elastic |Q|.
    MomentumTransfer,
    QSquared,
    DeltaE,
    DeltaEInWavenumber,
}

impl UnitKind {
    pub const ALL: [UnitKind; 10] = [
        UnitKind::Tof,
        UnitKind::Wavelength,
        UnitKind::Energy,
        UnitKind::EnergyInWavenumber,
        UnitKind::Momentum,
        UnitKind::DSpacing,
        UnitKind::MomentumTransfer,
        UnitKind::QSquared,
        UnitKind::DeltaE,
        UnitKind::DeltaEInWavenumber,
    ];

    /// Registry identifier.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            UnitKind::Tof => "TOF",
            UnitKind::Wavelength => "Wavelength",
            UnitKind::Energy => "Energy",
            UnitKind::EnergyInWavenumber => "Energy_inWavenumber",
            UnitKind::Momentum => "Momentum",
            UnitKind::DSpacing => "dSpacing",
            UnitKind::MomentumTransfer => "MomentumTransfer",
            UnitKind::QSquared => "QSquared",
            UnitKind::DeltaE => "DeltaE",
            UnitKind::DeltaEInWavenumber => "DeltaE_inWavenumber",
        }
    }

    /// Physical unit label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            UnitKind::Tof => "microsecond",
            UnitKind::Wavelength | UnitKind::DSpacing => "Angstrom",
            UnitKind::Energy | UnitKind::DeltaE => "meV",
            UnitKind::EnergyInWavenumber | UnitKind::DeltaEInWavenumber => "cm^-1",
            UnitKind::Momentum | UnitKind::MomentumTransfer => "Angstrom^-1",
            UnitKind::QSquared => "Angstrom^-2",
        }
    }

    /// Looks up a unit by registry identifier.
    ///
    /// # Errors
    /// Returns `UnknownUnit` for identifiers outside the registry.
    pub fn from_id(id: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|u| u.id() == id)
            .ok_or_else(|| Error::UnknownUnit(id.to_string()))
    }

    /// True for energy-transfer units, which need a direct or indirect
    /// energy mode.
    #[must_use]
    pub fn is_energy_transfer(self) -> bool {
        matches!(self, UnitKind::DeltaE | UnitKind::DeltaEInWavenumber)
    }

    /// Geometry-free conversion to `target`, if one is registered.
    #[must_use]
    pub fn quick_conversion(self, target: UnitKind) -> Option<QuickConversion> {
        let lambda_e = wavelength_energy_factor();
        let two_pi = 2.0 * PI;
        let (factor, power) = match (self, target) {
            (UnitKind::Wavelength, UnitKind::Energy) => (lambda_e, -2.0),
            (UnitKind::Wavelength, UnitKind::EnergyInWavenumber) => {
                (lambda_e * MEV_TO_WAVENUMBER, -2.0)
            }
            (UnitKind::Wavelength | UnitKind::Momentum, UnitKind::Momentum | UnitKind::Wavelength) => {
                (two_pi, -1.0)
            }
            (UnitKind::Energy, UnitKind::EnergyInWavenumber)
            | (UnitKind::DeltaE, UnitKind::DeltaEInWavenumber) => (MEV_TO_WAVENUMBER, 1.0),
            (UnitKind::EnergyInWavenumber, UnitKind::Energy)
            | (UnitKind::DeltaEInWavenumber, UnitKind::DeltaE) => (1.0 / MEV_TO_WAVENUMBER, 1.0),
            (UnitKind::Energy, UnitKind::Wavelength) => (lambda_e.sqrt(), -0.5),
            (UnitKind::Energy, UnitKind::Momentum) => (two_pi / lambda_e.sqrt(), 0.5),
            (UnitKind::EnergyInWavenumber, UnitKind::Wavelength) => {
                ((lambda_e * MEV_TO_WAVENUMBER).sqrt(), -0.5)
            }
            (UnitKind::EnergyInWavenumber, UnitKind::Momentum) => {
                (two_pi / (lambda_e * MEV_TO_WAVENUMBER).sqrt(), 0.5)
            }
            (UnitKind::Momentum, UnitKind::Energy) => (lambda_e / (two_pi * two_pi), 2.0),
            (UnitKind::Momentum, UnitKind::EnergyInWavenumber) => {
                (lambda_e * MEV_TO_WAVENUMBER / (two_pi * two_pi), 2.0)
            }
            (UnitKind::DSpacing, UnitKind::MomentumTransfer)
            | (UnitKind::MomentumTransfer, UnitKind::DSpacing) => (two_pi, -1.0),
            (UnitKind::DSpacing, UnitKind::QSquared) => (two_pi * two_pi, -2.0),
            (UnitKind::QSquared, UnitKind::DSpacing) => (two_pi, -0.5),
            (UnitKind::MomentumTransfer, UnitKind::QSquared) => (1.0, 2.0),
            (UnitKind::QSquared, UnitKind::MomentumTransfer) => (1.0, 0.5),
            _ => return None,
        };
        if self == target {
            return None;
        }
        Some(QuickConversion { factor, power })
    }
}

impl FromStr for UnitKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_id(s)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// `target = factor * source^power`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuickConversion {
    pub factor: f64,
    pub power: f64,
}

impl QuickConversion {
    #[inline]
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        self.factor * value.powf(self.power)
    }
}

/// Flight-path parameters for a single detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TofParameters {
    /// Source to sample (m).
    pub l1: f64,
    /// Sample to detector (m).
    pub l2: f64,
    /// Scattering angle (rad).
    pub two_theta: f64,
    pub emode: EnergyMode,
    /// Incident (direct) or final (indirect) energy in meV.
    pub efixed: f64,
}

/// A unit's TOF formula bound to one detector's flight path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TofConversion {
    kind: UnitKind,
    emode: EnergyMode,
    factor: f64,
    offset: f64,
    efixed: f64,
}

impl Default for TofConversion {
    fn default() -> Self {
        Self {
            kind: UnitKind::Tof,
            emode: EnergyMode::Undefined,
            factor: 1.0,
            offset: 0.0,
            efixed: 0.0,
        }
    }
}

impl TofConversion {
    /// Precomputes the factors of `kind` for the given flight path.
    ///
    /// Energy-transfer units outside direct/indirect mode produce NaN.
    #[must_use]
    pub fn new(kind: UnitKind, p: &TofParameters) -> Self {
        let per_metre = flight_time_per_metre();
        let fixed_time = |length: f64| length * per_metre / p.efixed.sqrt();
        let (factor, offset) = match kind {
            UnitKind::Tof => (1.0, 0.0),
            UnitKind::Wavelength | UnitKind::Momentum => {
                let (flight, offset) = match p.emode {
                    EnergyMode::Direct => (p.l2, fixed_time(p.l1)),
                    EnergyMode::Indirect => (p.l1, fixed_time(p.l2)),
                    EnergyMode::Elastic | EnergyMode::Undefined => (p.l1 + p.l2, 0.0),
                };
                (
                    NEUTRON_MASS * flight / PLANCK * MICROSECONDS / ANGSTROMS,
                    offset,
                )
            }
            UnitKind::Energy | UnitKind::EnergyInWavenumber => (per_metre * (p.l1 + p.l2), 0.0),
            UnitKind::DSpacing | UnitKind::MomentumTransfer | UnitKind::QSquared => {
                let sin_theta = (p.two_theta / 2.0).sin();
                (
                    2.0 * NEUTRON_MASS * (p.l1 + p.l2) * sin_theta / PLANCK * MICROSECONDS
                        / ANGSTROMS,
                    0.0,
                )
            }
            UnitKind::DeltaE | UnitKind::DeltaEInWavenumber => match p.emode {
                EnergyMode::Direct => (per_metre * p.l2, fixed_time(p.l1)),
                EnergyMode::Indirect => (per_metre * p.l1, fixed_time(p.l2)),
                EnergyMode::Elastic | EnergyMode::Undefined => (f64::NAN, f64::NAN),
            },
        };
        Self {
            kind,
            emode: p.emode,
            factor,
            offset,
            efixed: p.efixed,
        }
    }

    /// Converts a value of this unit to TOF (microseconds).
    ///
    /// Energy transfers that leave no final (direct) or initial (indirect)
    /// energy return `f64::MAX`.
    #[must_use]
    pub fn to_tof(&self, x: f64) -> f64 {
        let two_pi = 2.0 * PI;
        match self.kind {
            UnitKind::Tof => x,
            UnitKind::Wavelength | UnitKind::DSpacing => self.factor * x + self.offset,
            UnitKind::Momentum | UnitKind::MomentumTransfer => two_pi * self.factor / x + self.offset,
            UnitKind::Energy => self.factor / x.sqrt(),
            UnitKind::EnergyInWavenumber => self.factor / (x / MEV_TO_WAVENUMBER).sqrt(),
            UnitKind::QSquared => two_pi * self.factor / x.sqrt(),
            UnitKind::DeltaE | UnitKind::DeltaEInWavenumber => {
                let transfer = x / self.energy_scale();
                let remaining = match self.emode {
                    EnergyMode::Indirect => self.efixed + transfer,
                    _ => self.efixed - transfer,
                };
                if remaining <= 0.0 {
                    return f64::MAX;
                }
                self.offset + self.factor / remaining.sqrt()
            }
        }
    }

    /// Converts TOF (microseconds) to this unit.
    ///
    /// Energy transfers from a TOF no later than the fixed-energy leg's
    /// flight time return `f64::MAX` (direct) or `-f64::MAX` (indirect).
    #[must_use]
    pub fn from_tof(&self, tof: f64) -> f64 {
        let two_pi = 2.0 * PI;
        match self.kind {
            UnitKind::Tof => tof,
            UnitKind::Wavelength | UnitKind::DSpacing => (tof - self.offset) / self.factor,
            UnitKind::Momentum | UnitKind::MomentumTransfer => {
                two_pi * self.factor / (tof - self.offset)
            }
            UnitKind::Energy => (self.factor / tof).powi(2),
            UnitKind::EnergyInWavenumber => MEV_TO_WAVENUMBER * (self.factor / tof).powi(2),
            UnitKind::QSquared => (two_pi * self.factor / tof).powi(2),
            UnitKind::DeltaE | UnitKind::DeltaEInWavenumber => {
                let flight = tof - self.offset;
                if flight <= 0.0 {
                    return match self.emode {
                        EnergyMode::Indirect => -f64::MAX,
                        _ => f64::MAX,
                    };
                }
                let energy = (self.factor / flight).powi(2);
                let transfer = match self.emode {
                    EnergyMode::Indirect => energy - self.efixed,
                    _ => self.efixed - energy,
                };
                transfer * self.energy_scale()
            }
        }
    }

    fn energy_scale(&self) -> f64 {
        if self.kind == UnitKind::DeltaEInWavenumber {
            MEV_TO_WAVENUMBER
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;

    fn params(emode: EnergyMode) -> TofParameters {
        TofParameters {
            l1: 10.0,
            l2: 2.5,
            two_theta: 0.7,
            emode,
            efixed: 60.0,
        }
    }

    #[test]
    fn test_registry_ids() {
        for unit in UnitKind::ALL {
            assert_eq!(UnitKind::from_id(unit.id()).unwrap(), unit);
            assert_eq!(unit.to_string().parse::<UnitKind>().unwrap(), unit);
        }
        assert!(matches!(
            UnitKind::from_id("Furlongs"),
            Err(Error::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_tof_round_trip_all_units() {
        for emode in [EnergyMode::Elastic, EnergyMode::Direct, EnergyMode::Indirect] {
            for unit in UnitKind::ALL {
                if unit.is_energy_transfer() && !emode.is_inelastic() {
                    continue;
                }
                let conv = TofConversion::new(unit, &params(emode));
                let tof = 4000.0;
                let value = conv.from_tof(tof);
                assert_relative_eq!(conv.to_tof(value), tof, max_relative = 1e-10);
            }
        }
    }

    #[test]
    fn test_wavelength_energy_relation() {
        // 1.8 A neutrons carry about 25.25 meV.
        let q = UnitKind::Wavelength
            .quick_conversion(UnitKind::Energy)
            .unwrap();
        assert_relative_eq!(q.apply(1.8), 25.249, max_relative = 1e-3);
        let back = UnitKind::Energy
            .quick_conversion(UnitKind::Wavelength)
            .unwrap();
        assert_relative_eq!(back.apply(q.apply(1.8)), 1.8, max_relative = 1e-12);
    }

    #[test]
    fn test_quick_conversion_agrees_with_tof_path() {
        let p = params(EnergyMode::Elastic);
        for (from, to, value) in [
            (UnitKind::Wavelength, UnitKind::Energy, 2.0),
            (UnitKind::Energy, UnitKind::Momentum, 30.0),
            (UnitKind::DSpacing, UnitKind::MomentumTransfer, 1.5),
            (UnitKind::QSquared, UnitKind::DSpacing, 4.0),
        ] {
            let quick = from.quick_conversion(to).unwrap().apply(value);
            let tof = TofConversion::new(from, &p).to_tof(value);
            let slow = TofConversion::new(to, &p).from_tof(tof);
            assert_relative_eq!(quick, slow, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_no_quick_conversion_to_self_or_tof() {
        assert!(UnitKind::Energy.quick_conversion(UnitKind::Energy).is_none());
        assert!(UnitKind::Wavelength.quick_conversion(UnitKind::Tof).is_none());
        assert!(UnitKind::DeltaE.quick_conversion(UnitKind::Wavelength).is_none());
    }

    #[test]
    fn test_energy_transfer_beyond_fixed_energy() {
        let conv = TofConversion::new(UnitKind::DeltaE, &params(EnergyMode::Direct));
        assert_eq!(conv.to_tof(60.0), f64::MAX);
        assert!(conv.to_tof(59.0) < f64::MAX);
        let indirect = TofConversion::new(UnitKind::DeltaE, &params(EnergyMode::Indirect));
        assert_eq!(indirect.to_tof(-61.0), f64::MAX);
    }

    #[test]
    fn test_tof_before_fixed_leg_is_unreachable() {
        let direct = TofConversion::new(UnitKind::DeltaE, &params(EnergyMode::Direct));
        let elastic = direct.to_tof(0.0);
        let leg = direct.to_tof(-1.0e12);
        // Mirror image of the elastic TOF around the incident flight time.
        let early = 2.0 * leg - elastic;
        assert!(early > 0.0);
        assert_eq!(direct.from_tof(early), f64::MAX);
        assert_eq!(direct.from_tof(leg - 1.0), f64::MAX);
        assert_relative_eq!(direct.from_tof(elastic), 0.0, epsilon = 1e-9);

        let indirect = TofConversion::new(UnitKind::DeltaEInWavenumber, &params(EnergyMode::Indirect));
        let leg = indirect.to_tof(1.0e12);
        assert_eq!(indirect.from_tof(leg - 1.0), -f64::MAX);
        assert_eq!(indirect.from_tof(0.0), -f64::MAX);
        assert!(indirect.from_tof(leg + 500.0).is_finite());
    }

    #[test]
    fn test_elastic_line_has_zero_transfer() {
        // A neutron that keeps its incident energy arrives at the elastic TOF.
        let p = params(EnergyMode::Direct);
        let tof = TofConversion::new(UnitKind::DeltaE, &p).to_tof(0.0);
        let energy = TofConversion::new(UnitKind::Energy, &p).from_tof(tof);
        assert_relative_eq!(energy, p.efixed, max_relative = 1e-10);
    }
}

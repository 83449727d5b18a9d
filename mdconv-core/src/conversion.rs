//! Unit conversion bound to a detector geometry cache.
//!
//! A [`UnitConversionContext`] picks one of four strategies once, when it
//! is created, and then converts values for whichever detector it was last
//! advanced to. The per-detector working state makes a context exclusive
//! to one pass or worker; parallel callers clone it; clones share only the
//! read-only geometry cache.

use crate::detectors::DetectorGeometryCache;
use crate::geometry::EnergyMode;
use crate::units::{QuickConversion, TofConversion, TofParameters, UnitKind};
use crate::{Error, Result};
use std::sync::Arc;

/// How values get from the source unit to the target unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConversionStrategy {
    /// Source and target are the same unit.
    Identity,
    /// `factor * x^power`, independent of geometry.
    FastPowerLaw(QuickConversion),
    /// Source is TOF; apply the target's from-TOF formula.
    FromTof,
    /// Source to TOF, then TOF to target.
    ByTof,
}

impl ConversionStrategy {
    /// True if conversions depend on the current detector.
    #[must_use]
    pub fn is_detector_dependent(&self) -> bool {
        matches!(self, ConversionStrategy::FromTof | ConversionStrategy::ByTof)
    }
}

/// Converts values between two units for one detector at a time.
#[derive(Debug, Clone)]
pub struct UnitConversionContext {
    cache: Arc<DetectorGeometryCache>,
    source: UnitKind,
    target: UnitKind,
    strategy: ConversionStrategy,
    source_tof: TofConversion,
    target_tof: TofConversion,
    l2: f64,
    two_theta: f64,
    efixed: f64,
}

impl UnitConversionContext {
    /// Resolves the conversion strategy between two registered units.
    ///
    /// # Errors
    /// Returns `UnknownUnit` for unregistered identifiers and
    /// `InvalidArgument` when a TOF-based conversion needs an energy mode or
    /// fixed energy the cache does not provide.
    pub fn initialize(
        cache: Arc<DetectorGeometryCache>,
        source_unit: &str,
        target_unit: &str,
    ) -> Result<Self> {
        let source = UnitKind::from_id(source_unit)?;
        let target = UnitKind::from_id(target_unit)?;
        Self::with_units(cache, source, target)
    }

    /// Same as [`Self::initialize`] for already-resolved units.
    ///
    /// # Errors
    /// See [`Self::initialize`].
    pub fn with_units(
        cache: Arc<DetectorGeometryCache>,
        source: UnitKind,
        target: UnitKind,
    ) -> Result<Self> {
        let strategy = if source == target {
            ConversionStrategy::Identity
        } else if let Some(quick) = source.quick_conversion(target) {
            ConversionStrategy::FastPowerLaw(quick)
        } else if source == UnitKind::Tof {
            ConversionStrategy::FromTof
        } else {
            ConversionStrategy::ByTof
        };

        if strategy.is_detector_dependent() {
            validate_energy_settings(&cache, source, target)?;
        }
        log::debug!("unit conversion {source} -> {target}: {strategy:?}");

        Ok(Self {
            cache,
            source,
            target,
            strategy,
            source_tof: TofConversion::default(),
            target_tof: TofConversion::default(),
            l2: f64::NAN,
            two_theta: f64::NAN,
            efixed: f64::NAN,
        })
    }

    #[must_use]
    pub fn strategy(&self) -> ConversionStrategy {
        self.strategy
    }

    #[must_use]
    pub fn source(&self) -> UnitKind {
        self.source
    }

    #[must_use]
    pub fn target(&self) -> UnitKind {
        self.target
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<DetectorGeometryCache> {
        &self.cache
    }

    /// L2 of the current detector (NaN before the first TOF-based advance).
    #[must_use]
    pub fn current_l2(&self) -> f64 {
        self.l2
    }

    /// Loads the geometry of cache slot `slot`.
    ///
    /// Geometry-free strategies ignore the call.
    pub fn advance_to_detector(&mut self, slot: usize) {
        if !self.strategy.is_detector_dependent() {
            return;
        }
        self.l2 = self.cache.l2()[slot];
        self.two_theta = self.cache.two_theta()[slot];
        self.efixed = self.cache.detector_fixed_energy(slot);
        let params = TofParameters {
            l1: self.cache.l1(),
            l2: self.l2,
            two_theta: self.two_theta,
            emode: self.cache.energy_mode(),
            efixed: self.efixed,
        };
        self.target_tof = TofConversion::new(self.target, &params);
        if self.strategy == ConversionStrategy::ByTof {
            self.source_tof = TofConversion::new(self.source, &params);
        }
    }

    /// Converts one value.
    #[inline]
    #[must_use]
    pub fn convert(&self, value: f64) -> f64 {
        match self.strategy {
            ConversionStrategy::Identity => value,
            ConversionStrategy::FastPowerLaw(quick) => quick.apply(value),
            ConversionStrategy::FromTof => self.target_tof.from_tof(value),
            ConversionStrategy::ByTof => self.target_tof.from_tof(self.source_tof.to_tof(value)),
        }
    }

    /// Converts a slice, element by element.
    #[must_use]
    pub fn convert_batch(&self, values: &[f64]) -> Vec<f64> {
        let mut out = values.to_vec();
        self.convert_in_place(&mut out);
        out
    }

    /// Converts a slice in place.
    pub fn convert_in_place(&self, values: &mut [f64]) {
        if self.strategy == ConversionStrategy::Identity {
            return;
        }
        for v in values.iter_mut() {
            *v = self.convert(*v);
        }
    }
}

fn validate_energy_settings(
    cache: &DetectorGeometryCache,
    source: UnitKind,
    target: UnitKind,
) -> Result<()> {
    let emode = cache.energy_mode();
    if (source.is_energy_transfer() || target.is_energy_transfer()) && !emode.is_inelastic() {
        return Err(Error::InvalidArgument(format!(
            "conversion {source} -> {target} needs direct or indirect energy mode, got {emode:?}"
        )));
    }
    let has_energy = cache.fixed_energy() > 0.0
        || (emode == EnergyMode::Indirect && cache.has_detector_fixed_energies());
    if emode.is_inelastic() && !has_energy {
        return Err(Error::InvalidArgument(format!(
            "{emode:?} geometry needs a positive fixed energy"
        )));
    }
    Ok(())
}

//! Coordinate mapping strategies.
//!
//! A mapping turns one unit-converted sample into the coordinates of an MD
//! event. The work is split into three phases so that everything that only
//! depends on the run or on the detector is computed outside the per-sample
//! loop:
//!
//! 1. generic coordinates (run logs), once per conversion,
//! 2. detector-dependent coordinates, once per detector,
//! 3. the sample coordinate, once per bin or event.
//!
//! Every phase answers `false` when a coordinate lands outside the
//! destination extents.

mod copy;
mod mod_q;
mod q3d;

pub use copy::CopyToMdMapping;
pub use mod_q::ModQMapping;
pub use q3d::Q3dMapping;

use mdconv_core::units::energy_to_k_squared;
use mdconv_core::{
    DestinationDescriptor, DetectorGeometryCache, DimensionSpec, EnergyMode, Error, Result,
    UnitKind, WorkspaceMetadata, V3D,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Registered mapping modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingMode {
    /// X value (and numeric vertical axis) copied into MD space.
    CopyToMd,
    /// Modulus of the momentum transfer, plus energy transfer if inelastic.
    ModQ,
    /// Momentum-transfer vector, plus energy transfer if inelastic.
    Q3d,
}

impl MappingMode {
    /// Every registered mode.
    pub const ALL: [MappingMode; 3] = [MappingMode::CopyToMd, MappingMode::ModQ, MappingMode::Q3d];

    /// Registry identifier.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            MappingMode::CopyToMd => "CopyToMD",
            MappingMode::ModQ => "|Q|",
            MappingMode::Q3d => "Q3D",
        }
    }

    /// Looks up a mode by registry identifier.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for identifiers outside the registry.
    pub fn from_id(id: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.id() == id)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown mapping mode '{id}' (known: CopyToMD, |Q|, Q3D)"
                ))
            })
    }

    /// True for modes that compute momentum transfer from detector
    /// directions.
    #[must_use]
    pub fn needs_geometry(self) -> bool {
        !matches!(self, MappingMode::CopyToMd)
    }

    /// Number of dimensions the mode itself produces.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when a momentum-transfer mode is asked for
    /// an undefined energy mode.
    pub fn matrix_dims(self, emode: EnergyMode, has_vertical_axis: bool) -> Result<usize> {
        let energy = usize::from(emode.is_inelastic());
        match self {
            MappingMode::CopyToMd => Ok(1 + usize::from(has_vertical_axis)),
            MappingMode::ModQ => {
                require_energy_mode(self, emode)?;
                Ok(1 + energy)
            }
            MappingMode::Q3d => {
                require_energy_mode(self, emode)?;
                Ok(3 + energy)
            }
        }
    }

    /// Unit the sample values must be converted to.
    ///
    /// `CopyToMD` keeps `requested` when given, the input unit otherwise.
    /// Momentum-transfer modes need `Momentum` when elastic and `DeltaE`
    /// when inelastic; a conflicting request is rejected.
    ///
    /// # Errors
    /// Returns `UnknownUnit` for unregistered ids and `InvalidArgument` for
    /// a conflicting request or an undefined energy mode.
    pub fn target_unit(
        self,
        emode: EnergyMode,
        input_unit: &str,
        requested: Option<&str>,
    ) -> Result<UnitKind> {
        if self == MappingMode::CopyToMd {
            return UnitKind::from_id(requested.unwrap_or(input_unit));
        }
        require_energy_mode(self, emode)?;
        let needed = if emode.is_inelastic() {
            UnitKind::DeltaE
        } else {
            UnitKind::Momentum
        };
        match requested {
            Some(id) if UnitKind::from_id(id)? != needed => Err(Error::InvalidArgument(format!(
                "mode {} in {emode:?} geometry works in {}, not {id}",
                self.id(),
                needed.id()
            ))),
            _ => Ok(needed),
        }
    }

    /// Default `(name, units)` of the dimensions the mode produces.
    ///
    /// # Errors
    /// See [`Self::matrix_dims`] and [`Self::target_unit`].
    pub fn default_dimensions(
        self,
        emode: EnergyMode,
        metadata: &WorkspaceMetadata,
    ) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        match self {
            MappingMode::CopyToMd => {
                let unit = UnitKind::from_id(&metadata.x_unit)?;
                out.push((unit.id().to_string(), unit.label().to_string()));
                if metadata.vertical_axis.is_some() {
                    out.push(("Axis1".to_string(), String::new()));
                }
            }
            MappingMode::ModQ => {
                require_energy_mode(self, emode)?;
                out.push(("|Q|".to_string(), UnitKind::MomentumTransfer.label().to_string()));
            }
            MappingMode::Q3d => {
                require_energy_mode(self, emode)?;
                for axis in ["Q_lab_x", "Q_lab_y", "Q_lab_z"] {
                    out.push((axis.to_string(), UnitKind::MomentumTransfer.label().to_string()));
                }
            }
        }
        if self.needs_geometry() && emode.is_inelastic() {
            out.push(("DeltaE".to_string(), UnitKind::DeltaE.label().to_string()));
        }
        Ok(out)
    }
}

impl fmt::Display for MappingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for MappingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_id(s)
    }
}

fn require_energy_mode(mode: MappingMode, emode: EnergyMode) -> Result<()> {
    if emode == EnergyMode::Undefined {
        return Err(Error::InvalidArgument(format!(
            "mode {} needs an elastic, direct or indirect energy mode",
            mode.id()
        )));
    }
    Ok(())
}

/// Fills in a descriptor's dimensions from the mode defaults.
///
/// `ranges` gives `[min, max)` for the mode's dimensions followed by one per
/// extra dimension of `descriptor`. Existing dimensions are replaced.
///
/// # Errors
/// Returns `DimensionMismatch` when `ranges` has the wrong length, plus the
/// errors of [`MappingMode::default_dimensions`].
pub fn with_default_dimensions(
    mut descriptor: DestinationDescriptor,
    metadata: &WorkspaceMetadata,
    ranges: &[(f64, f64)],
) -> Result<DestinationDescriptor> {
    let mode = MappingMode::from_id(&descriptor.mode)?;
    let mut names = mode.default_dimensions(descriptor.emode, metadata)?;
    names.extend(
        descriptor
            .extra_dimensions
            .iter()
            .map(|log| (log.clone(), String::new())),
    );
    if names.len() != ranges.len() {
        return Err(Error::DimensionMismatch(format!(
            "mode {mode} with {} extra dimensions needs {} ranges, got {}",
            descriptor.extra_dimensions.len(),
            names.len(),
            ranges.len()
        )));
    }
    descriptor.dimensions = names
        .into_iter()
        .zip(ranges)
        .map(|((name, units), &(min, max))| DimensionSpec::new(name, units, min, max))
        .collect();
    Ok(descriptor)
}

/// Three-phase coordinate calculation shared by every mode.
pub trait CoordinateMapping {
    /// Unit the engine must convert sample values to.
    fn target_unit(&self) -> UnitKind;

    /// Total number of output dimensions.
    fn n_dims(&self) -> usize;

    /// Fills the run-level dimensions. `false` means the whole input lies
    /// outside the destination.
    fn calc_generic_coordinates(&self, coords: &mut [f64], n_dims: usize) -> bool;

    /// Fills detector-only dimensions for cache slot `slot` and primes the
    /// per-detector state used by [`Self::calc_sample_coordinate`].
    fn calc_detector_dependent_coordinates(&mut self, coords: &mut [f64], slot: usize) -> bool;

    /// Fills the sample-dependent dimensions from a converted value.
    ///
    /// Modes that reweight samples (Lorentz correction) scale `signal` and
    /// `error_sq` in place.
    fn calc_sample_coordinate(
        &self,
        value: f64,
        coords: &mut [f64],
        signal: &mut f64,
        error_sq: &mut f64,
    ) -> bool;
}

/// A resolved mapping strategy.
#[derive(Debug, Clone)]
pub enum MappingStrategy {
    /// See [`CopyToMdMapping`].
    CopyToMd(CopyToMdMapping),
    /// See [`ModQMapping`].
    ModQ(ModQMapping),
    /// See [`Q3dMapping`].
    Q3d(Q3dMapping),
}

impl MappingStrategy {
    /// Resolves the strategy registered for `descriptor.mode`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for unknown modes, missing run logs or
    /// energy settings the mode cannot work with, `DimensionMismatch` when
    /// the descriptor's dimension count does not fit the mode, and
    /// `LogicError` when a momentum-transfer mode gets a fake cache.
    pub fn resolve(
        descriptor: &DestinationDescriptor,
        metadata: &WorkspaceMetadata,
        cache: Arc<DetectorGeometryCache>,
    ) -> Result<Self> {
        let mode = MappingMode::from_id(&descriptor.mode)?;
        let expected = mode.matrix_dims(descriptor.emode, metadata.vertical_axis.is_some())?;
        if descriptor.n_matrix_dims() != expected {
            return Err(Error::DimensionMismatch(format!(
                "mode {mode} in {:?} geometry produces {expected} dimensions, descriptor declares {}",
                descriptor.emode,
                descriptor.n_matrix_dims()
            )));
        }
        let target = mode.target_unit(
            descriptor.emode,
            &metadata.x_unit,
            descriptor.target_unit.as_deref(),
        )?;
        let frame = DimensionFrame::new(descriptor, metadata)?;

        if mode.needs_geometry() {
            if cache.is_fake() {
                return Err(Error::LogicError(format!(
                    "mode {mode} needs real detector geometry, got a synthetic cache"
                )));
            }
            if cache.energy_mode() != descriptor.emode {
                return Err(Error::InvalidArgument(format!(
                    "geometry cache is in {:?} mode, destination wants {:?}",
                    cache.energy_mode(),
                    descriptor.emode
                )));
            }
        }

        let strategy = match mode {
            MappingMode::CopyToMd => MappingStrategy::CopyToMd(CopyToMdMapping::new(
                frame,
                target,
                metadata.vertical_axis.clone(),
                descriptor.projection.clone(),
                cache,
            )?),
            MappingMode::ModQ => MappingStrategy::ModQ(ModQMapping::new(
                frame,
                Kinematics::new(descriptor.emode, cache)?,
            )),
            MappingMode::Q3d => MappingStrategy::Q3d(Q3dMapping::new(
                frame,
                Kinematics::new(descriptor.emode, cache)?,
                descriptor.projection.clone(),
                descriptor.lorentz_correction,
            )?),
        };
        log::debug!(
            "Resolved mapping {mode} into {} dimensions, target unit {}",
            descriptor.n_dims(),
            target.id()
        );
        Ok(strategy)
    }
}

impl CoordinateMapping for MappingStrategy {
    fn target_unit(&self) -> UnitKind {
        match self {
            MappingStrategy::CopyToMd(m) => m.target_unit(),
            MappingStrategy::ModQ(m) => m.target_unit(),
            MappingStrategy::Q3d(m) => m.target_unit(),
        }
    }

    fn n_dims(&self) -> usize {
        match self {
            MappingStrategy::CopyToMd(m) => m.n_dims(),
            MappingStrategy::ModQ(m) => m.n_dims(),
            MappingStrategy::Q3d(m) => m.n_dims(),
        }
    }

    fn calc_generic_coordinates(&self, coords: &mut [f64], n_dims: usize) -> bool {
        match self {
            MappingStrategy::CopyToMd(m) => m.calc_generic_coordinates(coords, n_dims),
            MappingStrategy::ModQ(m) => m.calc_generic_coordinates(coords, n_dims),
            MappingStrategy::Q3d(m) => m.calc_generic_coordinates(coords, n_dims),
        }
    }

    #[inline]
    fn calc_detector_dependent_coordinates(&mut self, coords: &mut [f64], slot: usize) -> bool {
        match self {
            MappingStrategy::CopyToMd(m) => m.calc_detector_dependent_coordinates(coords, slot),
            MappingStrategy::ModQ(m) => m.calc_detector_dependent_coordinates(coords, slot),
            MappingStrategy::Q3d(m) => m.calc_detector_dependent_coordinates(coords, slot),
        }
    }

    #[inline]
    fn calc_sample_coordinate(
        &self,
        value: f64,
        coords: &mut [f64],
        signal: &mut f64,
        error_sq: &mut f64,
    ) -> bool {
        match self {
            MappingStrategy::CopyToMd(m) => m.calc_sample_coordinate(value, coords, signal, error_sq),
            MappingStrategy::ModQ(m) => m.calc_sample_coordinate(value, coords, signal, error_sq),
            MappingStrategy::Q3d(m) => m.calc_sample_coordinate(value, coords, signal, error_sq),
        }
    }
}

/// Destination extents plus the run-level values of the extra dimensions.
#[derive(Debug, Clone)]
pub(crate) struct DimensionFrame {
    dims: Vec<DimensionSpec>,
    n_matrix: usize,
    extra_values: Vec<f64>,
}

impl DimensionFrame {
    fn new(descriptor: &DestinationDescriptor, metadata: &WorkspaceMetadata) -> Result<Self> {
        let extra_values = descriptor
            .extra_dimensions
            .iter()
            .map(|name| metadata.log_value(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dims: descriptor.dimensions.clone(),
            n_matrix: descriptor.n_matrix_dims(),
            extra_values,
        })
    }

    pub(crate) fn n_dims(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub(crate) fn contains(&self, dim: usize, value: f64) -> bool {
        self.dims[dim].contains(value)
    }

    /// Writes the extra-dimension values after the matrix dimensions.
    pub(crate) fn fill_generic(&self, coords: &mut [f64], n_dims: usize) -> bool {
        if n_dims != self.dims.len() || coords.len() < n_dims {
            return false;
        }
        for (i, &value) in self.extra_values.iter().enumerate() {
            let dim = self.n_matrix + i;
            if !self.contains(dim, value) {
                log::warn!(
                    "Run value {value} of dimension '{}' lies outside [{}, {})",
                    self.dims[dim].name,
                    self.dims[dim].min,
                    self.dims[dim].max
                );
                return false;
            }
            coords[dim] = value;
        }
        true
    }
}

/// Incident and final wavevectors for one detector.
#[derive(Debug, Clone)]
pub(crate) struct Kinematics {
    emode: EnergyMode,
    cache: Arc<DetectorGeometryCache>,
    direction: V3D,
    efixed: f64,
    k_fixed: f64,
    two_theta: f64,
}

impl Kinematics {
    fn new(emode: EnergyMode, cache: Arc<DetectorGeometryCache>) -> Result<Self> {
        if emode.is_inelastic() {
            let global = cache.fixed_energy();
            let per_detector =
                emode == EnergyMode::Indirect && cache.has_detector_fixed_energies();
            if !(global.is_finite() && global > 0.0) && !per_detector {
                return Err(Error::InvalidArgument(format!(
                    "{emode:?} geometry needs a positive fixed energy"
                )));
            }
        }
        Ok(Self {
            emode,
            cache,
            direction: V3D::BEAM,
            efixed: f64::NAN,
            k_fixed: f64::NAN,
            two_theta: 0.0,
        })
    }

    pub(crate) fn emode(&self) -> EnergyMode {
        self.emode
    }

    pub(crate) fn two_theta(&self) -> f64 {
        self.two_theta
    }

    /// Primes the state for cache slot `slot`. `false` when the detector has
    /// no usable fixed energy.
    pub(crate) fn advance(&mut self, slot: usize) -> bool {
        self.direction = self.cache.directions()[slot];
        self.two_theta = self.cache.two_theta()[slot];
        if self.emode.is_inelastic() {
            self.efixed = self.cache.detector_fixed_energy(slot);
            if !(self.efixed.is_finite() && self.efixed > 0.0) {
                return false;
            }
            self.k_fixed = (self.efixed / energy_to_k_squared()).sqrt();
        }
        true
    }

    /// Momentum transfer `ki - kf` in the lab frame.
    ///
    /// `value` is the wavevector for elastic geometry and the energy
    /// transfer otherwise. `None` when the energy transfer is not
    /// kinematically reachable.
    #[inline]
    pub(crate) fn q_lab(&self, value: f64) -> Option<(V3D, f64)> {
        let (ki, kf) = match self.emode {
            EnergyMode::Elastic => (value, value),
            EnergyMode::Direct => {
                let ef = self.efixed - value;
                if ef <= 0.0 {
                    return None;
                }
                (self.k_fixed, (ef / energy_to_k_squared()).sqrt())
            }
            EnergyMode::Indirect => {
                let ei = self.efixed + value;
                if ei <= 0.0 {
                    return None;
                }
                ((ei / energy_to_k_squared()).sqrt(), self.k_fixed)
            }
            EnergyMode::Undefined => return None,
        };
        Some((V3D::BEAM.scale(ki).sub(&self.direction.scale(kf)), ki))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdconv_core::{Detector, Instrument, NoProgress};

    pub(crate) fn metadata(x_unit: &str) -> WorkspaceMetadata {
        let instrument = Instrument::new("test")
            .with_source(V3D::new(0.0, 0.0, -10.0))
            .with_sample(V3D::new(0.0, 0.0, 0.0))
            .with_detector(Detector::new(1, V3D::new(1.0, 0.0, 0.0)));
        WorkspaceMetadata::new(Arc::new(instrument), vec![Some(1)], x_unit)
    }

    fn real_cache(meta: &WorkspaceMetadata, emode: EnergyMode, efixed: Option<f64>) -> Arc<DetectorGeometryCache> {
        let mut cache =
            DetectorGeometryCache::build(&meta.instrument, &meta.spectrum_detectors, &mut NoProgress)
                .unwrap();
        cache.set_energy_mode(emode.code()).unwrap();
        if let Some(e) = efixed {
            cache.set_fixed_energy(e).unwrap();
        }
        Arc::new(cache)
    }

    #[test]
    fn test_mode_registry() {
        for mode in MappingMode::ALL {
            assert_eq!(MappingMode::from_id(mode.id()).unwrap(), mode);
        }
        assert!(matches!(
            MappingMode::from_id("Q_sample"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!("|Q|".parse::<MappingMode>().unwrap(), MappingMode::ModQ);
    }

    #[test]
    fn test_target_units() {
        let q = MappingMode::Q3d;
        assert_eq!(q.target_unit(EnergyMode::Elastic, "TOF", None).unwrap(), UnitKind::Momentum);
        assert_eq!(q.target_unit(EnergyMode::Direct, "TOF", None).unwrap(), UnitKind::DeltaE);
        assert!(q.target_unit(EnergyMode::Direct, "TOF", Some("Wavelength")).is_err());
        assert!(q.target_unit(EnergyMode::Undefined, "TOF", None).is_err());
        assert_eq!(
            MappingMode::CopyToMd
                .target_unit(EnergyMode::Undefined, "TOF", Some("dSpacing"))
                .unwrap(),
            UnitKind::DSpacing
        );
    }

    #[test]
    fn test_matrix_dims() {
        assert_eq!(MappingMode::ModQ.matrix_dims(EnergyMode::Elastic, false).unwrap(), 1);
        assert_eq!(MappingMode::ModQ.matrix_dims(EnergyMode::Indirect, false).unwrap(), 2);
        assert_eq!(MappingMode::Q3d.matrix_dims(EnergyMode::Direct, true).unwrap(), 4);
        assert_eq!(MappingMode::CopyToMd.matrix_dims(EnergyMode::Undefined, true).unwrap(), 2);
    }

    #[test]
    fn test_default_dimensions_fill_descriptor() {
        let meta = metadata("TOF").with_log("temperature", 5.0);
        let descriptor = DestinationDescriptor::new("Q3D")
            .with_energy_mode(EnergyMode::Direct)
            .with_extra_dimension("temperature");
        let ranges = [(-5.0, 5.0), (-5.0, 5.0), (-5.0, 5.0), (-10.0, 10.0), (0.0, 300.0)];
        let filled = with_default_dimensions(descriptor.clone(), &meta, &ranges).unwrap();
        let names: Vec<&str> = filled.dimensions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Q_lab_x", "Q_lab_y", "Q_lab_z", "DeltaE", "temperature"]);
        assert!(matches!(
            with_default_dimensions(descriptor, &meta, &ranges[..4]),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_resolve_checks_dimension_count() {
        let meta = metadata("TOF");
        let cache = real_cache(&meta, EnergyMode::Elastic, None);
        let descriptor = DestinationDescriptor::new("|Q|")
            .with_energy_mode(EnergyMode::Elastic)
            .with_dimension(DimensionSpec::new("|Q|", "", 0.0, 10.0))
            .with_dimension(DimensionSpec::new("E", "", 0.0, 10.0));
        assert!(matches!(
            MappingStrategy::resolve(&descriptor, &meta, cache),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_fake_cache_for_q_modes() {
        let meta = metadata("TOF");
        let mut fake = DetectorGeometryCache::build_fake(1);
        fake.set_energy_mode(EnergyMode::Elastic.code()).unwrap();
        let descriptor = DestinationDescriptor::new("|Q|")
            .with_energy_mode(EnergyMode::Elastic)
            .with_dimension(DimensionSpec::new("|Q|", "", 0.0, 10.0));
        assert!(matches!(
            MappingStrategy::resolve(&descriptor, &meta, Arc::new(fake)),
            Err(Error::LogicError(_))
        ));
    }

    #[test]
    fn test_resolve_requires_fixed_energy_when_inelastic() {
        let meta = metadata("DeltaE");
        let cache = real_cache(&meta, EnergyMode::Direct, None);
        let descriptor = DestinationDescriptor::new("|Q|")
            .with_energy_mode(EnergyMode::Direct)
            .with_dimension(DimensionSpec::new("|Q|", "", 0.0, 10.0))
            .with_dimension(DimensionSpec::new("DeltaE", "", -10.0, 10.0));
        assert!(matches!(
            MappingStrategy::resolve(&descriptor, &meta, cache),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_generic_coordinates_from_logs() {
        let meta = metadata("TOF").with_log("temperature", 5.0);
        let cache = Arc::new(DetectorGeometryCache::build_fake(1));
        let descriptor = DestinationDescriptor::new("CopyToMD")
            .with_dimension(DimensionSpec::new("TOF", "", 0.0, 100.0))
            .with_dimension(DimensionSpec::new("T", "K", 0.0, 10.0))
            .with_extra_dimension("temperature");
        let mapping = MappingStrategy::resolve(&descriptor, &meta, Arc::clone(&cache)).unwrap();
        let mut coords = [0.0; 2];
        assert!(mapping.calc_generic_coordinates(&mut coords, 2));
        assert_eq!(coords[1], 5.0);

        let missing_log = descriptor
            .clone()
            .with_dimension(DimensionSpec::new("P", "bar", 0.0, 10.0))
            .with_extra_dimension("pressure");
        assert!(matches!(
            MappingStrategy::resolve(&missing_log, &meta, Arc::clone(&cache)),
            Err(Error::InvalidArgument(_))
        ));

        let undeclared = descriptor.clone().with_extra_dimension("temperature");
        assert!(matches!(
            MappingStrategy::resolve(&undeclared, &meta, Arc::clone(&cache)),
            Err(Error::DimensionMismatch(_))
        ));

        let mut outside = descriptor;
        outside.dimensions[1].max = 4.0;
        let mapping = MappingStrategy::resolve(&outside, &meta, cache).unwrap();
        assert!(!mapping.calc_generic_coordinates(&mut coords, 2));
    }
}

//! Per-detector geometry cache.
//!
//! Built once per instrument by scanning every spectrum, then shared
//! read-only (behind an `Arc`) by all conversions of data taken on that
//! instrument. Monitors and spectra without a detector are skipped and the
//! remaining detectors are packed into consecutive slots.

use crate::geometry::{DetectorId, EnergyMode, Instrument, V3D};
use crate::progress::Progress;
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const FAKE_L1: f64 = 1.0;
const FAKE_L2: f64 = 10.0;
const PROGRESS_STRIDE: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct SlotGeometry {
    id: DetectorId,
    direction: V3D,
    l2: f64,
    two_theta: f64,
    azimuthal: f64,
    fixed_energy: Option<f64>,
}

/// Precomputed detector geometry, indexed by compacted cache slot.
#[derive(Debug, Clone)]
pub struct DetectorGeometryCache {
    directions: Vec<V3D>,
    l2: Vec<f64>,
    two_theta: Vec<f64>,
    azimuthal: Vec<f64>,
    detector_ids: Vec<DetectorId>,
    fixed_energies: Vec<Option<f64>>,
    /// Cache slot -> input row.
    slot_rows: Vec<usize>,
    /// Input row -> cache slot.
    row_slots: Vec<Option<usize>>,
    l1: f64,
    emode: EnergyMode,
    efixed: f64,
    instrument: Option<Arc<Instrument>>,
    fake: bool,
}

impl Default for DetectorGeometryCache {
    fn default() -> Self {
        Self {
            directions: Vec::new(),
            l2: Vec::new(),
            two_theta: Vec::new(),
            azimuthal: Vec::new(),
            detector_ids: Vec::new(),
            fixed_energies: Vec::new(),
            slot_rows: Vec::new(),
            row_slots: Vec::new(),
            l1: f64::NAN,
            emode: EnergyMode::Undefined,
            efixed: f64::NAN,
            instrument: None,
            fake: false,
        }
    }
}

impl DetectorGeometryCache {
    /// Scans every spectrum of `instrument`.
    ///
    /// `spectra[row]` is the detector id recorded for input row `row`.
    ///
    /// # Errors
    /// Returns `InstrumentDefinition` if the source or sample is missing or
    /// the two coincide.
    pub fn build(
        instrument: &Arc<Instrument>,
        spectra: &[Option<DetectorId>],
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        let source = instrument.source_position()?;
        let sample = instrument.sample_position()?;
        let beam = sample.sub(&source).normalized().ok_or_else(|| {
            Error::InstrumentDefinition("source and sample positions coincide".to_string())
        })?;

        let by_id: HashMap<DetectorId, usize> = instrument
            .detectors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id, i))
            .collect();

        let geometry: Vec<Option<SlotGeometry>> = spectra
            .par_iter()
            .map(|id| {
                let det = &instrument.detectors[*by_id.get(id.as_ref()?)?];
                if det.is_monitor {
                    return None;
                }
                Some(slot_geometry(det.id, det.position, det.fixed_energy, sample, beam))
            })
            .collect();

        let mut cache = Self {
            l1: source.distance(&sample),
            instrument: Some(Arc::clone(instrument)),
            row_slots: vec![None; spectra.len()],
            ..Self::default()
        };
        let total = geometry.len();
        for (row, slot) in geometry.into_iter().enumerate() {
            if let Some(g) = slot {
                cache.push(row, g);
            }
            if row % PROGRESS_STRIDE == 0 {
                progress.report(row, total, "Preprocessing detectors");
            }
        }
        progress.report(total, total, "Preprocessing detectors");
        log::debug!(
            "detector cache for '{}': {} of {} spectra usable, L1 = {:.4} m",
            instrument.name,
            cache.len(),
            total,
            cache.l1
        );
        Ok(cache)
    }

    /// Synthetic geometry for inputs that no longer carry an instrument.
    ///
    /// Every row maps to itself with L2 = 10 m, zero scattering angle and a
    /// direction along the beam. Only conversions that ignore detector
    /// geometry produce meaningful results from it.
    #[must_use]
    pub fn build_fake(input_size: usize) -> Self {
        let mut cache = Self {
            l1: FAKE_L1,
            row_slots: vec![None; input_size],
            fake: true,
            ..Self::default()
        };
        for row in 0..input_size {
            cache.push(
                row,
                SlotGeometry {
                    id: DetectorId::try_from(row).unwrap_or(DetectorId::MAX),
                    direction: V3D::BEAM,
                    l2: FAKE_L2,
                    two_theta: 0.0,
                    azimuthal: 0.0,
                    fixed_energy: None,
                },
            );
        }
        cache
    }

    fn push(&mut self, row: usize, g: SlotGeometry) {
        self.row_slots[row] = Some(self.slot_rows.len());
        self.slot_rows.push(row);
        self.detector_ids.push(g.id);
        self.directions.push(g.direction);
        self.l2.push(g.l2);
        self.two_theta.push(g.two_theta);
        self.azimuthal.push(g.azimuthal);
        self.fixed_energies.push(g.fixed_energy);
    }

    /// True if non-empty and built from this very instrument object.
    #[must_use]
    pub fn is_valid_for(&self, instrument: &Arc<Instrument>) -> bool {
        !self.is_empty()
            && self
                .instrument
                .as_ref()
                .is_some_and(|own| Arc::ptr_eq(own, instrument))
    }

    /// Drops all detectors and resets scalars to their unset values.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Sets the energy-analysis mode from its integer code.
    ///
    /// # Errors
    /// Returns `InvalidArgument` unless `code` is -1, 0, 1 or 2.
    pub fn set_energy_mode(&mut self, code: i32) -> Result<()> {
        self.emode = EnergyMode::try_from(code)?;
        Ok(())
    }

    /// Sets the fixed (incident or final) energy in meV.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for non-positive or non-finite energies.
    pub fn set_fixed_energy(&mut self, energy: f64) -> Result<()> {
        if !(energy.is_finite() && energy > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "fixed energy must be positive (got {energy})"
            )));
        }
        self.efixed = energy;
        Ok(())
    }

    /// Forgets the scalar fixed energy. Per-detector analyser energies are
    /// kept.
    pub fn unset_fixed_energy(&mut self) {
        self.efixed = f64::NAN;
    }

    /// Number of usable detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slot_rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot_rows.is_empty()
    }

    /// True for caches made by [`Self::build_fake`].
    #[must_use]
    pub fn is_fake(&self) -> bool {
        self.fake
    }

    /// Source to sample distance, NaN when unset.
    #[must_use]
    pub fn l1(&self) -> f64 {
        self.l1
    }

    #[must_use]
    pub fn energy_mode(&self) -> EnergyMode {
        self.emode
    }

    /// Fixed energy in meV, NaN when unset.
    #[must_use]
    pub fn fixed_energy(&self) -> f64 {
        self.efixed
    }

    /// Fixed energy seen by detector `slot`: its own analyser energy in
    /// indirect mode if it has one, the instrument value otherwise.
    #[must_use]
    pub fn detector_fixed_energy(&self, slot: usize) -> f64 {
        match (self.emode, self.fixed_energies[slot]) {
            (EnergyMode::Indirect, Some(e)) => e,
            _ => self.efixed,
        }
    }

    /// True if any detector carries its own analyser energy.
    #[must_use]
    pub fn has_detector_fixed_energies(&self) -> bool {
        self.fixed_energies.iter().any(Option::is_some)
    }

    #[must_use]
    pub fn l2(&self) -> &[f64] {
        &self.l2
    }

    #[must_use]
    pub fn two_theta(&self) -> &[f64] {
        &self.two_theta
    }

    #[must_use]
    pub fn azimuthal(&self) -> &[f64] {
        &self.azimuthal
    }

    /// Unit vectors from the sample towards each detector.
    #[must_use]
    pub fn directions(&self) -> &[V3D] {
        &self.directions
    }

    #[must_use]
    pub fn detector_ids(&self) -> &[DetectorId] {
        &self.detector_ids
    }

    /// Input row of cache slot `slot`.
    #[must_use]
    pub fn input_row(&self, slot: usize) -> usize {
        self.slot_rows[slot]
    }

    /// Cache slot of input row `row`, `None` for skipped rows.
    #[must_use]
    pub fn slot_of_row(&self, row: usize) -> Option<usize> {
        self.row_slots.get(row).copied().flatten()
    }

    /// Number of input rows scanned.
    #[must_use]
    pub fn input_rows(&self) -> usize {
        self.row_slots.len()
    }
}

fn slot_geometry(
    id: DetectorId,
    position: V3D,
    fixed_energy: Option<f64>,
    sample: V3D,
    beam: V3D,
) -> SlotGeometry {
    let rel = position.sub(&sample);
    let l2 = rel.norm();
    let two_theta = if l2 > 0.0 {
        (rel.dot(&beam) / l2).clamp(-1.0, 1.0).acos()
    } else {
        0.0
    };
    let azimuthal = rel.y.atan2(rel.x);
    let (sin_tt, cos_tt) = two_theta.sin_cos();
    SlotGeometry {
        id,
        direction: V3D::new(sin_tt * azimuthal.cos(), sin_tt * azimuthal.sin(), cos_tt),
        l2,
        two_theta,
        azimuthal,
        fixed_energy,
    }
}

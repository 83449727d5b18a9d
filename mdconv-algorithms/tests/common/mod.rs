#![allow(dead_code)]
use mdconv_core::{
    Detector, DetectorGeometryCache, DestinationDescriptor, DimensionSpec, EnergyMode, Histogram,
    Instrument, NoProgress, WorkspaceMetadata, V3D,
};
use std::sync::Arc;

pub const L1: f64 = 10.0;

/// Detector `i` (id `i + 1`) sits 2 m from the sample at a scattering angle
/// of `0.3 + 0.1 i` rad in the x-z plane. A monitor with id 1000 sits
/// upstream.
pub fn instrument(n: usize) -> Arc<Instrument> {
    let mut inst = Instrument::new("TEST")
        .with_source(V3D::new(0.0, 0.0, -L1))
        .with_sample(V3D::new(0.0, 0.0, 0.0))
        .with_detector(Detector::monitor(1000, V3D::new(0.0, 0.0, -1.0)));
    for i in 0..n {
        let angle = 0.3 + 0.1 * i as f64;
        let id = u32::try_from(i + 1).unwrap();
        inst = inst.with_detector(Detector::new(
            id,
            V3D::new(2.0 * angle.sin(), 0.0, 2.0 * angle.cos()),
        ));
    }
    Arc::new(inst)
}

pub fn metadata(n: usize, x_unit: &str) -> WorkspaceMetadata {
    let spectra = (1..=n).map(|id| Some(u32::try_from(id).unwrap())).collect();
    WorkspaceMetadata::new(instrument(n), spectra, x_unit)
}

pub fn cache_for(meta: &WorkspaceMetadata, emode: EnergyMode, efixed: Option<f64>) -> Arc<DetectorGeometryCache> {
    let mut cache =
        DetectorGeometryCache::build(&meta.instrument, &meta.spectrum_detectors, &mut NoProgress)
            .unwrap();
    cache.set_energy_mode(emode.code()).unwrap();
    if let Some(e) = efixed {
        cache.set_fixed_energy(e).unwrap();
    }
    Arc::new(cache)
}

/// Point-data spectrum with unit errors.
pub fn points(x: &[f64], y: &[f64]) -> Histogram {
    Histogram::new(x.to_vec(), y.to_vec(), vec![1.0; y.len()]).unwrap()
}

pub fn descriptor(mode: &str, emode: EnergyMode, ranges: &[(&str, f64, f64)]) -> DestinationDescriptor {
    ranges.iter().fold(
        DestinationDescriptor::new(mode).with_energy_mode(emode),
        |d, &(name, min, max)| d.with_dimension(DimensionSpec::new(name, "", min, max)),
    )
}

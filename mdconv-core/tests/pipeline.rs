use approx::assert_relative_eq;
use mdconv_core::{
    AffineTransform, ConversionStrategy, Detector, DetectorGeometryCache, EnergyMode, Instrument,
    NoProgress, Progress, TofConversion, TofParameters, UnitConversionContext, UnitKind, V3D,
};
use std::sync::Arc;

fn instrument() -> Arc<Instrument> {
    let mut inst = Instrument::new("PIPE")
        .with_source(V3D::new(0.0, 0.0, -15.0))
        .with_sample(V3D::new(0.0, 0.0, 0.0))
        .with_detector(Detector::monitor(99, V3D::new(0.0, 0.0, -2.0)));
    for id in 1..=6_u32 {
        let angle = 0.2 * f64::from(id);
        let r = 1.5 + 0.1 * f64::from(id);
        inst = inst.with_detector(Detector::new(
            id,
            V3D::new(r * angle.sin(), 0.2 * f64::from(id), r * angle.cos()),
        ));
    }
    Arc::new(inst)
}

#[derive(Default)]
struct Recorder {
    calls: Vec<(usize, usize)>,
}

impl Progress for Recorder {
    fn report(&mut self, done: usize, total: usize, _message: &str) {
        self.calls.push((done, total));
    }
}

#[test]
fn test_cache_compacts_and_maps_rows() {
    let spectra = vec![Some(1), Some(99), Some(2), None, Some(3), Some(4), Some(42), Some(5), Some(6)];
    let mut recorder = Recorder::default();
    let cache = DetectorGeometryCache::build(&instrument(), &spectra, &mut recorder).unwrap();

    // Monitor, missing detector and unknown id are dropped.
    assert_eq!(cache.len(), spectra.len() - 3);
    for slot in 0..cache.len() {
        assert_eq!(cache.slot_of_row(cache.input_row(slot)), Some(slot));
    }
    assert_eq!(cache.detector_ids(), &[1, 2, 3, 4, 5, 6]);
    assert_eq!(recorder.calls.last(), Some(&(spectra.len(), spectra.len())));
}

#[test]
fn test_context_follows_detector_geometry() {
    let inst = instrument();
    let spectra: Vec<_> = (1..=6).map(Some).collect();
    let mut cache = DetectorGeometryCache::build(&inst, &spectra, &mut NoProgress).unwrap();
    cache.set_energy_mode(EnergyMode::Direct.code()).unwrap();
    cache.set_fixed_energy(60.0).unwrap();
    let cache = Arc::new(cache);

    let mut context = UnitConversionContext::initialize(Arc::clone(&cache), "TOF", "DeltaE").unwrap();
    assert_eq!(context.strategy(), ConversionStrategy::FromTof);

    for slot in 0..cache.len() {
        context.advance_to_detector(slot);
        let expected = TofConversion::new(
            UnitKind::DeltaE,
            &TofParameters {
                l1: cache.l1(),
                l2: cache.l2()[slot],
                two_theta: cache.two_theta()[slot],
                emode: EnergyMode::Direct,
                efixed: 60.0,
            },
        );
        for tof in [4000.0, 5000.0, 6500.0] {
            assert_relative_eq!(context.convert(tof), expected.from_tof(tof), max_relative = 1e-12);
        }
        let batch = context.convert_batch(&[4000.0, 5000.0]);
        assert_eq!(batch, vec![context.convert(4000.0), context.convert(5000.0)]);
    }
}

#[test]
fn test_cache_invalidated_by_new_instrument() {
    let inst = instrument();
    let cache = DetectorGeometryCache::build(&inst, &[Some(1)], &mut NoProgress).unwrap();
    assert!(cache.is_valid_for(&inst));
    let copy = Arc::new((*inst).clone());
    assert!(!cache.is_valid_for(&copy));
}

#[test]
fn test_projection_chain() {
    let shift = {
        let mut t = AffineTransform::identity(3);
        t.add_translation(&[1.0, -2.0, 0.5]).unwrap();
        t
    };
    let scale = AffineTransform::orthogonal(
        &[0.0; 3],
        &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        &[0.5, 0.5, 2.0],
    )
    .unwrap();
    let chained = AffineTransform::combine(&shift, &scale).unwrap();
    let x = [0.25, 1.0, -3.0];
    let direct = scale.apply(&shift.apply(&x));
    for (a, b) in chained.apply(&x).iter().zip(&direct) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }

    let parsed = AffineTransform::from_xml(&chained.to_xml()).unwrap();
    assert_eq!(parsed, chained);
}

#![allow(clippy::float_cmp)]
mod common;

use approx::assert_relative_eq;
use common::{cache_for, descriptor, metadata, points, L1};
use mdconv_algorithms::{ConversionConfig, ConversionEngine, EngineKind};
use mdconv_core::{
    AffineTransform, BoxSplitConfig, EnergyMode, Error, EventType, EventWorkspace, EventStore,
    Histogram, HistogramWorkspace, InputWorkspace, MemoryEventStore, NoProgress, Progress,
    TofConversion, TofParameters, UnitKind,
};
use std::sync::Arc;

fn single_bin_input() -> Arc<InputWorkspace> {
    let meta = metadata(1, "TOF").with_vertical_axis(vec![2.0]);
    let spectrum = Histogram::new(vec![10.0, 20.0], vec![3.0], vec![0.5]).unwrap();
    Arc::new(InputWorkspace::Histogram(
        HistogramWorkspace::new(meta, vec![spectrum]).unwrap(),
    ))
}

fn run(
    input: Arc<InputWorkspace>,
    d: &mdconv_core::DestinationDescriptor,
    config: ConversionConfig,
    split: BoxSplitConfig,
) -> (MemoryEventStore, mdconv_algorithms::ConversionStatistics) {
    let meta = input.metadata().unwrap().clone();
    let cache = cache_for(&meta, d.emode, d.fixed_energy);
    let mut store = MemoryEventStore::from_descriptor(d, split);
    let mut engine = ConversionEngine::new(EngineKind::Histogram, config);
    engine.initialize(input, cache, d, &store).unwrap();
    let stats = engine.run(&mut store, &mut NoProgress).unwrap();
    (store, stats)
}

#[test]
fn test_single_bin_produces_one_event() {
    let d = descriptor(
        "CopyToMD",
        EnergyMode::Undefined,
        &[("TOF", 0.0, 100.0), ("Y", 0.0, 10.0)],
    )
    .with_projection(AffineTransform::identity(2));
    let (store, stats) = run(single_bin_input(), &d, ConversionConfig::default(), BoxSplitConfig::default());

    assert_eq!(store.n_events(), 1);
    assert_eq!(stats.events_added, 1);
    let event = store.events().event(0);
    assert_eq!(event.signal, 3.0);
    assert_eq!(event.error_sq, 0.25);
    assert_eq!(event.detector_id, 1);
    assert_eq!(event.coords, &[15.0, 2.0]);
}

#[test]
fn test_out_of_range_bin_is_rejected() {
    let d = descriptor(
        "CopyToMD",
        EnergyMode::Undefined,
        &[("TOF", 20.0, 100.0), ("Y", 0.0, 10.0)],
    );
    let (store, stats) = run(single_bin_input(), &d, ConversionConfig::default(), BoxSplitConfig::default());
    assert_eq!(store.n_events(), 0);
    assert_eq!(stats.samples_rejected, 1);
}

#[test]
fn test_monitors_and_unmapped_spectra_are_skipped() {
    let mut meta = metadata(2, "TOF");
    meta.spectrum_detectors = vec![Some(1), Some(1000), None, Some(2)];
    let spectra = vec![points(&[5.0], &[1.0]); 4];
    let input = Arc::new(InputWorkspace::Histogram(HistogramWorkspace::new(meta, spectra).unwrap()));
    let d = descriptor("CopyToMD", EnergyMode::Undefined, &[("TOF", 0.0, 10.0)]);

    let cache = cache_for(input.metadata().unwrap(), EnergyMode::Undefined, None);
    let mut store = MemoryEventStore::from_descriptor(&d, BoxSplitConfig::default());
    let mut engine = ConversionEngine::new(EngineKind::Histogram, ConversionConfig::default());
    assert_eq!(engine.initialize(input, cache, &d, &store).unwrap(), 2);
    engine.run(&mut store, &mut NoProgress).unwrap();
    assert_eq!(store.events().detector_id, vec![1, 2]);
}

#[test]
fn test_nan_and_zero_filters() {
    let meta = metadata(1, "TOF");
    let spectrum = points(&[1.0, 2.0, 3.0], &[f64::NAN, 0.0, 4.0]);
    let input = Arc::new(InputWorkspace::Histogram(HistogramWorkspace::new(meta, vec![spectrum]).unwrap()));
    let d = descriptor("CopyToMD", EnergyMode::Undefined, &[("TOF", 0.0, 10.0)]);

    let (store, stats) = run(Arc::clone(&input), &d, ConversionConfig::default(), BoxSplitConfig::default());
    assert_eq!(store.n_events(), 2);
    assert_eq!(stats.nan_dropped, 1);

    let config = ConversionConfig::default().with_ignore_zeros(true);
    let (store, stats) = run(input, &d, config, BoxSplitConfig::default());
    assert_eq!(store.n_events(), 1);
    assert_eq!(stats.zeros_dropped, 1);
    assert_eq!(store.total_signal(), 4.0);
}

#[test]
fn test_elastic_mod_q_from_tof() {
    let meta = metadata(1, "TOF");
    let spectrum = points(&[1000.0, 2000.0], &[1.0, 1.0]);
    let input = Arc::new(InputWorkspace::Histogram(HistogramWorkspace::new(meta.clone(), vec![spectrum]).unwrap()));
    let d = descriptor("|Q|", EnergyMode::Elastic, &[("|Q|", 0.0, 50.0)]);
    let (store, _) = run(input, &d, ConversionConfig::default(), BoxSplitConfig::default());
    assert_eq!(store.n_events(), 2);

    let two_theta = 0.3;
    let momentum = TofConversion::new(
        UnitKind::Momentum,
        &TofParameters {
            l1: L1,
            l2: 2.0,
            two_theta,
            emode: EnergyMode::Elastic,
            efixed: f64::NAN,
        },
    );
    for (i, tof) in [1000.0, 2000.0].into_iter().enumerate() {
        let k = momentum.from_tof(tof);
        let q = 2.0 * k * (two_theta / 2.0).sin();
        assert_relative_eq!(store.events().coords_of(i)[0], q, max_relative = 1e-9);
    }
}

#[test]
fn test_buffered_appends_trigger_splits() {
    let meta = metadata(4, "TOF");
    let x: Vec<f64> = (0..50).map(f64::from).collect();
    let spectra = vec![points(&x, &[1.0; 50]); 4];
    let input = Arc::new(InputWorkspace::Histogram(HistogramWorkspace::new(meta, spectra).unwrap()));
    let d = descriptor("CopyToMD", EnergyMode::Undefined, &[("TOF", 0.0, 50.0)]);

    let config = ConversionConfig::default().with_buffer_size(16);
    let split = BoxSplitConfig::default().with_split_threshold(4);
    let (store, stats) = run(input, &d, config, split);
    assert_eq!(store.n_events(), 200);
    assert!(stats.split_requests > 0);
    assert!(store.total_box_count() > 1);
    assert_eq!(store.total_signal(), 200.0);
}

#[test]
fn test_parallel_matches_sequential() {
    let meta = metadata(40, "TOF");
    let spectra: Vec<Histogram> = (0..40)
        .map(|i| {
            let x: Vec<f64> = (0..=12).map(|b| 5000.0 + 1000.0 * f64::from(b)).collect();
            let y: Vec<f64> = (0..12).map(|b| f64::from(b + i)).collect();
            Histogram::new(x, y, vec![1.0; 12]).unwrap()
        })
        .collect();
    let input = Arc::new(InputWorkspace::Histogram(HistogramWorkspace::new(meta, spectra).unwrap()));
    let d = descriptor(
        "Q3D",
        EnergyMode::Elastic,
        &[("Qx", -20.0, 20.0), ("Qy", -20.0, 20.0), ("Qz", -20.0, 20.0)],
    );

    let (sequential, s_stats) =
        run(Arc::clone(&input), &d, ConversionConfig::default(), BoxSplitConfig::default());
    let config = ConversionConfig::default().with_parallel(true).with_chunk_size(3);
    let (parallel, p_stats) = run(input, &d, config, BoxSplitConfig::default());

    assert!(sequential.n_events() > 0);
    assert_eq!(s_stats.events_added, p_stats.events_added);
    assert_eq!(sequential.events().detector_id, parallel.events().detector_id);
    assert_eq!(sequential.events().signal, parallel.events().signal);
    assert_eq!(sequential.events().coords, parallel.events().coords);
}

#[test]
fn test_wrong_input_is_a_logic_error() {
    let meta = metadata(1, "TOF");
    let events = EventWorkspace::new(meta.clone(), EventType::Tof, vec![mdconv_core::EventList::Tof(Vec::new())]).unwrap();
    let input = Arc::new(InputWorkspace::Events(events));
    let d = descriptor("CopyToMD", EnergyMode::Undefined, &[("TOF", 0.0, 10.0)]);
    let store = MemoryEventStore::from_descriptor(&d, BoxSplitConfig::default());
    let mut engine = ConversionEngine::new(EngineKind::Histogram, ConversionConfig::default());
    let err = engine
        .initialize(input, cache_for(&meta, EnergyMode::Undefined, None), &d, &store)
        .unwrap_err();
    assert!(matches!(err, Error::LogicError(_)));
}

#[test]
fn test_run_before_initialize() {
    let d = descriptor("CopyToMD", EnergyMode::Undefined, &[("TOF", 0.0, 10.0)]);
    let mut store = MemoryEventStore::from_descriptor(&d, BoxSplitConfig::default());
    let mut engine = ConversionEngine::new(EngineKind::Histogram, ConversionConfig::default());
    assert!(matches!(
        engine.run(&mut store, &mut NoProgress),
        Err(Error::LogicError(_))
    ));
}

#[test]
fn test_store_dimensionality_checked() {
    let d = descriptor(
        "CopyToMD",
        EnergyMode::Undefined,
        &[("TOF", 0.0, 100.0), ("Y", 0.0, 10.0)],
    );
    let store = MemoryEventStore::new(vec![(0.0, 1.0); 3], BoxSplitConfig::default());
    let input = single_bin_input();
    let cache = cache_for(input.metadata().unwrap(), EnergyMode::Undefined, None);
    let mut engine = ConversionEngine::new(EngineKind::Histogram, ConversionConfig::default());
    assert!(matches!(
        engine.initialize(input, cache, &d, &store),
        Err(Error::DimensionMismatch(_))
    ));
}

struct StopImmediately;

impl Progress for StopImmediately {
    fn report(&mut self, _done: usize, _total: usize, _message: &str) {}

    fn is_cancelled(&self) -> bool {
        true
    }
}

#[test]
fn test_cancellation_between_detectors() {
    let d = descriptor(
        "CopyToMD",
        EnergyMode::Undefined,
        &[("TOF", 0.0, 100.0), ("Y", 0.0, 10.0)],
    );
    let input = single_bin_input();
    let cache = cache_for(input.metadata().unwrap(), EnergyMode::Undefined, None);
    let mut store = MemoryEventStore::from_descriptor(&d, BoxSplitConfig::default());
    let mut engine = ConversionEngine::new(EngineKind::Histogram, ConversionConfig::default());
    engine.initialize(input, cache, &d, &store).unwrap();
    assert!(matches!(
        engine.run(&mut store, &mut StopImmediately),
        Err(Error::Cancelled(0))
    ));
    assert_eq!(store.n_events(), 0);
}

//! Discrete event conversion engine.

use super::{
    accept_signal, Appender, ConversionConfig, ConversionStatistics, ConverterBase, EngineKind,
    PROGRESS_STEPS,
};
use crate::mapping::CoordinateMapping;
use mdconv_core::{
    DestinationDescriptor, DetectorGeometryCache, Error, EventBatch, EventStore, EventType,
    EventWorkspace, InputWorkspace, Progress, Result, TimedSample, TofEvent, WeightedEvent,
    WeightedEventNoTime,
};
use std::sync::Arc;

/// Converts event lists, one MD event per accepted timed sample. Events
/// are appended to the store once per detector.
#[derive(Debug, Clone)]
pub struct EventConverter {
    config: ConversionConfig,
    base: Option<ConverterBase>,
}

impl EventConverter {
    /// Uninitialised engine.
    #[must_use]
    pub fn new(config: ConversionConfig) -> Self {
        Self { config, base: None }
    }

    /// Engine tuning.
    #[must_use]
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Replaces the engine tuning.
    pub fn set_config(&mut self, config: ConversionConfig) {
        self.config = config;
    }

    /// See [`super::ConversionEngine::initialize`].
    ///
    /// # Errors
    /// See [`super::ConversionEngine::initialize`].
    pub fn initialize(
        &mut self,
        input: Arc<InputWorkspace>,
        cache: Arc<DetectorGeometryCache>,
        descriptor: &DestinationDescriptor,
        store: &dyn EventStore,
    ) -> Result<usize> {
        let base = ConverterBase::new(EngineKind::Events, input, cache, descriptor, store)?;
        let usable = base.cache.len();
        self.base = Some(base);
        Ok(usable)
    }

    /// See [`super::ConversionEngine::run`].
    ///
    /// # Errors
    /// See [`super::ConversionEngine::run`].
    pub fn run(
        &mut self,
        store: &mut dyn EventStore,
        progress: &mut dyn Progress,
    ) -> Result<ConversionStatistics> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| Error::LogicError("event engine run before initialize".to_string()))?;
        let InputWorkspace::Events(ws) = base.input.as_ref() else {
            return Err(Error::LogicError(format!(
                "wrong converter for this input: event engine holds a {}",
                base.input.describe()
            )));
        };

        let stats = match ws.event_type {
            EventType::Tof => convert_events::<TofEvent>(base, ws, &self.config, store, progress)?,
            EventType::Weighted => {
                convert_events::<WeightedEvent>(base, ws, &self.config, store, progress)?
            }
            EventType::WeightedNoTime => {
                convert_events::<WeightedEventNoTime>(base, ws, &self.config, store, progress)?
            }
        };
        log::info!(
            "Converted {} event lists into {} events ({} skipped detectors, {} rejected, {} NaN)",
            stats.detectors_processed,
            stats.events_added,
            stats.detectors_skipped,
            stats.samples_rejected,
            stats.nan_dropped
        );
        Ok(stats)
    }
}

fn convert_events<E: TimedSample>(
    base: &ConverterBase,
    ws: &EventWorkspace,
    config: &ConversionConfig,
    store: &mut dyn EventStore,
    progress: &mut dyn Progress,
) -> Result<ConversionStatistics> {
    let mut stats = ConversionStatistics::default();
    let Some(mut coords) = base.generic_coordinates() else {
        return Ok(stats);
    };
    let mut units = base.units.clone();
    let mut mapping = base.mapping.clone();
    let mut buffer = EventBatch::new(base.n_dims);
    let mut appender = Appender::new(&*store);

    let n = base.cache.len();
    let stride = (n / PROGRESS_STEPS).max(1);
    for slot in 0..n {
        if progress.is_cancelled() {
            return Err(Error::Cancelled(slot));
        }
        let row = base.cache.input_row(slot);
        let list = &ws.lists[row];
        let samples = E::samples(list).ok_or_else(|| {
            Error::UnsupportedDataType(format!(
                "spectrum {row} stores {:?} events, workspace declares {:?}",
                list.event_type(),
                E::EVENT_TYPE
            ))
        })?;

        units.advance_to_detector(slot);
        if mapping.calc_detector_dependent_coordinates(&mut coords, slot) {
            stats.detectors_processed += 1;
            let detector_id = base.cache.detector_ids()[slot];
            buffer.clear();
            for sample in samples {
                let mut signal = sample.weight();
                if !accept_signal(signal, config.ignore_zeros, &mut stats) {
                    continue;
                }
                let mut error_sq = sample.error_sq();
                let x = units.convert(sample.tof());
                if !mapping.calc_sample_coordinate(x, &mut coords, &mut signal, &mut error_sq) {
                    stats.samples_rejected += 1;
                    continue;
                }
                buffer.push(signal, error_sq, base.run_index, detector_id, &coords);
            }
            appender.append(store, &buffer, &mut stats);
        } else {
            stats.detectors_skipped += 1;
        }

        if (slot + 1) % stride == 0 || slot + 1 == n {
            progress.report(slot + 1, n, "Converting events");
        }
    }
    Appender::finish(store);
    Ok(stats)
}

//! Histogram conversion engine.

use super::{
    accept_signal, Appender, ConversionConfig, ConversionStatistics, ConverterBase, EngineKind,
    PROGRESS_STEPS,
};
use crate::mapping::{CoordinateMapping, MappingStrategy};
use mdconv_core::{
    DestinationDescriptor, DetectorGeometryCache, Error, EventBatch, EventStore,
    HistogramWorkspace, InputWorkspace, Progress, Result, UnitConversionContext,
};
use rayon::prelude::*;
use std::sync::Arc;

/// Converts binned or point histograms, one event per accepted bin.
#[derive(Debug, Clone)]
pub struct HistogramConverter {
    config: ConversionConfig,
    base: Option<ConverterBase>,
}

impl HistogramConverter {
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
        let base = ConverterBase::new(EngineKind::Histogram, input, cache, descriptor, store)?;
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
        let base = self.base.as_ref().ok_or_else(|| {
            Error::LogicError("histogram engine run before initialize".to_string())
        })?;
        let InputWorkspace::Histogram(ws) = base.input.as_ref() else {
            return Err(Error::LogicError(format!(
                "wrong converter for this input: histogram engine holds a {}",
                base.input.describe()
            )));
        };

        let mut stats = ConversionStatistics::default();
        let Some(coords) = base.generic_coordinates() else {
            return Ok(stats);
        };
        let worker = SpectrumWorker {
            ws,
            cache: &base.cache,
            units: base.units.clone(),
            mapping: base.mapping.clone(),
            coords,
            positions: Vec::new(),
            run_index: base.run_index,
            ignore_zeros: self.config.ignore_zeros,
        };

        if self.config.parallel {
            self.run_parallel(worker, base.n_dims, store, progress, &mut stats)?;
        } else {
            self.run_sequential(worker, base.n_dims, store, progress, &mut stats)?;
        }
        Appender::finish(store);

        log::info!(
            "Converted {} histograms into {} events ({} skipped detectors, {} rejected, {} NaN)",
            stats.detectors_processed,
            stats.events_added,
            stats.detectors_skipped,
            stats.samples_rejected,
            stats.nan_dropped
        );
        Ok(stats)
    }

    fn run_sequential(
        &self,
        mut worker: SpectrumWorker<'_>,
        n_dims: usize,
        store: &mut dyn EventStore,
        progress: &mut dyn Progress,
        stats: &mut ConversionStatistics,
    ) -> Result<()> {
        let n = worker.cache.len();
        let stride = (n / PROGRESS_STEPS).max(1);
        let mut buffer = EventBatch::with_capacity(n_dims, self.config.buffer_size);
        let mut appender = Appender::new(&*store);

        for slot in 0..n {
            if progress.is_cancelled() {
                return Err(Error::Cancelled(slot));
            }
            worker.convert(slot, &mut buffer, stats);
            if buffer.len() >= self.config.buffer_size {
                appender.append(store, &buffer, stats);
                buffer.clear();
            }
            if (slot + 1) % stride == 0 || slot + 1 == n {
                progress.report(slot + 1, n, "Converting histograms");
            }
        }
        appender.append(store, &buffer, stats);
        Ok(())
    }

    /// Converts waves of detector chunks on the rayon pool, then appends the
    /// chunk batches in detector order.
    fn run_parallel(
        &self,
        worker: SpectrumWorker<'_>,
        n_dims: usize,
        store: &mut dyn EventStore,
        progress: &mut dyn Progress,
        stats: &mut ConversionStatistics,
    ) -> Result<()> {
        let n = worker.cache.len();
        let chunk = self.config.chunk_size.max(1);
        let wave = chunk * rayon::current_num_threads().max(1);
        let mut appender = Appender::new(&*store);

        let mut done = 0;
        while done < n {
            if progress.is_cancelled() {
                return Err(Error::Cancelled(done));
            }
            let end = (done + wave).min(n);
            let starts: Vec<usize> = (done..end).step_by(chunk).collect();
            let results: Vec<(EventBatch, ConversionStatistics)> = starts
                .par_iter()
                .map(|&start| {
                    let mut local = worker.clone();
                    let mut batch = EventBatch::new(n_dims);
                    let mut local_stats = ConversionStatistics::default();
                    for slot in start..(start + chunk).min(end) {
                        local.convert(slot, &mut batch, &mut local_stats);
                    }
                    (batch, local_stats)
                })
                .collect();

            for (batch, local_stats) in &results {
                stats.merge(local_stats);
                appender.append(store, batch, stats);
            }
            done = end;
            progress.report(done, n, "Converting histograms");
        }
        Ok(())
    }
}

/// Per-pass working state: owns its unit context and mapping, borrows the
/// read-only input and cache.
#[derive(Clone)]
struct SpectrumWorker<'a> {
    ws: &'a HistogramWorkspace,
    cache: &'a DetectorGeometryCache,
    units: UnitConversionContext,
    mapping: MappingStrategy,
    coords: Vec<f64>,
    positions: Vec<f64>,
    run_index: u16,
    ignore_zeros: bool,
}

impl SpectrumWorker<'_> {
    fn convert(&mut self, slot: usize, out: &mut EventBatch, stats: &mut ConversionStatistics) {
        self.units.advance_to_detector(slot);
        if !self
            .mapping
            .calc_detector_dependent_coordinates(&mut self.coords, slot)
        {
            stats.detectors_skipped += 1;
            return;
        }
        stats.detectors_processed += 1;

        let hist = &self.ws.spectra[self.cache.input_row(slot)];
        let detector_id = self.cache.detector_ids()[slot];
        hist.bin_positions_into(&mut self.positions);
        self.units.convert_in_place(&mut self.positions);

        for ((&x, &y), &e) in self.positions.iter().zip(&hist.y).zip(&hist.e) {
            if !accept_signal(y, self.ignore_zeros, stats) {
                continue;
            }
            let mut signal = y;
            let mut error_sq = e * e;
            if !self
                .mapping
                .calc_sample_coordinate(x, &mut self.coords, &mut signal, &mut error_sq)
            {
                stats.samples_rejected += 1;
                continue;
            }
            out.push(signal, error_sq, self.run_index, detector_id, &self.coords);
        }
    }
}

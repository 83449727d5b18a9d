//! Conversion engines.
//!
//! Both engines walk the compacted detector slots of the geometry cache,
//! convert every sample of the detector, map it to MD coordinates and feed
//! accepted samples to an [`EventStore`]. The histogram engine buffers
//! across detectors and appends when the buffer fills; the event engine
//! appends once per detector.

mod events;
mod histogram;

pub use events::EventConverter;
pub use histogram::HistogramConverter;

use crate::mapping::{CoordinateMapping, MappingStrategy};
use mdconv_core::{
    DestinationDescriptor, DetectorGeometryCache, Error, EventBatch, EventStore, InputWorkspace,
    Progress, Result, UnitConversionContext, UnitKind,
};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Engine tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConversionConfig {
    /// Events buffered by the histogram engine before an append.
    pub buffer_size: usize,
    /// Skip samples whose signal is exactly zero.
    pub ignore_zeros: bool,
    /// Convert histogram detectors on the rayon pool.
    pub parallel: bool,
    /// Detectors per parallel work item.
    pub chunk_size: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            ignore_zeros: false,
            parallel: false,
            chunk_size: 64,
        }
    }
}

impl ConversionConfig {
    /// Set the histogram append threshold.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Enable or disable zero-signal filtering.
    #[must_use]
    pub fn with_ignore_zeros(mut self, ignore: bool) -> Self {
        self.ignore_zeros = ignore;
        self
    }

    /// Enable or disable the parallel histogram path.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the number of detectors per parallel work item.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// Counters collected during one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionStatistics {
    /// Detectors whose samples were converted.
    pub detectors_processed: usize,
    /// Detectors rejected by their detector-dependent coordinates.
    pub detectors_skipped: usize,
    /// Events the store kept.
    pub events_added: usize,
    /// Samples mapped outside the destination extents.
    pub samples_rejected: usize,
    /// Samples with NaN signal.
    pub nan_dropped: usize,
    /// Zero-signal samples skipped with `ignore_zeros`.
    pub zeros_dropped: usize,
    /// Split requests granted by the store.
    pub split_requests: usize,
}

impl ConversionStatistics {
    /// Adds the per-detector counters of `other`.
    pub fn merge(&mut self, other: &ConversionStatistics) {
        self.detectors_processed += other.detectors_processed;
        self.detectors_skipped += other.detectors_skipped;
        self.events_added += other.events_added;
        self.samples_rejected += other.samples_rejected;
        self.nan_dropped += other.nan_dropped;
        self.zeros_dropped += other.zeros_dropped;
        self.split_requests += other.split_requests;
    }
}

/// Input representation an engine handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Binned or point histograms.
    Histogram,
    /// Discrete timed events.
    Events,
}

impl EngineKind {
    /// Classifies an input workspace.
    ///
    /// # Errors
    /// Returns `UnsupportedInput` for anything that is neither histogram
    /// nor event data.
    pub fn classify(input: &InputWorkspace) -> Result<Self> {
        match input {
            InputWorkspace::Histogram(_) => Ok(EngineKind::Histogram),
            InputWorkspace::Events(_) => Ok(EngineKind::Events),
            other @ InputWorkspace::Table(_) => Err(Error::UnsupportedInput(format!(
                "cannot convert a {} to MD events",
                other.describe()
            ))),
        }
    }
}

/// A conversion engine of either kind.
#[derive(Debug, Clone)]
pub enum ConversionEngine {
    /// See [`HistogramConverter`].
    Histogram(HistogramConverter),
    /// See [`EventConverter`].
    Events(EventConverter),
}

impl ConversionEngine {
    /// Fresh engine of the given kind.
    #[must_use]
    pub fn new(kind: EngineKind, config: ConversionConfig) -> Self {
        match kind {
            EngineKind::Histogram => ConversionEngine::Histogram(HistogramConverter::new(config)),
            EngineKind::Events => ConversionEngine::Events(EventConverter::new(config)),
        }
    }

    /// Which inputs this engine converts.
    #[must_use]
    pub fn kind(&self) -> EngineKind {
        match self {
            ConversionEngine::Histogram(_) => EngineKind::Histogram,
            ConversionEngine::Events(_) => EngineKind::Events,
        }
    }

    /// Engine tuning.
    #[must_use]
    pub fn config(&self) -> &ConversionConfig {
        match self {
            ConversionEngine::Histogram(e) => e.config(),
            ConversionEngine::Events(e) => e.config(),
        }
    }

    /// Replaces the engine tuning.
    pub fn set_config(&mut self, config: ConversionConfig) {
        match self {
            ConversionEngine::Histogram(e) => e.set_config(config),
            ConversionEngine::Events(e) => e.set_config(config),
        }
    }

    /// Binds the engine to an input, a geometry cache and a destination.
    /// Returns the number of usable detectors.
    ///
    /// `store` is only inspected; [`Self::run`] must be given the same
    /// store.
    ///
    /// # Errors
    /// Returns `LogicError` when the input does not match the engine kind,
    /// plus any setup error of the mapping or the unit conversion.
    pub fn initialize(
        &mut self,
        input: Arc<InputWorkspace>,
        cache: Arc<DetectorGeometryCache>,
        descriptor: &DestinationDescriptor,
        store: &dyn EventStore,
    ) -> Result<usize> {
        match self {
            ConversionEngine::Histogram(e) => e.initialize(input, cache, descriptor, store),
            ConversionEngine::Events(e) => e.initialize(input, cache, descriptor, store),
        }
    }

    /// Converts every usable detector into `store`.
    ///
    /// # Errors
    /// Returns `LogicError` if the engine was not initialised,
    /// `UnsupportedDataType` for event lists of the wrong type and
    /// `Cancelled` when `progress` asks to stop.
    pub fn run(
        &mut self,
        store: &mut dyn EventStore,
        progress: &mut dyn Progress,
    ) -> Result<ConversionStatistics> {
        match self {
            ConversionEngine::Histogram(e) => e.run(store, progress),
            ConversionEngine::Events(e) => e.run(store, progress),
        }
    }
}

/// Everything an initialised engine needs for a run.
#[derive(Debug, Clone)]
pub(crate) struct ConverterBase {
    pub(crate) input: Arc<InputWorkspace>,
    pub(crate) cache: Arc<DetectorGeometryCache>,
    pub(crate) units: UnitConversionContext,
    pub(crate) mapping: MappingStrategy,
    pub(crate) n_dims: usize,
    pub(crate) run_index: u16,
}

impl ConverterBase {
    pub(crate) fn new(
        kind: EngineKind,
        input: Arc<InputWorkspace>,
        cache: Arc<DetectorGeometryCache>,
        descriptor: &DestinationDescriptor,
        store: &dyn EventStore,
    ) -> Result<Self> {
        let actual = EngineKind::classify(&input)?;
        if actual != kind {
            return Err(Error::LogicError(format!(
                "wrong converter for this input: {kind:?} engine given a {}",
                input.describe()
            )));
        }
        descriptor.validate()?;
        if store.n_dims() != descriptor.n_dims() {
            return Err(Error::DimensionMismatch(format!(
                "store holds {}D events, destination declares {} dimensions",
                store.n_dims(),
                descriptor.n_dims()
            )));
        }
        let metadata = input.metadata().ok_or_else(|| {
            Error::UnsupportedInput(format!("{} has no spectra", input.describe()))
        })?;
        if cache.input_rows() != metadata.n_spectra() {
            return Err(Error::DimensionMismatch(format!(
                "geometry cache covers {} spectra, input has {}",
                cache.input_rows(),
                metadata.n_spectra()
            )));
        }

        let mapping = MappingStrategy::resolve(descriptor, metadata, Arc::clone(&cache))?;
        let source = UnitKind::from_id(&metadata.x_unit)?;
        let units = UnitConversionContext::with_units(Arc::clone(&cache), source, mapping.target_unit())?;
        log::debug!(
            "{kind:?} engine: {} -> {} via {:?}, {} usable detectors",
            source.id(),
            mapping.target_unit().id(),
            units.strategy(),
            cache.len()
        );

        Ok(Self {
            input,
            cache,
            units,
            mapping,
            n_dims: descriptor.n_dims(),
            run_index: descriptor.run_index,
        })
    }

    /// Coordinate buffer with the run-level dimensions filled in, or
    /// `None` when they fall outside the destination.
    pub(crate) fn generic_coordinates(&self) -> Option<Vec<f64>> {
        let mut coords = vec![0.0; self.n_dims];
        if self.mapping.calc_generic_coordinates(&mut coords, self.n_dims) {
            Some(coords)
        } else {
            log::warn!("Run-level coordinates lie outside the destination; nothing to convert");
            None
        }
    }
}

/// Appends `batch` and asks the store whether a split is due.
pub(crate) struct Appender {
    since_split: usize,
    last_box_count: usize,
}

impl Appender {
    pub(crate) fn new(store: &dyn EventStore) -> Self {
        Self {
            since_split: 0,
            last_box_count: store.total_box_count(),
        }
    }

    pub(crate) fn append(
        &mut self,
        store: &mut dyn EventStore,
        batch: &EventBatch,
        stats: &mut ConversionStatistics,
    ) {
        if batch.is_empty() {
            return;
        }
        let added = store.add_events(batch);
        stats.events_added += added;
        self.since_split += added;
        if store.should_split(self.since_split, self.last_box_count) {
            store.split_if_needed();
            stats.split_requests += 1;
            self.since_split = 0;
            self.last_box_count = store.total_box_count();
        }
    }

    /// Final split check and cache refresh after the detector loop.
    pub(crate) fn finish(store: &mut dyn EventStore) {
        store.split_if_needed();
        store.refresh_cache();
        store.refresh_centroid();
    }
}

/// Per-sample signal filter shared by both engines. Dropped samples are
/// counted in `stats`.
#[inline]
pub(crate) fn accept_signal(
    signal: f64,
    ignore_zeros: bool,
    stats: &mut ConversionStatistics,
) -> bool {
    if signal.is_nan() {
        stats.nan_dropped += 1;
        return false;
    }
    if ignore_zeros && signal == 0.0 {
        stats.zeros_dropped += 1;
        return false;
    }
    true
}

/// Progress messages are throttled to roughly this many per run.
pub(crate) const PROGRESS_STEPS: usize = 100;

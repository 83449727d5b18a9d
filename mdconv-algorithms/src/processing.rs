//! High-level conversion session that keeps the geometry cache and the
//! engine warm between conversions.

use crate::engine::{ConversionConfig, ConversionEngine, ConversionStatistics};
use crate::mapping::MappingMode;
use crate::selector::select;
use mdconv_core::{
    DestinationDescriptor, DetectorGeometryCache, Error, EventStore, InputWorkspace, Progress,
    Result, WorkspaceMetadata,
};
use std::sync::Arc;

/// Reusable conversion session.
///
/// The geometry cache is rebuilt only when the instrument object or the
/// spectrum count changes; energy settings are updated in place. The
/// engine is reused while the input representation stays the same.
#[derive(Debug, Default)]
pub struct MdConverter {
    config: ConversionConfig,
    cache: Option<Arc<DetectorGeometryCache>>,
    engine: Option<ConversionEngine>,
}

impl MdConverter {
    /// Session with the given engine tuning.
    #[must_use]
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            cache: None,
            engine: None,
        }
    }

    /// Engine tuning applied to every conversion.
    #[must_use]
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Current geometry cache, if one was built.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<DetectorGeometryCache>> {
        self.cache.as_ref()
    }

    /// Drops the cached geometry and engine.
    pub fn reset(&mut self) {
        self.cache = None;
        self.engine = None;
    }

    /// Converts `input` into `store`.
    ///
    /// # Errors
    /// Returns any setup error of the descriptor, geometry cache, mapping
    /// or unit conversion, and any run error of the engine.
    pub fn convert(
        &mut self,
        input: Arc<InputWorkspace>,
        descriptor: &DestinationDescriptor,
        store: &mut dyn EventStore,
        progress: &mut dyn Progress,
    ) -> Result<ConversionStatistics> {
        descriptor.validate()?;
        let mut engine = select(&input, self.engine.take())?;
        engine.set_config(self.config.clone());

        let metadata = input.metadata().ok_or_else(|| {
            Error::UnsupportedInput(format!("{} has no spectra", input.describe()))
        })?;
        let cache = self.prepare_cache(metadata, descriptor, progress)?;

        let usable = engine.initialize(Arc::clone(&input), cache, descriptor, &*store)?;
        log::info!(
            "Converting {} usable detectors of {} in mode {}",
            usable,
            input.describe(),
            descriptor.mode
        );
        let stats = engine.run(store, progress)?;
        self.engine = Some(engine);
        Ok(stats)
    }

    fn prepare_cache(
        &mut self,
        metadata: &WorkspaceMetadata,
        descriptor: &DestinationDescriptor,
        progress: &mut dyn Progress,
    ) -> Result<Arc<DetectorGeometryCache>> {
        let mode = MappingMode::from_id(&descriptor.mode)?;
        let mut cache = match self.cache.take() {
            Some(cache)
                if cache.is_valid_for(&metadata.instrument)
                    && cache.input_rows() == metadata.n_spectra() =>
            {
                log::debug!("Reusing detector cache for '{}'", metadata.instrument.name);
                cache
            }
            previous => {
                if previous.is_some() {
                    log::debug!("Detector cache invalidated by a new instrument");
                }
                Arc::new(build_cache(mode, metadata, progress)?)
            }
        };

        // Energy settings always mirror the descriptor.
        let current = Some(cache.fixed_energy()).filter(|e| !e.is_nan());
        let emode_changed = cache.energy_mode() != descriptor.emode;
        let efixed_changed =
            current.map(f64::to_bits) != descriptor.fixed_energy.map(f64::to_bits);
        if emode_changed || efixed_changed {
            let inner = Arc::make_mut(&mut cache);
            inner.set_energy_mode(descriptor.emode.code())?;
            match descriptor.fixed_energy {
                Some(e) => inner.set_fixed_energy(e)?,
                None => inner.unset_fixed_energy(),
            }
        }
        self.cache = Some(Arc::clone(&cache));
        Ok(cache)
    }
}

fn build_cache(
    mode: MappingMode,
    metadata: &WorkspaceMetadata,
    progress: &mut dyn Progress,
) -> Result<DetectorGeometryCache> {
    if !metadata.instrument.has_beamline() && !mode.needs_geometry() {
        log::warn!(
            "Instrument '{}' has no source or sample; using synthetic detector geometry",
            metadata.instrument.name
        );
        return Ok(DetectorGeometryCache::build_fake(metadata.n_spectra()));
    }
    DetectorGeometryCache::build(&metadata.instrument, &metadata.spectrum_detectors, progress)
}

/// One-shot conversion with a throwaway session.
///
/// # Errors
/// See [`MdConverter::convert`].
pub fn convert_to_md(
    input: Arc<InputWorkspace>,
    descriptor: &DestinationDescriptor,
    config: &ConversionConfig,
    store: &mut dyn EventStore,
    progress: &mut dyn Progress,
) -> Result<ConversionStatistics> {
    MdConverter::new(config.clone()).convert(input, descriptor, store, progress)
}

//! Engine selection by input representation.

use crate::engine::{ConversionConfig, ConversionEngine, EngineKind};
use mdconv_core::{InputWorkspace, Result};

/// Picks the engine for `input`, reusing `previous` when it already
/// handles the same representation.
///
/// A fresh engine inherits the configuration of `previous`, or the default
/// configuration when there is none.
///
/// # Errors
/// Returns `UnsupportedInput` for inputs that are neither histograms nor
/// events.
pub fn select(input: &InputWorkspace, previous: Option<ConversionEngine>) -> Result<ConversionEngine> {
    let kind = EngineKind::classify(input)?;
    match previous {
        Some(engine) if engine.kind() == kind => {
            log::debug!("Reusing {kind:?} engine");
            Ok(engine)
        }
        Some(engine) => {
            log::debug!("Replacing {:?} engine with a {kind:?} engine", engine.kind());
            Ok(ConversionEngine::new(kind, engine.config().clone()))
        }
        None => Ok(ConversionEngine::new(kind, ConversionConfig::default())),
    }
}

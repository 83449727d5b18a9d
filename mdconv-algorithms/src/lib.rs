//! mdconv-algorithms: Conversion of spectra into multidimensional events.
//!
//! This crate provides:
//! - **Mapping modes** - `CopyToMD`, `|Q|` and `Q3D` coordinate strategies
//! - **Engines** - histogram and discrete-event converters
//! - **Selection** - engine reuse keyed on the input representation
//! - **Sessions** - [`MdConverter`], which keeps geometry and engines warm
//!
#![warn(missing_docs)]

pub mod engine;
pub mod mapping;
mod processing;
mod selector;

pub use engine::{
    ConversionConfig, ConversionEngine, ConversionStatistics, EngineKind, EventConverter,
    HistogramConverter,
};
pub use mapping::{
    with_default_dimensions, CoordinateMapping, CopyToMdMapping, MappingMode, MappingStrategy,
    ModQMapping, Q3dMapping,
};
pub use processing::{convert_to_md, MdConverter};
pub use selector::select;

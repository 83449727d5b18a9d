//! mdconv-core: Core types for converting scattering spectra into MD events.
//!
//! This crate provides the building blocks used by the conversion engines:
//! affine transforms, the unit registry and per-detector unit conversion,
//! the detector geometry cache, input workspaces, and the destination
//! store contract.
//!

pub mod conversion;
pub mod descriptor;
pub mod detectors;
pub mod error;
pub mod event;
pub mod geometry;
pub mod progress;
pub mod store;
pub mod transform;
pub mod units;
pub mod workspace;

pub use conversion::{ConversionStrategy, UnitConversionContext};
pub use descriptor::{DestinationDescriptor, DimensionSpec};
pub use detectors::DetectorGeometryCache;
pub use error::{Error, Result};
pub use event::{EventBatch, MdEvent};
pub use geometry::{Detector, DetectorId, EnergyMode, Instrument, V3D};
pub use progress::{LogProgress, NoProgress, Progress};
pub use store::{BoxSplitConfig, EventStore, MemoryEventStore};
pub use transform::{AffineTransform, Matrix};
pub use units::{QuickConversion, TofConversion, TofParameters, UnitKind};
pub use workspace::{
    EventList, EventType, EventWorkspace, Histogram, HistogramWorkspace, InputWorkspace,
    TableWorkspace, TimedSample, TofEvent, WeightedEvent, WeightedEventNoTime, WorkspaceMetadata,
};

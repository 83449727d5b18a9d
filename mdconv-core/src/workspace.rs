//! Input workspaces: per-spectrum histograms or discrete event lists.

use crate::geometry::{DetectorId, Instrument};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Data shared by every workspace representation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkspaceMetadata {
    pub instrument: Arc<Instrument>,
    /// Detector recorded for each spectrum (input row).
    pub spectrum_detectors: Vec<Option<DetectorId>>,
    /// Unit identifier of the X values.
    pub x_unit: String,
    /// Numeric vertical axis, one value per spectrum.
    #[cfg_attr(feature = "serde", serde(default))]
    pub vertical_axis: Option<Vec<f64>>,
    /// Run-level scalar logs (temperature, field, ...).
    #[cfg_attr(feature = "serde", serde(default))]
    pub run_logs: BTreeMap<String, f64>,
}

impl WorkspaceMetadata {
    #[must_use]
    pub fn new(
        instrument: Arc<Instrument>,
        spectrum_detectors: Vec<Option<DetectorId>>,
        x_unit: impl Into<String>,
    ) -> Self {
        Self {
            instrument,
            spectrum_detectors,
            x_unit: x_unit.into(),
            vertical_axis: None,
            run_logs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_vertical_axis(mut self, values: Vec<f64>) -> Self {
        self.vertical_axis = Some(values);
        self
    }

    #[must_use]
    pub fn with_log(mut self, name: impl Into<String>, value: f64) -> Self {
        self.run_logs.insert(name.into(), value);
        self
    }

    /// Number of spectra.
    #[must_use]
    pub fn n_spectra(&self) -> usize {
        self.spectrum_detectors.len()
    }

    /// Value of a run log.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the log is missing.
    pub fn log_value(&self, name: &str) -> Result<f64> {
        self.run_logs
            .get(name)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("run log '{name}' not found")))
    }

    fn validate(&self) -> Result<()> {
        if let Some(axis) = &self.vertical_axis {
            if axis.len() != self.n_spectra() {
                return Err(Error::DimensionMismatch(format!(
                    "vertical axis has {} values for {} spectra",
                    axis.len(),
                    self.n_spectra()
                )));
            }
        }
        Ok(())
    }
}

/// Counts of one spectrum: bin edges (or points) with values and errors.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub e: Vec<f64>,
}

impl Histogram {
    /// Creates a histogram.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` unless `e` matches `y` and `x` holds
    /// either one edge more than `y` (binned) or as many points.
    pub fn new(x: Vec<f64>, y: Vec<f64>, e: Vec<f64>) -> Result<Self> {
        if e.len() != y.len() || (x.len() != y.len() && x.len() != y.len() + 1) {
            return Err(Error::DimensionMismatch(format!(
                "histogram with {} x, {} y and {} e values",
                x.len(),
                y.len(),
                e.len()
            )));
        }
        Ok(Self { x, y, e })
    }

    /// True when X holds one value per bin rather than bin edges.
    #[must_use]
    pub fn is_point_data(&self) -> bool {
        self.x.len() == self.y.len()
    }

    /// X value representing each bin: the centre for binned data, the
    /// point itself otherwise.
    #[must_use]
    pub fn bin_positions(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.y.len());
        self.bin_positions_into(&mut out);
        out
    }

    /// Same as [`Self::bin_positions`], reusing `out`.
    pub fn bin_positions_into(&self, out: &mut Vec<f64>) {
        out.clear();
        if self.is_point_data() {
            out.extend_from_slice(&self.x);
        } else {
            out.extend(self.x.windows(2).map(|w| 0.5 * (w[0] + w[1])));
        }
    }
}

/// Histogram (binned or point) workspace.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistogramWorkspace {
    pub metadata: WorkspaceMetadata,
    pub spectra: Vec<Histogram>,
}

impl HistogramWorkspace {
    /// # Errors
    /// Returns `DimensionMismatch` if the spectrum count disagrees with the
    /// metadata.
    pub fn new(metadata: WorkspaceMetadata, spectra: Vec<Histogram>) -> Result<Self> {
        metadata.validate()?;
        if spectra.len() != metadata.n_spectra() {
            return Err(Error::DimensionMismatch(format!(
                "{} histograms for {} spectra",
                spectra.len(),
                metadata.n_spectra()
            )));
        }
        Ok(Self { metadata, spectra })
    }
}

/// Event storage type declared by an event workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventType {
    Tof,
    Weighted,
    WeightedNoTime,
}

/// Unweighted neutron event.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TofEvent {
    /// X value in the workspace unit.
    pub tof: f64,
    /// Pulse time (ns since epoch).
    pub pulse_time: i64,
}

/// Event carrying its own weight and squared error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEvent {
    pub tof: f64,
    pub pulse_time: i64,
    pub weight: f64,
    pub error_sq: f64,
}

/// Weighted event without pulse time.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEventNoTime {
    pub tof: f64,
    pub weight: f64,
    pub error_sq: f64,
}

/// Events recorded for one spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventList {
    Tof(Vec<TofEvent>),
    Weighted(Vec<WeightedEvent>),
    WeightedNoTime(Vec<WeightedEventNoTime>),
}

impl EventList {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            EventList::Tof(_) => EventType::Tof,
            EventList::Weighted(_) => EventType::Weighted,
            EventList::WeightedNoTime(_) => EventType::WeightedNoTime,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            EventList::Tof(v) => v.len(),
            EventList::Weighted(v) => v.len(),
            EventList::WeightedNoTime(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A discrete timed sample the event engine can convert.
pub trait TimedSample: Copy + Send + Sync {
    /// Storage type these samples come from.
    const EVENT_TYPE: EventType;

    /// Borrows the samples of `list` if it stores this type.
    fn samples(list: &EventList) -> Option<&[Self]>;

    /// X value in the workspace unit.
    fn tof(&self) -> f64;

    fn weight(&self) -> f64;

    fn error_sq(&self) -> f64;
}

impl TimedSample for TofEvent {
    const EVENT_TYPE: EventType = EventType::Tof;

    fn samples(list: &EventList) -> Option<&[Self]> {
        match list {
            EventList::Tof(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn weight(&self) -> f64 {
        1.0
    }

    #[inline]
    fn error_sq(&self) -> f64 {
        1.0
    }
}

impl TimedSample for WeightedEvent {
    const EVENT_TYPE: EventType = EventType::Weighted;

    fn samples(list: &EventList) -> Option<&[Self]> {
        match list {
            EventList::Weighted(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    fn error_sq(&self) -> f64 {
        self.error_sq
    }
}

impl TimedSample for WeightedEventNoTime {
    const EVENT_TYPE: EventType = EventType::WeightedNoTime;

    fn samples(list: &EventList) -> Option<&[Self]> {
        match list {
            EventList::WeightedNoTime(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    fn error_sq(&self) -> f64 {
        self.error_sq
    }
}

/// Workspace of discrete events, one list per spectrum.
///
/// Every list is expected to hold `event_type` samples; the event engine
/// treats a mismatch as a structural error.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventWorkspace {
    pub metadata: WorkspaceMetadata,
    pub event_type: EventType,
    pub lists: Vec<EventList>,
}

impl EventWorkspace {
    /// # Errors
    /// Returns `DimensionMismatch` if the list count disagrees with the
    /// metadata.
    pub fn new(metadata: WorkspaceMetadata, event_type: EventType, lists: Vec<EventList>) -> Result<Self> {
        metadata.validate()?;
        if lists.len() != metadata.n_spectra() {
            return Err(Error::DimensionMismatch(format!(
                "{} event lists for {} spectra",
                lists.len(),
                metadata.n_spectra()
            )));
        }
        Ok(Self {
            metadata,
            event_type,
            lists,
        })
    }

    /// Total number of events.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.lists.iter().map(EventList::len).sum()
    }
}

/// Tabular data with no per-spectrum signal.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TableWorkspace {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Anything that may be offered to the conversion engines.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InputWorkspace {
    Histogram(HistogramWorkspace),
    Events(EventWorkspace),
    Table(TableWorkspace),
}

impl InputWorkspace {
    /// Spectrum metadata, `None` for inputs without spectra.
    #[must_use]
    pub fn metadata(&self) -> Option<&WorkspaceMetadata> {
        match self {
            InputWorkspace::Histogram(ws) => Some(&ws.metadata),
            InputWorkspace::Events(ws) => Some(&ws.metadata),
            InputWorkspace::Table(_) => None,
        }
    }

    /// Short description used in error messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            InputWorkspace::Histogram(_) => "histogram workspace",
            InputWorkspace::Events(_) => "event workspace",
            InputWorkspace::Table(_) => "table workspace",
        }
    }
}

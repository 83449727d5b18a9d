//! MD events stored as a structure of arrays.
//!
//! Conversion engines accumulate accepted samples in an [`EventBatch`] and
//! hand the whole batch to the destination store, which takes its own copy.
//! Columnar layout keeps the per-sample push cheap and lets stores copy
//! whole columns at once.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One MD event viewed out of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdEvent<'a> {
    pub signal: f64,
    pub error_sq: f64,
    pub run_index: u16,
    pub detector_id: u32,
    pub coords: &'a [f64],
}

/// A batch of MD events with a fixed number of dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventBatch {
    n_dims: usize,
    /// Columnar storage for signals.
    pub signal: Vec<f64>,
    /// Columnar storage for squared errors.
    pub error_sq: Vec<f64>,
    /// Columnar storage for run indices.
    pub run_index: Vec<u16>,
    /// Columnar storage for detector ids.
    pub detector_id: Vec<u32>,
    /// Coordinates, `n_dims` consecutive values per event.
    pub coords: Vec<f64>,
}

impl EventBatch {
    /// Creates an empty batch for `n_dims`-dimensional events.
    #[must_use]
    pub fn new(n_dims: usize) -> Self {
        Self::with_capacity(n_dims, 0)
    }

    /// Creates an empty batch with room for `capacity` events.
    #[must_use]
    pub fn with_capacity(n_dims: usize, capacity: usize) -> Self {
        Self {
            n_dims,
            signal: Vec::with_capacity(capacity),
            error_sq: Vec::with_capacity(capacity),
            run_index: Vec::with_capacity(capacity),
            detector_id: Vec::with_capacity(capacity),
            coords: Vec::with_capacity(capacity * n_dims),
        }
    }

    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Clears all columns, keeping their allocations.
    pub fn clear(&mut self) {
        self.signal.clear();
        self.error_sq.clear();
        self.run_index.clear();
        self.detector_id.clear();
        self.coords.clear();
    }

    /// Pushes one event. `coords` must hold `n_dims` values.
    #[inline]
    pub fn push(&mut self, signal: f64, error_sq: f64, run_index: u16, detector_id: u32, coords: &[f64]) {
        debug_assert_eq!(coords.len(), self.n_dims);
        self.signal.push(signal);
        self.error_sq.push(error_sq);
        self.run_index.push(run_index);
        self.detector_id.push(detector_id);
        self.coords.extend_from_slice(coords);
    }

    /// Coordinates of event `i`.
    #[must_use]
    pub fn coords_of(&self, i: usize) -> &[f64] {
        &self.coords[i * self.n_dims..(i + 1) * self.n_dims]
    }

    /// Event `i`.
    #[must_use]
    pub fn event(&self, i: usize) -> MdEvent<'_> {
        MdEvent {
            signal: self.signal[i],
            error_sq: self.error_sq[i],
            run_index: self.run_index[i],
            detector_id: self.detector_id[i],
            coords: self.coords_of(i),
        }
    }

    /// Iterates over the events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = MdEvent<'_>> + '_ {
        (0..self.len()).map(move |i| self.event(i))
    }
}

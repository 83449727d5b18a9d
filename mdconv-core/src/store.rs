//! Destination event store contract and an in-memory box-tree store.
//!
//! Conversion engines only talk to a store through [`EventStore`]: append a
//! batch, ask whether a split is due, split, and refresh derived values.
//! Where and how boxes split is the store's business.

use crate::descriptor::DestinationDescriptor;
use crate::event::EventBatch;
use std::mem;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Events added between splits never need to exceed this many.
const MIN_SPLIT_INTERVAL: usize = 10_000_000;

/// Operations a conversion engine needs from its destination.
pub trait EventStore {
    /// Dimensionality of stored events.
    fn n_dims(&self) -> usize;

    /// Appends a batch, returning how many events were kept.
    fn add_events(&mut self, batch: &EventBatch) -> usize;

    /// True if `events_added` since the last split, spread over
    /// `last_box_count` boxes, warrants splitting now.
    fn should_split(&self, events_added: usize, last_box_count: usize) -> bool;

    /// Splits every box over the threshold.
    fn split_if_needed(&mut self);

    /// Recomputes cached totals.
    fn refresh_cache(&mut self);

    /// Recomputes the signal-weighted centroid.
    fn refresh_centroid(&mut self);

    /// Number of leaf boxes.
    fn total_box_count(&self) -> usize;
}

/// Splitting policy for [`MemoryEventStore`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxSplitConfig {
    /// Children per dimension when a box splits.
    pub split_into: usize,
    /// A box with more events than this splits.
    pub split_threshold: usize,
    /// Boxes at this depth never split.
    pub max_depth: usize,
}

impl Default for BoxSplitConfig {
    fn default() -> Self {
        Self {
            split_into: 5,
            split_threshold: 1000,
            max_depth: 20,
        }
    }
}

impl BoxSplitConfig {
    #[must_use]
    pub fn with_split_into(mut self, n: usize) -> Self {
        self.split_into = n.max(2);
        self
    }

    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

#[derive(Debug, Clone)]
enum Node {
    /// Indices into the event columns.
    Leaf(Vec<usize>),
    /// Indices of child nodes in row-major order, first dimension fastest.
    Grid(Vec<usize>),
}

#[derive(Debug, Clone)]
struct BoxNode {
    extents: Vec<(f64, f64)>,
    depth: usize,
    node: Node,
}

/// In-memory MD event store organised as a box tree.
#[derive(Debug, Clone)]
pub struct MemoryEventStore {
    config: BoxSplitConfig,
    events: EventBatch,
    nodes: Vec<BoxNode>,
    dropped: usize,
    total_signal: f64,
    total_error_sq: f64,
    centroid: Vec<f64>,
    splits: usize,
}

impl MemoryEventStore {
    /// Creates an empty store covering `extents` (half-open per dimension).
    #[must_use]
    pub fn new(extents: Vec<(f64, f64)>, config: BoxSplitConfig) -> Self {
        let n_dims = extents.len();
        Self {
            config,
            events: EventBatch::new(n_dims),
            nodes: vec![BoxNode {
                extents,
                depth: 0,
                node: Node::Leaf(Vec::new()),
            }],
            dropped: 0,
            total_signal: 0.0,
            total_error_sq: 0.0,
            centroid: vec![0.0; n_dims],
            splits: 0,
        }
    }

    /// Store covering the descriptor's dimensions.
    #[must_use]
    pub fn from_descriptor(descriptor: &DestinationDescriptor, config: BoxSplitConfig) -> Self {
        Self::new(descriptor.extents(), config)
    }

    #[must_use]
    pub fn events(&self) -> &EventBatch {
        &self.events
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    /// Events rejected because they fell outside the extents.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Total signal as of the last [`EventStore::refresh_cache`].
    #[must_use]
    pub fn total_signal(&self) -> f64 {
        self.total_signal
    }

    /// Total squared error as of the last [`EventStore::refresh_cache`].
    #[must_use]
    pub fn total_error_sq(&self) -> f64 {
        self.total_error_sq
    }

    /// Signal-weighted centroid as of the last
    /// [`EventStore::refresh_centroid`].
    #[must_use]
    pub fn centroid(&self) -> &[f64] {
        &self.centroid
    }

    /// Number of boxes split so far.
    #[must_use]
    pub fn split_count(&self) -> usize {
        self.splits
    }

    /// Deepest level reached by any box.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    fn inside(&self, coords: &[f64]) -> bool {
        self.nodes[0]
            .extents
            .iter()
            .zip(coords)
            .all(|(&(lo, hi), &c)| c >= lo && c < hi)
    }

    /// Children per split, `None` when `split_into^n_dims` overflows.
    fn child_count(&self) -> Option<usize> {
        let n_dims = u32::try_from(self.events.n_dims()).ok()?;
        self.config.split_into.checked_pow(n_dims)
    }

    #[allow(clippy::cast_precision_loss)]
    fn child_slot(&self, node: &BoxNode, coords: &[f64]) -> usize {
        let n = self.config.split_into;
        let mut slot = 0;
        let mut stride = 1;
        for (&(lo, hi), &c) in node.extents.iter().zip(coords) {
            let width = (hi - lo) / n as f64;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = (((c - lo) / width) as usize).min(n - 1);
            slot += idx * stride;
            stride *= n;
        }
        slot
    }

    fn leaf_for(&self, coords: &[f64]) -> usize {
        let mut current = 0;
        while let Node::Grid(children) = &self.nodes[current].node {
            current = children[self.child_slot(&self.nodes[current], coords)];
        }
        current
    }

    #[allow(clippy::cast_precision_loss)]
    fn split_node(&mut self, index: usize) -> Vec<usize> {
        let n = self.config.split_into;
        let Some(n_children) = self.child_count() else {
            return Vec::new();
        };
        let parent_extents = self.nodes[index].extents.clone();
        let depth = self.nodes[index].depth + 1;

        let mut children = Vec::with_capacity(n_children);
        for linear in 0..n_children {
            let mut rem = linear;
            let extents = parent_extents
                .iter()
                .map(|&(lo, hi)| {
                    let width = (hi - lo) / n as f64;
                    let i = (rem % n) as f64;
                    rem /= n;
                    (lo + i * width, lo + (i + 1.0) * width)
                })
                .collect();
            children.push(self.nodes.len());
            self.nodes.push(BoxNode {
                extents,
                depth,
                node: Node::Leaf(Vec::new()),
            });
        }

        let Node::Leaf(members) = mem::replace(&mut self.nodes[index].node, Node::Leaf(Vec::new()))
        else {
            return Vec::new();
        };
        for event in members {
            let slot = self.child_slot(&self.nodes[index], self.events.coords_of(event));
            if let Node::Leaf(list) = &mut self.nodes[children[slot]].node {
                list.push(event);
            }
        }
        self.nodes[index].node = Node::Grid(children.clone());
        self.splits += 1;
        children
    }

    fn needs_split(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        match &node.node {
            Node::Leaf(events) => {
                events.len() > self.config.split_threshold
                    && node.depth < self.config.max_depth
                    && self.child_count().is_some()
            }
            Node::Grid(_) => false,
        }
    }
}

impl EventStore for MemoryEventStore {
    fn n_dims(&self) -> usize {
        self.events.n_dims()
    }

    fn add_events(&mut self, batch: &EventBatch) -> usize {
        let mut kept = 0;
        for event in batch.iter() {
            if !self.inside(event.coords) {
                self.dropped += 1;
                continue;
            }
            let leaf = self.leaf_for(event.coords);
            let index = self.events.len();
            self.events.push(
                event.signal,
                event.error_sq,
                event.run_index,
                event.detector_id,
                event.coords,
            );
            if let Node::Leaf(list) = &mut self.nodes[leaf].node {
                list.push(index);
            }
            kept += 1;
        }
        kept
    }

    fn should_split(&self, events_added: usize, last_box_count: usize) -> bool {
        if last_box_count == 0 {
            return false;
        }
        let comparison = (self.events.len() / 16).max(MIN_SPLIT_INTERVAL);
        events_added > comparison || events_added / last_box_count > self.config.split_threshold
    }

    fn split_if_needed(&mut self) {
        let mut pending: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.needs_split(i))
            .collect();
        while let Some(index) = pending.pop() {
            let children = self.split_node(index);
            pending.extend(children.into_iter().filter(|&c| self.needs_split(c)));
        }
    }

    fn refresh_cache(&mut self) {
        self.total_signal = self.events.signal.iter().sum();
        self.total_error_sq = self.events.error_sq.iter().sum();
    }

    fn refresh_centroid(&mut self) {
        let n_dims = self.events.n_dims();
        let mut sums = vec![0.0; n_dims];
        let mut weight = 0.0;
        for event in self.events.iter() {
            for (s, c) in sums.iter_mut().zip(event.coords) {
                *s += event.signal * c;
            }
            weight += event.signal;
        }
        if weight != 0.0 {
            sums.iter_mut().for_each(|s| *s /= weight);
        }
        self.centroid = sums;
    }

    fn total_box_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.node, Node::Leaf(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;

    fn batch(points: &[[f64; 2]]) -> EventBatch {
        let mut b = EventBatch::new(2);
        for (i, p) in points.iter().enumerate() {
            b.push(1.0 + i as f64, 0.5, 0, 7, p);
        }
        b
    }

    #[test]
    fn test_out_of_bounds_events_dropped() {
        let mut store = MemoryEventStore::new(vec![(0.0, 1.0), (0.0, 1.0)], BoxSplitConfig::default());
        let kept = store.add_events(&batch(&[[0.5, 0.5], [1.0, 0.5], [-0.1, 0.2]]));
        assert_eq!(kept, 1);
        assert_eq!(store.dropped(), 2);
        assert_eq!(store.n_events(), 1);
    }

    #[test]
    fn test_split_over_threshold() {
        let config = BoxSplitConfig::default()
            .with_split_into(2)
            .with_split_threshold(3);
        let mut store = MemoryEventStore::new(vec![(0.0, 1.0), (0.0, 1.0)], config);
        store.add_events(&batch(&[
            [0.1, 0.1],
            [0.2, 0.1],
            [0.9, 0.9],
            [0.6, 0.7],
            [0.1, 0.8],
        ]));
        assert_eq!(store.total_box_count(), 1);
        store.split_if_needed();
        assert_eq!(store.total_box_count(), 4);
        assert_eq!(store.split_count(), 1);
        assert_eq!(store.depth(), 1);

        // New events land in the child boxes.
        store.add_events(&batch(&[[0.05, 0.05], [0.4, 0.1]]));
        store.split_if_needed();
        assert_eq!(store.total_box_count(), 7);
    }

    #[test]
    fn test_max_depth_stops_splitting() {
        let config = BoxSplitConfig::default()
            .with_split_into(2)
            .with_split_threshold(1)
            .with_max_depth(2);
        let mut store = MemoryEventStore::new(vec![(0.0, 1.0), (0.0, 1.0)], config);
        store.add_events(&batch(&[[0.01, 0.01]; 5]));
        store.split_if_needed();
        assert_eq!(store.depth(), 2);
        assert_eq!(store.total_box_count(), 7);
    }

    #[test]
    fn test_unsplittable_dimensionality_stays_one_box() {
        // 5^40 children per split does not fit in usize.
        let n_dims = 40;
        let config = BoxSplitConfig::default().with_split_threshold(1);
        let mut store = MemoryEventStore::new(vec![(0.0, 1.0); n_dims], config);
        let mut events = EventBatch::new(n_dims);
        for _ in 0..3 {
            events.push(1.0, 1.0, 0, 1, &vec![0.5; n_dims]);
        }
        assert_eq!(store.add_events(&events), 3);
        store.split_if_needed();
        assert_eq!(store.total_box_count(), 1);
        assert_eq!(store.split_count(), 0);
    }

    #[test]
    fn test_should_split_policy() {
        let store = MemoryEventStore::new(vec![(0.0, 1.0)], BoxSplitConfig::default());
        assert!(!store.should_split(5000, 0));
        assert!(!store.should_split(5000, 10));
        assert!(store.should_split(20_000, 10));
        assert!(store.should_split(MIN_SPLIT_INTERVAL + 1, 1_000_000));
    }

    #[test]
    fn test_refresh_totals_and_centroid() {
        let mut store = MemoryEventStore::new(vec![(0.0, 4.0), (0.0, 4.0)], BoxSplitConfig::default());
        store.add_events(&batch(&[[1.0, 1.0], [3.0, 1.0]]));
        assert_eq!(store.total_signal(), 0.0);
        store.refresh_cache();
        store.refresh_centroid();
        assert_eq!(store.total_signal(), 3.0);
        assert_eq!(store.total_error_sq(), 1.0);
        // Weights 1 and 2.
        assert_relative_eq!(store.centroid()[0], 7.0 / 3.0);
        assert_relative_eq!(store.centroid()[1], 1.0);
    }
}

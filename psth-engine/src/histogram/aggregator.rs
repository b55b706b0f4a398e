use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::counter;
use psth_common::{
    NeuralEvent, UnitLabel, ms_between,
    metrics::{metric_names::RESETS, resets},
};
use tracing::warn;

use crate::{
    error::{HistogramError, HistogramResult},
    sorted_index::SortedKeyIndex,
    window::TriggeredWindow,
};

use super::{matrix::HistogramMatrix, snapshot::AggregatorSnapshot};

/// Folds triggered windows into per-unit, per-class histogram matrices and
/// produces immutable snapshots.
///
/// One coarse mutex guards all state: ingestion (`add_samples`, `reset`) and
/// reads (`output`, counters) are mutually atomic, so a reader sees either
/// the fully pre-update or fully post-update state. Hold times stay short
/// because unit and class cardinalities are small.
#[derive(Debug)]
pub struct HistogramAggregator<C> {
    inner: Mutex<AggregatorState<C>>,
}

#[derive(Debug)]
struct AggregatorState<C> {
    units: SortedKeyIndex<UnitLabel>,
    classes: SortedKeyIndex<C>,
    counts: Vec<u32>,
    matrices: Vec<HistogramMatrix>,
    bin_edges: Arc<[f64]>,
}

impl<C> AggregatorState<C> {
    fn new() -> Self {
        Self {
            units: SortedKeyIndex::default(),
            classes: SortedKeyIndex::default(),
            counts: Vec::new(),
            matrices: Vec::new(),
            bin_edges: Arc::from(Vec::new()),
        }
    }
}

impl<C: Ord + Clone> AggregatorState<C> {
    /// Clears everything except the bin edges, which stay valid until a
    /// geometry change recomputes them.
    fn clear(&mut self) {
        self.units.clear();
        self.classes.clear();
        self.counts.clear();
        self.matrices.clear();
    }

    fn fold_window(
        &mut self,
        window: &TriggeredWindow<NeuralEvent, C>,
        bin_count: usize,
        left_edge_ms: f64,
        right_edge_ms: f64,
    ) -> HistogramResult<()> {
        let bin_width = (right_edge_ms - left_edge_ms) / bin_count as f64;

        let geometry_changed = self.bin_edges.len() != bin_count + 1
            || self.bin_edges.first().copied() != Some(left_edge_ms);
        if geometry_changed {
            self.clear();
            self.bin_edges = (0..=bin_count)
                .map(|i| left_edge_ms + i as f64 * bin_width)
                .collect::<Vec<_>>()
                .into();
        }

        let (class_added, class_id) = self.classes.try_add(window.class.clone());
        if class_added {
            for matrix in &mut self.matrices {
                matrix.add_class(class_id)?;
            }
            self.counts.insert(class_id, 0);
        }

        for sample in &window.samples {
            let Some(unit) = sample.value.unit_label() else {
                continue;
            };
            let (unit_added, unit_id) = self.units.try_add(unit.clone());
            if unit_added {
                let matrix =
                    HistogramMatrix::new(unit, self.classes.len(), Arc::clone(&self.bin_edges))?;
                self.matrices.insert(unit_id, matrix);
            }
            let offset_ms = ms_between(window.anchor, sample.timestamp);
            match self.matrices.get_mut(unit_id) {
                Some(matrix) => matrix.add_sample(offset_ms, class_id)?,
                None => {
                    return Err(HistogramError::UnitIndexOutOfRange {
                        unit: unit_id,
                        unit_count: self.matrices.len(),
                    });
                }
            }
        }

        // One repetition per window, independent of how many spikes it held.
        match self.counts.get_mut(class_id) {
            Some(count) => *count += 1,
            None => {
                return Err(HistogramError::ClassIndexOutOfRange {
                    class: class_id,
                    class_count: self.counts.len(),
                });
            }
        }
        Ok(())
    }
}

impl<C: Ord + Clone> HistogramAggregator<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AggregatorState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState<C>> {
        // The coarse lock never leaves partial updates behind an early
        // return, so a poisoned guard still holds consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears unit index, class index, per-class counts, and matrices. Bin
    /// edges are retained; the next `add_samples` with different geometry
    /// recomputes them.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Folds one triggered window into the accumulated state.
    ///
    /// A geometry change (bin count or left edge differs from the stored
    /// edges) discards all accumulated history first: changing shared edges
    /// mid-flight would make previous counts semantically incompatible with
    /// the new bins. An internal inconsistency detected while folding also
    /// resets accumulated state, then surfaces the error; later windows
    /// proceed normally.
    pub fn add_samples(
        &self,
        window: &TriggeredWindow<NeuralEvent, C>,
        bin_count: usize,
        left_edge_ms: f64,
        right_edge_ms: f64,
    ) -> HistogramResult<()> {
        if bin_count == 0 {
            return Err(HistogramError::ZeroBinCount);
        }
        if right_edge_ms <= left_edge_ms {
            return Err(HistogramError::NonIncreasingBinEdges);
        }

        let mut state = self.lock();
        let result = state.fold_window(window, bin_count, left_edge_ms, right_edge_ms);
        if let Err(ref error) = result {
            warn!("discarding accumulated histograms after ingest failure: {error}");
            counter!(
                RESETS,
                &[resets::get_label(resets::ResetKind::IngestRecovery)]
            )
            .increment(1);
            state.clear();
        }
        result
    }

    /// Produces a deep, independently owned snapshot of the current state,
    /// normalized (and smoothed, for a kernel of two or more taps) per
    /// matrix. With no units observed the snapshot is empty.
    pub fn output(&self, kernel: &[f64]) -> HistogramResult<AggregatorSnapshot<C>> {
        let state = self.lock();
        if state.units.is_empty() {
            return Ok(AggregatorSnapshot::empty());
        }
        let histograms = state
            .matrices
            .iter()
            .map(|matrix| matrix.output(&state.counts, kernel))
            .collect::<HistogramResult<Vec<_>>>()?;
        Ok(AggregatorSnapshot {
            units: state.units.as_slice().to_vec(),
            classes: state.classes.as_slice().to_vec(),
            counts: state.counts.clone(),
            bin_edges: Arc::clone(&state.bin_edges),
            histograms,
        })
    }

    pub fn unit_count(&self) -> usize {
        self.lock().units.len()
    }

    pub fn class_count(&self) -> usize {
        self.lock().classes.len()
    }
}

impl<C: Ord + Clone> Default for HistogramAggregator<C> {
    fn default() -> Self {
        Self::new()
    }
}

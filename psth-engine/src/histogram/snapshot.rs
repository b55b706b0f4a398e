use std::{fmt, sync::Arc};

use psth_common::UnitLabel;

use super::matrix::HistogramMatrix;

/// An immutable, independently owned copy of aggregator state.
///
/// Unit, class, and count lists are index-aligned with the sorted orders the
/// aggregator maintained when the snapshot was taken; `histograms[i]` is the
/// output matrix of `units[i]`. Later mutation of the live aggregator never
/// alters a snapshot already handed out.
#[derive(Debug, Clone)]
pub struct AggregatorSnapshot<C> {
    pub(crate) units: Vec<UnitLabel>,
    pub(crate) classes: Vec<C>,
    pub(crate) counts: Vec<u32>,
    pub(crate) bin_edges: Arc<[f64]>,
    pub(crate) histograms: Vec<HistogramMatrix>,
}

impl<C> AggregatorSnapshot<C> {
    /// The snapshot emitted when no units have been observed yet.
    pub fn empty() -> Self {
        Self {
            units: Vec::new(),
            classes: Vec::new(),
            counts: Vec::new(),
            bin_edges: Arc::from(Vec::new()),
            histograms: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of units, which is also the number of histograms.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[UnitLabel] {
        &self.units
    }

    pub fn classes(&self) -> &[C] {
        &self.classes
    }

    /// Trigger repetitions observed per class, aligned with `classes`.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn bin_edges(&self) -> &[f64] {
        &self.bin_edges
    }

    pub fn bin_count(&self) -> usize {
        self.bin_edges.len().saturating_sub(1)
    }

    pub fn histograms(&self) -> &[HistogramMatrix] {
        &self.histograms
    }

    pub fn get(&self, index: usize) -> Option<&HistogramMatrix> {
        self.histograms.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistogramMatrix> {
        self.histograms.iter()
    }

    /// A copy with `halo` bins cut from each end of every histogram and of
    /// the edge array, leaving only the displayed bin range.
    pub fn trimmed(&self, halo: usize) -> Self
    where
        C: Clone,
    {
        if halo == 0 || self.bin_edges.len() < 2 * halo + 2 {
            return self.clone();
        }
        let edges: Arc<[f64]> = self.bin_edges[halo..self.bin_edges.len() - halo]
            .to_vec()
            .into();
        Self {
            units: self.units.clone(),
            classes: self.classes.clone(),
            counts: self.counts.clone(),
            bin_edges: Arc::clone(&edges),
            histograms: self
                .histograms
                .iter()
                .map(|histogram| histogram.trimmed(halo, Arc::clone(&edges)))
                .collect(),
        }
    }
}

impl<'a, C> IntoIterator for &'a AggregatorSnapshot<C> {
    type Item = &'a HistogramMatrix;
    type IntoIter = std::slice::Iter<'a, HistogramMatrix>;

    fn into_iter(self) -> Self::IntoIter {
        self.histograms.iter()
    }
}

impl<C: fmt::Display> fmt::Display for AggregatorSnapshot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes = self
            .classes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "Histogram: classes [{classes}]")?;
        for histogram in &self.histograms {
            write!(f, "\n\t{histogram}")?;
        }
        Ok(())
    }
}

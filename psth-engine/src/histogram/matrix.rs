use std::{fmt, sync::Arc};

use ndarray::{Array2, ArrayView2, s};
use psth_common::UnitLabel;

use crate::error::{HistogramError, HistogramResult};

/// One unit's class x bin spike-count accumulator.
///
/// All matrices belonging to one aggregator epoch share the same bin-edge
/// array (strictly increasing, length `binCount + 1`); the row count always
/// equals the current class count.
#[derive(Debug, Clone)]
pub struct HistogramMatrix {
    unit: UnitLabel,
    bin_edges: Arc<[f64]>,
    data: Array2<f64>,
    spike_count: u64,
}

impl HistogramMatrix {
    pub fn new(
        unit: UnitLabel,
        class_count: usize,
        bin_edges: Arc<[f64]>,
    ) -> HistogramResult<Self> {
        if bin_edges.len() < 2 {
            return Err(HistogramError::TooFewBinEdges(bin_edges.len()));
        }
        if bin_edges.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(HistogramError::NonIncreasingBinEdges);
        }
        let bin_count = bin_edges.len() - 1;
        Ok(Self {
            unit,
            bin_edges,
            data: Array2::zeros((class_count, bin_count)),
            spike_count: 0,
        })
    }

    pub fn unit(&self) -> &UnitLabel {
        &self.unit
    }

    pub fn class_count(&self) -> usize {
        self.data.nrows()
    }

    pub fn bin_count(&self) -> usize {
        self.bin_edges.len() - 1
    }

    pub fn bin_edges(&self) -> &[f64] {
        &self.bin_edges
    }

    pub fn min_edge(&self) -> f64 {
        self.bin_edges[0]
    }

    pub fn max_edge(&self) -> f64 {
        self.bin_edges[self.bin_count()]
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_edges[1] - self.bin_edges[0]
    }

    /// Accumulated counts, classes as rows and bins as columns.
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn spike_count(&self) -> u64 {
        self.spike_count
    }

    /// Inserts an all-zero class row at `at`, shifting rows at or after `at`
    /// one position later. Every existing (class, bin) value is preserved.
    pub fn add_class(&mut self, at: usize) -> HistogramResult<()> {
        let (rows, cols) = self.data.dim();
        if at > rows {
            return Err(HistogramError::ClassIndexOutOfRange {
                class: at,
                class_count: rows,
            });
        }
        let mut grown = Array2::zeros((rows + 1, cols));
        grown
            .slice_mut(s![..at, ..])
            .assign(&self.data.slice(s![..at, ..]));
        grown
            .slice_mut(s![at + 1.., ..])
            .assign(&self.data.slice(s![at.., ..]));
        self.data = grown;
        Ok(())
    }

    /// Bins one spike at `offset_ms` from the window anchor into `class`.
    ///
    /// Offsets outside the edge range are expected (the capture window is
    /// wider than the bin range) and are dropped without touching any count.
    pub fn add_sample(&mut self, offset_ms: f64, class: usize) -> HistogramResult<()> {
        if class >= self.class_count() {
            return Err(HistogramError::ClassIndexOutOfRange {
                class,
                class_count: self.class_count(),
            });
        }
        let bin = ((offset_ms - self.min_edge()) / self.bin_width()).floor();
        if !bin.is_finite() || bin < 0.0 || bin >= self.bin_count() as f64 {
            return Ok(());
        }
        self.data[[class, bin as usize]] += 1.0;
        self.spike_count += 1;
        Ok(())
    }

    /// Produces a new, independent matrix holding this one's counts
    /// normalized to mean firing rate in Hz, optionally smoothed.
    ///
    /// `per_class_counts[c]` is the number of trigger repetitions observed
    /// for class `c`; its length must equal the class count. A kernel with
    /// fewer than two taps means no smoothing. Convolution taps falling
    /// outside the bin range are dropped, with no wraparound or padding.
    /// The source matrix is left unmodified.
    pub fn output(
        &self,
        per_class_counts: &[u32],
        kernel: &[f64],
    ) -> HistogramResult<HistogramMatrix> {
        if per_class_counts.len() != self.class_count() {
            return Err(HistogramError::ClassCountMismatch {
                expected: self.class_count(),
                actual: per_class_counts.len(),
            });
        }

        let mut out = self.clone();
        let bin_width = self.bin_width();

        if kernel.len() < 2 {
            for (mut row, &count) in out.data.rows_mut().into_iter().zip(per_class_counts) {
                let factor = 1_000.0 / bin_width / f64::from(count);
                row.mapv_inplace(|value| value * factor);
            }
        } else {
            let half = (kernel.len() - 1) / 2;
            let bins = self.bin_count();
            let mut smoothed = Array2::zeros(self.data.dim());
            for (class, &count) in per_class_counts.iter().enumerate() {
                let factor = 1_000.0 / bin_width / f64::from(count);
                for bin in 0..bins {
                    let mut sum = 0.0;
                    for (tap_index, &tap) in kernel.iter().enumerate() {
                        let Some(source) = (bin + tap_index).checked_sub(half) else {
                            continue;
                        };
                        if source >= bins {
                            continue;
                        }
                        sum += self.data[[class, source]] * tap;
                    }
                    smoothed[[class, bin]] = sum * factor;
                }
            }
            out.data = smoothed;
        }

        Ok(out)
    }

    /// A copy with `halo` bins cut from each end of the bin axis, rebased on
    /// `edges` (the already-trimmed edge array).
    pub(crate) fn trimmed(&self, halo: usize, edges: Arc<[f64]>) -> Self {
        let display_bins = self.bin_count().saturating_sub(2 * halo);
        Self {
            unit: self.unit.clone(),
            bin_edges: edges,
            data: self
                .data
                .slice(s![.., halo..halo + display_bins])
                .to_owned(),
            spike_count: self.spike_count,
        }
    }
}

impl fmt::Display for HistogramMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Unit {}, {} spikes]", self.unit, self.spike_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn edges(left: f64, width: f64, count: usize) -> Arc<[f64]> {
        (0..=count)
            .map(|i| left + i as f64 * width)
            .collect::<Vec<_>>()
            .into()
    }

    fn unit() -> UnitLabel {
        UnitLabel::new("E1", 1)
    }

    #[test]
    fn rejects_invalid_geometry() {
        assert_eq!(
            HistogramMatrix::new(unit(), 1, Arc::from(vec![0.0])).map(|_| ()),
            Err(HistogramError::TooFewBinEdges(1))
        );
        assert!(matches!(
            HistogramMatrix::new(unit(), 1, Arc::from(vec![0.0, 1.0, 1.0])),
            Err(HistogramError::NonIncreasingBinEdges)
        ));
    }

    #[test]
    fn bins_are_half_open() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(-100.0, 10.0, 30)).unwrap();
        // Exactly at the minimum edge: bin 0.
        matrix.add_sample(-100.0, 0).unwrap();
        // Exactly at the maximum edge: dropped.
        matrix.add_sample(200.0, 0).unwrap();
        // Outside on the left: dropped.
        matrix.add_sample(-100.001, 0).unwrap();

        assert_eq!(matrix.counts()[[0, 0]], 1.0);
        assert_eq!(matrix.spike_count(), 1);
        assert_eq!(matrix.counts().sum(), 1.0);
    }

    #[test]
    fn offset_five_with_left_hundred_lands_in_bin_ten() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(-100.0, 10.0, 30)).unwrap();
        matrix.add_sample(5.0, 0).unwrap();
        assert_eq!(matrix.counts()[[0, 10]], 1.0);
    }

    #[test]
    fn add_class_preserves_existing_rows() {
        for at in [0, 1, 2] {
            let mut matrix = HistogramMatrix::new(unit(), 2, edges(0.0, 1.0, 4)).unwrap();
            matrix.add_sample(0.5, 0).unwrap();
            matrix.add_sample(2.5, 1).unwrap();
            matrix.add_sample(3.5, 1).unwrap();

            matrix.add_class(at).unwrap();
            assert_eq!(matrix.class_count(), 3);

            // Rows at or after the insertion point move down by one.
            let row0 = if at == 0 { 1 } else { 0 };
            let row1 = if at <= 1 { 2 } else { 1 };
            assert_eq!(matrix.counts()[[row0, 0]], 1.0);
            assert_eq!(matrix.counts()[[row1, 2]], 1.0);
            assert_eq!(matrix.counts()[[row1, 3]], 1.0);
            assert_eq!(matrix.counts().row(at).sum(), 0.0);
            assert_eq!(matrix.counts().sum(), 3.0);
        }
    }

    #[test]
    fn add_class_past_end_is_rejected() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(0.0, 1.0, 2)).unwrap();
        assert!(matches!(
            matrix.add_class(2),
            Err(HistogramError::ClassIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn invalid_class_index_is_an_error() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(0.0, 1.0, 2)).unwrap();
        assert!(matches!(
            matrix.add_sample(0.5, 1),
            Err(HistogramError::ClassIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn output_scales_counts_to_hertz() {
        let mut matrix = HistogramMatrix::new(unit(), 2, edges(-100.0, 10.0, 30)).unwrap();
        // Two repetitions of class 0, one spike each at +5 ms.
        matrix.add_sample(5.0, 0).unwrap();
        matrix.add_sample(5.0, 0).unwrap();
        matrix.add_sample(5.0, 1).unwrap();

        let out = matrix.output(&[2, 1], &[]).unwrap();
        // 2 spikes * 1000 / 10 ms / 2 repetitions = 100 Hz.
        assert_approx_eq!(out.counts()[[0, 10]], 100.0);
        // counts[c] = 1 scales by exactly 1000 / binWidth.
        assert_approx_eq!(out.counts()[[1, 10]], 100.0);
        // Source unmodified.
        assert_eq!(matrix.counts()[[0, 10]], 2.0);
    }

    #[test]
    fn output_length_mismatch_is_an_error() {
        let matrix = HistogramMatrix::new(unit(), 2, edges(0.0, 1.0, 2)).unwrap();
        assert_eq!(
            matrix.output(&[1], &[]).map(|_| ()),
            Err(HistogramError::ClassCountMismatch {
                expected: 2,
                actual: 1,
            })
        );
    }

    #[test]
    fn convolution_drops_taps_outside_the_bin_range() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(0.0, 1.0, 3)).unwrap();
        matrix.add_sample(0.5, 0).unwrap();

        let kernel = [0.25, 0.5, 0.25];
        let out = matrix.output(&[1], &kernel).unwrap();
        // Bin 0 sees only the centre and right taps; the left tap would read
        // bin -1 and is dropped, not reflected.
        assert_approx_eq!(out.counts()[[0, 0]], 0.5 * 1_000.0);
        assert_approx_eq!(out.counts()[[0, 1]], 0.25 * 1_000.0);
        assert_approx_eq!(out.counts()[[0, 2]], 0.0);
    }

    #[test]
    fn output_is_idempotent() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(-10.0, 1.0, 20)).unwrap();
        for offset in [-5.0, -4.5, 0.0, 3.25] {
            matrix.add_sample(offset, 0).unwrap();
        }
        let kernel = gaussian(1.5);
        let first = matrix.output(&[3], &kernel).unwrap();
        let second = matrix.output(&[3], &kernel).unwrap();
        assert_eq!(first.counts(), second.counts());
        assert_eq!(first.spike_count(), second.spike_count());
    }

    #[test]
    fn trimmed_cuts_halo_bins() {
        let mut matrix = HistogramMatrix::new(unit(), 1, edges(-4.0, 1.0, 8)).unwrap();
        matrix.add_sample(-3.5, 0).unwrap();
        matrix.add_sample(0.5, 0).unwrap();

        let display_edges: Arc<[f64]> = edges(-2.0, 1.0, 4);
        let trimmed = matrix.trimmed(2, Arc::clone(&display_edges));
        assert_eq!(trimmed.bin_count(), 4);
        assert_eq!(trimmed.min_edge(), -2.0);
        // The halo spike at -3.5 is cut away; the one at +0.5 remains.
        assert_eq!(trimmed.counts().sum(), 1.0);
        assert_eq!(trimmed.counts()[[0, 2]], 1.0);
    }

    fn gaussian(sigma: f64) -> Vec<f64> {
        crate::kernel::gaussian_kernel(sigma, 1.0)
    }
}

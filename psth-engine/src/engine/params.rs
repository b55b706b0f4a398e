use crate::{
    error::{HistogramError, HistogramResult},
    kernel,
};

/// Initial engine configuration. Runtime changes go through the engine
/// handle, which applies the same normalization and guards.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Width of the negative half window of the histogram, in ms.
    pub left_half_window_ms: f64,
    /// Width of the positive half window of the histogram, in ms.
    pub right_half_window_ms: f64,
    /// Number of displayed bins across the full window.
    pub bin_count: usize,
    /// Sigma of the Gaussian smoothing kernel in ms; 0 disables smoothing.
    pub smoothing_sigma_ms: f64,
    /// How often pending windows are flushed on the wall clock when the
    /// sample stream stalls.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            left_half_window_ms: 0.0,
            right_half_window_ms: 1_000.0,
            bin_count: 1_000,
            smoothing_sigma_ms: 0.0,
            poll_interval_ms: 500,
        }
    }
}

/// Validated engine parameters, maintaining
/// `binWidth * binCount == leftHalfWindow + rightHalfWindow`.
///
/// The setters mirror the guards of the live-tunable original: negative
/// values are ignored, as are half-window changes below the 1e-3 ms
/// threshold and no-op bin-count changes. Each returns whether the
/// parameters actually changed, which is what obliges a kernel rebuild and
/// a full reset downstream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Params {
    left_half_window_ms: f64,
    right_half_window_ms: f64,
    bin_count: usize,
    bin_width_ms: f64,
    smoothing_sigma_ms: f64,
}

const HALF_WINDOW_EPSILON_MS: f64 = 1e-3;

impl Params {
    pub(crate) fn try_from_config(config: &EngineConfig) -> HistogramResult<Self> {
        if config.left_half_window_ms < 0.0 || config.right_half_window_ms < 0.0 {
            return Err(HistogramError::InvalidConfiguration {
                reason: "half windows must be non-negative",
            });
        }
        if config.bin_count == 0 {
            return Err(HistogramError::InvalidConfiguration {
                reason: "bin count must be positive",
            });
        }
        if config.smoothing_sigma_ms < 0.0 {
            return Err(HistogramError::InvalidConfiguration {
                reason: "smoothing sigma must be non-negative",
            });
        }
        let window = config.left_half_window_ms + config.right_half_window_ms;
        if window <= 0.0 {
            return Err(HistogramError::InvalidConfiguration {
                reason: "window width must be positive",
            });
        }
        Ok(Self {
            left_half_window_ms: config.left_half_window_ms,
            right_half_window_ms: config.right_half_window_ms,
            bin_count: config.bin_count,
            bin_width_ms: window / config.bin_count as f64,
            smoothing_sigma_ms: config.smoothing_sigma_ms,
        })
    }

    pub(crate) fn window_width_ms(&self) -> f64 {
        self.left_half_window_ms + self.right_half_window_ms
    }

    pub(crate) fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub(crate) fn bin_width_ms(&self) -> f64 {
        self.bin_width_ms
    }

    pub(crate) fn set_left_half_window_ms(&mut self, value: f64) -> bool {
        if value < 0.0
            || (value - self.left_half_window_ms).abs() < HALF_WINDOW_EPSILON_MS
            || value + self.right_half_window_ms <= 0.0
        {
            return false;
        }
        self.left_half_window_ms = value;
        self.rescale_from_width();
        true
    }

    pub(crate) fn set_right_half_window_ms(&mut self, value: f64) -> bool {
        if value < 0.0
            || (value - self.right_half_window_ms).abs() < HALF_WINDOW_EPSILON_MS
            || self.left_half_window_ms + value <= 0.0
        {
            return false;
        }
        self.right_half_window_ms = value;
        self.rescale_from_width();
        true
    }

    pub(crate) fn set_bin_count(&mut self, value: usize) -> bool {
        if value == 0 || value == self.bin_count {
            return false;
        }
        self.bin_count = value;
        self.bin_width_ms = self.window_width_ms() / value as f64;
        true
    }

    pub(crate) fn set_bin_width_ms(&mut self, value: f64) -> bool {
        if value <= 0.0 {
            return false;
        }
        self.bin_width_ms = value;
        self.rescale_from_width();
        true
    }

    pub(crate) fn set_smoothing_sigma_ms(&mut self, value: f64) -> bool {
        if value < 0.0 {
            return false;
        }
        self.smoothing_sigma_ms = value;
        true
    }

    /// Re-derives the bin count from the current width, then snaps the
    /// width so the bins exactly tile the window.
    fn rescale_from_width(&mut self) {
        let window = self.window_width_ms();
        self.bin_count = ((window / self.bin_width_ms).round() as usize).max(1);
        self.bin_width_ms = window / self.bin_count as f64;
    }

    pub(crate) fn kernel(&self) -> Vec<f64> {
        kernel::gaussian_kernel(self.smoothing_sigma_ms, self.bin_width_ms)
    }

    pub(crate) fn halo_bins(&self) -> usize {
        kernel::halo_bins(self.smoothing_sigma_ms, self.bin_width_ms)
    }

    fn halo_ms(&self) -> f64 {
        self.halo_bins() as f64 * self.bin_width_ms
    }

    /// Buffered half-windows: the displayed halves widened by the smoothing
    /// halo, so convolution near the display edges reads real data.
    pub(crate) fn buffered_left_half_ms(&self) -> f64 {
        self.left_half_window_ms + self.halo_ms()
    }

    pub(crate) fn buffered_right_half_ms(&self) -> f64 {
        self.right_half_window_ms + self.halo_ms()
    }

    /// Bin geometry handed to the aggregator, covering the buffered range.
    pub(crate) fn total_bin_count(&self) -> usize {
        self.bin_count + 2 * self.halo_bins()
    }

    pub(crate) fn left_edge_ms(&self) -> f64 {
        -self.buffered_left_half_ms()
    }

    pub(crate) fn right_edge_ms(&self) -> f64 {
        self.buffered_right_half_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn params(left: f64, right: f64, bins: usize, sigma: f64) -> Params {
        Params::try_from_config(&EngineConfig {
            left_half_window_ms: left,
            right_half_window_ms: right,
            bin_count: bins,
            smoothing_sigma_ms: sigma,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn config_is_validated() {
        assert!(
            Params::try_from_config(&EngineConfig {
                left_half_window_ms: -1.0,
                ..EngineConfig::default()
            })
            .is_err()
        );
        assert!(
            Params::try_from_config(&EngineConfig {
                bin_count: 0,
                ..EngineConfig::default()
            })
            .is_err()
        );
        assert!(
            Params::try_from_config(&EngineConfig {
                left_half_window_ms: 0.0,
                right_half_window_ms: 0.0,
                ..EngineConfig::default()
            })
            .is_err()
        );
    }

    #[test]
    fn bin_width_times_count_always_tiles_the_window() {
        let mut p = params(100.0, 200.0, 30, 0.0);
        assert_approx_eq!(p.bin_width_ms(), 10.0);

        assert!(p.set_bin_count(60));
        assert_approx_eq!(p.bin_width_ms() * p.bin_count() as f64, 300.0);

        assert!(p.set_bin_width_ms(7.0));
        // 300 / 7 rounds to 43 bins; the width snaps to tile exactly.
        assert_eq!(p.bin_count(), 43);
        assert_approx_eq!(p.bin_width_ms() * 43.0, 300.0);

        assert!(p.set_left_half_window_ms(50.0));
        assert_approx_eq!(p.bin_width_ms() * p.bin_count() as f64, 250.0);
    }

    #[test]
    fn setters_ignore_invalid_or_unchanged_values() {
        let mut p = params(100.0, 200.0, 30, 0.0);
        assert!(!p.set_left_half_window_ms(-5.0));
        assert!(!p.set_left_half_window_ms(100.0004));
        assert!(!p.set_bin_count(30));
        assert!(!p.set_bin_count(0));
        assert!(!p.set_bin_width_ms(0.0));
        assert!(!p.set_smoothing_sigma_ms(-1.0));
        assert_eq!(p, params(100.0, 200.0, 30, 0.0));
    }

    #[test]
    fn shrinking_both_halves_to_zero_is_refused() {
        let mut p = params(0.0, 200.0, 20, 0.0);
        assert!(!p.set_right_half_window_ms(0.0));
        assert_approx_eq!(p.window_width_ms(), 200.0);
    }

    #[test]
    fn halo_extends_the_buffered_geometry() {
        let p = params(100.0, 200.0, 30, 5.0);
        // ceil(3 * 5 / 10) = 2 extra bins of 10 ms per side.
        assert_eq!(p.halo_bins(), 2);
        assert_eq!(p.total_bin_count(), 34);
        assert_approx_eq!(p.left_edge_ms(), -120.0);
        assert_approx_eq!(p.right_edge_ms(), 220.0);
        assert_approx_eq!(p.buffered_left_half_ms(), 120.0);

        // Kernel covers four sigma per side at this width.
        assert_eq!(p.kernel().len(), 5);

        let unsmoothed = params(100.0, 200.0, 30, 0.0);
        assert_eq!(unsmoothed.total_bin_count(), 30);
        assert_eq!(unsmoothed.kernel(), vec![1.0]);
    }
}

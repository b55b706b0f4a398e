/// Builds the Gaussian smoothing kernel for a given sigma and bin width,
/// both in milliseconds.
///
/// Half-length is `ceil(4 * sigma / binWidth)` so the kernel covers four
/// standard deviations per side; taps are normalized to sum to one. A sigma
/// of zero (or below) degenerates to the single-tap identity kernel, which
/// the histogram output stage treats as "no smoothing".
pub fn gaussian_kernel(sigma_ms: f64, bin_width_ms: f64) -> Vec<f64> {
    if sigma_ms <= 0.0 || bin_width_ms <= 0.0 {
        return vec![1.0];
    }

    let half_length = (sigma_ms * 4.0 / bin_width_ms).ceil() as usize;
    let length = half_length * 2 + 1;
    let q = 2.0 * sigma_ms * sigma_ms / bin_width_ms / bin_width_ms;

    let mut kernel: Vec<f64> = (0..length)
        .map(|i| {
            let j = i as f64 - half_length as f64;
            (-j * j / q).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    for tap in &mut kernel {
        *tap /= sum;
    }
    kernel
}

/// Number of extra bins buffered on each side of the displayed window so the
/// convolution has real data near the display edges (3 sigma per side).
pub fn halo_bins(sigma_ms: f64, bin_width_ms: f64) -> usize {
    if sigma_ms <= 0.0 || bin_width_ms <= 0.0 {
        return 0;
    }
    (sigma_ms * 3.0 / bin_width_ms).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn zero_sigma_gives_identity_kernel() {
        assert_eq!(gaussian_kernel(0.0, 1.0), vec![1.0]);
        assert_eq!(halo_bins(0.0, 1.0), 0);
    }

    #[test]
    fn kernel_length_covers_four_sigma_per_side() {
        let kernel = gaussian_kernel(5.0, 2.0);
        // ceil(4 * 5 / 2) = 10 taps per side.
        assert_eq!(kernel.len(), 21);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(3.0, 1.0);
        let sum: f64 = kernel.iter().sum();
        assert_approx_eq!(sum, 1.0, 1e-12);

        let half = kernel.len() / 2;
        for i in 0..half {
            assert_approx_eq!(kernel[i], kernel[kernel.len() - 1 - i], 1e-12);
        }
        // Peak in the middle.
        assert!(kernel.iter().all(|&tap| tap <= kernel[half]));
    }

    #[test]
    fn halo_covers_three_sigma() {
        assert_eq!(halo_bins(5.0, 2.0), 8);
        assert_eq!(halo_bins(10.0, 10.0), 3);
    }
}

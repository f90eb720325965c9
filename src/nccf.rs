//! Normalised cross-correlation over an integer lag range, and the
//! geometric lag grid it is later resampled onto.
//!
//! The NCCF of a window `w` at lag `L` is the dot product of the first
//! `N` samples with the `N` samples starting at `L`, divided by
//! `sqrt(e1 * e2 + ballast)` where `e1` and `e2` are the energies of the
//! two sub-windows. The ballast term damps spurious peaks in low-energy
//! regions; it is zero for the probability-of-voicing variant.

use ndarray::Array1;

use crate::tracker::PitchExtractionOptions;

fn vec_vec(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// Choose the lags at which the NCCF is measured after resampling: a
/// geometric progression from `1/max_f0` to `1/min_f0` with ratio
/// `1 + delta_pitch`. These are the Viterbi states.
pub(crate) fn select_lags(opts: &PitchExtractionOptions) -> Array1<f32> {
    let min_lag = 1.0 / opts.max_f0;
    let max_lag = 1.0 / opts.min_f0;

    let mut lags = Vec::new();
    let mut lag = min_lag;
    while lag <= max_lag {
        lags.push(lag);
        lag *= 1.0 + opts.delta_pitch;
    }
    Array1::from_vec(lags)
}

/// Compute the dot products needed for the NCCF of one frame.
///
/// The mean of the first `nccf_window_size` samples is subtracted from the
/// whole window first. For each integer lag in `[first_lag, last_lag]`,
/// writes the cross term to `inner_prod[lag - first_lag]` and the product
/// of the two sub-window energies to `norm_prod[lag - first_lag]`.
pub(crate) fn compute_correlation(
    wave: &[f32],
    first_lag: i32,
    last_lag: i32,
    nccf_window_size: i32,
    inner_prod: &mut [f32],
    norm_prod: &mut [f32],
) {
    let window_size = nccf_window_size as usize;
    let mean = wave[..window_size].iter().sum::<f32>() / nccf_window_size as f32;
    let zero_mean_wave: Vec<f32> = wave.iter().map(|&x| x - mean).collect();

    let sub_vec1 = &zero_mean_wave[..window_size];
    let e1 = vec_vec(sub_vec1, sub_vec1);
    for lag in first_lag..=last_lag {
        let sub_vec2 = &zero_mean_wave[lag as usize..lag as usize + window_size];
        let e2 = vec_vec(sub_vec2, sub_vec2);
        inner_prod[(lag - first_lag) as usize] = vec_vec(sub_vec1, sub_vec2);
        norm_prod[(lag - first_lag) as usize] = e1 * e2;
    }
}

/// Turn the dot products of [`compute_correlation`] into NCCF values.
///
/// A zero denominator can only arise from an all-constant window, whose
/// numerator is zero too; those lags get NCCF 0. The result is asserted to
/// stay within 1.01 in magnitude (the slack over the mathematical bound of
/// 1.0 absorbs floating-point overshoot).
pub(crate) fn compute_nccf(
    inner_prod: &[f32],
    norm_prod: &[f32],
    nccf_ballast: f32,
    nccf_vec: &mut [f32],
) {
    assert!(inner_prod.len() == norm_prod.len() && inner_prod.len() == nccf_vec.len());
    for lag in 0..inner_prod.len() {
        let numerator = inner_prod[lag];
        let denominator = (norm_prod[lag] + nccf_ballast).sqrt();
        let nccf = if denominator != 0.0 {
            numerator / denominator
        } else {
            assert!(numerator == 0.0);
            0.0
        };
        assert!(nccf < 1.01 && nccf > -1.01, "NCCF out of range: {}", nccf);
        nccf_vec[lag] = nccf;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_grid_is_geometric_and_covers_search_range() {
        let opts = PitchExtractionOptions::default();
        let lags = select_lags(&opts);
        assert!(lags.len() > 1);
        assert!((lags[0] - 1.0 / opts.max_f0).abs() < 1e-6);
        assert!(lags[lags.len() - 1] <= 1.0 / opts.min_f0 + 1e-6);
        for k in 1..lags.len() {
            let ratio = lags[k] / lags[k - 1];
            assert!(
                (ratio - (1.0 + opts.delta_pitch)).abs() < 1e-4,
                "ratio at {} is {}",
                k,
                ratio
            );
        }
    }

    #[test]
    fn periodic_window_peaks_at_its_period() {
        let window_size = 100;
        let period = 25;
        let full_length = window_size + 40;
        let wave: Vec<f32> = (0..full_length)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / period as f32).sin())
            .collect();

        let first_lag = 10;
        let last_lag = 40;
        let num_lags = (last_lag - first_lag + 1) as usize;
        let mut inner_prod = vec![0.0; num_lags];
        let mut norm_prod = vec![0.0; num_lags];
        compute_correlation(
            &wave,
            first_lag,
            last_lag,
            window_size as i32,
            &mut inner_prod,
            &mut norm_prod,
        );
        let mut nccf = vec![0.0; num_lags];
        compute_nccf(&inner_prod, &norm_prod, 0.0, &mut nccf);

        let at_period = nccf[period - first_lag as usize];
        assert!(at_period > 0.95, "NCCF at period was {}", at_period);
        for &value in &nccf {
            assert!(value.abs() <= 1.01);
            assert!(value <= at_period + 1e-4);
        }
    }

    #[test]
    fn silent_window_yields_zero_nccf() {
        let wave = vec![0.0f32; 150];
        let mut inner_prod = vec![0.0; 21];
        let mut norm_prod = vec![0.0; 21];
        compute_correlation(&wave, 10, 30, 100, &mut inner_prod, &mut norm_prod);
        let mut nccf = vec![1.0; 21];
        compute_nccf(&inner_prod, &norm_prod, 0.0, &mut nccf);
        assert!(nccf.iter().all(|&v| v == 0.0));
    }
}

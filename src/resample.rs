//! Bandlimited resampling.
//!
//! Two resamplers built around the same Hanning-windowed sinc kernel:
//!
//! - [`LinearResampler`] converts between two integral sample rates in a
//!   streaming fashion. It consumes arbitrary-length input chunks and emits
//!   whatever output samples have their full filter support available,
//!   retaining the filter-width tail internally so that any chunking of a
//!   waveform produces exactly the same output.
//! - [`ArbitraryResampler`] evaluates a uniformly sampled signal at a fixed
//!   set of arbitrary time points, chosen once at construction. The weight
//!   table is precomputed and immutable, so one instance can serve many
//!   frames (and may be shared read-only between threads).
//!
//! Both interpret the input as a bandlimited signal and interpolate with
//! `sinc(2*cutoff*t)` under a raised-cosine window whose half-width is
//! `num_zeros / (2 * cutoff)` seconds; more zeros means a sharper (and more
//! expensive) filter.

use std::f64::consts::PI;

use ndarray::Array2;

use crate::error::{Error, Result};

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: i64, b: i64) -> i64 {
    a / gcd(a, b) * b
}

/// Windowed-sinc interpolation kernel.
///
/// `t` is a time offset in seconds. Returns the filter value, which is the
/// sinc low-pass response at `filter_cutoff` Hz under a raised-cosine
/// window supported on `|t| < num_zeros / (2 * filter_cutoff)`.
fn filter_func(t: f64, filter_cutoff: f64, num_zeros: i32) -> f32 {
    let window = if t.abs() < num_zeros as f64 / (2.0 * filter_cutoff) {
        0.5 * (1.0 + (2.0 * PI * filter_cutoff / num_zeros as f64 * t).cos())
    } else {
        0.0
    };
    let filter = if t != 0.0 {
        (2.0 * PI * filter_cutoff * t).sin() / (PI * t)
    } else {
        2.0 * filter_cutoff
    };
    (filter * window) as f32
}

/// Streaming bandlimited resampler between two integral sample rates.
///
/// The rates are reduced by their greatest common divisor into a repeating
/// unit; for each output phase within the unit the first input index and
/// the weight vector are precomputed once. Resampling is then a sparse dot
/// product per output sample.
pub struct LinearResampler {
    samp_rate_in: i32,
    samp_rate_out: i32,
    filter_cutoff: f32,
    num_zeros: i32,

    input_samples_in_unit: i32,
    output_samples_in_unit: i32,

    /// First input index for each output phase in the repeating unit.
    first_index: Vec<i32>,
    /// Weight vector for each output phase.
    weights: Vec<Vec<f32>>,

    // Streaming state.
    input_sample_offset: i64,
    output_sample_offset: i64,
    input_remainder: Vec<f32>,
}

impl LinearResampler {
    /// Create a resampler from `samp_rate_in_hz` to `samp_rate_out_hz`.
    ///
    /// `filter_cutoff_hz` must be strictly positive and no more than half
    /// of either sample rate; `num_zeros` controls the kernel sharpness.
    pub fn new(
        samp_rate_in_hz: i32,
        samp_rate_out_hz: i32,
        filter_cutoff_hz: f32,
        num_zeros: i32,
    ) -> Result<Self> {
        if samp_rate_in_hz <= 0 || samp_rate_out_hz <= 0 {
            return Err(Error::InvalidConfig(format!(
                "Sample rates must be positive, got {} -> {}",
                samp_rate_in_hz, samp_rate_out_hz
            )));
        }
        if !(filter_cutoff_hz > 0.0)
            || filter_cutoff_hz * 2.0 > samp_rate_in_hz as f32
            || filter_cutoff_hz * 2.0 > samp_rate_out_hz as f32
        {
            return Err(Error::InvalidConfig(format!(
                "Filter cutoff {} Hz invalid for rates {} -> {}",
                filter_cutoff_hz, samp_rate_in_hz, samp_rate_out_hz
            )));
        }
        if num_zeros <= 0 {
            return Err(Error::InvalidConfig(format!(
                "Filter width must be positive, got {}",
                num_zeros
            )));
        }

        let base_freq = gcd(samp_rate_in_hz as i64, samp_rate_out_hz as i64) as i32;
        let mut resampler = LinearResampler {
            samp_rate_in: samp_rate_in_hz,
            samp_rate_out: samp_rate_out_hz,
            filter_cutoff: filter_cutoff_hz,
            num_zeros,
            input_samples_in_unit: samp_rate_in_hz / base_freq,
            output_samples_in_unit: samp_rate_out_hz / base_freq,
            first_index: Vec::new(),
            weights: Vec::new(),
            input_sample_offset: 0,
            output_sample_offset: 0,
            input_remainder: Vec::new(),
        };
        resampler.set_indexes_and_weights();
        Ok(resampler)
    }

    fn set_indexes_and_weights(&mut self) {
        let num_phases = self.output_samples_in_unit as usize;
        self.first_index = vec![0; num_phases];
        self.weights = Vec::with_capacity(num_phases);

        let window_width = self.num_zeros as f64 / (2.0 * self.filter_cutoff as f64);

        for i in 0..num_phases {
            let output_sample_time = i as f64 / self.samp_rate_out as f64;
            let min_t = output_sample_time - window_width;
            let max_t = output_sample_time + window_width;
            let min_input_index = (min_t * self.samp_rate_in as f64).ceil() as i64;
            let max_input_index = (max_t * self.samp_rate_in as f64).floor() as i64;
            let num_indices = (max_input_index - min_input_index + 1) as usize;
            self.first_index[i] = min_input_index as i32;

            let mut weights = vec![0.0f32; num_indices];
            for (j, weight) in weights.iter_mut().enumerate() {
                let input_index = min_input_index + j as i64;
                let input_time = input_index as f64 / self.samp_rate_in as f64;
                let delta_time = input_time - output_sample_time;
                *weight = filter_func(
                    delta_time,
                    self.filter_cutoff as f64,
                    self.num_zeros,
                ) / self.samp_rate_in as f32;
            }
            self.weights.push(weights);
        }
    }

    /// Number of output samples that exist for the first `input_num_samp`
    /// input samples. Without `flush`, samples needing future input (within
    /// the filter half-width of the end) are not yet counted.
    fn get_num_output_samples(&self, input_num_samp: i64, flush: bool) -> i64 {
        // Work in ticks of 1 / lcm(in, out) seconds, where both sample
        // rates divide the tick rate exactly.
        let tick_freq = lcm(self.samp_rate_in as i64, self.samp_rate_out as i64);
        let ticks_per_input_period = tick_freq / self.samp_rate_in as i64;

        let mut interval_length_in_ticks = input_num_samp * ticks_per_input_period;
        if !flush {
            let window_width = self.num_zeros as f64 / (2.0 * self.filter_cutoff as f64);
            let window_width_ticks = (window_width * tick_freq as f64).floor() as i64;
            interval_length_in_ticks -= window_width_ticks;
        }
        if interval_length_in_ticks <= 0 {
            return 0;
        }
        let ticks_per_output_period = tick_freq / self.samp_rate_out as i64;
        // The interval is half-open, so an output sample landing exactly on
        // the right edge is excluded.
        let mut last_output_samp = interval_length_in_ticks / ticks_per_output_period;
        if last_output_samp * ticks_per_output_period == interval_length_in_ticks {
            last_output_samp -= 1;
        }
        last_output_samp + 1
    }

    /// For absolute output sample `samp_out`, the absolute first input
    /// sample of its filter support and its phase within the unit.
    fn get_indexes(&self, samp_out: i64) -> (i64, usize) {
        let unit_index = samp_out / self.output_samples_in_unit as i64;
        let samp_out_wrapped =
            (samp_out - unit_index * self.output_samples_in_unit as i64) as usize;
        let first_samp_in = self.first_index[samp_out_wrapped] as i64
            + unit_index * self.input_samples_in_unit as i64;
        (first_samp_in, samp_out_wrapped)
    }

    /// Resample the next chunk of input.
    ///
    /// `output` is replaced with the next time-aligned block of output
    /// samples. When `flush` is false only samples whose complete filter
    /// support has been seen are produced; when `flush` is true the stream
    /// is ended, remaining samples are emitted treating absent future input
    /// as zero, and the resampler resets for a new stream.
    pub fn resample(&mut self, input: &[f32], flush: bool, output: &mut Vec<f32>) {
        let tot_input_samp = self.input_sample_offset + input.len() as i64;
        let tot_output_samp = self.get_num_output_samples(tot_input_samp, flush);
        assert!(tot_output_samp >= self.output_sample_offset);

        output.clear();
        output.resize((tot_output_samp - self.output_sample_offset) as usize, 0.0);

        for samp_out in self.output_sample_offset..tot_output_samp {
            let (first_samp_in, phase) = self.get_indexes(samp_out);
            let weights = &self.weights[phase];
            // first_input_index is the offset into this chunk; negative
            // means the support starts in the retained remainder.
            let first_input_index = first_samp_in - self.input_sample_offset;

            let this_output: f32;
            if first_input_index >= 0
                && first_input_index as usize + weights.len() <= input.len()
            {
                let first = first_input_index as usize;
                let input_part = &input[first..first + weights.len()];
                this_output = input_part
                    .iter()
                    .zip(weights.iter())
                    .map(|(&x, &w)| x * w)
                    .sum();
            } else {
                // Support straddles the remainder or (when flushing) the
                // end of the stream.
                let mut sum = 0.0f32;
                for (j, &weight) in weights.iter().enumerate() {
                    let input_index = first_input_index + j as i64;
                    if input_index < 0
                        && self.input_remainder.len() as i64 + input_index >= 0
                    {
                        sum += weight
                            * self.input_remainder
                                [(self.input_remainder.len() as i64 + input_index) as usize];
                    } else if input_index >= 0 && (input_index as usize) < input.len() {
                        sum += weight * input[input_index as usize];
                    } else if input_index >= input.len() as i64 {
                        assert!(flush);
                    }
                }
                this_output = sum;
            }
            output[(samp_out - self.output_sample_offset) as usize] = this_output;
        }

        if flush {
            self.reset();
        } else {
            self.set_remainder(input);
            self.input_sample_offset = tot_input_samp;
            self.output_sample_offset = tot_output_samp;
        }
    }

    /// Forget all streaming state, as if newly constructed.
    pub fn reset(&mut self) {
        self.input_sample_offset = 0;
        self.output_sample_offset = 0;
        self.input_remainder.clear();
    }

    fn set_remainder(&mut self, input: &[f32]) {
        let old_remainder = std::mem::take(&mut self.input_remainder);
        // Keep a full filter width of trailing input; some of the next
        // chunk's output samples reach this far back.
        let max_remainder_needed = (self.samp_rate_in as f64 * self.num_zeros as f64
            / self.filter_cutoff as f64)
            .ceil() as usize;
        self.input_remainder = vec![0.0; max_remainder_needed];
        for index in -(self.input_remainder.len() as i64)..0 {
            // "index" is an offset back from the end of "input" (equally,
            // from the end of the new remainder).
            let input_index = index + input.len() as i64;
            let dest = (index + self.input_remainder.len() as i64) as usize;
            if input_index >= 0 {
                self.input_remainder[dest] = input[input_index as usize];
            } else if input_index + old_remainder.len() as i64 >= 0 {
                self.input_remainder[dest] =
                    old_remainder[(input_index + old_remainder.len() as i64) as usize];
            }
        }
    }
}

/// Resamples a uniformly sampled signal at fixed, arbitrary time points.
///
/// Unlike [`LinearResampler`] this is not streaming: the whole input row is
/// present, and the target sample times (seconds, relative to input sample
/// zero) are fixed at construction, when the sparse weight table is built.
/// Applying it is then one short dot product per target.
pub struct ArbitraryResampler {
    num_samples_in: i32,
    samp_rate_in: f32,
    first_index: Vec<i32>,
    weights: Vec<Vec<f32>>,
}

impl ArbitraryResampler {
    /// Precompute the weight table for resampling `num_samples_in` samples
    /// at `samp_rate_in` Hz onto `sample_points` (seconds).
    pub fn new(
        num_samples_in: i32,
        samp_rate_in: f32,
        filter_cutoff: f32,
        sample_points: &[f32],
        num_zeros: i32,
    ) -> Result<Self> {
        if num_samples_in <= 0 || !(samp_rate_in > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "Need a positive number of samples ({}) and rate ({})",
                num_samples_in, samp_rate_in
            )));
        }
        if !(filter_cutoff > 0.0) || filter_cutoff * 2.0 > samp_rate_in {
            return Err(Error::InvalidConfig(format!(
                "Filter cutoff {} Hz invalid for rate {}",
                filter_cutoff, samp_rate_in
            )));
        }
        if num_zeros <= 0 {
            return Err(Error::InvalidConfig(format!(
                "Filter width must be positive, got {}",
                num_zeros
            )));
        }

        let num_targets = sample_points.len();
        let mut first_index = vec![0i32; num_targets];
        let mut weights = Vec::with_capacity(num_targets);

        let filter_width = num_zeros as f64 / (2.0 * filter_cutoff as f64);
        for (i, &t) in sample_points.iter().enumerate() {
            let t_min = t as f64 - filter_width;
            let t_max = t as f64 + filter_width;
            // Indices just outside the window would get zero coefficients;
            // clamp to the input range as well.
            let mut index_min = (samp_rate_in as f64 * t_min).ceil() as i64;
            let mut index_max = (samp_rate_in as f64 * t_max).floor() as i64;
            if index_min < 0 {
                index_min = 0;
            }
            if index_max >= num_samples_in as i64 {
                index_max = num_samples_in as i64 - 1;
            }
            first_index[i] = index_min as i32;

            let mut w = vec![0.0f32; (index_max - index_min + 1).max(0) as usize];
            for (j, weight) in w.iter_mut().enumerate() {
                let delta_t =
                    t as f64 - (index_min + j as i64) as f64 / samp_rate_in as f64;
                // The factor 1 / samp_rate_in from the interpolation
                // integral is folded into the weight.
                *weight = filter_func(delta_t, filter_cutoff as f64, num_zeros)
                    / samp_rate_in;
            }
            weights.push(w);
        }

        Ok(ArbitraryResampler {
            num_samples_in,
            samp_rate_in,
            first_index,
            weights,
        })
    }

    /// Number of input samples expected per row.
    pub fn num_samples_in(&self) -> usize {
        self.num_samples_in as usize
    }

    /// Number of target points per row.
    pub fn num_samples_out(&self) -> usize {
        self.first_index.len()
    }

    /// Resample each row of `input` onto the target points.
    ///
    /// `input` must have `num_samples_in()` columns and `output` the same
    /// number of rows with `num_samples_out()` columns.
    pub fn resample(&self, input: &Array2<f32>, output: &mut Array2<f32>) {
        assert_eq!(input.ncols(), self.num_samples_in());
        assert_eq!(output.ncols(), self.num_samples_out());
        assert_eq!(input.nrows(), output.nrows());

        for (in_row, mut out_row) in input.rows().into_iter().zip(output.rows_mut()) {
            let in_samples = in_row.as_slice().expect("input rows are contiguous");
            for (i, out) in out_row.iter_mut().enumerate() {
                let first = self.first_index[i] as usize;
                let weights = &self.weights[i];
                *out = in_samples[first..first + weights.len()]
                    .iter()
                    .zip(weights.iter())
                    .map(|(&x, &w)| x * w)
                    .sum();
            }
        }
    }

    /// Sample rate of the input rows, in Hz.
    pub fn samp_rate_in(&self) -> f32 {
        self.samp_rate_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sine(sample_rate: f32, frequency: f32, num_samples: usize) -> Vec<f32> {
        (0..num_samples)
            .map(|i| {
                (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin()
            })
            .collect()
    }

    #[test]
    fn linear_resampler_is_chunking_invariant() {
        let wave = sine(16000.0, 220.0, 8000);
        let mut whole = LinearResampler::new(16000, 4000, 1900.0, 10).unwrap();
        let mut reference = Vec::new();
        whole.resample(&wave, true, &mut reference);

        let mut split = LinearResampler::new(16000, 4000, 1900.0, 10).unwrap();
        let mut streamed = Vec::new();
        let mut chunk = Vec::new();
        // Deliberately awkward chunk sizes, including an empty one.
        for part in [&wave[..37], &wave[37..37], &wave[37..4001], &wave[4001..]] {
            split.resample(part, false, &mut chunk);
            streamed.extend_from_slice(&chunk);
        }
        split.resample(&[], true, &mut chunk);
        streamed.extend_from_slice(&chunk);

        assert_eq!(reference.len(), streamed.len());
        for (i, (&a, &b)) in reference.iter().zip(streamed.iter()).enumerate() {
            assert!(
                (a - b).abs() < 1e-6,
                "sample {} differs: {} vs {}",
                i,
                a,
                b
            );
        }
    }

    #[test]
    fn linear_resampler_reconstructs_tone() {
        let frequency = 220.0;
        let wave = sine(16000.0, frequency, 16000);
        let mut resampler = LinearResampler::new(16000, 4000, 1900.0, 10).unwrap();
        let mut output = Vec::new();
        resampler.resample(&wave, true, &mut output);

        // Skip the startup/shutdown transients (one filter width each).
        for (i, &value) in output.iter().enumerate().skip(16).take(output.len() - 32) {
            let t = i as f32 / 4000.0;
            let expected = (2.0 * std::f32::consts::PI * frequency * t).sin();
            assert!(
                (value - expected).abs() < 0.02,
                "sample {}: got {}, expected {}",
                i,
                value,
                expected
            );
        }
    }

    #[test]
    fn linear_resampler_rejects_bad_cutoff() {
        assert!(LinearResampler::new(16000, 4000, 3000.0, 10).is_err());
        assert!(LinearResampler::new(16000, 0, 1000.0, 10).is_err());
    }

    #[test]
    fn arbitrary_resampler_interpolates_bandlimited_tone() {
        let sample_rate = 4000.0;
        let frequency = 300.0;
        let num_samples = 200;
        let wave = sine(sample_rate, frequency, num_samples);

        // Interior points, clear of the filter half-width at both ends.
        let points: Vec<f32> = (0..40).map(|i| 0.01 + 0.0007 * i as f32).collect();
        let resampler =
            ArbitraryResampler::new(num_samples as i32, sample_rate, 1900.0, &points, 10)
                .unwrap();

        let input = Array2::from_shape_vec((1, num_samples), wave).unwrap();
        let mut output = Array2::zeros((1, points.len()));
        resampler.resample(&input, &mut output);

        for (i, &t) in points.iter().enumerate() {
            let expected = (2.0 * std::f32::consts::PI * frequency * t).sin();
            assert!(
                (output[[0, i]] - expected).abs() < 0.02,
                "point {} (t={}): got {}, expected {}",
                i,
                t,
                output[[0, i]],
                expected
            );
        }
    }

    #[test]
    fn arbitrary_resampler_handles_multiple_rows() {
        let points = [0.005f32, 0.01, 0.015];
        let resampler = ArbitraryResampler::new(100, 4000.0, 1900.0, &points, 5).unwrap();
        let mut input = Array2::zeros((2, 100));
        for (i, mut row) in input.rows_mut().into_iter().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (i as f32 + 1.0)
                    * (2.0 * std::f32::consts::PI * 250.0 * j as f32 / 4000.0).sin();
            }
        }
        let mut output = Array2::zeros((2, points.len()));
        resampler.resample(&input, &mut output);
        // The second row is exactly twice the first, so the resampled rows
        // must preserve that ratio.
        for j in 0..points.len() {
            assert!(
                (output[[1, j]] - 2.0 * output[[0, j]]).abs() < 1e-5,
                "column {}: {} vs {}",
                j,
                output[[1, j]],
                output[[0, j]]
            );
        }
    }
}

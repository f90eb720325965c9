//! Post-processing of the tracker's `[nccf, pitch]` stream into trainable
//! features.
//!
//! Up to four output columns are produced, in this fixed order and each
//! gated by its option flag:
//!
//! 1. **pov_feature**: a warped NCCF, roughly Gaussian-distributed.
//! 2. **normalized_log_pitch**: log-pitch minus a voicing-weighted moving
//!    average over a window of neighbouring frames.
//! 3. **delta_log_pitch**: time derivative of log-pitch, lightly dithered
//!    so the discretisation of the lag grid does not put spikes in its
//!    distribution.
//! 4. **raw_log_pitch**: log of the pitch in Hz.
//!
//! The probability-of-voicing mapping [`nccf_to_pov`] is a hand-fitted
//! sigmoid of the NCCF magnitude, calibrated on voicing-annotated speech
//! (Ghahremani et al. 2014); it weights the moving-window normalisation.

use log::warn;
use ndarray::Array2;
use rand::Rng;

use crate::error::{Error, Result};
use crate::tracker::PitchTracker;

/// Options for pitch post-processing, fixed at construction.
#[derive(Debug, Clone)]
pub struct PostProcessOptions {
    /// Scale on the normalized log-pitch column (its natural variance is
    /// small; scaling it up plays better with variance flooring in early
    /// system builds).
    pub pitch_scale: f32,
    /// Scale on the pov_feature column.
    pub pov_scale: f32,
    /// Scale on the delta log-pitch column.
    pub delta_pitch_scale: f32,
    /// Standard deviation of the Gaussian dither added to delta log-pitch;
    /// 0 disables the dither.
    pub delta_pitch_noise_stddev: f32,
    /// Width in frames of the moving normalisation window.
    pub normalization_window_size: i32,
    /// Half-width of the delta window; the derivative uses
    /// `2 * delta_window + 1` frames.
    pub delta_window: i32,
    pub add_pov_feature: bool,
    pub add_normalized_log_pitch: bool,
    pub add_delta_pitch: bool,
    pub add_raw_log_pitch: bool,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        PostProcessOptions {
            pitch_scale: 2.0,
            pov_scale: 2.0,
            delta_pitch_scale: 10.0,
            delta_pitch_noise_stddev: 0.005,
            normalization_window_size: 151,
            delta_window: 2,
            add_pov_feature: true,
            add_normalized_log_pitch: true,
            add_delta_pitch: true,
            add_raw_log_pitch: false,
        }
    }
}

impl PostProcessOptions {
    /// Number of enabled output columns.
    pub fn dim(&self) -> usize {
        self.add_pov_feature as usize
            + self.add_normalized_log_pitch as usize
            + self.add_delta_pitch as usize
            + self.add_raw_log_pitch as usize
    }

    /// Validate the option combination.
    pub fn check(&self) -> Result<()> {
        if self.dim() == 0 {
            return Err(Error::InvalidConfig(
                "At least one of the pitch features must be selected".to_string(),
            ));
        }
        if self.normalization_window_size <= 0 {
            return Err(Error::InvalidConfig(format!(
                "Normalization window size must be positive, got {}",
                self.normalization_window_size
            )));
        }
        if self.delta_window <= 0 {
            return Err(Error::InvalidConfig(format!(
                "Delta window must be positive, got {}",
                self.delta_window
            )));
        }
        if self.delta_pitch_noise_stddev < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "Delta pitch noise stddev must be non-negative, got {}",
                self.delta_pitch_noise_stddev
            )));
        }
        Ok(())
    }
}

/// Warp an NCCF value into the pov_feature column value:
/// `(1.0001 - n)^0.15 - 1`.
///
/// The raw NCCF lives in [-1, 1] with a strong peak just below 1; this
/// transform smooths that peak out so the feature is roughly Gaussian.
pub fn nccf_to_pov_feature(n: f32) -> f32 {
    let n = n.clamp(-1.0, 1.0);
    let f = (1.0001 - n).powf(0.15) - 1.0;
    assert!(f.is_finite());
    f
}

/// Map an NCCF value to a probability of voicing in (0, 1).
///
/// The inner polynomial-plus-exponentials expression approximates the
/// empirical log-odds of voicing as a function of `|n|`; the result is its
/// logistic transform.
pub fn nccf_to_pov(n: f32) -> f32 {
    let ndash = n.abs().min(1.0);
    let r = -5.2 + 5.4 * (7.5 * (ndash - 1.0)).exp() + 4.8 * ndash
        - 2.0 * (-10.0 * ndash).exp()
        + 4.2 * (20.0 * (ndash - 1.0)).exp();
    let p = 1.0 / (1.0 + (-r).exp());
    assert!(p.is_finite());
    p
}

/// Subtract a voicing-weighted moving average from the log-pitch.
///
/// The window is `window_size` frames centred on the current frame; at the
/// edges of the signal it shifts (rather than shrinks) to stay inside.
/// Weights are the probabilities of voicing, so confidently voiced frames
/// dominate the average. Output is written for frames `frame_start..`,
/// using the frames before `frame_start` purely as context.
///
/// The window sums are maintained incrementally: after the first window is
/// loaded, each step adds the sample entering at the tail and removes the
/// one leaving at the head.
fn weighted_moving_window_normalize(
    normalization_window_size: i32,
    pov: &[f32],
    raw_log_pitch: &[f32],
    normalized_log_pitch: &mut [f32],
    frame_start: usize,
) {
    let num_frames = pov.len() as i32;
    assert_eq!(pov.len(), raw_log_pitch.len());
    assert_eq!(normalized_log_pitch.len(), pov.len() - frame_start);

    let mut last_window_start: i32 = -1;
    let mut last_window_end: i32 = -1;
    let mut weighted_sum = 0.0f64;
    let mut pov_sum = 0.0f64;

    for t in frame_start as i32..num_frames {
        let mut window_start = t - normalization_window_size / 2;
        let mut window_end = window_start + normalization_window_size;

        if window_start < 0 {
            window_end -= window_start;
            window_start = 0;
        }
        if window_end > num_frames {
            window_start -= window_end - num_frames;
            window_end = num_frames;
            if window_start < 0 {
                window_start = 0;
            }
        }

        if last_window_start == -1 {
            // First invocation: load the whole window.
            for i in window_start..window_end {
                weighted_sum += pov[i as usize] as f64 * raw_log_pitch[i as usize] as f64;
                pov_sum += pov[i as usize] as f64;
            }
        } else {
            // The window edges advance by at most one frame per step.
            if window_start > last_window_start {
                assert_eq!(window_start, last_window_start + 1);
                pov_sum -= pov[last_window_start as usize] as f64;
                weighted_sum -= pov[last_window_start as usize] as f64
                    * raw_log_pitch[last_window_start as usize] as f64;
            }
            if window_end > last_window_end {
                assert_eq!(window_end, last_window_end + 1);
                pov_sum += pov[last_window_end as usize] as f64;
                weighted_sum += pov[last_window_end as usize] as f64
                    * raw_log_pitch[last_window_end as usize] as f64;
            }
        }

        assert!(window_end - window_start > 0);
        last_window_start = window_start;
        last_window_end = window_end;
        let value = raw_log_pitch[t as usize] - (weighted_sum / pov_sum) as f32;
        assert!(value.is_finite());
        normalized_log_pitch[(t as usize) - frame_start] = value;
    }
}

/// Mirror an out-of-range index back into `[0, num_frames)`.
fn reflect_index(index: i32, num_frames: i32) -> usize {
    if num_frames == 1 {
        return 0;
    }
    let mut index = index;
    while index < 0 || index >= num_frames {
        if index < 0 {
            index = -index;
        } else {
            index = 2 * (num_frames - 1) - index;
        }
    }
    index as usize
}

/// First-order time derivative of the log-pitch over a centred window,
/// with mirrored indices at the edges, plus a small Gaussian dither.
///
/// Without the dither, the lag grid's discretisation puts visible spikes
/// in the distribution of the delta feature.
fn extract_delta_pitch(opts: &PostProcessOptions, input: &[f32], output: &mut [f32]) {
    assert_eq!(input.len(), output.len());
    let num_frames = input.len() as i32;
    let window = opts.delta_window;
    // Scales are j / sum(j^2) for offsets j in [-window, window].
    let normalizer: f32 = 2.0 * (1..=window).map(|j| (j * j) as f32).sum::<f32>();

    for t in 0..num_frames {
        let mut sum = 0.0f32;
        for j in 1..=window {
            let ahead = input[reflect_index(t + j, num_frames)];
            let behind = input[reflect_index(t - j, num_frames)];
            sum += j as f32 * (ahead - behind);
        }
        output[t as usize] = sum / normalizer;
    }

    if opts.delta_pitch_noise_stddev > 0.0 {
        let mut rng = rand::thread_rng();
        for value in output.iter_mut() {
            *value += opts.delta_pitch_noise_stddev * rand_gauss(&mut rng);
        }
    }
}

/// Standard normal deviate via the Box-Muller transform.
fn rand_gauss<R: Rng>(rng: &mut R) -> f32 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

/// Streaming pitch post-processor.
///
/// Owns a [`PitchTracker`] and turns its `[nccf, pitch]` stream into the
/// configured feature columns. Feed waveform through
/// [`accept_waveform`](PostProcessor::accept_waveform); frames already
/// emitted are frozen, while the voicing-weighted normalisation of newly
/// ready frames uses the full accumulated context.
pub struct PostProcessor {
    opts: PostProcessOptions,
    src: PitchTracker,
    dim: usize,
    /// Frames drained from the tracker and post-processed so far.
    num_frames: usize,
    /// Probability of voicing per frame, accumulated for the life of the
    /// stream (it weights every later normalisation window).
    pov: Vec<f32>,
    /// Raw log-pitch per frame, accumulated alongside `pov`.
    raw_log_pitch: Vec<f32>,
    /// Emitted feature rows, `dim` values per frame.
    features: Vec<f32>,
}

impl PostProcessor {
    /// Wrap `src`; fails with `InvalidConfig` if no output column is
    /// enabled or the windows are degenerate.
    pub fn new(opts: PostProcessOptions, src: PitchTracker) -> Result<Self> {
        opts.check()?;
        let dim = opts.dim();
        Ok(PostProcessor {
            opts,
            src,
            dim,
            num_frames: 0,
            pov: Vec::new(),
            raw_log_pitch: Vec::new(),
            features: Vec::new(),
        })
    }

    /// Number of output columns.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Forward waveform to the underlying tracker.
    pub fn accept_waveform(&mut self, sampling_rate: f32, wave: &[f32]) -> Result<()> {
        self.src.accept_waveform(sampling_rate, wave)
    }

    /// Finish the underlying tracker's input and post-process everything
    /// that became ready.
    pub fn input_finished(&mut self) {
        self.src.input_finished();
        self.update_from_tracker();
    }

    /// Number of post-processed frames ready to read.
    pub fn num_frames_ready(&mut self) -> i32 {
        self.update_from_tracker();
        self.num_frames as i32
    }

    /// True once `frame` is the final frame of a finished stream.
    pub fn is_last_frame(&self, frame: i32) -> bool {
        self.src.is_last_frame(frame)
    }

    /// The feature row for a ready frame.
    pub fn get_frame(&mut self, frame: i32) -> Result<Vec<f32>> {
        self.update_from_tracker();
        if frame < 0 || frame as usize >= self.num_frames {
            return Err(Error::UsageViolation(format!(
                "Frame {} requested but only {} frames are ready",
                frame, self.num_frames
            )));
        }
        let start = frame as usize * self.dim;
        Ok(self.features[start..start + self.dim].to_vec())
    }

    /// Drain newly ready tracker frames, if any, and post-process them.
    fn update_from_tracker(&mut self) {
        let new_num_frames = self.src.num_frames_ready() as usize;
        if new_num_frames <= self.num_frames {
            return;
        }
        let num_append = new_num_frames - self.num_frames;
        let mut nccf_append = Vec::with_capacity(num_append);
        let mut raw_log_pitch_append = Vec::with_capacity(num_append);
        for t in self.num_frames..new_num_frames {
            let [nccf, pitch] = self.src.frame_ready(t);
            assert!(pitch > 0.0, "non-positive pitch {} at frame {}", pitch, t);
            nccf_append.push(nccf);
            raw_log_pitch_append.push(pitch.ln());
        }
        self.compute_features(&nccf_append, &raw_log_pitch_append);
    }

    fn compute_features(&mut self, nccf_append: &[f32], raw_log_pitch_append: &[f32]) {
        let num_append = nccf_append.len();

        let mut pov_feature = Vec::with_capacity(num_append);
        for &nccf in nccf_append {
            self.pov.push(nccf_to_pov(nccf));
            pov_feature.push(self.opts.pov_scale * nccf_to_pov_feature(nccf));
        }

        let frame_start = self.raw_log_pitch.len();
        self.raw_log_pitch.extend_from_slice(raw_log_pitch_append);

        // Normalise the new frames against the full accumulated context.
        let mut normalized_log_pitch = vec![0.0f32; num_append];
        weighted_moving_window_normalize(
            self.opts.normalization_window_size,
            &self.pov,
            &self.raw_log_pitch,
            &mut normalized_log_pitch,
            frame_start,
        );
        for value in normalized_log_pitch.iter_mut() {
            *value *= self.opts.pitch_scale;
        }

        let mut delta_log_pitch = vec![0.0f32; num_append];
        extract_delta_pitch(&self.opts, raw_log_pitch_append, &mut delta_log_pitch);
        for value in delta_log_pitch.iter_mut() {
            *value *= self.opts.delta_pitch_scale;
        }

        for t in 0..num_append {
            if self.opts.add_pov_feature {
                self.features.push(pov_feature[t]);
            }
            if self.opts.add_normalized_log_pitch {
                self.features.push(normalized_log_pitch[t]);
            }
            if self.opts.add_delta_pitch {
                self.features.push(delta_log_pitch[t]);
            }
            if self.opts.add_raw_log_pitch {
                self.features.push(raw_log_pitch_append[t]);
            }
        }
        self.num_frames += num_append;
    }
}

/// Post-process a whole (num_frames x 2) tracker output matrix at once.
///
/// Offline counterpart of [`PostProcessor`]: the normalisation and delta
/// windows see the entire signal. An empty input yields an empty output
/// and a warning.
pub fn post_process_pitch(
    opts: &PostProcessOptions,
    input: &Array2<f32>,
) -> Result<Array2<f32>> {
    opts.check()?;
    assert_eq!(input.ncols(), 2, "expected [nccf, pitch] rows");
    let num_frames = input.nrows();
    if num_frames == 0 {
        warn!("No frames given to pitch post-processing");
        return Ok(Array2::zeros((0, opts.dim())));
    }

    let mut pov = Vec::with_capacity(num_frames);
    let mut pov_feature = Vec::with_capacity(num_frames);
    let mut raw_log_pitch = Vec::with_capacity(num_frames);
    for row in input.rows() {
        let (nccf, pitch) = (row[0], row[1]);
        assert!(pitch > 0.0, "non-positive pitch {}", pitch);
        pov.push(nccf_to_pov(nccf));
        pov_feature.push(opts.pov_scale * nccf_to_pov_feature(nccf));
        raw_log_pitch.push(pitch.ln());
    }

    let mut normalized_log_pitch = vec![0.0f32; num_frames];
    weighted_moving_window_normalize(
        opts.normalization_window_size,
        &pov,
        &raw_log_pitch,
        &mut normalized_log_pitch,
        0,
    );
    for value in normalized_log_pitch.iter_mut() {
        *value *= opts.pitch_scale;
    }

    let mut delta_log_pitch = vec![0.0f32; num_frames];
    extract_delta_pitch(opts, &raw_log_pitch, &mut delta_log_pitch);
    for value in delta_log_pitch.iter_mut() {
        *value *= opts.delta_pitch_scale;
    }

    let mut output = Array2::zeros((num_frames, opts.dim()));
    for t in 0..num_frames {
        let mut col = 0;
        let mut push = |value: f32| {
            output[[t, col]] = value;
            col += 1;
        };
        if opts.add_pov_feature {
            push(pov_feature[t]);
        }
        if opts.add_normalized_log_pitch {
            push(normalized_log_pitch[t]);
        }
        if opts.add_delta_pitch {
            push(delta_log_pitch[t]);
        }
        if opts.add_raw_log_pitch {
            push(raw_log_pitch[t]);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn pov_mapping_is_a_monotone_probability() {
        assert!(nccf_to_pov(0.0) < 0.01);
        assert!(nccf_to_pov(1.0) > 0.99);
        // Symmetric in the sign of the NCCF.
        assert_eq!(nccf_to_pov(-0.5), nccf_to_pov(0.5));

        let mut last = 0.0;
        for i in 0..=100 {
            let p = nccf_to_pov(i as f32 / 100.0);
            assert!(p > 0.0 && p < 1.0);
            assert!(p >= last, "not monotone at {}", i);
            last = p;
        }
    }

    #[test]
    fn pov_feature_matches_closed_form() {
        let f = nccf_to_pov_feature(1.0);
        assert!((f - (0.0001f32.powf(0.15) - 1.0)).abs() < 1e-6);
        // Out-of-range NCCFs are clamped, not amplified.
        assert_eq!(nccf_to_pov_feature(1.5), nccf_to_pov_feature(1.0));
        assert_eq!(nccf_to_pov_feature(-1.5), nccf_to_pov_feature(-1.0));
    }

    #[test]
    fn window_normalizer_matches_direct_computation() {
        let mut rng = StdRng::seed_from_u64(3);
        let num_frames = 40;
        let window_size = 7;
        let pov: Vec<f32> = (0..num_frames).map(|_| rng.gen::<f32>() + 0.01).collect();
        let pitch: Vec<f32> = (0..num_frames).map(|_| rng.gen::<f32>() * 2.0 + 4.0).collect();

        let mut incremental = vec![0.0f32; num_frames];
        weighted_moving_window_normalize(window_size, &pov, &pitch, &mut incremental, 0);

        for t in 0..num_frames as i32 {
            let mut start = t - window_size / 2;
            let mut end = start + window_size;
            if start < 0 {
                end -= start;
                start = 0;
            }
            if end > num_frames as i32 {
                start -= end - num_frames as i32;
                end = num_frames as i32;
                start = start.max(0);
            }
            let mut weighted = 0.0f64;
            let mut weight = 0.0f64;
            for i in start..end {
                weighted += pov[i as usize] as f64 * pitch[i as usize] as f64;
                weight += pov[i as usize] as f64;
            }
            let expected = pitch[t as usize] - (weighted / weight) as f32;
            assert!(
                (incremental[t as usize] - expected).abs() < 1e-4,
                "frame {}: {} vs {}",
                t,
                incremental[t as usize],
                expected
            );
        }
    }

    #[test]
    fn staged_normalization_matches_one_shot() {
        let mut rng = StdRng::seed_from_u64(5);
        let num_frames = 60;
        let window_size = 15;
        let pov: Vec<f32> = (0..num_frames).map(|_| rng.gen::<f32>() + 0.01).collect();
        let pitch: Vec<f32> = (0..num_frames).map(|_| rng.gen::<f32>() + 4.5).collect();

        let mut one_shot = vec![0.0f32; num_frames];
        weighted_moving_window_normalize(window_size, &pov, &pitch, &mut one_shot, 0);

        // Same computation in two stages, the second using the first's
        // frames as context only.
        let split = 25;
        let mut head = vec![0.0f32; split];
        weighted_moving_window_normalize(
            window_size,
            &pov[..split],
            &pitch[..split],
            &mut head,
            0,
        );
        let mut tail = vec![0.0f32; num_frames - split];
        weighted_moving_window_normalize(window_size, &pov, &pitch, &mut tail, split);

        // The tail must agree exactly with the one-shot run; the head may
        // differ where its window could not yet see future frames.
        for t in 0..num_frames - split {
            assert!(
                (tail[t] - one_shot[split + t]).abs() < 1e-5,
                "frame {}: {} vs {}",
                split + t,
                tail[t],
                one_shot[split + t]
            );
        }
    }

    #[test]
    fn delta_matches_direct_evaluation_without_noise() {
        let opts = PostProcessOptions {
            delta_pitch_noise_stddev: 0.0,
            ..PostProcessOptions::default()
        };
        let input: Vec<f32> = (0..12).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut output = vec![0.0f32; input.len()];
        extract_delta_pitch(&opts, &input, &mut output);

        let n = input.len() as i32;
        for t in 0..n {
            let mut expected = 0.0f32;
            for j in 1..=2 {
                expected += j as f32
                    * (input[reflect_index(t + j, n)] - input[reflect_index(t - j, n)]);
            }
            expected /= 10.0;
            assert!((output[t as usize] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn delta_of_linear_ramp_is_constant_slope_inside() {
        let opts = PostProcessOptions {
            delta_pitch_noise_stddev: 0.0,
            ..PostProcessOptions::default()
        };
        let input: Vec<f32> = (0..20).map(|i| 0.5 * i as f32).collect();
        let mut output = vec![0.0f32; input.len()];
        extract_delta_pitch(&opts, &input, &mut output);
        // Away from the edges, the delta of a ramp is its slope.
        for t in 2..18 {
            assert!((output[t] - 0.5).abs() < 1e-5, "frame {}: {}", t, output[t]);
        }
    }

    #[test]
    fn no_selected_columns_is_a_config_error() {
        let opts = PostProcessOptions {
            add_pov_feature: false,
            add_normalized_log_pitch: false,
            add_delta_pitch: false,
            add_raw_log_pitch: false,
            ..PostProcessOptions::default()
        };
        assert!(matches!(opts.check(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn column_count_follows_flags() {
        let opts = PostProcessOptions {
            add_raw_log_pitch: true,
            ..PostProcessOptions::default()
        };
        assert_eq!(opts.dim(), 4);
        let pov_only = PostProcessOptions {
            add_normalized_log_pitch: false,
            add_delta_pitch: false,
            ..PostProcessOptions::default()
        };
        assert_eq!(pov_only.dim(), 1);
    }
}

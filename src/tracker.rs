//! Streaming pitch tracker.
//!
//! The tracker accepts a mono waveform in arbitrary-size chunks and emits,
//! per analysis frame, a normalised cross-correlation value (a voicing
//! confidence) and a pitch estimate in Hz. Implementation of the
//! algorithm described by Ghahremani et al. (2014), "A pitch extraction
//! algorithm tuned for automatic speech recognition".
//!
//! Processing pipeline per accepted chunk: downsample to the analysis rate,
//! compute the NCCF of each new frame over an integer lag range (once with
//! a ballast term for the pitch search, once without for the voicing
//! output), resample both onto a geometric lag grid, then run one Viterbi
//! step per frame over that grid and trace back from the best final state.
//! Frames whose traceback has not yet settled are withheld, up to a
//! configurable latency cap.
//!
//! Memory grows linearly with the number of frames (backpointers and
//! voicing NCCFs are kept per frame and per lag state for the life of the
//! stream); long-running streams should be segmented by the caller.

use log::{debug, trace, warn};
use ndarray::{Array1, Array2};

use crate::error::{Error, Result};
use crate::nccf::{compute_correlation, compute_nccf, select_lags};
use crate::resample::{ArbitraryResampler, LinearResampler};
use crate::viterbi::{self, ViterbiFrame};

/// Options for pitch extraction, fixed at construction.
#[derive(Debug, Clone)]
pub struct PitchExtractionOptions {
    /// Sample rate of the waveform passed to `accept_waveform`, in Hz.
    pub samp_freq: f32,
    /// Frame shift in milliseconds.
    pub frame_shift_ms: f32,
    /// Frame length in milliseconds.
    pub frame_length_ms: f32,
    /// Pre-emphasis coefficient applied to each extracted window
    /// (0.0 means no pre-emphasis).
    pub preemph_coeff: f32,
    /// Minimum pitch searched for, in Hz.
    pub min_f0: f32,
    /// Maximum pitch searched for, in Hz.
    pub max_f0: f32,
    /// Soft minimum-f0 penalty: each state's local cost is raised by
    /// `soft_min_f0 * lag * nccf`, discouraging implausibly long lags.
    pub soft_min_f0: f32,
    /// Scale on the squared log-pitch-change transition cost.
    pub penalty_factor: f32,
    /// Cutoff of the low-pass filter applied when downsampling the signal,
    /// in Hz.
    pub lowpass_cutoff: f32,
    /// Internal analysis sample rate the signal is downsampled to, in Hz.
    pub resample_freq: f32,
    /// Ratio minus one between adjacent lag-grid points; smaller means a
    /// finer pitch resolution.
    pub delta_pitch: f32,
    /// Ballast coefficient stabilising the NCCF denominator for the pitch
    /// search.
    pub nccf_ballast: f32,
    /// Filter width (number of zero crossings to each side) of the
    /// downsampling filter.
    pub lowpass_filter_width: i32,
    /// Filter width of the lag-grid resampling filter.
    pub upsample_filter_width: i32,
    /// Cap on how many trailing frames may be withheld while their
    /// traceback settles; 0 reports every frame immediately.
    pub max_frames_latency: i32,
    /// Chunking hint for the batch driver only; 0 feeds the whole
    /// waveform at once.
    pub frames_per_chunk: i32,
    /// If true, the ballast term of a frame uses only samples up to that
    /// frame's end, making the output independent of how the waveform is
    /// chunked. If false, it uses all samples delivered so far.
    pub nccf_ballast_online: bool,
    /// Use the exact O(num_states^2) predecessor scan instead of the
    /// branch-and-bound search. The two are bit-identical; this exists to
    /// validate the fast search.
    pub use_naive_search: bool,
}

impl Default for PitchExtractionOptions {
    fn default() -> Self {
        PitchExtractionOptions {
            samp_freq: 16000.0,
            frame_shift_ms: 10.0,
            frame_length_ms: 25.0,
            preemph_coeff: 0.0,
            min_f0: 50.0,
            max_f0: 400.0,
            soft_min_f0: 10.0,
            penalty_factor: 0.1,
            lowpass_cutoff: 1000.0,
            resample_freq: 4000.0,
            delta_pitch: 0.005,
            nccf_ballast: 7000.0,
            lowpass_filter_width: 1,
            upsample_filter_width: 5,
            max_frames_latency: 0,
            frames_per_chunk: 0,
            nccf_ballast_online: false,
            use_naive_search: false,
        }
    }
}

impl PitchExtractionOptions {
    /// Analysis window length in samples of the downsampled signal.
    pub fn nccf_window_size(&self) -> i32 {
        (self.resample_freq * 0.001 * self.frame_length_ms).round() as i32
    }

    /// Frame shift in samples of the downsampled signal.
    pub fn nccf_window_shift(&self) -> i32 {
        (self.resample_freq * 0.001 * self.frame_shift_ms).round() as i32
    }

    /// Validate the option combination.
    pub fn check(&self) -> Result<()> {
        let err = |message: String| Err(Error::InvalidConfig(message));
        if !(self.samp_freq > 0.0) || self.samp_freq.fract() != 0.0 {
            return err(format!(
                "Sample frequency must be a positive integral rate, got {}",
                self.samp_freq
            ));
        }
        if !(self.resample_freq > 0.0) || self.resample_freq.fract() != 0.0 {
            return err(format!(
                "Resample frequency must be a positive integral rate, got {}",
                self.resample_freq
            ));
        }
        if self.resample_freq > self.samp_freq {
            return err(format!(
                "Resample frequency {} exceeds sample frequency {}",
                self.resample_freq, self.samp_freq
            ));
        }
        if !(self.min_f0 > 0.0) || self.min_f0 >= self.max_f0 {
            return err(format!(
                "Need 0 < min-f0 < max-f0, got {} and {}",
                self.min_f0, self.max_f0
            ));
        }
        if self.max_f0 >= self.lowpass_cutoff
            || !(self.lowpass_cutoff > 0.0)
            || self.lowpass_cutoff > 0.5 * self.resample_freq
        {
            return err(format!(
                "Need max-f0 < lowpass-cutoff <= resample-freq / 2, got {}, {}, {}",
                self.max_f0, self.lowpass_cutoff, self.resample_freq
            ));
        }
        if self.nccf_window_size() <= 0 || self.nccf_window_shift() <= 0 {
            return err(format!(
                "Frame length {} ms / shift {} ms too small at {} Hz",
                self.frame_length_ms, self.frame_shift_ms, self.resample_freq
            ));
        }
        if self.lowpass_filter_width <= 0 || self.upsample_filter_width <= 0 {
            return err(format!(
                "Filter widths must be positive, got {} and {}",
                self.lowpass_filter_width, self.upsample_filter_width
            ));
        }
        if !(self.delta_pitch > 0.0) || self.delta_pitch >= 1.0 {
            return err(format!(
                "delta-pitch must be in (0, 1), got {}",
                self.delta_pitch
            ));
        }
        if self.nccf_ballast < 0.0 {
            return err(format!(
                "nccf-ballast must be non-negative, got {}",
                self.nccf_ballast
            ));
        }
        if self.frames_per_chunk < 0 {
            return err(format!(
                "frames-per-chunk must be non-negative, got {}",
                self.frames_per_chunk
            ));
        }
        Ok(())
    }
}

/// Streaming pitch tracker.
///
/// Feed waveform with [`accept_waveform`](PitchTracker::accept_waveform),
/// signal the end with [`input_finished`](PitchTracker::input_finished),
/// and read `[pov_nccf, pitch_hz]` pairs with
/// [`get_frame`](PitchTracker::get_frame) for frames below
/// [`num_frames_ready`](PitchTracker::num_frames_ready). A frame becomes
/// immutable once the traceback has converged on it; `max_frames_latency`
/// bounds how long the tracker waits for that convergence before reporting
/// a frame anyway, so with a small cap an already-reported frame may still
/// be revised by a later chunk.
pub struct PitchTracker {
    opts: PitchExtractionOptions,

    /// First integer lag of the downsampled signal at which the NCCF is
    /// measured.
    nccf_first_lag: i32,
    /// Last integer lag at which the NCCF is measured.
    nccf_last_lag: i32,

    /// The log-spaced lags the NCCF is resampled onto (the Viterbi states).
    lags: Array1<f32>,

    /// Resamples evenly spaced NCCF values onto `lags`.
    nccf_resampler: ArbitraryResampler,
    /// Downsamples the input signal to the analysis rate.
    signal_resampler: LinearResampler,

    /// Frame arena; `frames[0]` is a sentinel for the frame before the
    /// first, `frames[t + 1]` belongs to frame t. Append-only.
    frames: Vec<ViterbiFrame>,

    /// Frames currently withheld because their traceback has not
    /// converged, capped at `opts.max_frames_latency`.
    frames_latency: i32,

    /// Forward cost over the lag states, renormalised each frame so its
    /// minimum is zero.
    forward_cost: Vec<f32>,
    /// Accumulated renormalisation offsets (diagnostic only).
    forward_cost_remainder: f64,

    /// Per frame, the traced-back lag index and the ballast-free NCCF.
    lag_nccf: Vec<(i32, f32)>,

    input_finished: bool,

    /// Running sum of squares of the downsampled signal, for the ballast.
    signal_sumsq: f64,
    /// Running sum of the downsampled signal, for mean subtraction.
    signal_sum: f64,
    /// Downsampled samples consumed by previous calls.
    downsampled_samples_processed: i64,
    /// Tail of the downsampled signal still needed to extract the next
    /// frame's window across the chunk boundary.
    downsampled_signal_remainder: Vec<f32>,
}

impl PitchTracker {
    /// Create a tracker; fails with `InvalidConfig` if the options are
    /// inconsistent.
    pub fn new(opts: PitchExtractionOptions) -> Result<Self> {
        opts.check()?;

        let signal_resampler = LinearResampler::new(
            opts.samp_freq as i32,
            opts.resample_freq as i32,
            opts.lowpass_cutoff,
            opts.lowpass_filter_width,
        )?;

        // Pad the measured integer lag range by half the upsampling filter
        // width so every grid lag has full interpolation support.
        let outer_min_lag = 1.0 / opts.max_f0 as f64
            - opts.upsample_filter_width as f64 / (2.0 * opts.resample_freq as f64);
        let outer_max_lag = 1.0 / opts.min_f0 as f64
            + opts.upsample_filter_width as f64 / (2.0 * opts.resample_freq as f64);
        let nccf_first_lag = (opts.resample_freq as f64 * outer_min_lag).ceil() as i32;
        let nccf_last_lag = (opts.resample_freq as f64 * outer_max_lag).floor() as i32;

        let lags = select_lags(&opts);
        let num_states = lags.len();

        // The NCCF is bandlimited to around the low-pass cutoff; filtering
        // at half the analysis Nyquist keeps only the first spectral image
        // when interpolating it.
        let upsample_cutoff = opts.resample_freq * 0.5;

        // Shift the target lags so the measured NCCF can be treated as a
        // signal starting at sample zero.
        let lags_offset: Vec<f32> = lags
            .iter()
            .map(|&lag| lag - nccf_first_lag as f32 / opts.resample_freq)
            .collect();

        let num_measured_lags = nccf_last_lag + 1 - nccf_first_lag;
        let nccf_resampler = ArbitraryResampler::new(
            num_measured_lags,
            opts.resample_freq,
            upsample_cutoff,
            &lags_offset,
            opts.upsample_filter_width,
        )?;

        Ok(PitchTracker {
            opts,
            nccf_first_lag,
            nccf_last_lag,
            lags,
            nccf_resampler,
            signal_resampler,
            frames: vec![ViterbiFrame::new(num_states)],
            frames_latency: 0,
            forward_cost: vec![0.0; num_states],
            forward_cost_remainder: 0.0,
            lag_nccf: Vec::new(),
            input_finished: false,
            signal_sumsq: 0.0,
            signal_sum: 0.0,
            downsampled_samples_processed: 0,
            downsampled_signal_remainder: Vec::new(),
        })
    }

    /// Output dimension of [`get_frame`](PitchTracker::get_frame).
    pub fn dim(&self) -> usize {
        2
    }

    /// Number of frames whose output is final and readable.
    pub fn num_frames_ready(&self) -> i32 {
        let num_frames = self.lag_nccf.len() as i32;
        assert!(self.frames_latency <= num_frames);
        num_frames - self.frames_latency
    }

    /// True once `frame` is the final frame of a finished stream.
    pub fn is_last_frame(&self, frame: i32) -> bool {
        self.input_finished && frame + 1 == self.num_frames_ready()
    }

    /// The `[pov_nccf, pitch_hz]` pair for a ready frame.
    pub fn get_frame(&self, frame: i32) -> Result<[f32; 2]> {
        if frame < 0 || frame >= self.num_frames_ready() {
            return Err(Error::UsageViolation(format!(
                "Frame {} requested but only {} frames are ready",
                frame,
                self.num_frames_ready()
            )));
        }
        Ok(self.frame_ready(frame as usize))
    }

    /// Like `get_frame` for a frame the caller has already checked is
    /// ready.
    pub(crate) fn frame_ready(&self, frame: usize) -> [f32; 2] {
        let (lag_index, pov_nccf) = self.lag_nccf[frame];
        [pov_nccf, 1.0 / self.lags[lag_index as usize]]
    }

    /// Signal that no more waveform will arrive. Flushes the latency
    /// window so every computed frame becomes readable. Idempotent.
    pub fn input_finished(&mut self) {
        self.input_finished = true;
        self.frames_latency = 0;

        let num_frames = self.num_frames_ready();
        if num_frames > 0 {
            debug!(
                "Pitch-tracking Viterbi cost is {} per frame, over {} frames.",
                self.forward_cost_remainder / num_frames as f64,
                num_frames
            );
        }
    }

    /// How many frames exist once `num_downsampled_samples` samples of the
    /// downsampled signal are available.
    fn num_frames_available(&self, num_downsampled_samples: i64) -> i32 {
        let frame_shift = self.opts.nccf_window_shift() as i64;
        let full_frame_length =
            (self.opts.nccf_window_size() + self.nccf_last_lag) as i64;
        if num_downsampled_samples < full_frame_length {
            0
        } else {
            (((num_downsampled_samples - full_frame_length) / frame_shift) + 1) as i32
        }
    }

    /// Assemble the window for the frame starting at absolute downsampled
    /// sample `sample_index` from the retained remainder and the current
    /// chunk, then apply pre-emphasis in place.
    fn extract_frame(&self, downsampled_wave_part: &[f32], sample_index: i64, window: &mut [f32]) {
        let full_frame_length = window.len() as i64;
        let offset = sample_index - self.downsampled_samples_processed;

        if offset >= 0 {
            // Frame is entirely inside the new part of the signal.
            let start = offset as usize;
            window.copy_from_slice(
                &downsampled_wave_part[start..start + full_frame_length as usize],
            );
        } else {
            // Frame starts in the remainder kept from previous chunks.
            let remainder_offset =
                self.downsampled_signal_remainder.len() as i64 + offset;
            assert!(remainder_offset >= 0, "remainder was not kept long enough");
            assert!(
                offset + full_frame_length > 0,
                "frame should have been processed earlier"
            );

            let old_length = (-offset) as usize;
            let new_length = (offset + full_frame_length) as usize;
            window[..old_length].copy_from_slice(
                &self.downsampled_signal_remainder
                    [remainder_offset as usize..remainder_offset as usize + old_length],
            );
            window[old_length..].copy_from_slice(&downsampled_wave_part[..new_length]);
        }

        if self.opts.preemph_coeff != 0.0 {
            let preemph_coeff = self.opts.preemph_coeff;
            for i in (1..window.len()).rev() {
                window[i] -= preemph_coeff * window[i - 1];
            }
            window[0] *= 1.0 - preemph_coeff;
        }
    }

    /// Fold the chunk into the running signal statistics and retain
    /// exactly the samples the next frame's window will need.
    fn update_remainder(&mut self, downsampled_wave_part: &[f32]) {
        // One arena entry is the sentinel, so frames.len() - 1 frames have
        // been computed; the next frame starts at this sample index.
        let num_frames = self.frames.len() as i64 - 1;
        let next_frame_sample = self.opts.nccf_window_shift() as i64 * num_frames;

        self.signal_sumsq += downsampled_wave_part
            .iter()
            .map(|&x| x as f64 * x as f64)
            .sum::<f64>();
        self.signal_sum += downsampled_wave_part
            .iter()
            .map(|&x| x as f64)
            .sum::<f64>();

        let next_downsampled_samples_processed =
            self.downsampled_samples_processed + downsampled_wave_part.len() as i64;

        if next_frame_sample > next_downsampled_samples_processed {
            // Only possible if the full frame length is less than the
            // frame shift; nothing needs keeping.
            let full_frame_length =
                self.opts.nccf_window_size() + self.nccf_last_lag;
            assert!((full_frame_length as i64) < self.opts.nccf_window_shift() as i64);
            self.downsampled_signal_remainder.clear();
        } else {
            let mut new_remainder =
                vec![0.0f32; (next_downsampled_samples_processed - next_frame_sample) as usize];
            // i indexes the whole downsampled signal.
            for i in next_frame_sample..next_downsampled_samples_processed {
                let dest = (i - next_frame_sample) as usize;
                if i >= self.downsampled_samples_processed {
                    new_remainder[dest] = downsampled_wave_part
                        [(i - self.downsampled_samples_processed) as usize];
                } else {
                    // Still in the old remainder; only reached if the
                    // supplied waveform was tiny.
                    new_remainder[dest] = self.downsampled_signal_remainder[(i
                        - self.downsampled_samples_processed
                        + self.downsampled_signal_remainder.len() as i64)
                        as usize];
                }
            }
            self.downsampled_signal_remainder = new_remainder;
        }
        self.downsampled_samples_processed = next_downsampled_samples_processed;
    }

    /// Accept the next chunk of waveform.
    ///
    /// Fails with `UsageViolation` if `sampling_rate` differs from the
    /// configured rate or if the stream was already finished.
    pub fn accept_waveform(&mut self, sampling_rate: f32, wave: &[f32]) -> Result<()> {
        if self.input_finished {
            return Err(Error::UsageViolation(
                "accept_waveform called after input_finished".to_string(),
            ));
        }
        if sampling_rate != self.opts.samp_freq {
            return Err(Error::UsageViolation(format!(
                "Waveform sampled at {} Hz, tracker configured for {} Hz",
                sampling_rate, self.opts.samp_freq
            )));
        }

        // The last few input samples are never flushed out; a frame that
        // would need them is produced once more input (or input_finished)
        // arrives, which only ever affects the trailing frame count.
        let mut downsampled_wave = Vec::new();
        self.signal_resampler
            .resample(wave, false, &mut downsampled_wave);

        // Root-mean-square statistics for the ballast term. In online
        // mode these grow frame by frame below; otherwise the whole chunk
        // is counted up front.
        let mut cur_sumsq = self.signal_sumsq;
        let mut cur_sum = self.signal_sum;
        let mut cur_num_samp = self.downsampled_samples_processed;
        let mut prev_frame_end_sample: i64 = 0;
        if !self.opts.nccf_ballast_online {
            cur_sumsq += downsampled_wave
                .iter()
                .map(|&x| x as f64 * x as f64)
                .sum::<f64>();
            cur_sum += downsampled_wave.iter().map(|&x| x as f64).sum::<f64>();
            cur_num_samp += downsampled_wave.len() as i64;
        }

        let end_frame = self.num_frames_available(
            self.downsampled_samples_processed + downsampled_wave.len() as i64,
        );
        let start_frame = self.frames.len() as i32 - 1;
        let num_new_frames = end_frame - start_frame;

        if num_new_frames == 0 {
            self.update_remainder(&downsampled_wave);
            return Ok(());
        }

        let num_measured_lags = (self.nccf_last_lag + 1 - self.nccf_first_lag) as usize;
        let num_resampled_lags = self.lags.len();
        let frame_shift = self.opts.nccf_window_shift() as i64;
        let basic_frame_length = self.opts.nccf_window_size();
        let full_frame_length = (basic_frame_length + self.nccf_last_lag) as usize;

        let mut window = vec![0.0f32; full_frame_length];
        let mut inner_prod = vec![0.0f32; num_measured_lags];
        let mut norm_prod = vec![0.0f32; num_measured_lags];
        let mut nccf_pitch = Array2::zeros((num_new_frames as usize, num_measured_lags));
        let mut nccf_pov = Array2::zeros((num_new_frames as usize, num_measured_lags));

        // The lag-grid resampling is cheaper done for all new frames at
        // once, so first collect every frame's NCCF, then resample both
        // matrices, then run the Viterbi updates.
        for frame in start_frame..end_frame {
            let start_sample = frame as i64 * frame_shift;
            self.extract_frame(&downsampled_wave, start_sample, &mut window);

            if self.opts.nccf_ballast_online {
                // Count only samples inside or before this frame's window.
                // end_sample indexes into this chunk, unlike start_sample.
                let end_sample = start_sample + full_frame_length as i64
                    - self.downsampled_samples_processed;
                assert!(end_sample > 0, "frame should have been processed earlier");
                let new_part =
                    &downsampled_wave[prev_frame_end_sample as usize..end_sample as usize];
                cur_num_samp += new_part.len() as i64;
                cur_sumsq += new_part.iter().map(|&x| x as f64 * x as f64).sum::<f64>();
                cur_sum += new_part.iter().map(|&x| x as f64).sum::<f64>();
                prev_frame_end_sample = end_sample;
            }
            let mean_square = cur_sumsq / cur_num_samp as f64
                - (cur_sum / cur_num_samp as f64).powi(2);

            compute_correlation(
                &window,
                self.nccf_first_lag,
                self.nccf_last_lag,
                basic_frame_length,
                &mut inner_prod,
                &mut norm_prod,
            );
            let nccf_ballast_pitch = ((mean_square * basic_frame_length as f64).powi(2)
                * self.opts.nccf_ballast as f64) as f32;

            let row = (frame - start_frame) as usize;
            compute_nccf(
                &inner_prod,
                &norm_prod,
                nccf_ballast_pitch,
                nccf_pitch
                    .row_mut(row)
                    .into_slice()
                    .expect("matrix rows are contiguous"),
            );
            compute_nccf(
                &inner_prod,
                &norm_prod,
                0.0,
                nccf_pov
                    .row_mut(row)
                    .into_slice()
                    .expect("matrix rows are contiguous"),
            );
        }

        let mut nccf_pitch_resampled =
            Array2::zeros((num_new_frames as usize, num_resampled_lags));
        self.nccf_resampler
            .resample(&nccf_pitch, &mut nccf_pitch_resampled);
        drop(nccf_pitch);
        let mut nccf_pov_resampled =
            Array2::zeros((num_new_frames as usize, num_resampled_lags));
        self.nccf_resampler.resample(&nccf_pov, &mut nccf_pov_resampled);
        drop(nccf_pov);

        let lags = self
            .lags
            .as_slice()
            .expect("lag grid is contiguous");
        let mut bounds = Vec::new();
        let mut cur_forward_cost = vec![0.0f32; num_resampled_lags];
        for frame in start_frame..end_frame {
            let row = (frame - start_frame) as usize;
            let mut cur_frame = ViterbiFrame::new(num_resampled_lags);
            cur_frame.set_nccf_pov(
                nccf_pov_resampled
                    .row(row)
                    .as_slice()
                    .expect("matrix rows are contiguous"),
            );
            cur_frame.compute_backtraces(
                &self.opts,
                nccf_pitch_resampled
                    .row(row)
                    .as_slice()
                    .expect("matrix rows are contiguous"),
                lags,
                &self.forward_cost,
                &mut bounds,
                &mut cur_forward_cost,
            );
            std::mem::swap(&mut self.forward_cost, &mut cur_forward_cost);

            // Renormalise so the smallest forward cost is zero; this keeps
            // single precision adequate over long utterances.
            let remainder = self
                .forward_cost
                .iter()
                .fold(f32::INFINITY, |min, &c| min.min(c));
            assert!(remainder.is_finite(), "non-finite forward cost");
            self.forward_cost_remainder += remainder as f64;
            for cost in self.forward_cost.iter_mut() {
                *cost -= remainder;
            }
            self.frames.push(cur_frame);
        }

        self.update_remainder(&downsampled_wave);

        // Trace back from the best final state, then measure how far the
        // traceback is from having settled.
        let mut best_final_state = 0i32;
        let mut best_cost = f32::INFINITY;
        for (state, &cost) in self.forward_cost.iter().enumerate() {
            if cost < best_cost {
                best_cost = cost;
                best_final_state = state as i32;
            }
        }
        self.lag_nccf.resize(self.frames.len() - 1, (0, 0.0));
        viterbi::set_best_state(&mut self.frames, best_final_state, &mut self.lag_nccf);
        self.frames_latency =
            viterbi::compute_latency(&self.frames, self.opts.max_frames_latency);
        trace!("Latency is {}", self.frames_latency);
        Ok(())
    }
}

/// Extract pitch for a whole waveform at once.
///
/// Returns a (num_frames x 2) matrix of `[pov_nccf, pitch_hz]` rows. With
/// `frames_per_chunk` nonzero the waveform is fed in chunks of that many
/// frames, reproducing online operation. An input too short for a single
/// frame yields an empty matrix and a warning.
pub fn compute_pitch(
    opts: &PitchExtractionOptions,
    wave: &[f32],
) -> Result<Array2<f32>> {
    let mut tracker = PitchTracker::new(opts.clone())?;

    if opts.frames_per_chunk == 0 {
        tracker.accept_waveform(opts.samp_freq, wave)?;
    } else {
        let samples_per_chunk = (opts.frames_per_chunk as f32
            * opts.samp_freq
            * 1.0e-3
            * opts.frame_shift_ms) as usize;
        let mut cur_offset = 0;
        while cur_offset < wave.len() {
            let num_samples = samples_per_chunk.min(wave.len() - cur_offset);
            tracker
                .accept_waveform(opts.samp_freq, &wave[cur_offset..cur_offset + num_samples])?;
            cur_offset += num_samples;
        }
    }
    tracker.input_finished();

    let num_frames = tracker.num_frames_ready();
    if num_frames == 0 {
        warn!("No frames output in pitch extraction");
        return Ok(Array2::zeros((0, 2)));
    }
    let mut output = Array2::zeros((num_frames as usize, 2));
    for frame in 0..num_frames {
        let feat = tracker.frame_ready(frame as usize);
        output[[frame as usize, 0]] = feat[0];
        output[[frame as usize, 1]] = feat[1];
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(PitchExtractionOptions::default().check().is_ok());
        let opts = PitchExtractionOptions::default();
        assert_eq!(opts.nccf_window_size(), 100);
        assert_eq!(opts.nccf_window_shift(), 40);
    }

    #[test]
    fn inconsistent_options_are_rejected() {
        let swapped = PitchExtractionOptions {
            min_f0: 400.0,
            max_f0: 50.0,
            ..PitchExtractionOptions::default()
        };
        assert!(matches!(swapped.check(), Err(Error::InvalidConfig(_))));

        let upsampling = PitchExtractionOptions {
            resample_freq: 32000.0,
            ..PitchExtractionOptions::default()
        };
        assert!(matches!(upsampling.check(), Err(Error::InvalidConfig(_))));

        let cutoff = PitchExtractionOptions {
            lowpass_cutoff: 300.0,
            ..PitchExtractionOptions::default()
        };
        assert!(matches!(cutoff.check(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn wrong_sample_rate_is_a_usage_error() {
        let mut tracker = PitchTracker::new(PitchExtractionOptions::default()).unwrap();
        let result = tracker.accept_waveform(8000.0, &[0.0; 100]);
        assert!(matches!(result, Err(Error::UsageViolation(_))));
    }
}

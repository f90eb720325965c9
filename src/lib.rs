//! # pitchtrack
//!
//! Streaming pitch (F0) and probability-of-voicing tracker for speech,
//! implementing the algorithm of Ghahremani et al. (2014), "A pitch
//! extraction algorithm tuned for automatic speech recognition".
//!
//! The tracker consumes a mono waveform in arbitrary-size chunks and
//! produces, per 10 ms frame (by default), a normalised cross-correlation
//! value usable as a voicing confidence and a pitch estimate in Hz. Every
//! frame gets a pitch: the Viterbi search over a log-spaced lag grid keeps
//! the contour continuous through unvoiced stretches, and voicing is
//! carried separately by the NCCF column. A post-processor turns the
//! two-column stream into up to four feature columns suitable for acoustic
//! model training.
//!
//! ## Components
//!
//! - **PitchTracker**: the streaming core (`accept_waveform` /
//!   `input_finished` / `get_frame`).
//! - **compute_pitch**: one-call batch driver over a whole waveform.
//! - **PostProcessor** / **post_process_pitch**: streaming and batch
//!   feature post-processing.
//! - **LinearResampler** / **ArbitraryResampler**: the bandlimited
//!   resamplers the tracker is built on, usable on their own.
//!
//! ## Example
//!
//! ```
//! use pitchtrack::{compute_pitch, PitchExtractionOptions};
//!
//! let opts = PitchExtractionOptions::default();
//! let wave: Vec<f32> = (0..16000)
//!     .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16000.0).sin())
//!     .collect();
//! let pitch = compute_pitch(&opts, &wave).unwrap();
//! for row in pitch.rows() {
//!     let (pov_nccf, pitch_hz) = (row[0], row[1]);
//!     assert!(pitch_hz > 0.0);
//!     let _ = pov_nccf;
//! }
//! ```

pub mod error;
pub mod postprocess;
pub mod resample;
pub mod tracker;

mod nccf;
mod viterbi;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use postprocess::{
    nccf_to_pov, nccf_to_pov_feature, post_process_pitch, PostProcessOptions, PostProcessor,
};
pub use resample::{ArbitraryResampler, LinearResampler};
pub use tracker::{compute_pitch, PitchExtractionOptions, PitchTracker};

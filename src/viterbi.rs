//! Viterbi search over the log-spaced lag grid.
//!
//! Each analysis frame contributes one [`ViterbiFrame`] to an append-only
//! arena owned by the tracker; index 0 is a sentinel standing in for the
//! frame before the first one, and a frame's predecessor is simply the
//! previous index. Traceback and latency computation walk the arena
//! iteratively: the chain reaches tens of thousands of entries on long
//! utterances, so recursion is not an option.
//!
//! The per-frame forward update minimises, for every current state, the
//! previous forward cost plus a transition cost quadratic in the state
//! distance. Scanned naively that is O(num_states^2); the default search
//! exploits the convexity of the transition cost with an alternating
//! branch-and-bound sweep that tightens per-state bounds on the best
//! predecessor until they pin it down exactly. Both searches must agree
//! bit-for-bit; the naive one is kept behind an option for validation.

use crate::tracker::PitchExtractionOptions;

/// Per-state record for one frame: the best predecessor state and the
/// ballast-free NCCF kept for the probability-of-voicing output.
#[derive(Clone)]
pub(crate) struct StateInfo {
    pub backpointer: i32,
    pub pov_nccf: f32,
}

/// One frame of the Viterbi computation.
pub(crate) struct ViterbiFrame {
    pub state_info: Vec<StateInfo>,
    /// Most recently asserted best state for this frame during traceback;
    /// -1 until the first traceback reaches it.
    pub cur_best_state: i32,
}

impl ViterbiFrame {
    /// Frame record with zeroed backpointers and NCCFs. The same shape
    /// serves as the sentinel placed before the first real frame.
    pub fn new(num_states: usize) -> Self {
        ViterbiFrame {
            state_info: vec![
                StateInfo {
                    backpointer: 0,
                    pov_nccf: 0.0,
                };
                num_states
            ],
            cur_best_state: -1,
        }
    }

    /// Record the ballast-free NCCF for every state of this frame.
    pub fn set_nccf_pov(&mut self, nccf_pov: &[f32]) {
        assert_eq!(nccf_pov.len(), self.state_info.len());
        for (info, &nccf) in self.state_info.iter_mut().zip(nccf_pov.iter()) {
            info.pov_nccf = nccf;
        }
    }

    /// Run the forward update for this frame: fill in the backpointers and
    /// write the new forward cost (transition minimum plus local cost) to
    /// `this_forward_cost`.
    ///
    /// `bounds` is caller-provided scratch, reused across frames.
    pub fn compute_backtraces(
        &mut self,
        opts: &PitchExtractionOptions,
        nccf_pitch: &[f32],
        lags: &[f32],
        prev_forward_cost: &[f32],
        bounds: &mut Vec<(i32, i32)>,
        this_forward_cost: &mut [f32],
    ) {
        let num_states = nccf_pitch.len() as i32;

        let mut local_cost = vec![0.0f32; num_states as usize];
        compute_local_cost(nccf_pitch, lags, opts, &mut local_cost);

        let delta_pitch_sq = ((1.0 + opts.delta_pitch) as f64).ln().powi(2) as f32;
        let inter_frame_factor = delta_pitch_sq * opts.penalty_factor;

        // Cost of coming from previous-frame state j into current state i.
        let transition_cost = |i: i32, j: i32| -> f32 {
            ((j - i) * (j - i)) as f32 * inter_frame_factor
                + prev_forward_cost[j as usize]
        };

        if opts.use_naive_search {
            for i in 0..num_states {
                let mut best_cost = f32::INFINITY;
                let mut best_j = -1;
                for j in 0..num_states {
                    let this_cost = transition_cost(i, j);
                    if this_cost < best_cost {
                        best_cost = this_cost;
                        best_j = j;
                    }
                }
                this_forward_cost[i as usize] = best_cost;
                self.state_info[i as usize].backpointer = best_j;
            }
        } else {
            if bounds.len() != num_states as usize {
                bounds.resize(num_states as usize, (0, 0));
            }

            // Seed pass, ascending: start each search from the previous
            // state's best predecessor and stop as soon as the cost rises.
            // That gives a loose lower bound on each backpointer.
            let mut last_backpointer: i32 = 0;
            for i in 0..num_states {
                let start_j = last_backpointer;
                let mut best_cost = transition_cost(i, start_j);
                let mut best_j = start_j;
                for j in (start_j + 1)..num_states {
                    let this_cost = transition_cost(i, j);
                    if this_cost < best_cost {
                        best_cost = this_cost;
                        best_j = j;
                    } else {
                        break;
                    }
                }
                self.state_info[i as usize].backpointer = best_j;
                this_forward_cost[i as usize] = best_cost;
                // Lower bound from the scan; no meaningful upper bound yet.
                bounds[i as usize] = (best_j, num_states - 1);
                last_backpointer = best_j;
            }

            // Alternating refinement passes, each linear in num_states,
            // until the bounds pin every backpointer down. Convergence is
            // guaranteed within num_states iterations; in practice two or
            // three suffice.
            for iter in 0..num_states {
                let mut changed = false;
                if iter % 2 == 0 {
                    // Backwards through the states, tightening upper bounds.
                    let mut last_backpointer = num_states - 1;
                    for i in (0..num_states).rev() {
                        let lower_bound = bounds[i as usize].0;
                        let upper_bound = last_backpointer.min(bounds[i as usize].1);
                        if upper_bound == lower_bound {
                            last_backpointer = lower_bound;
                            continue;
                        }
                        let mut best_cost = this_forward_cost[i as usize];
                        let mut best_j = self.state_info[i as usize].backpointer;
                        let initial_best_j = best_j;

                        if best_j == upper_bound {
                            // Already at the upper bound; the lower bound
                            // gets its turn on the next pass.
                            last_backpointer = best_j;
                            continue;
                        }
                        // lower_bound and lower_bound + 1 were evaluated by
                        // the pass that produced the bound.
                        let mut j = upper_bound;
                        while j > lower_bound + 1 {
                            let this_cost = transition_cost(i, j);
                            if this_cost < best_cost {
                                best_cost = this_cost;
                                best_j = j;
                            } else if best_j > j {
                                break;
                            }
                            j -= 1;
                        }
                        bounds[i as usize].1 = best_j;
                        if best_j != initial_best_j {
                            this_forward_cost[i as usize] = best_cost;
                            self.state_info[i as usize].backpointer = best_j;
                            changed = true;
                        }
                        last_backpointer = best_j;
                    }
                } else {
                    // Forwards through the states, tightening lower bounds.
                    let mut last_backpointer = 0;
                    for i in 0..num_states {
                        let lower_bound = last_backpointer.max(bounds[i as usize].0);
                        let upper_bound = bounds[i as usize].1;
                        if upper_bound == lower_bound {
                            last_backpointer = lower_bound;
                            continue;
                        }
                        let mut best_cost = this_forward_cost[i as usize];
                        let mut best_j = self.state_info[i as usize].backpointer;
                        let initial_best_j = best_j;

                        if best_j == lower_bound {
                            last_backpointer = best_j;
                            continue;
                        }
                        // upper_bound itself was already evaluated.
                        let mut j = lower_bound;
                        while j < upper_bound - 1 {
                            let this_cost = transition_cost(i, j);
                            if this_cost < best_cost {
                                best_cost = this_cost;
                                best_j = j;
                            } else if best_j < j {
                                break;
                            }
                            j += 1;
                        }
                        bounds[i as usize].0 = best_j;
                        if best_j != initial_best_j {
                            this_forward_cost[i as usize] = best_cost;
                            self.state_info[i as usize].backpointer = best_j;
                            changed = true;
                        }
                        last_backpointer = best_j;
                    }
                }
                if !changed {
                    break;
                }
            }
        }

        for (cost, &local) in this_forward_cost.iter_mut().zip(local_cost.iter()) {
            *cost += local;
        }
    }
}

/// Local cost per state: `1 - nccf + soft_min_f0 * lag * nccf`. The last
/// term grows with the lag, softly discouraging pitches below the
/// configured soft minimum.
fn compute_local_cost(
    nccf_pitch: &[f32],
    lags: &[f32],
    opts: &PitchExtractionOptions,
    local_cost: &mut [f32],
) {
    assert!(nccf_pitch.len() == lags.len() && nccf_pitch.len() == local_cost.len());
    for i in 0..nccf_pitch.len() {
        local_cost[i] = 1.0 - nccf_pitch[i] + opts.soft_min_f0 * lags[i] * nccf_pitch[i];
    }
}

/// Trace the best path back from `best_state` at the newest frame, writing
/// `(lag_index, pov_nccf)` for frame t into `lag_nccf[t]`.
///
/// `frames[0]` is the sentinel; `frames[t + 1]` belongs to frame t, so
/// `lag_nccf` has one element fewer than `frames`. The walk stops as soon
/// as it reaches a frame whose recorded best state already matches: nothing
/// older can change either.
pub(crate) fn set_best_state(
    frames: &mut [ViterbiFrame],
    best_state: i32,
    lag_nccf: &mut [(i32, f32)],
) {
    let mut best_state = best_state;
    let mut index = frames.len() - 1;
    loop {
        let frame = &mut frames[index];
        if best_state == frame.cur_best_state {
            return;
        }
        frame.cur_best_state = best_state;
        let info = &frame.state_info[best_state as usize];
        if index > 0 {
            lag_nccf[index - 1] = (best_state, info.pov_nccf);
        }
        best_state = info.backpointer;
        if index == 0 {
            return;
        }
        index -= 1;
    }
}

/// How many of the newest frames have a traceback that has not yet settled
/// on a unique predecessor.
///
/// Walks backwards from the newest frame carrying the lowest and highest
/// state that can still be on a best path; once they meet, every older
/// frame is final. Capped at `max_latency`; a cap of zero (or less) means
/// the caller does not want any frames withheld.
pub(crate) fn compute_latency(frames: &[ViterbiFrame], max_latency: i32) -> i32 {
    if max_latency <= 0 {
        return 0;
    }

    let num_states = frames[0].state_info.len();
    let mut min_living_state = 0usize;
    let mut max_living_state = num_states - 1;

    let mut latency = 0;
    let mut index = frames.len() - 1;
    while latency < max_latency {
        let state_info = &frames[index].state_info;
        min_living_state = state_info[min_living_state].backpointer as usize;
        max_living_state = state_info[max_living_state].backpointer as usize;
        if min_living_state == max_living_state {
            return latency;
        }
        if index == 0 {
            // The sentinel is not a real frame.
            break;
        }
        index -= 1;
        latency += 1;
    }
    latency
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn options(naive: bool) -> PitchExtractionOptions {
        PitchExtractionOptions {
            use_naive_search: naive,
            ..PitchExtractionOptions::default()
        }
    }

    fn run_frame(
        opts: &PitchExtractionOptions,
        nccf_pitch: &[f32],
        lags: &[f32],
        prev_forward_cost: &[f32],
    ) -> (Vec<i32>, Vec<f32>) {
        let num_states = nccf_pitch.len();
        let mut frame = ViterbiFrame::new(num_states);
        let mut bounds = Vec::new();
        let mut forward_cost = vec![0.0f32; num_states];
        frame.compute_backtraces(
            opts,
            nccf_pitch,
            lags,
            prev_forward_cost,
            &mut bounds,
            &mut forward_cost,
        );
        let backpointers = frame.state_info.iter().map(|s| s.backpointer).collect();
        (backpointers, forward_cost)
    }

    #[test]
    fn fast_search_matches_naive_search_exactly() {
        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..20 {
            let num_states = 50 + trial * 13;
            let nccf_pitch: Vec<f32> =
                (0..num_states).map(|_| rng.gen::<f32>() * 1.8 - 0.9).collect();
            let lags: Vec<f32> = (0..num_states)
                .map(|k| 0.0025 * 1.005f32.powi(k as i32))
                .collect();
            let prev_forward_cost: Vec<f32> =
                (0..num_states).map(|_| rng.gen::<f32>() * 3.0).collect();

            let (bp_fast, cost_fast) =
                run_frame(&options(false), &nccf_pitch, &lags, &prev_forward_cost);
            let (bp_naive, cost_naive) =
                run_frame(&options(true), &nccf_pitch, &lags, &prev_forward_cost);

            assert_eq!(bp_fast, bp_naive, "backpointers differ on trial {}", trial);
            for (i, (&a, &b)) in cost_fast.iter().zip(cost_naive.iter()).enumerate() {
                assert!(
                    a.to_bits() == b.to_bits(),
                    "cost {} differs on trial {}: {} vs {}",
                    i,
                    trial,
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn backpointers_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let num_states = 200;
        let nccf_pitch: Vec<f32> = (0..num_states).map(|_| rng.gen::<f32>()).collect();
        let lags: Vec<f32> = (0..num_states).map(|k| 0.0025 + 1e-5 * k as f32).collect();
        let prev: Vec<f32> = (0..num_states).map(|_| rng.gen::<f32>() * 5.0).collect();
        let (backpointers, _) = run_frame(&options(false), &nccf_pitch, &lags, &prev);
        assert!(backpointers
            .iter()
            .all(|&b| b >= 0 && b < num_states as i32));
    }

    #[test]
    fn first_frame_forward_cost_is_local_cost() {
        // With an all-zero previous cost, the transition minimum is always
        // achieved at j = i with zero cost, leaving only the local cost.
        let opts = options(false);
        let nccf_pitch = [0.3f32, -0.1, 0.8, 0.05];
        let lags = [0.0025f32, 0.005, 0.01, 0.02];
        let prev = [0.0f32; 4];
        let (backpointers, cost) = run_frame(&opts, &nccf_pitch, &lags, &prev);
        for i in 0..4 {
            let local = 1.0 - nccf_pitch[i]
                + opts.soft_min_f0 * lags[i] * nccf_pitch[i];
            assert!((cost[i] - local).abs() < 1e-7);
            assert_eq!(backpointers[i], i as i32);
        }
    }

    #[test]
    fn traceback_follows_backpointers_and_latency_tracks_divergence() {
        let num_states = 4;
        // Sentinel plus three frames. The newest frame keeps its states
        // apart (identity backpointers); the earlier frames funnel every
        // state into state 1.
        let mut frames: Vec<ViterbiFrame> =
            (0..4).map(|_| ViterbiFrame::new(num_states)).collect();
        for frame in frames.iter_mut().take(3).skip(1) {
            for info in frame.state_info.iter_mut() {
                info.backpointer = 1;
            }
        }
        for (i, info) in frames[3].state_info.iter_mut().enumerate() {
            info.backpointer = i as i32;
        }

        let mut lag_nccf = vec![(0, 0.0f32); 3];
        set_best_state(&mut frames, 2, &mut lag_nccf);
        assert_eq!(lag_nccf[2].0, 2);
        assert_eq!(lag_nccf[1].0, 2);
        assert_eq!(lag_nccf[0].0, 1);

        // The newest frame's states have not met yet; one step further
        // back, everything funnels into state 1.
        assert_eq!(compute_latency(&frames, 100), 1);
        assert_eq!(compute_latency(&frames, 0), 0);

        // A second traceback asserting the same best state stops at once
        // and changes nothing.
        let before: Vec<(i32, f32)> = lag_nccf.clone();
        set_best_state(&mut frames, 2, &mut lag_nccf);
        assert_eq!(before, lag_nccf);
    }
}

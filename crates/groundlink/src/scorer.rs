//! # Link Scorer
//!
//! Turns one video-rx sample into a link score in `[1000, 2000]` plus the
//! auxiliary control signals sent downstream:
//!
//! - **score** — weighted, range-normalized SNR and RSSI of the best antenna
//! - **penalty** — score reduction from smoothed packet noise (optional)
//! - **fec_change** — suggested FEC strength increase, 0..=5 (optional)
//! - **keyframe code** — outstanding IDR request, if any
//!
//! Noise is the error ratio `(5·lost + weighted fec_rec) / packets_per_antenna`
//! run through a [`NoiseFilter`]. FEC recoveries are weighted by how much
//! redundancy the session carries: with little parity, each recovery is a
//! stronger sign of trouble.

use std::sync::Arc;

use crate::config::ParameterSet;
use crate::kalman::NoiseFilter;
use crate::keyframe::KeyframeRequests;
use crate::stats::VideoSample;

/// Lower bound of the score range.
pub const SCORE_FLOOR: f64 = 1000.0;
/// Width of the score range.
pub const SCORE_SPAN: f64 = 1000.0;
/// Largest FEC increase ever suggested.
pub const MAX_FEC_CHANGE: i32 = 5;

/// Weight of a lost packet relative to an FEC-recovered one.
const LOST_PACKET_WEIGHT: f64 = 5.0;
/// Numerator of the redundancy weighting for recovered packets.
const FEC_REDUNDANCY_SCALE: f64 = 6.0;

/// Result of scoring one sample. Integer fields are truncated toward zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredOutput {
    /// Unix time in seconds.
    pub timestamp: u64,
    pub final_score: i64,
    pub fec_rec_packets: u64,
    pub lost_packets: u64,
    pub best_rssi: i64,
    pub best_snr: i64,
    pub num_antennas: u64,
    pub penalty: i64,
    pub fec_change: i32,
    pub keyframe_code: Option<String>,
}

/// Intermediate values of one scoring pass, kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub error_ratio: f64,
    pub filtered_noise: f64,
    pub snr_norm: f64,
    pub rssi_norm: f64,
    pub raw_score: f64,
    pub deduction_ratio: f64,
    pub final_score: f64,
}

/// Owns the noise filter; one instance per process.
pub struct LinkScorer {
    params: Arc<ParameterSet>,
    noise: NoiseFilter,
    last: ScoreBreakdown,
}

impl LinkScorer {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        let noise = NoiseFilter::new(&params.kalman);
        Self {
            params,
            noise,
            last: ScoreBreakdown::default(),
        }
    }

    pub fn noise_filter(&self) -> &NoiseFilter {
        &self.noise
    }

    /// Breakdown of the most recent [`score`](Self::score) call.
    pub fn last_breakdown(&self) -> ScoreBreakdown {
        self.last
    }

    pub fn score(
        &mut self,
        sample: &VideoSample,
        keyframes: &mut KeyframeRequests,
        timestamp: u64,
    ) -> ScoredOutput {
        let p = &self.params;

        if sample.lost_packets > 0 && p.keyframe.allow_idr {
            keyframes.request();
        }

        let (error_ratio, filtered_noise) = if sample.all_packets == 0 || sample.num_antennas == 0
        {
            // No data: leave the filter untouched.
            (0.0, 0.0)
        } else {
            let ratio = error_ratio(sample);
            (ratio, self.noise.update(ratio))
        };

        let best_snr = sample.best_snr.unwrap_or(p.ranges.snr_min as f64);
        let best_rssi = sample.best_rssi.unwrap_or(p.ranges.rssi_min as f64);
        let snr_norm = normalize(best_snr, p.ranges.snr_min, p.ranges.snr_max);
        let rssi_norm = normalize(best_rssi, p.ranges.rssi_min, p.ranges.rssi_max);

        let score_norm = p.weights.snr_weight * snr_norm + p.weights.rssi_weight * rssi_norm;
        let raw_score = SCORE_FLOOR + score_norm * SCORE_SPAN;

        let deduction = deduction_ratio(
            filtered_noise,
            p.noise.min_noise,
            p.noise.max_noise,
            p.noise.deduction_exponent,
        );

        let (final_score, penalty) = if p.refinement.allow_penalty {
            let final_score = SCORE_FLOOR + (raw_score - SCORE_FLOOR) * (1.0 - deduction);
            (final_score, final_score - raw_score)
        } else {
            (raw_score, 0.0)
        };

        let fec_change = if p.refinement.allow_fec_increase {
            fec_change(
                filtered_noise,
                p.noise.min_noise_for_fec_change,
                p.noise.noise_for_max_fec_change,
                p.noise.max_noise,
            )
        } else {
            0
        };

        self.last = ScoreBreakdown {
            error_ratio,
            filtered_noise,
            snr_norm,
            rssi_norm,
            raw_score,
            deduction_ratio: deduction,
            final_score,
        };

        ScoredOutput {
            timestamp,
            final_score: final_score as i64,
            fec_rec_packets: sample.fec_rec_packets,
            lost_packets: sample.lost_packets,
            best_rssi: best_rssi as i64,
            best_snr: best_snr as i64,
            num_antennas: sample.num_antennas as u64,
            penalty: penalty as i64,
            fec_change,
            keyframe_code: keyframes.consume(),
        }
    }
}

/// Raw (unfiltered) error ratio of a sample with packets and antennas.
pub fn error_ratio(sample: &VideoSample) -> f64 {
    let fec_rec = sample.fec_rec_packets as f64;
    // A session with fewer total than data shards has no meaningful
    // redundancy; the raw count keeps the weight finite.
    let adjusted_fec_rec = match (sample.fec_k, sample.fec_n) {
        (Some(k), Some(n)) if n != 0 && n >= k => {
            let redundancy = n as f64 - k as f64;
            fec_rec * (FEC_REDUNDANCY_SCALE / (1.0 + redundancy))
        }
        _ => fec_rec,
    };
    let per_antenna = sample.all_packets as f64 / sample.num_antennas as f64;
    (LOST_PACKET_WEIGHT * sample.lost_packets as f64 + adjusted_fec_rec) / per_antenna
}

/// Map `value` from `[min, max]` onto `[0, 1]`, clamping outside the range.
pub fn normalize(value: f64, min: i32, max: i32) -> f64 {
    let (min, max) = (min as f64, max as f64);
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Fraction of the above-floor score removed for the given noise level.
pub fn deduction_ratio(noise: f64, min_noise: f64, max_noise: f64, exponent: f64) -> f64 {
    if noise < min_noise {
        return 0.0;
    }
    ((noise - min_noise) / (max_noise - min_noise))
        .powf(exponent)
        .min(1.0)
}

/// Suggested FEC increase for the given noise level, `0..=MAX_FEC_CHANGE`.
pub fn fec_change(noise: f64, min_for_change: f64, noise_for_max: f64, max_noise: f64) -> i32 {
    if noise <= min_for_change {
        return 0;
    }
    if noise >= noise_for_max {
        return MAX_FEC_CHANGE;
    }
    let scaled = (noise - min_for_change) / (max_noise - min_for_change) * MAX_FEC_CHANGE as f64;
    (scaled.round() as i32).clamp(0, MAX_FEC_CHANGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(all: u64, fec_rec: u64, lost: u64) -> VideoSample {
        VideoSample {
            all_packets: all,
            fec_rec_packets: fec_rec,
            lost_packets: lost,
            fec_k: Some(8),
            fec_n: Some(12),
            num_antennas: 1,
            best_rssi: Some(-50.0),
            best_snr: Some(20.0),
        }
    }

    fn scorer_with(edit: impl FnOnce(&mut ParameterSet)) -> LinkScorer {
        let mut params = ParameterSet::default();
        edit(&mut params);
        LinkScorer::new(Arc::new(params))
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    #[test]
    fn normalize_clamps_at_boundaries() {
        assert_eq!(normalize(5.0, 10, 36), 0.0);
        assert_eq!(normalize(10.0, 10, 36), 0.0);
        assert_eq!(normalize(36.0, 10, 36), 1.0);
        assert_eq!(normalize(50.0, 10, 36), 1.0);
        assert_eq!(normalize(-100.0, -85, -40), 0.0);
        assert!((normalize(23.0, 10, 36) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn error_ratio_weights_fec_by_redundancy() {
        // 8/12 → redundancy 4 → weight 6/5.
        let s = sample(100, 10, 2);
        let expected = (5.0 * 2.0 + 10.0 * 1.2) / 100.0;
        assert!((error_ratio(&s) - expected).abs() < 1e-12);
    }

    #[test]
    fn error_ratio_without_session_uses_raw_fec() {
        let mut s = sample(100, 10, 0);
        s.fec_k = None;
        assert!((error_ratio(&s) - 0.1).abs() < 1e-12);

        s.fec_k = Some(0);
        s.fec_n = Some(0);
        assert!((error_ratio(&s) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn error_ratio_ignores_inverted_session() {
        let mut s = sample(100, 0, 0);
        s.fec_k = Some(5);
        s.fec_n = Some(4);
        assert_eq!(error_ratio(&s), 0.0);

        s.fec_rec_packets = 10;
        s.fec_n = Some(1);
        assert!((error_ratio(&s) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn error_ratio_is_per_antenna() {
        let mut s = sample(200, 0, 1);
        s.num_antennas = 2;
        assert!((error_ratio(&s) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn deduction_below_min_is_zero() {
        assert_eq!(deduction_ratio(0.005, 0.01, 0.1, 0.5), 0.0);
    }

    #[test]
    fn deduction_saturates_at_one() {
        assert_eq!(deduction_ratio(0.5, 0.01, 0.1, 0.5), 1.0);
        assert_eq!(deduction_ratio(0.1, 0.01, 0.1, 0.5), 1.0);
    }

    #[test]
    fn deduction_midrange_uses_exponent() {
        let d = deduction_ratio(0.055, 0.01, 0.1, 0.5);
        assert!((d - 0.5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn fec_change_boundaries() {
        assert_eq!(fec_change(0.01, 0.01, 0.1, 0.1), 0);
        assert_eq!(fec_change(0.0, 0.01, 0.1, 0.1), 0);
        assert_eq!(fec_change(0.1, 0.01, 0.1, 0.1), 5);
        assert_eq!(fec_change(0.9, 0.01, 0.1, 0.1), 5);
        // (0.064 - 0.01) / 0.09 * 5 = 3.0
        assert_eq!(fec_change(0.064, 0.01, 0.1, 0.1), 3);
        assert_eq!(fec_change(0.02, 0.01, 0.1, 0.1), 1);
        assert_eq!(fec_change(0.028, 0.01, 0.1, 0.1), 1);
    }

    // ─── Scoring pass ───────────────────────────────────────────────────

    #[test]
    fn clean_sample_scores_without_penalty() {
        let mut scorer = scorer_with(|_| {});
        let mut kf = KeyframeRequests::new(20);
        let out = scorer.score(&sample(100, 0, 0), &mut kf, 1_700_000_000);

        // snr 10/26, rssi 35/45, equal weights → 1581.
        assert_eq!(out.final_score, 1581);
        assert_eq!(out.penalty, 0);
        assert_eq!(out.fec_change, 0);
        assert_eq!(out.best_rssi, -50);
        assert_eq!(out.best_snr, 20);
        assert_eq!(out.num_antennas, 1);
        assert_eq!(out.timestamp, 1_700_000_000);
        assert_eq!(out.keyframe_code, None);

        let b = scorer.last_breakdown();
        assert_eq!(b.error_ratio, 0.0);
        assert!(b.filtered_noise < 0.005 && b.filtered_noise > 0.0);
    }

    #[test]
    fn no_packets_leaves_filter_untouched() {
        let mut scorer = scorer_with(|_| {});
        let mut kf = KeyframeRequests::new(20);
        scorer.score(&sample(0, 0, 0), &mut kf, 0);
        assert_eq!(scorer.noise_filter().estimate(), 0.005);
        assert_eq!(scorer.last_breakdown().filtered_noise, 0.0);

        let mut s = sample(100, 5, 0);
        s.num_antennas = 0;
        scorer.score(&s, &mut kf, 0);
        assert_eq!(scorer.noise_filter().estimate(), 0.005);
    }

    #[test]
    fn loss_requests_keyframe_when_allowed() {
        let mut scorer = scorer_with(|_| {});
        let mut kf = KeyframeRequests::new(2);
        let out = scorer.score(&sample(100, 0, 3), &mut kf, 0);
        let code = out.keyframe_code.expect("loss should request a keyframe");
        assert_eq!(code.len(), 4);
        assert!(kf.is_pending());
    }

    #[test]
    fn loss_ignored_when_idr_disallowed() {
        let mut scorer = scorer_with(|p| p.keyframe.allow_idr = false);
        let mut kf = KeyframeRequests::new(2);
        let out = scorer.score(&sample(100, 0, 3), &mut kf, 0);
        assert_eq!(out.keyframe_code, None);
    }

    #[test]
    fn penalty_applies_when_noisy() {
        let mut scorer = scorer_with(|p| {
            p.refinement.allow_penalty = true;
            // Trust measurements fully so one sample moves the filter.
            p.kalman.error_estimate = 1.0;
            p.kalman.measurement_variance = 1e-9;
        });
        let mut kf = KeyframeRequests::new(0);
        let out = scorer.score(&sample(100, 0, 1), &mut kf, 0);

        // error ratio 0.05 → deduction sqrt(0.04/0.09) ≈ 0.667.
        let b = scorer.last_breakdown();
        assert!((b.filtered_noise - 0.05).abs() < 1e-6);
        assert!(out.penalty < 0);
        assert_eq!(out.final_score, b.final_score as i64);
        assert_eq!(out.penalty, (b.final_score - b.raw_score) as i64);
        assert!(out.final_score >= 1000 && out.final_score < 1581);
    }

    #[test]
    fn penalty_disabled_keeps_raw_score() {
        let mut scorer = scorer_with(|p| {
            p.kalman.error_estimate = 1.0;
            p.kalman.measurement_variance = 1e-9;
        });
        let mut kf = KeyframeRequests::new(0);
        let out = scorer.score(&sample(100, 0, 5), &mut kf, 0);
        assert_eq!(out.final_score, 1581);
        assert_eq!(out.penalty, 0);
    }

    #[test]
    fn fec_change_only_when_enabled() {
        let noisy = |p: &mut ParameterSet| {
            p.kalman.error_estimate = 1.0;
            p.kalman.measurement_variance = 1e-9;
        };
        let mut kf = KeyframeRequests::new(0);

        let mut off = scorer_with(noisy);
        assert_eq!(off.score(&sample(100, 0, 10), &mut kf, 0).fec_change, 0);

        let mut on = scorer_with(|p| {
            noisy(p);
            p.refinement.allow_fec_increase = true;
        });
        assert_eq!(on.score(&sample(100, 0, 10), &mut kf, 0).fec_change, 5);
    }

    #[test]
    fn missing_antenna_values_use_range_floor() {
        let mut scorer = scorer_with(|_| {});
        let mut kf = KeyframeRequests::new(0);
        let mut s = sample(100, 0, 0);
        s.best_rssi = None;
        s.best_snr = None;
        let out = scorer.score(&s, &mut kf, 0);
        assert_eq!(out.final_score, 1000);
        assert_eq!(out.best_rssi, -85);
        assert_eq!(out.best_snr, 10);
    }

    #[test]
    fn inverted_session_does_not_poison_filter() {
        let mut scorer = scorer_with(|p| p.refinement.allow_penalty = true);
        let mut kf = KeyframeRequests::new(0);
        let mut bad = sample(100, 0, 0);
        bad.fec_k = Some(5);
        bad.fec_n = Some(4);
        scorer.score(&bad, &mut kf, 0);
        assert!(scorer.noise_filter().estimate().is_finite());

        for _ in 0..1000 {
            scorer.score(&sample(100, 0, 0), &mut kf, 0);
        }
        let out = scorer.score(&sample(100, 0, 0), &mut kf, 0);
        assert!(scorer.noise_filter().estimate().is_finite());
        assert_eq!(out.penalty, 0);
        assert_eq!(out.final_score, 1581);
    }

    #[test]
    fn fractional_values_truncate_toward_zero() {
        let mut scorer = scorer_with(|_| {});
        let mut kf = KeyframeRequests::new(0);
        let mut s = sample(100, 0, 0);
        s.best_rssi = Some(-50.9);
        s.best_snr = Some(20.9);
        let out = scorer.score(&s, &mut kf, 0);
        assert_eq!(out.best_rssi, -50);
        assert_eq!(out.best_snr, 20);
    }
}

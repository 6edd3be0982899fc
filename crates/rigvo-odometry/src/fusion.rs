use std::collections::BTreeMap;
use std::f64::consts::{PI, TAU};

use rigvo_geometry::EncodedPose;

use crate::config::FusionParams;

/// Accumulates rig motion candidates per frame pair and reduces them to a robust mean.
///
/// Slot `k` holds the motion from frame `k - 1` to frame `k`. Candidates are never removed from
/// a slot, so later triplets keep improving earlier aggregates until the slot falls more than
/// `max_frames` behind the newest frame.
#[derive(Debug, Clone, Default)]
pub struct TemporalFusion {
    params: FusionParams,
    slots: BTreeMap<usize, Vec<EncodedPose>>,
    newest: Option<usize>,
}

impl TemporalFusion {
    /// Create an empty accumulator.
    pub fn new(params: FusionParams) -> Self {
        Self {
            params,
            slots: BTreeMap::new(),
            newest: None,
        }
    }

    /// Offer the two motions of one camera for one triplet.
    ///
    /// `ab` is stored in slot `frame_ab` and `bc` in slot `frame_ab + 1`, but only when the
    /// magnitude of `bc` is within `scale_tolerance` of `expected_scale`. Returns whether the
    /// pair was accepted.
    pub fn offer(
        &mut self,
        frame_ab: usize,
        ab: EncodedPose,
        bc: EncodedPose,
        expected_scale: f64,
    ) -> bool {
        let deviation = (bc.scale - expected_scale).abs();
        if !(deviation < self.params.scale_tolerance) {
            log::info!(
                "frame {frame_ab}: rejected pair with scale {:.3}, expected {expected_scale:.3}",
                bc.scale
            );
            return false;
        }
        self.push(frame_ab, ab);
        self.push(frame_ab + 1, bc);
        true
    }

    /// Store a candidate for a slot without gating.
    pub fn push(&mut self, frame: usize, pose: EncodedPose) {
        self.slots.entry(frame).or_default().push(pose.without_sigma());
        if self.newest.map_or(true, |newest| frame > newest) {
            self.newest = Some(frame);
            self.evict();
        }
    }

    fn evict(&mut self) {
        let Some(newest) = self.newest else {
            return;
        };
        let Some(oldest_kept) = (newest + 1).checked_sub(self.params.max_frames) else {
            return;
        };
        let before = self.slots.len();
        self.slots = self.slots.split_off(&oldest_kept);
        let dropped = before - self.slots.len();
        if dropped > 0 {
            log::debug!("evicted {dropped} frame slots older than {oldest_kept}");
        }
    }

    /// Candidates stored for a slot.
    pub fn candidates(&self, frame: usize) -> &[EncodedPose] {
        self.slots.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Frame indices that currently hold candidates.
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.keys().copied()
    }

    /// Robust mean of the candidates of a slot, `None` if the slot is empty or evicted.
    pub fn aggregate(&self, frame: usize) -> Option<EncodedPose> {
        let candidates = self.slots.get(&frame)?;
        let aggregate = robust_mean(candidates, self.params.inlier_band);
        log::debug!(
            "frame {frame}: aggregated {} candidates",
            candidates.len()
        );
        aggregate
    }
}

fn circular_mean(angles: impl Iterator<Item = f64>) -> f64 {
    let (s, c) = angles.fold((0.0, 0.0), |(s, c), a| (s + a.sin(), c + a.cos()));
    s.atan2(c)
}

fn unwrap_near(angle: f64, reference: f64) -> f64 {
    reference + (angle - reference + PI).rem_euclid(TAU) - PI
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Per-gene mean of the candidates whose six genes all lie within `band` standard deviations of
/// the per-gene mean; the plain mean when no candidate qualifies.
///
/// Azimuths are unwrapped around their circular mean before averaging.
pub fn robust_mean(candidates: &[EncodedPose], band: f64) -> Option<EncodedPose> {
    if candidates.is_empty() {
        return None;
    }
    let reference = circular_mean(candidates.iter().map(|c| c.azimuth));
    let genes: Vec<[f64; 6]> = candidates
        .iter()
        .map(|c| {
            let mut g = c.genes();
            g[3] = unwrap_near(g[3], reference);
            g
        })
        .collect();

    let stats: Vec<(f64, f64)> = (0..6)
        .map(|k| mean_std(&genes.iter().map(|g| g[k]).collect::<Vec<_>>()))
        .collect();

    let inliers: Vec<&[f64; 6]> = genes
        .iter()
        .filter(|g| {
            g.iter().zip(stats.iter()).all(|(v, (mean, std))| {
                let tol = band * std + 1e-12 * mean.abs().max(1.0);
                (v - mean).abs() <= tol
            })
        })
        .collect();

    let selected: Vec<&[f64; 6]> = if inliers.is_empty() {
        genes.iter().collect()
    } else {
        inliers
    };
    let n = selected.len() as f64;
    let mut mean = [0.0; 6];
    for g in &selected {
        for k in 0..6 {
            mean[k] += g[k] / n;
        }
    }
    mean[3] = mean[3].rem_euclid(TAU);
    Some(EncodedPose::from_genes(mean))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DVec3;

    fn pose(rz: f64, azimuth: f64, scale: f64) -> EncodedPose {
        EncodedPose {
            rotation: DVec3::new(0.0, 0.0, rz),
            azimuth,
            elevation: 0.0,
            scale,
            sigma: None,
        }
    }

    #[test]
    fn test_outliers_rejected() {
        let mut fusion = TemporalFusion::new(FusionParams::default());
        for (i, s) in [0.98, 1.0, 1.01, 0.99, 1.02, 1.0].iter().enumerate() {
            fusion.push(3, pose(0.01 + 0.001 * i as f64, 0.5, *s));
        }
        fusion.push(3, pose(0.4, 2.5, 3.0));
        fusion.push(3, pose(-0.3, 4.0, 0.2));

        let agg = fusion.aggregate(3).unwrap_or(pose(9.0, 9.0, 9.0));
        assert!(agg.scale > 0.98 && agg.scale < 1.02);
        assert!(agg.rotation.z > 0.01 && agg.rotation.z < 0.016);
        assert_relative_eq!(agg.azimuth, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let mut fusion = TemporalFusion::new(FusionParams::default());
        for i in 0..7 {
            fusion.push(1, pose(0.02 * i as f64, 1.0 + 0.1 * i as f64, 1.0));
        }
        assert_eq!(fusion.aggregate(1), fusion.aggregate(1));
        assert!(fusion.aggregate(2).is_none());
    }

    #[test]
    fn test_scale_gate() {
        let mut fusion = TemporalFusion::new(FusionParams::default());
        assert!(fusion.offer(4, pose(0.0, 0.0, 1.0), pose(0.0, 0.0, 1.9), 2.0));
        assert!(!fusion.offer(4, pose(0.0, 0.0, 1.0), pose(0.0, 0.0, 1.0), 2.0));
        assert_eq!(fusion.candidates(4).len(), 1);
        assert_eq!(fusion.candidates(5).len(), 1);
    }

    #[test]
    fn test_azimuth_wraps() {
        let candidates = [pose(0.0, 0.05, 1.0), pose(0.0, TAU - 0.05, 1.0), pose(0.0, 0.0, 1.0)];
        let agg = robust_mean(&candidates, 1.0).unwrap_or(pose(0.0, 3.0, 0.0));
        assert!(agg.azimuth < 0.01 || agg.azimuth > TAU - 0.01);
    }

    #[test]
    fn test_old_frames_evicted() {
        let mut fusion = TemporalFusion::new(FusionParams {
            max_frames: 4,
            ..Default::default()
        });
        for frame in 0..10 {
            fusion.push(frame, pose(0.0, 0.0, 1.0));
        }
        assert!(fusion.aggregate(5).is_none());
        assert!(fusion.aggregate(6).is_some());
        assert_eq!(fusion.frames().count(), 4);
    }

    #[test]
    fn test_all_outside_band_falls_back_to_mean() {
        let candidates = [pose(0.0, 0.0, 1.0), pose(0.0, 0.0, 2.0), pose(0.0, 0.0, 4.0)];
        let agg = robust_mean(&candidates, 0.0).unwrap_or(pose(0.0, 0.0, 0.0));
        assert_relative_eq!(agg.scale, 7.0 / 3.0, epsilon = 1e-12);
    }
}

use glam::DVec2;

use crate::config::FlowParams;
use crate::heading::angular_distance;

/// Rejects correspondence triples whose optical flow disagrees with the rest of the image.
///
/// A triple `(a, b, c)` survives when the direction of `c - b` stays within `max_angle` of the
/// direction of `b - a`, and the length ratio `|c - b| / |b - a|` lies within `scale_band`
/// standard deviations of the mean ratio.
#[derive(Debug, Clone)]
pub struct CorrespondenceFilter {
    max_angle: f64,
    scale_band: f64,
}

impl Default for CorrespondenceFilter {
    fn default() -> Self {
        Self::new(&FlowParams::default())
    }
}

impl CorrespondenceFilter {
    /// Create a filter from its parameters.
    pub fn new(params: &FlowParams) -> Self {
        Self {
            max_angle: params.max_angle,
            scale_band: params.scale_band,
        }
    }

    /// Mask of the triples that move consistently.
    ///
    /// PRECONDITION: the three slices have the same length.
    pub fn filter(&self, a: &[DVec2], b: &[DVec2], c: &[DVec2]) -> Vec<bool> {
        assert!(
            a.len() == b.len() && b.len() == c.len(),
            "correspondence sets differ in length: {} / {} / {}",
            a.len(),
            b.len(),
            c.len()
        );

        let flows: Vec<(DVec2, DVec2)> = a
            .iter()
            .zip(b.iter())
            .zip(c.iter())
            .map(|((a, b), c)| (*b - *a, *c - *b))
            .collect();

        let ratios: Vec<Option<f64>> = flows
            .iter()
            .map(|(ab, bc)| {
                let len = ab.length();
                (len > 0.0).then(|| bc.length() / len)
            })
            .collect();

        let valid: Vec<f64> = ratios.iter().flatten().copied().collect();
        if valid.is_empty() {
            return vec![false; a.len()];
        }
        let n = valid.len() as f64;
        let mean = valid.iter().sum::<f64>() / n;
        let std = (valid.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        let band = self.scale_band * std + 1e-9 * mean.abs().max(1.0);

        flows
            .iter()
            .zip(ratios.iter())
            .map(|((ab, bc), ratio)| {
                let Some(ratio) = ratio else {
                    return false;
                };
                let angle = angular_distance(ab.y.atan2(ab.x), bc.y.atan2(bc.x));
                angle < self.max_angle && (ratio - mean).abs() <= band
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consistent(n: usize, flow: DVec2, scale: f64) -> (Vec<DVec2>, Vec<DVec2>, Vec<DVec2>) {
        let a: Vec<DVec2> = (0..n)
            .map(|i| DVec2::new(100.0 + 37.0 * i as f64, 80.0 + 11.0 * (i % 7) as f64))
            .collect();
        let b: Vec<DVec2> = a.iter().map(|p| *p + flow).collect();
        let c: Vec<DVec2> = b.iter().map(|p| *p + flow * scale).collect();
        (a, b, c)
    }

    #[test]
    fn test_keeps_consistent_flow() {
        let (a, b, c) = consistent(40, DVec2::new(3.0, -1.5), 1.3);
        let mask = CorrespondenceFilter::default().filter(&a, &b, &c);
        assert!(mask.iter().all(|k| *k));
    }

    #[test]
    fn test_rejects_reversed_flow() {
        let (a, b, mut c) = consistent(40, DVec2::new(3.0, 0.0), 1.0);
        for (i, p) in c.iter_mut().enumerate().filter(|(i, _)| i % 2 == 1) {
            // turn the second displacement by at least 90 degrees
            let angle = std::f64::consts::FRAC_PI_2 + 0.05 * i as f64;
            *p = b[i] + DVec2::from_angle(angle) * (1.0 + 0.2 * i as f64);
        }
        let mask = CorrespondenceFilter::default().filter(&a, &b, &c);
        let kept = mask.iter().filter(|k| **k).count();
        assert!(kept <= 20);
        assert!(kept >= 18);
        assert!(mask.iter().skip(1).step_by(2).all(|k| !*k));
    }

    #[test]
    fn test_zero_motion_rejected() {
        let p = vec![DVec2::new(1.0, 1.0); 5];
        let mask = CorrespondenceFilter::default().filter(&p, &p, &p);
        assert_eq!(mask, vec![false; 5]);
    }

    #[test]
    #[should_panic]
    fn test_length_mismatch_panics() {
        let p = vec![DVec2::ZERO; 3];
        let q = vec![DVec2::ZERO; 2];
        CorrespondenceFilter::default().filter(&p, &p, &q);
    }
}

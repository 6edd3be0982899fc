use glam::{DMat3, DVec3};

use crate::essential::essential_from_pose;
use crate::linalg::{left_null3, right_null3};
use crate::pose::RigPose;

/// Epipoles `(e_a, e_b)` of an essential or fundamental matrix, with `E e_a = 0` and
/// `e_b^T E = 0`.
///
/// Epipoles at infinity are returned as `None`; otherwise they are scaled to `z = 1`.
pub fn epipoles(e: &DMat3) -> (Option<DVec3>, Option<DVec3>) {
    let dehomogenize = |v: DVec3| (v.z.abs() > 1e-9).then(|| v / v.z);
    let ea = right_null3(e).ok().and_then(dehomogenize);
    let eb = left_null3(e).ok().and_then(dehomogenize);
    (ea, eb)
}

/// Mask of correspondences that stay farther than `cutoff` from both epipoles.
pub fn away_from_epipoles(
    x1: &[DVec3],
    x2: &[DVec3],
    epipoles: (Option<DVec3>, Option<DVec3>),
    cutoff: f64,
) -> Vec<bool> {
    let far = |x: &DVec3, e: Option<DVec3>| match e {
        Some(e) => (x.x / x.z - e.x).hypot(x.y / x.z - e.y) >= cutoff,
        None => true,
    };
    x1.iter()
        .zip(x2.iter())
        .map(|(a, b)| far(a, epipoles.0) && far(b, epipoles.1))
        .collect()
}

/// Perpendicular distance of a point to the line `l`, or `None` for a degenerate line.
pub fn point_line_distance(x: DVec3, l: DVec3) -> Option<f64> {
    let norm = l.x.hypot(l.y);
    if norm < 1e-12 {
        return None;
    }
    Some((l.dot(x / x.z)).abs() / norm)
}

/// Sum of point-to-epipolar-line distances in both images.
///
/// Points in the second image are measured against `E x1`, points in the first image against
/// `E^T x2`. Returns `None` if no line contributed.
pub fn symmetric_epipolar_distance(e: &DMat3, x1: &[DVec3], x2: &[DVec3]) -> Option<f64> {
    let et = e.transpose();
    let mut total = 0.0;
    let mut used = 0usize;
    for (a, b) in x1.iter().zip(x2.iter()) {
        if let Some(d) = point_line_distance(*b, *e * *a) {
            total += d;
            used += 1;
        }
        if let Some(d) = point_line_distance(*a, et * *b) {
            total += d;
            used += 1;
        }
    }
    (used > 0).then_some(total)
}

/// Bidirectional epipolar distance of a camera-local pose, excluding points near the epipoles.
///
/// Returns `f64::INFINITY` when nothing is left to score.
pub fn epipolar_fitness(pose: &RigPose, x1: &[DVec3], x2: &[DVec3], epipole_cutoff: f64) -> f64 {
    let e = essential_from_pose(pose);
    if !e.is_finite() {
        return f64::INFINITY;
    }
    let mask = away_from_epipoles(x1, x2, epipoles(&e), epipole_cutoff);
    let (a, b): (Vec<DVec3>, Vec<DVec3>) = x1
        .iter()
        .zip(x2.iter())
        .zip(mask.iter())
        .filter(|(_, keep)| **keep)
        .map(|((a, b), _)| (*a, *b))
        .unzip();
    symmetric_epipolar_distance(&e, &a, &b).unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::vector_to_rotation;
    use approx::assert_relative_eq;

    fn scene(pose: &RigPose) -> (Vec<DVec3>, Vec<DVec3>) {
        (0..25)
            .map(|i| {
                let fi = i as f64;
                let p = DVec3::new((fi * 0.9).sin() * 2.0, (fi * 0.4).cos(), 5.0 + (fi * 0.3).sin());
                let q = pose.transform_point(p);
                (p / p.z, q / q.z)
            })
            .unzip()
    }

    #[test]
    fn test_fitness_zero_for_true_pose() {
        let pose = RigPose::from_rotation_translation(
            vector_to_rotation(DVec3::new(0.0, 0.05, 0.0)),
            DVec3::new(0.5, 0.0, 0.1),
        );
        let (x1, x2) = scene(&pose);
        assert!(epipolar_fitness(&pose, &x1, &x2, 0.1) < 1e-10);

        let wrong = RigPose::from_rotation_translation(
            vector_to_rotation(DVec3::new(0.0, 0.15, 0.0)),
            DVec3::new(0.5, 0.0, 0.1),
        );
        assert!(epipolar_fitness(&wrong, &x1, &x2, 0.1) > 1e-3);
    }

    #[test]
    fn test_forward_motion_masks_epipole() {
        // pure forward motion puts both epipoles at the principal point
        let pose = RigPose::from_rotation_translation(DMat3::IDENTITY, DVec3::new(0.0, 0.0, -1.0));
        let e = essential_from_pose(&pose);
        let (ea, eb) = epipoles(&e);
        let ea = ea.unwrap_or(DVec3::splat(f64::NAN));
        let eb = eb.unwrap_or(DVec3::splat(f64::NAN));
        assert_relative_eq!(ea.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(eb.y, 0.0, epsilon = 1e-9);

        let x = vec![DVec3::new(0.01, 0.0, 1.0), DVec3::new(0.5, 0.5, 1.0)];
        let mask = away_from_epipoles(&x, &x, (Some(ea), Some(eb)), 0.1);
        assert_eq!(mask, vec![false, true]);
    }

    #[test]
    fn test_fitness_infinite_without_points() {
        let pose = RigPose::from_rotation_translation(DMat3::IDENTITY, DVec3::X);
        assert_eq!(epipolar_fitness(&pose, &[], &[], 0.1), f64::INFINITY);
    }

    #[test]
    fn test_point_line_distance() {
        let l = DVec3::new(0.0, 1.0, -2.0);
        let d = point_line_distance(DVec3::new(3.0, 5.0, 1.0), l);
        assert_relative_eq!(d.unwrap_or(0.0), 3.0);
        assert!(point_line_distance(DVec3::ONE, DVec3::Z).is_none());
    }
}

use glam::DVec3;

use crate::pose::RigPose;

fn write_dlt_row(a: &mut faer::Mat<f64>, row: usize, x: f64, p3: &[f64; 4], p1: &[f64; 4]) {
    for j in 0..4 {
        a.write(row, j, x * p3[j] - p1[j]);
    }
}

/// Triangulate a single point seen by two views with the linear DLT method.
///
/// - `x1`, `x2`: normalized homogeneous image points
/// - `p1`, `p2`: world-to-camera poses of the two views
///
/// Returns `None` when the solution lies at infinity.
pub fn triangulate_point(x1: DVec3, x2: DVec3, p1: &RigPose, p2: &RigPose) -> Option<DVec3> {
    let r1 = p1.projection_rows();
    let r2 = p2.projection_rows();
    let (u1, v1) = (x1.x / x1.z, x1.y / x1.z);
    let (u2, v2) = (x2.x / x2.z, x2.y / x2.z);

    let mut a = faer::Mat::<f64>::zeros(4, 4);
    write_dlt_row(&mut a, 0, u1, &r1[2], &r1[0]);
    write_dlt_row(&mut a, 1, v1, &r1[2], &r1[1]);
    write_dlt_row(&mut a, 2, u2, &r2[2], &r2[0]);
    write_dlt_row(&mut a, 3, v2, &r2[2], &r2[1]);

    let svd = a.svd();
    let v = svd.v();
    let w = v.read(3, 3);
    if !w.is_finite() || w.abs() < 1e-12 {
        return None;
    }
    let x = DVec3::new(v.read(0, 3) / w, v.read(1, 3) / w, v.read(2, 3) / w);
    x.is_finite().then_some(x)
}

/// Whether a triangulated point lies in front of the reference view and of the view at `pose`.
pub fn in_front_of_both(point: DVec3, pose: &RigPose) -> bool {
    point.z > 0.0 && pose.transform_point(point).z > 0.0
}

/// Number of correspondences that triangulate in front of both views.
pub fn count_in_front(x1: &[DVec3], x2: &[DVec3], pose: &RigPose) -> usize {
    x1.iter()
        .zip(x2.iter())
        .filter_map(|(a, b)| triangulate_point(*a, *b, &RigPose::IDENTITY, pose))
        .filter(|x| in_front_of_both(*x, pose))
        .count()
}

/// Fraction of correspondences that triangulate in front of both views, in `[0, 1]`.
pub fn goodness(x1: &[DVec3], x2: &[DVec3], pose: &RigPose) -> f64 {
    if x1.is_empty() {
        return 0.0;
    }
    count_in_front(x1, x2, pose) as f64 / x1.len().min(x2.len()) as f64
}

/// Pick the candidate with the largest number of points in front of both views.
///
/// Ties keep the earliest candidate. Returns `None` for an empty candidate list.
pub fn select_by_cheirality(
    candidates: &[RigPose],
    x1: &[DVec3],
    x2: &[DVec3],
) -> Option<(RigPose, usize)> {
    let mut best: Option<(RigPose, usize)> = None;
    for pose in candidates {
        let count = count_in_front(x1, x2, pose);
        log::trace!("cheirality candidate: {count} of {} in front", x1.len());
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((*pose, count)),
        }
    }
    best
}

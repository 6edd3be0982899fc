use glam::{DMat3, DVec3};

use crate::error::GeometryError;
use crate::linalg::{normalize_points_2d, null_vector, svd3};
use crate::pose::RigPose;

/// Estimate an essential matrix from normalized correspondences with the 8-point algorithm.
///
/// - `x1`: normalized homogeneous points in the first view (length >= 8)
/// - `x2`: corresponding points in the second view
///
/// The result satisfies `x2^T E x1 = 0` and has singular values `(1, 1, 0)`.
pub fn essential_8point(x1: &[DVec3], x2: &[DVec3]) -> Result<DMat3, GeometryError> {
    if x1.len() != x2.len() {
        return Err(GeometryError::MismatchedArrayLengths {
            left_name: "x1",
            left_len: x1.len(),
            right_name: "x2",
            right_len: x2.len(),
        });
    }
    if x1.len() < 8 {
        return Err(GeometryError::InsufficientCorrespondences {
            required: 8,
            actual: x1.len(),
        });
    }

    // condition the system with similarity transforms T1, T2
    let (x1n, t1) = normalize_points_2d(x1);
    let (x2n, t2) = normalize_points_2d(x2);

    // design matrix A (N x 9) for x2^T * F * x1 = 0, F in row-major order
    let n = x1n.len();
    let mut a = faer::Mat::<f64>::zeros(n, 9);
    for i in 0..n {
        let (x, y) = (x1n[i].x, x1n[i].y);
        let (xp, yp) = (x2n[i].x, x2n[i].y);
        a.write(i, 0, xp * x);
        a.write(i, 1, xp * y);
        a.write(i, 2, xp);
        a.write(i, 3, yp * x);
        a.write(i, 4, yp * y);
        a.write(i, 5, yp);
        a.write(i, 6, x);
        a.write(i, 7, y);
        a.write(i, 8, 1.0);
    }

    let f = null_vector(&a)?;
    let f_norm = DMat3::from_cols(
        DVec3::new(f[0], f[3], f[6]),
        DVec3::new(f[1], f[4], f[7]),
        DVec3::new(f[2], f[5], f[8]),
    );

    // denormalize: F = T2^T * F * T1
    let e = t2.transpose() * f_norm * t1;
    enforce_essential_constraints(&e)
}

/// Enforce the `(1, 1, 0)` singular value constraint on an essential matrix.
pub fn enforce_essential_constraints(e: &DMat3) -> Result<DMat3, GeometryError> {
    let svd = svd3(e)?;
    Ok(svd.u * DMat3::from_diagonal(DVec3::new(1.0, 1.0, 0.0)) * svd.v.transpose())
}

/// Essential matrix `[t]x R` of a relative pose.
pub fn essential_from_pose(pose: &RigPose) -> DMat3 {
    crate::linalg::skew(pose.translation()) * pose.rotation()
}

/// Decompose an essential matrix into its four `(R, t)` candidates.
///
/// `t` is a unit vector. The candidates are ordered `(R1, t)`, `(R1, -t)`, `(R2, t)`, `(R2, -t)`.
pub fn decompose_essential(e: &DMat3) -> Result<[(DMat3, DVec3); 4], GeometryError> {
    let svd = svd3(e)?;
    let mut u = svd.u;
    let mut v = svd.v;

    if u.determinant() < 0.0 {
        u.z_axis = -u.z_axis;
    }
    if v.determinant() < 0.0 {
        v.z_axis = -v.z_axis;
    }

    let w = DMat3::from_cols(
        DVec3::new(0.0, 1.0, 0.0),
        DVec3::new(-1.0, 0.0, 0.0),
        DVec3::new(0.0, 0.0, 1.0),
    );

    let r1 = u * w * v.transpose();
    let r2 = u * w.transpose() * v.transpose();
    let t = u.z_axis;

    Ok([(r1, t), (r1, -t), (r2, t), (r2, -t)])
}

/// The four candidate poses of an essential matrix.
pub fn poses_from_essential(e: &DMat3) -> Result<[RigPose; 4], GeometryError> {
    let candidates = decompose_essential(e)?;
    Ok(candidates.map(|(r, t)| RigPose::from_rotation_translation(r, t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::skew;
    use crate::pose::vector_to_rotation;
    use approx::assert_relative_eq;

    fn synthetic_views(pose: &RigPose) -> (Vec<DVec3>, Vec<DVec3>) {
        let mut x1 = Vec::new();
        let mut x2 = Vec::new();
        for i in 0..20 {
            let fi = i as f64;
            let p = DVec3::new((fi * 0.37).sin() * 2.0, (fi * 0.71).cos() * 1.5, 4.0 + (fi * 0.13).sin() * 2.0);
            let q = pose.transform_point(p);
            x1.push(p / p.z);
            x2.push(q / q.z);
        }
        (x1, x2)
    }

    #[test]
    fn test_decompose_essential_identity_rotation() -> Result<(), GeometryError> {
        let r = DMat3::IDENTITY;
        let t = DVec3::new(1.0, 0.0, 0.0);
        let e = skew(t) * r;

        let candidates = decompose_essential(&e)?;
        let found = candidates.iter().any(|(rc, tc)| {
            assert_relative_eq!(rc.determinant(), 1.0, epsilon = 1e-9);
            tc.dot(t) > 0.99 && rc.abs_diff_eq(r, 1e-9)
        });
        assert!(found);
        Ok(())
    }

    #[test]
    fn test_essential_8point_satisfies_constraint() -> Result<(), GeometryError> {
        let pose = RigPose::from_rotation_translation(
            vector_to_rotation(DVec3::new(0.05, -0.1, 0.02)),
            DVec3::new(0.8, 0.1, 0.2),
        );
        let (x1, x2) = synthetic_views(&pose);
        let e = essential_8point(&x1, &x2)?;
        for (a, b) in x1.iter().zip(x2.iter()) {
            assert!(b.dot(e * *a).abs() < 1e-8);
        }
        let svd = svd3(&e)?;
        assert_relative_eq!(svd.s.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(svd.s.y, 1.0, epsilon = 1e-9);
        assert!(svd.s.z.abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_essential_8point_recovers_pose() -> Result<(), GeometryError> {
        let rotation = vector_to_rotation(DVec3::new(0.05, -0.1, 0.02));
        let translation = DVec3::new(0.8, 0.1, 0.2);
        let pose = RigPose::from_rotation_translation(rotation, translation);
        let (x1, x2) = synthetic_views(&pose);
        let e = essential_8point(&x1, &x2)?;
        let t_dir = translation.normalize();
        let found = poses_from_essential(&e)?.iter().any(|p| {
            p.rotation().abs_diff_eq(rotation, 1e-6) && p.translation().dot(t_dir) > 1.0 - 1e-9
        });
        assert!(found);
        Ok(())
    }

    #[test]
    fn test_essential_8point_too_few_points() {
        let pts = vec![DVec3::Z; 7];
        assert!(matches!(
            essential_8point(&pts, &pts),
            Err(GeometryError::InsufficientCorrespondences { required: 8, actual: 7 })
        ));
    }
}

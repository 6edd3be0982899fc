use glam::{DMat3, DVec3};

use crate::error::GeometryError;
use crate::linalg::{nearest_rotation, null_vector, skew, solve_lstsq, svd3};
use crate::pose::RigPose;

/// Minimum number of 3D-2D correspondences for the linear pose fit.
pub const MIN_PNP_POINTS: usize = 6;

fn check_lengths(points: &[DVec3], image: &[DVec3]) -> Result<(), GeometryError> {
    if points.len() != image.len() {
        return Err(GeometryError::MismatchedArrayLengths {
            left_name: "points",
            left_len: points.len(),
            right_name: "image",
            right_len: image.len(),
        });
    }
    Ok(())
}

/// Fit a camera pose to 3D points and their normalized image observations.
///
/// Solves the 2N x 12 direct linear system for the projection, projects its left 3x3 block
/// onto SO(3) and then refits the translation with the rotation held fixed.
pub fn fit_pose(points: &[DVec3], image: &[DVec3]) -> Result<RigPose, GeometryError> {
    check_lengths(points, image)?;
    if points.len() < MIN_PNP_POINTS {
        return Err(GeometryError::InsufficientCorrespondences {
            required: MIN_PNP_POINTS,
            actual: points.len(),
        });
    }

    let n = points.len();
    let mut a = faer::Mat::<f64>::zeros(2 * n, 12);
    for (i, (p, x)) in points.iter().zip(image.iter()).enumerate() {
        let (u, v) = (x.x / x.z, x.y / x.z);
        let ph = [p.x, p.y, p.z, 1.0];
        for j in 0..4 {
            a.write(2 * i, j, ph[j]);
            a.write(2 * i, 8 + j, -u * ph[j]);
            a.write(2 * i + 1, 4 + j, ph[j]);
            a.write(2 * i + 1, 8 + j, -v * ph[j]);
        }
    }

    let p = null_vector(&a)?;
    let mut m = DMat3::from_cols(
        DVec3::new(p[0], p[4], p[8]),
        DVec3::new(p[1], p[5], p[9]),
        DVec3::new(p[2], p[6], p[10]),
    );
    // the null vector is only defined up to sign
    if m.determinant() < 0.0 {
        m = -m;
    }
    if svd3(&m)?.s.max_element() < 1e-12 {
        return Err(GeometryError::SingularMatrix("projection rotation block"));
    }
    let rotation = nearest_rotation(&m)?;

    let translation = fit_translation(points, image, &rotation)?;
    Ok(RigPose::from_rotation_translation(rotation, translation))
}

/// Least-squares translation for a known rotation, from `[x]x (R X + t) = 0`.
pub fn fit_translation(
    points: &[DVec3],
    image: &[DVec3],
    rotation: &DMat3,
) -> Result<DVec3, GeometryError> {
    check_lengths(points, image)?;
    let n = points.len();
    let mut a = faer::Mat::<f64>::zeros(3 * n, 3);
    let mut b = faer::Mat::<f64>::zeros(3 * n, 1);
    for (i, (p, x)) in points.iter().zip(image.iter()).enumerate() {
        let sx = skew(*x);
        let rhs = -(sx * (*rotation * *p));
        for r in 0..3 {
            let row = sx.row(r);
            a.write(3 * i + r, 0, row.x);
            a.write(3 * i + r, 1, row.y);
            a.write(3 * i + r, 2, row.z);
            b.write(3 * i + r, 0, rhs[r]);
        }
    }
    let t = solve_lstsq(&a, &b)?;
    Ok(DVec3::new(t[0], t[1], t[2]))
}

/// Least-squares scale `s` of a translation `t = s * direction` for a known rotation.
pub fn fit_translation_scale(
    points: &[DVec3],
    image: &[DVec3],
    rotation: &DMat3,
    direction: DVec3,
) -> Result<f64, GeometryError> {
    check_lengths(points, image)?;
    let mut num = 0.0;
    let mut den = 0.0;
    for (p, x) in points.iter().zip(image.iter()) {
        let a = x.cross(*rotation * *p);
        let b = x.cross(direction);
        num += a.dot(b);
        den += b.dot(b);
    }
    if den < 1e-15 {
        return Err(GeometryError::SingularMatrix("translation scale"));
    }
    Ok(-num / den)
}

use faer::prelude::SpSolverLstsq;
use glam::{DMat3, DVec3};

use crate::error::GeometryError;

/// Singular value decomposition of a 3x3 matrix, `m = u * diag(s) * v^T`.
///
/// Singular values are sorted in non-increasing order.
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    /// Left singular vectors as columns.
    pub u: DMat3,
    /// Singular values.
    pub s: DVec3,
    /// Right singular vectors as columns.
    pub v: DMat3,
}

/// Skew-symmetric cross-product matrix so that `skew(a) * b == a.cross(b)`.
pub fn skew(v: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, v.z, -v.y),
        DVec3::new(-v.z, 0.0, v.x),
        DVec3::new(v.y, -v.x, 0.0),
    )
}

pub(crate) fn dmat3_to_faer(m: &DMat3) -> faer::Mat<f64> {
    faer::Mat::<f64>::from_fn(3, 3, |i, j| m.col(j)[i])
}

pub(crate) fn faer_to_dmat3(m: faer::MatRef<'_, f64>) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m.read(0, 0), m.read(1, 0), m.read(2, 0)),
        DVec3::new(m.read(0, 1), m.read(1, 1), m.read(2, 1)),
        DVec3::new(m.read(0, 2), m.read(1, 2), m.read(2, 2)),
    )
}

/// Compute the SVD of a 3x3 matrix.
pub fn svd3(m: &DMat3) -> Result<Svd3, GeometryError> {
    if !m.is_finite() {
        return Err(GeometryError::DegenerateSvd("non-finite 3x3 input"));
    }
    let svd = dmat3_to_faer(m).svd();
    let s = svd.s_diagonal();
    let out = Svd3 {
        u: faer_to_dmat3(svd.u()),
        s: DVec3::new(s.read(0), s.read(1), s.read(2)),
        v: faer_to_dmat3(svd.v()),
    };
    if !(out.u.is_finite() && out.v.is_finite() && out.s.is_finite()) {
        return Err(GeometryError::DegenerateSvd("non-finite 3x3 decomposition"));
    }
    Ok(out)
}

/// Right singular vector associated with the smallest singular value of `a`.
///
/// This is the least-squares solution of `a * x = 0` subject to `|x| = 1`.
pub fn null_vector(a: &faer::Mat<f64>) -> Result<Vec<f64>, GeometryError> {
    let (nrows, ncols) = (a.nrows(), a.ncols());
    if nrows == 0 || ncols == 0 {
        return Err(GeometryError::DegenerateSvd("empty system"));
    }

    // thin decomposition keeps the full V for tall systems
    let col = if nrows >= ncols {
        let svd = a.thin_svd();
        let v = svd.v();
        (0..ncols).map(|i| v.read(i, ncols - 1)).collect::<Vec<_>>()
    } else {
        let svd = a.svd();
        let v = svd.v();
        (0..ncols).map(|i| v.read(i, ncols - 1)).collect::<Vec<_>>()
    };

    if col.iter().any(|x| !x.is_finite()) {
        return Err(GeometryError::DegenerateSvd("non-finite null vector"));
    }
    Ok(col)
}

/// Unit vector `x` minimizing `|m * x|`.
pub fn right_null3(m: &DMat3) -> Result<DVec3, GeometryError> {
    Ok(svd3(m)?.v.z_axis)
}

/// Unit vector `x` minimizing `|m^T * x|`.
pub fn left_null3(m: &DMat3) -> Result<DVec3, GeometryError> {
    Ok(svd3(m)?.u.z_axis)
}

/// Solve the over-determined system `a * x = b` in the least-squares sense.
pub fn solve_lstsq(a: &faer::Mat<f64>, b: &faer::Mat<f64>) -> Result<Vec<f64>, GeometryError> {
    if a.nrows() < a.ncols() {
        return Err(GeometryError::InsufficientCorrespondences {
            required: a.ncols(),
            actual: a.nrows(),
        });
    }
    let x = a.qr().solve_lstsq(b);
    let sol = (0..a.ncols()).map(|i| x.read(i, 0)).collect::<Vec<_>>();
    if sol.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::SingularMatrix("least-squares system"));
    }
    Ok(sol)
}

/// Project a 3x3 matrix onto the closest rotation (Frobenius norm).
pub fn nearest_rotation(m: &DMat3) -> Result<DMat3, GeometryError> {
    let svd = svd3(m)?;
    let mut r = svd.u * svd.v.transpose();
    if r.determinant() < 0.0 {
        let mut u = svd.u;
        u.z_axis = -u.z_axis;
        r = u * svd.v.transpose();
    }
    Ok(r)
}

/// Similarity transform so that the points have zero mean and an average distance of `sqrt(2)`.
///
/// Returns the transformed points and the 3x3 transform `T` with `x' = T * x`.
pub fn normalize_points_2d(points: &[DVec3]) -> (Vec<DVec3>, DMat3) {
    let n = points.len().max(1) as f64;
    let (mut mx, mut my) = (0.0, 0.0);
    for p in points {
        mx += p.x / p.z;
        my += p.y / p.z;
    }
    mx /= n;
    my /= n;

    let mut mean_dist = 0.0;
    for p in points {
        let dx = p.x / p.z - mx;
        let dy = p.y / p.z - my;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;
    let scale = if mean_dist > 0.0 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let normalized = points
        .iter()
        .map(|p| DVec3::new((p.x / p.z - mx) * scale, (p.y / p.z - my) * scale, 1.0))
        .collect();

    // T = [[s,0,-s*mx],[0,s,-s*my],[0,0,1]]
    let t = DMat3::from_cols(
        DVec3::new(scale, 0.0, 0.0),
        DVec3::new(0.0, scale, 0.0),
        DVec3::new(-scale * mx, -scale * my, 1.0),
    );
    (normalized, t)
}

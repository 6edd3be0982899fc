//! Linear trifocal tensor estimation and pose extraction for three views.
//!
//! The tensor is stored as three 3x3 slices `T_i` whose element at row `j`, column `k` is
//! `T_i^{jk}`. Index `j` belongs to the second view and `k` to the third view.

use glam::{DMat3, DVec3};

use crate::error::GeometryError;
use crate::essential::{enforce_essential_constraints, poses_from_essential};
use crate::linalg::{normalize_points_2d, null_vector, right_null3, skew};
use crate::pnp::fit_translation_scale;
use crate::pose::RigPose;
use crate::triangulation::{in_front_of_both, select_by_cheirality, triangulate_point};

/// Minimum number of triple correspondences for the linear solver.
pub const MIN_TRIFOCAL_POINTS: usize = 7;

/// Poses of the second and third view relative to the first view.
#[derive(Debug, Clone, Copy)]
pub struct TrifocalPoses {
    /// First view into second view.
    pub ab: RigPose,
    /// First view into third view, metrically consistent with `ab`.
    pub ac: RigPose,
    /// Correspondences that triangulated in front of the first two views.
    pub inliers: usize,
}

/// Fundamental matrices of a tensor and its first- and second-view points corrected on `F21`.
#[derive(Debug, Clone)]
pub struct CorrectedMatches {
    /// Maps first-view points to epipolar lines of the second view.
    pub f21: DMat3,
    /// Maps first-view points to epipolar lines of the third view.
    pub f31: DMat3,
    /// Corrected first-view points.
    pub x0: Vec<DVec3>,
    /// Corrected second-view points.
    pub x1: Vec<DVec3>,
}

/// A 3x3x3 trifocal tensor.
#[derive(Debug, Clone)]
pub struct TrifocalTensor {
    slices: [DMat3; 3],
    scale: f64,
    points: Option<[Vec<DVec3>; 3]>,
}

fn slice_from_row_major(t: &[f64], offset: usize) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(t[offset], t[offset + 3], t[offset + 6]),
        DVec3::new(t[offset + 1], t[offset + 4], t[offset + 7]),
        DVec3::new(t[offset + 2], t[offset + 5], t[offset + 8]),
    )
}

fn entry(m: &DMat3, row: usize, col: usize) -> f64 {
    m.col(col)[row]
}

impl TrifocalTensor {
    /// Estimate the tensor from triple correspondences in normalized image coordinates.
    ///
    /// Builds the 4N x 27 system of point-point-point trilinearities on Hartley-normalized points
    /// and takes its least-significant right singular vector.
    pub fn from_points(x0: &[DVec3], x1: &[DVec3], x2: &[DVec3]) -> Result<Self, GeometryError> {
        for (name, other) in [("x1", x1), ("x2", x2)] {
            if other.len() != x0.len() {
                return Err(GeometryError::MismatchedArrayLengths {
                    left_name: "x0",
                    left_len: x0.len(),
                    right_name: name,
                    right_len: other.len(),
                });
            }
        }
        if x0.len() < MIN_TRIFOCAL_POINTS {
            return Err(GeometryError::InsufficientCorrespondences {
                required: MIN_TRIFOCAL_POINTS,
                actual: x0.len(),
            });
        }

        let (n0, h0) = normalize_points_2d(x0);
        let (n1, h1) = normalize_points_2d(x1);
        let (n2, h2) = normalize_points_2d(x2);

        let n = x0.len();
        let mut a = faer::Mat::<f64>::zeros(4 * n, 27);
        let idx = |k: usize, j: usize, m: usize| 9 * k + 3 * j + m;
        for p in 0..n {
            let (x, xp, xpp) = (n0[p].to_array(), n1[p].to_array(), n2[p].to_array());
            for i in 0..2 {
                for l in 0..2 {
                    let row = 4 * p + 2 * i + l;
                    for k in 0..3 {
                        let c = idx(k, 2, 2);
                        a.write(row, c, a.read(row, c) + x[k] * xp[i] * xpp[l]);
                        let c = idx(k, i, 2);
                        a.write(row, c, a.read(row, c) - x[k] * xpp[l]);
                        let c = idx(k, 2, l);
                        a.write(row, c, a.read(row, c) - x[k] * xp[i]);
                        let c = idx(k, i, l);
                        a.write(row, c, a.read(row, c) + x[k]);
                    }
                }
            }
        }

        let t = null_vector(&a)?;
        let normalized = [
            slice_from_row_major(&t, 0),
            slice_from_row_major(&t, 9),
            slice_from_row_major(&t, 18),
        ];

        // T_i = sum_r H0[r][i] * H1^-1 * T'_r * H2^-T
        let h1_inv = h1.inverse();
        let h2_inv_t = h2.inverse().transpose();
        if !(h1_inv.is_finite() && h2_inv_t.is_finite()) {
            return Err(GeometryError::SingularMatrix("point normalization"));
        }
        let mut slices = [DMat3::ZERO; 3];
        for (i, slice) in slices.iter_mut().enumerate() {
            let mut acc = DMat3::ZERO;
            for (r, tr) in normalized.iter().enumerate() {
                acc += *tr * entry(&h0, r, i);
            }
            *slice = h1_inv * acc * h2_inv_t;
        }

        Ok(Self {
            slices,
            scale: 1.0,
            points: Some([x0.to_vec(), x1.to_vec(), x2.to_vec()]),
        })
    }

    /// Build the tensor of three views from the projections of the second and third view, the
    /// first view being `[I | 0]`.
    ///
    /// `T_i = a_i b_4^T - a_4 b_i^T`. The ratio `|b_4| / |a_4|` is kept as the tensor scale.
    pub fn from_projections(p1: &RigPose, p2: &RigPose) -> Result<Self, GeometryError> {
        let (a, a4) = (p1.rotation(), p1.translation());
        let (b, b4) = (p2.rotation(), p2.translation());
        if a4.length() < 1e-12 {
            return Err(GeometryError::SingularMatrix("second view has no baseline"));
        }
        let slices = [0, 1, 2].map(|i| {
            outer(a.col(i), b4) - outer(a4, b.col(i))
        });
        Ok(Self {
            slices,
            scale: b4.length() / a4.length(),
            points: None,
        })
    }

    /// The three slices `T_i`.
    pub fn slices(&self) -> &[DMat3; 3] {
        &self.slices
    }

    /// Baseline ratio recorded at construction, 1 for tensors estimated from points.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Contraction `sum_i x^i T_i` with a point of the first view.
    pub fn contract(&self, x: DVec3) -> DMat3 {
        self.slices[0] * x.x + self.slices[1] * x.y + self.slices[2] * x.z
    }

    /// Epipoles `(e', e'')` of the first camera centre in the second and third view.
    pub fn epipoles(&self) -> Result<(DVec3, DVec3), GeometryError> {
        let mut left = [DVec3::ZERO; 3];
        let mut right = [DVec3::ZERO; 3];
        for (i, t) in self.slices.iter().enumerate() {
            left[i] = right_null3(&t.transpose())?;
            right[i] = right_null3(t)?;
        }
        // rows of the stacked matrices are the null vectors
        let e1 = right_null3(&DMat3::from_cols(left[0], left[1], left[2]).transpose())?;
        let e2 = right_null3(&DMat3::from_cols(right[0], right[1], right[2]).transpose())?;
        Ok((e1, e2))
    }

    /// Fundamental matrices `(F21, F31)` with `x1^T F21 x0 = 0` and `x2^T F31 x0 = 0`.
    pub fn fundamental_matrices(&self) -> Result<(DMat3, DMat3), GeometryError> {
        let (e1, e2) = self.epipoles()?;
        let (s1, s2) = (skew(e1), skew(e2));
        let f21 = DMat3::from_cols(
            s1 * (self.slices[0] * e2),
            s1 * (self.slices[1] * e2),
            s1 * (self.slices[2] * e2),
        );
        let f31 = DMat3::from_cols(
            s2 * (self.slices[0].transpose() * e1),
            s2 * (self.slices[1].transpose() * e1),
            s2 * (self.slices[2].transpose() * e1),
        );
        Ok((f21, f31))
    }

    /// Fundamental matrices together with the first- and second-view points moved onto `F21`.
    ///
    /// The correspondences the tensor was estimated from are corrected to first order with
    /// [`correct_matches`]. Fails with [`GeometryError::MissingCorrespondences`] for a tensor
    /// built from projections.
    pub fn fundamental_matrices_corrected(&self) -> Result<CorrectedMatches, GeometryError> {
        let [x0, x1, _] = self
            .points
            .as_ref()
            .ok_or(GeometryError::MissingCorrespondences)?;
        let (f21, f31) = self.fundamental_matrices()?;
        let (x0, x1) = correct_matches(&f21, x0, x1);
        Ok(CorrectedMatches { f21, f31, x0, x1 })
    }

    /// Transfer a point of the first view into the second view through a line of the third view.
    pub fn point_transfer(&self, x: DVec3, line: DVec3) -> DVec3 {
        self.contract(x) * line
    }

    /// Frobenius norm of `[x']x (sum_i x^i T_i) [x'']x`, zero for a consistent triple.
    pub fn point_point_point(&self, x0: DVec3, x1: DVec3, x2: DVec3) -> f64 {
        let m = skew(x1 / x1.z) * self.contract(x0 / x0.z) * skew(x2 / x2.z);
        let cols = m.to_cols_array();
        cols.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Recover the poses of the second and third view relative to the first one.
    ///
    /// Each fundamental matrix is projected onto the essential manifold and decomposed; the
    /// candidate with the most points in front of both views wins. First- and second-view points
    /// are corrected towards `F21` before they are triangulated to fix the translation magnitude
    /// of the third view.
    pub fn extract_poses(&self) -> Result<TrifocalPoses, GeometryError> {
        let [x0, _, x2] = self
            .points
            .as_ref()
            .ok_or(GeometryError::MissingCorrespondences)?;
        let corrected = self.fundamental_matrices_corrected()?;

        let candidates_b = poses_from_essential(&enforce_essential_constraints(&corrected.f21)?)?;
        let candidates_c = poses_from_essential(&enforce_essential_constraints(&corrected.f31)?)?;
        let (ab, inliers) = select_by_cheirality(&candidates_b, &corrected.x0, &corrected.x1)
            .ok_or(GeometryError::DegenerateSvd("no essential candidates"))?;
        let (ac_dir, _) = select_by_cheirality(&candidates_c, x0, x2)
            .ok_or(GeometryError::DegenerateSvd("no essential candidates"))?;

        let (points, image): (Vec<DVec3>, Vec<DVec3>) = corrected
            .x0
            .iter()
            .zip(corrected.x1.iter())
            .zip(x2.iter())
            .filter_map(|((a, b), c)| {
                triangulate_point(*a, *b, &RigPose::IDENTITY, &ab)
                    .filter(|x| in_front_of_both(*x, &ab))
                    .map(|x| (x, *c))
            })
            .unzip();

        let rotation_c = ac_dir.rotation();
        let scale = fit_translation_scale(&points, &image, &rotation_c, ac_dir.translation())?;
        log::debug!(
            "trifocal poses: {inliers} of {} in front, third view scale {scale:.4}",
            x0.len()
        );

        let ac = RigPose::from_rotation_translation(
            rotation_c,
            ac_dir.translation() * scale * self.scale,
        );
        Ok(TrifocalPoses { ab, ac, inliers })
    }
}

fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// First-order (Sampson) correction of correspondences towards `x2^T F x1 = 0`.
pub fn correct_matches(f: &DMat3, x1: &[DVec3], x2: &[DVec3]) -> (Vec<DVec3>, Vec<DVec3>) {
    let ft = f.transpose();
    x1.iter()
        .zip(x2.iter())
        .map(|(a, b)| {
            let (a, b) = (*a / a.z, *b / b.z);
            let l2 = *f * a;
            let l1 = ft * b;
            let err = b.dot(l2);
            let denom = l2.x * l2.x + l2.y * l2.y + l1.x * l1.x + l1.y * l1.y;
            if denom < 1e-15 {
                return (a, b);
            }
            let k = err / denom;
            (
                a - DVec3::new(l1.x, l1.y, 0.0) * k,
                b - DVec3::new(l2.x, l2.y, 0.0) * k,
            )
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::vector_to_rotation;
    use approx::assert_relative_eq;

    struct Scene {
        ab: RigPose,
        ac: RigPose,
        x: [Vec<DVec3>; 3],
    }

    fn scene() -> Scene {
        let ab = RigPose::from_rotation_translation(
            vector_to_rotation(DVec3::new(0.02, 0.05, -0.01)),
            DVec3::new(-0.6, 0.05, 0.1),
        );
        let ac = RigPose::from_rotation_translation(
            vector_to_rotation(DVec3::new(0.03, 0.11, -0.02)),
            DVec3::new(-1.3, 0.1, 0.15),
        );
        let mut x: [Vec<DVec3>; 3] = Default::default();
        for i in 0..30 {
            let fi = i as f64;
            let p = DVec3::new(
                (fi * 0.77).sin() * 3.0,
                (fi * 1.31).cos() * 2.0,
                6.0 + (fi * 0.53).sin() * 3.0,
            );
            for (view, pose) in [RigPose::IDENTITY, ab, ac].iter().enumerate() {
                let q = pose.transform_point(p);
                x[view].push(q / q.z);
            }
        }
        Scene { ab, ac, x }
    }

    #[test]
    fn test_trilinearities_vanish() -> Result<(), GeometryError> {
        let s = scene();
        let tensor = TrifocalTensor::from_points(&s.x[0], &s.x[1], &s.x[2])?;
        let norm = tensor
            .slices()
            .iter()
            .map(|t| t.to_cols_array().iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt();
        for p in 0..s.x[0].len() {
            let r = tensor.point_point_point(s.x[0][p], s.x[1][p], s.x[2][p]);
            assert!(r / norm < 1e-8, "residual {r}");
        }
        Ok(())
    }

    #[test]
    fn test_fundamental_from_projections() -> Result<(), GeometryError> {
        let s = scene();
        let tensor = TrifocalTensor::from_projections(&s.ab, &s.ac)?;
        let (f21, f31) = tensor.fundamental_matrices()?;
        for p in 0..s.x[0].len() {
            assert!(s.x[1][p].dot(f21 * s.x[0][p]).abs() < 1e-9);
            assert!(s.x[2][p].dot(f31 * s.x[0][p]).abs() < 1e-9);
        }
        let expected = s.ac.translation().length() / s.ab.translation().length();
        assert_relative_eq!(tensor.scale(), expected, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_point_transfer() -> Result<(), GeometryError> {
        let s = scene();
        let tensor = TrifocalTensor::from_projections(&s.ab, &s.ac)?;
        // any line through x'' other than the epipolar line works
        let line = s.x[2][3].cross(s.x[2][3] + DVec3::new(0.0, 1.0, 0.0));
        let x1 = tensor.point_transfer(s.x[0][3], line);
        assert_relative_eq!(x1.x / x1.z, s.x[1][3].x, epsilon = 1e-9);
        assert_relative_eq!(x1.y / x1.z, s.x[1][3].y, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_extract_poses_needs_points() -> Result<(), GeometryError> {
        let s = scene();
        let tensor = TrifocalTensor::from_projections(&s.ab, &s.ac)?;
        assert!(matches!(
            tensor.extract_poses(),
            Err(GeometryError::MissingCorrespondences)
        ));
        Ok(())
    }

    #[test]
    fn test_corrected_points_satisfy_f21() -> Result<(), GeometryError> {
        let s = scene();
        let mut x: [Vec<DVec3>; 3] = Default::default();
        for (view, points) in s.x.iter().enumerate() {
            for (i, p) in points.iter().enumerate() {
                let fi = (i + 10 * view) as f64;
                x[view].push(*p + DVec3::new((fi * 1.9).sin() * 1e-3, (fi * 0.7).cos() * 1e-3, 0.0));
            }
        }
        let tensor = TrifocalTensor::from_points(&x[0], &x[1], &x[2])?;
        let corrected = tensor.fundamental_matrices_corrected()?;

        let residual = |a: &[DVec3], b: &[DVec3]| -> f64 {
            a.iter()
                .zip(b)
                .map(|(p, q)| (*q / q.z).dot(corrected.f21 * (*p / p.z)).abs())
                .sum()
        };
        let before = residual(&x[0], &x[1]);
        let after = residual(&corrected.x0, &corrected.x1);
        assert!(after < before * 0.1, "before {before} after {after}");
        assert_eq!(corrected.x0.len(), x[0].len());

        let from_projections = TrifocalTensor::from_projections(&s.ab, &s.ac)?;
        assert!(matches!(
            from_projections.fundamental_matrices_corrected(),
            Err(GeometryError::MissingCorrespondences)
        ));
        Ok(())
    }

    #[test]
    fn test_correct_matches_reduces_error() {
        let s = scene();
        let f = crate::essential::essential_from_pose(&s.ab);
        let noisy: Vec<DVec3> = s.x[1]
            .iter()
            .enumerate()
            .map(|(i, x)| *x + DVec3::new(0.002 * (i as f64).sin(), -0.001, 0.0))
            .collect();
        let before: f64 = s.x[0].iter().zip(&noisy).map(|(a, b)| b.dot(f * *a).abs()).sum();
        let (c0, c1) = correct_matches(&f, &s.x[0], &noisy);
        let after: f64 = c0.iter().zip(&c1).map(|(a, b)| b.dot(f * *a).abs()).sum();
        assert!(after < before * 0.1);
    }
}

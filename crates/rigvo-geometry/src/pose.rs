use std::f64::consts::{FRAC_PI_2, TAU};
use std::ops::Mul;

use glam::{DMat3, DMat4, DQuat, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// A rigid 4x4 transform of the rig or of a single camera.
///
/// A pose `[R | t]` maps points expressed in the frame of the first view into the frame of the
/// second view, `X_b = R * X_a + t`. Poses chain by matrix multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigPose(DMat4);

impl Default for RigPose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigPose {
    /// The identity transform.
    pub const IDENTITY: Self = Self(DMat4::IDENTITY);

    /// Wrap a 4x4 homogeneous matrix.
    ///
    /// PRECONDITION: the bottom row is `[0, 0, 0, 1]`.
    pub fn from_matrix(matrix: DMat4) -> Self {
        debug_assert!(
            matrix.row(3).abs_diff_eq(DVec4::W, 1e-9),
            "pose bottom row must be [0, 0, 0, 1]"
        );
        Self(matrix)
    }

    /// Build a pose from a rotation matrix and a translation vector.
    pub fn from_rotation_translation(rotation: DMat3, translation: DVec3) -> Self {
        Self(DMat4::from_cols(
            rotation.x_axis.extend(0.0),
            rotation.y_axis.extend(0.0),
            rotation.z_axis.extend(0.0),
            translation.extend(1.0),
        ))
    }

    /// Build a pose from a rotation and the position of the second view's centre
    /// expressed in the first view's frame.
    pub fn from_rotation_center(rotation: DMat3, center: DVec3) -> Self {
        Self::from_rotation_translation(rotation, -(rotation * center))
    }

    /// Pad a 3x4 projection (row-major) to 4x4 by appending the unit homogeneous row.
    pub fn from_projection_rows(rows: &[[f64; 4]; 3]) -> Self {
        Self(DMat4::from_cols(
            DVec4::new(rows[0][0], rows[1][0], rows[2][0], 0.0),
            DVec4::new(rows[0][1], rows[1][1], rows[2][1], 0.0),
            DVec4::new(rows[0][2], rows[1][2], rows[2][2], 0.0),
            DVec4::new(rows[0][3], rows[1][3], rows[2][3], 1.0),
        ))
    }

    /// The underlying 4x4 matrix.
    pub fn matrix(&self) -> DMat4 {
        self.0
    }

    /// Top three rows of the matrix.
    pub fn projection_rows(&self) -> [[f64; 4]; 3] {
        let r = |i: usize| self.0.row(i).to_array();
        [r(0), r(1), r(2)]
    }

    /// Rotation block.
    pub fn rotation(&self) -> DMat3 {
        DMat3::from_mat4(self.0)
    }

    /// Translation column.
    pub fn translation(&self) -> DVec3 {
        self.0.w_axis.truncate()
    }

    /// Position of the second view's centre in the first view's frame, `-R^T t`.
    pub fn center(&self) -> DVec3 {
        -(self.rotation().transpose() * self.translation())
    }

    /// Matrix inverse of the transform.
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// Same rotation with the translation scaled by `factor`.
    pub fn with_translation_scale(&self, factor: f64) -> Self {
        Self::from_rotation_translation(self.rotation(), self.translation() * factor)
    }

    /// Same rotation with the translation reversed.
    pub fn with_flipped_translation(&self) -> Self {
        self.with_translation_scale(-1.0)
    }

    /// Whether the bottom row is `[0, 0, 0, 1]` within `eps`.
    pub fn is_homogeneous(&self, eps: f64) -> bool {
        self.0.row(3).abs_diff_eq(DVec4::W, eps)
    }

    /// Apply the transform to a 3D point.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.0.transform_point3(point)
    }

    /// Approximate equality of the matrices.
    pub fn abs_diff_eq(&self, other: &Self, eps: f64) -> bool {
        self.0.abs_diff_eq(other.0, eps)
    }
}

impl Mul for RigPose {
    type Output = RigPose;

    fn mul(self, rhs: Self) -> Self::Output {
        RigPose(self.0 * rhs.0)
    }
}

/// Rotation vector (axis times angle, angle in `[0, pi]`) of a rotation matrix.
pub fn rotation_to_vector(rotation: &DMat3) -> DVec3 {
    let mut q = DQuat::from_mat3(rotation).normalize();
    if q.w < 0.0 {
        q = -q;
    }
    q.to_scaled_axis()
}

/// Rotation matrix of a rotation vector.
pub fn vector_to_rotation(vector: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(vector))
}

/// Spherical coordinates `(azimuth, elevation, magnitude)` of a vector.
///
/// Azimuth is in `[0, 2pi)` measured from +x towards +y, elevation in `[-pi/2, pi/2]`.
pub fn cartesian_to_spherical(v: DVec3) -> (f64, f64, f64) {
    let r = v.length();
    if r <= f64::EPSILON {
        return (0.0, 0.0, 0.0);
    }
    let el = (v.z / r).clamp(-1.0, 1.0).asin();
    let az = v.y.atan2(v.x).rem_euclid(TAU);
    (az, el, r)
}

/// Inverse of [`cartesian_to_spherical`].
pub fn spherical_to_cartesian(azimuth: f64, elevation: f64, magnitude: f64) -> DVec3 {
    DVec3::new(
        magnitude * elevation.cos() * azimuth.cos(),
        magnitude * elevation.cos() * azimuth.sin(),
        magnitude * elevation.sin(),
    )
}

/// Minimal parametrization of a [`RigPose`].
///
/// The genes are `[Rx, Ry, Rz, azimuth, elevation, scale]`: the rotation as a rotation vector
/// and the displacement of the view centre in spherical form. An optional seventh gene carries a
/// self-adaptive mutation step used by the pose refiner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodedPose {
    /// Rotation vector (axis-angle).
    pub rotation: DVec3,
    /// Heading of the displacement, in `[0, 2pi)`.
    pub azimuth: f64,
    /// Elevation of the displacement, in `[-pi/2, pi/2]`.
    pub elevation: f64,
    /// Magnitude of the displacement.
    pub scale: f64,
    /// Mutation step, present in the 7-gene form.
    pub sigma: Option<f64>,
}

impl EncodedPose {
    /// Encode a pose into its 6-gene form.
    pub fn encode(pose: &RigPose) -> Self {
        let (azimuth, elevation, scale) = cartesian_to_spherical(pose.center());
        Self {
            rotation: rotation_to_vector(&pose.rotation()),
            azimuth,
            elevation,
            scale,
            sigma: None,
        }
    }

    /// Encode a pose into its 7-gene form.
    pub fn encode_with_sigma(pose: &RigPose, sigma: f64) -> Self {
        Self::encode(pose).with_sigma(sigma)
    }

    /// Attach a mutation step.
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    /// Drop the mutation step.
    pub fn without_sigma(mut self) -> Self {
        self.sigma = None;
        self
    }

    /// Replace the displacement magnitude.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Decode back into a 4x4 pose.
    pub fn decode(&self) -> RigPose {
        RigPose::from_rotation_center(
            vector_to_rotation(self.rotation),
            self.displacement(),
        )
    }

    /// Displacement of the view centre in Cartesian form.
    pub fn displacement(&self) -> DVec3 {
        spherical_to_cartesian(self.azimuth, self.elevation, self.scale)
    }

    /// The six geometric genes.
    pub fn genes(&self) -> [f64; 6] {
        [
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.azimuth,
            self.elevation,
            self.scale,
        ]
    }

    /// Build from six geometric genes, taken verbatim.
    pub fn from_genes(genes: [f64; 6]) -> Self {
        Self {
            rotation: DVec3::new(genes[0], genes[1], genes[2]),
            azimuth: genes[3],
            elevation: genes[4],
            scale: genes[5],
            sigma: None,
        }
    }

    /// Build from a 6- or 7-component slice.
    pub fn from_slice(values: &[f64]) -> Result<Self, GeometryError> {
        match values.len() {
            6 | 7 => {
                let mut genes = [0.0; 6];
                genes.copy_from_slice(&values[..6]);
                let mut pose = Self::from_genes(genes);
                pose.sigma = values.get(6).copied();
                Ok(pose)
            }
            n => Err(GeometryError::InvalidEncoding(n)),
        }
    }

    /// Flatten into 6 or 7 components.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = self.genes().to_vec();
        if let Some(sigma) = self.sigma {
            out.push(sigma);
        }
        out
    }

    /// Bring the spherical genes back into their canonical ranges.
    ///
    /// Elevations beyond the poles fold over and flip the azimuth; a negative magnitude
    /// flips the direction.
    pub fn canonical(mut self) -> Self {
        let direction = spherical_to_cartesian(self.azimuth, self.elevation, self.scale.signum());
        if self.scale != 0.0 && direction.length() > f64::EPSILON {
            let (az, el, _) = cartesian_to_spherical(direction);
            self.azimuth = az;
            self.elevation = el;
            self.scale = self.scale.abs();
        } else {
            self.azimuth = self.azimuth.rem_euclid(TAU);
            self.elevation = self.elevation.clamp(-FRAC_PI_2, FRAC_PI_2);
        }
        self
    }
}

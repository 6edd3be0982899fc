use std::path::Path;

use glam::{DMat3, DMat4, DVec2, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::pose::RigPose;

/// Calibration of a multi-camera rig.
///
/// `intrinsics[k]` is the 3x3 camera matrix of unit `k`; `extrinsics[k]` maps points from the
/// camera frame of unit `k` into the rig frame, `X_rig = H * X_cam`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigCalibration {
    /// Per-camera intrinsic matrices.
    pub intrinsics: Vec<DMat3>,
    /// Per-camera rig-to-camera transforms (camera frame into rig frame).
    pub extrinsics: Vec<DMat4>,
}

/// Factory calibration of the six-camera panoramic head: focal lengths and principal points.
const DEFAULT_INTRINSICS: [[f64; 4]; 6] = [
    [410.318832, 410.31856, 618.793136, 816.278112],
    [412.314672, 412.31432, 635.074016, 817.876336],
    [407.614592, 407.613376, 636.865344, 792.038112],
    [415.041088, 415.042128, 617.005504, 808.228816],
    [411.028464, 411.027984, 628.136624, 804.117712],
    [408.35256, 408.351888, 620.6128, 816.28296],
];

/// Camera-to-rig transforms as Euler ZYX angles followed by the translation:
/// `[Rx, Ry, Rz, Tx, Ty, Tz]`.
const DEFAULT_EXTRINSICS: [[f64; 6]; 6] = [
    [-1.560195, 1.568134, -1.563117, 0.041786, -0.001909, -0.000328],
    [2.136062, 1.567502, 0.879774, 0.011587, -0.040133, -0.000543],
    [0.706740, 1.568451, -1.809267, -0.035002, -0.022902, 0.000131],
    [1.760194, 1.570313, -2.011164, -0.032845, 0.025595, 0.000190],
    [-0.762114, 1.567740, 0.494800, 0.014474, 0.039348, 0.000549],
    [0.002663, 0.004042, 0.002932, 0.001139, -0.000746, 0.062041],
];

/// Build a camera matrix from focal lengths and principal point.
pub fn camera_matrix(fx: f64, fy: f64, cx: f64, cy: f64) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(fx, 0.0, 0.0),
        DVec3::new(0.0, fy, 0.0),
        DVec3::new(cx, cy, 1.0),
    )
}

/// Camera-to-rig transform from Euler ZYX angles and a translation.
///
/// The rotation is `Rz * Ry * Rx`, post-multiplied by a -90 degree turn about the optical axis
/// so that rectified images are upright.
pub fn euler_zyx_extrinsic(params: &[f64; 6]) -> DMat4 {
    let [rx, ry, rz, tx, ty, tz] = *params;
    let rotation = DMat3::from_rotation_z(rz)
        * DMat3::from_rotation_y(ry)
        * DMat3::from_rotation_x(rx)
        * DMat3::from_rotation_z(-std::f64::consts::FRAC_PI_2);
    RigPose::from_rotation_translation(rotation, DVec3::new(tx, ty, tz)).matrix()
}

impl Default for RigCalibration {
    fn default() -> Self {
        Self {
            intrinsics: DEFAULT_INTRINSICS
                .iter()
                .map(|&[fx, fy, cx, cy]| camera_matrix(fx, fy, cx, cy))
                .collect(),
            extrinsics: DEFAULT_EXTRINSICS.iter().map(euler_zyx_extrinsic).collect(),
        }
    }
}

impl RigCalibration {
    /// Load a calibration from a JSON file.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, GeometryError> {
        let file = std::fs::File::open(path)?;
        let calibration: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        calibration.validate()?;
        Ok(calibration)
    }

    /// Check the camera count and invertibility of every matrix.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let n = self.intrinsics.len();
        if !(5..=6).contains(&n) {
            return Err(GeometryError::InvalidCalibration(format!(
                "expected 5 or 6 cameras, got {n}"
            )));
        }
        if self.extrinsics.len() != n {
            return Err(GeometryError::InvalidCalibration(format!(
                "{n} intrinsic matrices but {} extrinsic matrices",
                self.extrinsics.len()
            )));
        }
        for (id, k) in self.intrinsics.iter().enumerate() {
            if !k.is_finite() || k.determinant().abs() < 1e-12 {
                return Err(GeometryError::InvalidCalibration(format!(
                    "intrinsic matrix of camera {id} is not invertible"
                )));
            }
        }
        for (id, h) in self.extrinsics.iter().enumerate() {
            if !h.is_finite() || h.determinant().abs() < 1e-12 {
                return Err(GeometryError::InvalidCalibration(format!(
                    "extrinsic matrix of camera {id} is not invertible"
                )));
            }
            if !h.row(3).abs_diff_eq(DVec4::W, 1e-9) {
                return Err(GeometryError::InvalidCalibration(format!(
                    "extrinsic matrix of camera {id} is not homogeneous"
                )));
            }
        }
        Ok(())
    }
}

/// One camera unit of the rig.
#[derive(Debug, Clone, Copy)]
pub struct CameraUnit {
    /// Index of the unit on the rig.
    pub id: usize,
    /// Camera matrix.
    pub intrinsic: DMat3,
    /// Inverse camera matrix.
    pub intrinsic_inv: DMat3,
    /// Camera frame into rig frame.
    pub extrinsic: RigPose,
    /// Rig frame into camera frame.
    pub extrinsic_inv: RigPose,
}

/// Fixed per-camera lookup table and the frame conversions built on top of it.
#[derive(Debug, Clone)]
pub struct RigGeometry {
    cameras: Vec<CameraUnit>,
}

impl Default for RigGeometry {
    fn default() -> Self {
        // the factory calibration is known to be valid
        Self::from_validated(RigCalibration::default())
    }
}

impl RigGeometry {
    /// Build the lookup table from a calibration.
    pub fn new(calibration: RigCalibration) -> Result<Self, GeometryError> {
        calibration.validate()?;
        Ok(Self::from_validated(calibration))
    }

    fn from_validated(calibration: RigCalibration) -> Self {
        let cameras = calibration
            .intrinsics
            .iter()
            .zip(calibration.extrinsics.iter())
            .enumerate()
            .map(|(id, (k, h))| {
                let extrinsic = RigPose::from_matrix(*h);
                CameraUnit {
                    id,
                    intrinsic: *k,
                    intrinsic_inv: k.inverse(),
                    extrinsic,
                    extrinsic_inv: extrinsic.inverse(),
                }
            })
            .collect();
        Self { cameras }
    }

    /// Number of camera units.
    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// Lookup a camera unit.
    ///
    /// PRECONDITION: `camera` is a valid index.
    pub fn camera(&self, camera: usize) -> &CameraUnit {
        assert!(
            camera < self.cameras.len(),
            "camera index {camera} out of range (rig has {} cameras)",
            self.cameras.len()
        );
        &self.cameras[camera]
    }

    /// Convert the motion of one camera into the motion of the rig.
    ///
    /// `H = LP[cam] * P * LP[cam]^-1`
    pub fn to_rig_frame(&self, camera: usize, pose: &RigPose) -> RigPose {
        self.to_rig_frame_between(camera, camera, pose)
    }

    /// Rig motion from camera `from` in the first frame to camera `to` in the second frame.
    pub fn to_rig_frame_between(&self, from: usize, to: usize, pose: &RigPose) -> RigPose {
        self.camera(from).extrinsic * *pose * self.camera(to).extrinsic_inv
    }

    /// Convert the motion of the rig into the motion of one camera.
    ///
    /// `P = LP[cam]^-1 * H * LP[cam]`
    pub fn to_camera_frame(&self, camera: usize, pose: &RigPose) -> RigPose {
        self.to_camera_frame_between(camera, camera, pose)
    }

    /// Camera motion from camera `from` in the first frame to camera `to` in the second frame.
    pub fn to_camera_frame_between(&self, from: usize, to: usize, pose: &RigPose) -> RigPose {
        self.camera(from).extrinsic_inv * *pose * self.camera(to).extrinsic
    }

    /// Pixel coordinates to normalized homogeneous coordinates, `K^-1 * [x, y, 1]`.
    pub fn normalize(&self, camera: usize, pixel: DVec2) -> DVec3 {
        let p = self.camera(camera).intrinsic_inv * pixel.extend(1.0);
        p / p.z
    }

    /// Normalize a set of pixel coordinates.
    pub fn normalize_points(&self, camera: usize, pixels: &[DVec2]) -> Vec<DVec3> {
        pixels.iter().map(|p| self.normalize(camera, *p)).collect()
    }

    /// Normalized homogeneous coordinates back to pixels.
    pub fn image_coord(&self, camera: usize, normalized: DVec3) -> DVec2 {
        let p = self.camera(camera).intrinsic * normalized;
        DVec2::new(p.x / p.z, p.y / p.z)
    }

    /// Projection of rig-frame points into a camera, `LP[cam]^-1`.
    pub fn camera_projection(&self, camera: usize) -> RigPose {
        self.camera(camera).extrinsic_inv
    }

    /// Compose a sequence of transforms in the order given.
    pub fn compose<I>(transforms: I) -> RigPose
    where
        I: IntoIterator<Item = RigPose>,
    {
        transforms
            .into_iter()
            .fold(RigPose::IDENTITY, |acc, h| acc * h)
    }

    /// Compose a sequence of transforms prefixed by the camera's inverse extrinsic, producing the
    /// projection of rig points through the chain into that camera.
    pub fn compose_with_camera<I>(&self, transforms: I, camera: usize) -> RigPose
    where
        I: IntoIterator<Item = RigPose>,
    {
        self.camera_projection(camera) * Self::compose(transforms)
    }
}

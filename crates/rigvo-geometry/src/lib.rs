#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the geometry routines.
pub mod error;

/// Essential matrix estimation and decomposition.
pub mod essential;

/// Epipoles and epipolar distances.
pub mod epipolar;

/// Small dense linear algebra helpers.
pub mod linalg;

/// Perspective pose fit from 3D-2D correspondences.
pub mod pnp;

/// Rigid poses and their minimal encoding.
pub mod pose;

/// Camera rig calibration and frame conversions.
pub mod rig;

/// Two-view triangulation and cheirality.
pub mod triangulation;

pub mod trifocal;

pub use error::GeometryError;
pub use pose::{EncodedPose, RigPose};
pub use rig::{CameraUnit, RigCalibration, RigGeometry};
pub use trifocal::{CorrectedMatches, TrifocalPoses, TrifocalTensor};

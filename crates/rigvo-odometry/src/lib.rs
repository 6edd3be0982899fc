#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Pipeline
//!
//! Every submitted frame carries pixel keypoints per camera and the matches that link them to
//! the two previous frames. For each camera of the latest triplet the estimator
//!
//! 1. drops correspondences whose optical flow disagrees with the rest ([`flow`]),
//! 2. solves the trifocal tensor for a starting guess,
//! 3. refines the first motion with a genetic optimizer ([`refiner`]),
//! 4. triangulates and fits the third view to get the second motion,
//! 5. gates the result against the expected scale and accumulates it ([`fusion`]).
//!
//! ```no_run
//! use rigvo_odometry::{FrameInput, OdometryConfig, RigOdometry};
//!
//! let mut vo = RigOdometry::new(OdometryConfig::default())?;
//! # let frames: Vec<FrameInput> = Vec::new();
//! for frame in frames {
//!     if let Some(estimate) = vo.submit(frame) {
//!         println!("{:?} {:?}", estimate.ab, estimate.bc);
//!     }
//! }
//! # Ok::<(), rigvo_odometry::OdometryError>(())
//! ```

/// Estimator configuration.
pub mod config;

/// Error types for the odometry pipeline.
pub mod error;

/// Top-level three-view estimator.
pub mod estimator;

/// Optical-flow consistency filter.
pub mod flow;

/// Temporal fusion of per-camera motion candidates.
pub mod fusion;

/// Heading helpers for the camera ring.
pub mod heading;

/// Injectable random source.
pub mod random;

pub mod refiner;

pub use config::{FlowParams, FusionParams, OdometryConfig, RefinerParams};
pub use error::OdometryError;
pub use estimator::{FrameInput, RigOdometry, TripletEstimate, TripletMatch};
pub use flow::CorrespondenceFilter;
pub use fusion::TemporalFusion;
pub use random::{RandomSource, SeededRandom};
pub use refiner::{PoseRefiner, RefineRequest, Refinement};

use std::path::Path;

use rigvo_geometry::RigCalibration;
use serde::{Deserialize, Serialize};

use crate::error::OdometryError;

/// Parameters of the genetic pose refiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerParams {
    /// Number of individuals in the population.
    pub population_size: usize,
    /// Maximum number of generations.
    pub iterations: usize,
    /// Stop as soon as the best fitness drops below this value.
    pub fitness_stop: f64,
    /// Correspondences drawn for each essential-matrix seed.
    pub seed_sample_size: usize,
    /// Initial mutation step of every individual, in radians.
    pub initial_sigma: f64,
    /// Largest admissible seed rotation about each rig axis, in radians.
    pub max_rotation: f64,
    /// Half width of the admissible heading arc, in radians.
    pub heading_half_arc: f64,
    /// Correspondences closer than this to an epipole are not scored.
    pub epipole_cutoff: f64,
    /// Fraction of the population allowed to breed.
    pub breeder_fraction: f64,
    /// Genes mutated in each child.
    pub mutated_genes: usize,
    /// Spread of the log-normal self-adaptation of the mutation step.
    pub sigma_step: f64,
    /// Factor applied to the best individual's mutation step each generation.
    pub best_sigma_decay: f64,
    /// Give up seeding after this many subset draws.
    pub max_seed_attempts: usize,
    /// Retries without heading bias when the result points the wrong way.
    pub max_heading_retries: usize,
}

impl Default for RefinerParams {
    fn default() -> Self {
        Self {
            population_size: 48,
            iterations: 48,
            fitness_stop: 0.01,
            seed_sample_size: 24,
            initial_sigma: 10f64.to_radians(),
            max_rotation: 22.5f64.to_radians(),
            heading_half_arc: 36f64.to_radians(),
            epipole_cutoff: 0.1,
            breeder_fraction: 0.2,
            mutated_genes: 2,
            sigma_step: 0.2,
            best_sigma_decay: 0.9,
            max_seed_attempts: 2000,
            max_heading_retries: 1,
        }
    }
}

/// Parameters of the optical-flow consistency filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowParams {
    /// Largest angle between the two displacement vectors, in radians.
    pub max_angle: f64,
    /// Width of the accepted length-ratio band, in standard deviations.
    pub scale_band: f64,
    /// Cameras with fewer surviving correspondences are skipped.
    pub min_points: usize,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            max_angle: std::f64::consts::PI / 32.0,
            scale_band: 1.0,
            min_points: 10,
        }
    }
}

/// Parameters of the temporal fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Largest accepted deviation from the expected scale.
    pub scale_tolerance: f64,
    /// Width of the inlier band, in standard deviations.
    pub inlier_band: f64,
    /// Frame slots further than this behind the newest frame are dropped.
    pub max_frames: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            scale_tolerance: 0.25,
            inlier_band: 1.0,
            max_frames: 64,
        }
    }
}

/// Construction-time options of [`crate::RigOdometry`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    /// Rig calibration.
    pub calibration: RigCalibration,
    /// Camera looking along the direction of travel, used to disambiguate the heading.
    pub forward_camera: Option<usize>,
    /// Pose refiner parameters.
    pub refiner: RefinerParams,
    /// Correspondence filter parameters.
    pub flow: FlowParams,
    /// Temporal fusion parameters.
    pub fusion: FusionParams,
    /// Seed of the random source; entropy when unset.
    pub random_seed: Option<u64>,
}

impl OdometryConfig {
    /// Load a configuration from a JSON file. Missing fields take their default value.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, OdometryError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), OdometryError> {
        self.calibration.validate()?;
        let num_cameras = self.calibration.intrinsics.len();
        if let Some(camera) = self.forward_camera {
            if camera >= num_cameras {
                return Err(OdometryError::UnknownCamera {
                    camera,
                    num_cameras,
                });
            }
        }

        let r = &self.refiner;
        let invalid = |msg: &str| Err(OdometryError::InvalidConfig(msg.to_string()));
        if r.population_size < 2 {
            return invalid("population_size must be at least 2");
        }
        if r.seed_sample_size < 8 {
            return invalid("seed_sample_size must be at least 8");
        }
        if !(r.breeder_fraction > 0.0 && r.breeder_fraction <= 1.0) {
            return invalid("breeder_fraction must be in (0, 1]");
        }
        if r.mutated_genes == 0 || r.mutated_genes > 6 {
            return invalid("mutated_genes must be in 1..=6");
        }
        if !(r.initial_sigma > 0.0 && r.max_rotation > 0.0 && r.heading_half_arc > 0.0) {
            return invalid("angles must be positive");
        }
        if self.flow.max_angle <= 0.0 || self.flow.scale_band <= 0.0 {
            return invalid("flow tolerances must be positive");
        }
        if self.fusion.scale_tolerance <= 0.0 || self.fusion.inlier_band <= 0.0 {
            return invalid("fusion tolerances must be positive");
        }
        if self.fusion.max_frames < 2 {
            return invalid("max_frames must be at least 2");
        }
        Ok(())
    }
}

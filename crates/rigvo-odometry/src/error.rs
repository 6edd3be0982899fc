use rigvo_geometry::GeometryError;

/// Errors returned by the odometry pipeline.
#[derive(thiserror::Error, Debug)]
pub enum OdometryError {
    /// A geometric solver failed.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The refiner could not seed a single admissible pose.
    #[error("No admissible seed pose after {attempts} attempts")]
    InsufficientSeeds {
        /// Number of sampling attempts made.
        attempts: usize,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A camera index is outside the rig.
    #[error("Unknown camera {camera}, rig has {num_cameras} cameras")]
    UnknownCamera {
        /// Requested camera index.
        camera: usize,
        /// Number of cameras on the rig.
        num_cameras: usize,
    },

    /// Configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

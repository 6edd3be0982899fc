/// Errors returned by the geometry routines.
#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    /// Not enough correspondences for the requested solver.
    #[error("Solver requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver.
        required: usize,
        /// Actual number of correspondences provided.
        actual: usize,
    },

    /// Two parallel arrays have different lengths.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice.
        left_name: &'static str,
        /// Length of the left-hand slice.
        left_len: usize,
        /// Label for the right-hand slice.
        right_name: &'static str,
        /// Length of the right-hand slice.
        right_len: usize,
    },

    /// A matrix that must be inverted is singular.
    #[error("Singular matrix: {0}")]
    SingularMatrix(&'static str),

    /// A singular value decomposition produced non-finite values.
    #[error("Degenerate SVD: {0}")]
    DegenerateSvd(&'static str),

    /// The tensor was built without point correspondences.
    #[error("Operation requires the tensor to be built from point correspondences")]
    MissingCorrespondences,

    /// A pose vector has an unsupported number of components.
    #[error("Encoded pose must have 6 or 7 components, got {0}")]
    InvalidEncoding(usize),

    /// Rig calibration data is malformed.
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Calibration file could not be read.
    #[error("Failed to read calibration: {0}")]
    Io(#[from] std::io::Error),

    /// Calibration file could not be parsed.
    #[error("Failed to parse calibration: {0}")]
    Json(#[from] serde_json::Error),
}

use thiserror::Error;

/// Failures while turning per-slice contours into a voxel volume.
/// Fatal for the affected structure only; sibling structures in the
/// same run keep processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconstructionError {
    #[error("structure '{name}' has no contours")]
    EmptyStructure { name: String },

    #[error("structure '{name}' spans {slices} distinct slice(s), need at least 2")]
    TooFewSlices { name: String, slices: usize },

    #[error(
        "structure '{name}' has a degenerate contour on slice z={z:.2} \
         ({points} points, area {area:.4} mm^2)"
    )]
    DegenerateContour {
        name: String,
        z: f64,
        points: usize,
        area: f64,
    },
}

/// A required spatial relationship could not be computed.
/// Fatal for the affected target/OAR pair only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("target centroid ({x:.1}, {y:.1}, {z:.1}) lies outside the body surface")]
    CentroidOutsideBody { x: f64, y: f64, z: f64 },

    #[error("ray along {direction} left the body grid without crossing the surface")]
    RayOutOfBounds { direction: &'static str },

    #[error("volume '{name}' contains no voxels")]
    EmptyVolume { name: String },
}

/// Too few contact-angle samples to fit a stable reduction. The run
/// degrades the affected vector to NaN components and records a
/// diagnostic; it does not drop the feature pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("contact profile has {got} sample(s), reduction needs at least {min}")]
pub struct InsufficientDataError {
    pub got: usize,
    pub min: usize,
}

/// Systemic failures that abort a whole structure-set run. Per-structure
/// and per-pair problems never reach this level.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("structure set for patient '{patient_id}' has no body-surface structure")]
    MissingBodySurface { patient_id: String },

    #[error("body-surface reconstruction failed: {0}")]
    BodyReconstruction(#[from] ReconstructionError),

    #[error("structure set for patient '{patient_id}' has no target structures")]
    NoTargets { patient_id: String },
}

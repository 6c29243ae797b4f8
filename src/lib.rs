//! Geometric feature extraction and prescription-template matching for
//! radiotherapy structure sets.
//!
//! The pipeline reconstructs planar RT-STRUCT contours into voxel
//! volumes on a shared world-aligned lattice, measures each target
//! against each organ at risk (overlap, tolerance-band contact area,
//! cardinal body distances, contact-angle profiles), reduces the
//! profiles to fixed-length parameter vectors, and scores the
//! structure names against prescription templates. `entry::run` wires
//! the stages together for one structure set.

pub mod config;
pub mod entry;
pub mod error;
pub mod features;
pub mod io;
pub mod matching;
pub mod reconstruct;
pub mod reduction;
pub mod utils;

pub use config::CoreConfig;
pub use entry::{run, run_with_progress, Diagnostic, RunInput, RunOutput};
pub use error::{GeometryError, InsufficientDataError, ReconstructionError, RunError};
pub use features::{extract, CardinalDistances, ContactPath, FeaturePair};
pub use io::input::{Contour, ContourPoint, Structure, StructureRole};
pub use io::templates::{load_template_library, PrescriptionTemplate, RoiSlot};
pub use io::StructureSet;
pub use matching::{
    confirm_mapping, match_structures, match_template, MappingProvenance, MatchResult,
    SlotMatch, SlotResult, StructureDescriptor, StructureMapping, TemplateCandidate,
};
pub use reconstruct::{reconstruct, Volume};
pub use reduction::{ContactProfileReducer, CosineBasisReducer, MomentReducer};

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tunable parameters for one reconstruction-and-matching run.
///
/// Every threshold that affects geometry or matching lives here so a run
/// is fully reproducible from (structure set, template library, config).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Isotropic in-plane voxel edge length in mm.
    pub voxel_spacing_mm: f64,
    /// Voxel height along z in mm.
    pub voxel_spacing_z_mm: f64,
    /// Slice gaps wider than this are bridged by interpolating between
    /// the bracketing rings instead of extruding the nearest one.
    pub interpolation_threshold_mm: f64,
    /// Ring point count after resampling, used when interpolating
    /// between slices.
    pub ring_resample_points: usize,
    /// Boundary faces count as inter-structure contact when the opposing
    /// solid lies within this band.
    pub contact_tolerance_mm: f64,
    /// Overlap fraction above which an SIB target counts as fully
    /// enclosed by its paired volume.
    pub enclosure_tolerance: f64,
    /// Length of each reduced contact-angle parameter vector.
    pub reduction_output_len: usize,
    /// Minimum number of angle samples the reducer accepts.
    pub min_angle_samples: usize,
    /// Top template score required for a Confident match.
    pub match_confidence_threshold: f64,
    /// Candidates within this margin of the leader are reported together
    /// as Ambiguous.
    pub match_tie_margin: f64,
    /// Scores below this floor are not candidates at all.
    pub match_floor: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            voxel_spacing_mm: 1.0,
            voxel_spacing_z_mm: 1.0,
            interpolation_threshold_mm: 1.5,
            ring_resample_points: 96,
            contact_tolerance_mm: 1.5,
            enclosure_tolerance: 0.98,
            reduction_output_len: 6,
            min_angle_samples: 3,
            match_confidence_threshold: 0.85,
            match_tie_margin: 0.05,
            match_floor: 0.40,
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("failed to parse core config TOML")
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        Self::from_toml_str(&raw)
    }

    /// Same parameters at half the voxel edge length, for
    /// resolution-stability checks.
    pub fn halved_spacing(&self) -> Self {
        CoreConfig {
            voxel_spacing_mm: self.voxel_spacing_mm / 2.0,
            voxel_spacing_z_mm: self.voxel_spacing_z_mm / 2.0,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_default_config_is_sane() {
        let cfg = CoreConfig::default();
        assert!(cfg.voxel_spacing_mm > 0.0);
        assert!(cfg.match_floor < cfg.match_confidence_threshold);
        assert!(cfg.enclosure_tolerance <= 1.0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg = CoreConfig::from_toml_str(
            "voxel_spacing_mm = 0.5\nmatch_confidence_threshold = 0.9\n",
        )
        .unwrap();
        assert_eq!(cfg.voxel_spacing_mm, 0.5);
        assert_eq!(cfg.match_confidence_threshold, 0.9);
        // untouched field keeps its default
        assert_eq!(cfg.reduction_output_len, 6);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(CoreConfig::from_toml_str("voxel_spacing_mm = \"wide\"").is_err());
    }

    #[test]
    fn test_halved_spacing_only_touches_spacing() {
        let cfg = CoreConfig::default();
        let half = cfg.halved_spacing();
        assert_eq!(half.voxel_spacing_mm, cfg.voxel_spacing_mm / 2.0);
        assert_eq!(half.voxel_spacing_z_mm, cfg.voxel_spacing_z_mm / 2.0);
        assert_eq!(half.ring_resample_points, cfg.ring_resample_points);
    }
}

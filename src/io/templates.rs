use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::io::input::StructureRole;

/// One canonical ROI slot of a prescription template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiSlot {
    pub canonical_name: String,
    pub role: StructureRole,
    /// Dose-constraint formula handed to the downstream constraint model,
    /// opaque to this crate (e.g. "D95 >= 60Gy", "V20 <= 30%").
    pub constraint: String,
    /// Plausible reconstructed volume band in cm^3, used only as a
    /// matching tie-breaker.
    #[serde(default)]
    pub volume_range_cc: Option<(f64, f64)>,
    /// Alternate spellings seen in the wild for this slot.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A named, versioned catalog entry mapping canonical ROI names to dose
/// constraints. Immutable once published; a new version is a new entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionTemplate {
    pub name: String,
    pub version: u32,
    pub slots: Vec<RoiSlot>,
}

impl PrescriptionTemplate {
    pub fn slot(&self, canonical_name: &str) -> Option<&RoiSlot> {
        self.slots
            .iter()
            .find(|s| s.canonical_name == canonical_name)
    }

    pub fn target_slots(&self) -> impl Iterator<Item = &RoiSlot> {
        self.slots.iter().filter(|s| s.role.is_target())
    }
}

/// Loads a template library from a JSON array.
pub fn load_template_library<P: AsRef<Path>>(path: P) -> Result<Vec<PrescriptionTemplate>> {
    let file = File::open(&path)
        .with_context(|| format!("failed to open template library {:?}", path.as_ref()))?;
    let templates: Vec<PrescriptionTemplate> = serde_json::from_reader(file)
        .with_context(|| format!("failed to parse template library {:?}", path.as_ref()))?;
    if templates.is_empty() {
        bail!("template library {:?} contains no templates", path.as_ref());
    }
    Ok(templates)
}

pub fn parse_template_library(raw: &str) -> Result<Vec<PrescriptionTemplate>> {
    let templates: Vec<PrescriptionTemplate> =
        serde_json::from_str(raw).context("failed to parse template library JSON")?;
    if templates.is_empty() {
        bail!("template library contains no templates");
    }
    Ok(templates)
}

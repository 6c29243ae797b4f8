pub mod input;
pub mod templates;

use anyhow::{bail, Result};

use input::{Structure, StructureRole};

/// One patient/study's validated structures, as handed over by the
/// upstream DICOM import. The core reads it, never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSet {
    pub patient_id: String,
    pub study_uid: String,
    pub structures: Vec<Structure>,
}

impl StructureSet {
    pub fn new(patient_id: &str, study_uid: &str, structures: Vec<Structure>) -> Result<Self> {
        if structures.is_empty() {
            bail!(
                "structure set for patient '{}' contains no structures",
                patient_id
            );
        }
        Ok(StructureSet {
            patient_id: patient_id.to_string(),
            study_uid: study_uid.to_string(),
            structures,
        })
    }

    /// The body-outline structure, if the import supplied one.
    pub fn body(&self) -> Option<&Structure> {
        self.structures
            .iter()
            .find(|s| s.role == StructureRole::Body)
    }

    pub fn targets(&self) -> Vec<&Structure> {
        self.structures
            .iter()
            .filter(|s| s.role.is_target())
            .collect()
    }

    pub fn oars(&self) -> Vec<&Structure> {
        self.structures
            .iter()
            .filter(|s| s.role == StructureRole::Oar)
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Option<&Structure> {
        self.structures.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod structure_set_tests {
    use super::*;
    use crate::utils::test_utils::generate_sphere_structure;

    #[test]
    fn test_role_accessors() {
        let set = StructureSet::new(
            "pat-001",
            "1.2.840.999.1",
            vec![
                generate_sphere_structure("BODY", StructureRole::Body, (0.0, 0.0, 0.0), 100.0, 10.0, 32),
                generate_sphere_structure("PTV", StructureRole::Target, (0.0, 0.0, 0.0), 20.0, 2.0, 32),
                generate_sphere_structure("PTV_boost", StructureRole::SibTarget, (0.0, 0.0, 0.0), 8.0, 2.0, 32),
                generate_sphere_structure("Rectum", StructureRole::Oar, (0.0, 40.0, 0.0), 15.0, 2.0, 32),
            ],
        )
        .unwrap();

        assert_eq!(set.body().unwrap().name, "BODY");
        assert_eq!(set.targets().len(), 2);
        assert_eq!(set.oars().len(), 1);
        assert!(set.by_name("Rectum").is_some());
        assert!(set.by_name("Femur_L").is_none());
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(StructureSet::new("pat-001", "1.2.840.999.1", vec![]).is_err());
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::config::CoreConfig;
use crate::error::RunError;
use crate::features::{self, FeaturePair};
use crate::io::input::{Structure, StructureRole};
use crate::io::templates::PrescriptionTemplate;
use crate::io::StructureSet;
use crate::matching::{self, MatchResult, StructureDescriptor};
use crate::reconstruct::{reconstruct, Volume};
use crate::reduction::{ContactProfileReducer, CosineBasisReducer};

/// Everything one pipeline run consumes.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub structure_set: StructureSet,
    pub templates: Vec<PrescriptionTemplate>,
    pub config: CoreConfig,
}

/// Non-fatal problem encountered during a run. The run keeps going;
/// the affected structure or pair is simply absent from the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub context: String,
    pub message: String,
}

/// (patient_id, study_uid, target_name, oar_name)
pub type PairKey = (String, String, String, String);

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub pairs: BTreeMap<PairKey, FeaturePair>,
    pub volumes_cc: BTreeMap<String, f64>,
    pub match_result: MatchResult,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn run(input: &RunInput) -> Result<RunOutput, RunError> {
    run_with_progress(input, |_| {})
}

/// Full pipeline for one structure set: body first, then every
/// structure reconstructed, then template matching overlapped with
/// pairwise feature extraction.
///
/// Per-structure and per-pair failures degrade to diagnostics; only a
/// missing or unreconstructable body, or a set with no targets, fails
/// the run as a whole.
pub fn run_with_progress<F>(input: &RunInput, progress: F) -> Result<RunOutput, RunError>
where
    F: Fn(&str) + Sync,
{
    let set = &input.structure_set;
    let config = &input.config;

    let body_structure = set.body().ok_or_else(|| RunError::MissingBodySurface {
        patient_id: set.patient_id.clone(),
    })?;
    progress("reconstructing body surface");
    let body = reconstruct(body_structure, config)?;
    println!(
        "Body surface reconstructed: {:.1} cm3 in {} voxels",
        body.volume_cc(),
        body.voxel_count()
    );

    if set.targets().is_empty() {
        return Err(RunError::NoTargets {
            patient_id: set.patient_id.clone(),
        });
    }

    progress("reconstructing structures");
    let candidates: Vec<&Structure> = set
        .structures
        .iter()
        .filter(|s| s.role != StructureRole::Body)
        .collect();
    let done = AtomicUsize::new(0);
    let reconstructed: Vec<(StructureRole, Result<Volume, String>)> = candidates
        .par_iter()
        .map(|s| {
            let result = reconstruct(s, config).map_err(|e| e.to_string());
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress(&format!(
                "reconstructed {}/{} structures",
                n,
                candidates.len()
            ));
            (s.role, result)
        })
        .collect();

    let mut diagnostics = Vec::new();
    let mut volumes: Vec<(StructureRole, Volume)> = Vec::new();
    for (structure, (role, result)) in candidates.iter().zip(reconstructed) {
        match result {
            Ok(v) => volumes.push((role, v)),
            Err(message) => diagnostics.push(Diagnostic {
                context: structure.name.clone(),
                message,
            }),
        }
    }
    println!(
        "Reconstructed {}/{} structures",
        volumes.len(),
        candidates.len()
    );

    let descriptors: Vec<StructureDescriptor> = set
        .structures
        .iter()
        .filter(|s| s.role != StructureRole::Body)
        .map(|s| StructureDescriptor {
            name: s.name.clone(),
            role: s.role,
            volume_cc: volumes
                .iter()
                .find(|(_, v)| v.name == s.name)
                .map(|(_, v)| v.volume_cc()),
        })
        .collect();

    let reducer = CosineBasisReducer::from_config(config);

    // template scoring only needs names, roles and volumes, so it runs
    // alongside the geometry stage
    let scope_result = crossbeam::thread::scope(|scope| {
        let matching_handle = scope.spawn(|_| {
            progress("matching templates");
            matching::match_structures(&descriptors, &input.templates, config)
        });

        progress("extracting pair features");
        let pair_results = extract_pairs(&volumes, &body, &reducer, config, &progress);

        let match_result = match matching_handle.join() {
            Ok(m) => m,
            Err(_) => MatchResult::NoMatch,
        };
        (pair_results, match_result)
    });
    let (pair_results, match_result) = match scope_result {
        Ok(r) => r,
        Err(_) => (Vec::new(), MatchResult::NoMatch),
    };

    let mut pairs = BTreeMap::new();
    for outcome in pair_results {
        match outcome {
            PairOutcome::Done {
                target,
                oar,
                pair,
                degraded,
            } => {
                for d in degraded {
                    diagnostics.push(d);
                }
                pairs.insert(
                    (
                        set.patient_id.clone(),
                        set.study_uid.clone(),
                        target,
                        oar,
                    ),
                    pair,
                );
            }
            PairOutcome::Failed { context, message } => {
                diagnostics.push(Diagnostic { context, message })
            }
        }
    }
    println!(
        "Extracted {} feature pairs, {} diagnostics",
        pairs.len(),
        diagnostics.len()
    );

    let volumes_cc = volumes
        .iter()
        .map(|(_, v)| (v.name.clone(), v.volume_cc()))
        .collect();

    Ok(RunOutput {
        pairs,
        volumes_cc,
        match_result,
        diagnostics,
    })
}

enum PairOutcome {
    Done {
        target: String,
        oar: String,
        pair: FeaturePair,
        degraded: Vec<Diagnostic>,
    },
    Failed {
        context: String,
        message: String,
    },
}

/// Builds the pairing plan and extracts features in parallel: every
/// target against every OAR, plus every SIB target against every other
/// target so the enclosure contact path gets its enclosing partner.
fn extract_pairs(
    volumes: &[(StructureRole, Volume)],
    body: &Volume,
    reducer: &dyn ContactProfileReducer,
    config: &CoreConfig,
    progress: &(dyn Fn(&str) + Sync),
) -> Vec<PairOutcome> {
    let targets: Vec<&(StructureRole, Volume)> =
        volumes.iter().filter(|(r, _)| r.is_target()).collect();
    let oars: Vec<&Volume> = volumes
        .iter()
        .filter(|(r, _)| *r == StructureRole::Oar)
        .map(|(_, v)| v)
        .collect();

    let mut plan: Vec<(StructureRole, &Volume, &Volume)> = Vec::new();
    for (role, target) in &targets {
        for oar in &oars {
            plan.push((*role, target, *oar));
        }
        if *role == StructureRole::SibTarget {
            for (_, other) in targets.iter().filter(|(_, v)| v.name != target.name) {
                plan.push((*role, target, other));
            }
        }
    }

    let done = AtomicUsize::new(0);
    plan.par_iter()
        .map(|(role, target, oar)| {
            let outcome = match features::extract(target, *role, oar, body, config) {
                Ok(mut pair) => {
                    let mut degraded = Vec::new();
                    let axial = reduce_or_nan(reducer, &pair.axial_profile, "axial", &pair, &mut degraded);
                    let sagittal =
                        reduce_or_nan(reducer, &pair.sagittal_profile, "sagittal", &pair, &mut degraded);
                    pair.attach_reduced(axial, sagittal);
                    PairOutcome::Done {
                        target: target.name.clone(),
                        oar: oar.name.clone(),
                        pair,
                        degraded,
                    }
                }
                Err(e) => PairOutcome::Failed {
                    context: format!("{} vs {}", target.name, oar.name),
                    message: e.to_string(),
                },
            };
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress(&format!("extracted {}/{} pairs", n, plan.len()));
            outcome
        })
        .collect()
}

/// Reduces one profile, degrading to an all-NaN vector of the fixed
/// output length when the profile carries too few samples.
fn reduce_or_nan(
    reducer: &dyn ContactProfileReducer,
    profile: &[f64],
    plane: &str,
    pair: &FeaturePair,
    degraded: &mut Vec<Diagnostic>,
) -> Vec<f64> {
    match reducer.reduce(profile) {
        Ok(params) => params,
        Err(e) => {
            degraded.push(Diagnostic {
                context: format!("{} vs {}", pair.target_name, pair.oar_name),
                message: format!("{} profile not reduced: {}", plane, e),
            });
            vec![f64::NAN; reducer.output_len()]
        }
    }
}

#[cfg(test)]
mod run_tests {
    use super::*;
    use crate::features::ContactPath;
    use crate::matching::MatchResult;
    use crate::utils::test_utils::{
        generate_body_structure, generate_sphere_structure, head_neck_template,
        prostate_template,
    };
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn prostate_input() -> RunInput {
        // 45 cm3 target sphere and two well-separated OAR spheres
        // inside a radius-100 body cylinder
        let r_ptv = (3.0 * 45_000.0 / (4.0 * std::f64::consts::PI)).cbrt();
        let structures = vec![
            generate_body_structure((0.0, 0.0, 30.0), 100.0, 60.0, 2.0),
            generate_sphere_structure(
                "PTV",
                StructureRole::Target,
                (0.0, 0.0, 30.0),
                r_ptv,
                1.0,
                96,
            ),
            generate_sphere_structure(
                "Rectum",
                StructureRole::Oar,
                (0.0, 60.0, 30.0),
                20.0,
                1.0,
                96,
            ),
            generate_sphere_structure(
                "Bladder",
                StructureRole::Oar,
                (0.0, -60.0, 30.0),
                18.0,
                1.0,
                96,
            ),
        ];
        RunInput {
            structure_set: StructureSet::new("pat-001", "1.2.840.999.1", structures).unwrap(),
            templates: vec![prostate_template()],
            config: CoreConfig::default(),
        }
    }

    #[test]
    fn test_prostate_run_end_to_end() {
        let input = prostate_input();
        let output = run(&input).unwrap();

        let key = (
            "pat-001".to_string(),
            "1.2.840.999.1".to_string(),
            "PTV".to_string(),
            "Rectum".to_string(),
        );
        let pair = output.pairs.get(&key).expect("PTV vs Rectum pair missing");

        assert_relative_eq!(pair.target_volume_mm3, 45_000.0, epsilon = 1500.0);
        assert_eq!(pair.overlap_fraction, 0.0);
        assert_eq!(pair.contact_area_mm2, 0.0);
        assert_eq!(pair.contact_path, ContactPath::Standard);
        for d in [
            pair.cardinal_distances.anterior,
            pair.cardinal_distances.posterior,
            pair.cardinal_distances.left,
            pair.cardinal_distances.right,
        ] {
            assert!(d.is_finite() && d > 0.0);
        }

        // no contact means no profile; the parameters degrade to NaN
        // of the fixed length and the run reports it
        assert_eq!(pair.axial_params.len(), input.config.reduction_output_len);
        assert!(pair.axial_params.iter().all(|p| p.is_nan()));
        assert!(pair.sagittal_params.iter().all(|p| p.is_nan()));
        assert!(!output.diagnostics.is_empty());

        match &output.match_result {
            MatchResult::Confident { template, mapping } => {
                assert_eq!(template, "Prostate 60/20");
                assert_eq!(mapping.get("PTV").unwrap().0, "PTV");
                assert_eq!(mapping.get("Rectum").unwrap().0, "Rectum");
                assert_eq!(mapping.get("Bladder").unwrap().0, "Bladder");
            }
            other => panic!("expected Confident template match, got {:?}", other),
        }

        assert!(output.volumes_cc.contains_key("PTV"));
        assert_relative_eq!(output.volumes_cc["PTV"], 45.0, epsilon = 1.5);
    }

    #[test]
    fn test_sib_run_uses_enclosure_contact() {
        // 8 cm3 boost placed off-center inside a 60 cm3 target so it
        // sits close to the enclosing shell on one side
        let r_low = (3.0 * 60_000.0 / (4.0 * std::f64::consts::PI)).cbrt();
        let r_high = (3.0 * 8_000.0 / (4.0 * std::f64::consts::PI)).cbrt();
        let structures = vec![
            generate_body_structure((0.0, 0.0, 30.0), 100.0, 70.0, 2.0),
            generate_sphere_structure(
                "PTV_low",
                StructureRole::Target,
                (0.0, 0.0, 30.0),
                r_low,
                1.0,
                96,
            ),
            generate_sphere_structure(
                "PTV_high",
                StructureRole::SibTarget,
                (10.5, 0.0, 30.0),
                r_high,
                1.0,
                96,
            ),
        ];
        let input = RunInput {
            structure_set: StructureSet::new("pat-002", "1.2.840.999.2", structures).unwrap(),
            templates: vec![head_neck_template()],
            config: CoreConfig {
                contact_tolerance_mm: 2.0,
                ..CoreConfig::default()
            },
        };
        let output = run(&input).unwrap();

        let key = (
            "pat-002".to_string(),
            "1.2.840.999.2".to_string(),
            "PTV_high".to_string(),
            "PTV_low".to_string(),
        );
        let pair = output
            .pairs
            .get(&key)
            .expect("SIB vs enclosing pair missing");

        assert!(pair.overlap_fraction >= 0.98);
        assert_eq!(pair.contact_path, ContactPath::SibEnclosure);
        // contact is the near-tangent patch of the enclosing shell:
        // present, but far below the boost's own full surface
        assert!(pair.contact_area_mm2 > 0.0);
        assert!(pair.contact_area_mm2 < 900.0);

        // the patch spans enough slices for a real axial reduction
        assert!(pair.axial_profile.len() >= 3);
        assert!(pair.axial_params.iter().all(|p| p.is_finite()));

        // only two of five head-and-neck slots covered: the template
        // stays a review candidate with a partial mapping
        match &output.match_result {
            MatchResult::Ambiguous { candidates } => {
                assert_eq!(candidates.len(), 1);
                let c = &candidates[0];
                assert_eq!(c.template, "Head and Neck 70/54");
                assert_eq!(c.mapping.get("PTV_high").unwrap().0, "PTV_high");
                assert_eq!(c.mapping.get("PTV_low").unwrap().0, "PTV_low");
                assert!(c.mapping.get("SpinalCord").is_none());
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_body_fails_the_run() {
        let mut input = prostate_input();
        input
            .structure_set
            .structures
            .retain(|s| s.role != StructureRole::Body);
        match run(&input) {
            Err(RunError::MissingBodySurface { patient_id }) => {
                assert_eq!(patient_id, "pat-001")
            }
            other => panic!("expected MissingBodySurface, got {:?}", other),
        }
    }

    #[test]
    fn test_no_targets_fails_the_run() {
        let mut input = prostate_input();
        input
            .structure_set
            .structures
            .retain(|s| !s.role.is_target());
        match run(&input) {
            Err(RunError::NoTargets { .. }) => {}
            other => panic!("expected NoTargets, got {:?}", other),
        }
    }

    #[test]
    fn test_broken_structure_degrades_not_fails() {
        let mut input = prostate_input();
        // single-slice OAR cannot be reconstructed
        if let Some(s) = input
            .structure_set
            .structures
            .iter_mut()
            .find(|s| s.name == "Rectum")
        {
            s.contours.truncate(1);
        }
        let output = run(&input).unwrap();
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.context == "Rectum"));
        assert!(!output.volumes_cc.contains_key("Rectum"));

        // the failed structure yields no pairs; the healthy OAR still does
        assert!(!output
            .pairs
            .keys()
            .any(|(_, _, _, oar)| oar == "Rectum"));
        assert!(output
            .pairs
            .keys()
            .any(|(_, _, target, oar)| target == "PTV" && oar == "Bladder"));
    }

    #[test]
    fn test_progress_reports_every_stage() {
        let input = prostate_input();
        let stages: Mutex<Vec<String>> = Mutex::new(Vec::new());
        run_with_progress(&input, |stage| {
            stages.lock().unwrap().push(stage.to_string());
        })
        .unwrap();
        let stages = stages.into_inner().unwrap();
        for expected in [
            "reconstructing body surface",
            "reconstructing structures",
            "matching templates",
            "extracting pair features",
        ] {
            assert!(stages.iter().any(|s| s == expected), "missing {}", expected);
        }
    }
}

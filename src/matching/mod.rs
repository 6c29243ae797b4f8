use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};

use crate::config::CoreConfig;
use crate::io::input::StructureRole;
use crate::io::templates::{PrescriptionTemplate, RoiSlot};
use crate::utils::{name_similarity, normalize_roi_name};

/// The matcher's view of one plan structure: enough to score a name
/// against a slot and break volume ties, without holding contours.
#[derive(Debug, Clone)]
pub struct StructureDescriptor {
    pub name: String,
    pub role: StructureRole,
    /// Reconstructed volume in cm^3, when reconstruction succeeded.
    pub volume_cc: Option<f64>,
}

/// Outcome for a single template slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotResult {
    /// One structure cleared the confidence threshold with a clear
    /// margin over the runner-up (or won the volume tie-break).
    Confident { structure: String, score: f64 },
    /// Candidates exist but none can be picked automatically; listed
    /// best-first for review.
    Ambiguous { candidates: Vec<(String, f64)> },
    /// No compatible structure scored above the floor.
    NoMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotMatch {
    pub slot: String,
    pub result: SlotResult,
}

/// One template scored against the structure set: overall score, the
/// per-slot detail, and the partial mapping its confident slots imply.
#[derive(Debug, Clone)]
pub struct TemplateCandidate {
    pub template: String,
    pub version: u32,
    pub score: f64,
    pub slots: Vec<SlotMatch>,
    pub mapping: StructureMapping,
}

/// Decision across the whole template library.
#[derive(Debug, Clone)]
pub enum MatchResult {
    /// Exactly one template fits: score above the confidence threshold
    /// with a clear lead (or a volume-band tie-break singled it out).
    Confident {
        template: String,
        mapping: StructureMapping,
    },
    /// Review needed; candidates ordered best-first, each carrying the
    /// partial mapping a reviewer would start from.
    Ambiguous { candidates: Vec<TemplateCandidate> },
    /// Nothing in the library scored above the floor.
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingProvenance {
    Auto,
    UserConfirmed,
}

/// Slot-to-structure assignments with provenance. Automatic results
/// fill empty slots only; a user-confirmed entry is never replaced by
/// a later automatic pass.
#[derive(Debug, Clone, Default)]
pub struct StructureMapping {
    entries: BTreeMap<String, (String, MappingProvenance)>,
}

impl StructureMapping {
    pub fn get(&self, slot: &str) -> Option<(&str, MappingProvenance)> {
        self.entries
            .get(slot)
            .map(|(name, prov)| (name.as_str(), *prov))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, MappingProvenance)> {
        self.entries
            .iter()
            .map(|(slot, (name, prov))| (slot.as_str(), name.as_str(), *prov))
    }

    /// Absorbs confident automatic slot results, leaving confirmed
    /// entries untouched.
    pub fn absorb_auto(&mut self, matches: &[SlotMatch]) {
        for m in matches {
            if let SlotResult::Confident { structure, .. } = &m.result {
                self.entries
                    .entry(m.slot.clone())
                    .or_insert_with(|| (structure.clone(), MappingProvenance::Auto));
            }
        }
    }

    /// Records a reviewer's decision for one slot. Overwrites automatic
    /// entries, errors on a conflicting confirmed one.
    pub fn confirm(&mut self, slot: &str, structure: &str) -> Result<()> {
        if let Some((existing, MappingProvenance::UserConfirmed)) = self.entries.get(slot) {
            if existing != structure {
                bail!(
                    "slot '{}' already confirmed as '{}', refusing to overwrite with '{}'",
                    slot,
                    existing,
                    structure
                );
            }
        }
        self.entries.insert(
            slot.to_string(),
            (structure.to_string(), MappingProvenance::UserConfirmed),
        );
        Ok(())
    }
}

/// Builds a final mapping from one candidate's slot results plus
/// reviewer confirmations. Confirmations are applied first so an
/// automatic match can never displace one. The result is a new value;
/// re-matching afterwards produces a fresh mapping rather than editing
/// this one.
pub fn confirm_mapping(
    matches: &[SlotMatch],
    confirmations: &[(String, String)],
) -> Result<StructureMapping> {
    let mut mapping = StructureMapping::default();
    for (slot, structure) in confirmations {
        mapping.confirm(slot, structure)?;
    }
    mapping.absorb_auto(matches);
    Ok(mapping)
}

/// A structure may fill a slot only when their roles agree: target
/// structures (boost targets included) go to target slots, OARs to OAR
/// slots. The body surface never fills a slot.
fn roles_compatible(structure: StructureRole, slot: StructureRole) -> bool {
    match slot {
        StructureRole::Target | StructureRole::SibTarget => structure.is_target(),
        StructureRole::Oar => structure == StructureRole::Oar,
        StructureRole::Body => false,
    }
}

/// Similarity of a structure name against a slot: best of the canonical
/// name and every alias, on normalized forms. Exact normalized equality
/// scores 1.0 outright.
fn slot_score(structure_name: &str, slot: &RoiSlot) -> f64 {
    let norm = normalize_roi_name(structure_name);
    let mut best = 0.0f64;
    for candidate in std::iter::once(slot.canonical_name.as_str())
        .chain(slot.aliases.iter().map(String::as_str))
    {
        let cand = normalize_roi_name(candidate);
        if cand == norm {
            return 1.0;
        }
        best = best.max(name_similarity(&norm, &cand));
    }
    best
}

fn volume_in_range(volume_cc: Option<f64>, range: (f64, f64)) -> bool {
    match volume_cc {
        Some(v) => v >= range.0 && v <= range.1,
        None => false,
    }
}

/// Scores one template's slots against the structures.
///
/// Name similarity scores every compatible (structure, slot) pair;
/// assignment is greedy best-score-first so no structure fills two
/// slots. A slot's winner is Confident only when it clears the
/// confidence threshold and leads the runner-up by the tie margin, or
/// when the slot's volume band singles it out among the tied
/// candidates.
pub fn match_template(
    structures: &[StructureDescriptor],
    template: &PrescriptionTemplate,
    config: &CoreConfig,
) -> Vec<SlotMatch> {
    // per-slot candidate lists above the floor, best first
    let mut candidates: Vec<Vec<(usize, f64)>> = Vec::with_capacity(template.slots.len());
    for slot in &template.slots {
        let mut scored: Vec<(usize, f64)> = structures
            .iter()
            .enumerate()
            .filter(|(_, s)| roles_compatible(s.role, slot.role))
            .map(|(i, s)| (i, slot_score(&s.name, slot)))
            .filter(|(_, score)| *score >= config.match_floor)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| structures[a.0].name.cmp(&structures[b.0].name))
        });
        candidates.push(scored);
    }

    // global greedy assignment, best pair first; ties broken by slot
    // order then structure name so reruns are reproducible
    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for (slot_idx, scored) in candidates.iter().enumerate() {
        for (struct_idx, score) in scored {
            pairs.push((*score, slot_idx, *struct_idx));
        }
    }
    pairs.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| structures[a.2].name.cmp(&structures[b.2].name))
    });

    let mut slot_winner: Vec<Option<usize>> = vec![None; template.slots.len()];
    let mut taken: BTreeSet<usize> = BTreeSet::new();
    for (_, slot_idx, struct_idx) in &pairs {
        if slot_winner[*slot_idx].is_none() && !taken.contains(struct_idx) {
            slot_winner[*slot_idx] = Some(*struct_idx);
            taken.insert(*struct_idx);
        }
    }

    template
        .slots
        .iter()
        .enumerate()
        .map(|(slot_idx, slot)| {
            let result = classify_slot(
                slot,
                slot_winner[slot_idx],
                &candidates[slot_idx],
                &slot_winner,
                slot_idx,
                structures,
                config,
            );
            SlotMatch {
                slot: slot.canonical_name.clone(),
                result,
            }
        })
        .collect()
}

fn classify_slot(
    slot: &RoiSlot,
    winner: Option<usize>,
    scored: &[(usize, f64)],
    slot_winner: &[Option<usize>],
    slot_idx: usize,
    structures: &[StructureDescriptor],
    config: &CoreConfig,
) -> SlotResult {
    let winner = match winner {
        Some(w) => w,
        None => return SlotResult::NoMatch,
    };
    let best_score = scored
        .iter()
        .find(|(i, _)| *i == winner)
        .map(|(_, s)| *s)
        .unwrap_or(0.0);

    // contenders: candidates of this slot not claimed by another slot
    let contenders: Vec<(usize, f64)> = scored
        .iter()
        .filter(|(i, _)| {
            *i == winner
                || !slot_winner
                    .iter()
                    .enumerate()
                    .any(|(s, w)| s != slot_idx && *w == Some(*i))
        })
        .copied()
        .collect();

    let runner_up = contenders
        .iter()
        .filter(|(i, _)| *i != winner)
        .map(|(_, s)| *s)
        .fold(0.0f64, f64::max);

    if best_score >= config.match_confidence_threshold
        && best_score - runner_up >= config.match_tie_margin
    {
        return SlotResult::Confident {
            structure: structures[winner].name.clone(),
            score: best_score,
        };
    }

    let tied: Vec<(usize, f64)> = contenders
        .iter()
        .filter(|(_, s)| best_score - *s < config.match_tie_margin)
        .copied()
        .collect();

    // a volume band can settle a name tie, but only an unambiguous one
    if best_score >= config.match_confidence_threshold {
        if let Some(range) = slot.volume_range_cc {
            let in_band: Vec<&(usize, f64)> = tied
                .iter()
                .filter(|(i, _)| volume_in_range(structures[*i].volume_cc, range))
                .collect();
            if let [only] = in_band.as_slice() {
                return SlotResult::Confident {
                    structure: structures[only.0].name.clone(),
                    score: only.1,
                };
            }
        }
    }

    SlotResult::Ambiguous {
        candidates: tied
            .iter()
            .map(|(i, s)| (structures[*i].name.clone(), *s))
            .collect(),
    }
}

/// Scores one template as a whole: mean of its slots' best scores, with
/// unfilled slots contributing zero. A template only reaches a high
/// score when the set covers it.
fn score_candidate(
    structures: &[StructureDescriptor],
    template: &PrescriptionTemplate,
    config: &CoreConfig,
) -> TemplateCandidate {
    let slots = match_template(structures, template, config);
    let total: f64 = slots
        .iter()
        .map(|m| match &m.result {
            SlotResult::Confident { score, .. } => *score,
            SlotResult::Ambiguous { candidates } => {
                candidates.first().map(|(_, s)| *s).unwrap_or(0.0)
            }
            SlotResult::NoMatch => 0.0,
        })
        .sum();
    let score = if slots.is_empty() {
        0.0
    } else {
        total / slots.len() as f64
    };
    let mut mapping = StructureMapping::default();
    mapping.absorb_auto(&slots);
    TemplateCandidate {
        template: template.name.clone(),
        version: template.version,
        score,
        slots,
        mapping,
    }
}

/// Number of slots whose assigned structure falls inside the slot's
/// volume band; the geometric plausibility signal for template-level
/// ties.
fn volume_band_hits(candidate: &TemplateCandidate, structures: &[StructureDescriptor], template: &PrescriptionTemplate) -> usize {
    template
        .slots
        .iter()
        .filter(|slot| {
            let range = match slot.volume_range_cc {
                Some(r) => r,
                None => return false,
            };
            let assigned = candidate
                .slots
                .iter()
                .find(|m| m.slot == slot.canonical_name)
                .and_then(|m| match &m.result {
                    SlotResult::Confident { structure, .. } => Some(structure),
                    _ => None,
                });
            match assigned {
                Some(name) => structures
                    .iter()
                    .find(|s| &s.name == name)
                    .map(|s| volume_in_range(s.volume_cc, range))
                    .unwrap_or(false),
                None => false,
            }
        })
        .count()
}

/// Decides which template from the library fits the structure set.
///
/// Templates are scored independently; the best one wins outright when
/// it clears the confidence threshold with a clear lead. Templates tied
/// on name score are separated by volume-band plausibility when that
/// singles one out; otherwise everything above the floor is handed back
/// for review, best first.
pub fn match_structures(
    structures: &[StructureDescriptor],
    templates: &[PrescriptionTemplate],
    config: &CoreConfig,
) -> MatchResult {
    let mut candidates: Vec<(usize, TemplateCandidate)> = templates
        .iter()
        .enumerate()
        .map(|(i, t)| (i, score_candidate(structures, t, config)))
        .filter(|(_, c)| c.score >= config.match_floor)
        .collect();
    if candidates.is_empty() {
        return MatchResult::NoMatch;
    }
    candidates.sort_by(|a, b| {
        b.1.score
            .partial_cmp(&a.1.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.template.cmp(&b.1.template))
    });

    let best_score = candidates[0].1.score;
    if best_score >= config.match_confidence_threshold {
        let tied: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, (_, c))| best_score - c.score < config.match_tie_margin)
            .map(|(pos, _)| pos)
            .collect();
        if tied.len() == 1 {
            let (_, winner) = candidates.swap_remove(0);
            return MatchResult::Confident {
                template: winner.template,
                mapping: winner.mapping,
            };
        }

        // geometric plausibility as the template-level tie-breaker
        let hits: Vec<usize> = tied
            .iter()
            .map(|&pos| {
                let (tpl_idx, cand) = &candidates[pos];
                volume_band_hits(cand, structures, &templates[*tpl_idx])
            })
            .collect();
        let max_hits = hits.iter().copied().max().unwrap_or(0);
        if max_hits > 0 && hits.iter().filter(|&&h| h == max_hits).count() == 1 {
            let pos = tied[hits.iter().position(|&h| h == max_hits).unwrap_or(0)];
            let (_, winner) = candidates.swap_remove(pos);
            return MatchResult::Confident {
                template: winner.template,
                mapping: winner.mapping,
            };
        }
    }

    MatchResult::Ambiguous {
        candidates: candidates.into_iter().map(|(_, c)| c).collect(),
    }
}

#[cfg(test)]
mod matching_tests {
    use super::*;
    use crate::utils::test_utils::{head_neck_template, prostate_template};

    fn descriptor(name: &str, role: StructureRole, volume_cc: Option<f64>) -> StructureDescriptor {
        StructureDescriptor {
            name: name.to_string(),
            role,
            volume_cc,
        }
    }

    fn default_config() -> CoreConfig {
        CoreConfig::default()
    }

    fn prostate_structures() -> Vec<StructureDescriptor> {
        vec![
            descriptor("PTV", StructureRole::Target, Some(60.0)),
            descriptor("rectum", StructureRole::Oar, Some(55.0)),
            descriptor("BLADDER", StructureRole::Oar, Some(200.0)),
        ]
    }

    #[test]
    fn test_exact_names_match_slots_confidently() {
        let template = prostate_template();
        let matches = match_template(&prostate_structures(), &template, &default_config());

        for m in &matches {
            match &m.result {
                SlotResult::Confident { score, .. } => assert_eq!(*score, 1.0),
                other => panic!("slot {} not confident: {:?}", m.slot, other),
            }
        }
        let ptv = matches.iter().find(|m| m.slot == "PTV").unwrap();
        assert_eq!(
            ptv.result,
            SlotResult::Confident {
                structure: "PTV".to_string(),
                score: 1.0
            }
        );
    }

    #[test]
    fn test_separators_and_case_are_ignored() {
        let template = prostate_template();
        let structures = vec![
            descriptor("ptv ", StructureRole::Target, None),
            descriptor("Rect_um", StructureRole::Oar, None),
            descriptor("blad-der", StructureRole::Oar, None),
        ];
        let matches = match_template(&structures, &template, &default_config());
        for m in &matches {
            assert!(
                matches!(m.result, SlotResult::Confident { score, .. } if score == 1.0),
                "slot {} should match exactly after normalization",
                m.slot
            );
        }
    }

    #[test]
    fn test_role_mismatch_is_a_hard_constraint() {
        let template = prostate_template();
        // perfect name, wrong role
        let structures = vec![descriptor("Rectum", StructureRole::Target, None)];
        let matches = match_template(&structures, &template, &default_config());
        let rectum = matches.iter().find(|m| m.slot == "Rectum").unwrap();
        assert_eq!(rectum.result, SlotResult::NoMatch);
    }

    #[test]
    fn test_equal_slot_scores_are_ambiguous() {
        let template = prostate_template();
        let structures = vec![
            descriptor("PTV1", StructureRole::Target, None),
            descriptor("PTV2", StructureRole::Target, None),
        ];
        let matches = match_template(&structures, &template, &default_config());
        let ptv = matches.iter().find(|m| m.slot == "PTV").unwrap();
        match &ptv.result {
            SlotResult::Ambiguous { candidates } => {
                assert_eq!(candidates.len(), 2);
                assert!((candidates[0].1 - candidates[1].1).abs() < 1e-12);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_volume_band_settles_a_slot_tie() {
        let mut template = prostate_template();
        let slot = template
            .slots
            .iter_mut()
            .find(|s| s.canonical_name == "PTV")
            .unwrap();
        slot.volume_range_cc = Some((40.0, 80.0));
        slot.aliases = vec!["PTVA".to_string(), "PTVB".to_string()];

        let structures = vec![
            descriptor("PTV_A", StructureRole::Target, Some(60.0)),
            descriptor("PTV_B", StructureRole::Target, Some(500.0)),
        ];
        let matches = match_template(&structures, &template, &default_config());
        let ptv = matches.iter().find(|m| m.slot == "PTV").unwrap();
        assert_eq!(
            ptv.result,
            SlotResult::Confident {
                structure: "PTV_A".to_string(),
                score: 1.0
            }
        );
    }

    #[test]
    fn test_garbage_names_do_not_match() {
        let structures = vec![
            descriptor("Couch", StructureRole::Oar, None),
            descriptor("Dose shell 3mm", StructureRole::Target, None),
        ];
        let matches = match_template(&structures, &prostate_template(), &default_config());
        for m in &matches {
            assert_eq!(m.result, SlotResult::NoMatch, "slot {}", m.slot);
        }
        let result = match_structures(
            &structures,
            &[prostate_template(), head_neck_template()],
            &default_config(),
        );
        assert!(matches!(result, MatchResult::NoMatch));
    }

    #[test]
    fn test_no_structure_fills_two_slots() {
        let template = prostate_template();
        let structures = vec![
            descriptor("PTV", StructureRole::Target, None),
            descriptor("Rectum", StructureRole::Oar, None),
        ];
        let matches = match_template(&structures, &template, &default_config());
        let mut assigned: Vec<&str> = Vec::new();
        for m in &matches {
            if let SlotResult::Confident { structure, .. } = &m.result {
                assert!(!assigned.contains(&structure.as_str()));
                assigned.push(structure);
            }
        }
        let bladder = matches.iter().find(|m| m.slot == "Bladder").unwrap();
        assert_eq!(bladder.result, SlotResult::NoMatch);
    }

    #[test]
    fn test_library_picks_the_covered_template() {
        let result = match_structures(
            &prostate_structures(),
            &[head_neck_template(), prostate_template()],
            &default_config(),
        );
        match result {
            MatchResult::Confident { template, mapping } => {
                assert_eq!(template, "Prostate 60/20");
                assert_eq!(mapping.len(), 3);
                assert_eq!(mapping.get("PTV").unwrap().0, "PTV");
                assert_eq!(mapping.get("PTV").unwrap().1, MappingProvenance::Auto);
            }
            other => panic!("expected Confident, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_coverage_is_ambiguous_with_partial_mapping() {
        // names fit the prostate template but one of three slots is
        // uncovered, so the template score stays below confidence
        let structures = vec![
            descriptor("PTV", StructureRole::Target, None),
            descriptor("Rectum", StructureRole::Oar, None),
        ];
        let result = match_structures(
            &structures,
            &[prostate_template()],
            &default_config(),
        );
        match result {
            MatchResult::Ambiguous { candidates } => {
                assert_eq!(candidates.len(), 1);
                let c = &candidates[0];
                assert_eq!(c.template, "Prostate 60/20");
                assert!(c.score < CoreConfig::default().match_confidence_threshold);
                assert_eq!(c.mapping.get("PTV").unwrap().0, "PTV");
                assert_eq!(c.mapping.get("Rectum").unwrap().0, "Rectum");
                assert!(c.mapping.get("Bladder").is_none());
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_template_tie_broken_by_volume_band() {
        // two library entries identical in names, different volume bands
        let mut narrow = prostate_template();
        narrow.name = "Prostate small".to_string();
        for s in &mut narrow.slots {
            if s.canonical_name == "PTV" {
                s.volume_range_cc = Some((10.0, 100.0));
            }
        }
        let mut wide = prostate_template();
        wide.name = "Prostate large".to_string();
        for s in &mut wide.slots {
            if s.canonical_name == "PTV" {
                s.volume_range_cc = Some((300.0, 900.0));
            }
        }

        let result = match_structures(
            &prostate_structures(),
            &[wide.clone(), narrow.clone()],
            &default_config(),
        );
        match result {
            MatchResult::Confident { template, .. } => assert_eq!(template, "Prostate small"),
            other => panic!("expected tie-break to Prostate small, got {:?}", other),
        }

        // bands that cannot separate the tie leave it ambiguous
        let mut wide_same = wide.clone();
        wide_same.name = "Prostate alt".to_string();
        for s in &mut wide_same.slots {
            if s.canonical_name == "PTV" {
                s.volume_range_cc = Some((10.0, 100.0));
            }
        }
        let result = match_structures(
            &prostate_structures(),
            &[narrow, wide_same],
            &default_config(),
        );
        match result {
            MatchResult::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_confirmed_mapping_is_never_overwritten() {
        let matches = vec![SlotMatch {
            slot: "PTV".to_string(),
            result: SlotResult::Confident {
                structure: "PTV_auto".to_string(),
                score: 0.9,
            },
        }];
        let confirmations = vec![("PTV".to_string(), "PTV_reviewed".to_string())];
        let mut mapping = confirm_mapping(&matches, &confirmations).unwrap();

        let (name, prov) = mapping.get("PTV").unwrap();
        assert_eq!(name, "PTV_reviewed");
        assert_eq!(prov, MappingProvenance::UserConfirmed);

        // re-absorbing automatic output changes nothing
        mapping.absorb_auto(&matches);
        assert_eq!(mapping.get("PTV").unwrap().0, "PTV_reviewed");

        // conflicting confirmation is rejected
        assert!(mapping.confirm("PTV", "Other").is_err());
        // repeating the same confirmation is fine
        assert!(mapping.confirm("PTV", "PTV_reviewed").is_ok());
    }
}

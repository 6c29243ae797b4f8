pub mod test_utils;

/// Normalizes an ROI name for comparison: lowercase, with whitespace and
/// common separators stripped, so "PTV High", "ptv_high" and "PTV-high"
/// collapse to the same key.
pub fn normalize_roi_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Levenshtein edit distance between two (already normalized) names.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0,1]: 1.0 for identical strings, scaled edit distance
/// otherwise.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod utils_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_roi_name() {
        assert_eq!(normalize_roi_name("PTV High"), "ptvhigh");
        assert_eq!(normalize_roi_name("ptv_high"), "ptvhigh");
        assert_eq!(normalize_roi_name("PTV-High"), "ptvhigh");
        assert_eq!(normalize_roi_name("  Rectum "), "rectum");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("rectum", "rectum"), 0);
        assert_eq!(edit_distance("rectum", "rektum"), 1);
        assert_eq!(edit_distance("", "ptv"), 3);
        assert_eq!(edit_distance("bladder", "blader"), 1);
    }

    #[test]
    fn test_name_similarity_bounds() {
        assert_relative_eq!(name_similarity("ptv", "ptv"), 1.0);
        assert_relative_eq!(name_similarity("rectum", "rektum"), 1.0 - 1.0 / 6.0);
        assert!(name_similarity("ptv", "femurheadl") < 0.3);
    }
}

//! The object filter applied by the Aggregator (§4.5) and the Sweep Planner (§4.6).
//!
//! Per the design notes' ambiguity resolution (§9), the exclude-prefix rule is the
//! strictest of the three interpretations found in the original deployment: a key is
//! excluded if it *starts with* the excluded prefix, or the prefix appears as a
//! complete path segment anywhere in the key.

use std::collections::HashMap;

use crate::model::CriticalityTier;

/// Per-tier allowed prefixes and exclude prefixes/suffixes, loaded from
/// `ALLOWED_PREFIXES`, `EXCLUDE_KEY_PREFIXES`, `EXCLUDE_KEY_SUFFIXES`.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    pub allowed_prefixes: HashMap<CriticalityTier, Vec<String>>,
    pub exclude_prefixes: Vec<String>,
    pub exclude_suffixes: Vec<String>,
}

impl ObjectFilter {
    /// Applies the full filter chain to one key for the given tier (§4.5 step 2).
    ///
    /// Returns `true` if the key should be retained.
    #[must_use]
    pub fn retain(&self, tier: CriticalityTier, key: &str) -> bool {
        if key.ends_with('/') {
            return false;
        }
        if self.exclude_prefixes.iter().any(|p| excludes(key, p)) {
            return false;
        }
        if self.exclude_suffixes.iter().any(|s| key.ends_with(s.as_str())) {
            return false;
        }
        match self.allowed_prefixes.get(&tier) {
            Some(prefixes) if !prefixes.is_empty() => {
                prefixes.iter().any(|p| key.starts_with(p.as_str()))
            }
            _ => true,
        }
    }
}

/// The allowed-prefix restriction alone, without the exclude-prefix/suffix rules
/// (§4.6: the Enumeration Reader applies only this half of the filter).
impl ObjectFilter {
    #[must_use]
    pub fn allowed_for_tier(&self, tier: CriticalityTier, key: &str) -> bool {
        match self.allowed_prefixes.get(&tier) {
            Some(prefixes) if !prefixes.is_empty() => prefixes.iter().any(|p| key.starts_with(p.as_str())),
            _ => true,
        }
    }
}

/// `p`, `p/...`, or `.../p/...` — startswith OR a complete leading/embedded path segment.
fn excludes(key: &str, excluded_prefix: &str) -> bool {
    if excluded_prefix.is_empty() {
        return false;
    }
    if key.starts_with(excluded_prefix) {
        return true;
    }
    let segment_leading = format!("{excluded_prefix}/");
    if key.starts_with(&segment_leading) {
        return true;
    }
    let segment_embedded = format!("/{excluded_prefix}/");
    key.contains(&segment_embedded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter_with_excludes(excludes: &[&str]) -> ObjectFilter {
        ObjectFilter {
            allowed_prefixes: HashMap::new(),
            exclude_prefixes: excludes.iter().map(|s| s.to_string()).collect(),
            exclude_suffixes: Vec::new(),
        }
    }

    #[test]
    fn folder_markers_are_excluded() {
        let filter = ObjectFilter::default();
        assert!(!filter.retain(CriticalityTier::Critical, "a/b/"));
    }

    #[test]
    fn allowed_prefix_restricts_when_configured() {
        let mut filter = ObjectFilter::default();
        filter
            .allowed_prefixes
            .insert(CriticalityTier::Critical, vec!["data/".to_string()]);
        assert!(filter.retain(CriticalityTier::Critical, "data/a.txt"));
        assert!(!filter.retain(CriticalityTier::Critical, "other/a.txt"));
    }

    #[test]
    fn exclude_prefix_matches_startswith_and_path_segment() {
        let filter = filter_with_excludes(&["logs"]);
        assert!(!filter.retain(CriticalityTier::Critical, "logs"));
        assert!(!filter.retain(CriticalityTier::Critical, "logs/a.txt"));
        assert!(!filter.retain(CriticalityTier::Critical, "2024/logs/a.txt"));
        assert!(filter.retain(CriticalityTier::Critical, "loggers/a.txt"));
    }

    proptest! {
        // P5 (filter correctness)
        #[test]
        fn excluded_prefix_never_appears_in_retained_keys(
            excluded in "[a-z]{1,6}",
            suffix in "[a-z0-9/_.]{0,12}",
        ) {
            let filter = filter_with_excludes(&[excluded.as_str()]);
            let candidates = [
                excluded.clone(),
                format!("{excluded}/{suffix}"),
                format!("prefix/{excluded}/{suffix}"),
            ];
            for key in candidates {
                prop_assert!(!filter.retain(CriticalityTier::Critical, &key));
            }
        }
    }
}

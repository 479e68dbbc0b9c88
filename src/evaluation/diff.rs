//! Fingerprint diffing and change classification.

use crate::db::{ChangeLevel, DiffSummary};

use super::fingerprint::Fingerprint;

/// Size swing (percent) above which a change is MAJOR.
pub const MAJOR_SIZE_PERCENT: f64 = 50.0;
/// Newly added scripts above which a change is MAJOR.
pub const MAJOR_SCRIPTS_ADDED: usize = 3;
/// Size swing (percent) above which a change is at least MODERATE.
pub const MODERATE_SIZE_PERCENT: f64 = 10.0;

/// Compare the current capture against the previous one.
///
/// `previous` is the predecessor's fingerprint and byte size, or `None` for
/// the first capture of a target, which yields an empty summary.
pub fn diff(
    current: &Fingerprint,
    current_size: usize,
    previous: Option<(&Fingerprint, usize)>,
) -> DiffSummary {
    let Some((prev, prev_size)) = previous else {
        return DiffSummary::default();
    };

    let size_diff = current_size as i64 - prev_size as i64;
    let size_change_percent = if prev_size == 0 {
        if current_size == 0 {
            0.0
        } else {
            100.0
        }
    } else {
        size_diff as f64 * 100.0 / prev_size as f64
    };

    DiffSummary {
        scripts_added: current.scripts.difference(&prev.scripts).cloned().collect(),
        scripts_removed: prev.scripts.difference(&current.scripts).cloned().collect(),
        styles_added: current.styles.difference(&prev.styles).cloned().collect(),
        styles_removed: prev.styles.difference(&current.styles).cloned().collect(),
        images_added: current.images.difference(&prev.images).cloned().collect(),
        images_removed: prev.images.difference(&current.images).cloned().collect(),
        meta_tags_changed: current.meta != prev.meta,
        size_diff,
        size_change_percent,
    }
}

impl DiffSummary {
    /// Whether any resource was added or removed or the meta tags moved.
    ///
    /// Size alone does not count.
    pub fn has_structural_change(&self) -> bool {
        !self.scripts_added.is_empty()
            || !self.scripts_removed.is_empty()
            || !self.styles_added.is_empty()
            || !self.styles_removed.is_empty()
            || !self.images_added.is_empty()
            || !self.images_removed.is_empty()
            || self.meta_tags_changed
    }
}

/// Classify a diff. The first matching rule wins.
pub fn classify(summary: &DiffSummary) -> ChangeLevel {
    if !summary.has_structural_change() {
        return ChangeLevel::None;
    }

    let swing = summary.size_change_percent.abs();
    let scripts_added = summary.scripts_added.len();

    if swing > MAJOR_SIZE_PERCENT || scripts_added > MAJOR_SCRIPTS_ADDED {
        ChangeLevel::Major
    } else if swing > MODERATE_SIZE_PERCENT || scripts_added >= 1 {
        ChangeLevel::Moderate
    } else {
        ChangeLevel::Minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn base() -> Fingerprint {
        Fingerprint {
            scripts: set(&["/app.js", "/vendor.js"]),
            styles: set(&["/site.css"]),
            images: set(&["/logo.png", "/hero.jpg"]),
            meta: BTreeMap::from([("description".to_string(), "shop".to_string())]),
        }
    }

    #[test]
    fn test_first_capture_is_none_with_empty_sets() {
        let summary = diff(&base(), 10_000, None);
        assert_eq!(summary, DiffSummary::default());
        assert_eq!(classify(&summary), ChangeLevel::None);
    }

    #[test]
    fn test_identical_fingerprints_are_none_even_when_size_moves() {
        let summary = diff(&base(), 20_000, Some((&base(), 1_000)));
        assert_eq!(summary.size_diff, 19_000);
        assert!(!summary.has_structural_change());
        assert_eq!(classify(&summary), ChangeLevel::None);
    }

    #[test]
    fn test_removing_one_image_is_minor() {
        let mut current = base();
        current.images.remove("/hero.jpg");

        let summary = diff(&current, 9_700, Some((&base(), 10_000)));
        assert_eq!(summary.images_removed, set(&["/hero.jpg"]));
        assert!(summary.images_added.is_empty());
        assert!((summary.size_change_percent + 3.0).abs() < 1e-9);
        assert_eq!(classify(&summary), ChangeLevel::Minor);
    }

    #[test]
    fn test_meta_change_alone_is_minor() {
        let mut current = base();
        current.meta.insert("robots".to_string(), "noindex".to_string());

        let summary = diff(&current, 10_000, Some((&base(), 10_000)));
        assert!(summary.meta_tags_changed);
        assert_eq!(classify(&summary), ChangeLevel::Minor);
    }

    #[test]
    fn test_one_added_script_is_moderate() {
        let mut current = base();
        current.scripts.insert("/chat.js".to_string());

        let summary = diff(&current, 10_000, Some((&base(), 10_000)));
        assert_eq!(classify(&summary), ChangeLevel::Moderate);
    }

    #[test]
    fn test_four_added_scripts_are_major_regardless_of_size() {
        let mut current = base();
        for s in ["/a.js", "/b.js", "/c.js", "/d.js"] {
            current.scripts.insert(s.to_string());
        }

        let summary = diff(&current, 10_000, Some((&base(), 10_000)));
        assert_eq!(summary.scripts_added.len(), 4);
        assert_eq!(summary.size_change_percent, 0.0);
        assert_eq!(classify(&summary), ChangeLevel::Major);

        // Three is only moderate.
        current.scripts.remove("/d.js");
        let summary = diff(&current, 10_000, Some((&base(), 10_000)));
        assert_eq!(classify(&summary), ChangeLevel::Moderate);
    }

    #[test]
    fn test_size_thresholds_are_exclusive() {
        let mut current = base();
        current.styles.insert("/print.css".to_string());

        let at_ten = diff(&current, 1_100, Some((&base(), 1_000)));
        assert_eq!(classify(&at_ten), ChangeLevel::Minor);

        let over_ten = diff(&current, 1_101, Some((&base(), 1_000)));
        assert_eq!(classify(&over_ten), ChangeLevel::Moderate);

        let at_fifty = diff(&current, 500, Some((&base(), 1_000)));
        assert_eq!(classify(&at_fifty), ChangeLevel::Moderate);

        let over_fifty = diff(&current, 499, Some((&base(), 1_000)));
        assert_eq!(classify(&over_fifty), ChangeLevel::Major);
    }

    #[test]
    fn test_empty_previous_body_counts_as_full_swing() {
        let mut current = base();
        current.images.insert("/new.png".to_string());
        let empty = Fingerprint::default();

        let summary = diff(&current, 4_000, Some((&empty, 0)));
        assert_eq!(summary.size_change_percent, 100.0);
        assert_eq!(classify(&summary), ChangeLevel::Major);

        let summary = diff(&empty, 0, Some((&empty, 0)));
        assert_eq!(summary.size_change_percent, 0.0);
    }

    #[test]
    fn test_swapping_sides_swaps_added_and_removed() {
        let a = base();
        let mut b = base();
        b.scripts.remove("/vendor.js");
        b.scripts.insert("/next.js".to_string());
        b.styles.insert("/theme.css".to_string());
        b.images.clear();

        let forward = diff(&a, 100, Some((&b, 120)));
        let backward = diff(&b, 120, Some((&a, 100)));

        assert_eq!(forward.scripts_added, backward.scripts_removed);
        assert_eq!(forward.scripts_removed, backward.scripts_added);
        assert_eq!(forward.styles_added, backward.styles_removed);
        assert_eq!(forward.images_added, backward.images_removed);
        assert_eq!(forward.size_diff, -backward.size_diff);
        assert_eq!(forward.meta_tags_changed, backward.meta_tags_changed);
    }
}

//! Bypass list construction.
//!
//! A pure projection: walk the tree once under the current mode and collect
//! the hostname patterns that are effectively excluded. No I/O here; the
//! result is handed to the proxy configuration consumer.

use std::collections::HashSet;

use crate::mode::Mode;
use crate::tree::ExclusionsTree;

/// Build the ordered, deduplicated bypass list for a tree under a mode.
///
/// Ordering is stable by first-insertion order (service groups first, then
/// free-standing groups). Proxy matching is order-independent; this is a
/// determinism requirement, not a semantic one.
pub fn build_bypass_list(tree: &ExclusionsTree, mode: Mode) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut patterns = Vec::new();
    for group in tree.groups_in_order() {
        for entry in &group.entries {
            if !mode.effective_excluded(entry.enabled) {
                continue;
            }
            if seen.insert(entry.hostname.clone()) {
                patterns.push(entry.hostname.clone());
            }
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_mode_emits_enabled_patterns() {
        let mut tree = ExclusionsTree::new();
        tree.add_hostname("example.org").unwrap();
        tree.add_hostname("10.0.0.1").unwrap();

        let list = build_bypass_list(&tree, Mode::Regular);
        assert_eq!(list, vec!["example.org", "*.example.org", "10.0.0.1"]);
    }

    #[test]
    fn test_disabled_entries_skipped_in_regular_mode() {
        let mut tree = ExclusionsTree::new();
        tree.add_hostname("example.org").unwrap();
        let id = tree.groups[0].entries[0].id.clone();
        tree.toggle_entry(&id).unwrap();

        let list = build_bypass_list(&tree, Mode::Regular);
        assert_eq!(list, vec!["*.example.org"]);
    }

    #[test]
    fn test_selective_mode_inverts_polarity() {
        let mut tree = ExclusionsTree::new();
        tree.add_hostname("example.org").unwrap();

        // All entries enabled: nothing is excluded under selective polarity.
        assert!(build_bypass_list(&tree, Mode::Selective).is_empty());

        let ids: Vec<String> = tree.groups[0].entries.iter().map(|e| e.id.clone()).collect();
        for id in &ids {
            tree.toggle_entry(id).unwrap();
        }
        let selective = build_bypass_list(&tree, Mode::Selective);
        assert_eq!(selective, vec!["example.org", "*.example.org"]);
    }

    #[test]
    fn test_mode_flip_equivalence() {
        // build() under Regular with all entries enabled equals build()
        // under Selective with all entries disabled, for the same shape.
        let mut enabled_tree = ExclusionsTree::new();
        enabled_tree.add_hostname("example.org").unwrap();
        enabled_tree.add_hostname("sub.other.net").unwrap();

        let mut disabled_tree = enabled_tree.clone();
        let ids: Vec<String> = disabled_tree
            .groups_in_order()
            .flat_map(|g| g.entries.iter().map(|e| e.id.clone()))
            .collect();
        for id in &ids {
            disabled_tree.toggle_entry(id).unwrap();
        }

        assert_eq!(
            build_bypass_list(&enabled_tree, Mode::Regular),
            build_bypass_list(&disabled_tree, Mode::Selective)
        );
    }

    #[test]
    fn test_dedupe_across_parents() {
        let mut tree = ExclusionsTree::new();
        tree.materialize_service("svc", &["example.org".to_string()]);
        // A free-standing group with the same hostname can coexist; the
        // builder must emit each pattern once.
        tree.groups.push(crate::tree::DomainGroup {
            id: "g-free".into(),
            hostname: "example.org".into(),
            entries: vec![crate::tree::ExclusionEntry {
                id: "e-free".into(),
                hostname: "example.org".into(),
                enabled: true,
            }],
        });

        let list = build_bypass_list(&tree, Mode::Regular);
        assert_eq!(list, vec!["example.org", "*.example.org"]);
    }
}

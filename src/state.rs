//! Tri-state derivation and redundancy ("usefulness") flags.
//!
//! States are never stored: they are total functions over the tree, derived
//! bottom-up from entry enabled flags on every read. This keeps parents and
//! descendants consistent by construction.

use serde::Serialize;

use crate::tree::{DomainGroup, ExclusionEntry, ServiceNode};

/// Aggregate child consistency of a group or service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExclusionState {
    Enabled,
    PartlyEnabled,
    Disabled,
}

fn fold_states(mut states: impl Iterator<Item = ExclusionState>) -> ExclusionState {
    let first = match states.next() {
        Some(s) => s,
        None => return ExclusionState::Disabled,
    };
    for state in states {
        if state != first {
            return ExclusionState::PartlyEnabled;
        }
    }
    first
}

/// Group state: Enabled when every child entry is enabled, Disabled when
/// none is, PartlyEnabled otherwise.
pub fn group_state(group: &DomainGroup) -> ExclusionState {
    fold_states(group.entries.iter().map(|e| {
        if e.enabled {
            ExclusionState::Enabled
        } else {
            ExclusionState::Disabled
        }
    }))
}

/// Service state, one level up over its groups' states. A PartlyEnabled
/// group forces the service to PartlyEnabled, unless it is the only group,
/// in which case its state is inherited as-is.
pub fn service_state(service: &ServiceNode) -> ExclusionState {
    if let [only] = service.groups.as_slice() {
        return group_state(only);
    }
    fold_states(service.groups.iter().map(group_state))
}

/// An entry is useless when it is a strict subdomain of the group's wildcard
/// target, it is not the wildcard entry itself, and the wildcard entry is
/// enabled: the narrower rule is already covered.
///
/// Plain string suffix comparison on normalized hostnames, by design.
pub fn is_useless(group: &DomainGroup, entry: &ExclusionEntry) -> bool {
    let wildcard = match group.wildcard_entry() {
        Some(w) if w.enabled => w,
        _ => return false,
    };
    if entry.id == wildcard.id {
        return false;
    }
    let target = &group.hostname;
    entry.hostname != *target && entry.hostname.ends_with(&format!(".{}", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ExclusionsTree;

    fn tree_with(hosts: &[&str]) -> ExclusionsTree {
        let mut tree = ExclusionsTree::new();
        for host in hosts {
            tree.add_hostname(host).unwrap();
        }
        tree
    }

    #[test]
    fn test_group_state_all_enabled() {
        let tree = tree_with(&["example.org"]);
        assert_eq!(group_state(&tree.groups[0]), ExclusionState::Enabled);
    }

    #[test]
    fn test_group_state_all_disabled() {
        let mut tree = tree_with(&["example.org"]);
        let ids: Vec<String> = tree.groups[0].entries.iter().map(|e| e.id.clone()).collect();
        for id in ids {
            tree.toggle_entry(&id).unwrap();
        }
        assert_eq!(group_state(&tree.groups[0]), ExclusionState::Disabled);
    }

    #[test]
    fn test_group_state_mixed() {
        let mut tree = tree_with(&["example.org"]);
        let id = tree.groups[0].entries[0].id.clone();
        tree.toggle_entry(&id).unwrap();
        assert_eq!(group_state(&tree.groups[0]), ExclusionState::PartlyEnabled);
    }

    #[test]
    fn test_service_state_over_groups() {
        let mut tree = ExclusionsTree::new();
        tree.materialize_service("svc", &["a.com".to_string(), "b.com".to_string()]);
        let svc = tree.find_service("svc").unwrap();
        assert_eq!(service_state(svc), ExclusionState::Enabled);

        let group_id = tree.find_service("svc").unwrap().groups[0].id.clone();
        tree.set_group_enabled(&group_id, false).unwrap();
        let svc = tree.find_service("svc").unwrap();
        assert_eq!(service_state(svc), ExclusionState::PartlyEnabled);
    }

    #[test]
    fn test_service_state_single_group_inherits_partly() {
        let mut tree = ExclusionsTree::new();
        tree.materialize_service("svc", &["a.com".to_string()]);
        let entry_id = tree.find_service("svc").unwrap().groups[0].entries[0]
            .id
            .clone();
        tree.toggle_entry(&entry_id).unwrap();
        let svc = tree.find_service("svc").unwrap();
        assert_eq!(service_state(svc), ExclusionState::PartlyEnabled);
    }

    #[test]
    fn test_useless_subdomain_under_enabled_wildcard() {
        let tree = tree_with(&["example.org", "sub.example.org"]);
        let group = &tree.groups[0];
        let sub = group.find_entry("sub.example.org").unwrap();
        assert!(is_useless(group, sub));
        // The exact and wildcard entries are never useless
        let exact = group.find_entry("example.org").unwrap();
        let wildcard = group.find_entry("*.example.org").unwrap();
        assert!(!is_useless(group, exact));
        assert!(!is_useless(group, wildcard));
    }

    #[test]
    fn test_useless_cleared_when_wildcard_disabled() {
        let mut tree = tree_with(&["example.org", "sub.example.org"]);
        let wildcard_id = tree.groups[0]
            .find_entry("*.example.org")
            .unwrap()
            .id
            .clone();
        tree.toggle_entry(&wildcard_id).unwrap();

        let group = &tree.groups[0];
        let sub = group.find_entry("sub.example.org").unwrap();
        assert!(!is_useless(group, sub));
    }

    #[test]
    fn test_useless_absent_without_wildcard_entry() {
        let tree = tree_with(&["10.0.0.1"]);
        let group = &tree.groups[0];
        assert!(!is_useless(group, &group.entries[0]));
    }
}

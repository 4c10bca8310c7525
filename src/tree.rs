//! The persisted exclusions data model and its structural operations.
//!
//! The tree is arena-like: every node carries a stable opaque id minted from
//! a persisted monotonic counter, so removed subtrees can be restored with
//! their original ids and reloads never collide.

use serde::{Deserialize, Serialize};

use crate::error::{ExclusionsError, Result};
use crate::hostname;

/// A leaf rule: an exact hostname or a `*.domain.tld` wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionEntry {
    pub id: String,
    pub hostname: String,
    pub enabled: bool,
}

/// One registrable domain (or bare IP) and its child entries.
///
/// Invariant: every child hostname equals the group hostname or is a
/// (possibly wildcard-prefixed) subdomain of it, and no two children share a
/// normalized hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainGroup {
    pub id: String,
    pub hostname: String,
    pub entries: Vec<ExclusionEntry>,
}

impl DomainGroup {
    /// The wildcard pattern covering this group's subdomains.
    pub fn wildcard_hostname(&self) -> String {
        format!("*.{}", self.hostname)
    }

    /// The group's wildcard entry, if the user has one.
    pub fn wildcard_entry(&self) -> Option<&ExclusionEntry> {
        let wildcard = self.wildcard_hostname();
        self.entries.iter().find(|e| e.hostname == wildcard)
    }

    /// Exact-hostname lookup among this group's entries.
    pub fn find_entry(&self, hostname: &str) -> Option<&ExclusionEntry> {
        self.entries.iter().find(|e| e.hostname == hostname)
    }
}

/// User-configured state of a catalog service: the domain groups actually
/// materialized for it. A service with no node in the tree is "untouched".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub service_id: String,
    pub groups: Vec<DomainGroup>,
}

/// Outcome of an add operation: ids of newly created entries, or the id of
/// the pre-existing entry when the add was a dedup no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub created: Vec<String>,
    pub existing: Option<String>,
}

/// A subtree detached by a delete operation, with enough placement detail to
/// re-insert it where it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovedNode {
    Entry {
        group_id: String,
        entry: ExclusionEntry,
        position: usize,
    },
    Group {
        /// Owning service id, or `None` for a free-standing group.
        parent: Option<String>,
        group: DomainGroup,
        position: usize,
    },
    ServiceGroups {
        service_id: String,
        groups: Vec<DomainGroup>,
    },
}

impl RemovedNode {
    /// Number of leaf entries contained in the subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            RemovedNode::Entry { .. } => 1,
            RemovedNode::Group { group, .. } => group.entries.len(),
            RemovedNode::ServiceGroups { groups, .. } => {
                groups.iter().map(|g| g.entries.len()).sum()
            }
        }
    }
}

/// The top-level container: service-owned groups plus free-standing groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionsTree {
    pub services: Vec<ServiceNode>,
    pub groups: Vec<DomainGroup>,
    next_id: u64,
}

impl ExclusionsTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// All groups, service-owned first, each in insertion order.
    pub fn groups_in_order(&self) -> impl Iterator<Item = &DomainGroup> {
        self.services
            .iter()
            .flat_map(|s| s.groups.iter())
            .chain(self.groups.iter())
    }

    /// True when the tree holds no user rules at all.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.groups.is_empty()
    }

    /// Add a (raw) hostname to the tree.
    ///
    /// The input is normalized and validated first. IP literals become a
    /// single-entry group. Domains are grouped by registrable domain; a new
    /// group receives the default exact + wildcard pair, and a subdomain
    /// input additionally becomes its own entry. Adding a hostname that is
    /// already present is a no-op reporting the existing entry id.
    pub fn add_hostname(&mut self, raw: &str) -> Result<AddOutcome> {
        let host = hostname::normalize_input(raw)
            .ok_or_else(|| ExclusionsError::InvalidHostname(raw.trim().to_string()))?;

        if hostname::is_ip_address(&host) {
            return Ok(self.add_ip(&host));
        }

        // Unclassifiable text is kept as a raw group keyed by itself.
        let registrable = hostname::registrable_domain(&host)
            .unwrap_or_else(|| hostname::strip_wildcard(&host).to_string());
        let denotes_bare = hostname::subdomain_label(&host, &registrable).is_empty();

        // The entry hostname: bare-domain spellings (www., wildcard) collapse
        // onto the registrable domain itself.
        let entry_host = if denotes_bare && !host.starts_with("*.") {
            registrable.clone()
        } else {
            host.clone()
        };

        if let Some(group) = self.find_group_by_hostname_mut(&registrable) {
            if let Some(found) = group.find_entry(&entry_host) {
                return Ok(AddOutcome {
                    created: vec![],
                    existing: Some(found.id.clone()),
                });
            }
            let id = self.mint("e");
            // Borrow again: mint required unique access to the counter.
            let group = self
                .find_group_by_hostname_mut(&registrable)
                .expect("group existed above");
            group.entries.push(ExclusionEntry {
                id: id.clone(),
                hostname: entry_host,
                enabled: true,
            });
            return Ok(AddOutcome {
                created: vec![id],
                existing: None,
            });
        }

        let mut created = Vec::new();
        let mut entries = Vec::new();

        let exact_id = self.mint("e");
        entries.push(ExclusionEntry {
            id: exact_id.clone(),
            hostname: registrable.clone(),
            enabled: true,
        });
        created.push(exact_id);

        let wildcard_id = self.mint("e");
        entries.push(ExclusionEntry {
            id: wildcard_id.clone(),
            hostname: format!("*.{}", registrable),
            enabled: true,
        });
        created.push(wildcard_id);

        if !denotes_bare {
            let sub_id = self.mint("e");
            entries.push(ExclusionEntry {
                id: sub_id.clone(),
                hostname: entry_host,
                enabled: true,
            });
            created.push(sub_id);
        }

        let group_id = self.mint("g");
        self.groups.push(DomainGroup {
            id: group_id,
            hostname: registrable,
            entries,
        });

        Ok(AddOutcome {
            created,
            existing: None,
        })
    }

    fn add_ip(&mut self, ip: &str) -> AddOutcome {
        if let Some(group) = self.find_group_by_hostname_mut(ip) {
            let existing = group.find_entry(ip).map(|e| e.id.clone());
            if let Some(id) = existing {
                return AddOutcome {
                    created: vec![],
                    existing: Some(id),
                };
            }
        }
        let entry_id = self.mint("e");
        let group_id = self.mint("g");
        self.groups.push(DomainGroup {
            id: group_id,
            hostname: ip.to_string(),
            entries: vec![ExclusionEntry {
                id: entry_id.clone(),
                hostname: ip.to_string(),
                enabled: true,
            }],
        });
        AddOutcome {
            created: vec![entry_id],
            existing: None,
        }
    }

    /// Remove the node with the given id: a leaf entry (cascading away a
    /// group left empty), a whole group, or all of a service's groups.
    /// Returns the detached subtree for the undo buffer.
    pub fn remove(&mut self, id: &str) -> Result<RemovedNode> {
        // Leaf entry?
        if let Some((parent, group_pos)) = self.locate_group_of_entry(id) {
            let (group_id, entry_removed, position, now_empty) = {
                let group = match parent {
                    Some(svc_pos) => &mut self.services[svc_pos].groups[group_pos],
                    None => &mut self.groups[group_pos],
                };
                let position = group
                    .entries
                    .iter()
                    .position(|e| e.id == id)
                    .expect("entry located above");
                let entry = group.entries.remove(position);
                (group.id.clone(), entry, position, group.entries.is_empty())
            };

            if now_empty {
                // Last entry: the group goes with it. Buffer the group as it
                // was before the removal so restore brings both back.
                let (parent_id, mut group, position) = match parent {
                    Some(svc_pos) => {
                        let svc_id = self.services[svc_pos].service_id.clone();
                        let group = self.services[svc_pos].groups.remove(group_pos);
                        (Some(svc_id), group, group_pos)
                    }
                    None => (None, self.groups.remove(group_pos), group_pos),
                };
                group.entries.push(entry_removed);
                debug_assert_eq!(group.id, group_id);
                self.prune_empty_services();
                return Ok(RemovedNode::Group {
                    parent: parent_id,
                    group,
                    position,
                });
            }

            return Ok(RemovedNode::Entry {
                group_id,
                entry: entry_removed,
                position,
            });
        }

        // Whole group?
        if let Some(pos) = self.groups.iter().position(|g| g.id == id) {
            let group = self.groups.remove(pos);
            return Ok(RemovedNode::Group {
                parent: None,
                group,
                position: pos,
            });
        }
        for svc in &mut self.services {
            if let Some(pos) = svc.groups.iter().position(|g| g.id == id) {
                let group = svc.groups.remove(pos);
                let service_id = svc.service_id.clone();
                self.prune_empty_services();
                return Ok(RemovedNode::Group {
                    parent: Some(service_id),
                    group,
                    position: pos,
                });
            }
        }

        // A service id resets the whole service.
        if self.services.iter().any(|s| s.service_id == id) {
            return self.reset_service(id);
        }

        Err(ExclusionsError::UnknownId(id.to_string()))
    }

    /// Discard all user groups for a service, reverting it to the untouched
    /// catalog-default state.
    pub fn reset_service(&mut self, service_id: &str) -> Result<RemovedNode> {
        let pos = self
            .services
            .iter()
            .position(|s| s.service_id == service_id)
            .ok_or_else(|| ExclusionsError::UnknownId(service_id.to_string()))?;
        let node = self.services.remove(pos);
        Ok(RemovedNode::ServiceGroups {
            service_id: node.service_id,
            groups: node.groups,
        })
    }

    /// Re-insert a previously removed subtree at its original parent,
    /// preserving ids and position.
    pub fn restore(&mut self, node: RemovedNode) -> Result<()> {
        match node {
            RemovedNode::Entry {
                group_id,
                entry,
                position,
            } => {
                let group = self
                    .find_group_mut(&group_id)
                    .ok_or(ExclusionsError::UnknownId(group_id))?;
                let position = position.min(group.entries.len());
                group.entries.insert(position, entry);
                Ok(())
            }
            RemovedNode::Group {
                parent,
                group,
                position,
            } => match parent {
                Some(service_id) => {
                    let svc = self.ensure_service(&service_id);
                    let position = position.min(svc.groups.len());
                    svc.groups.insert(position, group);
                    Ok(())
                }
                None => {
                    let position = position.min(self.groups.len());
                    self.groups.insert(position, group);
                    Ok(())
                }
            },
            RemovedNode::ServiceGroups { service_id, groups } => {
                let svc = self.ensure_service(&service_id);
                svc.groups = groups;
                Ok(())
            }
        }
    }

    /// Flip a single entry's enabled flag.
    pub fn toggle_entry(&mut self, id: &str) -> Result<bool> {
        let entry = self
            .find_entry_mut(id)
            .ok_or_else(|| ExclusionsError::UnknownId(id.to_string()))?;
        entry.enabled = !entry.enabled;
        Ok(entry.enabled)
    }

    /// Set every entry of a group to the same enabled value (bulk toggle).
    pub fn set_group_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let group = self
            .find_group_mut(id)
            .ok_or_else(|| ExclusionsError::UnknownId(id.to_string()))?;
        for entry in &mut group.entries {
            entry.enabled = enabled;
        }
        Ok(())
    }

    /// Set every entry under a service to the same enabled value.
    pub fn set_service_enabled(&mut self, service_id: &str, enabled: bool) -> Result<()> {
        let svc = self
            .find_service_mut(service_id)
            .ok_or_else(|| ExclusionsError::UnknownId(service_id.to_string()))?;
        for group in &mut svc.groups {
            for entry in &mut group.entries {
                entry.enabled = enabled;
            }
        }
        Ok(())
    }

    /// Create domain groups (default exact + wildcard pair, enabled) for each
    /// catalog domain a service does not have a group for yet.
    pub fn materialize_service(&mut self, service_id: &str, domains: &[String]) -> usize {
        let mut created = 0;
        for domain in domains {
            let exists = self
                .find_service(service_id)
                .map(|s| s.groups.iter().any(|g| &g.hostname == domain))
                .unwrap_or(false);
            if exists {
                continue;
            }
            let exact_id = self.mint("e");
            let wildcard_id = self.mint("e");
            let group_id = self.mint("g");
            let group = DomainGroup {
                id: group_id,
                hostname: domain.clone(),
                entries: vec![
                    ExclusionEntry {
                        id: exact_id,
                        hostname: domain.clone(),
                        enabled: true,
                    },
                    ExclusionEntry {
                        id: wildcard_id,
                        hostname: format!("*.{}", domain),
                        enabled: true,
                    },
                ],
            };
            self.ensure_service(service_id).groups.push(group);
            created += 1;
        }
        created
    }

    /// Exact-hostname lookup across every group in the tree.
    pub fn find_by_hostname(&self, hostname: &str) -> Option<&ExclusionEntry> {
        self.groups_in_order()
            .find_map(|g| g.find_entry(hostname))
    }

    pub fn find_service(&self, service_id: &str) -> Option<&ServiceNode> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    fn find_service_mut(&mut self, service_id: &str) -> Option<&mut ServiceNode> {
        self.services
            .iter_mut()
            .find(|s| s.service_id == service_id)
    }

    pub fn find_group(&self, id: &str) -> Option<&DomainGroup> {
        self.groups
            .iter()
            .chain(self.services.iter().flat_map(|s| s.groups.iter()))
            .find(|g| g.id == id)
    }

    fn find_group_mut(&mut self, id: &str) -> Option<&mut DomainGroup> {
        self.groups
            .iter_mut()
            .chain(self.services.iter_mut().flat_map(|s| s.groups.iter_mut()))
            .find(|g| g.id == id)
    }

    fn find_group_by_hostname_mut(&mut self, hostname: &str) -> Option<&mut DomainGroup> {
        self.services
            .iter_mut()
            .flat_map(|s| s.groups.iter_mut())
            .chain(self.groups.iter_mut())
            .find(|g| g.hostname == hostname)
    }

    fn find_entry_mut(&mut self, id: &str) -> Option<&mut ExclusionEntry> {
        self.groups
            .iter_mut()
            .chain(self.services.iter_mut().flat_map(|s| s.groups.iter_mut()))
            .flat_map(|g| g.entries.iter_mut())
            .find(|e| e.id == id)
    }

    /// Locate the group containing an entry id.
    /// Returns (service index or None for free groups, group index).
    fn locate_group_of_entry(&self, id: &str) -> Option<(Option<usize>, usize)> {
        for (svc_pos, svc) in self.services.iter().enumerate() {
            for (group_pos, group) in svc.groups.iter().enumerate() {
                if group.entries.iter().any(|e| e.id == id) {
                    return Some((Some(svc_pos), group_pos));
                }
            }
        }
        for (group_pos, group) in self.groups.iter().enumerate() {
            if group.entries.iter().any(|e| e.id == id) {
                return Some((None, group_pos));
            }
        }
        None
    }

    fn ensure_service(&mut self, service_id: &str) -> &mut ServiceNode {
        if let Some(pos) = self
            .services
            .iter()
            .position(|s| s.service_id == service_id)
        {
            return &mut self.services[pos];
        }
        self.services.push(ServiceNode {
            service_id: service_id.to_string(),
            groups: Vec::new(),
        });
        self.services.last_mut().expect("just pushed")
    }

    fn prune_empty_services(&mut self) {
        self.services.retain(|s| !s.groups.is_empty());
    }
}

//! The exclusions engine facade.
//!
//! Owns the per-polarity trees, the mode flag, the undo buffer and the
//! storage handle, and exposes the mutation/query API consumed by the UI
//! store layer. Every mutating operation follows the same transaction
//! shape: mutate the in-memory tree, then synchronously persist the full
//! snapshot, with no suspension point in between. A failed write leaves the
//! in-memory state as the temporary source of truth and reports the error
//! so the caller can warn about a possible inconsistency on reload.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bypass::build_bypass_list;
use crate::catalog::{Clock, RawService, ServiceCategory, ServicesManager, SystemClock};
use crate::error::{ExclusionsError, Result};
use crate::hostname;
use crate::import::{self, ParsedList};
use crate::mode::{Mode, ModePreview};
use crate::state::{self, ExclusionState};
use crate::storage::{self, KvStore};
use crate::tree::{AddOutcome, DomainGroup, ExclusionEntry, ExclusionsTree};
use crate::undo::UndoBuffer;

/// Storage key for the tree snapshot (both polarities).
pub const TREES_KEY: &str = "exclusions.trees";
/// Storage key for the mode flag.
pub const MODE_KEY: &str = "exclusions.mode";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTrees {
    regular: ExclusionsTree,
    selective: ExclusionsTree,
}

/// Display-oriented projection of a leaf entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    pub id: String,
    pub hostname: String,
    pub enabled: bool,
    /// Redundant under an enabled wildcard sibling; informational only.
    pub useless: bool,
}

/// Display-oriented projection of a domain group.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub id: String,
    pub hostname: String,
    pub state: ExclusionState,
    pub entries: Vec<EntryDto>,
}

/// Display-oriented projection of a configured service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDto {
    pub service_id: String,
    pub service_name: String,
    pub icon_url: String,
    pub categories: Vec<ServiceCategory>,
    pub state: ExclusionState,
    pub groups: Vec<GroupDto>,
}

/// The full tree as the UI renders it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionsDto {
    pub mode: Mode,
    pub services: Vec<ServiceDto>,
    pub groups: Vec<GroupDto>,
}

/// The exclusions resolution engine.
///
/// Designed for a single-threaded, cooperatively scheduled host: mutating
/// operations take `&mut self` and are logically serialized by the caller;
/// reads are pure projections of current state.
pub struct ExclusionsEngine {
    storage: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    services: Option<ServicesManager>,
    regular: ExclusionsTree,
    selective: ExclusionsTree,
    mode: Mode,
    undo: UndoBuffer,
}

impl ExclusionsEngine {
    pub fn new(storage: Arc<dyn KvStore>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            services: None,
            regular: ExclusionsTree::new(),
            selective: ExclusionsTree::new(),
            mode: Mode::default(),
            undo: UndoBuffer::new(),
        }
    }

    /// Attach a services catalog manager.
    pub fn with_services(mut self, services: ServicesManager) -> Self {
        self.services = Some(services);
        self
    }

    /// Replace the time source (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load persisted state: trees, mode flag and the services catalog.
    pub fn init(&mut self) -> Result<()> {
        if let Some(trees) =
            storage::read_value::<PersistedTrees>(self.storage.as_ref(), TREES_KEY)?
        {
            self.regular = trees.regular;
            self.selective = trees.selective;
        }
        if let Some(mode) = storage::read_value::<Mode>(self.storage.as_ref(), MODE_KEY)? {
            self.mode = mode;
        }
        if let Some(services) = &self.services {
            services.init();
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch the operating mode. Entry flags are untouched; only the
    /// bypass polarity and the active tree change.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.mode = mode;
        storage::write_value(self.storage.as_ref(), MODE_KEY, &mode)
    }

    /// Flip to the other polarity. Returns the mode now active.
    pub fn switch_mode(&mut self) -> Result<Mode> {
        let mode = self.mode.inverted();
        self.set_mode(mode)?;
        Ok(mode)
    }

    /// Would-be bypass-list sizes for both polarities, for the mode-switch
    /// confirmation step.
    pub fn preview_mode_switch(&self) -> ModePreview {
        ModePreview {
            regular: build_bypass_list(&self.regular, Mode::Regular).len(),
            selective: build_bypass_list(&self.selective, Mode::Selective).len(),
        }
    }

    /// The final ordered, deduplicated pattern list for the proxy layer.
    pub fn bypass_list(&self) -> Vec<String> {
        build_bypass_list(self.active_tree(), self.mode)
    }

    pub fn services(&self) -> Option<&ServicesManager> {
        self.services.as_ref()
    }

    /// Add a hostname (raw user input) to the active tree.
    pub fn add_hostname(&mut self, raw: &str) -> Result<AddOutcome> {
        let outcome = self.active_tree_mut().add_hostname(raw)?;
        self.persist()?;
        Ok(outcome)
    }

    /// Remove an entry, group or service subtree by id. The detached
    /// subtree is buffered for a single-level restore. Returns the number
    /// of leaf entries deleted.
    pub fn remove(&mut self, id: &str) -> Result<usize> {
        let node = self.active_tree_mut().remove(id)?;
        let count = node.leaf_count();
        self.undo.push(self.mode, node, self.clock.now_ms());
        self.persist()?;
        Ok(count)
    }

    /// Discard all user groups for a service, reverting it to the
    /// untouched catalog-default state. Restorable like a remove.
    pub fn reset_service(&mut self, service_id: &str) -> Result<usize> {
        let node = self.active_tree_mut().reset_service(service_id)?;
        let count = node.leaf_count();
        self.undo.push(self.mode, node, self.clock.now_ms());
        self.persist()?;
        Ok(count)
    }

    /// Re-insert the most recently removed subtree with its original ids.
    /// A no-op returning 0 when the buffer is empty or expired.
    pub fn restore(&mut self) -> Result<usize> {
        let Some((mode, node)) = self.undo.take(self.clock.now_ms()) else {
            return Ok(0);
        };
        let count = node.leaf_count();
        if let Err(e) = self.tree_for_mut(mode).restore(node.clone()) {
            // A failed re-attach must not drop the buffered subtree.
            self.undo.push(mode, node, self.clock.now_ms());
            return Err(e);
        }
        self.persist()?;
        Ok(count)
    }

    /// Drop any buffered removal, e.g. when the undo affordance is
    /// dismissed without being used.
    pub fn dismiss_restore(&mut self) {
        self.undo.clear();
    }

    /// Flip one entry's enabled flag. Ancestor states are derived, so the
    /// change propagates on the next read.
    pub fn toggle_entry(&mut self, id: &str) -> Result<bool> {
        let enabled = self.active_tree_mut().toggle_entry(id)?;
        self.persist()?;
        Ok(enabled)
    }

    /// Bulk-toggle a group: a fully enabled group becomes fully disabled,
    /// anything else becomes fully enabled. Returns the value applied.
    pub fn toggle_group(&mut self, id: &str) -> Result<bool> {
        let target = {
            let group = self
                .active_tree()
                .find_group(id)
                .ok_or_else(|| ExclusionsError::UnknownId(id.to_string()))?;
            state::group_state(group) != ExclusionState::Enabled
        };
        self.active_tree_mut().set_group_enabled(id, target)?;
        self.persist()?;
        Ok(target)
    }

    /// Bulk-toggle a service. An untouched service is first materialized
    /// from the catalog with every domain enabled.
    pub fn toggle_service(&mut self, service_id: &str) -> Result<bool> {
        let configured = self.active_tree().find_service(service_id).is_some();
        let target = if configured {
            let svc = self
                .active_tree()
                .find_service(service_id)
                .expect("checked above");
            let target = state::service_state(svc) != ExclusionState::Enabled;
            self.active_tree_mut()
                .set_service_enabled(service_id, target)?;
            target
        } else {
            let service = self.catalog_service(service_id)?;
            let created = self
                .active_tree_mut()
                .materialize_service(service_id, &service.domains);
            info!(
                "materialized service {} with {} domain groups",
                service_id, created
            );
            true
        };
        self.persist()?;
        Ok(target)
    }

    /// Exact-match lookup of a hostname across the active tree.
    pub fn find_by_hostname(&self, hostname: &str) -> Option<String> {
        let host = hostname::normalize_input(hostname)?;
        self.active_tree()
            .find_by_hostname(&host)
            .map(|e| e.id.clone())
    }

    /// Whether a hostname is effectively excluded from the tunnel right
    /// now: exact entries and wildcard coverage, under the current mode.
    pub fn is_hostname_excluded(&self, hostname: &str) -> bool {
        let Some(host) = hostname::normalize_input(hostname) else {
            return false;
        };
        self.active_tree()
            .groups_in_order()
            .flat_map(|g| g.entries.iter())
            .any(|entry| {
                self.mode.effective_excluded(entry.enabled)
                    && (entry.hostname == host || wildcard_covers(&entry.hostname, &host))
            })
    }

    /// Parse and merge an imported list or archive. Format errors abort
    /// the whole call with zero side effects; duplicate hostnames are
    /// silently skipped. Returns the number of newly added hostnames.
    pub fn import(&mut self, file_name: &str, data: &[u8]) -> Result<usize> {
        let lists = import::parse_import(file_name, data)?;
        let mut added = 0;
        for list in &lists {
            added += self.merge_list(list);
        }
        self.persist()?;
        info!("imported {} hostnames from {}", added, file_name);
        Ok(added)
    }

    fn merge_list(&mut self, list: &ParsedList) -> usize {
        let tree = self.tree_for_mut(list.mode);
        let mut added = 0;
        for host in &list.hostnames {
            match tree.add_hostname(host) {
                Ok(outcome) if !outcome.created.is_empty() => added += 1,
                Ok(_) => {} // already present
                Err(e) => warn!("skipping import line {:?}: {}", host, e),
            }
        }
        added
    }

    /// Render one polarity's tree as a plain hostname list.
    pub fn export(&self, mode: Mode) -> String {
        import::render_list(self.tree_for(mode))
    }

    /// Both polarity lists bundled as a zip archive.
    pub fn export_archive(&self) -> Result<Vec<u8>> {
        import::build_export_archive(
            &self.export(Mode::Regular),
            &self.export(Mode::Selective),
        )
    }

    /// The active tree with derived states, for rendering.
    pub fn dto(&self) -> ExclusionsDto {
        let tree = self.active_tree();
        let services = tree
            .services
            .iter()
            .map(|node| {
                let meta = self
                    .services
                    .as_ref()
                    .and_then(|m| m.get_service(&node.service_id));
                ServiceDto {
                    service_id: node.service_id.clone(),
                    service_name: meta
                        .as_ref()
                        .map(|s| s.service_name.clone())
                        .unwrap_or_else(|| node.service_id.clone()),
                    icon_url: meta
                        .as_ref()
                        .map(|s| s.icon_url.clone())
                        .unwrap_or_default(),
                    categories: meta.map(|s| s.categories).unwrap_or_default(),
                    state: state::service_state(node),
                    groups: node.groups.iter().map(group_dto).collect(),
                }
            })
            .collect();
        ExclusionsDto {
            mode: self.mode,
            services,
            groups: tree.groups.iter().map(group_dto).collect(),
        }
    }

    fn catalog_service(&self, service_id: &str) -> Result<RawService> {
        self.services
            .as_ref()
            .and_then(|m| m.get_service(service_id))
            .ok_or_else(|| ExclusionsError::UnknownId(service_id.to_string()))
    }

    fn active_tree(&self) -> &ExclusionsTree {
        self.tree_for(self.mode)
    }

    fn active_tree_mut(&mut self) -> &mut ExclusionsTree {
        self.tree_for_mut(self.mode)
    }

    fn tree_for(&self, mode: Mode) -> &ExclusionsTree {
        match mode {
            Mode::Regular => &self.regular,
            Mode::Selective => &self.selective,
        }
    }

    fn tree_for_mut(&mut self, mode: Mode) -> &mut ExclusionsTree {
        match mode {
            Mode::Regular => &mut self.regular,
            Mode::Selective => &mut self.selective,
        }
    }

    fn persist(&self) -> Result<()> {
        let snapshot = PersistedTrees {
            regular: self.regular.clone(),
            selective: self.selective.clone(),
        };
        storage::write_value(self.storage.as_ref(), TREES_KEY, &snapshot)
    }
}

fn group_dto(group: &DomainGroup) -> GroupDto {
    GroupDto {
        id: group.id.clone(),
        hostname: group.hostname.clone(),
        state: state::group_state(group),
        entries: group
            .entries
            .iter()
            .map(|entry| entry_dto(group, entry))
            .collect(),
    }
}

fn entry_dto(group: &DomainGroup, entry: &ExclusionEntry) -> EntryDto {
    EntryDto {
        id: entry.id.clone(),
        hostname: entry.hostname.clone(),
        enabled: entry.enabled,
        useless: state::is_useless(group, entry),
    }
}

/// Whether a `*.domain` pattern covers a hostname. The bare domain itself
/// is not covered.
fn wildcard_covers(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(target) => {
            host.len() > target.len() + 1
                && host.ends_with(target)
                && host.as_bytes()[host.len() - target.len() - 1] == b'.'
        }
        None => false,
    }
}

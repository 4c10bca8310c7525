//! Exclusions resolution engine for a split-tunneling VPN client.
//!
//! Turns free-form user input (URLs, hostnames, wildcards, IPs) into a
//! hierarchical exclusions tree, derives display states bottom-up, and
//! flattens the tree into the bypass pattern list the proxy layer consumes.
//! Two polarities are supported: regular mode excludes enabled entries from
//! the tunnel, selective mode tunnels only the enabled entries.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use exclusions_engine::{ExclusionsEngine, MemoryStore};
//!
//! # fn main() -> exclusions_engine::Result<()> {
//! let mut engine = ExclusionsEngine::new(Arc::new(MemoryStore::new()));
//! engine.init()?;
//!
//! engine.add_hostname("https://www.example.org/path")?;
//! assert_eq!(engine.bypass_list(), vec!["example.org", "*.example.org"]);
//! assert!(engine.is_hostname_excluded("api.example.org"));
//! # Ok(())
//! # }
//! ```

pub mod bypass;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod hostname;
pub mod import;
pub mod mode;
pub mod state;
pub mod storage;
pub mod tree;
pub mod undo;

pub use catalog::{
    Clock, FetchPhase, HttpServicesProvider, RawService, ServiceCategory, ServicesManager,
    ServicesProvider, SystemClock,
};
pub use engine::{EntryDto, ExclusionsDto, ExclusionsEngine, GroupDto, ServiceDto};
pub use error::{ExclusionsError, ImportErrorKind, Result, StorageErrorKind};
pub use mode::{Mode, ModePreview};
pub use state::ExclusionState;
pub use storage::{KvStore, MemoryStore};
pub use tree::{AddOutcome, DomainGroup, ExclusionEntry, ExclusionsTree, RemovedNode};

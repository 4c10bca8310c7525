//! Single-slot undo buffer for delete operations.
//!
//! Holds at most one pending removal; a new delete overwrites the previous
//! one (last-delete-wins) and a restore consumes the slot. Buffered
//! removals expire after a bounded time.

use crate::mode::Mode;
use crate::tree::RemovedNode;

/// How long a buffered removal stays restorable.
pub const UNDO_TTL_MS: u64 = 5 * 60 * 1000;

/// A removed subtree awaiting a possible restore, tagged with the polarity
/// whose tree it was detached from.
#[derive(Debug, Clone)]
pub struct PendingRemoval {
    pub mode: Mode,
    pub node: RemovedNode,
    pub removed_at_ms: u64,
}

/// Holding area for the most recent removal.
#[derive(Debug, Default)]
pub struct UndoBuffer {
    pending: Option<PendingRemoval>,
}

impl UndoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a removal, discarding any previously buffered one.
    pub fn push(&mut self, mode: Mode, node: RemovedNode, now_ms: u64) {
        self.pending = Some(PendingRemoval {
            mode,
            node,
            removed_at_ms: now_ms,
        });
    }

    /// Consume the buffered removal if present and not expired.
    pub fn take(&mut self, now_ms: u64) -> Option<(Mode, RemovedNode)> {
        let pending = self.pending.take()?;
        if now_ms.saturating_sub(pending.removed_at_ms) > UNDO_TTL_MS {
            return None;
        }
        Some((pending.mode, pending.node))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ExclusionEntry, RemovedNode};

    fn entry_node(id: &str) -> RemovedNode {
        RemovedNode::Entry {
            group_id: "g-1".into(),
            entry: ExclusionEntry {
                id: id.into(),
                hostname: "example.org".into(),
                enabled: true,
            },
            position: 0,
        }
    }

    #[test]
    fn test_take_returns_buffered_node_once() {
        let mut buffer = UndoBuffer::new();
        buffer.push(Mode::Regular, entry_node("e-1"), 1_000);
        assert!(!buffer.is_empty());
        assert!(buffer.take(2_000).is_some());
        assert!(buffer.take(2_000).is_none());
    }

    #[test]
    fn test_last_delete_wins() {
        let mut buffer = UndoBuffer::new();
        buffer.push(Mode::Regular, entry_node("e-1"), 1_000);
        buffer.push(Mode::Selective, entry_node("e-2"), 2_000);
        match buffer.take(3_000) {
            Some((mode, RemovedNode::Entry { entry, .. })) => {
                assert_eq!(mode, Mode::Selective);
                assert_eq!(entry.id, "e-2");
            }
            other => panic!("expected buffered entry, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_removal_is_discarded() {
        let mut buffer = UndoBuffer::new();
        buffer.push(Mode::Regular, entry_node("e-1"), 0);
        assert!(buffer.take(UNDO_TTL_MS + 1).is_none());
    }

    #[test]
    fn test_take_at_exact_ttl_still_restores() {
        let mut buffer = UndoBuffer::new();
        buffer.push(Mode::Regular, entry_node("e-1"), 0);
        assert!(buffer.take(UNDO_TTL_MS).is_some());
    }
}

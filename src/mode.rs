//! Operating mode and bypass polarity.
//!
//! The mode is a pure interpretation flag: switching it never mutates stored
//! entries, it only inverts how enabled flags translate into bypass
//! decisions.

use serde::{Deserialize, Serialize};

/// Global operating mode.
///
/// Regular: enabled entries are excluded from the tunnel (go direct).
/// Selective: polarity is inverted, enabled entries are forced through the
/// tunnel while everything else goes direct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Regular,
    Selective,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Regular
    }
}

impl Mode {
    /// Whether an entry with the given enabled flag is effectively excluded
    /// from the tunnel under this mode.
    pub fn effective_excluded(self, enabled: bool) -> bool {
        match self {
            Mode::Regular => enabled,
            Mode::Selective => !enabled,
        }
    }

    /// The other polarity.
    pub fn inverted(self) -> Mode {
        match self {
            Mode::Regular => Mode::Selective,
            Mode::Selective => Mode::Regular,
        }
    }
}

/// Would-be bypass-list sizes for both polarities, surfaced so callers can
/// warn the user before committing a mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModePreview {
    pub regular: usize,
    pub selective: usize,
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a copy of an archive lives.
///
/// The declaration order is the tie-break priority: a lower value wins when
/// choosing the preferred copy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum VariantRole {
    /// Installed in the active packages folder.
    #[default]
    Loaded,
    /// Discovered in a library folder but not installed.
    Available,
    /// Moved to cold storage.
    Archived,
}

impl VariantRole {
    pub const ALL: [VariantRole; 3] = [
        VariantRole::Loaded,
        VariantRole::Available,
        VariantRole::Archived,
    ];

    /// Priority used by the reconciliation tie-break (lower wins).
    pub fn priority(self) -> u8 {
        self as u8
    }

    /// Non-archived copies count as active locations.
    pub fn is_active(self) -> bool {
        self != VariantRole::Archived
    }

    /// Lower-case name used in suffixed map keys.
    pub fn as_str(self) -> &'static str {
        match self {
            VariantRole::Loaded => "loaded",
            VariantRole::Available => "available",
            VariantRole::Archived => "archived",
        }
    }

    /// Default status label shown for copies with this role.
    pub fn status_label(self) -> &'static str {
        match self {
            VariantRole::Loaded => "Loaded",
            VariantRole::Available => "Available",
            VariantRole::Archived => "Archived",
        }
    }
}

impl fmt::Display for VariantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariantRole::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown variant role: {}", s))
    }
}

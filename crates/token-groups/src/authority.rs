//! Capability bits carried by authority outputs.
//!
//! An authority output reuses the serialized amount field of a grouped
//! script to hold a capability word instead of a spendable quantity. The
//! top bit (CTRL) marks the word as an authority; the remaining high bits
//! grant individual group-management capabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bitset over the group-management capabilities.
///
/// Combination goes through the named methods rather than bit operators so
/// call sites read as domain statements (`flags.has_capability(MINT)`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupAuthorityFlags(u64);

impl GroupAuthorityFlags {
    pub const NONE: Self = Self(0);
    /// Authority marker. Set on every valid capability word; a serialized
    /// amount with this bit set is an authority, not a quantity.
    pub const CTRL: Self = Self(1 << 63);
    pub const MINT: Self = Self(1 << 62);
    pub const MELT: Self = Self(1 << 61);
    /// The authority may be renewed into a child authority when spent.
    pub const CHILD: Self = Self(1 << 60);
    pub const RESCRIPT: Self = Self(1 << 59);
    /// The authority may act on behalf of any subgroup of its group.
    pub const SUBGROUP: Self = Self(1 << 58);

    pub const ALL: Self = Self(
        Self::CTRL.0 | Self::MINT.0 | Self::MELT.0 | Self::CHILD.0 | Self::RESCRIPT.0
            | Self::SUBGROUP.0,
    );

    /// Every bit position reserved for present or future capabilities.
    /// Nonces embedded alongside a capability word are masked with this so
    /// they can never alias a flag.
    pub const ALL_BITS: Self = Self(0xffff << 48);

    /// Reinterpret a serialized amount field as a capability word.
    #[must_use]
    pub fn from_amount_field(word: u64) -> Self {
        Self(word)
    }

    /// Build a capability word from the given capabilities, deriving CTRL:
    /// the marker is present exactly when any capability is granted.
    #[must_use]
    pub fn authority(capabilities: Self) -> Self {
        let caps = capabilities.without(Self::CTRL);
        if caps == Self::NONE {
            Self::NONE
        } else {
            caps.with(Self::CTRL)
        }
    }

    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True when every bit of `required` is present.
    #[must_use]
    pub fn has_capability(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    /// True when the serialized word marks an authority output.
    #[must_use]
    pub fn is_authority(self) -> bool {
        self.has_capability(Self::CTRL)
    }

    #[must_use]
    pub fn allows_mint(self) -> bool {
        self.has_capability(Self::CTRL.with(Self::MINT))
    }

    #[must_use]
    pub fn allows_melt(self) -> bool {
        self.has_capability(Self::CTRL.with(Self::MELT))
    }

    /// A renewable authority may emit a child authority when consumed.
    #[must_use]
    pub fn is_renewable(self) -> bool {
        self.has_capability(Self::CTRL.with(Self::CHILD))
    }

    #[must_use]
    pub fn allows_rescript(self) -> bool {
        self.has_capability(Self::CTRL.with(Self::RESCRIPT))
    }

    #[must_use]
    pub fn allows_subgroup_delegation(self) -> bool {
        self.has_capability(Self::CTRL.with(Self::SUBGROUP))
    }

    /// The capability bits only, nonce and unassigned bits stripped.
    #[must_use]
    pub fn capability_bits(self) -> Self {
        self.intersection(Self::ALL_BITS)
    }
}

impl fmt::Display for GroupAuthorityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_authority() {
            return write!(f, "none");
        }
        let names = [
            (Self::MINT, "mint"),
            (Self::MELT, "melt"),
            (Self::CHILD, "child"),
            (Self::RESCRIPT, "rescript"),
            (Self::SUBGROUP, "subgroup"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.has_capability(flag) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "ctrl")?;
        }
        Ok(())
    }
}

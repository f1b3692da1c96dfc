use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Visibility contexts a registry variant participates in.
///
/// A variant is visible only when its scopes cover everything the lookup
/// requires: user formulas require `EXPLICIT_USAGE`, compiler-synthesized
/// calls (desugared case blocks, filter operations, join conditions)
/// require `INTERNAL` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeSet(u8);

impl ScopeSet {
    pub const EMPTY: ScopeSet = ScopeSet(0);
    /// Callable directly from user-written formulas.
    pub const EXPLICIT_USAGE: ScopeSet = ScopeSet(1);
    /// Surfaced in suggestion/validation compiles.
    pub const SUGGESTED: ScopeSet = ScopeSet(1 << 1);
    /// Callable from compiler-synthesized expressions.
    pub const INTERNAL: ScopeSet = ScopeSet(1 << 2);
    /// The scope set of an ordinary operation: visible everywhere.
    pub const STANDARD: ScopeSet = ScopeSet(1 | 1 << 1 | 1 << 2);

    pub fn covers(self, required: ScopeSet) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn without(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ScopeSet {
    type Output = ScopeSet;
    fn bitor(self, rhs: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 | rhs.0)
    }
}

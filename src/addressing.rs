//! B-ary tree addressing arithmetic.
//!
//! Every agent is identified by a single non-negative integer. Address 0 is
//! the director (root, no parent); the children of address `a` occupy the
//! inclusive range `[a*B+1, a*B+B]` for breadth `B`. The mapping between an
//! address and its (depth, path-of-sibling-indices) is a pure bijection, so
//! agents can compute parent/child/sibling relationships without any central
//! allocator.
//!
//! All functions here are pure: no I/O, no state.

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Global agent number. 0 is the director.
pub type Address = u64;

/// Breadth used for numbering when the tree is unbounded.
///
/// Large enough that no realistic tree collides; small enough that addresses
/// stay human-readable at shallow depths.
pub const UNBOUNDED_BREADTH: u64 = 1 << 16;

/// Maximum number of direct children per node.
///
/// The `-1` config/wire sentinel parses to [`Breadth::Unbounded`], which is
/// resolved to [`UNBOUNDED_BREADTH`] only where the arithmetic needs a
/// concrete modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Breadth {
    /// At most `n` children per node (`n >= 1`).
    Bounded(u64),
    /// No configured limit; numbering uses [`UNBOUNDED_BREADTH`].
    Unbounded,
}

impl Breadth {
    /// Parse a raw config value: positive passes through, `-1` means
    /// unbounded, anything else is invalid.
    pub fn from_raw(raw: i64) -> Result<Self, HubError> {
        match raw {
            -1 => Ok(Breadth::Unbounded),
            n if n >= 1 => Ok(Breadth::Bounded(n as u64)),
            other => Err(HubError::InvalidBreadth(other)),
        }
    }

    /// The concrete modulus used by the numbering arithmetic.
    pub fn effective(self) -> u64 {
        match self {
            Breadth::Bounded(n) => n,
            Breadth::Unbounded => UNBOUNDED_BREADTH,
        }
    }
}

/// Inclusive `(first, last)` child addresses of `agent`.
///
/// The range always spans exactly `breadth.effective()` slots, regardless of
/// how many children are actually spawned.
pub fn children_of(agent: Address, breadth: Breadth) -> (Address, Address) {
    let b = breadth.effective();
    (agent * b + 1, agent * b + b)
}

/// Parent of `agent`, or `None` for the director.
pub fn parent_of(agent: Address, breadth: Breadth) -> Option<Address> {
    if agent == 0 {
        return None;
    }
    Some((agent - 1) / breadth.effective())
}

/// Depth of `agent` in the tree (director = 0).
pub fn agent_depth(agent: Address, breadth: Breadth) -> u32 {
    let mut depth = 0;
    let mut current = agent;
    while let Some(parent) = parent_of(current, breadth) {
        current = parent;
        depth += 1;
    }
    depth
}

/// Address of `agent`'s `n`-th child (0-indexed).
pub fn nth_child(agent: Address, n: u64, breadth: Breadth) -> Result<Address, HubError> {
    let b = breadth.effective();
    if n >= b {
        return Err(HubError::ChildIndexOutOfRange {
            index: n,
            breadth: b,
        });
    }
    Ok(agent * b + 1 + n)
}

/// 0-based index of `agent` among its parent's children.
///
/// The director has no siblings; returns 0 by convention.
pub fn sibling_index(agent: Address, breadth: Breadth) -> u64 {
    if agent == 0 {
        return 0;
    }
    (agent - 1) % breadth.effective()
}

/// Whether `candidate` falls within `parent`'s child range.
pub fn owns_child(parent: Address, candidate: Address, breadth: Breadth) -> bool {
    let (first, last) = children_of(parent, breadth);
    (first..=last).contains(&candidate)
}

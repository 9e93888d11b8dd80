//! Automaton vertices.
//!
//! A state is one observed configuration of an allocation family: for plain
//! objects the hidden-class shape, for functions the shape plus the installed
//! code version. States are interned per machine by structural key, so a
//! machine holds at most one state per configuration.
//!
//! The variant set is closed: a machine contains either object states or
//! function states, never both. Rather than dispatching virtually, a state
//! always carries both handles and object states pin `code` to the sentinel;
//! the structural key orders by code first, which degenerates to pure shape
//! order inside object machines.

use crate::transition::TransitionId;
use crate::typeinfo::{CodeIdx, ShapeIdx};
use std::collections::BTreeMap;

// =============================================================================
// State Id
// =============================================================================

/// Dense per-machine state identifier. Id 0 is always the start state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct StateId(pub u32);

impl StateId {
    /// The start state of every machine.
    pub const START: Self = Self(0);
}

/// Depth value of a state not yet attached to the shortest-path tree.
pub const UNREACHED: u32 = u32::MAX;

// =============================================================================
// Structural key
// =============================================================================

/// Interning key: code version first, then shape.
///
/// Function states order by (code, shape); object states all share the
/// sentinel code, so they order by shape alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StateKey {
    /// Code handle; `CodeIdx::NULL` for object states.
    pub code: CodeIdx,
    /// Shape handle.
    pub shape: ShapeIdx,
}

// =============================================================================
// Out-edge key
// =============================================================================

/// Key of an out-edge: summary edges (boilerplate clones) are indexed
/// separately from normal edges to the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeKey {
    /// Target state.
    pub target: StateId,
    /// True for summary (boilerplate-clone) edges.
    pub summary: bool,
}

// =============================================================================
// State
// =============================================================================

/// One vertex of a typestate automaton.
#[derive(Debug)]
pub struct State {
    /// Dense id within the owning machine.
    pub id: StateId,
    /// Shape this state describes.
    pub shape: ShapeIdx,
    /// Installed code version; sentinel for object states.
    pub code: CodeIdx,
    /// Shortest known distance from the start state; `UNREACHED` until an
    /// in-edge attaches this state to the tree.
    pub depth: u32,
    /// In-edge forming the shortest-path tree. `None` only for the start
    /// state and for states not yet connected.
    pub parent_link: Option<TransitionId>,
    /// Out-edges, ordered by (target, kind).
    pub out: BTreeMap<EdgeKey, TransitionId>,
}

impl State {
    /// Create a detached state for `shape`/`code`.
    pub fn new(id: StateId, shape: ShapeIdx, code: CodeIdx) -> Self {
        Self {
            id,
            shape,
            code,
            depth: if id == StateId::START { 0 } else { UNREACHED },
            parent_link: None,
            out: BTreeMap::new(),
        }
    }

    /// Structural interning key of this state.
    #[inline]
    pub fn key(&self) -> StateKey {
        StateKey {
            code: self.code,
            shape: self.shape,
        }
    }

    /// True for the machine's start state.
    #[inline]
    pub fn is_start(&self) -> bool {
        self.id == StateId::START
    }

    /// Number of out-edges.
    #[inline]
    pub fn degree(&self) -> usize {
        self.out.len()
    }

    /// Look up the out-edge matching `key`.
    #[inline]
    pub fn edge(&self, key: EdgeKey) -> Option<TransitionId> {
        self.out.get(&key).copied()
    }
}

// =============================================================================
// Tests
// =============================================================================

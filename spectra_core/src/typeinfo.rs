//! Shape and code descriptors.
//!
//! The engine log refers to hidden classes ("maps") and compiled code objects
//! by opaque heap addresses. This module interns one descriptor per identity
//! and keeps that descriptor stable while the garbage collector moves the
//! underlying object: a GC move rebinds the raw key, never the descriptor, so
//! every state that holds a `ShapeIdx`/`CodeIdx` handle survives relocation
//! untouched.
//!
//! # Back-links
//!
//! A shape knows the single state that owns it (`used_by` is a one-slot
//! binding: in practice a map id identifies a hidden class in exactly one
//! allocation family, and the deopt diagnoser relies on `to_state` returning
//! one owner). A code object keeps the set of function states that ever held
//! it. Shapes additionally record the function machines whose optimized code
//! must be thrown away if the shape mutates.

use crate::machine::MachineId;
use crate::state::StateId;
use rustc_hash::FxHashMap;

// =============================================================================
// Handles
// =============================================================================

/// Handle to an interned shape descriptor.
///
/// Index 0 is the null/start sentinel (raw id −1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ShapeIdx(pub u32);

impl ShapeIdx {
    /// The sentinel shape attached to states under construction and to
    /// every machine's start state.
    pub const NULL: Self = Self(0);

    /// Check whether this is the sentinel.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Handle to an interned code descriptor. Index 0 is the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CodeIdx(pub u32);

impl CodeIdx {
    /// The sentinel code attached to object states and to function start
    /// states.
    pub const NULL: Self = Self(0);

    /// Check whether this is the sentinel.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Raw id of the sentinel descriptors.
pub const NULL_RAW_ID: i64 = -1;

// =============================================================================
// Shape registry
// =============================================================================

/// One interned hidden-class descriptor.
#[derive(Debug)]
pub struct ShapeData {
    /// Current raw engine id; rewritten on GC move.
    pub raw_id: i64,
    /// The unique (machine, state) that owns this shape, if any.
    pub used_by: Option<(MachineId, StateId)>,
    /// Function machines deoptimized when this shape changes. Duplicates
    /// record repeat registrations; order is first-registration order.
    pub dep_funcs: Vec<MachineId>,
}

/// Process-wide mapping raw map id → shape descriptor.
#[derive(Debug)]
pub struct ShapeRegistry {
    by_raw: FxHashMap<i64, ShapeIdx>,
    shapes: Vec<ShapeData>,
}

impl ShapeRegistry {
    /// Create a registry holding only the sentinel.
    pub fn new() -> Self {
        let mut by_raw = FxHashMap::default();
        by_raw.insert(NULL_RAW_ID, ShapeIdx::NULL);
        Self {
            by_raw,
            shapes: vec![ShapeData {
                raw_id: NULL_RAW_ID,
                used_by: None,
                dep_funcs: Vec::new(),
            }],
        }
    }

    /// Return the descriptor for `raw_id`, interning a fresh one on miss.
    pub fn find_or_create(&mut self, raw_id: i64) -> ShapeIdx {
        if raw_id == NULL_RAW_ID {
            return ShapeIdx::NULL;
        }
        if let Some(&idx) = self.by_raw.get(&raw_id) {
            return idx;
        }
        let idx = ShapeIdx(self.shapes.len() as u32);
        self.shapes.push(ShapeData {
            raw_id,
            used_by: None,
            dep_funcs: Vec::new(),
        });
        self.by_raw.insert(raw_id, idx);
        idx
    }

    /// Look up without interning.
    #[inline]
    pub fn find(&self, raw_id: i64) -> Option<ShapeIdx> {
        self.by_raw.get(&raw_id).copied()
    }

    /// GC move: rebind the descriptor at `old_id` under `new_id`.
    ///
    /// No-op when `old_id` is absent, which also makes a repeated move
    /// record idempotent.
    pub fn rewrite(&mut self, old_id: i64, new_id: i64) {
        if old_id == new_id {
            return;
        }
        if let Some(idx) = self.by_raw.remove(&old_id) {
            self.shapes[idx.0 as usize].raw_id = new_id;
            self.by_raw.insert(new_id, idx);
        }
    }

    /// Current raw id of a descriptor.
    #[inline]
    pub fn raw(&self, idx: ShapeIdx) -> i64 {
        self.shapes[idx.0 as usize].raw_id
    }

    /// Bind the owning state. The slot is a singleton: a later binding
    /// replaces the earlier one.
    #[inline]
    pub fn add_usage(&mut self, idx: ShapeIdx, machine: MachineId, state: StateId) {
        self.shapes[idx.0 as usize].used_by = Some((machine, state));
    }

    /// The unique owning state, if one was ever bound.
    #[inline]
    pub fn to_state(&self, idx: ShapeIdx) -> Option<(MachineId, StateId)> {
        self.shapes[idx.0 as usize].used_by
    }

    /// Record a function machine whose optimized code depends on this shape.
    #[inline]
    pub fn add_dep(&mut self, idx: ShapeIdx, machine: MachineId) {
        self.shapes[idx.0 as usize].dep_funcs.push(machine);
    }

    /// Drain the dependent-function list for a shape change report.
    #[inline]
    pub fn take_deps(&mut self, idx: ShapeIdx) -> Vec<MachineId> {
        std::mem::take(&mut self.shapes[idx.0 as usize].dep_funcs)
    }

    /// Number of interned shapes, sentinel included.
    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// True when only the sentinel is interned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.len() <= 1
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Code registry
// =============================================================================

/// One interned compiled-code descriptor.
#[derive(Debug)]
pub struct CodeData {
    /// Current raw engine id; rewritten on GC move.
    pub raw_id: i64,
    /// Function states that ever held this code version.
    pub used_by: Vec<(MachineId, StateId)>,
}

/// Process-wide mapping raw code id → code descriptor.
#[derive(Debug)]
pub struct CodeRegistry {
    by_raw: FxHashMap<i64, CodeIdx>,
    codes: Vec<CodeData>,
}

impl CodeRegistry {
    /// Create a registry holding only the sentinel.
    pub fn new() -> Self {
        let mut by_raw = FxHashMap::default();
        by_raw.insert(NULL_RAW_ID, CodeIdx::NULL);
        Self {
            by_raw,
            codes: vec![CodeData {
                raw_id: NULL_RAW_ID,
                used_by: Vec::new(),
            }],
        }
    }

    /// Return the descriptor for `raw_id`, interning a fresh one on miss.
    pub fn find_or_create(&mut self, raw_id: i64) -> CodeIdx {
        if raw_id == NULL_RAW_ID {
            return CodeIdx::NULL;
        }
        if let Some(&idx) = self.by_raw.get(&raw_id) {
            return idx;
        }
        let idx = CodeIdx(self.codes.len() as u32);
        self.codes.push(CodeData {
            raw_id,
            used_by: Vec::new(),
        });
        self.by_raw.insert(raw_id, idx);
        idx
    }

    /// Look up without interning.
    #[inline]
    pub fn find(&self, raw_id: i64) -> Option<CodeIdx> {
        self.by_raw.get(&raw_id).copied()
    }

    /// GC move: rebind the descriptor at `old_id` under `new_id`.
    pub fn rewrite(&mut self, old_id: i64, new_id: i64) {
        if old_id == new_id {
            return;
        }
        if let Some(idx) = self.by_raw.remove(&old_id) {
            self.codes[idx.0 as usize].raw_id = new_id;
            self.by_raw.insert(new_id, idx);
        }
    }

    /// Current raw id of a descriptor.
    #[inline]
    pub fn raw(&self, idx: CodeIdx) -> i64 {
        self.codes[idx.0 as usize].raw_id
    }

    /// Record a function state holding this code.
    pub fn add_usage(&mut self, idx: CodeIdx, machine: MachineId, state: StateId) {
        let users = &mut self.codes[idx.0 as usize].used_by;
        if !users.contains(&(machine, state)) {
            users.push((machine, state));
        }
    }

    /// Function states that ever held this code.
    #[inline]
    pub fn users(&self, idx: CodeIdx) -> &[(MachineId, StateId)] {
        &self.codes[idx.0 as usize].used_by
    }

    /// Number of interned codes, sentinel included.
    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True when only the sentinel is interned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.len() <= 1
    }
}

impl Default for CodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

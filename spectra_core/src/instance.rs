//! Live-instance bookkeeping.
//!
//! The log names objects by raw heap address, and the garbage collector
//! moves them mid-trace. This table owns one descriptor per observed
//! instance, keyed per kind, and keeps a move record so that an event
//! referring to a stale address resolves through the chain of moves on
//! lookup. The rewrite is lazy on purpose: a move record can precede the
//! allocation event for the same address, so eager rewriting would have
//! nothing to rewrite.
//!
//! A descriptor created before its allocation event is seeded with a hidden
//! machine (negative signature, unnamed), preserving the invariant that
//! every instance owns a machine.

use crate::machine::{MachineArena, MachineId, MachineKind, KIND_COUNT};
use crate::transition::TransitionId;
use bitflags::bitflags;
use rustc_hash::FxHashMap;

// =============================================================================
// Instance Id and flags
// =============================================================================

/// Dense internal instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct InstanceId(pub u32);

bitflags! {
    /// Per-instance watch and storage-mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstanceFlags: u8 {
        /// Property backing store degraded to a dictionary.
        const PROP_DICT = 1 << 0;
        /// Element backing store degraded to a dictionary.
        const ELEM_DICT = 1 << 1;
        /// Watched by the storage-change heuristic.
        const IS_WATCHED = 1 << 2;
        /// Next evolution invalidates the tracked shape's dependents.
        const FORCE_DEOPT = 1 << 3;
    }
}

// =============================================================================
// InstanceDescriptor
// =============================================================================

/// Record of a single object, array, boilerplate or function.
#[derive(Debug)]
pub struct InstanceDescriptor {
    /// Internal id.
    pub id: InstanceId,
    /// Current raw address; rewritten on GC move.
    pub raw_addr: i64,
    /// Kind table this instance lives in.
    pub kind: MachineKind,
    /// Owning machine.
    pub machine: MachineId,
    /// Edge whose trigger recorded this instance's birth.
    pub birth: Option<(MachineId, TransitionId)>,
    /// Watch and storage-mode bits.
    pub flags: InstanceFlags,
    /// Raw `"?"` transition awaiting elaboration by the next mutation event.
    pub pending_raw: Option<(MachineId, TransitionId)>,
}

// =============================================================================
// InstanceTable
// =============================================================================

/// Process-wide instance registry: three address maps (one per kind) over a
/// shared descriptor arena, plus the GC move record.
#[derive(Debug)]
pub struct InstanceTable {
    by_addr: [FxHashMap<i64, InstanceId>; KIND_COUNT],
    descs: Vec<InstanceDescriptor>,
    moved: FxHashMap<i64, i64>,
}

impl InstanceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            by_addr: [
                FxHashMap::default(),
                FxHashMap::default(),
                FxHashMap::default(),
            ],
            descs: Vec::new(),
            moved: FxHashMap::default(),
        }
    }

    /// Borrow a descriptor.
    #[inline]
    pub fn desc(&self, id: InstanceId) -> &InstanceDescriptor {
        &self.descs[id.0 as usize]
    }

    /// Mutably borrow a descriptor.
    #[inline]
    pub fn desc_mut(&mut self, id: InstanceId) -> &mut InstanceDescriptor {
        &mut self.descs[id.0 as usize]
    }

    /// Number of descriptors.
    #[inline]
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// True when no instance was observed yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Resolve `addr` through the move record to its current address.
    pub fn resolve_addr(&self, addr: i64) -> i64 {
        let mut cur = addr;
        let mut hops = 0;
        while let Some(&to) = self.moved.get(&cur) {
            cur = to;
            hops += 1;
            if hops > 64 {
                break; // defect in the log; do not spin
            }
        }
        cur
    }

    /// Look up an instance of `kind`, rewriting a stale address through the
    /// move record when the direct probe misses.
    pub fn lookup(&self, addr: i64, kind: MachineKind) -> Option<InstanceId> {
        let table = &self.by_addr[kind.index()];
        if let Some(&id) = table.get(&addr) {
            return Some(id);
        }
        let resolved = self.resolve_addr(addr);
        if resolved != addr {
            return table.get(&resolved).copied();
        }
        None
    }

    /// Look up or create the descriptor for `(addr, kind)`.
    ///
    /// A fresh descriptor is parked on a hidden machine until a creation
    /// event rebinds it.
    pub fn find_or_create(
        &mut self,
        addr: i64,
        kind: MachineKind,
        machines: &mut MachineArena,
    ) -> InstanceId {
        if let Some(id) = self.lookup(addr, kind) {
            return id;
        }
        let addr = self.resolve_addr(addr);
        let id = InstanceId(self.descs.len() as u32);
        let machine = machines.new_hidden(kind);
        self.descs.push(InstanceDescriptor {
            id,
            raw_addr: addr,
            kind,
            machine,
            birth: None,
            flags: InstanceFlags::empty(),
            pending_raw: None,
        });
        self.by_addr[kind.index()].insert(addr, id);
        id
    }

    /// Register an instance at its allocation event, bound to `machine`.
    ///
    /// An existing descriptor is rebound (the GC may have recycled the
    /// address for a fresh object of the same family or another one).
    pub fn register(&mut self, addr: i64, kind: MachineKind, machine: MachineId) -> InstanceId {
        if let Some(id) = self.lookup(addr, kind) {
            self.descs[id.0 as usize].machine = machine;
            return id;
        }
        let addr = self.resolve_addr(addr);
        let id = InstanceId(self.descs.len() as u32);
        self.descs.push(InstanceDescriptor {
            id,
            raw_addr: addr,
            kind,
            machine,
            birth: None,
            flags: InstanceFlags::empty(),
            pending_raw: None,
        });
        self.by_addr[kind.index()].insert(addr, id);
        id
    }

    /// Record a GC move for lazy lookup rewriting.
    pub fn record_move(&mut self, from: i64, to: i64) {
        if from != to {
            self.moved.insert(from, to);
        }
    }

    /// Eagerly rewrite a known instance's address.
    ///
    /// Kind tables are probed in declaration order; an address belongs to at
    /// most one kind. Returns the rewritten instance, if any.
    pub fn rewrite_addr(&mut self, from: i64, to: i64) -> Option<InstanceId> {
        if from == to {
            return None;
        }
        for table in self.by_addr.iter_mut() {
            if let Some(id) = table.remove(&from) {
                table.insert(to, id);
                self.descs[id.0 as usize].raw_addr = to;
                return Some(id);
            }
        }
        None
    }
}

impl Default for InstanceTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

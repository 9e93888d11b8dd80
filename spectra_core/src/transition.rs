//! Automaton edges.
//!
//! The edge multiset between a pair of states is collapsed into a single
//! `Transition` whose `triggers` set records every distinct operation that
//! drove an instance across the edge. A trigger (`TransPacket`) is keyed by
//! its reason text plus the call-context chain that issued it; repeats of the
//! same key accumulate `count` and `cost` instead of inserting a duplicate.
//!
//! A summary transition additionally references a boilerplate machine: it
//! stands for "clone that template", compressing the template's whole
//! evolution into one edge.

use crate::machine::{MachineArena, MachineId};
use crate::state::StateId;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Call-context chain: machines innermost caller first.
pub type ContextChain = SmallVec<[MachineId; 4]>;

/// Rendering caps: at most this many triggers appear in a merged label.
const MERGE_LIMIT: usize = 30;

// =============================================================================
// Transition Id
// =============================================================================

/// Dense per-machine transition identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TransitionId(pub u32);

// =============================================================================
// TransPacket
// =============================================================================

/// One distinct reason an edge was taken, with its accumulated weight.
#[derive(Debug, Clone)]
pub struct TransPacket {
    /// Why the transition happened, e.g. `"+Fld: x=0"`.
    pub reason: String,
    /// Call chain that issued the operation, innermost first.
    pub contexts: ContextChain,
    /// Accumulated cost (bytes for storage operations, otherwise 0).
    pub cost: u64,
    /// Number of occurrences folded into this packet.
    pub count: u32,
}

impl TransPacket {
    /// Render as `(context, reason)`, the innermost context only.
    pub fn describe(&self, machines: &MachineArena) -> String {
        match self.contexts.first() {
            Some(&ctx) => format!("({}, {})", machines.get(ctx).label(true), self.reason),
            None => format!("({})", self.reason),
        }
    }
}

/// Ordering key of a trigger inside an edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TriggerKey {
    reason: String,
    contexts: ContextChain,
}

// =============================================================================
// Transition
// =============================================================================

/// A directed edge between two states of one machine.
#[derive(Debug)]
pub struct Transition {
    /// Dense id within the owning machine.
    pub id: TransitionId,
    /// Source state.
    pub source: StateId,
    /// Target state.
    pub target: StateId,
    /// `Some(machine)` marks a summary edge cloning that boilerplate.
    pub boilerplate: Option<MachineId>,
    /// Triggers, ordered by (reason, context chain).
    triggers: BTreeMap<TriggerKey, TransPacket>,
}

impl Transition {
    /// Create an edge with an empty trigger set.
    pub fn new(
        id: TransitionId,
        source: StateId,
        target: StateId,
        boilerplate: Option<MachineId>,
    ) -> Self {
        Self {
            id,
            source,
            target,
            boilerplate,
            triggers: BTreeMap::new(),
        }
    }

    /// Fold one occurrence of `(reason, contexts)` into the trigger set.
    ///
    /// An existing packet with the same key gains `count += 1` and
    /// `cost += cost`; otherwise a fresh packet starts at count 1.
    pub fn insert_reason(&mut self, reason: &str, contexts: &[MachineId], cost: u64) -> &TransPacket {
        let key = TriggerKey {
            reason: reason.to_owned(),
            contexts: ContextChain::from_slice(contexts),
        };
        let packet = self
            .triggers
            .entry(key)
            .and_modify(|tp| {
                tp.count += 1;
                tp.cost += cost;
            })
            .or_insert_with(|| TransPacket {
                reason: reason.to_owned(),
                contexts: ContextChain::from_slice(contexts),
                cost,
                count: 1,
            });
        packet
    }

    /// Iterate triggers in key order.
    pub fn triggers(&self) -> impl Iterator<Item = &TransPacket> {
        self.triggers.values()
    }

    /// Number of distinct triggers.
    #[inline]
    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// First trigger whose reason contains `pat`.
    pub fn reason_begin_with(&self, pat: &str) -> Option<&TransPacket> {
        self.triggers.values().find(|tp| tp.reason.contains(pat))
    }

    /// True if any trigger's reason is not exactly `reason`.
    pub fn reason_other_than(&self, reason: &str) -> bool {
        self.triggers.values().any(|tp| tp.reason != reason)
    }

    /// Render the trigger set into one label.
    ///
    /// Triggers beyond [`MERGE_LIMIT`] collapse into `(More...)`; a non-zero
    /// summed cost appends `$$<cost>`; an empty set renders as `"?"`.
    /// `multiline` inserts dot-style `\n` separators for GraphViz labels.
    pub fn merge_reasons(&self, machines: &MachineArena, multiline: bool) -> String {
        let mut out = String::new();
        let mut cost = 0u64;
        let mut shown = 0usize;

        for tp in self.triggers.values() {
            if shown >= MERGE_LIMIT {
                break;
            }
            if shown > 0 {
                out.push('+');
                if multiline {
                    out.push_str("\\n");
                }
            }
            out.push_str(&tp.describe(machines));
            cost += tp.cost;
            shown += 1;
        }

        if self.triggers.len() > MERGE_LIMIT {
            if multiline {
                out.push_str("+\\n");
            } else {
                out.push('+');
            }
            out.push_str("(More...)");
        }

        if cost != 0 {
            out.push_str(&format!("$${}", cost));
        }

        if out.is_empty() {
            out.push('?');
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineKind;

    fn arena_with_fn() -> (MachineArena, MachineId) {
        let mut arena = MachineArena::new();
        let m = arena.ensure_signature(1, MachineKind::Function);
        arena.get_mut(m).set_name("outer");
        (arena, m)
    }

    #[test]
    fn test_insert_reason_dedups_by_key() {
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(1), None);

        t.insert_reason("+Fld: x=0", &[], 0);
        t.insert_reason("+Fld: x=0", &[], 0);
        t.insert_reason("+Fld: y=0", &[], 0);

        assert_eq!(t.trigger_count(), 2);
        let x = t.reason_begin_with("+Fld: x").unwrap();
        assert_eq!(x.count, 2);
    }

    #[test]
    fn test_insert_reason_accumulates_cost() {
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(0), None);

        t.insert_reason("CowCpy", &[], 64);
        t.insert_reason("CowCpy", &[], 128);

        let tp = t.reason_begin_with("CowCpy").unwrap();
        assert_eq!(tp.cost, 192);
        assert_eq!(tp.count, 2);
    }

    #[test]
    fn test_contexts_split_packets() {
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(1), None);

        t.insert_reason("+Obj", &[MachineId(1)], 0);
        t.insert_reason("+Obj", &[MachineId(2)], 0);

        assert_eq!(t.trigger_count(), 2);
    }

    #[test]
    fn test_reason_other_than() {
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(1), None);
        t.insert_reason("?", &[], 0);
        assert!(!t.reason_other_than("?"));

        t.insert_reason("+Fld: x=0", &[], 0);
        assert!(t.reason_other_than("?"));
    }

    #[test]
    fn test_merge_reasons_empty_is_question_mark() {
        let (arena, _) = arena_with_fn();
        let t = Transition::new(TransitionId(0), StateId(0), StateId(1), None);
        assert_eq!(t.merge_reasons(&arena, false), "?");
    }

    #[test]
    fn test_merge_reasons_appends_cost() {
        let (arena, _) = arena_with_fn();
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(0), None);
        t.insert_reason("AryExp", &[], 256);

        let label = t.merge_reasons(&arena, false);
        assert!(label.contains("AryExp"));
        assert!(label.ends_with("$$256"));
    }

    #[test]
    fn test_merge_reasons_includes_context() {
        let (arena, m) = arena_with_fn();
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(1), None);
        t.insert_reason("+Obj", &[m], 0);

        let label = t.merge_reasons(&arena, false);
        assert!(label.contains("F0"));
        assert!(label.contains("+Obj"));
    }

    #[test]
    fn test_merge_reasons_caps_at_limit() {
        let (arena, _) = arena_with_fn();
        let mut t = Transition::new(TransitionId(0), StateId(0), StateId(1), None);
        for i in 0..40 {
            t.insert_reason(&format!("+Fld: f{:02}=0", i), &[], 0);
        }

        let label = t.merge_reasons(&arena, false);
        assert!(label.contains("(More...)"));
    }
}

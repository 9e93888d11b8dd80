//! Typestate automata.
//!
//! One `StateMachine` exists per allocation signature and tracks every
//! instance born at that site. The machine is a directed multigraph over
//! interned states with a shortest-path tree (SPT) threaded through it:
//! every non-start state carries a `parent_link` in-edge and a `depth`, and
//! edge insertion relaxes the pair whenever a shorter route via the new
//! edge's source appears.
//!
//! Relaxation is deliberately not propagated transitively: a later, shorter
//! path lowers the target's depth without revisiting its descendants. Path
//! queries walk parent links only, so the tree is a connectivity-preserving
//! annotation for printing evolution histories, not an exact metric closure.
//!
//! # Machine kinds
//!
//! ```text
//!   Boilerplate   object used only as a literal template
//!   Object        plain objects / arrays / contexts, keyed by constructor
//!   Function      closures; states carry a code version beside the shape
//! ```

use crate::state::{EdgeKey, State, StateId, StateKey};
use crate::transition::{Transition, TransitionId};
use crate::typeinfo::{CodeIdx, CodeRegistry, ShapeIdx, ShapeRegistry};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt::Write as _;

// =============================================================================
// Identifiers
// =============================================================================

/// Global dense machine identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MachineId(pub u32);

/// The three machine kinds; also the per-kind table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineKind {
    /// Template object cloned by literals.
    Boilerplate = 0,
    /// Plain object, array or context family.
    Object = 1,
    /// Closure family; states carry code versions.
    Function = 2,
}

/// Number of machine kinds.
pub const KIND_COUNT: usize = 3;

impl MachineKind {
    /// Table index of this kind.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

// =============================================================================
// StateMachine
// =============================================================================

/// One typestate automaton.
#[derive(Debug)]
pub struct StateMachine {
    /// Global machine id.
    pub id: MachineId,
    /// Kind of instances this machine tracks.
    pub kind: MachineKind,
    /// Human name; empty until a creation event supplies one.
    name: String,
    states: Vec<State>,
    by_key: BTreeMap<StateKey, StateId>,
    transitions: Vec<Transition>,
    /// Live instance address → current state.
    inst_at: FxHashMap<i64, StateId>,
    /// Whether this object family made optimized code bail out.
    pub cause_deopt: bool,
    /// Function machines: ever produced optimized code.
    pub been_optimized: bool,
    /// Function machines: optimization currently permitted.
    pub allow_opt: bool,
    /// Function machines: last disable/reenable message.
    pub opt_msg: String,
    /// Function machines: deopt count per bailout (inline-cache) site.
    pub deopt_counts: BTreeMap<u32, u32>,
    /// Function machines: total recorded deopts.
    pub total_deopts: u32,
}

impl StateMachine {
    /// Create a machine with its start state attached to the sentinels.
    pub fn new(id: MachineId, kind: MachineKind) -> Self {
        let start = State::new(StateId::START, ShapeIdx::NULL, CodeIdx::NULL);
        let mut by_key = BTreeMap::new();
        by_key.insert(start.key(), StateId::START);
        Self {
            id,
            kind,
            name: String::new(),
            states: vec![start],
            by_key,
            transitions: Vec::new(),
            inst_at: FxHashMap::default(),
            cause_deopt: false,
            been_optimized: false,
            allow_opt: true,
            opt_msg: String::new(),
            deopt_counts: BTreeMap::new(),
            total_deopts: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Naming
    // -------------------------------------------------------------------------

    /// Assign the human name.
    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    /// True once a creation event named this machine.
    #[inline]
    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    /// The human name (may be empty).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `F<id>`/`O<id>` when succinct or unnamed, `name(F<id>)` otherwise.
    pub fn label(&self, succinct: bool) -> String {
        let tag = if self.kind == MachineKind::Function {
            'F'
        } else {
            'O'
        };
        if succinct || self.name.is_empty() {
            format!("{}{}", tag, self.id.0)
        } else {
            format!("{}({}{})", self.name, tag, self.id.0)
        }
    }

    /// Name if present, succinct label otherwise. Used as the start state's
    /// node text.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.label(true)
        } else {
            self.name.clone()
        }
    }

    // -------------------------------------------------------------------------
    // State access
    // -------------------------------------------------------------------------

    /// Borrow a state.
    #[inline]
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0 as usize]
    }

    #[inline]
    fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.0 as usize]
    }

    /// Borrow an edge.
    #[inline]
    pub fn trans(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.0 as usize]
    }

    /// Mutably borrow an edge.
    #[inline]
    pub fn trans_mut(&mut self, id: TransitionId) -> &mut Transition {
        &mut self.transitions[id.0 as usize]
    }

    /// Number of states, start included.
    #[inline]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Number of edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.transitions.len()
    }

    /// States plus edges; the draw filter's size measure.
    #[inline]
    pub fn size(&self) -> usize {
        self.states.len() + self.transitions.len()
    }

    /// Look up a state by structural key without interning.
    pub fn find_state(&self, shape: ShapeIdx, code: CodeIdx) -> Option<StateId> {
        self.by_key.get(&StateKey { code, shape }).copied()
    }

    /// Return the state for the key, interning a clone on miss.
    ///
    /// A newly interned state binds itself as the owner of its shape and
    /// registers with its code version; sentinels are never bound.
    pub fn search_state(
        &mut self,
        shapes: &mut ShapeRegistry,
        codes: &mut CodeRegistry,
        shape: ShapeIdx,
        code: CodeIdx,
    ) -> StateId {
        let key = StateKey { code, shape };
        if let Some(&sid) = self.by_key.get(&key) {
            return sid;
        }
        let sid = StateId(self.states.len() as u32);
        self.states.push(State::new(sid, shape, code));
        self.by_key.insert(key, sid);
        if !shape.is_null() {
            shapes.add_usage(shape, self.id, sid);
        }
        if !code.is_null() {
            codes.add_usage(code, self.id, sid);
        }
        sid
    }

    // -------------------------------------------------------------------------
    // Instance tracking
    // -------------------------------------------------------------------------

    /// Current state of `addr`, inserting the start mapping when unknown.
    ///
    /// `new_instance` resets a reused address (the GC reclaimed the old
    /// object and handed the slot to a fresh one) back to start.
    pub fn find_instance(&mut self, addr: i64, new_instance: bool) -> StateId {
        match self.inst_at.get_mut(&addr) {
            Some(slot) => {
                if new_instance {
                    *slot = StateId::START;
                }
                *slot
            }
            None => {
                self.inst_at.insert(addr, StateId::START);
                StateId::START
            }
        }
    }

    /// Current state of `addr` without inserting; start when unknown.
    pub fn current_state(&self, addr: i64) -> StateId {
        self.inst_at.get(&addr).copied().unwrap_or(StateId::START)
    }

    /// Place `addr` at `state` directly (object aliasing).
    pub fn add_instance(&mut self, addr: i64, state: StateId) {
        self.inst_at.insert(addr, state);
    }

    /// GC move: remap the address key, keeping the state.
    pub fn rename_instance(&mut self, old_addr: i64, new_addr: i64) {
        if let Some(state) = self.inst_at.remove(&old_addr) {
            self.inst_at.insert(new_addr, state);
        }
    }

    /// Instances born here: the summed trigger counts on the start state's
    /// out-edges.
    pub fn count_instances(&self) -> u32 {
        self.state(StateId::START)
            .out
            .values()
            .map(|&eid| self.trans(eid).triggers().map(|tp| tp.count).sum::<u32>())
            .sum()
    }

    // -------------------------------------------------------------------------
    // Evolution
    // -------------------------------------------------------------------------

    /// Move `addr` across the automaton.
    ///
    /// 1. Locate the instance (`new_instance` resets to start).
    /// 2. If `old_shape` disagrees with the located state, reconcile through a
    ///    missing edge labelled `"?"` in the `miss_ctx` context.
    /// 3. Intern the target state (`None` components reuse the current ones).
    /// 4. Find or create the edge (summary when `boilerplate` is given) and
    ///    fold `(reason, contexts, cost)` into it.
    /// 5. Relax the SPT across the edge and migrate the instance.
    #[allow(clippy::too_many_arguments)]
    pub fn evolve(
        &mut self,
        shapes: &mut ShapeRegistry,
        codes: &mut CodeRegistry,
        addr: i64,
        contexts: &[MachineId],
        old_shape: Option<ShapeIdx>,
        new_shape: Option<ShapeIdx>,
        new_code: Option<CodeIdx>,
        boilerplate: Option<MachineId>,
        reason: &str,
        cost: u64,
        new_instance: bool,
        miss_ctx: MachineId,
    ) -> TransitionId {
        let mut cur = self.find_instance(addr, new_instance);

        if let Some(old) = old_shape {
            if self.state(cur).shape != old {
                cur = self.reconcile(shapes, codes, addr, cur, old, miss_ctx);
            }
        }

        let shape = new_shape.unwrap_or(self.state(cur).shape);
        let code = new_code.unwrap_or(self.state(cur).code);
        let tgt = self.search_state(shapes, codes, shape, code);

        let eid = self.link(cur, tgt, boilerplate);
        self.trans_mut(eid).insert_reason(reason, contexts, cost);
        self.relax(eid);
        self.inst_at.insert(addr, tgt);
        eid
    }

    /// Record a raw `"?"` transition to the state owning `shape` without
    /// migrating the instance. The caller elaborates the edge later.
    pub fn raw_transition(
        &mut self,
        shapes: &mut ShapeRegistry,
        codes: &mut CodeRegistry,
        addr: i64,
        shape: ShapeIdx,
        miss_ctx: MachineId,
    ) -> TransitionId {
        let cur = self.find_instance(addr, false);
        let code = self.state(cur).code;
        let tgt = self.search_state(shapes, codes, shape, code);
        let eid = self.link(cur, tgt, None);
        self.trans_mut(eid).insert_reason("?", &[miss_ctx], 0);
        self.relax(eid);
        eid
    }

    /// Reconcile a stale instance position: jump through a missing edge to
    /// the state owning `old_shape`, creating that state on demand.
    fn reconcile(
        &mut self,
        shapes: &mut ShapeRegistry,
        codes: &mut CodeRegistry,
        addr: i64,
        cur: StateId,
        old_shape: ShapeIdx,
        miss_ctx: MachineId,
    ) -> StateId {
        let code = self.state(cur).code;
        let exp = self.search_state(shapes, codes, old_shape, code);
        let eid = self.link(cur, exp, None);
        self.trans_mut(eid).insert_reason("?", &[miss_ctx], 0);
        self.relax(eid);
        self.inst_at.insert(addr, exp);
        exp
    }

    /// Find or create the edge `src → tgt` of the requested kind.
    fn link(&mut self, src: StateId, tgt: StateId, boilerplate: Option<MachineId>) -> TransitionId {
        let key = EdgeKey {
            target: tgt,
            summary: boilerplate.is_some(),
        };
        if let Some(eid) = self.state(src).edge(key) {
            return eid;
        }
        let eid = TransitionId(self.transitions.len() as u32);
        self.transitions.push(Transition::new(eid, src, tgt, boilerplate));
        self.state_mut(src).out.insert(key, eid);
        eid
    }

    /// Relax the SPT across one edge, after its reason has been folded in.
    ///
    /// An edge still carrying nothing but `"?"` triggers is a missing edge:
    /// it only attaches targets that had no parent at all, keeping them
    /// reachable without disturbing an established tree. Any real reason on
    /// the edge makes it a normal insertion, which lowers the target's depth
    /// whenever the route through the source is strictly shorter.
    fn relax(&mut self, eid: TransitionId) {
        let (src, tgt, missing) = {
            let t = self.trans(eid);
            (t.source, t.target, !t.reason_other_than("?"))
        };
        if tgt == StateId::START || src == tgt {
            return;
        }
        let cand = self.state(src).depth.saturating_add(1);
        let target = self.state_mut(tgt);
        if missing {
            if target.parent_link.is_none() {
                target.parent_link = Some(eid);
                target.depth = cand;
            }
        } else if cand < target.depth {
            target.parent_link = Some(eid);
            target.depth = cand;
        }
    }

    // -------------------------------------------------------------------------
    // Path search
    // -------------------------------------------------------------------------

    /// Tree path `from → … → to`, found by walking `to`'s parent links.
    ///
    /// Returns the edges in forward order, or `None` when `to` is not a tree
    /// descendant of `from`. A same-state query yields an empty path.
    pub fn forward_search_path(&self, from: StateId, to: StateId) -> Option<Vec<TransitionId>> {
        let mut path = Vec::new();
        let mut cur = to;
        while cur != from && cur != StateId::START {
            let link = self.state(cur).parent_link?;
            path.push(link);
            cur = self.trans(link).source;
        }
        if cur != from {
            return None;
        }
        path.reverse();
        Some(path)
    }

    /// Tree path walked upward from `from` to the ancestor `to`.
    ///
    /// Returns the edges in walk (backward) order, or `None` when `to` is
    /// not an ancestor of `from`.
    pub fn backward_search_path(&self, from: StateId, to: StateId) -> Option<Vec<TransitionId>> {
        let mut path = Vec::new();
        let mut cur = from;
        while cur != to && cur != StateId::START {
            let link = self.state(cur).parent_link?;
            path.push(link);
            cur = self.trans(link).source;
        }
        if cur != to {
            return None;
        }
        Some(path)
    }

    // -------------------------------------------------------------------------
    // Function bookkeeping
    // -------------------------------------------------------------------------

    /// Toggle optimization and remember the engine's message.
    pub fn set_opt_state(&mut self, allow: bool, msg: &str) {
        self.allow_opt = allow;
        self.opt_msg.clear();
        self.opt_msg.push_str(msg);
    }

    /// Record one deopt at `bailout_id`.
    pub fn add_deopt(&mut self, bailout_id: u32) {
        *self.deopt_counts.entry(bailout_id).or_insert(0) += 1;
        self.total_deopts += 1;
    }

    // -------------------------------------------------------------------------
    // GraphViz
    // -------------------------------------------------------------------------

    /// Node text: machine name for the start state, hex code id for function
    /// states, hex shape id otherwise.
    pub fn state_text(
        &self,
        sid: StateId,
        shapes: &ShapeRegistry,
        codes: &CodeRegistry,
    ) -> String {
        let s = self.state(sid);
        if s.is_start() {
            self.display_name()
        } else if self.kind == MachineKind::Function {
            fmt_id(codes.raw(s.code))
        } else {
            fmt_id(shapes.raw(s.shape))
        }
    }

    /// Emit this machine as one `digraph`, breadth-first from start.
    ///
    /// SPT tree edges draw solid, the rest dotted; the start state is a
    /// double circle.
    pub fn draw_graphviz(
        &self,
        machines: &MachineArena,
        shapes: &ShapeRegistry,
        codes: &CodeRegistry,
        out: &mut String,
    ) {
        let _ = writeln!(out, "digraph {} {{", self.label(true));
        let _ = writeln!(out, "\tnode[nodesep=2.0];");
        let _ = writeln!(out, "\tgraph[overlap=false];");

        let mut visited = vec![false; self.states.len()];
        let mut queue = std::collections::VecDeque::new();
        visited[StateId::START.0 as usize] = true;
        queue.push_back(StateId::START);

        while let Some(sid) = queue.pop_front() {
            let s = self.state(sid);
            let style = if s.is_start() {
                "shape=doublecircle"
            } else {
                "shape=egg"
            };
            let _ = writeln!(
                out,
                "\t{} [{}, label=\"{}\"];",
                sid.0,
                style,
                self.state_text(sid, shapes, codes)
            );

            for &eid in s.out.values() {
                let t = self.trans(eid);
                if !visited[t.target.0 as usize] {
                    visited[t.target.0 as usize] = true;
                    queue.push_back(t.target);
                }
                let style = if self.state(t.target).parent_link == Some(eid) {
                    "style=solid"
                } else {
                    "style=dotted"
                };
                let _ = writeln!(
                    out,
                    "\t{} -> {} [{}, label=\"{}\"];",
                    sid.0,
                    t.target.0,
                    style,
                    t.merge_reasons(machines, true)
                );
            }
        }

        let _ = writeln!(out, "}}\n");
    }
}

/// Hex rendering of a raw engine id; the sentinel shows as `-1`.
fn fmt_id(raw: i64) -> String {
    if raw < 0 {
        format!("-{:x}", raw.wrapping_neg())
    } else {
        format!("{:x}", raw)
    }
}

// =============================================================================
// MachineArena
// =============================================================================

/// Owner of every machine, plus the per-kind signature indexes.
#[derive(Debug)]
pub struct MachineArena {
    machines: Vec<StateMachine>,
    by_sig: [FxHashMap<i64, MachineId>; KIND_COUNT],
    hidden_sig: [i64; KIND_COUNT],
}

impl MachineArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            machines: Vec::new(),
            by_sig: [
                FxHashMap::default(),
                FxHashMap::default(),
                FxHashMap::default(),
            ],
            hidden_sig: [-1; KIND_COUNT],
        }
    }

    /// Borrow a machine.
    #[inline]
    pub fn get(&self, id: MachineId) -> &StateMachine {
        &self.machines[id.0 as usize]
    }

    /// Mutably borrow a machine.
    #[inline]
    pub fn get_mut(&mut self, id: MachineId) -> &mut StateMachine {
        &mut self.machines[id.0 as usize]
    }

    /// Number of machines.
    #[inline]
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// True when no machine exists yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Iterate machines in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &StateMachine> {
        self.machines.iter()
    }

    /// Machine registered under `(sig, kind)`, if any.
    pub fn find_signature(&self, sig: i64, kind: MachineKind) -> Option<MachineId> {
        self.by_sig[kind.index()].get(&sig).copied()
    }

    /// Machine registered under `(sig, kind)`, creating one on miss.
    pub fn ensure_signature(&mut self, sig: i64, kind: MachineKind) -> MachineId {
        if let Some(id) = self.find_signature(sig, kind) {
            return id;
        }
        let id = MachineId(self.machines.len() as u32);
        self.machines.push(StateMachine::new(id, kind));
        self.by_sig[kind.index()].insert(sig, id);
        id
    }

    /// Create an unnamed machine under the next hidden (negative) signature.
    ///
    /// Instances observed before their allocation event are parked here so
    /// that every descriptor owns a machine.
    pub fn new_hidden(&mut self, kind: MachineKind) -> MachineId {
        let sig = self.hidden_sig[kind.index()];
        self.hidden_sig[kind.index()] -= 1;
        self.ensure_signature(sig, kind)
    }

    /// GC move: rebind the signature key in one kind table.
    pub fn rebind_signature(&mut self, kind: MachineKind, old_sig: i64, new_sig: i64) {
        if old_sig == new_sig {
            return;
        }
        let table = &mut self.by_sig[kind.index()];
        if let Some(id) = table.remove(&old_sig) {
            table.insert(new_sig, id);
        }
    }
}

impl Default for MachineArena {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

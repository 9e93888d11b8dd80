//! The analyzer context.
//!
//! All process-wide state of a replay lives in one `Analyzer` value threaded
//! through the event handlers: shape/code registries, the machine arena, the
//! instance table, the diagnostic sink, the deferred-diagnosis queue and the
//! tracked-map notifier. Tests instantiate contexts freely; nothing is
//! global.
//!
//! The context also owns evolution orchestration: the machine performs the
//! graph surgery, and the context layers the per-instance follow-ups on top
//! (forced-deopt notification, storage-change heuristic, birth records).

use crate::diagnosis::{self, DeoptPack};
use crate::instance::{InstanceFlags, InstanceId, InstanceTable};
use crate::machine::{MachineArena, MachineId, MachineKind};
use crate::report::Reporter;
use crate::transition::TransitionId;
use crate::typeinfo::{CodeIdx, CodeRegistry, ShapeIdx, ShapeRegistry};
use rustc_hash::FxHashMap;

/// Everything one replay owns.
#[derive(Debug)]
pub struct Analyzer {
    /// Interned hidden-class descriptors.
    pub shapes: ShapeRegistry,
    /// Interned code descriptors.
    pub codes: CodeRegistry,
    /// Every machine, with the per-kind signature indexes.
    pub machines: MachineArena,
    /// Every observed instance.
    pub instances: InstanceTable,
    /// Diagnostic sink.
    pub reporter: Reporter,
    /// Deopt checks whose failed object has not been observed yet, keyed by
    /// the failed object's address.
    pub pending_deopts: FxHashMap<i64, Vec<DeoptPack>>,
    /// Expected-shape lists stashed per inline-cache check site.
    pub deopt_maps: FxHashMap<i64, Vec<ShapeIdx>>,
    /// Shape currently armed by `BeginDeoptOnMap`.
    pub map_notifier: Option<ShapeIdx>,
    /// Sentinel function machine resolving unknown call contexts.
    pub miss_machine: MachineId,
    /// Whether deopt diagnosis is enabled.
    pub analyze: bool,
}

impl Analyzer {
    /// Context with a stdout-echoing reporter.
    pub fn new() -> Self {
        Self::with_reporter(Reporter::new())
    }

    /// Context retaining diagnostics without echoing; the default for tests.
    pub fn quiet() -> Self {
        Self::with_reporter(Reporter::quiet())
    }

    /// Context around a caller-supplied reporter.
    pub fn with_reporter(reporter: Reporter) -> Self {
        let mut machines = MachineArena::new();
        let miss_machine = machines.new_hidden(MachineKind::Function);
        machines.get_mut(miss_machine).set_name("*MISS*");
        Self {
            shapes: ShapeRegistry::new(),
            codes: CodeRegistry::new(),
            machines,
            instances: InstanceTable::new(),
            reporter,
            pending_deopts: FxHashMap::default(),
            deopt_maps: FxHashMap::default(),
            map_notifier: None,
            miss_machine,
            analyze: true,
        }
    }

    // -------------------------------------------------------------------------
    // Evolution orchestration
    // -------------------------------------------------------------------------

    /// Evolve an object/boilerplate instance and run the per-instance
    /// follow-ups.
    #[allow(clippy::too_many_arguments)]
    pub fn evolve_object(
        &mut self,
        mid: MachineId,
        iid: InstanceId,
        contexts: &[MachineId],
        old_shape: Option<ShapeIdx>,
        new_shape: Option<ShapeIdx>,
        boilerplate: Option<MachineId>,
        reason: &str,
        cost: u64,
        new_instance: bool,
    ) -> TransitionId {
        let addr = self.instances.desc(iid).raw_addr;
        let miss = self.miss_machine;
        let eid = self.machines.get_mut(mid).evolve(
            &mut self.shapes,
            &mut self.codes,
            addr,
            contexts,
            old_shape,
            new_shape,
            None,
            boilerplate,
            reason,
            cost,
            new_instance,
            miss,
        );
        if new_instance {
            self.instances.desc_mut(iid).birth = Some((mid, eid));
        }
        self.after_evolution(mid, iid, eid);
        eid
    }

    /// Evolve a function instance (shape and/or code) and run the
    /// follow-ups.
    #[allow(clippy::too_many_arguments)]
    pub fn evolve_function(
        &mut self,
        mid: MachineId,
        iid: InstanceId,
        contexts: &[MachineId],
        new_shape: Option<ShapeIdx>,
        new_code: Option<CodeIdx>,
        reason: &str,
        cost: u64,
        new_instance: bool,
    ) -> TransitionId {
        let addr = self.instances.desc(iid).raw_addr;
        let miss = self.miss_machine;
        let eid = self.machines.get_mut(mid).evolve(
            &mut self.shapes,
            &mut self.codes,
            addr,
            contexts,
            None,
            new_shape,
            new_code,
            None,
            reason,
            cost,
            new_instance,
            miss,
        );
        if new_instance {
            self.instances.desc_mut(iid).birth = Some((mid, eid));
        }
        self.after_evolution(mid, iid, eid);
        eid
    }

    /// Record a raw `"?"` transition for a `SetMap` record; the next
    /// mutation event on the instance elaborates it.
    pub fn raw_object_transition(&mut self, mid: MachineId, iid: InstanceId, shape: ShapeIdx) {
        let addr = self.instances.desc(iid).raw_addr;
        let miss = self.miss_machine;
        let eid = self.machines.get_mut(mid).raw_transition(
            &mut self.shapes,
            &mut self.codes,
            addr,
            shape,
            miss,
        );
        self.instances.desc_mut(iid).pending_raw = Some((mid, eid));
    }

    /// Elaborate a pending raw transition: fold the real reason into the
    /// `"?"` edge and migrate the instance across it.
    pub fn elaborate_raw(
        &mut self,
        mid: MachineId,
        iid: InstanceId,
        eid: TransitionId,
        contexts: &[MachineId],
        reason: &str,
        cost: u64,
    ) {
        let addr = self.instances.desc(iid).raw_addr;
        let m = self.machines.get_mut(mid);
        m.trans_mut(eid).insert_reason(reason, contexts, cost);
        let tgt = m.trans(eid).target;
        m.add_instance(addr, tgt);
        self.after_evolution(mid, iid, eid);
    }

    /// Per-instance follow-ups after any migration: forced-deopt
    /// notification, then the storage-change heuristic.
    fn after_evolution(&mut self, mid: MachineId, iid: InstanceId, eid: TransitionId) {
        let flags = self.instances.desc(iid).flags;

        if flags.contains(InstanceFlags::FORCE_DEOPT) {
            self.instances
                .desc_mut(iid)
                .flags
                .remove(InstanceFlags::FORCE_DEOPT);
            if let Some(shape) = self.map_notifier {
                diagnosis::report_shape_deps(self, shape, Some((mid, eid)));
            }
        }

        if self.machines.get(mid).kind != MachineKind::Function {
            diagnosis::storage_change_check(self, mid, iid);
        }
    }

    // -------------------------------------------------------------------------
    // Lookup helpers
    // -------------------------------------------------------------------------

    /// An address may name a boilerplate or a plain object; probe in that
    /// order.
    pub fn lookup_object(&self, addr: i64) -> Option<InstanceId> {
        self.instances
            .lookup(addr, MachineKind::Boilerplate)
            .or_else(|| self.instances.lookup(addr, MachineKind::Object))
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

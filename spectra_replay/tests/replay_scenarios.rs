//! End-to-end replay scenarios.
//!
//! Each test feeds literal log text through the real tokenizer and dispatch
//! table and asserts on the reconstructed automata and the emitted
//! diagnostics.
//!
//! Coverage:
//! - Creation idempotence and state sharing across instances
//! - Shortest-path-tree depths and path queries after field walks
//! - The three deopt classifications and the deferred-diagnosis queue
//! - GC moves (objects and maps), including stale-address references
//! - The map-notifier / forced-deopt chain

use spectra_core::machine::MachineKind;
use spectra_core::state::StateId;
use spectra_core::typeinfo::CodeIdx;
use spectra_core::Analyzer;
use spectra_replay::{replay_str, run_log};

fn replayed(log: &str) -> Analyzer {
    let mut an = Analyzer::quiet();
    run_log(&mut an, log, false).expect("replay failed");
    an
}

// =============================================================================
// Scenario 1: two literals, same site
// =============================================================================

#[test]
fn test_two_literals_share_one_state() {
    let an = replayed(
        "2 100 0 a 5000 0\n\
         2 200 0 a 5000 0\n",
    );

    let mid = an
        .machines
        .find_signature(0x5000, MachineKind::Object)
        .expect("one machine keyed by the allocation signature");
    let m = an.machines.get(mid);

    assert_eq!(m.state_count(), 2); // start + shape a
    assert_eq!(m.edge_count(), 1);

    let a = an.shapes.find(0xa).unwrap();
    let s = m.find_state(a, CodeIdx::NULL).unwrap();
    assert_eq!(m.current_state(0x100), s);
    assert_eq!(m.current_state(0x200), s);

    // Both births folded into one packet on the one edge.
    assert_eq!(m.count_instances(), 2);
}

// =============================================================================
// Scenario 2: field shape walk
// =============================================================================

const FIELD_WALK: &str = "\
4 100 0 a 51
9 100 0 a b 0 x
9 100 0 b c 0 y
";

#[test]
fn test_field_walk_builds_chain() {
    let an = replayed(FIELD_WALK);
    let mid = an
        .machines
        .find_signature(0x51, MachineKind::Object)
        .unwrap();
    let m = an.machines.get(mid);

    assert_eq!(m.state_count(), 4); // start, a, b, c
    assert_eq!(m.edge_count(), 3);

    let a = m.find_state(an.shapes.find(0xa).unwrap(), CodeIdx::NULL).unwrap();
    let c = m.find_state(an.shapes.find(0xc).unwrap(), CodeIdx::NULL).unwrap();
    assert_eq!(m.state(c).depth, 3);
    assert_eq!(m.forward_search_path(a, c).unwrap().len(), 2);
}

#[test]
fn test_field_walk_invariants() {
    let an = replayed(FIELD_WALK);
    for m in an.machines.iter() {
        for sid in 0..m.state_count() as u32 {
            let s = m.state(StateId(sid));
            if let Some(link) = s.parent_link {
                assert_eq!(m.trans(link).target, s.id);
            } else {
                assert!(s.is_start(), "non-start state without a parent link");
            }
        }
        for eid in 0..m.edge_count() as u32 {
            let t = m.trans(spectra_core::TransitionId(eid));
            assert!(t.trigger_count() > 0, "edge with empty trigger set");
            for tp in t.triggers() {
                assert!(tp.count >= 1);
            }
        }
    }
}

// =============================================================================
// Scenario 3: future-shape deopt
// =============================================================================

#[test]
fn test_future_shape_deopt() {
    let an = replayed(
        "4 100 0 a 51\n\
         9 100 0 a b 0 x\n\
         9 100 0 b c 0 y\n\
         4 200 0 a 51\n\
         9 200 0 a b 0 x\n\
         29 1 1 c\n\
         25 f 1000 1001 200 1 wrongmap@7\n",
    );

    assert!(an.reporter.mentions("R(inst, exp) = 1"));
    assert!(an.reporter.mentions("advFlds"));

    // The bailout site was recorded on the deopted function's machine.
    let fi = an.instances.lookup(0xf, MachineKind::Function).unwrap();
    let fm = an.machines.get(an.instances.desc(fi).machine);
    assert_eq!(fm.deopt_counts.get(&7), Some(&1));
    assert_eq!(fm.total_deopts, 1);

    // The failing object's family is flagged as a deopt cause.
    let mid = an.machines.find_signature(0x51, MachineKind::Object).unwrap();
    assert!(an.machines.get(mid).cause_deopt);
}

#[test]
fn test_soft_deopt_skips_diagnosis() {
    let an = replayed(
        "4 100 0 a 51\n\
         29 1 1 a\n\
         25 f 1000 1001 100 1 soft deopt@7\n",
    );

    assert!(!an.reporter.mentions("deoptimized at IC"));
}

// =============================================================================
// Scenario 4: split case
// =============================================================================

#[test]
fn test_split_case_orders_fields() {
    let an = replayed(
        "4 100 0 a0 51\n\
         9 100 0 a0 a1 0 a\n\
         9 100 0 a1 a2 0 b\n\
         9 100 0 a2 a3 0 c\n\
         4 200 0 a0 51\n\
         9 200 0 a0 a1 0 a\n\
         9 200 0 a1 a2 0 b\n\
         9 200 0 a2 a4 0 d\n\
         9 200 0 a4 a5 0 c\n\
         29 2 1 a3\n\
         25 f0 1000 1001 200 2 wrongmap@9\n",
    );

    // The walks diverge after the state holding fields a,b.
    assert!(an.reporter.mentions("R(lca, exp) = 1"));
    assert!(an.reporter.mentions("R(lca, inst) = 2"));
    // Field c is assigned on both sides at different offsets.
    assert!(an.reporter.mentions("ordFlds"));
    assert!(an.reporter.mentions("c"));
}

// =============================================================================
// Scenario 5: GC move, then a reference through the stale address
// =============================================================================

#[test]
fn test_gc_move_then_stale_reference() {
    let an = replayed(
        "4 100 0 a 51\n\
         34 100 180\n\
         9 100 0 a b 0 x\n",
    );

    let iid = an
        .instances
        .lookup(0x180, MachineKind::Object)
        .expect("descriptor reachable under the new address");
    assert_eq!(an.instances.desc(iid).raw_addr, 0x180);

    // The evolution went through on the same machine.
    let mid = an.machines.find_signature(0x51, MachineKind::Object).unwrap();
    let m = an.machines.get(mid);
    let b = m.find_state(an.shapes.find(0xb).unwrap(), CodeIdx::NULL).unwrap();
    assert_eq!(m.current_state(0x180), b);
    assert_eq!(m.state_count(), 3);
}

#[test]
fn test_gc_move_map_twice_is_noop() {
    let an = replayed(
        "4 100 0 a00 51\n\
         37 a00 b00\n\
         37 a00 b00\n",
    );

    assert_eq!(an.shapes.find(0xa00), None);
    assert!(an.shapes.find(0xb00).is_some());
}

// =============================================================================
// Scenario 6: forced deopt via the map notifier
// =============================================================================

#[test]
fn test_forced_deopt_notifier_chain() {
    let an = replayed(
        "4 100 0 a 51\n\
         28 100 a\n\
         27 f1 1000 1001\n\
         27 f1 1000 1001\n\
         27 f2 2000 2001\n\
         9 100 0 a b 0 x\n",
    );

    assert!(an.reporter.mentions("Forced to deoptimize"));
    // f1 forced twice, f2 once.
    assert!(an.reporter.mentions("x2"));
    assert!(an.reporter.mentions("x1"));

    // The dependency list drained with the report.
    let shape = an.shapes.find(0xa).unwrap();
    let mut an = an;
    assert!(an.shapes.take_deps(shape).is_empty());
}

// =============================================================================
// Deferred diagnosis
// =============================================================================

#[test]
fn test_deopt_before_allocation_is_deferred() {
    let mut an = Analyzer::quiet();
    replay_str(
        &mut an,
        "29 3 1 c\n\
         25 f0 1000 1001 300 3 wrongmap@4\n",
        false,
    )
    .unwrap();

    // Nothing to diagnose yet; the pack is parked on the address.
    assert!(!an.reporter.mentions("deoptimized at IC 4"));
    assert_eq!(an.pending_deopts.len(), 1);

    replay_str(&mut an, "4 300 0 c 52\n", false).unwrap();

    assert!(an.pending_deopts.is_empty());
    assert!(an.reporter.mentions("deoptimized at IC 4"));
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn test_shape_preserving_event_replayed_twice() {
    let mut an = Analyzer::quiet();
    replay_str(&mut an, "4 100 0 a 51\n12 100 0 a a 3\n", false).unwrap();

    let mid = an.machines.find_signature(0x51, MachineKind::Object).unwrap();
    let (states, edges) = {
        let m = an.machines.get(mid);
        (m.state_count(), m.edge_count())
    };

    replay_str(&mut an, "12 100 0 a a 3\n", false).unwrap();

    let m = an.machines.get(mid);
    assert_eq!(m.state_count(), states);
    assert_eq!(m.edge_count(), edges);

    // The packet count strictly increased.
    let a = m.find_state(an.shapes.find(0xa).unwrap(), CodeIdx::NULL).unwrap();
    let self_edge = (0..m.edge_count() as u32)
        .map(spectra_core::TransitionId)
        .find(|&e| m.trans(e).source == a && m.trans(e).target == a)
        .unwrap();
    assert_eq!(m.trans(self_edge).reason_begin_with("!Elm").unwrap().count, 2);
}

// =============================================================================
// Function lifecycle
// =============================================================================

#[test]
fn test_function_code_lifecycle() {
    let an = replayed(
        "18 f0 800 a 1000 makePoint\n\
         19 f0 1001\n\
         20 f0 1002 hot loop\n",
    );

    let mid = an
        .machines
        .find_signature(0x800, MachineKind::Function)
        .unwrap();
    let m = an.machines.get(mid);
    assert_eq!(m.name(), "makePoint");
    assert!(m.been_optimized);

    // start + three code versions.
    assert_eq!(m.state_count(), 4);
    let opt = an.codes.find(0x1002).unwrap();
    let a = an.shapes.find(0xa).unwrap();
    assert_eq!(m.current_state(0xf0), m.find_state(a, opt).unwrap());
}

#[test]
fn test_opt_failed_reuses_disable_message() {
    let an = replayed(
        "18 f0 800 a 1000 makePoint\n\
         22 f0 800 eval seen\n\
         24 f0 1003 -\n",
    );

    let mid = an
        .machines
        .find_signature(0x800, MachineKind::Function)
        .unwrap();
    let m = an.machines.get(mid);
    assert!(!m.allow_opt);

    // The OptFailed edge carries the disable message.
    let found = (0..m.edge_count() as u32)
        .map(spectra_core::TransitionId)
        .any(|e| m.trans(e).reason_begin_with("OptFailed: eval seen").is_some());
    assert!(found);
}

// =============================================================================
// SetMap elaboration
// =============================================================================

#[test]
fn test_set_map_elaborated_by_next_field_event() {
    let an = replayed(
        "4 100 0 a 51\n\
         16 100 0 b\n\
         9 100 0 a b 0 x\n",
    );

    let mid = an.machines.find_signature(0x51, MachineKind::Object).unwrap();
    let m = an.machines.get(mid);

    // Exactly one a -> b edge, carrying both the raw "?" and the real
    // reason; the instance migrated across it on elaboration.
    assert_eq!(m.state_count(), 3);
    assert_eq!(m.edge_count(), 2); // start->a, a->b
    let b = m.find_state(an.shapes.find(0xb).unwrap(), CodeIdx::NULL).unwrap();
    assert_eq!(m.current_state(0x100), b);

    let ab = (0..m.edge_count() as u32)
        .map(spectra_core::TransitionId)
        .find(|&e| m.trans(e).target == b)
        .unwrap();
    assert!(m.trans(ab).reason_begin_with("?").is_some());
    assert!(m.trans(ab).reason_begin_with("+Fld: x").is_some());
}

// =============================================================================
// Storage signals
// =============================================================================

#[test]
fn test_storage_signals_flip_flags() {
    use spectra_core::InstanceFlags;

    let mut an = Analyzer::quiet();
    replay_str(&mut an, "4 100 0 a 51\n31 100\n", false).unwrap();
    let iid = an.instances.lookup(0x100, MachineKind::Object).unwrap();
    assert!(an.instances.desc(iid).flags.contains(InstanceFlags::PROP_DICT));

    replay_str(&mut an, "33 100\n", false).unwrap();
    assert!(!an.instances.desc(iid).flags.contains(InstanceFlags::PROP_DICT));

    // ElemToSlow reports on the signal's own self-edge evolution.
    replay_str(&mut an, "30 100\n", false).unwrap();
    assert!(an.reporter.mentions("elements -> dictionary"));
}

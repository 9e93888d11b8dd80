//! Event decoding and dispatch.
//!
//! One handler per tag, laid out as a compile-time table indexed by the
//! tag's integer value; the table length is pinned to the tag count, so a
//! new tag without a handler does not build. Every handler decodes its
//! fixed payload from the reader and issues evolutions on the core, never
//! aborting the replay for recoverable conditions: unseen objects are
//! skipped or parked on hidden machines, unknown contexts resolve to the
//! `*MISS*` sentinel, and a deopt against an unregistered object is
//! deferred until its allocation record arrives.

use crate::error::ReplayError;
use crate::events::{EventTag, EVENT_COUNT};
use crate::reader::{fmt_hex, ReadError, Reader};
use smallvec::SmallVec;
use spectra_core::diagnosis::{self, DeoptPack};
use spectra_core::machine::{MachineId, MachineKind};
use spectra_core::typeinfo::NULL_RAW_ID;
use spectra_core::{Analyzer, InstanceFlags};

/// Per-tag payload decoder.
pub type Handler = fn(&mut Analyzer, &mut Reader) -> Result<(), ReadError>;

/// Dispatch table, indexed by tag value.
pub const HANDLERS: [Handler; EVENT_COUNT] = [
    create_obj_boilerplate,
    create_array_boilerplate,
    create_object_literal,
    create_array_literal,
    create_new_object,
    create_new_array,
    create_context,
    copy_object,
    change_prototype,
    new_field,
    upt_field,
    del_field,
    set_elem,
    del_elem,
    cow_copy,
    expand_array,
    set_map,
    elem_transition,
    create_function,
    gen_full_code,
    gen_opt_code,
    gen_osr_code,
    disable_opt,
    reenable_opt,
    opt_failed,
    regular_deopt,
    deopt_as_inline,
    force_deopt,
    begin_deopt_on_map,
    gen_deopt_maps,
    elem_to_slow,
    prop_to_slow,
    elem_to_fast,
    prop_to_fast,
    gc_move_object,
    gc_move_code,
    gc_move_shared,
    gc_move_map,
];

// =============================================================================
// Replay drivers
// =============================================================================

/// Replay every record in `text` without finalizing.
pub fn replay_str(an: &mut Analyzer, text: &str, debug: bool) -> Result<u64, ReplayError> {
    let mut r = Reader::new(text);
    let mut n = 0u64;

    while !r.at_end() {
        let offset = r.offset();
        let tag_value = r
            .next_uint("event tag")
            .map_err(|_| ReplayError::UnknownTag { tag: 0, offset })?;
        let tag = EventTag::from_u64(tag_value).ok_or(ReplayError::UnknownTag {
            tag: tag_value,
            offset,
        })?;

        if debug {
            eprintln!("before #{}: tag {} ({})", n, tag_value, tag.text());
        }
        HANDLERS[tag as usize](an, &mut r).map_err(|e| ReplayError::Record {
            tag,
            what: e.what,
            offset: e.offset,
        })?;
        if debug {
            eprintln!("after #{}: tag {} ({})", n, tag_value, tag.text());
        }
        n += 1;
    }

    Ok(n)
}

/// Replay `text` and run end-of-log finalization (notifier flush, bailout
/// summary).
pub fn run_log(an: &mut Analyzer, text: &str, debug: bool) -> Result<u64, ReplayError> {
    let n = replay_str(an, text, debug)?;
    diagnosis::finish(an);
    Ok(n)
}

/// Replay a log file.
pub fn replay_file(
    an: &mut Analyzer,
    path: &std::path::Path,
    debug: bool,
) -> Result<u64, ReplayError> {
    let text = std::fs::read_to_string(path)?;
    run_log(an, &text, debug)
}

// =============================================================================
// Shared decoding helpers
// =============================================================================

/// Read the `n_ctxts ctxt…` chain (outer-to-inner in the log) and resolve it
/// innermost-first. Unknown contexts resolve to `*MISS*`; boilerplates keep
/// only the innermost entry.
fn read_contexts(
    an: &Analyzer,
    r: &mut Reader,
    innermost_only: bool,
) -> Result<SmallVec<[MachineId; 4]>, ReadError> {
    let n = r.next_uint("n_ctxts")?;
    let mut raw: SmallVec<[i64; 4]> = SmallVec::new();
    for _ in 0..n {
        raw.push(r.next_hex("ctxt")?);
    }

    let mut chain = SmallVec::new();
    for &ctxt in raw.iter().rev() {
        chain.push(resolve_context(an, ctxt));
        if innermost_only {
            break;
        }
    }
    Ok(chain)
}

fn resolve_context(an: &Analyzer, ctxt: i64) -> MachineId {
    if ctxt == 0 {
        return an.miss_machine;
    }
    an.instances
        .lookup(ctxt, MachineKind::Function)
        .map(|iid| an.instances.desc(iid).machine)
        .unwrap_or(an.miss_machine)
}

/// Intern a shape id; `-1` means "unchanged" and yields `None`.
fn shape_of(an: &mut Analyzer, raw: i64) -> Option<spectra_core::ShapeIdx> {
    if raw == NULL_RAW_ID {
        None
    } else {
        Some(an.shapes.find_or_create(raw))
    }
}

/// Evolve an existing object, or elaborate its pending raw transition when
/// a `SetMap` record preceded this mutation. Unseen objects are skipped.
fn evolve_or_elaborate(
    an: &mut Analyzer,
    addr: i64,
    contexts: &[MachineId],
    old_map: i64,
    new_map: i64,
    reason: &str,
    cost: u64,
) {
    let Some(iid) = an.lookup_object(addr) else {
        return;
    };
    if let Some((mid, eid)) = an.instances.desc_mut(iid).pending_raw.take() {
        an.elaborate_raw(mid, iid, eid, contexts, reason, cost);
        return;
    }
    let mid = an.instances.desc(iid).machine;
    let old = shape_of(an, old_map);
    let new = shape_of(an, new_map);
    an.evolve_object(mid, iid, contexts, old, new, None, reason, cost, false);
}

/// Register an object-family instance on `mid`, evolve it as newborn, and
/// drain any deopt diagnosis deferred against its address.
#[allow(clippy::too_many_arguments)]
fn finish_creation(
    an: &mut Analyzer,
    addr: i64,
    kind: MachineKind,
    mid: MachineId,
    contexts: &[MachineId],
    map: i64,
    boilerplate: Option<MachineId>,
    reason: &str,
) {
    let iid = an.instances.register(addr, kind, mid);
    let map = shape_of(an, map);
    an.evolve_object(mid, iid, contexts, None, map, boilerplate, reason, 0, true);
    diagnosis::drain_pending(an, addr);
}

// =============================================================================
// Creation events
// =============================================================================

fn create_boilerplate_common(
    an: &mut Analyzer,
    r: &mut Reader,
    reason: &str,
) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, true)?;
    let map = r.next_hex("map")?;
    let index = r.next_uint("index")?;

    // One instance per boilerplate; its own address is the signature.
    let mid = an.machines.ensure_signature(addr, MachineKind::Boilerplate);
    if !an.machines.get(mid).has_name() {
        let ctx_name = contexts
            .first()
            .map(|&c| an.machines.get(c).display_name())
            .unwrap_or_else(|| "*MISS*".to_string());
        an.machines
            .get_mut(mid)
            .set_name(&format!("/{}#{}/", ctx_name, index));
    }
    finish_creation(
        an,
        addr,
        MachineKind::Boilerplate,
        mid,
        &contexts,
        map,
        None,
        reason,
    );
    Ok(())
}

fn create_obj_boilerplate(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    create_boilerplate_common(an, r, "+ObjTemp")
}

fn create_array_boilerplate(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    create_boilerplate_common(an, r, "+AryTemp")
}

fn create_literal_common(an: &mut Analyzer, r: &mut Reader, reason: &str) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let map = r.next_hex("map")?;
    let alloc_sig = r.next_hex("alloc_sig")?;
    let _lit_idx = r.next_uint("lit_idx")?;

    // The literal's machine is keyed by its boilerplate; cloning the
    // boilerplate is a summary edge into that machine.
    let mid = an.machines.ensure_signature(alloc_sig, MachineKind::Object);
    let boilerplate = an.machines.find_signature(alloc_sig, MachineKind::Boilerplate);
    if !an.machines.get(mid).has_name() {
        if let Some(bp) = boilerplate {
            if an.machines.get(bp).has_name() {
                let name = an.machines.get(bp).name().to_string();
                an.machines.get_mut(mid).set_name(&name);
            }
        }
    }
    finish_creation(
        an,
        addr,
        MachineKind::Object,
        mid,
        &contexts,
        map,
        boilerplate,
        reason,
    );
    Ok(())
}

fn create_object_literal(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    create_literal_common(an, r, "+ObjLit")
}

fn create_array_literal(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    create_literal_common(an, r, "+AryLit")
}

fn create_new_common(an: &mut Analyzer, r: &mut Reader, reason: &str) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let map = r.next_hex("map")?;
    let alloc_sig = r.next_hex("alloc_sig")?;

    // One machine per constructor; borrow the constructor's name.
    let mid = an.machines.ensure_signature(alloc_sig, MachineKind::Object);
    if !an.machines.get(mid).has_name() {
        if let Some(fi) = an.instances.lookup(alloc_sig, MachineKind::Function) {
            let fm = an.instances.desc(fi).machine;
            if an.machines.get(fm).has_name() {
                let name = an.machines.get(fm).name().to_string();
                an.machines.get_mut(mid).set_name(&name);
            }
        }
    }
    finish_creation(an, addr, MachineKind::Object, mid, &contexts, map, None, reason);
    Ok(())
}

fn create_new_object(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    create_new_common(an, r, "+Obj")
}

fn create_new_array(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    create_new_common(an, r, "+Ary")
}

fn create_context(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let alloc_sig = r.next_hex("alloc_sig")?;
    let map = r.next_hex("map")?;

    let mid = an.machines.ensure_signature(alloc_sig, MachineKind::Object);
    if !an.machines.get(mid).has_name() {
        an.machines.get_mut(mid).set_name("FunctionContext");
    }
    finish_creation(an, addr, MachineKind::Object, mid, &contexts, map, None, "+FCxt");
    Ok(())
}

fn create_function(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let alloc_sig = r.next_hex("alloc_sig")?;
    let map = r.next_hex("map")?;
    let code = r.next_hex("code")?;
    let name = r.rest_of_line();

    let mid = an.machines.ensure_signature(alloc_sig, MachineKind::Function);
    let iid = an.instances.register(addr, MachineKind::Function, mid);
    if !an.machines.get(mid).has_name() && !name.is_empty() {
        let name = name.to_string();
        an.machines.get_mut(mid).set_name(&name);
    }

    let map = shape_of(an, map);
    let code = if code == NULL_RAW_ID {
        None
    } else {
        Some(an.codes.find_or_create(code))
    };
    an.evolve_function(mid, iid, &[], map, code, "new func()", 0, true);
    Ok(())
}

fn copy_object(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let dst = r.next_hex("dst")?;
    let _contexts = read_contexts(an, r, false)?;
    let src = r.next_hex("src")?;

    // The copy joins the source's machine at the source's current state.
    let Some(src_iid) = an.instances.lookup(src, MachineKind::Object) else {
        return Ok(());
    };
    let mid = an.instances.desc(src_iid).machine;
    let src_state = an
        .machines
        .get(mid)
        .current_state(an.instances.desc(src_iid).raw_addr);

    let dst_iid = an.instances.register(dst, MachineKind::Object, mid);
    let dst_addr = an.instances.desc(dst_iid).raw_addr;
    an.machines.get_mut(mid).add_instance(dst_addr, src_state);
    diagnosis::drain_pending(an, dst);
    Ok(())
}

// =============================================================================
// Mutation events
// =============================================================================

fn change_prototype(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let map = r.next_hex("map")?;
    let proto = r.next_hex("proto")?;

    let reason = format!("!Proto: {}", fmt_hex(proto));
    evolve_or_elaborate(an, addr, &contexts, NULL_RAW_ID, map, &reason, 0);
    Ok(())
}

fn field_update_common(an: &mut Analyzer, r: &mut Reader, op: char) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let old_map = r.next_hex("old_map")?;
    let new_map = r.next_hex("new_map")?;
    let value = r.next_hex("value")?;
    let name = r.rest_of_line();

    let reason = format!("{}Fld: {}={}", op, name, fmt_hex(value));
    evolve_or_elaborate(an, addr, &contexts, old_map, new_map, &reason, 0);
    Ok(())
}

fn new_field(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    field_update_common(an, r, '+')
}

fn upt_field(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    field_update_common(an, r, '!')
}

fn del_field(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    field_update_common(an, r, '-')
}

fn elem_update_common(an: &mut Analyzer, r: &mut Reader, op: char) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let old_map = r.next_hex("old_map")?;
    let new_map = r.next_hex("new_map")?;
    let index = r.next_uint("index")?;

    let reason = format!("{}Elm: {}", op, index);
    evolve_or_elaborate(an, addr, &contexts, old_map, new_map, &reason, 0);
    Ok(())
}

fn set_elem(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    elem_update_common(an, r, '!')
}

fn del_elem(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    elem_update_common(an, r, '-')
}

fn storage_cost_common(an: &mut Analyzer, r: &mut Reader, reason: &str) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let bytes = r.next_uint("bytes")?;

    // Shape is unchanged; the work lands on a self-edge as cost.
    evolve_or_elaborate(an, addr, &contexts, NULL_RAW_ID, NULL_RAW_ID, reason, bytes);
    Ok(())
}

fn cow_copy(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    storage_cost_common(an, r, "CowCpy")
}

fn expand_array(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    storage_cost_common(an, r, "AryExp")
}

fn set_map(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let _contexts = read_contexts(an, r, false)?;
    let map = r.next_hex("map")?;

    let Some(iid) = an.lookup_object(addr) else {
        return Ok(());
    };
    let mid = an.instances.desc(iid).machine;
    let Some(map) = shape_of(an, map) else {
        return Ok(());
    };
    an.raw_object_transition(mid, iid, map);
    Ok(())
}

fn elem_transition(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let contexts = read_contexts(an, r, false)?;
    let old_map = r.next_hex("old_map")?;
    let new_map = r.next_hex("new_map")?;
    let bytes = r.next_uint("bytes")?;

    evolve_or_elaborate(an, addr, &contexts, old_map, new_map, "ElmTrans", bytes);
    Ok(())
}

// =============================================================================
// Storage-mode signals
// =============================================================================

fn storage_signal(
    an: &mut Analyzer,
    r: &mut Reader,
    flag: InstanceFlags,
    set: bool,
    reason: &str,
) -> Result<(), ReadError> {
    let addr = r.next_hex("addr")?;
    let Some(iid) = an.lookup_object(addr) else {
        return Ok(());
    };
    {
        let flags = &mut an.instances.desc_mut(iid).flags;
        if set {
            flags.insert(flag);
        } else {
            flags.remove(flag);
        }
    }
    // Keep the mode flip visible in the automaton as a self-edge.
    let mid = an.instances.desc(iid).machine;
    an.evolve_object(mid, iid, &[], None, None, None, reason, 0, false);
    Ok(())
}

fn elem_to_slow(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    storage_signal(an, r, InstanceFlags::ELEM_DICT, true, "Elm->Slow")
}

fn prop_to_slow(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    storage_signal(an, r, InstanceFlags::PROP_DICT, true, "Prop->Slow")
}

fn elem_to_fast(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    storage_signal(an, r, InstanceFlags::ELEM_DICT, false, "Elm->Fast")
}

fn prop_to_fast(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    storage_signal(an, r, InstanceFlags::PROP_DICT, false, "Prop->Fast")
}

// =============================================================================
// Function code events
// =============================================================================

/// Evolve a known function instance's code version.
fn simple_function_transition(
    an: &mut Analyzer,
    f_addr: i64,
    code: i64,
    reason: &str,
) -> Option<MachineId> {
    let iid = an.instances.lookup(f_addr, MachineKind::Function)?;
    let mid = an.instances.desc(iid).machine;
    let code = if code == NULL_RAW_ID {
        None
    } else {
        Some(an.codes.find_or_create(code))
    };
    an.evolve_function(mid, iid, &[], None, code, reason, 0, false);
    Some(mid)
}

fn gen_full_code(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let f_addr = r.next_hex("f_addr")?;
    let code = r.next_hex("code")?;
    let _msg = r.rest_of_line();

    simple_function_transition(an, f_addr, code, "Full");
    Ok(())
}

fn gen_opt_common(an: &mut Analyzer, r: &mut Reader, prefix: &str) -> Result<(), ReadError> {
    let f_addr = r.next_hex("f_addr")?;
    let code = r.next_hex("code")?;
    let msg = r.rest_of_line();

    let reason = format!("{}{}", prefix, msg);
    if let Some(mid) = simple_function_transition(an, f_addr, code, &reason) {
        an.machines.get_mut(mid).been_optimized = true;
    }
    Ok(())
}

fn gen_opt_code(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    gen_opt_common(an, r, "Opt: ")
}

fn gen_osr_code(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    gen_opt_common(an, r, "Osr: ")
}

fn toggle_opt_common(an: &mut Analyzer, r: &mut Reader, allow: bool) -> Result<(), ReadError> {
    let _f_addr = r.next_hex("f_addr")?;
    let shared = r.next_hex("shared")?;
    let msg = r.rest_of_line().to_string();

    if let Some(mid) = an.machines.find_signature(shared, MachineKind::Function) {
        an.machines.get_mut(mid).set_opt_state(allow, &msg);
    }
    Ok(())
}

fn disable_opt(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    toggle_opt_common(an, r, false)
}

fn reenable_opt(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    toggle_opt_common(an, r, true)
}

fn opt_failed(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let f_addr = r.next_hex("f_addr")?;
    let new_code = r.next_hex("new_code")?;
    let msg = r.rest_of_line().to_string();

    let Some(iid) = an.instances.lookup(f_addr, MachineKind::Function) else {
        return Ok(());
    };
    let mid = an.instances.desc(iid).machine;
    // "-" means: the bailout reuses the last disable message.
    let msg = if msg == "-" {
        an.machines.get(mid).opt_msg.clone()
    } else {
        msg
    };
    let reason = format!("OptFailed: {}", msg);
    let code = if new_code == NULL_RAW_ID {
        None
    } else {
        Some(an.codes.find_or_create(new_code))
    };
    an.evolve_function(mid, iid, &[], None, code, &reason, 0, false);
    Ok(())
}

// =============================================================================
// Deopt events
// =============================================================================

/// Move a function to `new_code` with `reason`, inserting an `"Opt: ?"`
/// transition first when the log skipped the code installation.
fn do_deopt_common(
    an: &mut Analyzer,
    f_addr: i64,
    old_code: i64,
    new_code: i64,
    reason: &str,
) -> MachineId {
    let iid = an
        .instances
        .find_or_create(f_addr, MachineKind::Function, &mut an.machines);
    let mid = an.instances.desc(iid).machine;

    let cur = an
        .machines
        .get(mid)
        .current_state(an.instances.desc(iid).raw_addr);
    let cur_code = an.machines.get(mid).state(cur).code;
    if old_code != NULL_RAW_ID && an.codes.raw(cur_code) != old_code {
        let old = an.codes.find_or_create(old_code);
        an.evolve_function(mid, iid, &[], None, Some(old), "Opt: ?", 0, false);
    }

    let new = if new_code == NULL_RAW_ID {
        None
    } else {
        Some(an.codes.find_or_create(new_code))
    };
    an.evolve_function(mid, iid, &[], None, new, reason, 0, false);
    mid
}

fn regular_deopt(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let f_addr = r.next_hex("f_addr")?;
    let old_code = r.next_hex("old_code")?;
    let new_code = r.next_hex("new_code")?;
    let failed_obj = r.next_hex("failed_obj")?;
    let ckmap_site = r.next_hex("ckmap_site")?;
    let msg = r.rest_of_line().to_string();

    let reason = format!("Deopt: {}", msg);
    let mid = do_deopt_common(an, f_addr, old_code, new_code, &reason);

    if !an.analyze || msg.starts_with("soft") {
        return Ok(());
    }

    let Some(bailout_id) = msg
        .rsplit_once('@')
        .and_then(|(_, id)| id.trim().parse::<u32>().ok())
    else {
        return Ok(());
    };
    an.machines.get_mut(mid).add_deopt(bailout_id);

    let expected = an.deopt_maps.get(&ckmap_site).cloned().unwrap_or_default();
    diagnosis::check_deoptimization(
        an,
        DeoptPack {
            failed_obj,
            expected,
            function: mid,
            bailout_id,
        },
    );
    Ok(())
}

fn deopt_as_inline(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let f_addr = r.next_hex("f_addr")?;
    let old_code = r.next_hex("old_code")?;
    let new_code = r.next_hex("new_code")?;
    let _real_f = r.next_hex("real_f")?;

    do_deopt_common(an, f_addr, old_code, new_code, "DeoptInl");
    Ok(())
}

fn force_deopt(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let f_addr = r.next_hex("f_addr")?;
    let old_code = r.next_hex("old_code")?;
    let new_code = r.next_hex("new_code")?;

    let mid = do_deopt_common(an, f_addr, old_code, new_code, "Deopt: Forced");
    if an.analyze {
        if let Some(shape) = an.map_notifier {
            an.shapes.add_dep(shape, mid);
        }
    }
    Ok(())
}

fn begin_deopt_on_map(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let obj_addr = r.next_hex("obj_addr")?;
    let map = r.next_hex("map")?;

    if !an.analyze {
        return Ok(());
    }
    let iid = an
        .instances
        .find_or_create(obj_addr, MachineKind::Object, &mut an.machines);
    an.instances
        .desc_mut(iid)
        .flags
        .insert(InstanceFlags::FORCE_DEOPT);

    let shape = an.shapes.find_or_create(map);
    if let Some(prev) = an.map_notifier.replace(shape) {
        if prev != shape {
            diagnosis::report_shape_deps(an, prev, None);
        }
    }
    Ok(())
}

fn gen_deopt_maps(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let ckmap_site = r.next_hex("ckmap_site")?;
    let n = r.next_uint("n_maps")?;
    let mut maps = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let raw = r.next_hex("map")?;
        maps.push(an.shapes.find_or_create(raw));
    }
    an.deopt_maps.insert(ckmap_site, maps);
    Ok(())
}

// =============================================================================
// GC moves
// =============================================================================

fn gc_move_object(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let from = r.next_hex("from")?;
    let to = r.next_hex("to")?;

    if let Some(iid) = an.instances.rewrite_addr(from, to) {
        let mid = an.instances.desc(iid).machine;
        an.machines.get_mut(mid).rename_instance(from, to);
    }
    an.instances.record_move(from, to);

    // Object addresses double as allocation signatures.
    an.machines
        .rebind_signature(MachineKind::Boilerplate, from, to);
    an.machines.rebind_signature(MachineKind::Object, from, to);
    Ok(())
}

fn gc_move_code(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let from = r.next_hex("from")?;
    let to = r.next_hex("to")?;
    an.codes.rewrite(from, to);
    Ok(())
}

fn gc_move_shared(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let from = r.next_hex("from")?;
    let to = r.next_hex("to")?;

    // Shared infos key function machines, and object machines made by
    // constructors.
    an.machines
        .rebind_signature(MachineKind::Function, from, to);
    an.machines.rebind_signature(MachineKind::Object, from, to);
    Ok(())
}

fn gc_move_map(an: &mut Analyzer, r: &mut Reader) -> Result<(), ReadError> {
    let from = r.next_hex("from")?;
    let to = r.next_hex("to")?;
    an.shapes.rewrite(from, to);
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_tag_order() {
        assert_eq!(HANDLERS.len(), EVENT_COUNT);
        assert!(HANDLERS[EventTag::NewField as usize] == new_field as Handler);
        assert!(HANDLERS[EventTag::RegularDeopt as usize] == regular_deopt as Handler);
        assert!(HANDLERS[EventTag::GCMoveMap as usize] == gc_move_map as Handler);
    }

    #[test]
    fn test_unknown_context_resolves_to_miss() {
        let an = Analyzer::quiet();
        assert_eq!(resolve_context(&an, 0), an.miss_machine);
        assert_eq!(resolve_context(&an, 0xdead), an.miss_machine);
    }

    #[test]
    fn test_context_chain_is_innermost_first() {
        let mut an = Analyzer::quiet();
        // Register two function instances as contexts.
        let outer = an
            .instances
            .find_or_create(0xaa, MachineKind::Function, &mut an.machines);
        let inner = an
            .instances
            .find_or_create(0xbb, MachineKind::Function, &mut an.machines);
        let outer_m = an.instances.desc(outer).machine;
        let inner_m = an.instances.desc(inner).machine;

        let mut r = Reader::new("2 aa bb");
        let chain = read_contexts(&an, &mut r, false).unwrap();
        assert_eq!(chain.as_slice(), &[inner_m, outer_m]);

        let mut r = Reader::new("2 aa bb");
        let chain = read_contexts(&an, &mut r, true).unwrap();
        assert_eq!(chain.as_slice(), &[inner_m]);
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let mut an = Analyzer::quiet();
        let err = replay_str(&mut an, "99 0 0", false).unwrap_err();
        assert!(matches!(err, ReplayError::UnknownTag { tag: 99, .. }));
    }

    #[test]
    fn test_truncated_record_is_fatal() {
        let mut an = Analyzer::quiet();
        // NewField missing everything after the address.
        let err = replay_str(&mut an, "9 100", false).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Record {
                tag: EventTag::NewField,
                ..
            }
        ));
    }

    #[test]
    fn test_mutation_on_unseen_object_is_skipped() {
        let mut an = Analyzer::quiet();
        // A NewField on an address we never saw: recoverable, no machine grows.
        let n = replay_str(&mut an, "9 100 0 a b 0 x", false).unwrap();
        assert_eq!(n, 1);
        assert!(an.instances.is_empty());
    }
}

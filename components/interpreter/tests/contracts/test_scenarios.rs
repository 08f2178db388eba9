//! End-to-end behavior scenarios exercising the whole engine.

use bytecode_system::{MethodBuilder, Opcode};
use core_types::Value;
use object_model::{ClassFormat, StorageKind};

use crate::helpers::vm_with_kernel;

#[test]
fn test_empty_array_adopts_boolean_storage_on_first_write() {
    // Length-4 empty array; true at (1-based) index 3 → Booleans storage
    // with exactly one assigned slot; the rest read nil.
    let mut vm = vm_with_kernel();
    let at_put = vm.intern("at:put:");
    let array = vm.heap.new_array(vm.special.array, 4);

    let method = MethodBuilder::new("t>>poke").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::PushSmallInt(3));
        b.emit(Opcode::PushTrue);
        b.emit_send(at_put, 2);
        b.emit(Opcode::ReturnTop);
    });
    vm.activate(method, Value::Nil, &[Value::Ref(array)]).unwrap();

    let storage = vm.heap.get(array).unwrap().as_array().unwrap();
    assert_eq!(storage.kind(), StorageKind::Booleans);
    assert_eq!(vm.heap.array_at(array, 0).unwrap(), Value::Nil);
    assert_eq!(vm.heap.array_at(array, 1).unwrap(), Value::Nil);
    assert_eq!(vm.heap.array_at(array, 2).unwrap(), Value::Boolean(true));
    assert_eq!(vm.heap.array_at(array, 3).unwrap(), Value::Nil);
}

#[test]
fn test_long_slot_regenerates_to_generic_on_reference_write() {
    // A class whose slot 0 is long-typed receives a reference at slot 0:
    // the layout regenerates, the reference reads back, slot 1 is intact.
    let mut vm = vm_with_kernel();
    let holder = vm
        .classes
        .add("Holder", Some(vm.special.object), ClassFormat::Fixed { inst_size: 2 });

    let set0 = MethodBuilder::new("Holder>>first:").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::PopIntoReceiverVariable(0));
        b.emit(Opcode::ReturnReceiver);
    });
    let get0 = MethodBuilder::new("Holder>>first").build(|b| {
        b.emit(Opcode::PushReceiverVariable(0));
        b.emit(Opcode::ReturnTop);
    });
    let set1 = MethodBuilder::new("Holder>>second:").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::PopIntoReceiverVariable(1));
        b.emit(Opcode::ReturnReceiver);
    });
    let get1 = MethodBuilder::new("Holder>>second").build(|b| {
        b.emit(Opcode::PushReceiverVariable(1));
        b.emit(Opcode::ReturnTop);
    });
    vm.install_method(holder, "first:", set0);
    vm.install_method(holder, "first", get0);
    vm.install_method(holder, "second:", set1);
    vm.install_method(holder, "second", get1);

    let first_put = vm.intern("first:");
    let first = vm.intern("first");
    let second_put = vm.intern("second:");
    let second = vm.intern("second");

    let instance = vm.heap.new_instance(&vm.classes, holder, 0).unwrap();
    let other = vm.heap.new_array(vm.special.array, 0);

    // Warm slot 0 as a long slot (several times, to exercise the slot-site
    // caches), and park a value in slot 1.
    let warm = MethodBuilder::new("t>>warm").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::PushSmallInt(17));
        b.emit_send(first_put, 1);
        b.emit(Opcode::PushSmallInt(5));
        b.emit_send(second_put, 1);
        b.emit_send(first, 0);
        b.emit(Opcode::ReturnTop);
    });
    for _ in 0..3 {
        assert_eq!(
            vm.activate(warm.clone(), Value::Nil, &[Value::Ref(instance)]).unwrap(),
            Value::SmallInt(17)
        );
    }
    assert!(matches!(
        vm.classes.get(holder).current_layout().location(0),
        object_model::Location::Long { .. }
    ));

    // Now write a reference into slot 0 through the same warmed sites.
    let poke = MethodBuilder::new("t>>poke").num_args(2).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::PushTemp(1));
        b.emit_send(first_put, 1);
        b.emit_send(first, 0);
        b.emit(Opcode::ReturnTop);
    });
    let result = vm
        .activate(poke, Value::Nil, &[Value::Ref(instance), Value::Ref(other)])
        .unwrap();
    assert_eq!(result, Value::Ref(other));
    assert!(vm.classes.get(holder).current_layout().location(0).is_object());

    // Slot 1 is untouched by the regeneration.
    let check = MethodBuilder::new("t>>check").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(second, 0);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(check, Value::Nil, &[Value::Ref(instance)]).unwrap(),
        Value::SmallInt(5)
    );
}

#[test]
fn test_wake_highest_priority_picks_the_highest_ready_list() {
    let mut vm = interpreter::Vm::with_options(interpreter::VmOptions {
        priority_levels: 16,
        initial_priority: 8,
    });
    crate::helpers::install_kernel(&mut vm);

    // Two ready processes at 5 and 12; the active process blocks on a
    // semaphore, so the scheduler must hand control to priority 12 first.
    let mid_block = {
        let maker = MethodBuilder::new("t>>mk5").build(|b| {
            b.begin_block(0, 0);
            b.emit(Opcode::PushSmallInt(5));
            b.emit(Opcode::BlockReturn);
            b.end_block();
            b.emit(Opcode::ReturnTop);
        });
        vm.activate(maker, Value::Nil, &[]).unwrap().as_ref().unwrap()
    };
    let high_block = {
        let maker = MethodBuilder::new("t>>mk12").build(|b| {
            b.begin_block(0, 0);
            b.emit(Opcode::PushSmallInt(12));
            b.emit(Opcode::BlockReturn);
            b.end_block();
            b.emit(Opcode::ReturnTop);
        });
        vm.activate(maker, Value::Nil, &[]).unwrap().as_ref().unwrap()
    };
    let p_mid = vm.new_process_on_block(mid_block, 5).unwrap();
    let p_high = vm.new_process_on_block(high_block, 12).unwrap();
    vm.schedule(p_mid).unwrap();
    vm.schedule(p_high).unwrap();

    let wait = vm.intern("wait");
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 0);
    let blocker = MethodBuilder::new("t>>block").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(wait, 0);
        b.emit(Opcode::ReturnTop);
    });
    // The highest-priority ready process runs to completion and its value
    // surfaces; the mid-priority process is still queued.
    let result = vm
        .activate(blocker, Value::Nil, &[Value::Ref(semaphore)])
        .unwrap();
    assert_eq!(result, Value::SmallInt(12));
    assert_eq!(vm.scheduler.ready_at(5).collect::<Vec<_>>(), vec![p_mid]);
    assert!(vm.scheduler.ready_at(12).next().is_none());
}

#[test]
fn test_identity_hash_is_stable_across_sends() {
    let mut vm = vm_with_kernel();
    let hash = vm.intern("identityHash");
    let eq = vm.intern("=");
    let array = vm.heap.new_array(vm.special.array, 3);

    // (holder identityHash) = (holder identityHash)
    let method = MethodBuilder::new("t>>hashTwice").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(hash, 0);
        b.emit(Opcode::PushTemp(0));
        b.emit_send(hash, 0);
        b.emit_send(eq, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(method, Value::Nil, &[Value::Ref(array)]).unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn test_trace_roots_cover_scheduler_and_symbols() {
    let mut vm = vm_with_kernel();
    let block = {
        let maker = MethodBuilder::new("t>>mk").build(|b| {
            b.begin_block(0, 0);
            b.emit(Opcode::PushNil);
            b.emit(Opcode::BlockReturn);
            b.end_block();
            b.emit(Opcode::ReturnTop);
        });
        vm.activate(maker, Value::Nil, &[]).unwrap().as_ref().unwrap()
    };
    let process = vm.new_process_on_block(block, 10).unwrap();
    vm.schedule(process).unwrap();
    let selector = vm.intern("probe");
    let symbol = vm.symbol_for(selector);

    let mut roots = Vec::new();
    vm.trace_roots(&mut |id| roots.push(id));
    assert!(roots.contains(&process), "scheduled processes are roots");
    assert!(roots.contains(&symbol), "interned symbols are roots");

    // Transitive references flow through trace_object: the process keeps
    // its suspended context alive.
    let mut from_process = Vec::new();
    vm.trace_object(process, &mut |id| from_process.push(id)).unwrap();
    let ctx = vm
        .heap
        .get(process)
        .unwrap()
        .as_process()
        .unwrap()
        .suspended_context
        .as_ref()
        .unwrap();
    assert!(from_process.contains(&ctx));
}

use bytecode_system::{MethodBuilder, Opcode};
use core_types::{Value, VmError};
use interpreter::{Vm, VmOptions};

use crate::helpers::install_kernel;

fn vm_at_priority(priority: usize) -> Vm {
    let mut vm = Vm::with_options(VmOptions {
        priority_levels: 16,
        initial_priority: priority,
    });
    install_kernel(&mut vm);
    vm
}

/// Build a closure object for a zero-argument block returning `answer`.
fn constant_block(vm: &mut Vm, answer: i64) -> core_types::ObjectId {
    let maker = MethodBuilder::new("t>>makeBlock").build(|b| {
        b.begin_block(0, 0);
        b.emit(Opcode::PushSmallInt(answer));
        b.emit(Opcode::BlockReturn);
        b.end_block();
        b.emit(Opcode::ReturnTop);
    });
    let closure = vm.activate(maker, Value::Nil, &[]).unwrap();
    closure.as_ref().expect("closure object")
}

/// Build a closure that waits on `semaphore` and then answers `answer`.
fn waiting_block(vm: &mut Vm, semaphore: core_types::ObjectId, answer: i64) -> core_types::ObjectId {
    let wait = vm.intern("wait");
    let maker = MethodBuilder::new("t>>makeWaiter").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.begin_block(0, 1);
        b.emit(Opcode::PushTemp(0)); // copied semaphore
        b.emit_send(wait, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(answer));
        b.emit(Opcode::BlockReturn);
        b.end_block();
        b.emit(Opcode::ReturnTop);
    });
    let closure = vm
        .activate(maker, Value::Nil, &[Value::Ref(semaphore)])
        .unwrap();
    closure.as_ref().expect("closure object")
}

#[test]
fn test_yield_with_no_peer_continues_uninterrupted() {
    // P2 (priority 10, active) yields while only P1
    // (priority 5) is ready; nothing at priority >= 10 waits, so P2 runs on.
    let mut vm = vm_at_priority(10);
    let block = constant_block(&mut vm, 0);
    let p1 = vm.new_process_on_block(block, 5).unwrap();
    vm.schedule(p1).unwrap();

    let yield_sel = vm.intern("yield");
    let method = MethodBuilder::new("t>>yieldThenAnswer").build(|b| {
        b.emit(Opcode::PushReceiver);
        b.emit_send(yield_sel, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(7));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(7));
    // P1 is still parked on its ready list.
    assert_eq!(vm.scheduler.ready_at(5).collect::<Vec<_>>(), vec![p1]);
}

#[test]
fn test_resume_of_higher_priority_process_preempts() {
    let mut vm = vm_at_priority(8);
    let block = constant_block(&mut vm, 99);
    let high = vm.new_process_on_block(block, 12).unwrap();

    let resume = vm.intern("resume");
    let probe = MethodBuilder::new("t>>spawn").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(resume, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(1));
        b.emit(Opcode::ReturnTop);
    });
    // The high-priority process takes over immediately and its block's
    // value surfaces at top level; the original process is left parked.
    let result = vm.activate(probe, Value::Nil, &[Value::Ref(high)]).unwrap();
    assert_eq!(result, Value::SmallInt(99));

    let initial = vm
        .heap
        .get(vm.scheduler.ready_at(8).next().expect("initial process queued"))
        .unwrap();
    assert!(
        initial.as_process().unwrap().suspended_context.as_ref().is_some(),
        "preempted process must have a parked context"
    );
}

#[test]
fn test_resume_of_lower_priority_process_just_enqueues() {
    let mut vm = vm_at_priority(8);
    let block = constant_block(&mut vm, 99);
    let low = vm.new_process_on_block(block, 3).unwrap();

    let resume = vm.intern("resume");
    let probe = MethodBuilder::new("t>>spawn").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(resume, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(1));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(probe, Value::Nil, &[Value::Ref(low)]).unwrap(),
        Value::SmallInt(1)
    );
    assert_eq!(vm.scheduler.ready_at(3).collect::<Vec<_>>(), vec![low]);
}

#[test]
fn test_wait_with_excess_signal_does_not_block() {
    let mut vm = vm_at_priority(8);
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 1);

    let wait = vm.intern("wait");
    let probe = MethodBuilder::new("t>>probe").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(wait, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(5));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(probe, Value::Nil, &[Value::Ref(semaphore)]).unwrap(),
        Value::SmallInt(5)
    );
    assert_eq!(
        vm.heap.get(semaphore).unwrap().as_semaphore().unwrap().excess_signals,
        0
    );
}

#[test]
fn test_signal_wakes_waiting_process_fifo() {
    // Full hand-off: resume a high-priority waiter (it blocks on the
    // semaphore), continue in the main process, signal the semaphore, and
    // the waiter preempts to completion.
    let mut vm = vm_at_priority(8);
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 0);
    let waiter_block = waiting_block(&mut vm, semaphore, 123);
    let waiter = vm.new_process_on_block(waiter_block, 12).unwrap();

    let resume = vm.intern("resume");
    let signal = vm.intern("signal");
    let probe = MethodBuilder::new("t>>handOff")
        .num_args(2)
        .build(|b| {
            // Resume the waiter: it preempts, runs until it blocks on the
            // semaphore, and control comes back here.
            b.emit(Opcode::PushTemp(0));
            b.emit_send(resume, 0);
            b.emit(Opcode::Pop);
            // Signal: the waiter outranks us, takes over and finishes; its
            // block value becomes the top-level result.
            b.emit(Opcode::PushTemp(1));
            b.emit_send(signal, 0);
            b.emit(Opcode::Pop);
            b.emit(Opcode::PushSmallInt(-1));
            b.emit(Opcode::ReturnTop);
        });
    let result = vm
        .activate(probe, Value::Nil, &[Value::Ref(waiter), Value::Ref(semaphore)])
        .unwrap();
    assert_eq!(result, Value::SmallInt(123));

    // The semaphore banked nothing and nobody waits on it anymore.
    let record = vm.heap.get(semaphore).unwrap().as_semaphore().unwrap();
    assert_eq!(record.excess_signals, 0);
    assert!(record.waiting.is_empty());
}

#[test]
fn test_wait_with_no_runnable_process_is_fatal() {
    let mut vm = vm_at_priority(8);
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 0);
    let wait = vm.intern("wait");
    let probe = MethodBuilder::new("t>>deadlock").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(wait, 0);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(probe, Value::Nil, &[Value::Ref(semaphore)]).unwrap_err(),
        VmError::NoRunnableProcess
    );
}

#[test]
fn test_timer_interrupt_preempts_at_safe_point() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut vm = vm_at_priority(8);
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 0);
    vm.interrupt.set_timer_semaphore(Some(semaphore));

    // Phase 1: park a high-priority process on the timer semaphore.
    let waiter_block = waiting_block(&mut vm, semaphore, 77);
    let waiter = vm.new_process_on_block(waiter_block, 12).unwrap();
    let resume = vm.intern("resume");
    let phase1 = MethodBuilder::new("t>>phase1").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(resume, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(1));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(phase1, Value::Nil, &[Value::Ref(waiter)]).unwrap(),
        Value::SmallInt(1)
    );

    // Phase 2: a pending tick is serviced at the first safe point; the
    // waiter preempts and its answer wins.
    vm.interrupt_handle().signal();
    let phase2 = MethodBuilder::new("t>>phase2").build(|b| {
        b.emit(Opcode::PushSmallInt(5));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(phase2, Value::Nil, &[]).unwrap(), Value::SmallInt(77));
}

#[test]
fn test_external_semaphore_signal_via_handle() {
    let mut vm = vm_at_priority(8);
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 0);
    let index = vm.interrupt.register_external_semaphore(semaphore);

    let waiter_block = waiting_block(&mut vm, semaphore, 55);
    let waiter = vm.new_process_on_block(waiter_block, 12).unwrap();
    let resume = vm.intern("resume");
    let phase1 = MethodBuilder::new("t>>phase1").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(resume, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(1));
        b.emit(Opcode::ReturnTop);
    });
    vm.activate(phase1, Value::Nil, &[Value::Ref(waiter)]).unwrap();

    vm.interrupt_handle().signal_external(index);
    let phase2 = MethodBuilder::new("t>>phase2").build(|b| {
        b.emit(Opcode::PushSmallInt(5));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(phase2, Value::Nil, &[]).unwrap(), Value::SmallInt(55));
}

#[test]
fn test_signal_with_no_waiter_banks_excess_signal() {
    let mut vm = vm_at_priority(8);
    let semaphore = vm.heap.new_semaphore(vm.special.semaphore, 0);
    let signal = vm.intern("signal");
    let probe = MethodBuilder::new("t>>probe").num_args(1).build(|b| {
        b.emit(Opcode::PushTemp(0));
        b.emit_send(signal, 0);
        b.emit(Opcode::ReturnTop);
    });
    vm.activate(probe, Value::Nil, &[Value::Ref(semaphore)]).unwrap();
    assert_eq!(
        vm.heap.get(semaphore).unwrap().as_semaphore().unwrap().excess_signals,
        1
    );
}

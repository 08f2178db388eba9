use bytecode_system::{MethodBuilder, Opcode};
use core_types::{Value, VmError};

use crate::helpers::vm_with_kernel;

#[test]
fn test_block_evaluation_with_arguments() {
    let mut vm = vm_with_kernel();
    let value2 = vm.intern("value:value:");
    let plus = vm.intern("+");
    // ^[:a :b | a + b] value: 3 value: 4
    let method = MethodBuilder::new("t>>blockAdd").build(|b| {
        b.begin_block(2, 0);
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::PushTemp(1));
        b.emit_send(plus, 1);
        b.emit(Opcode::BlockReturn);
        b.end_block();
        b.emit(Opcode::PushSmallInt(3));
        b.emit(Opcode::PushSmallInt(4));
        b.emit_send(value2, 2);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(7));
}

#[test]
fn test_block_sees_receiver_of_home() {
    let mut vm = vm_with_kernel();
    let value0 = vm.intern("value");
    let method = MethodBuilder::new("t>>blockSelf").build(|b| {
        b.begin_block(0, 0);
        b.emit(Opcode::PushReceiver);
        b.emit(Opcode::BlockReturn);
        b.end_block();
        b.emit_send(value0, 0);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(method, Value::SmallInt(88), &[]).unwrap(),
        Value::SmallInt(88)
    );
}

#[test]
fn test_copied_values_captured_at_creation() {
    let mut vm = vm_with_kernel();
    let value0 = vm.intern("value");
    // temp0 := 5; block copies temp0; temp0 := 9; block value -> 5
    let method = MethodBuilder::new("t>>copied")
        .num_temps(2)
        .build(|b| {
            b.emit(Opcode::PushSmallInt(5));
            b.emit(Opcode::PopIntoTemp(0));
            b.emit(Opcode::PushTemp(0));
            b.begin_block(0, 1);
            b.emit(Opcode::PushTemp(0));
            b.emit(Opcode::BlockReturn);
            b.end_block();
            b.emit(Opcode::PopIntoTemp(1));
            b.emit(Opcode::PushSmallInt(9));
            b.emit(Opcode::PopIntoTemp(0));
            b.emit(Opcode::PushTemp(1));
            b.emit_send(value0, 0);
            b.emit(Opcode::ReturnTop);
        });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(5));
}

#[test]
fn test_shared_variable_capture_through_remote_vector() {
    // A block capturing outer temporary x observes the
    // mutation between two invocations.
    let mut vm = vm_with_kernel();
    let value0 = vm.intern("value");
    let method = MethodBuilder::new("t>>shared")
        .num_temps(2)
        .build(|b| {
            // temp0 := Array new: 1 (the remote-temp vector holding x)
            b.emit(Opcode::PushNewArray { size: 1 });
            b.emit(Opcode::PopIntoTemp(0));
            // x := 1
            b.emit(Opcode::PushSmallInt(1));
            b.emit(Opcode::PopIntoRemoteTemp { index: 0, vector: 0 });
            // temp1 := [x] (copies the vector, not the value)
            b.emit(Opcode::PushTemp(0));
            b.begin_block(0, 1);
            b.emit(Opcode::PushRemoteTemp { index: 0, vector: 0 });
            b.emit(Opcode::BlockReturn);
            b.end_block();
            b.emit(Opcode::PopIntoTemp(1));
            // First invocation sees 1.
            b.emit(Opcode::PushTemp(1));
            b.emit_send(value0, 0);
            b.emit(Opcode::Pop);
            // x := 42
            b.emit(Opcode::PushSmallInt(42));
            b.emit(Opcode::PopIntoRemoteTemp { index: 0, vector: 0 });
            // Second invocation observes the mutation.
            b.emit(Opcode::PushTemp(1));
            b.emit_send(value0, 0);
            b.emit(Opcode::ReturnTop);
        });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(42));
}

#[test]
fn test_non_local_return_unwinds_intermediate_activations() {
    // A (sender nil) calls B; a block whose home is A
    // performs a non-local return. B is terminated, then A, and A's home
    // return value surfaces at top level.
    let mut vm = vm_with_kernel();
    let at_put = vm.intern("at:put:");
    let call = vm.intern("callBlock:");
    let value0 = vm.intern("value");

    // Object>>callBlock: aBlock — records its context in trace at 2, runs
    // the block, and would answer 99 if the block returned normally.
    let callee = MethodBuilder::new("Object>>callBlock:")
        .num_args(1)
        .build(|b| {
            b.emit(Opcode::PushReceiver);
            b.emit(Opcode::PushSmallInt(2));
            b.emit(Opcode::PushContext);
            b.emit_send(at_put, 2);
            b.emit(Opcode::Pop);
            b.emit(Opcode::PushTemp(0));
            b.emit_send(value0, 0);
            b.emit(Opcode::Pop);
            b.emit(Opcode::PushSmallInt(99));
            b.emit(Opcode::ReturnTop);
        });
    vm.install_method(vm.special.object, "callBlock:", callee);

    // Home method A: receiver is the trace array; records its own context
    // at 1, sends callBlock: with [^42], then would answer 7.
    let home = MethodBuilder::new("t>>home").build(|b| {
        b.emit(Opcode::PushReceiver);
        b.emit(Opcode::PushSmallInt(1));
        b.emit(Opcode::PushContext);
        b.emit_send(at_put, 2);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushReceiver);
        b.begin_block(0, 0);
        b.emit(Opcode::PushSmallInt(42));
        b.emit(Opcode::ReturnTop); // non-local: returns from the home method
        b.end_block();
        b.emit_send(call, 1);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(7));
        b.emit(Opcode::ReturnTop);
    });

    let trace = vm.heap.new_array(vm.special.array, 2);
    let result = vm.activate(home, Value::Ref(trace), &[]).unwrap();
    assert_eq!(result, Value::SmallInt(42));

    // Both recorded activations were terminated by the unwind.
    for index in 0..2 {
        let ctx = vm.heap.array_at(trace, index).unwrap().as_ref().unwrap();
        let record = vm.heap.get(ctx).unwrap().as_context().unwrap();
        assert!(record.is_terminated(), "context {} should be terminated", index);
    }
}

#[test]
fn test_non_local_return_into_dead_home_is_an_unwind_error() {
    let mut vm = vm_with_kernel();
    let value0 = vm.intern("value");

    // makeBlock answers [^1] whose home dies when makeBlock returns.
    let make = MethodBuilder::new("Object>>makeBlock").build(|b| {
        b.begin_block(0, 0);
        b.emit(Opcode::PushSmallInt(1));
        b.emit(Opcode::ReturnTop);
        b.end_block();
        b.emit(Opcode::ReturnTop);
    });
    vm.install_method(vm.special.object, "makeBlock", make);

    let make_sel = vm.intern("makeBlock");
    let probe = MethodBuilder::new("t>>probe").build(|b| {
        b.emit(Opcode::PushNil);
        b.emit_send(make_sel, 0);
        b.emit_send(value0, 0);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(probe, Value::Nil, &[]).unwrap_err(),
        VmError::BlockCannotReturn
    );
}

#[test]
fn test_nested_blocks_return_to_outermost_home() {
    let mut vm = vm_with_kernel();
    let value0 = vm.intern("value");
    // ^[[ ^5 ] value] value ... both blocks' home is the method itself.
    let method = MethodBuilder::new("t>>nested").build(|b| {
        b.begin_block(0, 0);
        b.begin_block(0, 0);
        b.emit(Opcode::PushSmallInt(5));
        b.emit(Opcode::ReturnTop);
        b.end_block();
        b.emit_send(value0, 0);
        b.emit(Opcode::BlockReturn);
        b.end_block();
        b.emit_send(value0, 0);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(6));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(5));
}

#[test]
fn test_block_arity_mismatch_fails_primitive() {
    let mut vm = vm_with_kernel();
    let value0 = vm.intern("value");
    // [:a | a] value — zero-arg evaluation of a one-arg block falls back to
    // the guest fallback code (which answers nil here).
    let method = MethodBuilder::new("t>>badArity").build(|b| {
        b.begin_block(1, 0);
        b.emit(Opcode::PushTemp(0));
        b.emit(Opcode::BlockReturn);
        b.end_block();
        b.emit_send(value0, 0);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::Nil);
}

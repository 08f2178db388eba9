use bytecode_system::{Literal, MethodBuilder, Opcode};
use core_types::Value;

use crate::helpers::vm_with_kernel;

#[test]
fn test_push_constants_and_return() {
    let mut vm = vm_with_kernel();
    let method = MethodBuilder::new("t>>constants").build(|b| {
        b.emit(Opcode::PushTrue);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushNil);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PushSmallInt(-3));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(-3));
}

#[test]
fn test_return_receiver() {
    let mut vm = vm_with_kernel();
    let method = MethodBuilder::new("t>>self").build(|b| {
        b.emit(Opcode::ReturnReceiver);
    });
    assert_eq!(
        vm.activate(method, Value::Character('r'), &[]).unwrap(),
        Value::Character('r')
    );
}

#[test]
fn test_temporaries_and_arguments() {
    let mut vm = vm_with_kernel();
    // arg0 -> temp1, return temp1
    let method = MethodBuilder::new("t>>swap")
        .num_args(1)
        .num_temps(1)
        .build(|b| {
            b.emit(Opcode::PushTemp(0));
            b.emit(Opcode::PopIntoTemp(1));
            b.emit(Opcode::PushTemp(1));
            b.emit(Opcode::ReturnTop);
        });
    assert_eq!(
        vm.activate(method, Value::Nil, &[Value::SmallInt(9)]).unwrap(),
        Value::SmallInt(9)
    );
}

#[test]
fn test_store_temp_keeps_value_on_stack() {
    let mut vm = vm_with_kernel();
    let method = MethodBuilder::new("t>>store")
        .num_temps(1)
        .build(|b| {
            b.emit(Opcode::PushSmallInt(5));
            b.emit(Opcode::StoreTemp(0));
            // The stored value is still on the stack.
            b.emit(Opcode::ReturnTop);
        });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(5));
}

#[test]
fn test_dup() {
    let mut vm = vm_with_kernel();
    let plus = vm.intern("+");
    let method = MethodBuilder::new("t>>dup").build(|b| {
        b.emit(Opcode::PushSmallInt(4));
        b.emit(Opcode::Dup);
        b.emit_send(plus, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(8));
}

#[test]
fn test_literal_pool_values() {
    let mut vm = vm_with_kernel();
    let method = MethodBuilder::new("t>>literal").build(|b| {
        let index = b.add_literal(Literal::Value(Value::Float(2.5)));
        b.emit(Opcode::PushLiteral(index));
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::Float(2.5));
}

#[test]
fn test_conditional_jumps_take_both_arms() {
    let mut vm = vm_with_kernel();
    let build = |condition: bool| {
        MethodBuilder::new("t>>branch").build(|b| {
            b.emit(if condition { Opcode::PushTrue } else { Opcode::PushFalse });
            let jump = b.emit(Opcode::JumpIfFalse(0));
            b.emit(Opcode::PushSmallInt(1));
            b.emit(Opcode::ReturnTop);
            let other = b.here();
            b.patch_jump(jump, other);
            b.emit(Opcode::PushSmallInt(2));
            b.emit(Opcode::ReturnTop);
        })
    };
    assert_eq!(vm.activate(build(true), Value::Nil, &[]).unwrap(), Value::SmallInt(1));
    assert_eq!(vm.activate(build(false), Value::Nil, &[]).unwrap(), Value::SmallInt(2));
}

#[test]
fn test_backward_jump_loop() {
    let mut vm = vm_with_kernel();
    let plus = vm.intern("+");
    let less = vm.intern("<");
    // temp0 := 0; [temp0 < 1000] whileTrue: [temp0 := temp0 + 1]; ^temp0
    let method = MethodBuilder::new("t>>loop")
        .num_temps(1)
        .large_frame()
        .build(|b| {
            b.emit(Opcode::PushSmallInt(0));
            b.emit(Opcode::PopIntoTemp(0));
            let head = b.here();
            b.emit(Opcode::PushTemp(0));
            b.emit(Opcode::PushSmallInt(1000));
            b.emit_send(less, 1);
            let exit = b.emit(Opcode::JumpIfFalse(0));
            b.emit(Opcode::PushTemp(0));
            b.emit(Opcode::PushSmallInt(1));
            b.emit_send(plus, 1);
            b.emit(Opcode::PopIntoTemp(0));
            b.emit(Opcode::Jump(head as u32));
            let out = b.here();
            b.patch_jump(exit, out);
            b.emit(Opcode::PushTemp(0));
            b.emit(Opcode::ReturnTop);
        });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(1000));
}

#[test]
fn test_non_boolean_jump_condition_reports_must_be_boolean() {
    let mut vm = vm_with_kernel();
    let method = MethodBuilder::new("t>>bad").build(|b| {
        b.emit(Opcode::PushSmallInt(3));
        b.emit(Opcode::JumpIfTrue(3));
        b.emit(Opcode::ReturnReceiver);
        b.emit(Opcode::ReturnReceiver);
    });
    let err = vm.activate(method, Value::Nil, &[]).unwrap_err();
    match err {
        core_types::VmError::DoesNotUnderstand { selector, .. } => {
            assert_eq!(selector, "mustBeBoolean");
        }
        other => panic!("expected mustBeBoolean DNU, got {:?}", other),
    }
}

#[test]
fn test_cons_array() {
    let mut vm = vm_with_kernel();
    let at = vm.intern("at:");
    let method = MethodBuilder::new("t>>consArray").build(|b| {
        b.emit(Opcode::PushSmallInt(10));
        b.emit(Opcode::PushSmallInt(20));
        b.emit(Opcode::PushConsArray { size: 2 });
        b.emit(Opcode::PushSmallInt(2));
        b.emit_send(at, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(method, Value::Nil, &[]).unwrap(), Value::SmallInt(20));
}

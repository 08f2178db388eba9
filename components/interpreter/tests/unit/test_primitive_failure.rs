use bytecode_system::{MethodBuilder, Opcode};
use core_types::Value;

use interpreter::primitives::{codes, indexes};
use interpreter::Vm;

use crate::helpers::install_kernel;

/// A method whose primitive fails and whose fallback code stores the
/// failure reason into a temporary, per the fallback-code convention.
fn reason_reporting_add(vm: &mut Vm) {
    let method = MethodBuilder::new("Object>>reportingAdd:")
        .num_args(1)
        .num_temps(1)
        .primitive(indexes::ADD)
        .build(|b| {
            // Fallback: the engine pushed the reason; store it and answer it.
            b.emit(Opcode::PopIntoTemp(1));
            b.emit(Opcode::PushTemp(1));
            b.emit(Opcode::ReturnTop);
        });
    vm.install_method(vm.special.object, "reportingAdd:", method);
}

#[test]
fn test_primitive_success_never_activates_fallback() {
    let mut vm = Vm::new();
    install_kernel(&mut vm);
    reason_reporting_add(&mut vm);
    let selector = vm.intern("reportingAdd:");
    let probe = MethodBuilder::new("t>>probe").build(|b| {
        b.emit(Opcode::PushSmallInt(20));
        b.emit(Opcode::PushSmallInt(22));
        b.emit_send(selector, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(probe, Value::Nil, &[]).unwrap(), Value::SmallInt(42));
}

#[test]
fn test_primitive_failure_pushes_raw_reason_code() {
    let mut vm = Vm::new();
    install_kernel(&mut vm);
    reason_reporting_add(&mut vm);
    let selector = vm.intern("reportingAdd:");
    // Boolean receiver: the add primitive fails with BAD_RECEIVER and no
    // error table is installed, so the raw code comes through.
    let probe = MethodBuilder::new("t>>probe").build(|b| {
        b.emit(Opcode::PushTrue);
        b.emit(Opcode::PushSmallInt(1));
        b.emit_send(selector, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(probe, Value::Nil, &[]).unwrap(),
        Value::SmallInt(codes::BAD_RECEIVER as i64)
    );
}

#[test]
fn test_primitive_failure_reason_looked_up_in_error_table() {
    let mut vm = Vm::new();
    install_kernel(&mut vm);
    reason_reporting_add(&mut vm);

    // Install symbolic reasons; BAD_RECEIVER maps to a symbol object.
    let generic = vm.intern("error");
    let bad_receiver = vm.intern("badReceiver");
    let generic_sym = vm.symbol_for(generic);
    let bad_receiver_sym = vm.symbol_for(bad_receiver);
    vm.set_primitive_error_table(vec![Value::Ref(generic_sym), Value::Ref(bad_receiver_sym)]);

    let selector = vm.intern("reportingAdd:");
    let probe = MethodBuilder::new("t>>probe").build(|b| {
        b.emit(Opcode::PushTrue);
        b.emit(Opcode::PushSmallInt(1));
        b.emit_send(selector, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(
        vm.activate(probe, Value::Nil, &[]).unwrap(),
        Value::Ref(bad_receiver_sym)
    );
}

#[test]
fn test_method_without_reason_store_gets_no_push() {
    let mut vm = Vm::new();
    install_kernel(&mut vm);
    // Fallback does not start with a store, so no reason is pushed and the
    // bytecode runs with a clean stack.
    let method = MethodBuilder::new("Object>>quietAdd:")
        .num_args(1)
        .primitive(indexes::ADD)
        .build(|b| {
            b.emit(Opcode::PushSmallInt(-1));
            b.emit(Opcode::ReturnTop);
        });
    vm.install_method(vm.special.object, "quietAdd:", method);

    let selector = vm.intern("quietAdd:");
    let probe = MethodBuilder::new("t>>probe").build(|b| {
        b.emit(Opcode::PushTrue);
        b.emit(Opcode::PushSmallInt(1));
        b.emit_send(selector, 1);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(probe, Value::Nil, &[]).unwrap(), Value::SmallInt(-1));
}

#[test]
fn test_unimplemented_primitive_index_falls_back() {
    let mut vm = Vm::new();
    install_kernel(&mut vm);
    let method = MethodBuilder::new("Object>>missing")
        .primitive(999)
        .build(|b| {
            b.emit(Opcode::PushSmallInt(7));
            b.emit(Opcode::ReturnTop);
        });
    vm.install_method(vm.special.object, "missing", method);

    let selector = vm.intern("missing");
    let probe = MethodBuilder::new("t>>probe").build(|b| {
        b.emit(Opcode::PushNil);
        b.emit_send(selector, 0);
        b.emit(Opcode::ReturnTop);
    });
    assert_eq!(vm.activate(probe, Value::Nil, &[]).unwrap(), Value::SmallInt(7));
}

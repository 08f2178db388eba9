//! The bytecode engine.
//!
//! `step` fetches, decodes and executes one instruction of the running frame
//! and reports what happened as an explicit [`StepOutcome`]; `run` is the
//! driver loop that interprets those outcomes — pushing callee frames,
//! delivering return values, unwinding non-local returns and carrying on
//! across process switches. Control flow is data, never unwinding.
//!
//! Interrupts are polled at every instruction boundary, which subsumes the
//! required send and backward-jump checkpoints; nothing preempts execution
//! mid-instruction.

use core_types::{ClassId, ObjectId, Selector, Value, VmError};
use std::rc::Rc;

use bytecode_system::{CompiledMethod, Literal, Opcode};
use object_model::BlockClosure;

use crate::activation::{
    context_mut, context_ref, get_or_create_context, home_context_of, push_resume_frame,
};
use crate::dispatch::LookupResult;
use crate::frame::Frame;
use crate::inline_cache::CachedTarget;
use crate::interrupt::check_interrupts;
use crate::primitives::PrimitiveOutcome;
use crate::vm::Vm;

/// What one instruction did.
pub enum StepOutcome {
    /// Fell through or jumped; the frame's pc is already updated
    Continue,
    /// A send activated this callee frame
    Push(Frame),
    /// The running activation returned locally with this value
    Return(Value),
    /// A block returned from its home method: unwind to `home`
    NonLocalReturn {
        /// The home method activation the return targets
        home: ObjectId,
        /// The value being returned
        value: Value,
    },
    /// Control switched to another process; the frame stack was replaced
    Switch,
}

/// Run the driver loop until the base activation's chain produces a
/// top-level value.
pub fn run(vm: &mut Vm) -> Result<Value, VmError> {
    loop {
        match step(vm)? {
            StepOutcome::Continue | StepOutcome::Switch => {}
            StepOutcome::Push(frame) => vm.frames.push(frame),
            StepOutcome::Return(value) => {
                if let Some(result) = pop_frame_with(vm, value)? {
                    return Ok(result);
                }
            }
            StepOutcome::NonLocalReturn { home, value } => {
                if let Some(result) = unwind_to_home(vm, home, value)? {
                    return Ok(result);
                }
            }
        }
    }
}

fn top(vm: &mut Vm) -> &mut Frame {
    vm.frames.last_mut().expect("engine running without a frame")
}

/// Execute one instruction of the running frame.
pub fn step(vm: &mut Vm) -> Result<StepOutcome, VmError> {
    // Safe point: nothing of the next instruction has executed yet, so a
    // switch here parks the frame to re-fetch the same instruction later.
    if check_interrupts(vm)? {
        return Ok(StepOutcome::Switch);
    }

    let (op, pc_before, method) = {
        let frame = vm
            .frames
            .last_mut()
            .ok_or(VmError::Invariant("step without a frame"))?;
        let pc_before = frame.pc;
        let op = frame
            .method
            .code()
            .get(pc_before)
            .cloned()
            .ok_or(VmError::Invariant("execution ran off the method end"))?;
        frame.pc += 1;
        (op, pc_before, frame.method.clone())
    };

    match op {
        Opcode::PushReceiver => {
            let receiver = top(vm).receiver.clone();
            top(vm).push(receiver);
        }
        Opcode::PushReceiverVariable(slot) => {
            let receiver = top(vm).receiver.clone();
            let id = receiver
                .as_ref()
                .ok_or(VmError::Invariant("instance variable on an immediate"))?;
            let value = read_inst_var(vm, &method, pc_before, id, slot as usize)?;
            top(vm).push(value);
        }
        Opcode::PushTemp(slot) => {
            let frame = top(vm);
            let value = frame
                .stack
                .get(slot as usize)
                .cloned()
                .ok_or(VmError::Invariant("temporary index out of frame"))?;
            frame.push(value);
        }
        Opcode::PushLiteral(index) => {
            let value = literal_value(vm, &method, index as usize)?;
            top(vm).push(value);
        }
        Opcode::PushNil => top(vm).push(Value::Nil),
        Opcode::PushTrue => top(vm).push(Value::Boolean(true)),
        Opcode::PushFalse => top(vm).push(Value::Boolean(false)),
        Opcode::PushSmallInt(n) => top(vm).push(Value::SmallInt(n)),
        Opcode::PushContext => {
            let index = vm.frames.len() - 1;
            let id = get_or_create_context(vm, index)?;
            top(vm).push(Value::Ref(id));
        }
        Opcode::PushClosure { block } => {
            let descriptor = method
                .block(block as usize)
                .ok_or(VmError::Invariant("missing block descriptor"))?;
            let copied = top(vm).pop_n(descriptor.num_copied as usize);
            let index = vm.frames.len() - 1;
            let outer = get_or_create_context(vm, index)?;
            let receiver = top(vm).receiver.clone();
            let closure = BlockClosure {
                method: method.clone(),
                block_index: block as usize,
                outer_context: Value::Ref(outer),
                receiver,
                copied,
            };
            let id = vm.heap.new_closure(vm.special.block_closure, closure);
            let frame = top(vm);
            frame.push(Value::Ref(id));
            // The body sits inline after this instruction; skip it.
            frame.pc = (descriptor.offset + descriptor.len) as usize;
        }
        Opcode::PushNewArray { size } => {
            let id = vm.heap.new_array(vm.special.array, size as usize);
            top(vm).push(Value::Ref(id));
        }
        Opcode::PushConsArray { size } => {
            let values = top(vm).pop_n(size as usize);
            let id = vm.heap.new_array_from(vm.special.array, values);
            top(vm).push(Value::Ref(id));
        }
        Opcode::PushRemoteTemp { index, vector } => {
            let holder = remote_vector(vm, vector)?;
            let value = vm.heap.array_at(holder, index as usize)?;
            top(vm).push(value);
        }
        Opcode::StoreReceiverVariable(slot) => {
            let value = top(vm).top().clone();
            store_receiver_variable(vm, &method, pc_before, slot as usize, value)?;
        }
        Opcode::PopIntoReceiverVariable(slot) => {
            let value = top(vm).pop();
            store_receiver_variable(vm, &method, pc_before, slot as usize, value)?;
        }
        Opcode::StoreTemp(slot) => {
            let frame = top(vm);
            let value = frame.top().clone();
            store_temp(frame, slot as usize, value)?;
        }
        Opcode::PopIntoTemp(slot) => {
            let frame = top(vm);
            let value = frame.pop();
            store_temp(frame, slot as usize, value)?;
        }
        Opcode::StoreRemoteTemp { index, vector } => {
            let value = top(vm).top().clone();
            let holder = remote_vector(vm, vector)?;
            vm.heap.array_at_put(holder, index as usize, value)?;
        }
        Opcode::PopIntoRemoteTemp { index, vector } => {
            let value = top(vm).pop();
            let holder = remote_vector(vm, vector)?;
            vm.heap.array_at_put(holder, index as usize, value)?;
        }
        Opcode::Dup => {
            let value = top(vm).top().clone();
            top(vm).push(value);
        }
        Opcode::Pop => {
            top(vm).pop();
        }
        Opcode::Jump(target) => {
            top(vm).pc = target as usize;
        }
        Opcode::JumpIfTrue(target) => {
            return conditional_jump(vm, pc_before, target as usize, true);
        }
        Opcode::JumpIfFalse(target) => {
            return conditional_jump(vm, pc_before, target as usize, false);
        }
        Opcode::Send { selector, num_args } => {
            let selector = selector_literal(&method, selector as usize)?;
            let args = top(vm).pop_n(num_args as usize);
            let receiver = top(vm).pop();
            let class = vm.class_of(&receiver)?;
            return do_send(vm, pc_before, selector, receiver, args, class);
        }
        Opcode::SendSuper { selector, num_args } => {
            let selector = selector_literal(&method, selector as usize)?;
            let args = top(vm).pop_n(num_args as usize);
            let receiver = top(vm).pop();
            let holder = method
                .holder()
                .ok_or(VmError::Invariant("super send outside an installed method"))?;
            let class = vm
                .classes
                .get(holder)
                .superclass()
                .ok_or(VmError::Invariant("super send with no superclass"))?;
            return do_send(vm, pc_before, selector, receiver, args, class);
        }
        Opcode::ReturnTop => {
            let value = top(vm).pop();
            return method_return(vm, value);
        }
        Opcode::ReturnReceiver => {
            let value = top(vm).receiver.clone();
            return method_return(vm, value);
        }
        Opcode::BlockReturn => {
            let value = top(vm).pop();
            return Ok(StepOutcome::Return(value));
        }
    }
    Ok(StepOutcome::Continue)
}

/// Ordinary return: local from a method activation, non-local (to the home
/// method) from a block activation.
fn method_return(vm: &mut Vm, value: Value) -> Result<StepOutcome, VmError> {
    match top(vm).closure {
        Some(closure_id) => {
            let home = home_context_of(vm, closure_id)?;
            Ok(StepOutcome::NonLocalReturn { home, value })
        }
        None => Ok(StepOutcome::Return(value)),
    }
}

fn conditional_jump(
    vm: &mut Vm,
    pc_before: usize,
    target: usize,
    jump_on: bool,
) -> Result<StepOutcome, VmError> {
    let condition = top(vm).pop();
    match condition.as_boolean() {
        Some(b) => {
            if b == jump_on {
                top(vm).pc = target;
            }
            Ok(StepOutcome::Continue)
        }
        None => {
            // Send mustBeBoolean to the offending value; the jump re-executes
            // against whatever the handler answers.
            top(vm).pc = pc_before;
            let selector = vm.well_known.must_be_boolean;
            let class = vm.class_of(&condition)?;
            do_send(vm, pc_before, selector, condition, Vec::new(), class)
        }
    }
}

fn store_temp(frame: &mut Frame, slot: usize, value: Value) -> Result<(), VmError> {
    let cell = frame
        .stack
        .get_mut(slot)
        .ok_or(VmError::Invariant("temporary index out of frame"))?;
    *cell = value;
    Ok(())
}

fn remote_vector(vm: &mut Vm, vector: u8) -> Result<ObjectId, VmError> {
    top(vm)
        .stack
        .get(vector as usize)
        .and_then(Value::as_ref)
        .ok_or(VmError::Invariant("remote temp vector missing"))
}

fn literal_value(vm: &mut Vm, method: &Rc<CompiledMethod>, index: usize) -> Result<Value, VmError> {
    match method.literal(index) {
        Some(Literal::Value(value)) => Ok(value.clone()),
        Some(Literal::Selector(selector)) => {
            let selector = *selector;
            Ok(Value::Ref(vm.symbol_for(selector)))
        }
        None => Err(VmError::Invariant("literal index out of pool")),
    }
}

fn selector_literal(method: &Rc<CompiledMethod>, index: usize) -> Result<Selector, VmError> {
    match method.literal(index) {
        Some(Literal::Selector(selector)) => Ok(*selector),
        _ => Err(VmError::Invariant("send without a selector literal")),
    }
}

fn read_inst_var(
    vm: &mut Vm,
    method: &Rc<CompiledMethod>,
    pc: usize,
    id: ObjectId,
    slot: usize,
) -> Result<Value, VmError> {
    {
        let object = vm.heap.get(id)?;
        if let Some(record) = object.as_slots() {
            if record.layout().is_valid() {
                if let Some(location) = vm.slot_sites.lookup(method, pc, record.layout()) {
                    return Ok(record.read_resolved(location));
                }
            }
        }
    }
    let value = vm.heap.inst_var_at(&vm.classes, id, slot)?;
    if let Some(record) = vm.heap.get(id)?.as_slots() {
        let layout = record.layout().clone();
        let location = layout.location(slot);
        vm.slot_sites.update(method, pc, layout, location);
    }
    Ok(value)
}

fn store_receiver_variable(
    vm: &mut Vm,
    method: &Rc<CompiledMethod>,
    pc: usize,
    slot: usize,
    value: Value,
) -> Result<(), VmError> {
    let receiver = top(vm).receiver.clone();
    let id = receiver
        .as_ref()
        .ok_or(VmError::Invariant("instance variable on an immediate"))?;
    let cached = {
        let object = vm.heap.get(id)?;
        match object.as_slots() {
            Some(record) if record.layout().is_valid() => {
                vm.slot_sites.lookup(method, pc, record.layout())
            }
            _ => None,
        }
    };
    if let Some(location) = cached {
        if let Some(record) = vm.heap.get_mut(id)?.as_slots_mut() {
            if record.write_resolved(location, &value) {
                return Ok(());
            }
        }
    }
    vm.heap.inst_var_at_put(&vm.classes, id, slot, value)?;
    if let Some(record) = vm.heap.get(id)?.as_slots() {
        let layout = record.layout().clone();
        let location = layout.location(slot);
        vm.slot_sites.update(method, pc, layout, location);
    }
    Ok(())
}

/// Resolve and perform a send: call-site inline cache, then the global
/// lookup cache, then the full walk; does-not-understand redirects to the
/// handler with a materialized message object.
pub fn do_send(
    vm: &mut Vm,
    pc: usize,
    selector: Selector,
    receiver: Value,
    args: Vec<Value>,
    class: ClassId,
) -> Result<StepOutcome, VmError> {
    let site_method = top(vm).method.clone();
    let result = match vm.send_sites.lookup(&site_method, pc, class) {
        Some(result) => result,
        None => {
            let (result, assumptions) =
                vm.method_cache
                    .lookup_with_assumptions(&vm.classes, class, selector);
            vm.send_sites.update(
                &site_method,
                pc,
                class,
                CachedTarget::new(result.clone(), assumptions),
            );
            result
        }
    };

    match result {
        LookupResult::Method(target, _holder) => invoke(vm, target, receiver, args),
        LookupResult::DoesNotUnderstand => {
            log::debug!(
                "{} does not understand {:?}",
                vm.classes.get(class).name(),
                vm.selectors.name(selector)
            );
            let message = build_message(vm, selector, &args)?;
            let dnu = vm.well_known.does_not_understand;
            let (handler, _) = vm
                .method_cache
                .lookup_with_assumptions(&vm.classes, class, dnu);
            match handler {
                LookupResult::Method(target, _) => {
                    invoke(vm, target, receiver, vec![Value::Ref(message)])
                }
                LookupResult::DoesNotUnderstand => Err(VmError::DoesNotUnderstand {
                    selector: vm.selectors.name(selector).to_string(),
                    class: vm.classes.get(class).name().to_string(),
                }),
            }
        }
    }
}

/// Activate `method` for `receiver`: primitive fast path first, bytecode
/// fallback with the failure reason pushed when the method stores it.
fn invoke(
    vm: &mut Vm,
    method: Rc<CompiledMethod>,
    receiver: Value,
    args: Vec<Value>,
) -> Result<StepOutcome, VmError> {
    if args.len() != method.num_args() {
        return Err(VmError::WrongArgumentCount {
            expected: method.num_args(),
            actual: args.len(),
        });
    }

    let mut failure = None;
    if let Some(index) = method.primitive() {
        let callable = vm.primitives.lookup(index);
        match callable {
            Some(f) => match f(vm, receiver.clone(), &args)? {
                PrimitiveOutcome::Ok(value) => {
                    top(vm).push(value);
                    return Ok(StepOutcome::Continue);
                }
                PrimitiveOutcome::Done => return Ok(StepOutcome::Continue),
                PrimitiveOutcome::Activate(frame) => return Ok(StepOutcome::Push(frame)),
                PrimitiveOutcome::Fail(code) => failure = Some(code),
            },
            None => failure = Some(crate::primitives::codes::GENERIC_ERROR),
        }
        log::trace!(
            "primitive {} failed in {} (reason {})",
            index,
            method.label(),
            failure.unwrap_or_default()
        );
    }

    let mut frame = Frame::for_method(vm.markers.mint(), method.clone(), receiver, args);
    if let Some(code) = failure {
        if method.expects_primitive_error_code() {
            let reason = vm
                .prim_error_table
                .get(code as usize)
                .cloned()
                .unwrap_or(Value::SmallInt(code as i64));
            frame.push(reason);
        }
    }
    Ok(StepOutcome::Push(frame))
}

fn build_message(
    vm: &mut Vm,
    selector: Selector,
    args: &[Value],
) -> Result<ObjectId, VmError> {
    let symbol = vm.symbol_for(selector);
    let arguments = vm.heap.new_array_from(vm.special.array, args.to_vec());
    let message = vm.heap.new_instance(&vm.classes, vm.special.message, 0)?;
    vm.heap
        .inst_var_at_put(&vm.classes, message, 0, Value::Ref(symbol))?;
    vm.heap
        .inst_var_at_put(&vm.classes, message, 1, Value::Ref(arguments))?;
    Ok(message)
}

/// Pop the returning frame, terminate its context, and deliver `value` to
/// the caller — the frame below, the heap continuation of a resumed
/// context, or the top level (returned as `Some`).
fn pop_frame_with(vm: &mut Vm, value: Value) -> Result<Option<Value>, VmError> {
    let frame = vm
        .frames
        .pop()
        .ok_or(VmError::Invariant("return without a frame"))?;
    let mut continuation = Value::Nil;
    if let Some(id) = frame.context {
        let record = context_mut(vm, id)?;
        continuation = record.sender.clone();
        record.terminate();
    }
    if let Some(caller) = vm.frames.last_mut() {
        caller.push(value);
        return Ok(None);
    }
    if let Some(ctx) = continuation.as_ref() {
        let resumable = {
            let record = context_ref(vm, ctx)?;
            !record.is_terminated()
        };
        if resumable {
            push_resume_frame(vm, ctx)?;
            top(vm).push(value);
            return Ok(None);
        }
    }
    Ok(Some(value))
}

/// Non-local return: unwind every activation between the top of stack and
/// the home context, terminating each as it passes, then return from home
/// itself. Targeting a terminated or off-stack home is the unwind error.
fn unwind_to_home(
    vm: &mut Vm,
    home: ObjectId,
    value: Value,
) -> Result<Option<Value>, VmError> {
    if context_ref(vm, home)?.is_terminated() {
        return Err(VmError::BlockCannotReturn);
    }
    let Some(index) = vm.frames.iter().position(|f| f.context == Some(home)) else {
        // The home context is not on the running stack: either suspended in
        // another process or already unwound. Both are unwind errors.
        return Err(VmError::BlockCannotReturn);
    };
    while vm.frames.len() > index + 1 {
        let frame = vm
            .frames
            .pop()
            .ok_or(VmError::Invariant("unwind popped past the home frame"))?;
        if let Some(id) = frame.context {
            context_mut(vm, id)?.terminate();
        }
    }
    pop_frame_with(vm, value)
}

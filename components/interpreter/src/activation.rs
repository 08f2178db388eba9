//! Reification: the stack/heap duality of activations.
//!
//! An activation starts virtual, existing only as a [`Frame`]. It is
//! materialized into a heap context record exactly when its identity escapes
//! (stored into a variable, inspected, or needed for a sender chain), and at
//! most once per frame marker: a second request yields the identical record.
//! While the backing frame still runs the record is live and pc/sp/slot
//! access redirects to the frame; once the frame returns, is unwound, or the
//! whole stack is parked for a process switch, the record detaches and
//! carries the state itself.

use core_types::{ObjectId, Value, VmError};

use object_model::{Body, ContextOrigin, ContextRecord, FrameMarker};

use crate::frame::Frame;
use crate::vm::Vm;

/// Index of the frame backing `marker`, if it is still on the stack.
pub fn find_frame(vm: &Vm, marker: FrameMarker) -> Option<usize> {
    vm.frames.iter().rposition(|f| f.marker == marker)
}

/// Materialize the activation at `index` of the frame stack, or return its
/// existing record: the single-materialization law.
pub fn get_or_create_context(vm: &mut Vm, index: usize) -> Result<ObjectId, VmError> {
    if let Some(id) = vm.frames[index].context {
        return Ok(id);
    }
    let frame = &vm.frames[index];
    let record = ContextRecord {
        origin: ContextOrigin::Live(frame.marker),
        sender: Value::Nil,
        pc: Some(frame.pc),
        sp: frame.stack.len(),
        method: frame.method.clone(),
        closure: frame.closure,
        receiver: frame.receiver.clone(),
        // While live, the frame holds the authoritative slot state.
        slots: Vec::new(),
    };
    let id = vm
        .heap
        .allocate(vm.special.context, Body::Context(record));
    vm.frames[index].context = Some(id);
    Ok(id)
}

/// Reify the entire frame stack, link the sender chain, detach every record
/// and clear the frames. Returns the top context (`Ref`) or nil when the
/// stack was empty. This is the heavy half of a process switch.
pub fn park_stack(vm: &mut Vm) -> Result<Value, VmError> {
    let depth = vm.frames.len();
    if depth == 0 {
        return Ok(Value::Nil);
    }
    let mut ids = Vec::with_capacity(depth);
    for index in 0..depth {
        ids.push(get_or_create_context(vm, index)?);
    }
    let frames = std::mem::take(&mut vm.frames);
    for (index, frame) in frames.iter().enumerate() {
        let record = context_mut(vm, ids[index])?;
        record.pc = Some(frame.pc);
        record.sp = frame.stack.len();
        record.slots = frame.stack.clone();
        record.receiver = frame.receiver.clone();
        record.origin = ContextOrigin::Detached;
        if index > 0 {
            record.sender = Value::Ref(ids[index - 1]);
        }
        // The base frame keeps the heap continuation its record already
        // carries (or nil for a top-level activation).
    }
    Ok(Value::Ref(ids[depth - 1]))
}

/// Rebuild a frame from a detached, unterminated context and push it; the
/// record becomes live again, backed by the fresh frame.
pub fn push_resume_frame(vm: &mut Vm, id: ObjectId) -> Result<(), VmError> {
    let marker = vm.markers.mint();
    let record = context_mut(vm, id)?;
    if record.is_terminated() {
        return Err(VmError::Invariant("cannot resume a terminated context"));
    }
    if matches!(record.origin, ContextOrigin::Live(_)) {
        return Err(VmError::Invariant("cannot resume a context that is live"));
    }
    let mut stack = record.slots.clone();
    stack.truncate(record.sp);
    let frame = Frame {
        marker,
        method: record.method.clone(),
        closure: record.closure,
        receiver: record.receiver.clone(),
        pc: record.pc.unwrap_or(0),
        stack,
        context: Some(id),
    };
    record.origin = ContextOrigin::Live(marker);
    vm.frames.push(frame);
    Ok(())
}

/// The sender of the activation at `index`: the frame below, reified on
/// demand, or the base frame's heap continuation.
pub fn sender_of_frame(vm: &mut Vm, index: usize) -> Result<Value, VmError> {
    if index > 0 {
        Ok(Value::Ref(get_or_create_context(vm, index - 1)?))
    } else {
        match vm.frames[index].context {
            Some(id) => Ok(context_ref(vm, id)?.sender.clone()),
            None => Ok(Value::Nil),
        }
    }
}

/// Read a context's program counter, redirecting to the backing frame while
/// the record is live.
pub fn context_pc(vm: &Vm, id: ObjectId) -> Result<Option<usize>, VmError> {
    let record = context_ref(vm, id)?;
    match record.origin {
        ContextOrigin::Live(marker) => match find_frame(vm, marker) {
            Some(index) => Ok(Some(vm.frames[index].pc)),
            None => Ok(record.pc),
        },
        ContextOrigin::Detached => Ok(record.pc),
    }
}

/// Read a context's stack pointer (live records redirect to their frame).
pub fn context_sp(vm: &Vm, id: ObjectId) -> Result<usize, VmError> {
    let record = context_ref(vm, id)?;
    match record.origin {
        ContextOrigin::Live(marker) => match find_frame(vm, marker) {
            Some(index) => Ok(vm.frames[index].stack.len()),
            None => Ok(record.sp),
        },
        ContextOrigin::Detached => Ok(record.sp),
    }
}

/// Read a context slot (live records redirect to their frame).
pub fn context_slot(vm: &Vm, id: ObjectId, slot: usize) -> Result<Value, VmError> {
    let record = context_ref(vm, id)?;
    let read = |slots: &[Value]| {
        slots
            .get(slot)
            .cloned()
            .ok_or(VmError::IndexOutOfBounds { index: slot, size: slots.len() })
    };
    match record.origin {
        ContextOrigin::Live(marker) => match find_frame(vm, marker) {
            Some(index) => read(&vm.frames[index].stack),
            None => read(&record.slots),
        },
        ContextOrigin::Detached => read(&record.slots),
    }
}

/// Write a context slot (live records redirect to their frame).
pub fn set_context_slot(
    vm: &mut Vm,
    id: ObjectId,
    slot: usize,
    value: Value,
) -> Result<(), VmError> {
    let record = context_ref(vm, id)?;
    match record.origin {
        ContextOrigin::Live(marker) => match find_frame(vm, marker) {
            Some(index) => {
                let stack = &mut vm.frames[index].stack;
                if slot >= stack.len() {
                    return Err(VmError::IndexOutOfBounds { index: slot, size: stack.len() });
                }
                stack[slot] = value;
                Ok(())
            }
            None => write_detached_slot(vm, id, slot, value),
        },
        ContextOrigin::Detached => write_detached_slot(vm, id, slot, value),
    }
}

/// The sender of a context. For a live record this walks the native stack
/// outward from the backing frame, reifying the frame below on demand.
pub fn context_sender(vm: &mut Vm, id: ObjectId) -> Result<Value, VmError> {
    let record = context_ref(vm, id)?;
    match record.origin {
        ContextOrigin::Live(marker) => match find_frame(vm, marker) {
            Some(index) => sender_of_frame(vm, index),
            None => Ok(record.sender.clone()),
        },
        ContextOrigin::Detached => Ok(record.sender.clone()),
    }
}

/// Rewrite a context's program counter. Live records redirect to the frame:
/// the frame re-fetches at the new pc.
pub fn set_context_pc(vm: &mut Vm, id: ObjectId, pc: usize) -> Result<(), VmError> {
    let record = context_ref(vm, id)?;
    match record.origin {
        ContextOrigin::Live(marker) => match find_frame(vm, marker) {
            Some(index) => {
                vm.frames[index].pc = pc;
                Ok(())
            }
            None => {
                context_mut(vm, id)?.pc = Some(pc);
                Ok(())
            }
        },
        ContextOrigin::Detached => {
            context_mut(vm, id)?.pc = Some(pc);
            Ok(())
        }
    }
}

/// Rewrite a context's sender. Rejected while the record is live on the
/// stack: the sender of a running frame is defined by the stack below it.
pub fn set_context_sender(vm: &mut Vm, id: ObjectId, sender: Value) -> Result<(), VmError> {
    let record = context_ref(vm, id)?;
    if let ContextOrigin::Live(marker) = record.origin {
        if find_frame(vm, marker).is_some() {
            return Err(VmError::InvalidContextMutation { field: "sender" });
        }
    }
    context_mut(vm, id)?.sender = sender;
    Ok(())
}

/// Terminate a detached context: pc and sender become sentinels. Idempotent.
/// Terminating a context whose frame is still running is rejected; the
/// controlled unwind path is the only way to take down a running activation.
pub fn terminate_context(vm: &mut Vm, id: ObjectId) -> Result<(), VmError> {
    let record = context_ref(vm, id)?;
    if let ContextOrigin::Live(marker) = record.origin {
        if find_frame(vm, marker).is_some() {
            return Err(VmError::InvalidContextMutation { field: "pc" });
        }
    }
    context_mut(vm, id)?.terminate();
    Ok(())
}

/// The home (method) context of a closure: follow outer contexts through
/// any enclosing blocks.
pub fn home_context_of(vm: &Vm, closure_id: ObjectId) -> Result<ObjectId, VmError> {
    let mut current = closure_id;
    loop {
        let closure = vm
            .heap
            .get(current)?
            .as_closure()
            .ok_or(VmError::Invariant("closure expected"))?;
        let outer = closure
            .outer_context
            .as_ref()
            .ok_or(VmError::Invariant("closure without outer context"))?;
        let record = context_ref(vm, outer)?;
        match record.closure {
            Some(enclosing) => current = enclosing,
            None => return Ok(outer),
        }
    }
}

fn write_detached_slot(
    vm: &mut Vm,
    id: ObjectId,
    slot: usize,
    value: Value,
) -> Result<(), VmError> {
    let record = context_mut(vm, id)?;
    if slot >= record.slots.len() {
        return Err(VmError::IndexOutOfBounds { index: slot, size: record.slots.len() });
    }
    record.slots[slot] = value;
    Ok(())
}

pub(crate) fn context_ref(vm: &Vm, id: ObjectId) -> Result<&ContextRecord, VmError> {
    vm.heap
        .get(id)?
        .as_context()
        .ok_or(VmError::Invariant("context expected"))
}

pub(crate) fn context_mut(vm: &mut Vm, id: ObjectId) -> Result<&mut ContextRecord, VmError> {
    vm.heap
        .get_mut(id)?
        .as_context_mut()
        .ok_or(VmError::Invariant("context expected"))
}

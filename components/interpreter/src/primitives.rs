//! The primitive table.
//!
//! Primitives are native fast paths consulted before a method's bytecode
//! runs. A primitive either produces its result directly, hands the engine a
//! fresh activation (block evaluation), reports that it already delivered
//! its result (process primitives, which may switch stacks underneath the
//! send), or fails with a reason code — in which case the engine falls back
//! to the method's bytecode per the fallback-code convention.
//!
//! The table here covers the operations the core itself needs: small-integer
//! and float arithmetic with large-integer overflow, indexed access,
//! identity, block evaluation and the scheduler entry points. Hosts may
//! substitute their own [`PrimitiveTable`].

use core_types::{ObjectId, Value, VmError};
use num_bigint::BigInt;
use num_traits::Zero;

use crate::frame::Frame;
use crate::scheduler;
use crate::vm::Vm;

/// Result of offering a send to the primitive table.
pub enum PrimitiveOutcome {
    /// Produced a result; the engine pushes it for the caller
    Ok(Value),
    /// Result already delivered to the caller frame (used by primitives
    /// that may park and switch stacks)
    Done,
    /// The send becomes this activation instead (block evaluation)
    Activate(Frame),
    /// Failed with a reason code; fall back to the method's bytecode
    Fail(u16),
}

/// A primitive implementation.
pub type PrimitiveFn =
    fn(&mut Vm, Value, &[Value]) -> Result<PrimitiveOutcome, VmError>;

/// External primitive table, consulted by primitive index.
pub trait PrimitiveTable {
    /// The callable for `index`, if the table implements it.
    fn lookup(&self, index: u16) -> Option<PrimitiveFn>;
}

/// Primitive failure reason codes, indexing the primitive error table.
pub mod codes {
    /// Unspecific failure
    pub const GENERIC_ERROR: u16 = 0;
    /// Receiver of the wrong kind
    pub const BAD_RECEIVER: u16 = 1;
    /// Argument of the wrong kind
    pub const BAD_ARGUMENT: u16 = 2;
    /// Index out of bounds
    pub const BAD_INDEX: u16 = 3;
    /// Wrong number of arguments
    pub const BAD_NUMBER_OF_ARGUMENTS: u16 = 4;
}

/// Primitive indexes implemented by [`BasicPrimitives`].
pub mod indexes {
    /// Integer addition
    pub const ADD: u16 = 1;
    /// Integer subtraction
    pub const SUBTRACT: u16 = 2;
    /// Integer less-than
    pub const LESS_THAN: u16 = 3;
    /// Integer greater-than
    pub const GREATER_THAN: u16 = 4;
    /// Integer less-or-equal
    pub const LESS_OR_EQUAL: u16 = 5;
    /// Integer greater-or-equal
    pub const GREATER_OR_EQUAL: u16 = 6;
    /// Integer equality
    pub const EQUAL: u16 = 7;
    /// Integer inequality
    pub const NOT_EQUAL: u16 = 8;
    /// Integer multiplication
    pub const MULTIPLY: u16 = 9;
    /// Integer division, failing unless it is exact
    pub const DIVIDE: u16 = 10;
    /// Integer modulo (floored)
    pub const MOD: u16 = 11;
    /// Float addition
    pub const FLOAT_ADD: u16 = 41;
    /// Float subtraction
    pub const FLOAT_SUBTRACT: u16 = 42;
    /// Float less-than
    pub const FLOAT_LESS_THAN: u16 = 43;
    /// Float multiplication
    pub const FLOAT_MULTIPLY: u16 = 49;
    /// Float division
    pub const FLOAT_DIVIDE: u16 = 50;
    /// Indexed read (1-based)
    pub const AT: u16 = 60;
    /// Indexed write (1-based)
    pub const AT_PUT: u16 = 61;
    /// Element count
    pub const SIZE: u16 = 62;
    /// Identity hash
    pub const IDENTITY_HASH: u16 = 75;
    /// Semaphore signal
    pub const SIGNAL: u16 = 85;
    /// Semaphore wait
    pub const WAIT: u16 = 86;
    /// Process resume
    pub const RESUME: u16 = 87;
    /// Process suspend
    pub const SUSPEND: u16 = 88;
    /// Identity comparison
    pub const IDENTICAL: u16 = 110;
    /// Processor yield
    pub const YIELD: u16 = 167;
    /// Block evaluation, no arguments
    pub const BLOCK_VALUE_0: u16 = 201;
    /// Block evaluation, one argument
    pub const BLOCK_VALUE_1: u16 = 202;
    /// Block evaluation, two arguments
    pub const BLOCK_VALUE_2: u16 = 203;
    /// Block evaluation, three arguments
    pub const BLOCK_VALUE_3: u16 = 204;
    /// Block evaluation, four arguments
    pub const BLOCK_VALUE_4: u16 = 205;
}

/// The built-in primitive table.
#[derive(Debug, Default)]
pub struct BasicPrimitives;

impl PrimitiveTable for BasicPrimitives {
    fn lookup(&self, index: u16) -> Option<PrimitiveFn> {
        use indexes::*;
        Some(match index {
            ADD => prim_add,
            SUBTRACT => prim_subtract,
            LESS_THAN => prim_less_than,
            GREATER_THAN => prim_greater_than,
            LESS_OR_EQUAL => prim_less_or_equal,
            GREATER_OR_EQUAL => prim_greater_or_equal,
            EQUAL => prim_equal,
            NOT_EQUAL => prim_not_equal,
            MULTIPLY => prim_multiply,
            DIVIDE => prim_divide,
            MOD => prim_mod,
            FLOAT_ADD => prim_float_add,
            FLOAT_SUBTRACT => prim_float_subtract,
            FLOAT_LESS_THAN => prim_float_less_than,
            FLOAT_MULTIPLY => prim_float_multiply,
            FLOAT_DIVIDE => prim_float_divide,
            AT => prim_at,
            AT_PUT => prim_at_put,
            SIZE => prim_size,
            IDENTITY_HASH => prim_identity_hash,
            SIGNAL => prim_signal,
            WAIT => prim_wait,
            RESUME => prim_resume,
            SUSPEND => prim_suspend,
            IDENTICAL => prim_identical,
            YIELD => prim_yield,
            BLOCK_VALUE_0 | BLOCK_VALUE_1 | BLOCK_VALUE_2 | BLOCK_VALUE_3 | BLOCK_VALUE_4 => {
                prim_block_value
            }
            _ => return None,
        })
    }
}

fn as_bigint(value: &Value) -> Option<BigInt> {
    match value {
        Value::SmallInt(n) => Some(BigInt::from(*n)),
        Value::LargeInt(n) => Some(n.clone()),
        _ => None,
    }
}

fn integer_binop(
    receiver: Value,
    args: &[Value],
    small: fn(i64, i64) -> Option<i64>,
    large: fn(BigInt, BigInt) -> BigInt,
) -> Result<PrimitiveOutcome, VmError> {
    if let (Value::SmallInt(a), Some(Value::SmallInt(b))) = (&receiver, args.first()) {
        if let Some(result) = small(*a, *b) {
            return Ok(PrimitiveOutcome::Ok(Value::SmallInt(result)));
        }
    }
    let Some(a) = as_bigint(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(b) = args.first().and_then(as_bigint) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    };
    Ok(PrimitiveOutcome::Ok(Value::integer(large(a, b))))
}

fn integer_compare(
    receiver: Value,
    args: &[Value],
    compare: fn(&BigInt, &BigInt) -> bool,
) -> Result<PrimitiveOutcome, VmError> {
    let Some(a) = as_bigint(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(b) = args.first().and_then(as_bigint) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    };
    Ok(PrimitiveOutcome::Ok(Value::Boolean(compare(&a, &b))))
}

fn prim_add(_vm: &mut Vm, receiver: Value, args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    integer_binop(receiver, args, i64::checked_add, |a, b| a + b)
}

fn prim_subtract(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_binop(receiver, args, i64::checked_sub, |a, b| a - b)
}

fn prim_multiply(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_binop(receiver, args, i64::checked_mul, |a, b| a * b)
}

fn prim_divide(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    let Some(a) = as_bigint(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(b) = args.first().and_then(as_bigint) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    };
    // Exact division only; inexact quotients fall back to the method's
    // fraction-building bytecode.
    if b.is_zero() || !(&a % &b).is_zero() {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    }
    Ok(PrimitiveOutcome::Ok(Value::integer(a / b)))
}

fn prim_mod(_vm: &mut Vm, receiver: Value, args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(a) = as_bigint(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(b) = args.first().and_then(as_bigint) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    };
    if b.is_zero() {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    }
    // Floored modulo: the result takes the sign of the divisor.
    let mut remainder = &a % &b;
    if !remainder.is_zero() && (remainder.sign() != b.sign()) {
        remainder += &b;
    }
    Ok(PrimitiveOutcome::Ok(Value::integer(remainder)))
}

fn prim_less_than(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_compare(receiver, args, |a, b| a < b)
}

fn prim_greater_than(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_compare(receiver, args, |a, b| a > b)
}

fn prim_less_or_equal(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_compare(receiver, args, |a, b| a <= b)
}

fn prim_greater_or_equal(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_compare(receiver, args, |a, b| a >= b)
}

fn prim_equal(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_compare(receiver, args, |a, b| a == b)
}

fn prim_not_equal(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    integer_compare(receiver, args, |a, b| a != b)
}

fn float_operands(receiver: &Value, args: &[Value]) -> Option<(f64, f64)> {
    let a = match receiver {
        Value::Float(n) => *n,
        Value::SmallInt(n) => *n as f64,
        _ => return None,
    };
    let b = match args.first()? {
        Value::Float(n) => *n,
        Value::SmallInt(n) => *n as f64,
        _ => return None,
    };
    Some((a, b))
}

fn prim_float_add(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    match float_operands(&receiver, args) {
        Some((a, b)) => Ok(PrimitiveOutcome::Ok(Value::Float(a + b))),
        None => Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT)),
    }
}

fn prim_float_subtract(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    match float_operands(&receiver, args) {
        Some((a, b)) => Ok(PrimitiveOutcome::Ok(Value::Float(a - b))),
        None => Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT)),
    }
}

fn prim_float_less_than(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    match float_operands(&receiver, args) {
        Some((a, b)) => Ok(PrimitiveOutcome::Ok(Value::Boolean(a < b))),
        None => Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT)),
    }
}

fn prim_float_multiply(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    match float_operands(&receiver, args) {
        Some((a, b)) => Ok(PrimitiveOutcome::Ok(Value::Float(a * b))),
        None => Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT)),
    }
}

fn prim_float_divide(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    match float_operands(&receiver, args) {
        Some((_, b)) if b == 0.0 => Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT)),
        Some((a, b)) => Ok(PrimitiveOutcome::Ok(Value::Float(a / b))),
        None => Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT)),
    }
}

fn indexable_receiver(receiver: &Value) -> Option<ObjectId> {
    receiver.as_ref()
}

fn prim_at(vm: &mut Vm, receiver: Value, args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = indexable_receiver(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(Value::SmallInt(index)) = args.first() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    };
    if *index < 1 {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_INDEX));
    }
    match vm.heap.array_at(id, (*index - 1) as usize) {
        Ok(value) => Ok(PrimitiveOutcome::Ok(value)),
        Err(VmError::IndexOutOfBounds { .. }) => Ok(PrimitiveOutcome::Fail(codes::BAD_INDEX)),
        Err(VmError::Invariant(_)) => Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER)),
        Err(other) => Err(other),
    }
}

fn prim_at_put(vm: &mut Vm, receiver: Value, args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = indexable_receiver(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let (Some(Value::SmallInt(index)), Some(value)) = (args.first(), args.get(1)) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_ARGUMENT));
    };
    if *index < 1 {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_INDEX));
    }
    match vm.heap.array_at_put(id, (*index - 1) as usize, value.clone()) {
        Ok(()) => Ok(PrimitiveOutcome::Ok(value.clone())),
        Err(VmError::IndexOutOfBounds { .. }) => Ok(PrimitiveOutcome::Fail(codes::BAD_INDEX)),
        Err(VmError::Invariant(_)) => Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER)),
        Err(other) => Err(other),
    }
}

fn prim_size(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = indexable_receiver(&receiver) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    match vm.heap.array_len(id) {
        Ok(len) => Ok(PrimitiveOutcome::Ok(Value::SmallInt(len as i64))),
        Err(VmError::Invariant(_)) => Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER)),
        Err(other) => Err(other),
    }
}

fn prim_identity_hash(
    vm: &mut Vm,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    let hash = match receiver {
        Value::Ref(id) => vm.heap.identity_hash(id)?,
        immediate => immediate
            .immediate_hash()
            .ok_or(VmError::Invariant("immediate without derived hash"))?,
    };
    Ok(PrimitiveOutcome::Ok(Value::SmallInt(hash as i64)))
}

fn prim_identical(
    _vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    match args.first() {
        Some(arg) => Ok(PrimitiveOutcome::Ok(Value::Boolean(receiver == *arg))),
        None => Ok(PrimitiveOutcome::Fail(codes::BAD_NUMBER_OF_ARGUMENTS)),
    }
}

fn prim_block_value(
    vm: &mut Vm,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    let Some(closure_id) = receiver.as_ref() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(closure) = vm.heap.get(closure_id)?.as_closure().cloned() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    let Some(block) = closure.method.block(closure.block_index) else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    if args.len() != block.num_args as usize {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_NUMBER_OF_ARGUMENTS));
    }
    let frame = Frame::for_block(
        vm.markers.mint(),
        closure_id,
        &closure,
        block,
        args.to_vec(),
    );
    Ok(PrimitiveOutcome::Activate(frame))
}

/// Deliver `result` to the caller before an operation that may park this
/// stack, so a later resume continues past the send with the result in
/// place.
fn push_result_then(
    vm: &mut Vm,
    result: Value,
    op: impl FnOnce(&mut Vm) -> Result<bool, VmError>,
) -> Result<PrimitiveOutcome, VmError> {
    let frame = vm
        .frames
        .last_mut()
        .ok_or(VmError::Invariant("process primitive without a frame"))?;
    frame.push(result);
    op(vm)?;
    Ok(PrimitiveOutcome::Done)
}

fn prim_signal(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = receiver.as_ref() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    if vm.heap.get(id)?.as_semaphore().is_none() {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    }
    push_result_then(vm, receiver.clone(), |vm| scheduler::signal_semaphore(vm, id))
}

fn prim_wait(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = receiver.as_ref() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    if vm.heap.get(id)?.as_semaphore().is_none() {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    }
    push_result_then(vm, receiver.clone(), |vm| scheduler::wait_on_semaphore(vm, id))
}

fn prim_resume(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = receiver.as_ref() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    if vm.heap.get(id)?.as_process().is_none() {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    }
    push_result_then(vm, receiver.clone(), |vm| scheduler::resume_process(vm, id))
}

fn prim_suspend(
    vm: &mut Vm,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveOutcome, VmError> {
    let Some(id) = receiver.as_ref() else {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    };
    if vm.heap.get(id)?.as_process().is_none() {
        return Ok(PrimitiveOutcome::Fail(codes::BAD_RECEIVER));
    }
    push_result_then(vm, receiver.clone(), |vm| scheduler::suspend_process(vm, id))
}

fn prim_yield(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<PrimitiveOutcome, VmError> {
    push_result_then(vm, receiver, scheduler::yield_process)
}

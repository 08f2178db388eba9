//! Native frames.
//!
//! A frame is the engine-owned, stack-resident form of one activation: the
//! "virtual" state of the stack/heap duality. Frames live in the VM's frame
//! stack; the frame at the highest index is the running activation. Each
//! frame is tagged with a fresh [`FrameMarker`] so heap context records can
//! be matched back to the frame that backs them.

use core_types::{ObjectId, Value};
use std::rc::Rc;

use bytecode_system::{CompiledBlock, CompiledMethod};
use object_model::{BlockClosure, FrameMarker};

/// One native activation frame.
#[derive(Debug)]
pub struct Frame {
    /// Identity token, minted once and never reused
    pub marker: FrameMarker,
    /// The executing method (a block's home method for block frames)
    pub method: Rc<CompiledMethod>,
    /// The closure being executed, for block frames
    pub closure: Option<ObjectId>,
    /// The receiver
    pub receiver: Value,
    /// Next instruction index
    pub pc: usize,
    /// Arguments, copied values, temporaries and the operand stack; the
    /// stack pointer is implicit in the length
    pub stack: Vec<Value>,
    /// The reified context record, once this activation has escaped
    pub context: Option<ObjectId>,
}

impl Frame {
    /// Frame for an ordinary method activation: arguments first, declared
    /// temporaries nil-initialized above them.
    pub fn for_method(
        marker: FrameMarker,
        method: Rc<CompiledMethod>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Frame {
        debug_assert_eq!(args.len(), method.num_args());
        let mut stack = Vec::with_capacity(method.frame_capacity());
        stack.extend(args);
        stack.resize(method.num_args() + method.num_temps(), Value::Nil);
        Frame {
            marker,
            method,
            closure: None,
            receiver,
            pc: 0,
            stack,
            context: None,
        }
    }

    /// Frame for a block activation: arguments, then the closure's copied
    /// values; execution starts at the block's body offset.
    pub fn for_block(
        marker: FrameMarker,
        closure_id: ObjectId,
        closure: &BlockClosure,
        block: CompiledBlock,
        args: Vec<Value>,
    ) -> Frame {
        debug_assert_eq!(args.len(), block.num_args as usize);
        let method = closure.method.clone();
        let mut stack = Vec::with_capacity(method.frame_capacity());
        stack.extend(args);
        stack.extend(closure.copied.iter().cloned());
        Frame {
            marker,
            method,
            closure: Some(closure_id),
            receiver: closure.receiver.clone(),
            pc: block.offset as usize,
            stack,
            context: None,
        }
    }

    /// Push onto the operand stack.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the operand stack.
    ///
    /// An underflow is an engine bug (the compiler guarantees balanced
    /// stacks), reported by panic rather than unwound into guest semantics.
    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    /// Pop `n` values, preserving their push order.
    pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len() - n;
        self.stack.split_off(at)
    }

    /// The top of the operand stack.
    pub fn top(&self) -> &Value {
        self.stack.last().expect("operand stack underflow")
    }
}

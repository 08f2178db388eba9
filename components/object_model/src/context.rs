//! Activation records and closures.
//!
//! A context is the heap-resident form of one method or block invocation.
//! While its native frame is still running the record is *live*: reads and
//! writes of pc, stack pointer and slots redirect to the frame (the
//! interpreter enforces this; the record only stores the association).
//! Once the frame returns or the stack is unwound the record is *detached*
//! and carries the activation state itself.

use core_types::{ObjectId, Value};
use std::rc::Rc;

use bytecode_system::CompiledMethod;

/// Unforgeable token identifying one native-frame invocation.
///
/// Minted once per invocation by [`MarkerMint`] and never reused, so a
/// context record can be matched against the frame that backs it even after
/// arbitrary stack motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameMarker(u64);

/// Mints [`FrameMarker`]s. Owned by the VM; markers from different mints are
/// never mixed within one VM.
#[derive(Debug, Default)]
pub struct MarkerMint {
    next: u64,
}

impl MarkerMint {
    /// A mint starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh, never-before-issued marker.
    pub fn mint(&mut self) -> FrameMarker {
        let marker = FrameMarker(self.next);
        self.next += 1;
        marker
    }
}

/// Whether a context record is backed by a running native frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOrigin {
    /// Still backed by the frame with this marker; the frame holds the
    /// authoritative pc/sp/slot state
    Live(FrameMarker),
    /// Fully independent heap record
    Detached,
}

/// Heap-resident activation record.
#[derive(Debug)]
pub struct ContextRecord {
    /// Liveness state; see [`ContextOrigin`]
    pub origin: ContextOrigin,
    /// The calling activation (`Ref`) or nil for top-level / terminated
    pub sender: Value,
    /// Program counter; `None` marks a terminated context
    pub pc: Option<usize>,
    /// Operand stack pointer (index past the last occupied slot)
    pub sp: usize,
    /// The executing method
    pub method: Rc<CompiledMethod>,
    /// The closure being run, for block activations
    pub closure: Option<ObjectId>,
    /// The message receiver
    pub receiver: Value,
    /// Arguments, copied values, temporaries and operand stack
    pub slots: Vec<Value>,
}

impl ContextRecord {
    /// Whether this is a block activation.
    pub fn is_block(&self) -> bool {
        self.closure.is_some()
    }

    /// Whether this context has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.pc.is_none()
    }

    /// Terminate: pc and sender become their sentinel values. Idempotent.
    pub fn terminate(&mut self) {
        self.pc = None;
        self.sender = Value::Nil;
        self.origin = ContextOrigin::Detached;
    }

    /// Call `f` for every heap reference this record holds.
    pub fn each_reference(&self, f: &mut dyn FnMut(ObjectId)) {
        if let Value::Ref(id) = self.sender {
            f(id);
        }
        if let Value::Ref(id) = self.receiver {
            f(id);
        }
        if let Some(id) = self.closure {
            f(id);
        }
        for value in &self.slots {
            if let Value::Ref(id) = value {
                f(*id);
            }
        }
    }
}

/// A block closure: code window plus captured environment.
#[derive(Debug, Clone)]
pub struct BlockClosure {
    /// Method whose instruction vector contains the block body (and whose
    /// literal pool the block shares)
    pub method: Rc<CompiledMethod>,
    /// Index of the block descriptor within the method
    pub block_index: usize,
    /// The activation that created the closure (`Ref` to a context record)
    pub outer_context: Value,
    /// Receiver in force where the closure was created
    pub receiver: Value,
    /// Outer temporaries captured by value at creation
    pub copied: Vec<Value>,
}

impl BlockClosure {
    /// Arguments the block expects.
    pub fn num_args(&self) -> usize {
        self.method
            .block(self.block_index)
            .map(|b| b.num_args as usize)
            .unwrap_or(0)
    }

    /// Call `f` for every heap reference this closure holds.
    pub fn each_reference(&self, f: &mut dyn FnMut(ObjectId)) {
        if let Value::Ref(id) = self.outer_context {
            f(id);
        }
        if let Value::Ref(id) = self.receiver {
            f(id);
        }
        for value in &self.copied {
            if let Value::Ref(id) = value {
                f(*id);
            }
        }
    }
}

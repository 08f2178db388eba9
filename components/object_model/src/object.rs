//! Heap object headers and bodies.

use core_types::{ClassId, ObjectId, Selector, Value};
use std::cell::Cell;
use std::collections::VecDeque;

use crate::context::{BlockClosure, ContextRecord};
use crate::record::SlotRecord;
use crate::storage::ArrayStorage;

/// Scheduler bookkeeping for one logical process.
#[derive(Debug)]
pub struct ProcessRecord {
    /// Scheduling priority, higher runs first
    pub priority: usize,
    /// The context to resume when this process is next scheduled (`Ref`),
    /// or nil while the process is the active one
    pub suspended_context: Value,
    /// Semaphore this process is parked on, if blocked
    pub blocked_on: Option<ObjectId>,
}

/// A counting semaphore: either excess signals or waiting processes, never
/// both.
#[derive(Debug, Default)]
pub struct SemaphoreRecord {
    /// Signals delivered with nobody waiting
    pub excess_signals: i64,
    /// FIFO of blocked processes
    pub waiting: VecDeque<ObjectId>,
}

/// Body of a heap object: the closed set of concrete object kinds.
#[derive(Debug)]
pub enum Body {
    /// Variable-length array with adaptive storage
    Array(ArrayStorage),
    /// Fixed-slot record following a shared layout
    Slots(SlotRecord),
    /// Activation record
    Context(ContextRecord),
    /// Block closure
    Closure(BlockClosure),
    /// Interned selector as a first-class object
    Symbol(Selector),
    /// Logical process
    Process(ProcessRecord),
    /// Counting semaphore
    Semaphore(SemaphoreRecord),
}

/// Header and body of every referenced object.
///
/// The identity hash is fixed at creation and stable for the object's
/// lifetime; the class is mutable only through the heap's explicit
/// class-change operation; the mark bit belongs to the external tracer.
#[derive(Debug)]
pub struct HeapObject {
    class: ClassId,
    identity_hash: u32,
    mark: Cell<bool>,
    /// The object's concrete state
    pub body: Body,
}

impl HeapObject {
    /// Assemble an object. Allocation goes through the heap, which mints
    /// identity hashes.
    pub(crate) fn new(class: ClassId, identity_hash: u32, body: Body) -> Self {
        Self {
            class,
            identity_hash,
            mark: Cell::new(false),
            body,
        }
    }

    /// The object's class.
    pub fn class(&self) -> ClassId {
        self.class
    }

    pub(crate) fn set_class(&mut self, class: ClassId) {
        self.class = class;
    }

    /// The identity hash minted at creation.
    pub fn identity_hash(&self) -> u32 {
        self.identity_hash
    }

    /// Tracer mark bit.
    pub fn is_marked(&self) -> bool {
        self.mark.get()
    }

    /// Set or clear the tracer mark bit.
    pub fn set_marked(&self, marked: bool) {
        self.mark.set(marked);
    }

    /// The array storage, when this is an array.
    pub fn as_array(&self) -> Option<&ArrayStorage> {
        match &self.body {
            Body::Array(storage) => Some(storage),
            _ => None,
        }
    }

    /// Mutable array storage, when this is an array.
    pub fn as_array_mut(&mut self) -> Option<&mut ArrayStorage> {
        match &mut self.body {
            Body::Array(storage) => Some(storage),
            _ => None,
        }
    }

    /// The slot record, when this is a fixed-slot object.
    pub fn as_slots(&self) -> Option<&SlotRecord> {
        match &self.body {
            Body::Slots(record) => Some(record),
            _ => None,
        }
    }

    /// Mutable slot record, when this is a fixed-slot object.
    pub fn as_slots_mut(&mut self) -> Option<&mut SlotRecord> {
        match &mut self.body {
            Body::Slots(record) => Some(record),
            _ => None,
        }
    }

    /// The context record, when this is an activation.
    pub fn as_context(&self) -> Option<&ContextRecord> {
        match &self.body {
            Body::Context(context) => Some(context),
            _ => None,
        }
    }

    /// Mutable context record, when this is an activation.
    pub fn as_context_mut(&mut self) -> Option<&mut ContextRecord> {
        match &mut self.body {
            Body::Context(context) => Some(context),
            _ => None,
        }
    }

    /// The closure, when this is a block closure.
    pub fn as_closure(&self) -> Option<&BlockClosure> {
        match &self.body {
            Body::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    /// The interned selector, when this is a symbol.
    pub fn as_symbol(&self) -> Option<Selector> {
        match &self.body {
            Body::Symbol(selector) => Some(*selector),
            _ => None,
        }
    }

    /// The process record, when this is a process.
    pub fn as_process(&self) -> Option<&ProcessRecord> {
        match &self.body {
            Body::Process(process) => Some(process),
            _ => None,
        }
    }

    /// Mutable process record, when this is a process.
    pub fn as_process_mut(&mut self) -> Option<&mut ProcessRecord> {
        match &mut self.body {
            Body::Process(process) => Some(process),
            _ => None,
        }
    }

    /// The semaphore record, when this is a semaphore.
    pub fn as_semaphore(&self) -> Option<&SemaphoreRecord> {
        match &self.body {
            Body::Semaphore(semaphore) => Some(semaphore),
            _ => None,
        }
    }

    /// Mutable semaphore record, when this is a semaphore.
    pub fn as_semaphore_mut(&mut self) -> Option<&mut SemaphoreRecord> {
        match &mut self.body {
            Body::Semaphore(semaphore) => Some(semaphore),
            _ => None,
        }
    }
}

//! Reference enumeration for the external tracer.
//!
//! The core does not collect; it only tells the collector where references
//! live. [`each_reference`] enumerates every slot of one object that can
//! hold a heap reference; frame and scheduler roots are enumerated by the
//! interpreter on top of this.

use core_types::{ObjectId, Value};

use bytecode_system::{CompiledMethod, Literal};

use crate::object::{Body, HeapObject};

/// Call `f` for every heap reference held by `object`, including references
/// reachable through the literal pool of a context's or closure's method.
pub fn each_reference(object: &HeapObject, f: &mut dyn FnMut(ObjectId)) {
    match &object.body {
        Body::Array(storage) => storage.each_reference(f),
        Body::Slots(record) => record.each_reference(f),
        Body::Context(context) => {
            context.each_reference(f);
            method_references(&context.method, f);
        }
        Body::Closure(closure) => {
            closure.each_reference(f);
            method_references(&closure.method, f);
        }
        Body::Symbol(_) => {}
        Body::Process(process) => {
            if let Value::Ref(id) = process.suspended_context {
                f(id);
            }
            if let Some(id) = process.blocked_on {
                f(id);
            }
        }
        Body::Semaphore(semaphore) => {
            for id in &semaphore.waiting {
                f(*id);
            }
        }
    }
}

/// Call `f` for every heap reference in a method's literal pool. Methods are
/// host objects; their literals still pin heap objects.
pub fn method_references(method: &CompiledMethod, f: &mut dyn FnMut(ObjectId)) {
    for literal in method.literals() {
        if let Literal::Value(Value::Ref(id)) = literal {
            f(*id);
        }
    }
}

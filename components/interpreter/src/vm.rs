//! The VM context.
//!
//! One [`Vm`] owns everything shared: the heap, the class table, interned
//! selectors, the scheduler, the dispatch caches, the interrupt state and
//! the native frame stack. It is passed by reference to every operation that
//! needs it; there are no process-wide statics.

use core_types::{ClassId, ObjectId, Selector, SelectorTable, Value, VmError};
use std::collections::HashMap;
use std::rc::Rc;

use bytecode_system::CompiledMethod;
use object_model::{
    each_reference, method_references, Body, ClassFormat, ClassTable, ContextOrigin,
    ContextRecord, Heap, MarkerMint,
};

use crate::dispatch::MethodCache;
use crate::engine;
use crate::frame::Frame;
use crate::inline_cache::{SendSites, SlotSites};
use crate::interrupt::{InterruptHandle, InterruptState};
use crate::primitives::{BasicPrimitives, PrimitiveTable};
use crate::scheduler::{self, Scheduler};

/// Tunables fixed at VM construction.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    /// Number of scheduler priority levels
    pub priority_levels: usize,
    /// Priority of the implicit initial process
    pub initial_priority: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            priority_levels: 80,
            initial_priority: 40,
        }
    }
}

/// Handles of the kernel classes the engine itself depends on.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct SpecialClasses {
    pub object: ClassId,
    pub undefined_object: ClassId,
    pub boolean: ClassId,
    pub true_class: ClassId,
    pub false_class: ClassId,
    pub small_integer: ClassId,
    pub large_integer: ClassId,
    pub float: ClassId,
    pub character: ClassId,
    pub symbol: ClassId,
    pub array: ClassId,
    pub message: ClassId,
    pub block_closure: ClassId,
    pub context: ClassId,
    pub process: ClassId,
    pub semaphore: ClassId,
}

impl SpecialClasses {
    fn bootstrap(classes: &mut ClassTable) -> Self {
        let fixed = |n| ClassFormat::Fixed { inst_size: n };
        let object = classes.add("Object", None, fixed(0));
        let undefined_object = classes.add("UndefinedObject", Some(object), fixed(0));
        let boolean = classes.add("Boolean", Some(object), fixed(0));
        let true_class = classes.add("True", Some(boolean), fixed(0));
        let false_class = classes.add("False", Some(boolean), fixed(0));
        let small_integer = classes.add("SmallInteger", Some(object), fixed(0));
        let large_integer = classes.add("LargeInteger", Some(object), fixed(0));
        let float = classes.add("Float", Some(object), fixed(0));
        let character = classes.add("Character", Some(object), fixed(0));
        let symbol = classes.add("Symbol", Some(object), fixed(0));
        let array = classes.add("Array", Some(object), ClassFormat::VariableObjects);
        let message = classes.add("Message", Some(object), fixed(2));
        let block_closure = classes.add("BlockClosure", Some(object), fixed(0));
        let context = classes.add("Context", Some(object), fixed(0));
        let process = classes.add("Process", Some(object), fixed(0));
        let semaphore = classes.add("Semaphore", Some(object), fixed(0));
        Self {
            object,
            undefined_object,
            boolean,
            true_class,
            false_class,
            small_integer,
            large_integer,
            float,
            character,
            symbol,
            array,
            message,
            block_closure,
            context,
            process,
            semaphore,
        }
    }
}

/// Selectors the engine sends on its own behalf.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownSelectors {
    /// `doesNotUnderstand:`
    pub does_not_understand: Selector,
    /// `mustBeBoolean`
    pub must_be_boolean: Selector,
}

/// The VM/image context: sole owner of all shared mutable state.
pub struct Vm {
    /// The object heap
    pub heap: Heap,
    /// The class table
    pub classes: ClassTable,
    /// Interned selectors
    pub selectors: SelectorTable,
    /// Kernel class handles
    pub special: SpecialClasses,
    /// Engine-reserved selectors
    pub well_known: WellKnownSelectors,
    /// Scheduler state
    pub scheduler: Scheduler,
    /// Interrupt state
    pub interrupt: InterruptState,
    pub(crate) frames: Vec<Frame>,
    pub(crate) markers: MarkerMint,
    pub(crate) method_cache: MethodCache,
    pub(crate) send_sites: SendSites,
    pub(crate) slot_sites: SlotSites,
    pub(crate) primitives: Box<dyn PrimitiveTable>,
    pub(crate) prim_error_table: Vec<Value>,
    symbols: HashMap<Selector, ObjectId>,
}

impl Vm {
    /// A VM with default options and the built-in primitive table.
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// A VM with explicit options.
    pub fn with_options(options: VmOptions) -> Self {
        assert!(
            options.initial_priority < options.priority_levels,
            "initial priority must fit the priority levels"
        );
        let mut classes = ClassTable::new();
        let special = SpecialClasses::bootstrap(&mut classes);
        let mut selectors = SelectorTable::new();
        let well_known = WellKnownSelectors {
            does_not_understand: selectors.intern("doesNotUnderstand:"),
            must_be_boolean: selectors.intern("mustBeBoolean"),
        };
        let mut heap = Heap::new();
        let initial = heap.new_process(special.process, options.initial_priority);
        Self {
            heap,
            classes,
            selectors,
            special,
            well_known,
            scheduler: Scheduler::new(options.priority_levels, initial),
            interrupt: InterruptState::new(),
            frames: Vec::with_capacity(64),
            markers: MarkerMint::new(),
            method_cache: MethodCache::new(),
            send_sites: SendSites::new(),
            slot_sites: SlotSites::new(),
            primitives: Box::new(BasicPrimitives),
            prim_error_table: Vec::new(),
            symbols: HashMap::new(),
        }
    }

    /// Replace the primitive table.
    pub fn set_primitive_table(&mut self, table: Box<dyn PrimitiveTable>) {
        self.primitives = table;
    }

    /// Install the primitive error table (reason code → symbolic value).
    pub fn set_primitive_error_table(&mut self, table: Vec<Value>) {
        self.prim_error_table = table;
    }

    /// Intern a selector spelling.
    pub fn intern(&mut self, name: &str) -> Selector {
        self.selectors.intern(name)
    }

    /// The interned symbol object for `selector`, allocating on first use.
    pub fn symbol_for(&mut self, selector: Selector) -> ObjectId {
        if let Some(id) = self.symbols.get(&selector) {
            return *id;
        }
        let id = self.heap.new_symbol(self.special.symbol, selector);
        self.symbols.insert(selector, id);
        id
    }

    /// The class of any value.
    pub fn class_of(&self, value: &Value) -> Result<ClassId, VmError> {
        Ok(match value {
            Value::Nil => self.special.undefined_object,
            Value::Boolean(true) => self.special.true_class,
            Value::Boolean(false) => self.special.false_class,
            Value::SmallInt(_) => self.special.small_integer,
            Value::LargeInt(_) => self.special.large_integer,
            Value::Float(_) => self.special.float,
            Value::Character(_) => self.special.character,
            Value::Ref(id) => self.heap.get(*id)?.class(),
        })
    }

    /// Intern `name` and install `method` on `class`.
    pub fn install_method(
        &mut self,
        class: ClassId,
        name: &str,
        method: Rc<CompiledMethod>,
    ) -> Selector {
        let selector = self.selectors.intern(name);
        self.classes.install_method(class, selector, method);
        selector
    }

    /// Activate `method` with `receiver` and `args` and run until the
    /// activation chain produces a top-level value.
    ///
    /// This is the single upward entry point. The activation starts virtual;
    /// primitives, sends, non-local returns and process switches all happen
    /// beneath this call.
    pub fn activate(
        &mut self,
        method: Rc<CompiledMethod>,
        receiver: Value,
        args: &[Value],
    ) -> Result<Value, VmError> {
        if args.len() != method.num_args() {
            return Err(VmError::WrongArgumentCount {
                expected: method.num_args(),
                actual: args.len(),
            });
        }
        if !self.frames.is_empty() {
            return Err(VmError::Invariant("activation while the engine is running"));
        }
        let frame = Frame::for_method(self.markers.mint(), method, receiver, args.to_vec());
        self.frames.push(frame);
        let result = engine::run(self);
        if result.is_err() {
            // Leave the VM reusable after a guest or engine error.
            self.frames.clear();
        }
        result
    }

    /// Current depth of the native frame stack.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// A cloneable, thread-safe interrupt requester.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.handle()
    }

    /// Create a process that will run `closure` (a zero-argument block)
    /// at `priority` when resumed.
    pub fn new_process_on_block(
        &mut self,
        closure_id: ObjectId,
        priority: usize,
    ) -> Result<ObjectId, VmError> {
        if priority >= self.scheduler.levels() {
            return Err(VmError::Invariant("process priority out of range"));
        }
        let closure = self
            .heap
            .get(closure_id)?
            .as_closure()
            .cloned()
            .ok_or(VmError::Invariant("fork needs a block closure"))?;
        let block = closure
            .method
            .block(closure.block_index)
            .ok_or(VmError::Invariant("missing block descriptor"))?;
        if block.num_args != 0 {
            return Err(VmError::Invariant("forked blocks take no arguments"));
        }
        let mut slots = Vec::with_capacity(closure.method.frame_capacity());
        slots.extend(closure.copied.iter().cloned());
        let record = ContextRecord {
            origin: ContextOrigin::Detached,
            sender: Value::Nil,
            pc: Some(block.offset as usize),
            sp: slots.len(),
            method: closure.method.clone(),
            closure: Some(closure_id),
            receiver: closure.receiver.clone(),
            slots,
        };
        let context = self
            .heap
            .allocate(self.special.context, Body::Context(record));
        let process = self.heap.new_process(self.special.process, priority);
        if let Some(p) = self.heap.get_mut(process)?.as_process_mut() {
            p.suspended_context = Value::Ref(context);
        }
        Ok(process)
    }

    /// Enqueue `process` on the ready list for its priority without
    /// transferring control (host-side scheduling).
    pub fn schedule(&mut self, process: ObjectId) -> Result<(), VmError> {
        scheduler::put_to_sleep(self, process)
    }

    /// Enumerate every root the external tracer must start from: the native
    /// frame stack (receivers, slots, operands, reified contexts and method
    /// literals), the scheduler, interned symbols, the interrupt semaphores,
    /// the primitive error table and every method literal pool.
    pub fn trace_roots(&self, f: &mut dyn FnMut(ObjectId)) {
        for frame in &self.frames {
            if let Value::Ref(id) = frame.receiver {
                f(id);
            }
            for value in &frame.stack {
                if let Value::Ref(id) = value {
                    f(*id);
                }
            }
            if let Some(id) = frame.closure {
                f(id);
            }
            if let Some(id) = frame.context {
                f(id);
            }
            method_references(&frame.method, f);
        }
        self.scheduler.each_reference(f);
        self.interrupt.each_reference(f);
        for id in self.symbols.values() {
            f(*id);
        }
        for value in &self.prim_error_table {
            if let Value::Ref(id) = value {
                f(*id);
            }
        }
        self.classes.each_reference(f);
    }

    /// Enumerate the references held by one heap object (tracer contract).
    pub fn trace_object(&self, id: ObjectId, f: &mut dyn FnMut(ObjectId)) -> Result<(), VmError> {
        each_reference(self.heap.get(id)?, f);
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("heap_objects", &self.heap.len())
            .field("classes", &self.classes.len())
            .field("frames", &self.frames.len())
            .field("active_process", &self.scheduler.active())
            .finish()
    }
}

//! Classes, method dictionaries and stability flags.
//!
//! Classes live in a VM-owned table and are referenced by [`ClassId`]
//! handles. Each class carries two independently invalidatable stability
//! assumptions consulted by the dispatch caches: `hierarchy_stable` dies when
//! the superclass link changes, `methods_stable` when the method dictionary
//! does. Neither invalidation walks any cache; stale entries are simply never
//! reused.

use core_types::{Assumption, ClassId, Selector, Value, VmError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytecode_system::{CompiledMethod, Literal};

use crate::layout::SlotLayout;
use crate::record::SlotRecord;

/// Instance format of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFormat {
    /// Fixed-slot instances with the given declared slot count
    Fixed {
        /// Declared instance variables
        inst_size: u16,
    },
    /// Variable-length instances holding arbitrary values
    VariableObjects,
    /// Variable-length instances holding byte data
    VariableBytes,
    /// Variable-length instances holding word data
    VariableWords,
}

impl ClassFormat {
    /// Declared fixed slots (zero for variable formats).
    pub fn inst_size(&self) -> usize {
        match self {
            ClassFormat::Fixed { inst_size } => *inst_size as usize,
            _ => 0,
        }
    }

    /// Whether instances are variable-length.
    pub fn is_variable(&self) -> bool {
        !matches!(self, ClassFormat::Fixed { .. })
    }
}

/// A class: superclass link, method dictionary, instance layout and
/// stability flags.
#[derive(Debug)]
pub struct Class {
    name: String,
    superclass: Option<ClassId>,
    format: ClassFormat,
    methods: HashMap<Selector, Rc<CompiledMethod>>,
    layout: RefCell<Rc<SlotLayout>>,
    hierarchy_stable: RefCell<Assumption>,
    methods_stable: RefCell<Assumption>,
}

impl Class {
    fn new(name: &str, superclass: Option<ClassId>, format: ClassFormat) -> Self {
        Self {
            name: name.to_string(),
            superclass,
            format,
            methods: HashMap::new(),
            layout: RefCell::new(Rc::new(SlotLayout::uninitialized(format.inst_size()))),
            hierarchy_stable: RefCell::new(Assumption::new()),
            methods_stable: RefCell::new(Assumption::new()),
        }
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The superclass link, if any.
    pub fn superclass(&self) -> Option<ClassId> {
        self.superclass
    }

    /// The instance format.
    pub fn format(&self) -> ClassFormat {
        self.format
    }

    /// The method installed for `selector` in this class alone.
    pub fn method_at(&self, selector: Selector) -> Option<Rc<CompiledMethod>> {
        self.methods.get(&selector).cloned()
    }

    /// Selectors with methods installed directly in this class.
    pub fn selectors(&self) -> impl Iterator<Item = Selector> + '_ {
        self.methods.keys().copied()
    }

    /// Installed methods, for literal tracing.
    pub fn methods(&self) -> impl Iterator<Item = &Rc<CompiledMethod>> {
        self.methods.values()
    }

    /// The current shared instance layout.
    pub fn current_layout(&self) -> Rc<SlotLayout> {
        self.layout.borrow().clone()
    }

    /// Current hierarchy stability assumption.
    pub fn hierarchy_assumption(&self) -> Assumption {
        self.hierarchy_stable.borrow().clone()
    }

    /// Current method-dictionary stability assumption.
    pub fn methods_assumption(&self) -> Assumption {
        self.methods_stable.borrow().clone()
    }

    /// Regenerate the layout so `slot` holds `value`, installing the result
    /// as the class's current layout. Returns the layout already in force
    /// when it (meanwhile) accepts the value.
    pub fn evolve_layout(&self, slot: usize, value: &Value) -> Rc<SlotLayout> {
        let current = self.current_layout();
        if current.location(slot).accepts(value) {
            return current;
        }
        let evolved = Rc::new(current.evolved_for(slot, value));
        *self.layout.borrow_mut() = evolved.clone();
        log::debug!("class {} regenerated layout for slot {}", self.name, slot);
        evolved
    }

    /// Read `slot` of `record`, migrating it first when its layout has been
    /// superseded.
    pub fn read_instance_slot(
        &self,
        record: &mut SlotRecord,
        slot: usize,
    ) -> Result<Value, VmError> {
        self.ensure_current_layout(record);
        record.read(slot)
    }

    /// Write `slot` of `record`, regenerating the class layout when the
    /// resident representation cannot hold `value`.
    pub fn write_instance_slot(
        &self,
        record: &mut SlotRecord,
        slot: usize,
        value: Value,
    ) -> Result<(), VmError> {
        self.ensure_current_layout(record);
        loop {
            if record.try_write(slot, &value)? {
                return Ok(());
            }
            let evolved = self.evolve_layout(slot, &value);
            self.migrate_record(record, evolved);
        }
    }

    /// Bring `record` onto this class's current layout, evolving further as
    /// needed so every resident value still fits. Used both for lazy sibling
    /// migration and for class changes.
    pub fn adopt_record(&self, record: &mut SlotRecord) {
        let target = self.current_layout();
        if Rc::ptr_eq(record.layout(), &target) {
            return;
        }
        self.migrate_record(record, target);
    }

    fn ensure_current_layout(&self, record: &mut SlotRecord) {
        if !record.layout().is_valid() {
            self.adopt_record(record);
        }
    }

    fn migrate_record(&self, record: &mut SlotRecord, mut target: Rc<SlotLayout>) {
        // The target must accept every value the record holds; evolve it
        // until it does, then rebuild the record's storage.
        loop {
            let mut fits = true;
            for slot in 0..record.slot_count() {
                let value = record.read(slot).expect("slot within bounds");
                if !target.location(slot).accepts(&value) {
                    target = self.evolve_layout(slot, &value);
                    fits = false;
                }
            }
            if fits {
                break;
            }
        }
        record.migrate(target);
    }

    fn invalidate_methods(&self) {
        self.methods_stable.borrow().invalidate();
        *self.methods_stable.borrow_mut() = Assumption::new();
        log::debug!("class {}: method dictionary changed", self.name);
    }

    fn invalidate_hierarchy(&self) {
        self.hierarchy_stable.borrow().invalidate();
        *self.hierarchy_stable.borrow_mut() = Assumption::new();
        log::debug!("class {}: hierarchy changed", self.name);
    }
}

/// The VM-owned table of classes.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<Class>,
}

impl ClassTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a class and return its handle.
    pub fn add(
        &mut self,
        name: &str,
        superclass: Option<ClassId>,
        format: ClassFormat,
    ) -> ClassId {
        let id = ClassId::from_index(self.classes.len());
        self.classes.push(Class::new(name, superclass, format));
        id
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The class behind a handle.
    pub fn get(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    /// Install `method` for `selector` on `class`.
    ///
    /// Replacing an existing method invalidates its call-target assumption;
    /// either way the class's method-dictionary assumption dies so cached
    /// lookups that walked through this class expire.
    pub fn install_method(
        &mut self,
        class: ClassId,
        selector: Selector,
        method: Rc<CompiledMethod>,
    ) {
        method.set_holder(class);
        let entry = &mut self.classes[class.index()];
        if let Some(old) = entry.methods.insert(selector, method) {
            old.invalidate_call_target();
        }
        entry.invalidate_methods();
    }

    /// Remove the method for `selector` from `class`, if present.
    pub fn remove_method(&mut self, class: ClassId, selector: Selector) {
        let entry = &mut self.classes[class.index()];
        if let Some(old) = entry.methods.remove(&selector) {
            old.invalidate_call_target();
            entry.invalidate_methods();
        }
    }

    /// Rewire the superclass link, invalidating the hierarchy assumption.
    pub fn set_superclass(&mut self, class: ClassId, superclass: Option<ClassId>) {
        let entry = &mut self.classes[class.index()];
        entry.superclass = superclass;
        entry.invalidate_hierarchy();
    }

    /// Iterate `class` and its ancestors, most specific first.
    pub fn hierarchy(&self, class: ClassId) -> Hierarchy<'_> {
        Hierarchy {
            table: self,
            next: Some(class),
        }
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn inherits_from(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.hierarchy(class).any(|c| c == ancestor)
    }

    /// Call `f` for every heap reference held in a method literal pool.
    /// These are tracer roots: methods are host objects, not heap objects.
    pub fn each_reference(&self, f: &mut dyn FnMut(core_types::ObjectId)) {
        for class in &self.classes {
            for method in class.methods.values() {
                for literal in method.literals() {
                    if let Literal::Value(Value::Ref(id)) = literal {
                        f(*id);
                    }
                }
            }
        }
    }
}

/// Iterator over a superclass chain.
pub struct Hierarchy<'a> {
    table: &'a ClassTable,
    next: Option<ClassId>,
}

impl Iterator for Hierarchy<'_> {
    type Item = ClassId;

    fn next(&mut self) -> Option<ClassId> {
        let current = self.next?;
        self.next = self.table.get(current).superclass();
        Some(current)
    }
}

//! The object heap.
//!
//! Objects live in a slot map keyed by generation-checked handles, so a
//! handle to a collected object reports [`VmError::StaleHandle`] instead of
//! aliasing a recycled slot. The heap mints identity hashes at allocation;
//! they never change afterwards.

use core_types::{ClassId, ObjectId, Selector, Value, VmError};
use slotmap::SlotMap;

use crate::class::{ClassFormat, ClassTable};
use crate::context::BlockClosure;
use crate::object::{Body, HeapObject, ProcessRecord, SemaphoreRecord};
use crate::record::SlotRecord;
use crate::storage::ArrayStorage;

/// The process-wide object heap.
#[derive(Debug, Default)]
pub struct Heap {
    objects: SlotMap<ObjectId, HeapObject>,
    hash_state: u32,
}

impl Heap {
    /// An empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the heap holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn mint_hash(&mut self) -> u32 {
        // Weyl-sequence step keeps hashes distinct and cheap.
        self.hash_state = self.hash_state.wrapping_add(0x9e37_79b9);
        self.hash_state
    }

    /// Allocate an object with a freshly minted identity hash.
    pub fn allocate(&mut self, class: ClassId, body: Body) -> ObjectId {
        let hash = self.mint_hash();
        self.objects.insert(HeapObject::new(class, hash, body))
    }

    /// Allocate with a caller-supplied identity hash (image fill-in).
    pub fn allocate_with_hash(&mut self, class: ClassId, hash: u32, body: Body) -> ObjectId {
        self.objects.insert(HeapObject::new(class, hash, body))
    }

    /// The object behind `id`.
    pub fn get(&self, id: ObjectId) -> Result<&HeapObject, VmError> {
        self.objects.get(id).ok_or(VmError::StaleHandle)
    }

    /// Mutable access to the object behind `id`.
    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut HeapObject, VmError> {
        self.objects.get_mut(id).ok_or(VmError::StaleHandle)
    }

    /// Whether `id` still refers to a live object.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Remove an object (driven by the external collector).
    pub fn free(&mut self, id: ObjectId) {
        self.objects.remove(id);
    }

    /// Iterate every live object.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &HeapObject)> {
        self.objects.iter()
    }

    /// Allocate a variable array of `size` with size-only storage.
    pub fn new_array(&mut self, class: ClassId, size: usize) -> ObjectId {
        self.allocate(class, Body::Array(ArrayStorage::empty(size)))
    }

    /// Allocate an array holding `values` in the narrowest fitting storage.
    pub fn new_array_from(&mut self, class: ClassId, values: Vec<Value>) -> ObjectId {
        self.allocate(class, Body::Array(ArrayStorage::from_values(values)))
    }

    /// Allocate a fresh instance of `class` according to its format.
    /// Variable-format classes get `size` indexed slots.
    pub fn new_instance(
        &mut self,
        classes: &ClassTable,
        class: ClassId,
        size: usize,
    ) -> Result<ObjectId, VmError> {
        let entry = classes.get(class);
        let body = match entry.format() {
            ClassFormat::Fixed { .. } => {
                if size != 0 {
                    return Err(VmError::Invariant(
                        "fixed-format instances take no indexed slots",
                    ));
                }
                Body::Slots(SlotRecord::new(entry.current_layout()))
            }
            ClassFormat::VariableObjects => Body::Array(ArrayStorage::empty(size)),
            ClassFormat::VariableBytes | ClassFormat::VariableWords => {
                // Byte and word data is zero-filled and fully assigned.
                Body::Array(ArrayStorage::from_values(vec![Value::SmallInt(0); size]))
            }
        };
        Ok(self.allocate(class, body))
    }

    /// Allocate a symbol object for `selector`.
    pub fn new_symbol(&mut self, class: ClassId, selector: Selector) -> ObjectId {
        self.allocate(class, Body::Symbol(selector))
    }

    /// Allocate a closure object.
    pub fn new_closure(&mut self, class: ClassId, closure: BlockClosure) -> ObjectId {
        self.allocate(class, Body::Closure(closure))
    }

    /// Allocate a process with the given priority.
    pub fn new_process(&mut self, class: ClassId, priority: usize) -> ObjectId {
        self.allocate(
            class,
            Body::Process(ProcessRecord {
                priority,
                suspended_context: Value::Nil,
                blocked_on: None,
            }),
        )
    }

    /// Allocate a semaphore with the given initial signal count.
    pub fn new_semaphore(&mut self, class: ClassId, excess_signals: i64) -> ObjectId {
        self.allocate(
            class,
            Body::Semaphore(SemaphoreRecord {
                excess_signals,
                waiting: Default::default(),
            }),
        )
    }

    /// The identity hash of `id`.
    pub fn identity_hash(&self, id: ObjectId) -> Result<u32, VmError> {
        Ok(self.get(id)?.identity_hash())
    }

    /// Indexed read on an array object.
    pub fn array_at(&self, id: ObjectId, index: usize) -> Result<Value, VmError> {
        let object = self.get(id)?;
        let storage = object
            .as_array()
            .ok_or(VmError::Invariant("indexed access on a non-array"))?;
        storage.read(index)
    }

    /// Indexed write on an array object, widening storage as needed.
    pub fn array_at_put(
        &mut self,
        id: ObjectId,
        index: usize,
        value: Value,
    ) -> Result<(), VmError> {
        let object = self.get_mut(id)?;
        let storage = object
            .as_array_mut()
            .ok_or(VmError::Invariant("indexed access on a non-array"))?;
        storage.write(index, value)
    }

    /// Element count of an array object.
    pub fn array_len(&self, id: ObjectId) -> Result<usize, VmError> {
        let object = self.get(id)?;
        let storage = object
            .as_array()
            .ok_or(VmError::Invariant("size of a non-array"))?;
        Ok(storage.len())
    }

    /// Instance-variable read on a fixed-slot object.
    pub fn inst_var_at(
        &mut self,
        classes: &ClassTable,
        id: ObjectId,
        slot: usize,
    ) -> Result<Value, VmError> {
        let object = self.objects.get_mut(id).ok_or(VmError::StaleHandle)?;
        let class = classes.get(object.class());
        match &mut object.body {
            Body::Slots(record) => class.read_instance_slot(record, slot),
            _ => Err(VmError::Invariant("instance variable on a non-record")),
        }
    }

    /// Instance-variable write on a fixed-slot object.
    pub fn inst_var_at_put(
        &mut self,
        classes: &ClassTable,
        id: ObjectId,
        slot: usize,
        value: Value,
    ) -> Result<(), VmError> {
        let object = self.objects.get_mut(id).ok_or(VmError::StaleHandle)?;
        let class = classes.get(object.class());
        match &mut object.body {
            Body::Slots(record) => class.write_instance_slot(record, slot, value),
            _ => Err(VmError::Invariant("instance variable on a non-record")),
        }
    }

    /// Explicit class change ("become"-style). Fixed-slot instances adopt a
    /// layout of the new class that accepts every resident value; identity
    /// hash is untouched.
    pub fn change_class(
        &mut self,
        classes: &ClassTable,
        id: ObjectId,
        new_class: ClassId,
    ) -> Result<(), VmError> {
        let object = self.objects.get_mut(id).ok_or(VmError::StaleHandle)?;
        let target = classes.get(new_class);
        if let Body::Slots(record) = &mut object.body {
            if record.slot_count() != target.format().inst_size() {
                return Err(VmError::Invariant(
                    "class change between incompatible instance sizes",
                ));
            }
            target.adopt_record(record);
        }
        object.set_class(new_class);
        Ok(())
    }
}

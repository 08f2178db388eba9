//! Fixed-slot record storage.
//!
//! A record stores its slots according to a shared [`SlotLayout`]: unboxed
//! values in a primitive word vector with an assigned-bit per word, generic
//! values boxed in a value vector. Records whose layout has been superseded
//! migrate lazily the next time they are touched.

use core_types::{ObjectId, Value, VmError};
use std::rc::Rc;

use crate::bits::BitSet;
use crate::layout::{Location, SlotLayout};

/// Slot storage for one fixed-slot object.
#[derive(Debug)]
pub struct SlotRecord {
    layout: Rc<SlotLayout>,
    prim_words: Vec<u64>,
    object_values: Vec<Value>,
    assigned: BitSet,
}

impl SlotRecord {
    /// An all-unassigned record using `layout`.
    pub fn new(layout: Rc<SlotLayout>) -> Self {
        let prim = layout.num_prim_fields();
        let object = layout.num_object_fields();
        Self {
            layout,
            prim_words: vec![0; prim],
            object_values: vec![Value::Nil; object],
            assigned: BitSet::new(prim),
        }
    }

    /// The layout this record currently follows.
    pub fn layout(&self) -> &Rc<SlotLayout> {
        &self.layout
    }

    /// Declared slot count.
    pub fn slot_count(&self) -> usize {
        self.layout.slot_count()
    }

    /// Read `slot`. Unassigned slots read as nil.
    pub fn read(&self, slot: usize) -> Result<Value, VmError> {
        self.check_bounds(slot)?;
        Ok(self.read_resolved(self.layout.location(slot)))
    }

    /// Attempt a write without evolving the layout.
    ///
    /// Returns `Ok(true)` when stored, `Ok(false)` when the resident
    /// representation cannot hold `value` and the layout must regenerate.
    /// A nil-store into an unboxed slot clears its assigned bit; that is
    /// the only way a slot goes back to unassigned.
    pub fn try_write(&mut self, slot: usize, value: &Value) -> Result<bool, VmError> {
        self.check_bounds(slot)?;
        Ok(self.write_resolved(self.layout.location(slot), value))
    }

    /// Read through a location resolved against this record's layout.
    /// Used by the engine's slot-access caches once the layout identity has
    /// been checked; `location` must come from [`Self::layout`].
    pub fn read_resolved(&self, location: Location) -> Value {
        match location {
            Location::Uninitialized => Value::Nil,
            Location::Bool { field } => self.read_prim(field, |w| Value::Boolean(w != 0)),
            Location::Char { field } => self.read_prim(field, |w| {
                Value::Character(char::from_u32(w as u32).unwrap_or('\u{fffd}'))
            }),
            Location::Long { field } => self.read_prim(field, |w| Value::SmallInt(w as i64)),
            Location::Double { field } => {
                self.read_prim(field, |w| Value::Float(f64::from_bits(w)))
            }
            Location::Object { field } => self.object_values[field as usize].clone(),
        }
    }

    /// Write through a resolved location. Returns false when the location
    /// cannot hold `value` (the caller falls back to the evolving path).
    pub fn write_resolved(&mut self, location: Location, value: &Value) -> bool {
        if !location.accepts(value) {
            return false;
        }
        match (location, value) {
            (Location::Uninitialized, _) => {}
            (Location::Bool { field }, Value::Boolean(b)) => self.write_prim(field, *b as u64),
            (Location::Char { field }, Value::Character(c)) => self.write_prim(field, *c as u64),
            (Location::Long { field }, Value::SmallInt(n)) => self.write_prim(field, *n as u64),
            (Location::Double { field }, Value::Float(n)) => self.write_prim(field, n.to_bits()),
            (
                Location::Bool { field }
                | Location::Char { field }
                | Location::Long { field }
                | Location::Double { field },
                Value::Nil,
            ) => self.assigned.set(field as usize, false),
            (Location::Object { field }, _) => self.object_values[field as usize] = value.clone(),
            _ => unreachable!("accepts() said the location holds this value"),
        }
        true
    }

    /// Rebuild this record's storage under `layout`, carrying every slot
    /// value over. The caller guarantees each value fits its new location.
    pub fn migrate(&mut self, layout: Rc<SlotLayout>) {
        let values: Vec<Value> = (0..self.slot_count())
            .map(|slot| self.read(slot).expect("slot within bounds"))
            .collect();
        *self = SlotRecord::new(layout);
        for (slot, value) in values.into_iter().enumerate() {
            if !value.is_nil() {
                let stored = self
                    .try_write(slot, &value)
                    .expect("slot within bounds");
                debug_assert!(stored, "migration target layout must accept every value");
            }
        }
    }

    /// Call `f` for every heap reference held in a generic slot.
    pub fn each_reference(&self, f: &mut dyn FnMut(ObjectId)) {
        for value in &self.object_values {
            if let Value::Ref(id) = value {
                f(*id);
            }
        }
    }

    fn read_prim(&self, field: u32, decode: impl Fn(u64) -> Value) -> Value {
        if self.assigned.get(field as usize) {
            decode(self.prim_words[field as usize])
        } else {
            Value::Nil
        }
    }

    fn write_prim(&mut self, field: u32, word: u64) {
        self.prim_words[field as usize] = word;
        self.assigned.set(field as usize, true);
    }

    fn check_bounds(&self, slot: usize) -> Result<(), VmError> {
        let size = self.slot_count();
        if slot >= size {
            return Err(VmError::IndexOutOfBounds { index: slot, size });
        }
        Ok(())
    }
}

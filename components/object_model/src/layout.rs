//! Shared slot layouts for fixed-slot records.
//!
//! A layout describes, per declared slot, which representation is in force.
//! Layouts are shared by every instance of a class and only ever generalize:
//! an unassigned slot adopts the representation of the first value written to
//! it, and a primitive slot that sees a value it cannot hold regenerates
//! straight to the generic object representation — never to a different
//! primitive kind. The previous layout's validity assumption is invalidated
//! so sibling instances and caches notice lazily.

use core_types::{Assumption, Value};

/// Per-slot representation within a [`SlotLayout`].
///
/// `field` indexes the record's primitive-word vector for unboxed kinds and
/// its value vector for the generic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Nothing written yet; reads as nil
    Uninitialized,
    /// Unboxed boolean in a primitive word
    Bool {
        /// Primitive word index
        field: u32,
    },
    /// Unboxed character in a primitive word
    Char {
        /// Primitive word index
        field: u32,
    },
    /// Unboxed 64-bit integer in a primitive word
    Long {
        /// Primitive word index
        field: u32,
    },
    /// Unboxed double in a primitive word
    Double {
        /// Primitive word index
        field: u32,
    },
    /// Generic boxed value
    Object {
        /// Value vector index
        field: u32,
    },
}

impl Location {
    /// Whether a write of `value` fits this location without regenerating
    /// the layout. Nil fits everywhere: it clears the assigned bit of an
    /// unboxed slot and is stored directly in generic slots.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Location::Uninitialized => value.is_nil(),
            Location::Bool { .. } => matches!(value, Value::Boolean(_) | Value::Nil),
            Location::Char { .. } => matches!(value, Value::Character(_) | Value::Nil),
            Location::Long { .. } => matches!(value, Value::SmallInt(_) | Value::Nil),
            Location::Double { .. } => matches!(value, Value::Float(_) | Value::Nil),
            Location::Object { .. } => true,
        }
    }

    /// Whether this is one of the unboxed kinds.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Location::Bool { .. }
                | Location::Char { .. }
                | Location::Long { .. }
                | Location::Double { .. }
        )
    }

    /// Whether this is the generic kind.
    pub fn is_object(&self) -> bool {
        matches!(self, Location::Object { .. })
    }
}

/// Layout shared by all instances of a class that were touched while it was
/// current.
#[derive(Debug)]
pub struct SlotLayout {
    locations: Vec<Location>,
    num_prim_fields: u32,
    num_object_fields: u32,
    valid: Assumption,
}

impl SlotLayout {
    /// A fresh layout with every slot uninitialized.
    pub fn uninitialized(slot_count: usize) -> Self {
        Self {
            locations: vec![Location::Uninitialized; slot_count],
            num_prim_fields: 0,
            num_object_fields: 0,
            valid: Assumption::new(),
        }
    }

    /// Declared slot count.
    pub fn slot_count(&self) -> usize {
        self.locations.len()
    }

    /// The representation in force for `slot`.
    pub fn location(&self, slot: usize) -> Location {
        self.locations[slot]
    }

    /// Primitive words a record with this layout needs.
    pub fn num_prim_fields(&self) -> usize {
        self.num_prim_fields as usize
    }

    /// Generic value slots a record with this layout needs.
    pub fn num_object_fields(&self) -> usize {
        self.num_object_fields as usize
    }

    /// The validity assumption caches and sibling instances hold.
    pub fn validity(&self) -> &Assumption {
        &self.valid
    }

    /// Whether this layout is still the class's current one.
    pub fn is_valid(&self) -> bool {
        self.valid.is_valid()
    }

    /// Derive the successor layout after a write of `value` to `slot`, and
    /// invalidate this layout.
    ///
    /// An uninitialized slot adopts the narrowest representation holding
    /// `value`; a primitive slot generalizes straight to a generic one.
    /// Generic slots accept everything and never evolve.
    pub fn evolved_for(&self, slot: usize, value: &Value) -> SlotLayout {
        debug_assert!(!self.location(slot).accepts(value));
        self.valid.invalidate();

        let mut locations = self.locations.clone();
        let mut num_prim_fields = self.num_prim_fields;
        let mut num_object_fields = self.num_object_fields;

        let old = locations[slot];
        let new = match (old, value) {
            (Location::Uninitialized, Value::Boolean(_)) => {
                num_prim_fields += 1;
                Location::Bool { field: num_prim_fields - 1 }
            }
            (Location::Uninitialized, Value::Character(_)) => {
                num_prim_fields += 1;
                Location::Char { field: num_prim_fields - 1 }
            }
            (Location::Uninitialized, Value::SmallInt(_)) => {
                num_prim_fields += 1;
                Location::Long { field: num_prim_fields - 1 }
            }
            (Location::Uninitialized, Value::Float(_)) => {
                num_prim_fields += 1;
                Location::Double { field: num_prim_fields - 1 }
            }
            // Everything else (references, large integers, and any value a
            // primitive slot cannot hold) lands in a generic slot.
            _ => {
                num_object_fields += 1;
                Location::Object { field: num_object_fields - 1 }
            }
        };
        locations[slot] = new;

        SlotLayout {
            locations,
            num_prim_fields,
            num_object_fields,
            valid: Assumption::new(),
        }
    }
}

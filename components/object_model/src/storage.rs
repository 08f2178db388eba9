//! Adaptive storage for variable-length arrays.
//!
//! An array starts in the cheapest representation that can hold what has
//! been written to it and only ever widens: `Empty` (size-only) through one
//! of the unboxed kinds to generic `Objects` storage. Unboxed kinds carry an
//! is-set bit vector so an unwritten slot reads as nil without boxing.

use core_types::{ObjectId, Value, VmError};

use crate::bits::BitSet;

/// Which concrete backing representation an array currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// No storage allocated; every slot reads as nil
    Empty,
    /// Unboxed booleans
    Booleans,
    /// Unboxed characters
    Chars,
    /// Unboxed 64-bit integers
    Longs,
    /// Unboxed doubles
    Doubles,
    /// Heap references only (no immediates)
    Refs,
    /// Fully generic value storage
    Objects,
}

impl StorageKind {
    /// Ordering witness for the only-widens invariant: a transition is legal
    /// only towards strictly greater generality.
    pub fn generality(self) -> u8 {
        match self {
            StorageKind::Empty => 0,
            StorageKind::Booleans
            | StorageKind::Chars
            | StorageKind::Longs
            | StorageKind::Doubles
            | StorageKind::Refs => 1,
            StorageKind::Objects => 2,
        }
    }
}

/// Backing storage of a variable-length array.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayStorage {
    /// Size-only storage; nothing has been written yet
    Empty {
        /// Element count
        size: usize,
    },
    /// Unboxed booleans with an is-set vector
    Booleans {
        /// Element values (meaningful only where assigned)
        values: BitSet,
        /// Which slots hold a written value
        assigned: BitSet,
    },
    /// Unboxed characters with an is-set vector
    Chars {
        /// Element values (meaningful only where assigned)
        values: Vec<char>,
        /// Which slots hold a written value
        assigned: BitSet,
    },
    /// Unboxed integers with an is-set vector
    Longs {
        /// Element values (meaningful only where assigned)
        values: Vec<i64>,
        /// Which slots hold a written value
        assigned: BitSet,
    },
    /// Unboxed doubles with an is-set vector
    Doubles {
        /// Element values (meaningful only where assigned)
        values: Vec<f64>,
        /// Which slots hold a written value
        assigned: BitSet,
    },
    /// Heap references; `None` is nil
    Refs {
        /// Element references
        values: Vec<Option<ObjectId>>,
    },
    /// Generic value storage
    Objects {
        /// Element values
        values: Vec<Value>,
    },
}

impl ArrayStorage {
    /// Size-only storage for a fresh array.
    pub fn empty(size: usize) -> Self {
        ArrayStorage::Empty { size }
    }

    /// Build the narrowest storage kind that holds `values` exactly.
    ///
    /// Used by the image fill-in step: all-nil data stays `Empty`, uniform
    /// unboxable data gets an unboxed kind, reference-only data gets `Refs`,
    /// anything mixed lands in `Objects`.
    pub fn from_values(values: Vec<Value>) -> Self {
        #[derive(PartialEq, Clone, Copy)]
        enum Candidate {
            Unknown,
            Booleans,
            Chars,
            Longs,
            Doubles,
            Refs,
            Objects,
        }
        let mut candidate = Candidate::Unknown;
        for value in &values {
            let this = match value {
                Value::Nil => continue,
                Value::Boolean(_) => Candidate::Booleans,
                Value::Character(_) => Candidate::Chars,
                Value::SmallInt(_) => Candidate::Longs,
                Value::Float(_) => Candidate::Doubles,
                Value::Ref(_) => Candidate::Refs,
                Value::LargeInt(_) => Candidate::Objects,
            };
            candidate = match (candidate, this) {
                (Candidate::Unknown, c) => c,
                (a, b) if a == b => a,
                _ => Candidate::Objects,
            };
            if candidate == Candidate::Objects {
                break;
            }
        }
        let size = values.len();
        let mut storage = match candidate {
            Candidate::Unknown => return ArrayStorage::Empty { size },
            Candidate::Booleans => ArrayStorage::Booleans {
                values: BitSet::new(size),
                assigned: BitSet::new(size),
            },
            Candidate::Chars => ArrayStorage::Chars {
                values: vec!['\0'; size],
                assigned: BitSet::new(size),
            },
            Candidate::Longs => ArrayStorage::Longs {
                values: vec![0; size],
                assigned: BitSet::new(size),
            },
            Candidate::Doubles => ArrayStorage::Doubles {
                values: vec![0.0; size],
                assigned: BitSet::new(size),
            },
            Candidate::Refs => ArrayStorage::Refs {
                values: vec![None; size],
            },
            Candidate::Objects => return ArrayStorage::Objects { values },
        };
        for (index, value) in values.into_iter().enumerate() {
            if !value.is_nil() {
                storage
                    .write(index, value)
                    .expect("fill-in write within bounds");
            }
        }
        storage
    }

    /// Element count.
    pub fn len(&self) -> usize {
        match self {
            ArrayStorage::Empty { size } => *size,
            ArrayStorage::Booleans { assigned, .. } => assigned.len(),
            ArrayStorage::Chars { values, .. } => values.len(),
            ArrayStorage::Longs { values, .. } => values.len(),
            ArrayStorage::Doubles { values, .. } => values.len(),
            ArrayStorage::Refs { values } => values.len(),
            ArrayStorage::Objects { values } => values.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The active storage kind.
    pub fn kind(&self) -> StorageKind {
        match self {
            ArrayStorage::Empty { .. } => StorageKind::Empty,
            ArrayStorage::Booleans { .. } => StorageKind::Booleans,
            ArrayStorage::Chars { .. } => StorageKind::Chars,
            ArrayStorage::Longs { .. } => StorageKind::Longs,
            ArrayStorage::Doubles { .. } => StorageKind::Doubles,
            ArrayStorage::Refs { .. } => StorageKind::Refs,
            ArrayStorage::Objects { .. } => StorageKind::Objects,
        }
    }

    /// Read the element at `index`; unwritten slots read as nil.
    pub fn read(&self, index: usize) -> Result<Value, VmError> {
        self.check_bounds(index)?;
        Ok(match self {
            ArrayStorage::Empty { .. } => Value::Nil,
            ArrayStorage::Booleans { values, assigned } => {
                if assigned.get(index) {
                    Value::Boolean(values.get(index))
                } else {
                    Value::Nil
                }
            }
            ArrayStorage::Chars { values, assigned } => {
                if assigned.get(index) {
                    Value::Character(values[index])
                } else {
                    Value::Nil
                }
            }
            ArrayStorage::Longs { values, assigned } => {
                if assigned.get(index) {
                    Value::SmallInt(values[index])
                } else {
                    Value::Nil
                }
            }
            ArrayStorage::Doubles { values, assigned } => {
                if assigned.get(index) {
                    Value::Float(values[index])
                } else {
                    Value::Nil
                }
            }
            ArrayStorage::Refs { values } => match values[index] {
                Some(id) => Value::Ref(id),
                None => Value::Nil,
            },
            ArrayStorage::Objects { values } => values[index].clone(),
        })
    }

    /// Write `value` at `index`, widening the storage first when the current
    /// kind cannot hold it. Widening is the only operation that changes the
    /// kind and it preserves every previously observable element.
    pub fn write(&mut self, index: usize, value: Value) -> Result<(), VmError> {
        self.check_bounds(index)?;
        if !self.accepts(&value) {
            self.widen_for(&value);
        }
        match self {
            ArrayStorage::Empty { .. } => {
                // Nil into empty storage: every slot already reads as nil.
                debug_assert!(value.is_nil());
            }
            ArrayStorage::Booleans { values, assigned } => match value {
                Value::Boolean(b) => {
                    values.set(index, b);
                    assigned.set(index, true);
                }
                _ => assigned.set(index, false),
            },
            ArrayStorage::Chars { values, assigned } => match value {
                Value::Character(c) => {
                    values[index] = c;
                    assigned.set(index, true);
                }
                _ => assigned.set(index, false),
            },
            ArrayStorage::Longs { values, assigned } => match value {
                Value::SmallInt(n) => {
                    values[index] = n;
                    assigned.set(index, true);
                }
                _ => assigned.set(index, false),
            },
            ArrayStorage::Doubles { values, assigned } => match value {
                Value::Float(n) => {
                    values[index] = n;
                    assigned.set(index, true);
                }
                _ => assigned.set(index, false),
            },
            ArrayStorage::Refs { values } => {
                values[index] = value.as_ref();
            }
            ArrayStorage::Objects { values } => {
                values[index] = value;
            }
        }
        Ok(())
    }

    /// Every element as a boxed value, unwritten slots as nil.
    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len())
            .map(|i| self.read(i).expect("index within bounds"))
            .collect()
    }

    /// Call `f` for every heap reference held by this storage.
    pub fn each_reference(&self, f: &mut dyn FnMut(ObjectId)) {
        match self {
            ArrayStorage::Refs { values } => {
                for id in values.iter().flatten() {
                    f(*id);
                }
            }
            ArrayStorage::Objects { values } => {
                for value in values {
                    if let Value::Ref(id) = value {
                        f(*id);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_bounds(&self, index: usize) -> Result<(), VmError> {
        let size = self.len();
        if index >= size {
            return Err(VmError::IndexOutOfBounds { index, size });
        }
        Ok(())
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArrayStorage::Empty { .. } => value.is_nil(),
            ArrayStorage::Booleans { .. } => {
                matches!(value, Value::Boolean(_) | Value::Nil)
            }
            ArrayStorage::Chars { .. } => {
                matches!(value, Value::Character(_) | Value::Nil)
            }
            ArrayStorage::Longs { .. } => {
                matches!(value, Value::SmallInt(_) | Value::Nil)
            }
            ArrayStorage::Doubles { .. } => {
                matches!(value, Value::Float(_) | Value::Nil)
            }
            ArrayStorage::Refs { .. } => matches!(value, Value::Ref(_) | Value::Nil),
            ArrayStorage::Objects { .. } => true,
        }
    }

    /// Transition to the narrowest kind that accepts `value`, carrying every
    /// current element over. O(n) in the array length.
    fn widen_for(&mut self, value: &Value) {
        let old_kind = self.kind();
        let size = self.len();
        let widened = match (&*self, value) {
            (ArrayStorage::Empty { .. }, Value::Boolean(_)) => ArrayStorage::Booleans {
                values: BitSet::new(size),
                assigned: BitSet::new(size),
            },
            (ArrayStorage::Empty { .. }, Value::Character(_)) => ArrayStorage::Chars {
                values: vec!['\0'; size],
                assigned: BitSet::new(size),
            },
            (ArrayStorage::Empty { .. }, Value::SmallInt(_)) => ArrayStorage::Longs {
                values: vec![0; size],
                assigned: BitSet::new(size),
            },
            (ArrayStorage::Empty { .. }, Value::Float(_)) => ArrayStorage::Doubles {
                values: vec![0.0; size],
                assigned: BitSet::new(size),
            },
            (ArrayStorage::Empty { .. }, Value::Ref(_)) => ArrayStorage::Refs {
                values: vec![None; size],
            },
            // Any other mismatch generalizes all the way; unset unboxed
            // slots become explicit nils.
            _ => ArrayStorage::Objects {
                values: self.to_values(),
            },
        };
        debug_assert!(widened.kind().generality() > old_kind.generality());
        log::trace!(
            "array storage widened {:?} -> {:?} (size {})",
            old_kind,
            widened.kind(),
            size
        );
        *self = widened;
    }
}

//! Smalltalk value representation.
//!
//! This module provides the core `Value` enum that represents every value the
//! engine can touch: the immediate kinds carried inline and references into
//! the object heap.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::fmt;

slotmap::new_key_type! {
    /// Generation-checked handle to an object on the heap.
    ///
    /// Handles go stale when the referenced object is collected; the heap
    /// reports access through a stale handle as an error instead of
    /// resurrecting the slot.
    pub struct ObjectId;
}

/// Handle to a class in the VM-owned class table.
///
/// Classes are never collected, so a plain index is sufficient; the newtype
/// keeps class handles from being confused with array indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

impl ClassId {
    /// Build a handle from a table index.
    pub fn from_index(index: usize) -> Self {
        ClassId(index as u32)
    }

    /// The table index this handle wraps.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Represents any Smalltalk value.
///
/// Immediate kinds (nil, booleans, small integers, characters, floats and
/// large integers) are stored inline and carry no identity of their own;
/// everything else is a [`Value::Ref`] into the heap.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let n = Value::SmallInt(42);
/// assert!(n.is_integer());
/// assert_eq!(n.as_small_int(), Some(42));
/// assert!(Value::Nil.is_nil());
/// ```
#[derive(Clone)]
pub enum Value {
    /// The nil singleton.
    Nil,
    /// true or false
    Boolean(bool),
    /// Small integer stored inline (64-bit signed)
    SmallInt(i64),
    /// A single character
    Character(char),
    /// IEEE 754 double-precision floating point
    Float(f64),
    /// Arbitrary-precision integer
    LargeInt(BigInt),
    /// Reference to a heap object
    Ref(ObjectId),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::SmallInt(n) => f.debug_tuple("SmallInt").field(n).finish(),
            Value::Character(c) => f.debug_tuple("Character").field(c).finish(),
            Value::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Value::LargeInt(n) => f.debug_tuple("LargeInt").field(n).finish(),
            Value::Ref(id) => f.debug_tuple("Ref").field(id).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::SmallInt(a), Value::SmallInt(b)) => a == b,
            (Value::Character(a), Value::Character(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::LargeInt(a), Value::LargeInt(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Returns whether this value is the nil singleton.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns whether this value is an integer (small or large).
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::SmallInt(_) | Value::LargeInt(_))
    }

    /// Returns the small-integer payload, if any.
    pub fn as_small_int(&self) -> Option<i64> {
        match self {
            Value::SmallInt(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the heap handle, if this is a reference.
    pub fn as_ref(&self) -> Option<ObjectId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Builds an integer value, shrinking to [`Value::SmallInt`] when the
    /// magnitude permits.
    ///
    /// Arithmetic primitives overflow into `LargeInt` and results that fit
    /// 64 bits come back out as small integers, so guest code never observes
    /// two representations of the same integer.
    ///
    /// ```
    /// use core_types::Value;
    /// use num_bigint::BigInt;
    ///
    /// assert_eq!(Value::integer(BigInt::from(7)), Value::SmallInt(7));
    /// ```
    pub fn integer(n: BigInt) -> Value {
        match n.to_i64() {
            Some(small) => Value::SmallInt(small),
            None => Value::LargeInt(n),
        }
    }

    /// Derived hash for immediate values.
    ///
    /// Heap objects carry their identity hash in their header; immediates
    /// hash by payload. Returns `None` for references.
    pub fn immediate_hash(&self) -> Option<u32> {
        fn mix(bits: u64) -> u32 {
            let h = bits.wrapping_mul(0x9e37_79b9_7f4a_7c15);
            (h >> 32) as u32
        }
        match self {
            Value::Nil => Some(0),
            Value::Boolean(b) => Some(*b as u32 + 1),
            Value::SmallInt(n) => Some(mix(*n as u64)),
            Value::Character(c) => Some(mix(*c as u64)),
            Value::Float(n) => Some(mix(n.to_bits())),
            Value::LargeInt(n) => {
                let (_, digits) = n.to_u32_digits();
                Some(digits.iter().fold(0u32, |acc, d| {
                    acc.rotate_left(5) ^ *d
                }))
            }
            Value::Ref(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::SmallInt(n)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Character(c)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Ref(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::SmallInt(n) => write!(f, "{}", n),
            Value::Character(c) => write!(f, "${}", c),
            Value::Float(n) => write!(f, "{}", n),
            Value::LargeInt(n) => write!(f, "{}", n),
            Value::Ref(_) => write!(f, "anObject"),
        }
    }
}

//! Core Smalltalk value types and error handling.
//!
//! This crate provides the foundational types for the object runtime:
//! value representation, interned selectors and the engine error taxonomy.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of Smalltalk values
//! - [`ObjectId`] / [`ClassId`] - Generation-checked heap and class handles
//! - [`Selector`] / [`SelectorTable`] - Interned message selectors
//! - [`Assumption`] - Invalidatable stability flags backing the caches
//! - [`VmError`] - Errors that escape the engine
//!
//! # Examples
//!
//! ```
//! use core_types::{SelectorTable, Value};
//!
//! let mut selectors = SelectorTable::new();
//! let plus = selectors.intern("+");
//! assert_eq!(selectors.arg_count(plus), 1);
//!
//! let receiver = Value::SmallInt(3);
//! assert!(receiver.is_integer());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod assumption;
mod error;
mod selector;
mod value;

pub use assumption::Assumption;
pub use error::VmError;
pub use selector::{Selector, SelectorTable};
pub use value::{ClassId, ObjectId, Value};

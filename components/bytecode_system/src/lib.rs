//! Compiled code representation for the object runtime.
//!
//! This crate defines the instruction set, literal pool, compiled
//! method/block objects and the builder hosts and tests use to assemble
//! methods.
//!
//! # Overview
//!
//! - [`Opcode`] - The engine's instruction set
//! - [`CompiledMethod`] / [`CompiledBlock`] - Code objects
//! - [`Literal`] - Literal pool entries
//! - [`MethodBuilder`] - Incremental method assembly
//!
//! # Examples
//!
//! ```
//! use bytecode_system::{MethodBuilder, Opcode};
//!
//! let method = MethodBuilder::new("Point>>x")
//!     .build(|b| {
//!         b.emit(Opcode::PushReceiverVariable(0));
//!         b.emit(Opcode::ReturnTop);
//!     });
//! assert!(method.primitive().is_none());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod method;
mod opcode;

pub use method::{CompiledBlock, CompiledMethod, Literal, MethodBuilder};
pub use opcode::Opcode;

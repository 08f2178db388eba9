//! The execution engine: activations, bytecode interpretation, dispatch and
//! cooperative scheduling.
//!
//! # Overview
//!
//! - [`Vm`] - The single VM context owning all shared state
//! - [`Frame`] - Native (virtual) activations
//! - [`engine`] - Instruction stepping and the driver loop
//! - [`activation`] - Reification and the stack/heap duality
//! - [`dispatch`] / [`inline_cache`] - Method lookup and caching
//! - [`scheduler`] - Processes and semaphores
//! - [`interrupt`] - Safe-point interrupt delivery
//! - [`primitives`] - The primitive table
//!
//! # Examples
//!
//! ```
//! use bytecode_system::{MethodBuilder, Opcode};
//! use core_types::Value;
//! use interpreter::Vm;
//!
//! let mut vm = Vm::new();
//! let method = MethodBuilder::new("doctest>>answer").build(|b| {
//!     b.emit(Opcode::PushSmallInt(42));
//!     b.emit(Opcode::ReturnTop);
//! });
//! let result = vm.activate(method, Value::Nil, &[]).unwrap();
//! assert_eq!(result, Value::SmallInt(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod activation;
pub mod dispatch;
pub mod engine;
mod frame;
pub mod inline_cache;
pub mod interrupt;
pub mod primitives;
pub mod scheduler;
mod vm;

pub use dispatch::{LookupResult, MethodCache};
pub use frame::Frame;
pub use inline_cache::{CachedTarget, SendSiteState, SendSites, SlotSites};
pub use interrupt::{InterruptHandle, InterruptState};
pub use primitives::{BasicPrimitives, PrimitiveFn, PrimitiveOutcome, PrimitiveTable};
pub use scheduler::Scheduler;
pub use vm::{SpecialClasses, Vm, VmOptions, WellKnownSelectors};

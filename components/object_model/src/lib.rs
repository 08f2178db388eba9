//! Adaptive in-memory object representation.
//!
//! This crate implements the storage layer and object model of the runtime:
//! the object heap with generation-checked handles, variable arrays with
//! widening storage kinds, fixed-slot records with shared regenerating
//! layouts, classes with stability assumptions, activation and closure
//! records, image fill-in and tracer reference enumeration.
//!
//! # Overview
//!
//! - [`Heap`] / [`HeapObject`] / [`Body`] - The object heap
//! - [`ArrayStorage`] / [`StorageKind`] - Variable-array storage
//! - [`SlotLayout`] / [`Location`] / [`SlotRecord`] - Fixed-slot storage
//! - [`Class`] / [`ClassTable`] / [`ClassFormat`] - Classes
//! - [`ContextRecord`] / [`BlockClosure`] / [`FrameMarker`] - Activations
//! - [`FillInObject`] - Image-loader contract
//! - [`each_reference`] - Tracer contract

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod bits;
mod class;
mod context;
mod fillin;
mod heap;
mod layout;
mod object;
mod record;
mod storage;
mod trace;

pub use bits::BitSet;
pub use class::{Class, ClassFormat, ClassTable, Hierarchy};
pub use context::{BlockClosure, ContextOrigin, ContextRecord, FrameMarker, MarkerMint};
pub use fillin::{FillInBody, FillInObject};
pub use heap::Heap;
pub use layout::{Location, SlotLayout};
pub use object::{Body, HeapObject, ProcessRecord, SemaphoreRecord};
pub use record::SlotRecord;
pub use storage::{ArrayStorage, StorageKind};
pub use trace::{each_reference, method_references};

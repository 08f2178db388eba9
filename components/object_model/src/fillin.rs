//! Image-loader fill-in.
//!
//! The image loader hands the core, per persisted object, its class, its
//! identity hash, and either pointer fields or raw byte/word data. Fill-in
//! turns that into the adaptive storage representation: pointer data picks
//! the narrowest array kind or routes through the class layout, raw data
//! becomes fully-assigned unboxed storage.

use core_types::{ClassId, ObjectId, Value, VmError};

use crate::class::{ClassFormat, ClassTable};
use crate::heap::Heap;
use crate::object::Body;
use crate::record::SlotRecord;
use crate::storage::ArrayStorage;

/// Payload of one persisted object.
#[derive(Debug, Clone)]
pub enum FillInBody {
    /// Pointer fields, in slot order
    Pointers(Vec<Value>),
    /// Raw byte data
    Bytes(Vec<u8>),
    /// Raw word data
    Words(Vec<i64>),
}

/// One persisted object as delivered by the image loader.
#[derive(Debug, Clone)]
pub struct FillInObject {
    /// The object's class
    pub class: ClassId,
    /// Persisted identity hash
    pub identity_hash: u32,
    /// Persisted contents
    pub body: FillInBody,
}

impl Heap {
    /// Materialize one persisted object.
    pub fn fill_in(
        &mut self,
        classes: &ClassTable,
        object: FillInObject,
    ) -> Result<ObjectId, VmError> {
        let class = classes.get(object.class);
        let body = match (class.format(), object.body) {
            (ClassFormat::Fixed { .. }, FillInBody::Pointers(values)) => {
                if values.len() != class.format().inst_size() {
                    return Err(VmError::Invariant(
                        "fill-in pointer count differs from declared instance size",
                    ));
                }
                let mut record = SlotRecord::new(class.current_layout());
                for (slot, value) in values.into_iter().enumerate() {
                    class.write_instance_slot(&mut record, slot, value)?;
                }
                Body::Slots(record)
            }
            (_, FillInBody::Pointers(values)) => {
                Body::Array(ArrayStorage::from_values(values))
            }
            (_, FillInBody::Bytes(bytes)) => Body::Array(ArrayStorage::from_values(
                bytes.into_iter().map(|b| Value::SmallInt(b as i64)).collect(),
            )),
            (_, FillInBody::Words(words)) => Body::Array(ArrayStorage::from_values(
                words.into_iter().map(Value::SmallInt).collect(),
            )),
        };
        Ok(self.allocate_with_hash(object.class, object.identity_hash, body))
    }
}

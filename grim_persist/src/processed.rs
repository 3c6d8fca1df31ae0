use serde::Serialize;

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::GraphError;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_ARRAY: u8 = 0x05;
const TAG_TABLE: u8 = 0x06;
const TAG_INSTANCE: u8 = 0x07;
const TAG_CLASS: u8 = 0x08;
const TAG_CLOSURE: u8 = 0x09;
const TAG_NATIVE_CLOSURE: u8 = 0x0a;

/// Reference kinds that travel as an index into a per-kind table.
///
/// Script and native closures share the closure table; the tag only records
/// which flavour was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    String,
    Array,
    Table,
    Instance,
    Class,
    Closure,
    NativeClosure,
}

impl RefKind {
    fn tag(self) -> u8 {
        match self {
            RefKind::String => TAG_STRING,
            RefKind::Array => TAG_ARRAY,
            RefKind::Table => TAG_TABLE,
            RefKind::Instance => TAG_INSTANCE,
            RefKind::Class => TAG_CLASS,
            RefKind::Closure => TAG_CLOSURE,
            RefKind::NativeClosure => TAG_NATIVE_CLOSURE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: RefKind,
    pub index: u32,
    pub is_weak: bool,
}

/// Compact descriptor for one value met while walking the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessedObject {
    Null,
    Bool(bool),
    Int(i32),
    Float(f32),
    Ref(ObjectRef),
}

impl ProcessedObject {
    pub fn strong(kind: RefKind, index: u32) -> Self {
        ProcessedObject::Ref(ObjectRef {
            kind,
            index,
            is_weak: false,
        })
    }

    /// Same reference with the weak flag set. Scalars are unaffected.
    pub fn into_weak(self) -> Self {
        match self {
            ProcessedObject::Ref(reference) => ProcessedObject::Ref(ObjectRef {
                is_weak: true,
                ..reference
            }),
            other => other,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ProcessedObject::Ref(_))
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        match *self {
            ProcessedObject::Null => writer.put_u8(TAG_NULL),
            ProcessedObject::Bool(value) => {
                writer.put_u8(TAG_BOOL);
                writer.put_bool(value);
            }
            ProcessedObject::Int(value) => {
                writer.put_u8(TAG_INT);
                writer.put_i32(value);
            }
            ProcessedObject::Float(value) => {
                writer.put_u8(TAG_FLOAT);
                writer.put_f32(value);
            }
            ProcessedObject::Ref(reference) => {
                writer.put_u8(reference.kind.tag());
                writer.put_bool(reference.is_weak);
                writer.put_u32(reference.index);
            }
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, GraphError> {
        let tag = reader.get_u8()?;
        let kind = match tag {
            TAG_NULL => return Ok(ProcessedObject::Null),
            TAG_BOOL => return Ok(ProcessedObject::Bool(reader.get_bool()?)),
            TAG_INT => return Ok(ProcessedObject::Int(reader.get_i32()?)),
            TAG_FLOAT => return Ok(ProcessedObject::Float(reader.get_f32()?)),
            TAG_STRING => RefKind::String,
            TAG_ARRAY => RefKind::Array,
            TAG_TABLE => RefKind::Table,
            TAG_INSTANCE => RefKind::Instance,
            TAG_CLASS => RefKind::Class,
            TAG_CLOSURE => RefKind::Closure,
            TAG_NATIVE_CLOSURE => RefKind::NativeClosure,
            other => return Err(GraphError::UnknownObjectTag(other)),
        };
        let is_weak = reader.get_bool()?;
        let index = reader.get_u32()?;
        Ok(ProcessedObject::Ref(ObjectRef {
            kind,
            index,
            is_weak,
        }))
    }
}

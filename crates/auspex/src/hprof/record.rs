use serde::{Deserialize, Serialize};

use crate::graph::fields::HeapValue;
use crate::hprof::tag::{FieldType, GcRootKind, PrimitiveType};

/// A gc root as found in a heap dump segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GcRoot {
    pub kind: GcRootKind,
    pub id: u64,
    /// Serial number of the owning thread for thread bound roots
    pub thread_serial: Option<u32>,
}

impl GcRoot {
    pub fn new(kind: GcRootKind, id: u64) -> Self {
        Self { kind, id, thread_serial: None }
    }

    pub fn with_thread(kind: GcRootKind, id: u64, thread_serial: u32) -> Self {
        Self { kind, id, thread_serial: Some(thread_serial) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringRecord {
    pub id: u64,
    pub string: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadClassRecord {
    pub class_serial: u32,
    pub id: u64,
    pub stack_trace_serial: u32,
    pub class_name_string_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackFrameRecord {
    pub id: u64,
    pub method_name_string_id: u64,
    pub method_signature_string_id: u64,
    pub source_file_string_id: u64,
    pub class_serial: u32,
    pub line_number: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackTraceRecord {
    pub serial: u32,
    pub thread_serial: u32,
    pub frame_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapDumpInfoRecord {
    pub heap_id: u32,
    pub heap_name_string_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticFieldRecord {
    pub name_string_id: u64,
    pub field_type: FieldType,
    pub value: HeapValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRecord {
    pub name_string_id: u64,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDumpRecord {
    pub id: u64,
    pub stack_trace_serial: u32,
    pub super_class_id: u64,
    pub class_loader_id: u64,
    pub signers_id: u64,
    pub protection_domain_id: u64,
    pub instance_size: u32,
    pub static_fields: Vec<StaticFieldRecord>,
    pub fields: Vec<FieldRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDumpRecord {
    pub id: u64,
    pub stack_trace_serial: u32,
    pub class_id: u64,
    /// Raw field values, subclass first
    pub field_values: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectArrayDumpRecord {
    pub id: u64,
    pub stack_trace_serial: u32,
    pub array_class_id: u64,
    pub elements: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveArrayData {
    Boolean(Vec<bool>),
    Char(Vec<u16>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
}

impl PrimitiveArrayData {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            PrimitiveArrayData::Boolean(_) => PrimitiveType::Boolean,
            PrimitiveArrayData::Char(_) => PrimitiveType::Char,
            PrimitiveArrayData::Float(_) => PrimitiveType::Float,
            PrimitiveArrayData::Double(_) => PrimitiveType::Double,
            PrimitiveArrayData::Byte(_) => PrimitiveType::Byte,
            PrimitiveArrayData::Short(_) => PrimitiveType::Short,
            PrimitiveArrayData::Int(_) => PrimitiveType::Int,
            PrimitiveArrayData::Long(_) => PrimitiveType::Long,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PrimitiveArrayData::Boolean(v) => v.len(),
            PrimitiveArrayData::Char(v) => v.len(),
            PrimitiveArrayData::Float(v) => v.len(),
            PrimitiveArrayData::Double(v) => v.len(),
            PrimitiveArrayData::Byte(v) => v.len(),
            PrimitiveArrayData::Short(v) => v.len(),
            PrimitiveArrayData::Int(v) => v.len(),
            PrimitiveArrayData::Long(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveArrayDumpRecord {
    pub id: u64,
    pub stack_trace_serial: u32,
    pub data: PrimitiveArrayData,
}

/// Records with an object id, as re-read through the heap graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRecord {
    Class(ClassDumpRecord),
    Instance(InstanceDumpRecord),
    ObjectArray(ObjectArrayDumpRecord),
    PrimitiveArray(PrimitiveArrayDumpRecord),
}

impl ObjectRecord {
    pub fn id(&self) -> u64 {
        match self {
            ObjectRecord::Class(r) => r.id,
            ObjectRecord::Instance(r) => r.id,
            ObjectRecord::ObjectArray(r) => r.id,
            ObjectRecord::PrimitiveArray(r) => r.id,
        }
    }
}

/// Every record kind the streaming reader can deliver. Heap dump segments
/// are flattened into their sub-records.
#[derive(Debug, Clone, PartialEq)]
pub enum HprofRecord {
    String(StringRecord),
    LoadClass(LoadClassRecord),
    StackFrame(StackFrameRecord),
    StackTrace(StackTraceRecord),
    GcRoot(GcRoot),
    HeapDumpInfo(HeapDumpInfoRecord),
    Object(ObjectRecord),
    HeapDumpEnd,
}

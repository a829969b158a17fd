use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Top level record tags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordTag {
    StringInUtf8,
    LoadClass,
    UnloadClass,
    StackFrame,
    StackTrace,
    AllocSites,
    HeapSummary,
    StartThread,
    EndThread,
    HeapDump,
    CpuSamples,
    ControlSettings,
    HeapDumpSegment,
    HeapDumpEnd,
}

impl RecordTag {
    pub const fn tag(self) -> u8 {
        match self {
            RecordTag::StringInUtf8 => 0x01,
            RecordTag::LoadClass => 0x02,
            RecordTag::UnloadClass => 0x03,
            RecordTag::StackFrame => 0x04,
            RecordTag::StackTrace => 0x05,
            RecordTag::AllocSites => 0x06,
            RecordTag::HeapSummary => 0x07,
            RecordTag::StartThread => 0x0a,
            RecordTag::EndThread => 0x0b,
            RecordTag::HeapDump => 0x0c,
            RecordTag::CpuSamples => 0x0d,
            RecordTag::ControlSettings => 0x0e,
            RecordTag::HeapDumpSegment => 0x1c,
            RecordTag::HeapDumpEnd => 0x2c,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => RecordTag::StringInUtf8,
            0x02 => RecordTag::LoadClass,
            0x03 => RecordTag::UnloadClass,
            0x04 => RecordTag::StackFrame,
            0x05 => RecordTag::StackTrace,
            0x06 => RecordTag::AllocSites,
            0x07 => RecordTag::HeapSummary,
            0x0a => RecordTag::StartThread,
            0x0b => RecordTag::EndThread,
            0x0c => RecordTag::HeapDump,
            0x0d => RecordTag::CpuSamples,
            0x0e => RecordTag::ControlSettings,
            0x1c => RecordTag::HeapDumpSegment,
            0x2c => RecordTag::HeapDumpEnd,
            _ => return None,
        })
    }
}

/// The kinds of gc roots found in heap dump segments, including the Android
/// extensions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcRootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
    InternedString,
    Finalizing,
    Debugger,
    ReferenceCleanup,
    VmInternal,
    JniMonitor,
    Unreachable,
}

impl GcRootKind {
    pub const ALL: [GcRootKind; 16] = [
        GcRootKind::Unknown,
        GcRootKind::JniGlobal,
        GcRootKind::JniLocal,
        GcRootKind::JavaFrame,
        GcRootKind::NativeStack,
        GcRootKind::StickyClass,
        GcRootKind::ThreadBlock,
        GcRootKind::MonitorUsed,
        GcRootKind::ThreadObject,
        GcRootKind::InternedString,
        GcRootKind::Finalizing,
        GcRootKind::Debugger,
        GcRootKind::ReferenceCleanup,
        GcRootKind::VmInternal,
        GcRootKind::JniMonitor,
        GcRootKind::Unreachable,
    ];

    pub const fn tag(self) -> u8 {
        match self {
            GcRootKind::Unknown => 0xff,
            GcRootKind::JniGlobal => 0x01,
            GcRootKind::JniLocal => 0x02,
            GcRootKind::JavaFrame => 0x03,
            GcRootKind::NativeStack => 0x04,
            GcRootKind::StickyClass => 0x05,
            GcRootKind::ThreadBlock => 0x06,
            GcRootKind::MonitorUsed => 0x07,
            GcRootKind::ThreadObject => 0x08,
            GcRootKind::InternedString => 0x89,
            GcRootKind::Finalizing => 0x8a,
            GcRootKind::Debugger => 0x8b,
            GcRootKind::ReferenceCleanup => 0x8c,
            GcRootKind::VmInternal => 0x8d,
            GcRootKind::JniMonitor => 0x8e,
            GcRootKind::Unreachable => 0x90,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        GcRootKind::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Canonical name, used to order roots before the path search.
    pub const fn name(self) -> &'static str {
        match self {
            GcRootKind::Unknown => "Unknown",
            GcRootKind::JniGlobal => "JniGlobal",
            GcRootKind::JniLocal => "JniLocal",
            GcRootKind::JavaFrame => "JavaFrame",
            GcRootKind::NativeStack => "NativeStack",
            GcRootKind::StickyClass => "StickyClass",
            GcRootKind::ThreadBlock => "ThreadBlock",
            GcRootKind::MonitorUsed => "MonitorUsed",
            GcRootKind::ThreadObject => "ThreadObject",
            GcRootKind::InternedString => "InternedString",
            GcRootKind::Finalizing => "Finalizing",
            GcRootKind::Debugger => "Debugger",
            GcRootKind::ReferenceCleanup => "ReferenceCleanup",
            GcRootKind::VmInternal => "VmInternal",
            GcRootKind::JniMonitor => "JniMonitor",
            GcRootKind::Unreachable => "Unreachable",
        }
    }

    /// Human readable description used in reports.
    pub const fn description(self) -> &'static str {
        match self {
            GcRootKind::Unknown => "Unknown",
            GcRootKind::JniGlobal => "Global variable in native code",
            GcRootKind::JniLocal => "Local variable in native code",
            GcRootKind::JavaFrame => "Java local variable",
            GcRootKind::NativeStack => "Input or output parameters in native code",
            GcRootKind::StickyClass => "System class",
            GcRootKind::ThreadBlock => "Thread block",
            GcRootKind::MonitorUsed => concat!(
                "Monitor (anything that called the wait() or notify() methods, ",
                "or that is synchronized.)"
            ),
            GcRootKind::ThreadObject => "Thread object",
            GcRootKind::InternedString => "Interned string",
            GcRootKind::Finalizing => "Finalizing",
            GcRootKind::Debugger => "Debugger",
            GcRootKind::ReferenceCleanup => "Reference cleanup",
            GcRootKind::VmInternal => "VM internal",
            GcRootKind::JniMonitor => "Root JNI monitor",
            GcRootKind::Unreachable => "Unreachable",
        }
    }
}

/// Heap dump sub-record tags that are not gc roots.
pub const HEAP_DUMP_INFO: u8 = 0xfe;
pub const CLASS_DUMP: u8 = 0x20;
pub const INSTANCE_DUMP: u8 = 0x21;
pub const OBJECT_ARRAY_DUMP: u8 = 0x22;
pub const PRIMITIVE_ARRAY_DUMP: u8 = 0x23;
pub const PRIMITIVE_ARRAY_NODATA: u8 = 0xc3;

/// Value types used by field descriptors and primitive arrays.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

/// hprof type of object references in field descriptors
pub const REFERENCE_TYPE: u8 = 2;

impl PrimitiveType {
    pub const fn hprof_type(self) -> u8 {
        match self {
            PrimitiveType::Boolean => 4,
            PrimitiveType::Char => 5,
            PrimitiveType::Float => 6,
            PrimitiveType::Double => 7,
            PrimitiveType::Byte => 8,
            PrimitiveType::Short => 9,
            PrimitiveType::Int => 10,
            PrimitiveType::Long => 11,
        }
    }

    pub fn from_hprof_type(value: u8) -> Result<Self, FormatError> {
        Ok(match value {
            4 => PrimitiveType::Boolean,
            5 => PrimitiveType::Char,
            6 => PrimitiveType::Float,
            7 => PrimitiveType::Double,
            8 => PrimitiveType::Byte,
            9 => PrimitiveType::Short,
            10 => PrimitiveType::Int,
            11 => PrimitiveType::Long,
            other => return Err(FormatError::UnknownFieldType(other)),
        })
    }

    pub const fn byte_size(self) -> usize {
        match self {
            PrimitiveType::Boolean | PrimitiveType::Byte => 1,
            PrimitiveType::Char | PrimitiveType::Short => 2,
            PrimitiveType::Float | PrimitiveType::Int => 4,
            PrimitiveType::Double | PrimitiveType::Long => 8,
        }
    }

    /// Java spelling, as used for primitive array class names.
    pub const fn java_name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Char => "char",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
        }
    }
}

/// Type of a declared field: a reference or a primitive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Reference,
    Primitive(PrimitiveType),
}

impl FieldType {
    pub fn from_hprof_type(value: u8) -> Result<Self, FormatError> {
        if value == REFERENCE_TYPE {
            Ok(FieldType::Reference)
        } else {
            PrimitiveType::from_hprof_type(value).map(FieldType::Primitive)
        }
    }

    pub const fn hprof_type(self) -> u8 {
        match self {
            FieldType::Reference => REFERENCE_TYPE,
            FieldType::Primitive(primitive) => primitive.hprof_type(),
        }
    }

    pub const fn byte_size(self, identifier_size: usize) -> usize {
        match self {
            FieldType::Reference => identifier_size,
            FieldType::Primitive(primitive) => primitive.byte_size(),
        }
    }
}

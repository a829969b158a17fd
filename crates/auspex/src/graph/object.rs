use std::rc::Rc;

use crate::error::{FormatError, Result};
use crate::graph::fields::{FieldValuesReader, HeapValue, fields_byte_size};
use crate::graph::heap::HeapGraph;
use crate::hprof::record::{ClassDumpRecord, ObjectRecord, PrimitiveArrayData};
use crate::hprof::tag::{FieldType, PrimitiveType};

/// Per object summary kept by the index. `position` is the offset of the
/// record body, right after its sub-record tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedObject {
    Class { position: u64, super_class_id: u64, instance_size: u32 },
    Instance { position: u64, class_id: u64 },
    ObjectArray { position: u64, array_class_id: u64, length: u32 },
    PrimitiveArray { position: u64, primitive_type: PrimitiveType, length: u32 },
}

impl IndexedObject {
    pub fn position(&self) -> u64 {
        match *self {
            IndexedObject::Class { position, .. }
            | IndexedObject::Instance { position, .. }
            | IndexedObject::ObjectArray { position, .. }
            | IndexedObject::PrimitiveArray { position, .. } => position,
        }
    }
}

const UNKNOWN_CLASS: &str = "<unknown class>";

/// An object of the heap graph, resolved through the index.
#[derive(Clone, Copy)]
pub enum HeapObject<'g> {
    Class(HeapClass<'g>),
    Instance(HeapInstance<'g>),
    ObjectArray(HeapObjectArray<'g>),
    PrimitiveArray(HeapPrimitiveArray<'g>),
}

impl<'g> HeapObject<'g> {
    pub(crate) fn new(graph: &'g HeapGraph, id: u64, indexed: IndexedObject) -> Self {
        match indexed {
            IndexedObject::Class { super_class_id, instance_size, .. } => {
                HeapObject::Class(HeapClass { graph, id, super_class_id, instance_size })
            }
            IndexedObject::Instance { class_id, .. } => {
                HeapObject::Instance(HeapInstance { graph, id, class_id })
            }
            IndexedObject::ObjectArray { array_class_id, length, .. } => {
                HeapObject::ObjectArray(HeapObjectArray { graph, id, array_class_id, length })
            }
            IndexedObject::PrimitiveArray { primitive_type, length, .. } => {
                HeapObject::PrimitiveArray(HeapPrimitiveArray { graph, id, primitive_type, length })
            }
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            HeapObject::Class(o) => o.id,
            HeapObject::Instance(o) => o.id,
            HeapObject::ObjectArray(o) => o.id,
            HeapObject::PrimitiveArray(o) => o.id,
        }
    }

    /// Class name of the object; for classes, the class' own name.
    pub fn class_name(&self) -> String {
        match self {
            HeapObject::Class(o) => o.name().to_string(),
            HeapObject::Instance(o) => o.class_name().to_string(),
            HeapObject::ObjectArray(o) => o.array_class_name().to_string(),
            HeapObject::PrimitiveArray(o) => o.array_class_name(),
        }
    }

    /// Bytes taken by the object itself, excluding anything it references.
    pub fn shallow_size(&self) -> u64 {
        match self {
            HeapObject::Class(_) => 0,
            HeapObject::Instance(o) => o.shallow_size(),
            HeapObject::ObjectArray(o) => o.byte_size(),
            HeapObject::PrimitiveArray(o) => o.byte_size(),
        }
    }

    pub fn as_class(&self) -> Option<HeapClass<'g>> {
        match self {
            HeapObject::Class(o) => Some(*o),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<HeapInstance<'g>> {
        match self {
            HeapObject::Instance(o) => Some(*o),
            _ => None,
        }
    }
}

/// A field value together with the class declaring it.
#[derive(Clone, Copy)]
pub struct HeapField<'g> {
    pub declaring_class: HeapClass<'g>,
    pub name: &'g str,
    pub value: HeapValue,
}

#[derive(Clone, Copy)]
pub struct HeapClass<'g> {
    graph: &'g HeapGraph,
    id: u64,
    super_class_id: u64,
    instance_size: u32,
}

impl<'g> HeapClass<'g> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'g str {
        self.graph.index().class_name(self.id).unwrap_or(UNKNOWN_CLASS)
    }

    /// Instance size declared by the class dump.
    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    pub fn super_class(&self) -> Option<HeapClass<'g>> {
        if self.super_class_id == 0 {
            return None;
        }
        self.graph.object(self.super_class_id).and_then(|o| o.as_class())
    }

    /// This class followed by its super classes, up to the root class.
    pub fn class_hierarchy(&self) -> impl Iterator<Item = HeapClass<'g>> + use<'g> {
        std::iter::successors(Some(*self), |c| c.super_class())
    }

    pub fn is_subclass_of(&self, class_id: u64) -> bool {
        self.class_hierarchy().any(|c| c.id == class_id)
    }

    pub fn is_array_class(&self) -> bool {
        self.name().ends_with("[]")
    }

    pub fn record(&self) -> Result<Rc<ClassDumpRecord>> {
        self.graph.class_record(self.id)
    }

    /// Declared instance fields, names and types.
    pub fn declared_fields(&self) -> Result<Vec<(&'g str, FieldType)>> {
        let record = self.record()?;
        let index = self.graph.index();
        Ok(record
            .fields
            .iter()
            .map(|f| (index.field_name(f.name_string_id).unwrap_or(""), f.field_type))
            .collect())
    }

    /// Bytes taken by values of the declared fields in an instance dump.
    pub fn fields_byte_size(&self) -> Result<usize> {
        Ok(fields_byte_size(&self.record()?.fields, self.graph.identifier_size()))
    }

    pub fn static_fields(&self) -> Result<Vec<HeapField<'g>>> {
        let record = self.record()?;
        let index = self.graph.index();
        Ok(record
            .static_fields
            .iter()
            .map(|f| HeapField {
                declaring_class: *self,
                name: index.field_name(f.name_string_id).unwrap_or(""),
                value: f.value,
            })
            .collect())
    }

    pub fn read_static_field(&self, name: &str) -> Result<Option<HeapField<'g>>> {
        Ok(self.static_fields()?.into_iter().find(|f| f.name == name))
    }
}

#[derive(Clone, Copy)]
pub struct HeapInstance<'g> {
    graph: &'g HeapGraph,
    id: u64,
    class_id: u64,
}

impl<'g> HeapInstance<'g> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class_id(&self) -> u64 {
        self.class_id
    }

    pub fn class(&self) -> Result<HeapClass<'g>> {
        self.graph
            .object(self.class_id)
            .and_then(|o| o.as_class())
            .ok_or_else(|| FormatError::NotFound(self.class_id).into())
    }

    pub fn class_name(&self) -> &'g str {
        self.graph.index().class_name(self.class_id).unwrap_or(UNKNOWN_CLASS)
    }

    pub fn is_primitive_wrapper(&self) -> bool {
        self.graph.index().is_primitive_wrapper_class(self.class_id)
    }

    pub fn is_instance_of(&self, class_id: u64) -> bool {
        self.class().map(|c| c.is_subclass_of(class_id)).unwrap_or(false)
    }

    pub fn shallow_size(&self) -> u64 {
        self.class().map(|c| u64::from(c.instance_size())).unwrap_or(0)
    }

    /// Every field value across the class hierarchy, subclass fields first.
    pub fn read_fields(&self) -> Result<Vec<HeapField<'g>>> {
        let record = self.graph.read_record(self.id)?;
        let ObjectRecord::Instance(instance) = record.as_ref() else {
            return Err(FormatError::Unexpected { offset: 0, expected: "instance dump" }.into());
        };
        let index = self.graph.index();
        let identifier_size = self.graph.identifier_size();
        let mut reader = FieldValuesReader::new(&instance.field_values, identifier_size);
        let mut fields = vec![];
        for class in self.class()?.class_hierarchy() {
            let class_record = class.record()?;
            for field in &class_record.fields {
                let value = reader.read_value(field)?;
                let name = index.field_name(field.name_string_id).unwrap_or("");
                fields.push(HeapField { declaring_class: class, name, value });
            }
        }
        Ok(fields)
    }

    /// Value of `field_name` declared by the class named `class_name`.
    pub fn read_field(&self, class_name: &str, field_name: &str) -> Result<Option<HeapField<'g>>> {
        Ok(self
            .read_fields()?
            .into_iter()
            .find(|f| f.name == field_name && f.declaring_class.name() == class_name))
    }

    /// Contents of a `java.lang.String`, backed by a `char[]` or by a `byte[]`
    /// with a `coder`.
    pub fn read_as_java_string(&self) -> Result<Option<String>> {
        if self.class_name() != "java.lang.String" {
            return Ok(None);
        }
        let fields = self.read_fields()?;
        let get = |name: &str| {
            fields
                .iter()
                .find(|f| f.name == name && f.declaring_class.name() == "java.lang.String")
                .map(|f| f.value)
        };
        let Some(value_id) = get("value").and_then(|v| v.as_object_id()) else {
            return Ok(None);
        };
        let Some(HeapObject::PrimitiveArray(array)) = self.graph.object(value_id) else {
            return Ok(None);
        };
        let text = match array.read_data()? {
            PrimitiveArrayData::Char(chars) => {
                let offset = get("offset").and_then(|v| v.as_long()).unwrap_or(0).max(0) as usize;
                let count = get("count").and_then(|v| v.as_long()).map(|c| c.max(0) as usize);
                let end = count.map_or(chars.len(), |c| (offset + c).min(chars.len()));
                String::from_utf16_lossy(&chars[offset.min(end)..end])
            }
            PrimitiveArrayData::Byte(bytes) => match get("coder").and_then(|v| v.as_byte()) {
                Some(1) => {
                    let units: Vec<u16> = bytes
                        .chunks_exact(2)
                        .map(|c| u16::from_be_bytes([c[0] as u8, c[1] as u8]))
                        .collect();
                    String::from_utf16_lossy(&units)
                }
                _ => bytes.iter().map(|b| char::from(*b as u8)).collect(),
            },
            _ => return Ok(None),
        };
        Ok(Some(text))
    }
}

#[derive(Clone, Copy)]
pub struct HeapObjectArray<'g> {
    graph: &'g HeapGraph,
    id: u64,
    array_class_id: u64,
    length: u32,
}

impl<'g> HeapObjectArray<'g> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn array_class_id(&self) -> u64 {
        self.array_class_id
    }

    pub fn array_class_name(&self) -> &'g str {
        self.graph.index().class_name(self.array_class_id).unwrap_or(UNKNOWN_CLASS)
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn byte_size(&self) -> u64 {
        u64::from(self.length) * self.graph.identifier_size() as u64
    }

    /// Arrays of boxed primitives, such as `java.lang.Integer[]`.
    pub fn is_primitive_wrapper_array(&self) -> bool {
        self.graph.index().is_primitive_wrapper_class(self.array_class_id)
    }

    pub fn read_elements(&self) -> Result<Vec<u64>> {
        match self.graph.read_record(self.id)?.as_ref() {
            ObjectRecord::ObjectArray(array) => Ok(array.elements.clone()),
            _ => Err(FormatError::Unexpected { offset: 0, expected: "object array dump" }.into()),
        }
    }
}

#[derive(Clone, Copy)]
pub struct HeapPrimitiveArray<'g> {
    graph: &'g HeapGraph,
    id: u64,
    primitive_type: PrimitiveType,
    length: u32,
}

impl HeapPrimitiveArray<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    pub fn array_class_name(&self) -> String {
        format!("{}[]", self.primitive_type.java_name())
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn byte_size(&self) -> u64 {
        u64::from(self.length) * self.primitive_type.byte_size() as u64
    }

    pub fn read_data(&self) -> Result<PrimitiveArrayData> {
        match self.graph.read_record(self.id)?.as_ref() {
            ObjectRecord::PrimitiveArray(array) => Ok(array.data.clone()),
            _ => {
                Err(FormatError::Unexpected { offset: 0, expected: "primitive array dump" }.into())
            }
        }
    }
}

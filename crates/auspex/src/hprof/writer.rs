//! Encoder for synthetic snapshots.

use deku::prelude::*;
use rustc_hash::FxHashMap;

use crate::graph::fields::HeapValue;
use crate::hprof::header::{HprofHeader, HprofVersion};
use crate::hprof::reader::RecordHeader;
use crate::hprof::record::*;
use crate::hprof::tag::*;

/// Writes records in the snapshot format. Heap dump sub-records are buffered
/// and emitted as one heap dump record followed by a heap dump end record
/// whenever a top level record or the end of the snapshot follows them.
pub struct HprofWriter {
    header: HprofHeader,
    out: Vec<u8>,
    heap_dump: Vec<u8>,
}

impl HprofWriter {
    pub fn new(version: HprofVersion, identifier_size: usize, timestamp: u64) -> Self {
        let header = HprofHeader::new(version, identifier_size, timestamp);
        let mut out = vec![];
        // the raw header only holds plain integers and bytes
        out.extend(header.to_raw().to_bytes().unwrap_or_default());
        Self { header, out, heap_dump: vec![] }
    }

    pub fn identifier_size(&self) -> usize {
        self.header.identifier_size
    }

    pub fn write(&mut self, record: &HprofRecord) {
        let id_size = self.header.identifier_size;
        match record {
            HprofRecord::String(r) => {
                let mut body = vec![];
                put_id(&mut body, id_size, r.id);
                body.extend_from_slice(r.string.as_bytes());
                self.write_top_level(RecordTag::StringInUtf8, &body);
            }
            HprofRecord::LoadClass(r) => {
                let mut body = vec![];
                body.extend(r.class_serial.to_be_bytes());
                put_id(&mut body, id_size, r.id);
                body.extend(r.stack_trace_serial.to_be_bytes());
                put_id(&mut body, id_size, r.class_name_string_id);
                self.write_top_level(RecordTag::LoadClass, &body);
            }
            HprofRecord::StackFrame(r) => {
                let mut body = vec![];
                let ids = [
                    r.id,
                    r.method_name_string_id,
                    r.method_signature_string_id,
                    r.source_file_string_id,
                ];
                for id in ids {
                    put_id(&mut body, id_size, id);
                }
                body.extend(r.class_serial.to_be_bytes());
                body.extend(r.line_number.to_be_bytes());
                self.write_top_level(RecordTag::StackFrame, &body);
            }
            HprofRecord::StackTrace(r) => {
                let mut body = vec![];
                body.extend(r.serial.to_be_bytes());
                body.extend(r.thread_serial.to_be_bytes());
                body.extend((r.frame_ids.len() as u32).to_be_bytes());
                for id in &r.frame_ids {
                    put_id(&mut body, id_size, *id);
                }
                self.write_top_level(RecordTag::StackTrace, &body);
            }
            HprofRecord::GcRoot(root) => self.write_gc_root(root),
            HprofRecord::HeapDumpInfo(r) => {
                let buf = &mut self.heap_dump;
                buf.push(HEAP_DUMP_INFO);
                buf.extend(r.heap_id.to_be_bytes());
                put_id(buf, id_size, r.heap_name_string_id);
            }
            HprofRecord::Object(object) => self.write_object(object),
            HprofRecord::HeapDumpEnd => self.flush_heap_dump(),
        }
    }

    /// Appends raw bytes to the pending heap dump, for crafting corrupt input.
    pub fn write_raw_heap_dump_bytes(&mut self, bytes: &[u8]) {
        self.heap_dump.extend_from_slice(bytes);
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush_heap_dump();
        self.out
    }

    fn write_gc_root(&mut self, root: &GcRoot) {
        let id_size = self.header.identifier_size;
        let buf = &mut self.heap_dump;
        let serial = root.thread_serial.unwrap_or(0);
        buf.push(root.kind.tag());
        put_id(buf, id_size, root.id);
        match root.kind {
            GcRootKind::JniGlobal => put_id(buf, id_size, 0),
            GcRootKind::JniLocal
            | GcRootKind::JavaFrame
            | GcRootKind::JniMonitor
            | GcRootKind::ThreadObject => {
                buf.extend(serial.to_be_bytes());
                buf.extend(0u32.to_be_bytes());
            }
            GcRootKind::NativeStack | GcRootKind::ThreadBlock => buf.extend(serial.to_be_bytes()),
            _ => {}
        }
    }

    fn write_object(&mut self, object: &ObjectRecord) {
        let id_size = self.header.identifier_size;
        let buf = &mut self.heap_dump;
        match object {
            ObjectRecord::Class(r) => {
                buf.push(CLASS_DUMP);
                put_id(buf, id_size, r.id);
                buf.extend(r.stack_trace_serial.to_be_bytes());
                let ids = [
                    r.super_class_id,
                    r.class_loader_id,
                    r.signers_id,
                    r.protection_domain_id,
                    0,
                    0,
                ];
                for id in ids {
                    put_id(buf, id_size, id);
                }
                buf.extend(r.instance_size.to_be_bytes());
                // empty constant pool
                buf.extend(0u16.to_be_bytes());
                buf.extend((r.static_fields.len() as u16).to_be_bytes());
                for field in &r.static_fields {
                    put_id(buf, id_size, field.name_string_id);
                    buf.push(field.field_type.hprof_type());
                    put_value(buf, id_size, &field.value);
                }
                buf.extend((r.fields.len() as u16).to_be_bytes());
                for field in &r.fields {
                    put_id(buf, id_size, field.name_string_id);
                    buf.push(field.field_type.hprof_type());
                }
            }
            ObjectRecord::Instance(r) => {
                buf.push(INSTANCE_DUMP);
                put_id(buf, id_size, r.id);
                buf.extend(r.stack_trace_serial.to_be_bytes());
                put_id(buf, id_size, r.class_id);
                buf.extend((r.field_values.len() as u32).to_be_bytes());
                buf.extend_from_slice(&r.field_values);
            }
            ObjectRecord::ObjectArray(r) => {
                buf.push(OBJECT_ARRAY_DUMP);
                put_id(buf, id_size, r.id);
                buf.extend(r.stack_trace_serial.to_be_bytes());
                buf.extend((r.elements.len() as u32).to_be_bytes());
                put_id(buf, id_size, r.array_class_id);
                for element in &r.elements {
                    put_id(buf, id_size, *element);
                }
            }
            ObjectRecord::PrimitiveArray(r) => {
                buf.push(PRIMITIVE_ARRAY_DUMP);
                put_id(buf, id_size, r.id);
                buf.extend(r.stack_trace_serial.to_be_bytes());
                buf.extend((r.data.len() as u32).to_be_bytes());
                buf.push(r.data.primitive_type().hprof_type());
                match &r.data {
                    PrimitiveArrayData::Boolean(v) => buf.extend(v.iter().map(|b| u8::from(*b))),
                    PrimitiveArrayData::Byte(v) => buf.extend(v.iter().map(|b| *b as u8)),
                    PrimitiveArrayData::Char(v) => {
                        buf.extend(v.iter().flat_map(|c| c.to_be_bytes()))
                    }
                    PrimitiveArrayData::Short(v) => {
                        buf.extend(v.iter().flat_map(|s| s.to_be_bytes()))
                    }
                    PrimitiveArrayData::Int(v) => {
                        buf.extend(v.iter().flat_map(|i| i.to_be_bytes()))
                    }
                    PrimitiveArrayData::Long(v) => {
                        buf.extend(v.iter().flat_map(|l| l.to_be_bytes()))
                    }
                    PrimitiveArrayData::Float(v) => {
                        buf.extend(v.iter().flat_map(|f| f.to_bits().to_be_bytes()))
                    }
                    PrimitiveArrayData::Double(v) => {
                        buf.extend(v.iter().flat_map(|d| d.to_bits().to_be_bytes()))
                    }
                }
            }
        }
    }

    fn write_top_level(&mut self, tag: RecordTag, body: &[u8]) {
        self.flush_heap_dump();
        self.write_record(tag, body);
    }

    fn write_record(&mut self, tag: RecordTag, body: &[u8]) {
        let header = RecordHeader { tag: tag.tag(), time: 0, length: body.len() as u32 };
        self.out.extend(header.to_bytes().unwrap_or_default());
        self.out.extend_from_slice(body);
    }

    fn flush_heap_dump(&mut self) {
        if self.heap_dump.is_empty() {
            return;
        }
        let body = std::mem::take(&mut self.heap_dump);
        self.write_record(self.header.version.heap_dump_tag(), &body);
        self.write_record(RecordTag::HeapDumpEnd, &[]);
    }
}

fn put_id(buf: &mut Vec<u8>, identifier_size: usize, id: u64) {
    buf.extend_from_slice(&id.to_be_bytes()[8 - identifier_size..]);
}

fn put_value(buf: &mut Vec<u8>, identifier_size: usize, value: &HeapValue) {
    match *value {
        HeapValue::Reference(id) => put_id(buf, identifier_size, id),
        HeapValue::Boolean(b) => buf.push(u8::from(b)),
        HeapValue::Char(c) => buf.extend(c.to_be_bytes()),
        HeapValue::Float(f) => buf.extend(f.to_bits().to_be_bytes()),
        HeapValue::Double(d) => buf.extend(d.to_bits().to_be_bytes()),
        HeapValue::Byte(b) => buf.push(b as u8),
        HeapValue::Short(s) => buf.extend(s.to_be_bytes()),
        HeapValue::Int(i) => buf.extend(i.to_be_bytes()),
        HeapValue::Long(l) => buf.extend(l.to_be_bytes()),
    }
}

/// Encodes field values the way instance dumps carry them.
pub fn encode_values(identifier_size: usize, values: &[HeapValue]) -> Vec<u8> {
    let mut buf = vec![];
    for value in values {
        put_value(&mut buf, identifier_size, value);
    }
    buf
}

/// Builds small snapshots object by object, allocating ids and strings.
///
/// `java.lang.Object` is defined up front; classes without an explicit super
/// class extend it.
pub struct SnapshotBuilder {
    writer: HprofWriter,
    next_id: u64,
    next_class_serial: u32,
    strings: FxHashMap<String, u64>,
    classes: FxHashMap<String, u64>,
    /// declared fields and super class per class id
    layouts: FxHashMap<u64, (Vec<FieldType>, u64)>,
}

impl SnapshotBuilder {
    pub fn new(version: HprofVersion, identifier_size: usize) -> Self {
        let mut builder = Self {
            writer: HprofWriter::new(version, identifier_size, 1_700_000_000_000),
            next_id: 1,
            next_class_serial: 1,
            strings: FxHashMap::default(),
            classes: FxHashMap::default(),
            layouts: FxHashMap::default(),
        };
        let object_fields: &[(&str, FieldType)] = match version {
            HprofVersion::Android => &[
                ("shadow$_klass_", FieldType::Reference),
                ("shadow$_monitor_", FieldType::Primitive(PrimitiveType::Int)),
            ],
            _ => &[],
        };
        builder.define_class("java.lang.Object", 0, object_fields, &[]);
        builder
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn string(&mut self, value: &str) -> u64 {
        if let Some(id) = self.strings.get(value) {
            return *id;
        }
        let id = self.allocate_id();
        self.writer.write(&HprofRecord::String(StringRecord { id, string: value.to_string() }));
        self.strings.insert(value.to_string(), id);
        id
    }

    pub fn class_id(&self, name: &str) -> Option<u64> {
        self.classes.get(name).copied()
    }

    /// Defines a class extending `super_class` (`java.lang.Object` if `None`).
    pub fn class(
        &mut self,
        name: &str,
        super_class: Option<u64>,
        fields: &[(&str, FieldType)],
    ) -> u64 {
        self.class_with_statics(name, super_class, fields, &[])
    }

    pub fn class_with_statics(
        &mut self,
        name: &str,
        super_class: Option<u64>,
        fields: &[(&str, FieldType)],
        statics: &[(&str, HeapValue)],
    ) -> u64 {
        let super_class = super_class.or_else(|| self.class_id("java.lang.Object")).unwrap_or(0);
        self.define_class(name, super_class, fields, statics)
    }

    fn define_class(
        &mut self,
        name: &str,
        super_class: u64,
        fields: &[(&str, FieldType)],
        statics: &[(&str, HeapValue)],
    ) -> u64 {
        let id_size = self.writer.identifier_size();
        let id = self.allocate_id();
        let class_name_string_id = self.string(name);
        let class_serial = self.next_class_serial;
        self.next_class_serial += 1;
        self.writer.write(&HprofRecord::LoadClass(LoadClassRecord {
            class_serial,
            id,
            stack_trace_serial: 0,
            class_name_string_id,
        }));

        let static_fields = statics
            .iter()
            .map(|(field, value)| StaticFieldRecord {
                name_string_id: self.string(field),
                field_type: value.field_type(),
                value: *value,
            })
            .collect();
        let field_records: Vec<FieldRecord> = fields
            .iter()
            .map(|(field, field_type)| FieldRecord {
                name_string_id: self.string(field),
                field_type: *field_type,
            })
            .collect();
        let mut instance_size = fields.iter().map(|(_, t)| t.byte_size(id_size)).sum::<usize>();
        let mut ancestor = super_class;
        while let Some((inherited, next)) = self.layouts.get(&ancestor) {
            instance_size += inherited.iter().map(|t| t.byte_size(id_size)).sum::<usize>();
            ancestor = *next;
        }
        self.writer.write(&HprofRecord::Object(ObjectRecord::Class(ClassDumpRecord {
            id,
            stack_trace_serial: 0,
            super_class_id: super_class,
            class_loader_id: 0,
            signers_id: 0,
            protection_domain_id: 0,
            instance_size: instance_size as u32,
            static_fields,
            fields: field_records,
        })));
        self.classes.insert(name.to_string(), id);
        self.layouts.insert(id, (fields.iter().map(|(_, t)| *t).collect(), super_class));
        id
    }

    fn ensure_class(&mut self, name: &str) -> u64 {
        match self.class_id(name) {
            Some(id) => id,
            None => self.class(name, None, &[]),
        }
    }

    /// Writes an instance; `values` cover the declared fields of `class_id`
    /// first, then those of each super class.
    pub fn instance(&mut self, class_id: u64, values: &[HeapValue]) -> u64 {
        let id = self.allocate_id();
        self.instance_with_id(id, class_id, values);
        id
    }

    /// Same as [`Self::instance`] with a caller chosen id, which may clash
    /// with nothing else in the snapshot.
    pub fn instance_with_id(&mut self, id: u64, class_id: u64, values: &[HeapValue]) {
        let mut expected = 0;
        let mut class = class_id;
        while let Some((fields, super_class)) = self.layouts.get(&class) {
            expected += fields.len();
            class = *super_class;
        }
        // hierarchies defined by the caller must be complete
        debug_assert_eq!(expected, values.len(), "field values do not match the class layout");
        let field_values = encode_values(self.writer.identifier_size(), values);
        self.writer.write(&HprofRecord::Object(ObjectRecord::Instance(InstanceDumpRecord {
            id,
            stack_trace_serial: 0,
            class_id,
            field_values,
        })));
    }

    /// Writes an object array whose class is named `array_class_name`, for
    /// example `java.lang.Object[]`.
    pub fn object_array(&mut self, array_class_name: &str, elements: &[u64]) -> u64 {
        let array_class_id = self.ensure_class(array_class_name);
        let id = self.allocate_id();
        self.writer.write(&HprofRecord::Object(ObjectRecord::ObjectArray(ObjectArrayDumpRecord {
            id,
            stack_trace_serial: 0,
            array_class_id,
            elements: elements.to_vec(),
        })));
        id
    }

    pub fn primitive_array(&mut self, data: PrimitiveArrayData) -> u64 {
        let class_name = format!("{}[]", data.primitive_type().java_name());
        self.ensure_class(&class_name);
        let id = self.allocate_id();
        let record = PrimitiveArrayDumpRecord { id, stack_trace_serial: 0, data };
        self.writer.write(&HprofRecord::Object(ObjectRecord::PrimitiveArray(record)));
        id
    }

    /// Writes a `java.lang.String` backed by a `char[]`.
    pub fn string_instance(&mut self, text: &str) -> u64 {
        let class_id = match self.class_id("java.lang.String") {
            Some(id) => id,
            None => self.class(
                "java.lang.String",
                None,
                &[
                    ("value", FieldType::Reference),
                    ("hash", FieldType::Primitive(PrimitiveType::Int)),
                ],
            ),
        };
        let chars = self.primitive_array(PrimitiveArrayData::Char(text.encode_utf16().collect()));
        let mut values = vec![HeapValue::Reference(chars), HeapValue::Int(0)];
        values.extend(self.object_super_values());
        self.instance(class_id, &values)
    }

    /// Writes a `java.lang.Thread` named `name` together with its thread
    /// object root.
    pub fn thread(&mut self, name: &str, thread_serial: u32) -> u64 {
        let class_id = match self.class_id("java.lang.Thread") {
            Some(id) => id,
            None => self.class("java.lang.Thread", None, &[("name", FieldType::Reference)]),
        };
        let name_id = self.string_instance(name);
        let mut values = vec![HeapValue::Reference(name_id)];
        values.extend(self.object_super_values());
        let id = self.instance(class_id, &values);
        self.gc_root(GcRoot::with_thread(GcRootKind::ThreadObject, id, thread_serial));
        id
    }

    /// Values for the fields `java.lang.Object` declares in this flavour.
    pub fn object_super_values(&self) -> Vec<HeapValue> {
        let object = self.class_id("java.lang.Object").unwrap_or(0);
        self.layouts
            .get(&object)
            .map(|(fields, _)| fields.iter().map(|t| HeapValue::default_for(*t)).collect())
            .unwrap_or_default()
    }

    pub fn gc_root(&mut self, root: GcRoot) {
        self.writer.write(&HprofRecord::GcRoot(root));
    }

    pub fn writer(&mut self) -> &mut HprofWriter {
        &mut self.writer
    }

    pub fn build(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_id_widths() {
        let mut buf = vec![];
        put_id(&mut buf, 1, 0x12);
        put_id(&mut buf, 2, 0x1234);
        put_id(&mut buf, 4, 0x1234_5678);
        assert_eq!(buf, vec![0x12, 0x12, 0x34, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_heap_dump_flushed_before_top_level_record() {
        let mut writer = HprofWriter::new(HprofVersion::Jdk1_0_2, 4, 0);
        let start = writer.out.len();
        writer.write(&HprofRecord::GcRoot(GcRoot::new(GcRootKind::StickyClass, 7)));
        assert_eq!(writer.out.len(), start);
        writer.write(&HprofRecord::String(StringRecord { id: 1, string: "a".into() }));
        let bytes = writer.into_bytes();
        // segment(9 + 5), end(9), string(9 + 5)
        assert_eq!(bytes.len() - start, 14 + 9 + 14);
        assert_eq!(bytes[start], RecordTag::HeapDumpSegment.tag());
        assert_eq!(bytes[start + 14], RecordTag::HeapDumpEnd.tag());
        assert_eq!(bytes[start + 23], RecordTag::StringInUtf8.tag());
    }

    #[test]
    fn test_builder_object_class_layout_per_version() {
        let android = SnapshotBuilder::new(HprofVersion::Android, 4);
        assert_eq!(android.object_super_values(), vec![HeapValue::Reference(0), HeapValue::Int(0)]);
        let jdk = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        assert!(jdk.object_super_values().is_empty());
    }
}

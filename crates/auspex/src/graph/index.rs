use std::io::Read;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::GraphConfig;
use crate::error::Result;
use crate::graph::object::IndexedObject;
use crate::hprof::header::HprofHeader;
use crate::hprof::reader::{HprofRecordReader, RecordType, read_records};
use crate::hprof::record::GcRoot;
use crate::hprof::tag::{GcRootKind, PrimitiveType};

/// Boxed primitive classes, skipped by the scanner and the path finder.
pub static PRIMITIVE_WRAPPER_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "java.lang.Boolean",
        "java.lang.Character",
        "java.lang.Float",
        "java.lang.Double",
        "java.lang.Byte",
        "java.lang.Short",
        "java.lang.Integer",
        "java.lang.Long",
    ]
});

/// Turns JVM class descriptors into source names: `java/lang/String` becomes
/// `java.lang.String`, `[[I` becomes `int[][]` and `[Ljava/lang/Object;`
/// becomes `java.lang.Object[]`. Names already in that form are kept.
pub fn normalize_class_name(name: &str) -> String {
    let dimensions = name.bytes().take_while(|b| *b == b'[').count();
    if dimensions == 0 {
        return name.replace('/', ".");
    }
    let element = &name[dimensions..];
    let base = match element.as_bytes().first() {
        Some(b'L') => element[1..].trim_end_matches(';').replace('/', "."),
        Some(b'Z') if element.len() == 1 => "boolean".to_string(),
        Some(b'C') if element.len() == 1 => "char".to_string(),
        Some(b'F') if element.len() == 1 => "float".to_string(),
        Some(b'D') if element.len() == 1 => "double".to_string(),
        Some(b'B') if element.len() == 1 => "byte".to_string(),
        Some(b'S') if element.len() == 1 => "short".to_string(),
        Some(b'I') if element.len() == 1 => "int".to_string(),
        Some(b'J') if element.len() == 1 => "long".to_string(),
        _ => element.replace('/', "."),
    };
    format!("{base}{}", "[]".repeat(dimensions))
}

/// Compact in-memory tables built in one streaming pass over a snapshot.
///
/// Only per-object summaries are held; full records are re-read through
/// their stored offsets.
#[derive(Debug)]
pub struct HprofIndex {
    header: HprofHeader,
    /// Sorted by object id
    objects: Vec<(u64, IndexedObject)>,
    class_names: FxHashMap<u64, String>,
    class_ids: FxHashMap<String, u64>,
    /// Strings used as field names, keyed by string id
    strings: FxHashMap<u64, String>,
    gc_roots: Vec<GcRoot>,
    threads: FxHashMap<u32, u64>,
    primitive_wrapper_class_ids: FxHashSet<u64>,
    dropped_gc_roots: usize,
}

impl HprofIndex {
    /// Indexes the snapshot behind `reader`, positioned right after `header`.
    pub fn build<R: Read>(
        reader: &mut HprofRecordReader<R>,
        header: HprofHeader,
        config: &GraphConfig,
    ) -> Result<Self> {
        let mut strings = FxHashMap::default();
        let mut class_name_string_ids = FxHashMap::default();
        let mut field_name_string_ids = FxHashSet::default();
        let mut objects = vec![];
        let mut gc_roots = vec![];
        let mut threads = FxHashMap::default();

        let mut wanted = vec![RecordType::String, RecordType::LoadClass];
        wanted.extend(RecordType::OBJECTS);
        wanted.extend(GcRootKind::ALL.into_iter().map(RecordType::GcRoot));

        let bytes = read_records(reader, &header, &wanted, |record_type, length, reader| {
            match record_type {
                RecordType::String => {
                    let record = reader.read_string_record(length.unwrap_or_default())?;
                    strings.insert(record.id, record.string);
                }
                RecordType::LoadClass => {
                    let record = reader.read_load_class_record()?;
                    class_name_string_ids.insert(record.id, record.class_name_string_id);
                }
                RecordType::GcRoot(kind) => {
                    let root = reader.read_gc_root(kind)?;
                    if kind == GcRootKind::ThreadObject
                        && let Some(serial) = root.thread_serial
                    {
                        threads.insert(serial, root.id);
                    }
                    if config.indexed_gc_roots.contains(&kind) {
                        gc_roots.push(root);
                    }
                }
                RecordType::ClassDump => {
                    let position = reader.bytes_read();
                    let record = reader.read_class_dump_record()?;
                    let names = record.fields.iter().map(|f| f.name_string_id);
                    field_name_string_ids.extend(names);
                    let static_names = record.static_fields.iter().map(|f| f.name_string_id);
                    field_name_string_ids.extend(static_names);
                    objects.push((
                        record.id,
                        IndexedObject::Class {
                            position,
                            super_class_id: record.super_class_id,
                            instance_size: record.instance_size,
                        },
                    ));
                }
                RecordType::InstanceDump => {
                    let position = reader.bytes_read();
                    let id = reader.read_id()?;
                    reader.read_u32()?;
                    let class_id = reader.read_id()?;
                    let length = reader.read_u32()?;
                    reader.skip(u64::from(length))?;
                    objects.push((id, IndexedObject::Instance { position, class_id }));
                }
                RecordType::ObjectArrayDump => {
                    let position = reader.bytes_read();
                    let id = reader.read_id()?;
                    reader.read_u32()?;
                    let length = reader.read_u32()?;
                    let array_class_id = reader.read_id()?;
                    reader.skip(u64::from(length) * reader.identifier_size() as u64)?;
                    let array = IndexedObject::ObjectArray { position, array_class_id, length };
                    objects.push((id, array));
                }
                RecordType::PrimitiveArrayDump => {
                    let position = reader.bytes_read();
                    let id = reader.read_id()?;
                    reader.read_u32()?;
                    let length = reader.read_u32()?;
                    let primitive_type = PrimitiveType::from_hprof_type(reader.read_u8()?)?;
                    reader.skip(u64::from(length) * primitive_type.byte_size() as u64)?;
                    let array = IndexedObject::PrimitiveArray { position, primitive_type, length };
                    objects.push((id, array));
                }
                _ => {}
            }
            Ok(())
        })?;
        debug!("indexed {bytes} bytes");

        objects.sort_by_key(|(id, _)| *id);
        let before = objects.len();
        objects.dedup_by_key(|(id, _)| *id);
        if objects.len() != before {
            warn!("{} duplicate object records ignored", before - objects.len());
        }

        let mut class_names = FxHashMap::default();
        let mut class_ids = FxHashMap::default();
        for (class_id, string_id) in class_name_string_ids {
            match strings.get(&string_id) {
                Some(name) => {
                    let name = normalize_class_name(name);
                    class_ids.insert(name.clone(), class_id);
                    class_names.insert(class_id, name);
                }
                None => warn!("class 0x{class_id:x} names missing string 0x{string_id:x}"),
            }
        }
        strings.retain(|id, _| field_name_string_ids.contains(id));

        let primitive_wrapper_class_ids = PRIMITIVE_WRAPPER_NAMES
            .iter()
            .flat_map(|name| [name.to_string(), format!("{name}[]")])
            .filter_map(|name| class_ids.get(&name).copied())
            .collect();

        let mut index = Self {
            header,
            objects,
            class_names,
            class_ids,
            strings,
            gc_roots: vec![],
            threads,
            primitive_wrapper_class_ids,
            dropped_gc_roots: 0,
        };
        index.gc_roots = index.keep_existing_roots(gc_roots);

        info!(
            "indexed {} objects, {} classes, {} gc roots ({} dropped)",
            index.objects.len(),
            index.class_names.len(),
            index.gc_roots.len(),
            index.dropped_gc_roots
        );
        Ok(index)
    }

    fn keep_existing_roots(&mut self, roots: Vec<GcRoot>) -> Vec<GcRoot> {
        let mut seen = FxHashSet::default();
        let mut kept = Vec::with_capacity(roots.len());
        for root in roots {
            if !self.contains(root.id) {
                warn!("{} root points to missing object 0x{:x}", root.kind.name(), root.id);
                self.dropped_gc_roots += 1;
                continue;
            }
            if seen.insert(root) {
                kept.push(root);
            }
        }
        kept
    }

    pub fn header(&self) -> &HprofHeader {
        &self.header
    }

    pub fn identifier_size(&self) -> usize {
        self.header.identifier_size
    }

    pub fn gc_roots(&self) -> &[GcRoot] {
        &self.gc_roots
    }

    /// Roots dropped because they point outside the object set.
    pub fn dropped_gc_roots(&self) -> usize {
        self.dropped_gc_roots
    }

    pub fn object(&self, id: u64) -> Option<IndexedObject> {
        self.objects
            .binary_search_by_key(&id, |(object_id, _)| *object_id)
            .ok()
            .map(|i| self.objects[i].1)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.object(id).is_some()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn objects(&self) -> impl Iterator<Item = (u64, IndexedObject)> + '_ {
        self.objects.iter().copied()
    }

    pub fn classes(&self) -> impl Iterator<Item = (u64, IndexedObject)> + '_ {
        self.objects().filter(|(_, o)| matches!(o, IndexedObject::Class { .. }))
    }

    pub fn instances(&self) -> impl Iterator<Item = (u64, IndexedObject)> + '_ {
        self.objects().filter(|(_, o)| matches!(o, IndexedObject::Instance { .. }))
    }

    pub fn object_arrays(&self) -> impl Iterator<Item = (u64, IndexedObject)> + '_ {
        self.objects().filter(|(_, o)| matches!(o, IndexedObject::ObjectArray { .. }))
    }

    pub fn primitive_arrays(&self) -> impl Iterator<Item = (u64, IndexedObject)> + '_ {
        self.objects().filter(|(_, o)| matches!(o, IndexedObject::PrimitiveArray { .. }))
    }

    pub fn class_name(&self, class_id: u64) -> Option<&str> {
        self.class_names.get(&class_id).map(String::as_str)
    }

    pub fn class_id(&self, name: &str) -> Option<u64> {
        self.class_ids.get(name).copied()
    }

    /// Field name for a string id found in a class dump.
    pub fn field_name(&self, string_id: u64) -> Option<&str> {
        self.strings.get(&string_id).map(String::as_str)
    }

    pub fn is_primitive_wrapper_class(&self, class_id: u64) -> bool {
        self.primitive_wrapper_class_ids.contains(&class_id)
    }

    /// Thread object for a thread serial number, from thread object roots.
    pub fn thread_object(&self, thread_serial: u32) -> Option<u64> {
        self.threads.get(&thread_serial).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fields::HeapValue;
    use crate::hprof::header::HprofVersion;
    use crate::hprof::record::PrimitiveArrayData;
    use crate::hprof::tag::FieldType;
    use crate::hprof::writer::SnapshotBuilder;
    use rstest::rstest;

    fn index(bytes: &[u8]) -> HprofIndex {
        let mut reader = HprofRecordReader::new(bytes, 8);
        let header = HprofHeader::read(&mut reader).unwrap();
        reader.set_identifier_size(header.identifier_size);
        HprofIndex::build(&mut reader, header, &GraphConfig::default()).unwrap()
    }

    #[rstest]
    #[case("java/lang/String", "java.lang.String")]
    #[case("java.lang.String", "java.lang.String")]
    #[case("[I", "int[]")]
    #[case("[[J", "long[][]")]
    #[case("[Ljava/lang/Object;", "java.lang.Object[]")]
    #[case("java.lang.Object[]", "java.lang.Object[]")]
    fn test_normalize_class_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_class_name(input), expected);
    }

    #[test]
    fn test_index_tables() {
        let mut builder = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let a = builder.class("com.example.A", None, &[("next", FieldType::Reference)]);
        let wrapper = builder.class("java.lang.Integer", None, &[]);
        let instance = builder.instance(a, &[HeapValue::Reference(0)]);
        let array = builder.primitive_array(PrimitiveArrayData::Byte(vec![1, 2, 3]));
        builder.gc_root(GcRoot::new(GcRootKind::StickyClass, a));
        builder.gc_root(GcRoot::new(GcRootKind::StickyClass, a));
        builder.gc_root(GcRoot::new(GcRootKind::JniGlobal, 999));
        // not indexed by default
        builder.gc_root(GcRoot::new(GcRootKind::Unknown, instance));
        let index = index(&builder.build());

        assert_eq!(index.class_id("com.example.A"), Some(a));
        assert_eq!(index.class_name(a), Some("com.example.A"));
        assert!(index.is_primitive_wrapper_class(wrapper));
        assert!(!index.is_primitive_wrapper_class(a));
        assert!(matches!(
            index.object(instance),
            Some(IndexedObject::Instance { class_id, .. }) if class_id == a
        ));
        assert!(matches!(
            index.object(array),
            Some(IndexedObject::PrimitiveArray {
                primitive_type: PrimitiveType::Byte,
                length: 3,
                ..
            })
        ));
        assert_eq!(index.gc_roots(), &[GcRoot::new(GcRootKind::StickyClass, a)]);
        assert_eq!(index.dropped_gc_roots(), 1);
        assert_eq!(index.instances().count(), 1);
        assert_eq!(index.primitive_arrays().count(), 1);
        // java.lang.Object, A, Integer, byte[]
        assert_eq!(index.classes().count(), 4);
        assert!(index.object(123_456).is_none());
    }

    #[test]
    fn test_index_keeps_field_names_only() {
        let mut builder = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 4);
        let unrelated = builder.string("not a field");
        let int = FieldType::Primitive(PrimitiveType::Int);
        let class = builder.class("com.example.B", None, &[("size", int)]);
        builder.gc_root(GcRoot::new(GcRootKind::StickyClass, class));
        let index = index(&builder.build());
        assert!(index.field_name(unrelated).is_none());
        assert!(index.strings.values().any(|s| s == "size"));
    }

    #[test]
    fn test_thread_serials() {
        let mut builder = SnapshotBuilder::new(HprofVersion::Jdk1_0_2, 8);
        let thread = builder.thread("main", 7);
        let index = index(&builder.build());
        assert_eq!(index.thread_object(7), Some(thread));
        assert_eq!(index.thread_object(8), None);
    }
}

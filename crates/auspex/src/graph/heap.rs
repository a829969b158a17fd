use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use log::{debug, trace};
use lru::LruCache;
use rustc_hash::FxHashMap;

use crate::config::GraphConfig;
use crate::error::{FormatError, Result};
use crate::graph::index::HprofIndex;
use crate::graph::object::{
    HeapClass, HeapInstance, HeapObject, HeapObjectArray, HeapPrimitiveArray, IndexedObject,
};
use crate::hprof::header::HprofHeader;
use crate::hprof::reader::{
    ByteSource, HprofRecordReader, ReadSeek, RecordType, open_stream, read_object_record,
};
use crate::hprof::record::{ClassDumpRecord, GcRoot, ObjectRecord};

/// Queryable heap: the index plus on demand decoding of full records through
/// a random access reader.
///
/// Read-only once built. Decoded records are kept in a bounded LRU cache and
/// class records in an unbounded per class cache.
pub struct HeapGraph {
    index: HprofIndex,
    reader: RefCell<HprofRecordReader<Box<dyn ReadSeek>>>,
    object_cache: RefCell<LruCache<u64, Rc<ObjectRecord>>>,
    class_cache: RefCell<FxHashMap<u64, Rc<ClassDumpRecord>>>,
}

impl HeapGraph {
    /// Indexes `source` in a streaming pass, then opens it for random access.
    pub fn open(source: &dyn ByteSource, config: &GraphConfig) -> Result<Self> {
        let (header, mut stream) = open_stream(source)?;
        debug!("snapshot {:?}, identifiers of {} bytes", header.version, header.identifier_size);
        let index = HprofIndex::build(&mut stream, header, config)?;
        let random = source.open_random_access()?;
        Ok(Self::new(index, random, config.object_cache_capacity))
    }

    pub fn new(index: HprofIndex, random: Box<dyn ReadSeek>, cache_capacity: usize) -> Self {
        let reader = HprofRecordReader::new(random, index.identifier_size());
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            index,
            reader: RefCell::new(reader),
            object_cache: RefCell::new(LruCache::new(capacity)),
            class_cache: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn index(&self) -> &HprofIndex {
        &self.index
    }

    pub fn header(&self) -> &HprofHeader {
        self.index.header()
    }

    pub fn identifier_size(&self) -> usize {
        self.index.identifier_size()
    }

    pub fn gc_roots(&self) -> &[GcRoot] {
        self.index.gc_roots()
    }

    pub fn object_exists(&self, id: u64) -> bool {
        self.index.contains(id)
    }

    /// The object with `id`, `None` when the index does not hold it.
    pub fn object(&self, id: u64) -> Option<HeapObject<'_>> {
        self.index.object(id).map(|indexed| HeapObject::new(self, id, indexed))
    }

    pub fn find_object_by_id(&self, id: u64) -> Result<HeapObject<'_>> {
        self.object(id).ok_or_else(|| FormatError::NotFound(id).into())
    }

    pub fn find_class_by_name(&self, name: &str) -> Option<HeapClass<'_>> {
        self.index.class_id(name).and_then(|id| self.object(id)).and_then(|o| o.as_class())
    }

    pub fn classes(&self) -> impl Iterator<Item = HeapClass<'_>> {
        self.index.classes().filter_map(|(id, o)| HeapObject::new(self, id, o).as_class())
    }

    pub fn instances(&self) -> impl Iterator<Item = HeapInstance<'_>> {
        self.index.instances().filter_map(|(id, o)| HeapObject::new(self, id, o).as_instance())
    }

    pub fn object_arrays(&self) -> impl Iterator<Item = HeapObjectArray<'_>> {
        self.index.object_arrays().filter_map(|(id, o)| match HeapObject::new(self, id, o) {
            HeapObject::ObjectArray(array) => Some(array),
            _ => None,
        })
    }

    pub fn primitive_arrays(&self) -> impl Iterator<Item = HeapPrimitiveArray<'_>> {
        self.index.primitive_arrays().filter_map(|(id, o)| match HeapObject::new(self, id, o) {
            HeapObject::PrimitiveArray(array) => Some(array),
            _ => None,
        })
    }

    /// Thread instance registered for `thread_serial` by a thread object root.
    pub fn thread_object(&self, thread_serial: u32) -> Option<HeapInstance<'_>> {
        let id = self.index.thread_object(thread_serial)?;
        self.object(id).and_then(|o| o.as_instance())
    }

    /// Full record of object `id`, from the cache or re-read at its offset.
    pub fn read_record(&self, id: u64) -> Result<Rc<ObjectRecord>> {
        if let Some(record) = self.object_cache.borrow_mut().get(&id) {
            return Ok(Rc::clone(record));
        }
        let indexed = self.index.object(id).ok_or(FormatError::NotFound(id))?;
        let record = Rc::new(self.read_at(indexed)?);
        self.object_cache.borrow_mut().put(id, Rc::clone(&record));
        Ok(record)
    }

    /// Decoded class dump of `class_id`. Never evicted.
    pub fn class_record(&self, class_id: u64) -> Result<Rc<ClassDumpRecord>> {
        if let Some(record) = self.class_cache.borrow().get(&class_id) {
            return Ok(Rc::clone(record));
        }
        let indexed = self.index.object(class_id).ok_or(FormatError::NotFound(class_id))?;
        let record = match self.read_at(indexed)? {
            ObjectRecord::Class(class) => Rc::new(class),
            _ => {
                let offset = indexed.position();
                return Err(FormatError::Unexpected { offset, expected: "class dump" }.into());
            }
        };
        self.class_cache.borrow_mut().insert(class_id, Rc::clone(&record));
        Ok(record)
    }

    fn read_at(&self, indexed: IndexedObject) -> Result<ObjectRecord> {
        let record_type = match indexed {
            IndexedObject::Class { .. } => RecordType::ClassDump,
            IndexedObject::Instance { .. } => RecordType::InstanceDump,
            IndexedObject::ObjectArray { .. } => RecordType::ObjectArrayDump,
            IndexedObject::PrimitiveArray { .. } => RecordType::PrimitiveArrayDump,
        };
        trace!("reading {record_type:?} at {}", indexed.position());
        let mut reader = self.reader.borrow_mut();
        reader.move_to(indexed.position())?;
        read_object_record(&mut reader, record_type)
    }

    /// Number of records currently held by the object cache.
    pub fn cached_records(&self) -> usize {
        self.object_cache.borrow().len()
    }
}

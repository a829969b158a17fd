use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use deku::prelude::*;
use log::trace;

use crate::error::{AuspexError, FormatError, Result};
use crate::graph::fields::HeapValue;
use crate::hprof::header::HprofHeader;
use crate::hprof::record::*;
use crate::hprof::tag::*;

/// Fixed nine byte prefix of every top level record.
#[derive(Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct RecordHeader {
    pub tag: u8,
    pub time: u32,
    pub length: u32,
}

impl RecordHeader {
    pub const SIZE: usize = 9;
}

/// Kinds of records delivered by [`read_records`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RecordType {
    String,
    LoadClass,
    StackFrame,
    StackTrace,
    GcRoot(GcRootKind),
    HeapDumpInfo,
    ClassDump,
    InstanceDump,
    ObjectArrayDump,
    PrimitiveArrayDump,
    HeapDumpEnd,
}

impl RecordType {
    pub const OBJECTS: [RecordType; 4] = [
        RecordType::ClassDump,
        RecordType::InstanceDump,
        RecordType::ObjectArrayDump,
        RecordType::PrimitiveArrayDump,
    ];
}

/// Big endian cursor over a snapshot. Identifier sized values use the width
/// declared in the header.
pub struct HprofRecordReader<R> {
    source: R,
    identifier_size: usize,
    bytes_read: u64,
    record_end: Option<u64>,
}

impl<R: Read> HprofRecordReader<R> {
    pub fn new(source: R, identifier_size: usize) -> Self {
        Self { source, identifier_size, bytes_read: 0, record_end: None }
    }

    pub fn identifier_size(&self) -> usize {
        self.identifier_size
    }

    pub fn set_identifier_size(&mut self, identifier_size: usize) {
        self.identifier_size = identifier_size;
    }

    /// Offset of the next byte to be read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fails when `len` more bytes would run past the end of the enclosing
    /// top level record.
    fn check_bounds(&self, len: u64) -> Result<()> {
        if let Some(end) = self.record_end
            && self.bytes_read.saturating_add(len) > end
        {
            let expected = "sub-record within its enclosing record";
            return Err(FormatError::Unexpected { offset: self.bytes_read, expected }.into());
        }
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(buf.len() as u64)?;
        match self.source.read_exact(buf) {
            Ok(()) => {
                self.bytes_read += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FormatError::Truncated {
                offset: self.bytes_read,
                wanted: buf.len() as u64,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_id(&mut self) -> Result<u64> {
        Ok(match self.identifier_size {
            1 => u64::from(self.read_u8()?),
            2 => u64::from(self.read_u16()?),
            4 => u64::from(self.read_u32()?),
            _ => self.read_u64()?,
        })
    }

    /// Reads `len` bytes. The buffer grows with the bytes actually present, so
    /// a corrupt length ends in [`FormatError::Truncated`] rather than a huge
    /// allocation.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.check_bounds(len as u64)?;
        let mut buf = Vec::new();
        let read = (&mut self.source).take(len as u64).read_to_end(&mut buf)?;
        self.bytes_read += read as u64;
        if read < len {
            let wanted = (len - read) as u64;
            return Err(FormatError::Truncated { offset: self.bytes_read, wanted }.into());
        }
        Ok(buf)
    }

    /// Skips `len` bytes without decoding them.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        self.check_bounds(len)?;
        let copied = io::copy(&mut (&mut self.source).take(len), &mut io::sink())?;
        self.bytes_read += copied;
        if copied < len {
            let wanted = len - copied;
            return Err(FormatError::Truncated { offset: self.bytes_read, wanted }.into());
        }
        Ok(())
    }

    pub fn read_value(&mut self, field_type: FieldType) -> Result<HeapValue> {
        Ok(match field_type {
            FieldType::Reference => HeapValue::Reference(self.read_id()?),
            FieldType::Primitive(PrimitiveType::Boolean) => {
                HeapValue::Boolean(self.read_u8()? != 0)
            }
            FieldType::Primitive(PrimitiveType::Char) => HeapValue::Char(self.read_u16()?),
            FieldType::Primitive(PrimitiveType::Float) => {
                HeapValue::Float(f32::from_bits(self.read_u32()?))
            }
            FieldType::Primitive(PrimitiveType::Double) => {
                HeapValue::Double(f64::from_bits(self.read_u64()?))
            }
            FieldType::Primitive(PrimitiveType::Byte) => HeapValue::Byte(self.read_u8()? as i8),
            FieldType::Primitive(PrimitiveType::Short) => HeapValue::Short(self.read_u16()? as i16),
            FieldType::Primitive(PrimitiveType::Int) => HeapValue::Int(self.read_i32()?),
            FieldType::Primitive(PrimitiveType::Long) => HeapValue::Long(self.read_u64()? as i64),
        })
    }

    fn read_field_type(&mut self) -> Result<FieldType> {
        Ok(FieldType::from_hprof_type(self.read_u8()?)?)
    }

    pub fn read_string_record(&mut self, length: u64) -> Result<StringRecord> {
        let id = self.read_id()?;
        let len = length
            .checked_sub(self.identifier_size as u64)
            .ok_or(FormatError::Unexpected { offset: self.bytes_read, expected: "string body" })?;
        let bytes = self.read_bytes(len as usize)?;
        Ok(StringRecord { id, string: String::from_utf8_lossy(&bytes).into_owned() })
    }

    pub fn read_load_class_record(&mut self) -> Result<LoadClassRecord> {
        Ok(LoadClassRecord {
            class_serial: self.read_u32()?,
            id: self.read_id()?,
            stack_trace_serial: self.read_u32()?,
            class_name_string_id: self.read_id()?,
        })
    }

    pub fn read_stack_frame_record(&mut self) -> Result<StackFrameRecord> {
        Ok(StackFrameRecord {
            id: self.read_id()?,
            method_name_string_id: self.read_id()?,
            method_signature_string_id: self.read_id()?,
            source_file_string_id: self.read_id()?,
            class_serial: self.read_u32()?,
            line_number: self.read_i32()?,
        })
    }

    pub fn read_stack_trace_record(&mut self) -> Result<StackTraceRecord> {
        let serial = self.read_u32()?;
        let thread_serial = self.read_u32()?;
        let count = self.read_u32()?;
        let frame_ids = (0..count).map(|_| self.read_id()).collect::<Result<Vec<_>>>()?;
        Ok(StackTraceRecord { serial, thread_serial, frame_ids })
    }

    /// Reads the body of a gc root sub-record whose tag was already consumed.
    pub fn read_gc_root(&mut self, kind: GcRootKind) -> Result<GcRoot> {
        let id = self.read_id()?;
        let root = match kind {
            GcRootKind::JniGlobal => {
                // jni global ref id
                self.read_id()?;
                GcRoot::new(kind, id)
            }
            GcRootKind::JniLocal | GcRootKind::JavaFrame | GcRootKind::JniMonitor => {
                let thread_serial = self.read_u32()?;
                // frame number or stack depth
                self.read_u32()?;
                GcRoot::with_thread(kind, id, thread_serial)
            }
            GcRootKind::NativeStack | GcRootKind::ThreadBlock => {
                GcRoot::with_thread(kind, id, self.read_u32()?)
            }
            GcRootKind::ThreadObject => {
                let thread_serial = self.read_u32()?;
                // stack trace serial
                self.read_u32()?;
                GcRoot::with_thread(kind, id, thread_serial)
            }
            _ => GcRoot::new(kind, id),
        };
        Ok(root)
    }

    pub fn read_heap_dump_info_record(&mut self) -> Result<HeapDumpInfoRecord> {
        Ok(HeapDumpInfoRecord { heap_id: self.read_u32()?, heap_name_string_id: self.read_id()? })
    }

    pub fn read_class_dump_record(&mut self) -> Result<ClassDumpRecord> {
        let id = self.read_id()?;
        let stack_trace_serial = self.read_u32()?;
        let super_class_id = self.read_id()?;
        let class_loader_id = self.read_id()?;
        let signers_id = self.read_id()?;
        let protection_domain_id = self.read_id()?;
        // reserved
        self.read_id()?;
        self.read_id()?;
        let instance_size = self.read_u32()?;

        let constant_pool_count = self.read_u16()?;
        for _ in 0..constant_pool_count {
            self.read_u16()?;
            let field_type = self.read_field_type()?;
            self.skip(field_type.byte_size(self.identifier_size) as u64)?;
        }

        let static_field_count = self.read_u16()?;
        let mut static_fields = Vec::with_capacity(static_field_count as usize);
        for _ in 0..static_field_count {
            let name_string_id = self.read_id()?;
            let field_type = self.read_field_type()?;
            let value = self.read_value(field_type)?;
            static_fields.push(StaticFieldRecord { name_string_id, field_type, value });
        }

        let field_count = self.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let name_string_id = self.read_id()?;
            let field_type = self.read_field_type()?;
            fields.push(FieldRecord { name_string_id, field_type });
        }

        Ok(ClassDumpRecord {
            id,
            stack_trace_serial,
            super_class_id,
            class_loader_id,
            signers_id,
            protection_domain_id,
            instance_size,
            static_fields,
            fields,
        })
    }

    pub fn read_instance_dump_record(&mut self) -> Result<InstanceDumpRecord> {
        let id = self.read_id()?;
        let stack_trace_serial = self.read_u32()?;
        let class_id = self.read_id()?;
        let length = self.read_u32()?;
        let field_values = self.read_bytes(length as usize)?;
        Ok(InstanceDumpRecord { id, stack_trace_serial, class_id, field_values })
    }

    pub fn read_object_array_dump_record(&mut self) -> Result<ObjectArrayDumpRecord> {
        let id = self.read_id()?;
        let stack_trace_serial = self.read_u32()?;
        let length = self.read_u32()?;
        let array_class_id = self.read_id()?;
        let bytes = self.read_bytes(length as usize * self.identifier_size)?;
        let elements = bytes.chunks_exact(self.identifier_size).map(id_from_be).collect();
        Ok(ObjectArrayDumpRecord { id, stack_trace_serial, array_class_id, elements })
    }

    pub fn read_primitive_array_dump_record(&mut self) -> Result<PrimitiveArrayDumpRecord> {
        let id = self.read_id()?;
        let stack_trace_serial = self.read_u32()?;
        let length = self.read_u32()? as usize;
        let primitive = PrimitiveType::from_hprof_type(self.read_u8()?)?;
        let bytes = self.read_bytes(length * primitive.byte_size())?;
        let data = match primitive {
            PrimitiveType::Boolean => {
                PrimitiveArrayData::Boolean(bytes.iter().map(|b| *b != 0).collect())
            }
            PrimitiveType::Byte => {
                PrimitiveArrayData::Byte(bytes.iter().map(|b| *b as i8).collect())
            }
            PrimitiveType::Char => PrimitiveArrayData::Char(
                bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect(),
            ),
            PrimitiveType::Short => PrimitiveArrayData::Short(
                bytes.chunks_exact(2).map(|c| i16::from_be_bytes([c[0], c[1]])).collect(),
            ),
            PrimitiveType::Int => PrimitiveArrayData::Int(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            PrimitiveType::Float => PrimitiveArrayData::Float(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_bits(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
                    .collect(),
            ),
            PrimitiveType::Long => PrimitiveArrayData::Long(
                bytes.chunks_exact(8).map(|c| i64::from_be_bytes(eight(c))).collect(),
            ),
            PrimitiveType::Double => PrimitiveArrayData::Double(
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_bits(u64::from_be_bytes(eight(c))))
                    .collect(),
            ),
        };
        Ok(PrimitiveArrayDumpRecord { id, stack_trace_serial, data })
    }

    fn skip_class_dump_record(&mut self) -> Result<()> {
        self.read_class_dump_record().map(|_| ())
    }

    fn skip_instance_dump_record(&mut self) -> Result<()> {
        self.skip(self.identifier_size as u64 * 2 + 4)?;
        let length = self.read_u32()?;
        self.skip(u64::from(length))
    }

    fn skip_object_array_dump_record(&mut self) -> Result<()> {
        self.skip(self.identifier_size as u64 + 4)?;
        let length = self.read_u32()?;
        self.skip(self.identifier_size as u64 * (u64::from(length) + 1))
    }

    fn skip_primitive_array_dump_record(&mut self) -> Result<()> {
        self.skip(self.identifier_size as u64 + 4)?;
        let length = self.read_u32()?;
        let primitive = PrimitiveType::from_hprof_type(self.read_u8()?)?;
        self.skip(u64::from(length) * primitive.byte_size() as u64)
    }

    /// Skips the body of a heap dump sub-record whose tag was already consumed.
    fn skip_sub_record(&mut self, record_type: RecordType) -> Result<()> {
        match record_type {
            RecordType::ClassDump => self.skip_class_dump_record(),
            RecordType::InstanceDump => self.skip_instance_dump_record(),
            RecordType::ObjectArrayDump => self.skip_object_array_dump_record(),
            RecordType::PrimitiveArrayDump => self.skip_primitive_array_dump_record(),
            RecordType::HeapDumpInfo => self.read_heap_dump_info_record().map(|_| ()),
            RecordType::GcRoot(kind) => self.skip_gc_root(kind),
            _ => {
                let expected = "heap dump sub-record";
                Err(FormatError::Unexpected { offset: self.bytes_read, expected }.into())
            }
        }
    }

    fn skip_gc_root(&mut self, kind: GcRootKind) -> Result<()> {
        self.read_gc_root(kind).map(|_| ())
    }
}

fn eight(c: &[u8]) -> [u8; 8] {
    [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]
}

fn id_from_be(c: &[u8]) -> u64 {
    c.iter().fold(0, |id, b| (id << 8) | u64::from(*b))
}

impl<R: Read + Seek> HprofRecordReader<R> {
    /// Positions the reader at `offset`, for re-reading a record whose position
    /// was stored by the index.
    pub fn move_to(&mut self, offset: u64) -> Result<()> {
        if offset != self.bytes_read {
            self.source.seek(SeekFrom::Start(offset))?;
            self.bytes_read = offset;
        }
        Ok(())
    }
}

/// Reads every record of a snapshot in one forward pass. Records whose type is
/// in `wanted` are handed to `sink` with the reader positioned at their body,
/// everything else is skipped. The sink must consume the record body entirely
/// for sub-records; top level bodies it leaves partially read are skipped up to
/// their declared length.
///
/// Returns the number of bytes read.
pub fn read_records<R, F>(
    reader: &mut HprofRecordReader<R>,
    header: &HprofHeader,
    wanted: &[RecordType],
    mut sink: F,
) -> Result<u64>
where
    R: Read,
    F: FnMut(RecordType, Option<u64>, &mut HprofRecordReader<R>) -> Result<()>,
{
    let wants = |t: RecordType| wanted.contains(&t);
    reader.set_identifier_size(header.identifier_size);
    reader.move_to_start(header.record_start)?;

    let mut previous = (0u8, 0u64);
    let mut header_buf = [0; RecordHeader::SIZE];
    loop {
        reader.record_end = None;
        // a clean end of stream between records ends the pass
        let offset = reader.bytes_read();
        match reader.source.read(&mut header_buf[..1]) {
            Ok(0) => break,
            Ok(_) => reader.bytes_read += 1,
            Err(e) => return Err(e.into()),
        }
        reader.read_exact(&mut header_buf[1..])?;
        let (_, record) = RecordHeader::from_bytes((header_buf.as_slice(), 0))
            .map_err(|_| FormatError::Unexpected { offset, expected: "record header" })?;
        let length = u64::from(record.length);
        let body_start = reader.bytes_read();
        reader.record_end = Some(body_start + length);
        trace!("record 0x{:02x} at {offset} ({length} bytes)", record.tag);

        let tag = RecordTag::from_tag(record.tag)
            .ok_or(FormatError::UnknownTag { tag: record.tag, offset })?;
        let record_type = match tag {
            RecordTag::StringInUtf8 => Some(RecordType::String),
            RecordTag::LoadClass => Some(RecordType::LoadClass),
            RecordTag::StackFrame => Some(RecordType::StackFrame),
            RecordTag::StackTrace => Some(RecordType::StackTrace),
            RecordTag::HeapDumpEnd => Some(RecordType::HeapDumpEnd),
            RecordTag::HeapDump | RecordTag::HeapDumpSegment => {
                let end = body_start + length;
                read_heap_dump_segment(reader, end, &wants, &mut sink, &mut previous)?;
                None
            }
            _ => None,
        };

        if let Some(record_type) = record_type
            && wants(record_type)
        {
            sink(record_type, Some(length), reader)?;
        }
        let consumed = reader.bytes_read() - body_start;
        if consumed < length {
            reader.skip(length - consumed)?;
        }
    }
    reader.record_end = None;
    Ok(reader.bytes_read())
}

fn read_heap_dump_segment<R, F, W>(
    reader: &mut HprofRecordReader<R>,
    end: u64,
    wants: &W,
    sink: &mut F,
    previous: &mut (u8, u64),
) -> Result<()>
where
    R: Read,
    F: FnMut(RecordType, Option<u64>, &mut HprofRecordReader<R>) -> Result<()>,
    W: Fn(RecordType) -> bool,
{
    while reader.bytes_read() < end {
        let offset = reader.bytes_read();
        let sub_tag = reader.read_u8()?;
        let record_type = match sub_tag {
            CLASS_DUMP => RecordType::ClassDump,
            INSTANCE_DUMP => RecordType::InstanceDump,
            OBJECT_ARRAY_DUMP => RecordType::ObjectArrayDump,
            PRIMITIVE_ARRAY_DUMP => RecordType::PrimitiveArrayDump,
            HEAP_DUMP_INFO => RecordType::HeapDumpInfo,
            PRIMITIVE_ARRAY_NODATA => {
                return Err(FormatError::UnsupportedSubRecord("PRIMITIVE_ARRAY_NODATA").into());
            }
            other => match GcRootKind::from_tag(other) {
                Some(kind) => RecordType::GcRoot(kind),
                None => {
                    return Err(FormatError::UnknownSubTag {
                        tag: other,
                        offset,
                        previous_tag: previous.0,
                        previous_offset: previous.1,
                    }
                    .into());
                }
            },
        };
        *previous = (sub_tag, offset);

        if wants(record_type) {
            sink(record_type, None, reader)?;
            continue;
        }
        reader.skip_sub_record(record_type)?;
    }
    Ok(())
}

impl<R: Read> HprofRecordReader<R> {
    /// Skips forward to `offset` in a stream that cannot seek.
    fn move_to_start(&mut self, offset: u64) -> Result<()> {
        if offset < self.bytes_read {
            let expected = "stream start";
            return Err(FormatError::Unexpected { offset: self.bytes_read, expected }.into());
        }
        self.skip(offset - self.bytes_read)
    }
}

/// Reads one sub-record body at the current position.
pub fn read_object_record<R: Read>(
    reader: &mut HprofRecordReader<R>,
    record_type: RecordType,
) -> Result<ObjectRecord> {
    let offset = reader.bytes_read();
    Ok(match record_type {
        RecordType::ClassDump => ObjectRecord::Class(reader.read_class_dump_record()?),
        RecordType::InstanceDump => ObjectRecord::Instance(reader.read_instance_dump_record()?),
        RecordType::ObjectArrayDump => {
            ObjectRecord::ObjectArray(reader.read_object_array_dump_record()?)
        }
        RecordType::PrimitiveArrayDump => {
            ObjectRecord::PrimitiveArray(reader.read_primitive_array_dump_record()?)
        }
        _ => return Err(FormatError::Unexpected { offset, expected: "object record" }.into()),
    })
}

/// Provides the two access modes over one snapshot.
pub trait ByteSource {
    fn open_stream(&self) -> Result<Box<dyn Read>>;

    fn open_random_access(&self) -> Result<Box<dyn ReadSeek>>;

    /// Total size in bytes, when known.
    fn len(&self) -> Option<u64>;
}

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A snapshot on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<BufReader<File>> {
        let file = File::open(&self.path)
            .map_err(|source| AuspexError::Resource { path: self.path.clone(), source })?;
        Ok(BufReader::new(file))
    }
}

impl ByteSource for FileSource {
    fn open_stream(&self) -> Result<Box<dyn Read>> {
        Ok(Box::new(self.open()?))
    }

    fn open_random_access(&self) -> Result<Box<dyn ReadSeek>> {
        Ok(Box::new(self.open()?))
    }

    fn len(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// A snapshot held in memory.
#[derive(Debug, Clone)]
pub struct BytesSource {
    bytes: Arc<[u8]>,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl ByteSource for BytesSource {
    fn open_stream(&self) -> Result<Box<dyn Read>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }

    fn open_random_access(&self) -> Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }

    fn len(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }
}

/// Opens a stream over `source` and decodes its header.
pub fn open_stream(
    source: &dyn ByteSource,
) -> Result<(HprofHeader, HprofRecordReader<Box<dyn Read>>)> {
    let mut reader = HprofRecordReader::new(source.open_stream()?, 8);
    let header = HprofHeader::read(&mut reader)?;
    reader.set_identifier_size(header.identifier_size);
    Ok((header, reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hprof::header::HprofVersion;
    use crate::hprof::writer::HprofWriter;
    use rstest::rstest;

    fn snapshot(identifier_size: usize) -> Vec<u8> {
        let mut writer = HprofWriter::new(HprofVersion::Jdk1_0_2, identifier_size, 0);
        let string = "java.lang.Object".into();
        writer.write(&HprofRecord::String(StringRecord { id: 1, string }));
        writer.write(&HprofRecord::LoadClass(LoadClassRecord {
            class_serial: 1,
            id: 10,
            stack_trace_serial: 0,
            class_name_string_id: 1,
        }));
        writer.write(&HprofRecord::Object(ObjectRecord::Class(ClassDumpRecord {
            id: 10,
            stack_trace_serial: 0,
            super_class_id: 0,
            class_loader_id: 0,
            signers_id: 0,
            protection_domain_id: 0,
            instance_size: 0,
            static_fields: vec![],
            fields: vec![],
        })));
        writer.write(&HprofRecord::Object(ObjectRecord::Instance(InstanceDumpRecord {
            id: 20,
            stack_trace_serial: 0,
            class_id: 10,
            field_values: vec![],
        })));
        writer.write(&HprofRecord::GcRoot(GcRoot::new(GcRootKind::StickyClass, 10)));
        writer.into_bytes()
    }

    fn collect(bytes: &[u8], wanted: &[RecordType]) -> Result<Vec<RecordType>> {
        let mut reader = HprofRecordReader::new(bytes, 8);
        let header = HprofHeader::read(&mut reader)?;
        let mut seen = vec![];
        read_records(&mut reader, &header, wanted, |record_type, _, reader| {
            seen.push(record_type);
            match record_type {
                RecordType::GcRoot(kind) => reader.read_gc_root(kind).map(|_| ()),
                RecordType::ClassDump
                | RecordType::InstanceDump
                | RecordType::ObjectArrayDump
                | RecordType::PrimitiveArrayDump => {
                    read_object_record(reader, record_type).map(|_| ())
                }
                _ => Ok(()),
            }
        })?;
        Ok(seen)
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[case(8)]
    fn test_read_records_filters_and_flattens(#[case] identifier_size: usize) {
        let bytes = snapshot(identifier_size);
        let wanted = [
            RecordType::String,
            RecordType::InstanceDump,
            RecordType::GcRoot(GcRootKind::StickyClass),
        ];
        let seen = collect(&bytes, &wanted).unwrap();
        assert_eq!(seen, wanted.to_vec());
    }

    #[test]
    fn test_read_records_truncated() {
        let bytes = snapshot(4);
        let err = collect(&bytes[..bytes.len() - 2], &[RecordType::ClassDump]).unwrap_err();
        assert!(matches!(err, AuspexError::Format(FormatError::Truncated { .. })), "{err}");
    }

    #[test]
    fn test_unknown_sub_tag_reports_previous() {
        let mut writer = HprofWriter::new(HprofVersion::Jdk1_0_2, 4, 0);
        writer.write(&HprofRecord::GcRoot(GcRoot::new(GcRootKind::StickyClass, 10)));
        writer.write_raw_heap_dump_bytes(&[0x42, 0, 0, 0, 0]);
        let bytes = writer.into_bytes();
        let err = collect(&bytes, &[]).unwrap_err();
        match err {
            AuspexError::Format(FormatError::UnknownSubTag {
                tag,
                previous_tag,
                offset,
                previous_offset,
            }) => {
                assert_eq!(tag, 0x42);
                assert_eq!(previous_tag, GcRootKind::StickyClass.tag());
                assert_eq!(offset, previous_offset + 5);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_no_data_array_is_fatal() {
        let mut writer = HprofWriter::new(HprofVersion::Android, 4, 0);
        writer.write_raw_heap_dump_bytes(&[PRIMITIVE_ARRAY_NODATA, 0, 0, 0, 1]);
        let err = collect(&writer.into_bytes(), &[]).unwrap_err();
        assert!(matches!(err, AuspexError::Format(FormatError::UnsupportedSubRecord(_))));
    }

    #[test]
    fn test_unknown_top_level_tag() {
        let mut bytes = snapshot(4);
        bytes.extend_from_slice(&[0x77, 0, 0, 0, 0, 0, 0, 0, 0]);
        let err = collect(&bytes, &[]).unwrap_err();
        assert!(matches!(err, AuspexError::Format(FormatError::UnknownTag { tag: 0x77, .. })));
    }

    // byte array claiming u32::MAX elements with three present, data at offset 54
    // once wrapped in a heap dump record
    const HUGE_BYTE_ARRAY: [u8; 17] = [
        PRIMITIVE_ARRAY_DUMP, 0, 0, 0, 30, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 8, 1, 2, 3,
    ];

    #[rstest]
    #[case(&[RecordType::PrimitiveArrayDump])]
    #[case(&[])]
    fn test_corrupt_length_stays_inside_segment(#[case] wanted: &[RecordType]) {
        let mut writer = HprofWriter::new(HprofVersion::Jdk1_0_2, 4, 0);
        writer.write_raw_heap_dump_bytes(&HUGE_BYTE_ARRAY);
        let err = collect(&writer.into_bytes(), wanted).unwrap_err();
        match err {
            AuspexError::Format(FormatError::Unexpected { offset, .. }) => assert_eq!(offset, 54),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_sub_record_crossing_segment_end() {
        let mut writer = HprofWriter::new(HprofVersion::Jdk1_0_2, 4, 0);
        writer.write(&HprofRecord::GcRoot(GcRoot::new(GcRootKind::StickyClass, 10)));
        // sticky class root with only three of its four id bytes
        writer.write_raw_heap_dump_bytes(&[GcRootKind::StickyClass.tag(), 0, 0, 0]);
        let bytes = writer.into_bytes();
        for wanted in [&[][..], &[RecordType::GcRoot(GcRootKind::StickyClass)][..]] {
            let err = collect(&bytes, wanted).unwrap_err();
            assert!(matches!(err, AuspexError::Format(FormatError::Unexpected { .. })), "{err}");
        }
    }

    #[test]
    fn test_corrupt_length_without_bounds_is_truncated() {
        let mut reader = HprofRecordReader::new(&HUGE_BYTE_ARRAY[1..], 4);
        let err = reader.read_primitive_array_dump_record().unwrap_err();
        assert!(matches!(err, AuspexError::Format(FormatError::Truncated { .. })), "{err}");

        let object_array =
            [0, 0, 0, 40, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 10, 0, 0, 0, 20];
        let mut reader = HprofRecordReader::new(&object_array[..], 4);
        let err = reader.read_object_array_dump_record().unwrap_err();
        assert!(matches!(err, AuspexError::Format(FormatError::Truncated { .. })), "{err}");
    }

    #[rstest]
    #[case(RecordType::String)]
    #[case(RecordType::LoadClass)]
    #[case(RecordType::HeapDumpEnd)]
    fn test_skip_rejects_top_level_types(#[case] record_type: RecordType) {
        let mut reader = HprofRecordReader::new(&[0u8; 16][..], 4);
        let err = reader.skip_sub_record(record_type).unwrap_err();
        assert!(matches!(err, AuspexError::Format(FormatError::Unexpected { offset: 0, .. })));
        assert_eq!(reader.bytes_read(), 0);
    }

    #[test]
    fn test_random_access_move_to() {
        let bytes = snapshot(4);
        let source = BytesSource::new(bytes.clone());
        let (header, mut stream) = open_stream(&source).unwrap();
        let mut offset = None;
        read_records(&mut stream, &header, &[RecordType::InstanceDump], |_, _, reader| {
            offset = Some(reader.bytes_read());
            reader.read_instance_dump_record().map(|_| ())
        })
        .unwrap();

        let mut random = HprofRecordReader::new(source.open_random_access().unwrap(), 4);
        random.move_to(offset.unwrap()).unwrap();
        let record = random.read_instance_dump_record().unwrap();
        assert_eq!(record.id, 20);
        assert_eq!(record.class_id, 10);
    }

    #[test]
    fn test_file_source_missing_is_resource_error() {
        let source = FileSource::new("/nonexistent/heap.hprof");
        assert!(matches!(source.open_stream(), Err(AuspexError::Resource { .. })));
    }
}

use serde::Serialize;

use crate::error::Result;
use crate::hprof::reader::HprofRecordReader;
use crate::hprof::record::FieldRecord;
use crate::hprof::tag::{FieldType, PrimitiveType};

/// A decoded field or array value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum HeapValue {
    /// Object id, `0` is null
    Reference(u64),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl HeapValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            HeapValue::Reference(_) => FieldType::Reference,
            HeapValue::Boolean(_) => FieldType::Primitive(PrimitiveType::Boolean),
            HeapValue::Char(_) => FieldType::Primitive(PrimitiveType::Char),
            HeapValue::Float(_) => FieldType::Primitive(PrimitiveType::Float),
            HeapValue::Double(_) => FieldType::Primitive(PrimitiveType::Double),
            HeapValue::Byte(_) => FieldType::Primitive(PrimitiveType::Byte),
            HeapValue::Short(_) => FieldType::Primitive(PrimitiveType::Short),
            HeapValue::Int(_) => FieldType::Primitive(PrimitiveType::Int),
            HeapValue::Long(_) => FieldType::Primitive(PrimitiveType::Long),
        }
    }

    /// Zero value of `field_type`.
    pub fn default_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Reference => HeapValue::Reference(0),
            FieldType::Primitive(PrimitiveType::Boolean) => HeapValue::Boolean(false),
            FieldType::Primitive(PrimitiveType::Char) => HeapValue::Char(0),
            FieldType::Primitive(PrimitiveType::Float) => HeapValue::Float(0.0),
            FieldType::Primitive(PrimitiveType::Double) => HeapValue::Double(0.0),
            FieldType::Primitive(PrimitiveType::Byte) => HeapValue::Byte(0),
            FieldType::Primitive(PrimitiveType::Short) => HeapValue::Short(0),
            FieldType::Primitive(PrimitiveType::Int) => HeapValue::Int(0),
            FieldType::Primitive(PrimitiveType::Long) => HeapValue::Long(0),
        }
    }

    /// Referenced object id, `None` for null and primitives.
    pub fn as_object_id(&self) -> Option<u64> {
        match *self {
            HeapValue::Reference(id) if id != 0 => Some(id),
            _ => None,
        }
    }

    pub fn is_null_reference(&self) -> bool {
        matches!(self, HeapValue::Reference(0))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            HeapValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> Option<i8> {
        match *self {
            HeapValue::Byte(b) => Some(b),
            _ => None,
        }
    }

    /// Integral value widened to `i64`.
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            HeapValue::Byte(v) => Some(i64::from(v)),
            HeapValue::Short(v) => Some(i64::from(v)),
            HeapValue::Char(v) => Some(i64::from(v)),
            HeapValue::Int(v) => Some(i64::from(v)),
            HeapValue::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match *self {
            HeapValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// Decodes the raw field payload of an instance dump.
pub struct FieldValuesReader<'a> {
    reader: HprofRecordReader<&'a [u8]>,
}

impl<'a> FieldValuesReader<'a> {
    pub fn new(field_values: &'a [u8], identifier_size: usize) -> Self {
        Self { reader: HprofRecordReader::new(field_values, identifier_size) }
    }

    pub fn read_value(&mut self, field: &FieldRecord) -> Result<HeapValue> {
        self.reader.read_value(field.field_type)
    }

    pub fn skip(&mut self, field: &FieldRecord) -> Result<()> {
        self.reader.skip(field.field_type.byte_size(self.reader.identifier_size()) as u64)
    }

    pub fn position(&self) -> u64 {
        self.reader.bytes_read()
    }
}

/// Bytes taken by values of `fields` in an instance dump.
pub fn fields_byte_size(fields: &[FieldRecord], identifier_size: usize) -> usize {
    fields.iter().map(|f| f.field_type.byte_size(identifier_size)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuspexError, FormatError};
    use crate::hprof::writer::encode_values;
    use rstest::rstest;

    fn field(field_type: FieldType) -> FieldRecord {
        FieldRecord { name_string_id: 1, field_type }
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[case(8)]
    fn test_read_values(#[case] identifier_size: usize) {
        let values = [
            HeapValue::Reference(0x7f),
            HeapValue::Boolean(true),
            HeapValue::Char(0x263a),
            HeapValue::Float(1.5),
            HeapValue::Double(-2.25),
            HeapValue::Byte(-3),
            HeapValue::Short(-300),
            HeapValue::Int(70_000),
            HeapValue::Long(-1),
        ];
        let bytes = encode_values(identifier_size, &values);
        let fields: Vec<_> = values.iter().map(|v| field(v.field_type())).collect();
        assert_eq!(bytes.len(), fields_byte_size(&fields, identifier_size));

        let mut reader = FieldValuesReader::new(&bytes, identifier_size);
        for (f, expected) in fields.iter().zip(values) {
            assert_eq!(reader.read_value(f).unwrap(), expected);
        }
        assert_eq!(reader.position(), bytes.len() as u64);
    }

    #[test]
    fn test_skip_and_truncation() {
        let bytes = encode_values(4, &[HeapValue::Int(1), HeapValue::Reference(9)]);
        let mut reader = FieldValuesReader::new(&bytes, 4);
        reader.skip(&field(FieldType::Primitive(PrimitiveType::Int))).unwrap();
        let value = reader.read_value(&field(FieldType::Reference)).unwrap();
        assert_eq!(value, HeapValue::Reference(9));
        assert!(matches!(
            reader.read_value(&field(FieldType::Primitive(PrimitiveType::Long))),
            Err(AuspexError::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(HeapValue::Reference(0).as_object_id(), None);
        assert!(HeapValue::Reference(0).is_null_reference());
        assert_eq!(HeapValue::Reference(5).as_object_id(), Some(5));
        assert_eq!(HeapValue::Short(-2).as_long(), Some(-2));
        assert_eq!(HeapValue::Boolean(true).as_int(), None);
    }
}

//! HPROF binary format: tags, header, records, and the reader and writer.

pub mod header;
pub mod reader;
pub mod record;
pub mod tag;
pub mod writer;

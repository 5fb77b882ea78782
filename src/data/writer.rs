//! Positional little-endian writer used by the round-trip encoders.
//!
//! Records are written back at the absolute offsets their preserved offset
//! fields designate, so the writer grows on demand and zero-fills gaps.

use crate::data::parser_utils::{TableRef, resolve_relptr};
use crate::error::{Error, ErrorKind, FileKind, IResult};

#[derive(Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
    file: FileKind,
}

impl ByteWriter {
    pub fn new(file: FileKind) -> Self {
        Self {
            buf: Vec::new(),
            file,
        }
    }

    /// A writer whose output is at least `len` bytes long.
    pub fn with_len(file: FileKind, len: usize) -> Self {
        Self {
            buf: vec![0; len],
            file,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Absolute position of `base + relative`, failing like a reader would on a negative result.
    pub fn resolve(&self, table: &'static str, base: usize, relative: i32) -> IResult<usize> {
        resolve_relptr(base, relative).ok_or_else(|| {
            Error::new(
                self.file,
                base,
                ErrorKind::OutOfBounds {
                    table,
                    need: base,
                    have: self.buf.len(),
                },
            )
        })
    }

    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(bytes);
    }

    /// Write `text` followed by a terminating NUL.
    pub fn put_cstr(&mut self, offset: usize, text: &str) {
        self.put_bytes(offset, text.as_bytes());
        self.put_bytes(offset + text.len(), &[0]);
    }

    /// Write a self-relative name; a zero offset means the record has none.
    pub fn put_name(
        &mut self,
        table: &'static str,
        record_base: usize,
        relative: i32,
        text: &str,
    ) -> IResult<()> {
        if relative != 0 {
            let offset = self.resolve(table, record_base, relative)?;
            self.put_cstr(offset, text);
        }
        Ok(())
    }

    /// Absolute position of record `index` of a `record_size` table at `base + table_ref.offset`.
    pub fn table_slot(
        &self,
        table: &'static str,
        base: usize,
        table_ref: TableRef,
        record_size: usize,
        index: usize,
    ) -> IResult<usize> {
        Ok(self.resolve(table, base, table_ref.offset)? + index * record_size)
    }

    /// Start writing a record field by field at `offset`.
    pub fn record(&mut self, offset: usize) -> RecordWriter<'_> {
        RecordWriter {
            out: self,
            pos: offset,
        }
    }
}

/// Sequential field writer over a [`ByteWriter`], mirroring the winnow field parsers.
pub struct RecordWriter<'w> {
    out: &'w mut ByteWriter,
    pos: usize,
}

impl RecordWriter<'_> {
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.out.put_bytes(self.pos, bytes);
        self.pos += bytes.len();
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes(&[value])
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn i32s(&mut self, values: &[i32]) -> &mut Self {
        for value in values {
            self.i32(*value);
        }
        self
    }

    pub fn f32s(&mut self, values: &[f32]) -> &mut Self {
        for value in values {
            self.f32(*value);
        }
        self
    }

    /// Write a table reference count first.
    pub fn table_ref(&mut self, table_ref: TableRef) -> &mut Self {
        self.i32(table_ref.count).i32(table_ref.offset)
    }
}

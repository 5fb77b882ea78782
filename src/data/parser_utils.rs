//! Shared winnow-based parsing utilities used by the mdl, vvd and vtx readers.
//!
//! Every table in the three files is addressed as `base + relative offset` with a
//! record count. [`resolve`] turns such a triple into a bounds-checked
//! [`TableView`]; [`FileView`] wraps a whole file buffer and attaches the file
//! kind and table name to any failure so higher layers can simply `?` them.

use winnow::Parser;
use winnow::binary::{le_f32, le_i32};
use winnow::error::{ContextError, ErrMode};
use winnow::token::take;

use crate::error::{Error, ErrorKind, FileKind, IResult};

/// Common result type for winnow parsers.
pub type WResult<T> = Result<T, ErrMode<ContextError>>;

pub type Vector2 = [f32; 2];
pub type Vector3 = [f32; 3];
pub type Vector4 = [f32; 4];
/// A 3x4 row-major affine matrix (`matrix3x4_t`).
pub type Matrix3x4 = [f32; 12];

/// A `(count, offset)` pair addressing a table of records.
///
/// Both values are kept exactly as stored so tables can be re-emitted in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TableRef {
    pub count: i32,
    pub offset: i32,
}

impl TableRef {
    pub fn len(&self) -> usize {
        usize::try_from(self.count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.count <= 0
    }
}

/// Parse a table reference stored count first.
pub fn parse_table_ref(input: &mut &[u8]) -> WResult<TableRef> {
    let count = le_i32.parse_next(input)?;
    let offset = le_i32.parse_next(input)?;
    Ok(TableRef { count, offset })
}

/// Resolve a relative pointer: base_offset + rel_value = absolute file offset.
///
/// Returns `None` when the result would be negative.
pub fn resolve_relptr(base_offset: usize, rel_value: i32) -> Option<usize> {
    base_offset.checked_add_signed(rel_value as isize)
}

/// Why [`resolve`] refused a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    /// Absolute start of the table, or the base when the start is negative.
    pub start: usize,
    /// First byte past the table (saturating).
    pub need: usize,
}

/// A bounds-checked, non-owning view over `count` fixed-size records.
#[derive(Debug, Clone, Copy)]
pub struct TableView<'a> {
    data: &'a [u8],
    start: usize,
    record_size: usize,
    count: usize,
}

impl<'a> TableView<'a> {
    fn empty(data: &'a [u8], start: usize, record_size: usize) -> Self {
        Self {
            data,
            start,
            record_size,
            count: 0,
        }
    }

    /// Absolute offset of the first record.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Absolute offset of record `index`.
    pub fn record_base(&self, index: usize) -> usize {
        self.start + index * self.record_size
    }

    /// Bytes of the whole table.
    pub fn bytes(&self) -> &'a [u8] {
        &self.data[self.start..self.start + self.count * self.record_size]
    }

    /// Iterate `(absolute offset, record bytes)` pairs.
    pub fn records(&self) -> impl Iterator<Item = (usize, &'a [u8])> + '_ {
        (0..self.count).map(move |i| {
            let base = self.record_base(i);
            (base, &self.data[base..base + self.record_size])
        })
    }
}

/// Resolve `count` records of `record_size` bytes at `base + relative` within `buffer`.
///
/// A `count` of zero always yields an empty view (an absent table), whatever the offset.
pub fn resolve(
    buffer: &[u8],
    base: usize,
    relative: i32,
    record_size: usize,
    count: i32,
) -> Result<TableView<'_>, OutOfRange> {
    if count == 0 {
        return Ok(TableView::empty(buffer, 0, record_size));
    }
    let Some(start) = resolve_relptr(base, relative) else {
        return Err(OutOfRange {
            start: base,
            need: base,
        });
    };
    let Ok(count) = usize::try_from(count) else {
        return Err(OutOfRange { start, need: start });
    };
    let need = count
        .checked_mul(record_size)
        .and_then(|size| size.checked_add(start))
        .unwrap_or(usize::MAX);
    if need > buffer.len() {
        return Err(OutOfRange { start, need });
    }
    Ok(TableView {
        data: buffer,
        start,
        record_size,
        count,
    })
}

/// One file's entire contents, tagged with which file it is.
#[derive(Debug, Clone, Copy)]
pub struct FileView<'a> {
    data: &'a [u8],
    file: FileKind,
}

impl<'a> FileView<'a> {
    pub fn new(data: &'a [u8], file: FileKind) -> Self {
        Self { data, file }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> FileKind {
        self.file
    }

    pub fn out_of_bounds(&self, table: &'static str, offset: usize, need: usize) -> Error {
        Error::new(
            self.file,
            offset,
            ErrorKind::OutOfBounds {
                table,
                need,
                have: self.data.len(),
            },
        )
    }

    pub fn topology(&self, offset: usize, detail: impl Into<String>) -> Error {
        Error::topology(self.file, offset, detail)
    }

    /// [`resolve`] with the failure turned into an [`ErrorKind::OutOfBounds`] naming `table`.
    pub fn table(
        &self,
        table: &'static str,
        base: usize,
        relative: i32,
        count: i32,
        record_size: usize,
    ) -> IResult<TableView<'a>> {
        resolve(self.data, base, relative, record_size, count)
            .map_err(|e| self.out_of_bounds(table, e.start, e.need))
    }

    /// [`Self::table`] for a stored [`TableRef`].
    pub fn table_ref(
        &self,
        table: &'static str,
        base: usize,
        table_ref: TableRef,
        record_size: usize,
    ) -> IResult<TableView<'a>> {
        self.table(table, base, table_ref.offset, table_ref.count, record_size)
    }

    /// Run a fixed-size field parser on the `size` bytes at `offset`.
    pub fn parse_at<T>(
        &self,
        table: &'static str,
        offset: usize,
        size: usize,
        mut parser: impl FnMut(&mut &'a [u8]) -> WResult<T>,
    ) -> IResult<T> {
        let end = offset.saturating_add(size);
        if end > self.data.len() {
            return Err(self.out_of_bounds(table, offset, end));
        }
        let input = &mut &self.data[offset..end];
        parser(input).map_err(|_| self.out_of_bounds(table, offset, end))
    }

    /// Parse every record of `view` with a fixed-size field parser, then let
    /// `finish` resolve anything addressed relative to the record.
    pub fn parse_table<R, T>(
        &self,
        table: &'static str,
        view: &TableView<'a>,
        mut fields: impl FnMut(&mut &'a [u8]) -> WResult<R>,
        mut finish: impl FnMut(usize, R) -> IResult<T>,
    ) -> IResult<Vec<T>> {
        let mut out = Vec::with_capacity(view.len());
        for (base, bytes) in view.records() {
            let input = &mut &bytes[..];
            let raw = fields(input)
                .map_err(|_| self.out_of_bounds(table, base, base + view.record_size()))?;
            out.push(finish(base, raw)?);
        }
        Ok(out)
    }

    /// [`Self::parse_table`] for records with nothing to resolve.
    pub fn parse_records<R>(
        &self,
        table: &'static str,
        view: &TableView<'a>,
        fields: impl FnMut(&mut &'a [u8]) -> WResult<R>,
    ) -> IResult<Vec<R>> {
        self.parse_table(table, view, fields, |_, raw| Ok(raw))
    }

    /// `len` raw bytes at `base + relative`.
    pub fn bytes_at(
        &self,
        table: &'static str,
        base: usize,
        relative: i32,
        len: usize,
    ) -> IResult<&'a [u8]> {
        let count = i32::try_from(len).map_err(|_| self.out_of_bounds(table, base, usize::MAX))?;
        Ok(self.table(table, base, relative, count, 1)?.bytes())
    }

    /// Read a null-terminated string at an absolute offset.
    pub fn cstr_at(&self, table: &'static str, offset: usize) -> IResult<String> {
        let remaining = self
            .data
            .get(offset..)
            .ok_or_else(|| self.out_of_bounds(table, offset, offset))?;
        let end = remaining
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.out_of_bounds(table, offset, self.data.len() + 1))?;
        Ok(String::from_utf8_lossy(&remaining[..end]).into_owned())
    }

    /// Resolve a name stored relative to its owning record's own address.
    ///
    /// An offset of zero means the record carries no name.
    pub fn name_at(
        &self,
        table: &'static str,
        record_base: usize,
        relative: i32,
    ) -> IResult<String> {
        if relative == 0 {
            return Ok(String::new());
        }
        let offset = resolve_relptr(record_base, relative)
            .ok_or_else(|| self.out_of_bounds(table, record_base, record_base))?;
        self.cstr_at(table, offset)
    }
}

/// Decode a fixed-length, null-padded name field.
pub fn fixed_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub fn parse_i32_array<const N: usize>(input: &mut &[u8]) -> WResult<[i32; N]> {
    let mut out = [0i32; N];
    for value in &mut out {
        *value = le_i32.parse_next(input)?;
    }
    Ok(out)
}

pub fn parse_f32_array<const N: usize>(input: &mut &[u8]) -> WResult<[f32; N]> {
    let mut out = [0f32; N];
    for value in &mut out {
        *value = le_f32.parse_next(input)?;
    }
    Ok(out)
}

pub fn parse_byte_array<const N: usize>(input: &mut &[u8]) -> WResult<[u8; N]> {
    let bytes: &[u8] = take(N).parse_next(input)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn parse_vector3(input: &mut &[u8]) -> WResult<Vector3> {
    parse_f32_array::<3>(input)
}

pub fn parse_matrix3x4(input: &mut &[u8]) -> WResult<Matrix3x4> {
    parse_f32_array::<12>(input)
}

// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin deterministic columnar encoding for the shard tables.
//!
//! Layout, little-endian, packed: magic `FFT1`, format version, column
//! count, row count, a schema block (name + type tag per column), one
//! column-major data page per column, and a trailing CRC-32 over everything
//! after the magic. One row group, no compression: identical rows encode to
//! identical bytes on every platform.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use std::fs;
use std::path::Path;

pub const TABLE_MAGIC: [u8; 4] = *b"FFT1";
pub const TABLE_VERSION: u32 = 1;

const TYPE_U64: u8 = 1;
const TYPE_STR: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnData {
    U64(Vec<u64>),
    Str(Vec<String>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::U64(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            ColumnData::U64(_) => TYPE_U64,
            ColumnData::Str(_) => TYPE_STR,
        }
    }
}

/// An in-memory table with a fixed column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<(String, ColumnData)>,
}

impl Table {
    pub fn new(columns: Vec<(String, ColumnData)>) -> FlashFreezeResult<Self> {
        if let Some((_, first)) = columns.first() {
            let rows = first.len();
            for (name, column) in &columns {
                if column.len() != rows {
                    return Err(FlashFreezeError::invalid(format!(
                        "column {name:?} has {} rows, expected {rows}",
                        column.len()
                    )));
                }
            }
        }
        Ok(Self { columns })
    }

    pub fn row_count(&self) -> u64 {
        self.columns.first().map_or(0, |(_, c)| c.len() as u64)
    }

    pub fn u64_column(&self, name: &str) -> Option<&[u64]> {
        self.columns.iter().find_map(|(n, c)| match c {
            ColumnData::U64(v) if n == name => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn str_column(&self, name: &str) -> Option<&[String]> {
        self.columns.iter().find_map(|(n, c)| match c {
            ColumnData::Str(v) if n == name => Some(v.as_slice()),
            _ => None,
        })
    }

    pub fn to_bytes(&self) -> FlashFreezeResult<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&TABLE_VERSION.to_le_bytes());
        let column_count = u32::try_from(self.columns.len())
            .map_err(|_| FlashFreezeError::invalid("too many columns"))?;
        body.extend_from_slice(&column_count.to_le_bytes());
        body.extend_from_slice(&self.row_count().to_le_bytes());

        for (name, column) in &self.columns {
            let name_len = u16::try_from(name.len())
                .map_err(|_| FlashFreezeError::invalid("column name too long"))?;
            body.extend_from_slice(&name_len.to_le_bytes());
            body.extend_from_slice(name.as_bytes());
            body.push(column.type_tag());
        }

        for (_, column) in &self.columns {
            let mut page = Vec::new();
            match column {
                ColumnData::U64(values) => {
                    for value in values {
                        page.extend_from_slice(&value.to_le_bytes());
                    }
                }
                ColumnData::Str(values) => {
                    for value in values {
                        let len = u32::try_from(value.len())
                            .map_err(|_| FlashFreezeError::invalid("string value too long"))?;
                        page.extend_from_slice(&len.to_le_bytes());
                        page.extend_from_slice(value.as_bytes());
                    }
                }
            }
            body.extend_from_slice(&(page.len() as u64).to_le_bytes());
            body.extend_from_slice(&page);
        }

        let mut out = Vec::with_capacity(4 + body.len() + 4);
        out.extend_from_slice(&TABLE_MAGIC);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> FlashFreezeResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.take(4)?;
        if magic != TABLE_MAGIC {
            return Err(FlashFreezeError::invalid("not a columnar table: bad magic"));
        }
        if bytes.len() < 8 {
            return Err(FlashFreezeError::invalid("columnar table truncated"));
        }
        let body = &bytes[4..bytes.len() - 4];
        let stored_crc = {
            let mut crc = [0u8; 4];
            crc.copy_from_slice(&bytes[bytes.len() - 4..]);
            u32::from_le_bytes(crc)
        };
        if crc32fast::hash(body) != stored_crc {
            return Err(FlashFreezeError::invalid("columnar table checksum mismatch"));
        }

        let mut cursor = Cursor::new(body);
        let version = cursor.read_u32()?;
        if version != TABLE_VERSION {
            return Err(FlashFreezeError::invalid(format!(
                "unsupported table version {version}"
            )));
        }
        let column_count = cursor.read_u32()? as usize;
        let row_count = cursor.read_u64()? as usize;

        let mut schema = Vec::with_capacity(column_count.min(64));
        for _ in 0..column_count {
            let name_len = cursor.read_u16()? as usize;
            let name_bytes = cursor.take(name_len)?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| FlashFreezeError::invalid("column name not UTF-8"))?
                .to_string();
            let tag = cursor.read_u8()?;
            schema.push((name, tag));
        }

        let mut columns = Vec::with_capacity(schema.len());
        for (name, tag) in schema {
            let page_len = cursor.read_u64()? as usize;
            let page = cursor.take(page_len)?;
            let data = match tag {
                TYPE_U64 => {
                    let expected = row_count
                        .checked_mul(8)
                        .ok_or_else(|| FlashFreezeError::invalid("row count overflow"))?;
                    if page.len() != expected {
                        return Err(FlashFreezeError::invalid(format!(
                            "u64 column {name:?} page size mismatch"
                        )));
                    }
                    let mut values = Vec::with_capacity(row_count);
                    for chunk in page.chunks_exact(8) {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(chunk);
                        values.push(u64::from_le_bytes(raw));
                    }
                    ColumnData::U64(values)
                }
                TYPE_STR => {
                    // Each value costs at least its length prefix, which
                    // bounds any capacity a hostile row count could claim.
                    let mut values = Vec::with_capacity(row_count.min(page.len() / 4 + 1));
                    let mut inner = Cursor::new(page);
                    for _ in 0..row_count {
                        let len = inner.read_u32()? as usize;
                        let raw = inner.take(len)?;
                        let value = std::str::from_utf8(raw)
                            .map_err(|_| FlashFreezeError::invalid("string value not UTF-8"))?;
                        values.push(value.to_string());
                    }
                    if !inner.at_end() {
                        return Err(FlashFreezeError::invalid(format!(
                            "string column {name:?} has trailing bytes"
                        )));
                    }
                    ColumnData::Str(values)
                }
                other => {
                    return Err(FlashFreezeError::invalid(format!(
                        "unknown column type tag {other}"
                    )));
                }
            };
            columns.push((name, data));
        }
        if !cursor.at_end() {
            return Err(FlashFreezeError::invalid("columnar table has trailing bytes"));
        }
        Table::new(columns)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> FlashFreezeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| FlashFreezeError::invalid("columnar table truncated"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> FlashFreezeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> FlashFreezeResult<u16> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(raw))
    }

    fn read_u32(&mut self) -> FlashFreezeResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> FlashFreezeResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

pub fn write_table(path: &Path, table: &Table) -> FlashFreezeResult<()> {
    let bytes = table.to_bytes()?;
    fs::write(path, bytes).map_err(|e| FlashFreezeError::io(path, e))
}

pub fn read_table(path: &Path) -> FlashFreezeResult<Table> {
    let bytes = fs::read(path).map_err(|e| FlashFreezeError::io(path, e))?;
    Table::from_bytes(&bytes).map_err(|e| match e {
        FlashFreezeError::InvalidInput { reason } => FlashFreezeError::invalid(format!(
            "{}: {reason}",
            path.display()
        )),
        other => other,
    })
}

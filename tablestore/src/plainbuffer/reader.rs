use super::consts::*;
use crate::crc8;
use crate::{
    Column, ColumnValue, PrimaryKeyColumn, PrimaryKeyValue, Result, Row,
    TableStoreError,
};

/// Cursor over an in-memory row payload. Tracks the most recently consumed
/// tag the way the wire grammar is written: every field reader leaves the
/// next tag (or 0 at end of input) in `last_tag`.
struct PlainBufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
    last_tag: u8,
}

fn corrupted(what: &str) -> TableStoreError {
    TableStoreError::CorruptedRow(what.to_string())
}

impl<'a> PlainBufferReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        PlainBufferReader {
            buf,
            pos: 0,
            last_tag: 0,
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_tag(&mut self) {
        if self.pos < self.buf.len() {
            self.last_tag = self.buf[self.pos];
            self.pos += 1;
        } else {
            self.last_tag = 0;
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| corrupted("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| corrupted("length prefix exceeds input"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_slice(LITTLE_ENDIAN_32_SIZE)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let bytes = self.read_slice(LITTLE_ENDIAN_64_SIZE)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_slice(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupted("cell name or value is not UTF-8"))
    }

    fn expect_tag(&mut self, tag: u8, what: &str) -> Result<()> {
        if self.last_tag != tag {
            return Err(corrupted(&format!(
                "expected {what} tag {tag:#04x} but found {:#04x}",
                self.last_tag
            )));
        }
        Ok(())
    }

    fn read_header(&mut self) -> Result<()> {
        if self.read_u32_le()? != HEADER {
            return Err(corrupted("invalid header"));
        }
        Ok(())
    }

    /// Reads a primary-key value cell payload, rolling the cell checksum.
    /// Sentinels never appear in server-emitted rows.
    fn read_primary_key_value(&mut self, cell_checksum: &mut u8) -> Result<PrimaryKeyValue> {
        self.expect_tag(TAG_CELL_VALUE, "cell value")?;
        let declared = self.read_u32_le()? as usize;
        let value_start = self.pos;
        let variant = self.read_u8()?;
        let value = match variant {
            VT_INTEGER => {
                let int = self.read_u64_le()?;
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_INTEGER);
                *cell_checksum = crc8::crc_u64(*cell_checksum, int);
                PrimaryKeyValue::Integer(int as i64)
            }
            VT_STRING => {
                let len = self.read_u32_le()?;
                let string = self.read_utf8(len as usize)?;
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_STRING);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, string.as_bytes());
                PrimaryKeyValue::String(string)
            }
            VT_BLOB => {
                let len = self.read_u32_le()?;
                let blob = self.read_slice(len as usize)?.to_vec();
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_BLOB);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, &blob);
                PrimaryKeyValue::Binary(blob)
            }
            other => {
                return Err(corrupted(&format!(
                    "unsupported primary key variant {other:#04x}"
                )))
            }
        };
        if self.pos - value_start != declared {
            return Err(corrupted("cell value length prefix mismatch"));
        }
        self.read_tag();
        Ok(value)
    }

    fn read_column_value(&mut self, cell_checksum: &mut u8) -> Result<ColumnValue> {
        self.expect_tag(TAG_CELL_VALUE, "cell value")?;
        let declared = self.read_u32_le()? as usize;
        let value_start = self.pos;
        let variant = self.read_u8()?;
        let value = match variant {
            VT_INTEGER => {
                let int = self.read_u64_le()?;
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_INTEGER);
                *cell_checksum = crc8::crc_u64(*cell_checksum, int);
                ColumnValue::Integer(int as i64)
            }
            VT_STRING => {
                let len = self.read_u32_le()?;
                let string = self.read_utf8(len as usize)?;
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_STRING);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, string.as_bytes());
                ColumnValue::String(string)
            }
            VT_BLOB => {
                let len = self.read_u32_le()?;
                let blob = self.read_slice(len as usize)?.to_vec();
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_BLOB);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, &blob);
                ColumnValue::Binary(blob)
            }
            VT_BOOLEAN => {
                let byte = self.read_u8()?;
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_BOOLEAN);
                *cell_checksum = crc8::crc_u8(*cell_checksum, byte);
                ColumnValue::Boolean(byte != 0)
            }
            VT_DOUBLE => {
                let bits = self.read_u64_le()?;
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_DOUBLE);
                *cell_checksum = crc8::crc_u64(*cell_checksum, bits);
                ColumnValue::Double(f64::from_bits(bits))
            }
            other => return Err(corrupted(&format!("unsupported column variant {other:#04x}"))),
        };
        if self.pos - value_start != declared {
            return Err(corrupted("cell value length prefix mismatch"));
        }
        self.read_tag();
        Ok(value)
    }

    fn read_cell_name(&mut self, cell_checksum: &mut u8) -> Result<String> {
        self.expect_tag(TAG_CELL_NAME, "cell name")?;
        let len = self.read_u32_le()? as usize;
        let name = self.read_utf8(len)?;
        *cell_checksum = crc8::crc_bytes(*cell_checksum, name.as_bytes());
        self.read_tag();
        Ok(name)
    }

    fn verify_cell_checksum(&mut self, cell_checksum: u8) -> Result<()> {
        self.expect_tag(TAG_CELL_CHECKSUM, "cell checksum")?;
        let stored = self.read_u8()?;
        if stored != cell_checksum {
            return Err(corrupted("cell checksum mismatch"));
        }
        self.read_tag();
        Ok(())
    }

    fn read_primary_key_column(&mut self, row_checksum: &mut u8) -> Result<PrimaryKeyColumn> {
        self.expect_tag(TAG_CELL, "cell")?;
        self.read_tag();
        let mut cell_checksum = 0u8;
        let name = self.read_cell_name(&mut cell_checksum)?;
        let value = self.read_primary_key_value(&mut cell_checksum)?;
        self.verify_cell_checksum(cell_checksum)?;
        *row_checksum = crc8::crc_u8(*row_checksum, cell_checksum);
        Ok(PrimaryKeyColumn { name, value })
    }

    fn read_column(&mut self, row_checksum: &mut u8) -> Result<Column> {
        self.expect_tag(TAG_CELL, "cell")?;
        self.read_tag();
        let mut cell_checksum = 0u8;
        let name = self.read_cell_name(&mut cell_checksum)?;
        let value = self.read_column_value(&mut cell_checksum)?;
        let mut column = Column {
            name,
            value,
            timestamp: None,
        };
        // On the wire a cell type precedes the timestamp, but the checksum
        // feed order is timestamp first. Hold the type back until the
        // timestamp (if any) has been folded in.
        let mut cell_type = None;
        if self.last_tag == TAG_CELL_TYPE {
            cell_type = Some(self.read_u8()?);
            self.read_tag();
        }
        if self.last_tag == TAG_CELL_TIMESTAMP {
            let timestamp = self.read_u64_le()?;
            cell_checksum = crc8::crc_u64(cell_checksum, timestamp);
            column.timestamp = Some(timestamp as i64);
            self.read_tag();
        }
        if let Some(cell_type) = cell_type {
            cell_checksum = crc8::crc_u8(cell_checksum, cell_type);
        }
        self.verify_cell_checksum(cell_checksum)?;
        *row_checksum = crc8::crc_u8(*row_checksum, cell_checksum);
        Ok(column)
    }

    fn read_row_without_header(&mut self) -> Result<Row> {
        let mut row = Row::default();
        let mut row_checksum = 0u8;

        self.expect_tag(TAG_ROW_PK, "row primary key")?;
        self.read_tag();
        while self.last_tag == TAG_CELL {
            let column = self.read_primary_key_column(&mut row_checksum)?;
            row.primary_key.columns.push(column);
        }

        if self.last_tag == TAG_ROW_DATA {
            self.read_tag();
            while self.last_tag == TAG_CELL {
                let column = self.read_column(&mut row_checksum)?;
                row.columns.push(column);
            }
        }

        if self.last_tag == TAG_DELETE_ROW_MARKER {
            self.read_tag();
            row_checksum = crc8::crc_u8(row_checksum, 1);
        } else {
            row_checksum = crc8::crc_u8(row_checksum, 0);
        }

        self.expect_tag(TAG_ROW_CHECKSUM, "row checksum")?;
        let stored = self.read_u8()?;
        if stored != row_checksum {
            return Err(corrupted("row checksum mismatch"));
        }
        self.read_tag();

        Ok(row)
    }
}

/// Decodes a single row: header, cells, checksums. Rejects trailing bytes.
pub fn deserialize_row(buf: &[u8]) -> Result<Row> {
    let mut reader = PlainBufferReader::new(buf);
    reader.read_header()?;
    reader.read_tag();
    let row = reader.read_row_without_header()?;
    if !reader.is_at_end() {
        return Err(corrupted("trailing bytes after row"));
    }
    Ok(row)
}

/// Decodes a row stream: one header, then rows concatenated directly, each
/// ending in its own row checksum. An empty input yields no rows.
pub fn deserialize_rows(buf: &[u8]) -> Result<Vec<Row>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = PlainBufferReader::new(buf);
    reader.read_header()?;
    reader.read_tag();
    let mut rows = Vec::new();
    while !reader.is_at_end() {
        rows.push(reader.read_row_without_header()?);
    }
    Ok(rows)
}

/// Decodes a standalone primary-key value: a bare variant with no tag and no
/// length prefix. This is the only place the sentinels are decodable.
pub fn deserialize_primary_key_value(buf: &[u8]) -> Result<PrimaryKeyValue> {
    let mut reader = PlainBufferReader::new(buf);
    let variant = reader.read_u8()?;
    let value = match variant {
        VT_INTEGER => PrimaryKeyValue::Integer(reader.read_u64_le()? as i64),
        VT_STRING => {
            let len = reader.read_u32_le()? as usize;
            PrimaryKeyValue::String(reader.read_utf8(len)?)
        }
        VT_BLOB => {
            let len = reader.read_u32_le()? as usize;
            PrimaryKeyValue::Binary(reader.read_slice(len)?.to_vec())
        }
        VT_INF_MIN => PrimaryKeyValue::InfMin,
        VT_INF_MAX => PrimaryKeyValue::InfMax,
        VT_AUTO_INCREMENT => PrimaryKeyValue::AutoIncrement,
        other => {
            return Err(corrupted(&format!(
                "unsupported primary key variant {other:#04x}"
            )))
        }
    };
    if !reader.is_at_end() {
        return Err(corrupted("trailing bytes after standalone value"));
    }
    Ok(value)
}

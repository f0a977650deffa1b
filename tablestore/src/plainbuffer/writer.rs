use super::consts::*;
use super::{
    compute_primary_key_row_size, compute_row_delete_size, compute_row_put_size,
    compute_row_update_size, compute_standalone_column_value_size,
    compute_standalone_primary_key_value_size,
};
use crate::crc8;
use crate::{
    Column, ColumnValue, PrimaryKey, PrimaryKeyValue, Result, RowUpdateOp, TableStoreError,
};

struct PlainBufferWriter {
    buf: Vec<u8>,
}

fn length_u32(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| TableStoreError::Serialization("value exceeds 4GiB length limit".to_string()))
}

impl PlainBufferWriter {
    fn with_capacity(capacity: usize) -> Self {
        PlainBufferWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_u64_le(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn write_header(&mut self) {
        self.write_u32_le(HEADER);
    }

    fn write_cell_name(&mut self, name: &str, cell_checksum: &mut u8) -> Result<()> {
        self.write_u8(TAG_CELL_NAME);
        self.write_u32_le(length_u32(name.len())?);
        self.write_bytes(name.as_bytes());
        *cell_checksum = crc8::crc_bytes(*cell_checksum, name.as_bytes());
        Ok(())
    }

    fn write_primary_key_value(
        &mut self,
        value: &PrimaryKeyValue,
        cell_checksum: &mut u8,
    ) -> Result<()> {
        self.write_u8(TAG_CELL_VALUE);
        match value {
            PrimaryKeyValue::InfMin => {
                self.write_u32_le(1);
                self.write_u8(VT_INF_MIN);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_INF_MIN);
            }
            PrimaryKeyValue::InfMax => {
                self.write_u32_le(1);
                self.write_u8(VT_INF_MAX);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_INF_MAX);
            }
            PrimaryKeyValue::AutoIncrement => {
                self.write_u32_le(1);
                self.write_u8(VT_AUTO_INCREMENT);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_AUTO_INCREMENT);
            }
            PrimaryKeyValue::Integer(int) => {
                self.write_u32_le(1 + LITTLE_ENDIAN_64_SIZE as u32);
                self.write_u8(VT_INTEGER);
                self.write_u64_le(*int as u64);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_INTEGER);
                *cell_checksum = crc8::crc_u64(*cell_checksum, *int as u64);
            }
            PrimaryKeyValue::String(string) => {
                let len = length_u32(string.len())?;
                self.write_u32_le(1 + LITTLE_ENDIAN_32_SIZE as u32 + len);
                self.write_u8(VT_STRING);
                self.write_u32_le(len);
                self.write_bytes(string.as_bytes());
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_STRING);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, string.as_bytes());
            }
            PrimaryKeyValue::Binary(blob) => {
                let len = length_u32(blob.len())?;
                self.write_u32_le(1 + LITTLE_ENDIAN_32_SIZE as u32 + len);
                self.write_u8(VT_BLOB);
                self.write_u32_le(len);
                self.write_bytes(blob);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_BLOB);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, blob);
            }
        }
        Ok(())
    }

    fn write_column_value(&mut self, value: &ColumnValue, cell_checksum: &mut u8) -> Result<()> {
        self.write_u8(TAG_CELL_VALUE);
        match value {
            ColumnValue::Integer(int) => {
                self.write_u32_le(1 + LITTLE_ENDIAN_64_SIZE as u32);
                self.write_u8(VT_INTEGER);
                self.write_u64_le(*int as u64);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_INTEGER);
                *cell_checksum = crc8::crc_u64(*cell_checksum, *int as u64);
            }
            ColumnValue::String(string) => {
                let len = length_u32(string.len())?;
                self.write_u32_le(1 + LITTLE_ENDIAN_32_SIZE as u32 + len);
                self.write_u8(VT_STRING);
                self.write_u32_le(len);
                self.write_bytes(string.as_bytes());
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_STRING);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, string.as_bytes());
            }
            ColumnValue::Binary(blob) => {
                let len = length_u32(blob.len())?;
                self.write_u32_le(1 + LITTLE_ENDIAN_32_SIZE as u32 + len);
                self.write_u8(VT_BLOB);
                self.write_u32_le(len);
                self.write_bytes(blob);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_BLOB);
                *cell_checksum = crc8::crc_u32(*cell_checksum, len);
                *cell_checksum = crc8::crc_bytes(*cell_checksum, blob);
            }
            ColumnValue::Boolean(boolean) => {
                self.write_u32_le(2);
                self.write_u8(VT_BOOLEAN);
                let byte = if *boolean { 1 } else { 0 };
                self.write_u8(byte);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_BOOLEAN);
                *cell_checksum = crc8::crc_u8(*cell_checksum, byte);
            }
            ColumnValue::Double(double) => {
                let bits = double.to_bits();
                self.write_u32_le(1 + LITTLE_ENDIAN_64_SIZE as u32);
                self.write_u8(VT_DOUBLE);
                self.write_u64_le(bits);
                *cell_checksum = crc8::crc_u8(*cell_checksum, VT_DOUBLE);
                *cell_checksum = crc8::crc_u64(*cell_checksum, bits);
            }
        }
        Ok(())
    }

    fn write_primary_key_column(
        &mut self,
        name: &str,
        value: &PrimaryKeyValue,
        row_checksum: &mut u8,
    ) -> Result<()> {
        let mut cell_checksum = 0u8;
        self.write_u8(TAG_CELL);
        self.write_cell_name(name, &mut cell_checksum)?;
        self.write_primary_key_value(value, &mut cell_checksum)?;
        self.write_u8(TAG_CELL_CHECKSUM);
        self.write_u8(cell_checksum);
        *row_checksum = crc8::crc_u8(*row_checksum, cell_checksum);
        Ok(())
    }

    fn write_column(&mut self, column: &Column, row_checksum: &mut u8) -> Result<()> {
        let mut cell_checksum = 0u8;
        self.write_u8(TAG_CELL);
        self.write_cell_name(&column.name, &mut cell_checksum)?;
        self.write_column_value(&column.value, &mut cell_checksum)?;
        if let Some(timestamp) = column.timestamp {
            self.write_u8(TAG_CELL_TIMESTAMP);
            self.write_u64_le(timestamp as u64);
            cell_checksum = crc8::crc_u64(cell_checksum, timestamp as u64);
        }
        self.write_u8(TAG_CELL_CHECKSUM);
        self.write_u8(cell_checksum);
        *row_checksum = crc8::crc_u8(*row_checksum, cell_checksum);
        Ok(())
    }

    fn write_update_column(&mut self, op: &RowUpdateOp, row_checksum: &mut u8) -> Result<()> {
        let (name, cell_type, timestamp) = match op {
            RowUpdateOp::Put(column) => {
                self.write_column(column, row_checksum)?;
                return Ok(());
            }
            RowUpdateOp::DeleteVersion { name, timestamp } => {
                (name, DELETE_ONE_VERSION, Some(*timestamp))
            }
            RowUpdateOp::DeleteAll { name } => (name, DELETE_ALL_VERSION, None),
        };

        let mut cell_checksum = 0u8;
        self.write_u8(TAG_CELL);
        self.write_cell_name(name, &mut cell_checksum)?;
        self.write_u8(TAG_CELL_TYPE);
        self.write_u8(cell_type);
        if let Some(timestamp) = timestamp {
            self.write_u8(TAG_CELL_TIMESTAMP);
            self.write_u64_le(timestamp as u64);
        }
        // The checksum feed order differs from the byte order: timestamp
        // first, then the cell type.
        if let Some(timestamp) = timestamp {
            cell_checksum = crc8::crc_u64(cell_checksum, timestamp as u64);
        }
        cell_checksum = crc8::crc_u8(cell_checksum, cell_type);
        self.write_u8(TAG_CELL_CHECKSUM);
        self.write_u8(cell_checksum);
        *row_checksum = crc8::crc_u8(*row_checksum, cell_checksum);
        Ok(())
    }

    fn write_primary_key(&mut self, primary_key: &PrimaryKey, row_checksum: &mut u8) -> Result<()> {
        self.write_u8(TAG_ROW_PK);
        for column in &primary_key.columns {
            self.write_primary_key_column(&column.name, &column.value, row_checksum)?;
        }
        Ok(())
    }

    fn write_delete_marker(&mut self, row_checksum: &mut u8) {
        self.write_u8(TAG_DELETE_ROW_MARKER);
        *row_checksum = crc8::crc_u8(*row_checksum, 1);
    }

    fn write_row_checksum(&mut self, row_checksum: u8) {
        self.write_u8(TAG_ROW_CHECKSUM);
        self.write_u8(row_checksum);
    }

    fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

/// Serializes a primary-key value in standalone form: a bare variant with no
/// tag and no length prefix, for embedding in non-row protobuf fields.
pub fn serialize_primary_key_value(value: &PrimaryKeyValue) -> Result<Vec<u8>> {
    let mut writer =
        PlainBufferWriter::with_capacity(compute_standalone_primary_key_value_size(value));
    match value {
        PrimaryKeyValue::InfMin => writer.write_u8(VT_INF_MIN),
        PrimaryKeyValue::InfMax => writer.write_u8(VT_INF_MAX),
        PrimaryKeyValue::AutoIncrement => writer.write_u8(VT_AUTO_INCREMENT),
        PrimaryKeyValue::Integer(int) => {
            writer.write_u8(VT_INTEGER);
            writer.write_u64_le(*int as u64);
        }
        PrimaryKeyValue::String(string) => {
            writer.write_u8(VT_STRING);
            writer.write_u32_le(length_u32(string.len())?);
            writer.write_bytes(string.as_bytes());
        }
        PrimaryKeyValue::Binary(blob) => {
            writer.write_u8(VT_BLOB);
            writer.write_u32_le(length_u32(blob.len())?);
            writer.write_bytes(blob);
        }
    }
    Ok(writer.into_buffer())
}

/// Serializes an attribute value in standalone form, used for filter leaves.
pub fn serialize_column_value(value: &ColumnValue) -> Result<Vec<u8>> {
    let mut writer = PlainBufferWriter::with_capacity(compute_standalone_column_value_size(value));
    match value {
        ColumnValue::Integer(int) => {
            writer.write_u8(VT_INTEGER);
            writer.write_u64_le(*int as u64);
        }
        ColumnValue::String(string) => {
            writer.write_u8(VT_STRING);
            writer.write_u32_le(length_u32(string.len())?);
            writer.write_bytes(string.as_bytes());
        }
        ColumnValue::Binary(blob) => {
            writer.write_u8(VT_BLOB);
            writer.write_u32_le(length_u32(blob.len())?);
            writer.write_bytes(blob);
        }
        ColumnValue::Boolean(boolean) => {
            writer.write_u8(VT_BOOLEAN);
            writer.write_u8(if *boolean { 1 } else { 0 });
        }
        ColumnValue::Double(double) => {
            writer.write_u8(VT_DOUBLE);
            writer.write_u64_le(double.to_bits());
        }
    }
    Ok(writer.into_buffer())
}

/// Serializes a primary key as a standalone row: header, pk cells and row
/// checksum, with no attribute data and no delete marker.
pub fn serialize_primary_key(primary_key: &PrimaryKey) -> Result<Vec<u8>> {
    let mut writer = PlainBufferWriter::with_capacity(compute_primary_key_row_size(primary_key));
    let mut row_checksum = 0u8;
    writer.write_header();
    writer.write_primary_key(primary_key, &mut row_checksum)?;
    row_checksum = crc8::crc_u8(row_checksum, 0); // no delete marker
    writer.write_row_checksum(row_checksum);
    Ok(writer.into_buffer())
}

pub fn serialize_row_put(primary_key: &PrimaryKey, columns: &[Column]) -> Result<Vec<u8>> {
    let mut writer = PlainBufferWriter::with_capacity(compute_row_put_size(primary_key, columns));
    let mut row_checksum = 0u8;
    writer.write_header();
    writer.write_primary_key(primary_key, &mut row_checksum)?;
    if !columns.is_empty() {
        writer.write_u8(TAG_ROW_DATA);
        for column in columns {
            writer.write_column(column, &mut row_checksum)?;
        }
    }
    row_checksum = crc8::crc_u8(row_checksum, 0);
    writer.write_row_checksum(row_checksum);
    Ok(writer.into_buffer())
}

pub fn serialize_row_update(primary_key: &PrimaryKey, ops: &[RowUpdateOp]) -> Result<Vec<u8>> {
    let mut writer = PlainBufferWriter::with_capacity(compute_row_update_size(primary_key, ops));
    let mut row_checksum = 0u8;
    writer.write_header();
    writer.write_primary_key(primary_key, &mut row_checksum)?;
    if !ops.is_empty() {
        writer.write_u8(TAG_ROW_DATA);
        for op in ops {
            writer.write_update_column(op, &mut row_checksum)?;
        }
    }
    row_checksum = crc8::crc_u8(row_checksum, 0);
    writer.write_row_checksum(row_checksum);
    Ok(writer.into_buffer())
}

pub fn serialize_row_delete(primary_key: &PrimaryKey) -> Result<Vec<u8>> {
    let mut writer = PlainBufferWriter::with_capacity(compute_row_delete_size(primary_key));
    let mut row_checksum = 0u8;
    writer.write_header();
    writer.write_primary_key(primary_key, &mut row_checksum)?;
    writer.write_delete_marker(&mut row_checksum);
    writer.write_row_checksum(row_checksum);
    Ok(writer.into_buffer())
}

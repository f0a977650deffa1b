//! The PlainBuffer row codec: the self-describing, checksummed binary format
//! carrying every row payload on the wire.
//!
//! A row is a 4-byte little-endian `0x75` header, a tagged primary-key cell
//! run, an optional tagged attribute cell run, an optional row-delete marker,
//! and a trailing CRC-8 row checksum over the per-cell checksums. Byte-exact
//! compatibility with the server matters here; sizes are precomputed so
//! encoders allocate once and the precomputation agrees with the encoder
//! byte-for-byte.

pub(crate) mod consts;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

pub use reader::{deserialize_primary_key_value, deserialize_row, deserialize_rows};
pub use writer::{
    serialize_column_value, serialize_primary_key, serialize_primary_key_value,
    serialize_row_delete, serialize_row_put, serialize_row_update,
};

use consts::{LITTLE_ENDIAN_32_SIZE, LITTLE_ENDIAN_64_SIZE};

use crate::{Column, ColumnValue, PrimaryKey, PrimaryKeyValue, RowUpdateOp};

/// Exact encoded size of a primary-key value cell payload: value tag, length
/// prefix, type byte and the type-specific bytes.
pub fn compute_primary_key_value_size(value: &PrimaryKeyValue) -> usize {
    let payload = match value {
        PrimaryKeyValue::Integer(_) => LITTLE_ENDIAN_64_SIZE,
        PrimaryKeyValue::String(s) => LITTLE_ENDIAN_32_SIZE + s.len(),
        PrimaryKeyValue::Binary(b) => LITTLE_ENDIAN_32_SIZE + b.len(),
        PrimaryKeyValue::InfMin | PrimaryKeyValue::InfMax | PrimaryKeyValue::AutoIncrement => 0,
    };
    1 + LITTLE_ENDIAN_32_SIZE + 1 + payload
}

/// Exact encoded size of an attribute value cell payload.
pub fn compute_column_value_size(value: &ColumnValue) -> usize {
    let payload = match value {
        ColumnValue::Integer(_) => LITTLE_ENDIAN_64_SIZE,
        ColumnValue::String(s) => LITTLE_ENDIAN_32_SIZE + s.len(),
        ColumnValue::Binary(b) => LITTLE_ENDIAN_32_SIZE + b.len(),
        ColumnValue::Boolean(_) => 1,
        ColumnValue::Double(_) => LITTLE_ENDIAN_64_SIZE,
    };
    1 + LITTLE_ENDIAN_32_SIZE + 1 + payload
}

/// Size of the standalone form (no tag, no length prefix), used when a value
/// is embedded directly in a non-row protobuf field.
pub fn compute_standalone_primary_key_value_size(value: &PrimaryKeyValue) -> usize {
    compute_primary_key_value_size(value) - LITTLE_ENDIAN_32_SIZE - 1
}

pub fn compute_standalone_column_value_size(value: &ColumnValue) -> usize {
    compute_column_value_size(value) - LITTLE_ENDIAN_32_SIZE - 1
}

fn compute_cell_name_size(name: &str) -> usize {
    1 + LITTLE_ENDIAN_32_SIZE + name.len()
}

pub fn compute_primary_key_column_size(name: &str, value: &PrimaryKeyValue) -> usize {
    // TAG_CELL + name + value + TAG_CELL_CHECKSUM + checksum
    1 + compute_cell_name_size(name) + compute_primary_key_value_size(value) + 2
}

pub fn compute_column_size(column: &Column) -> usize {
    let mut size = 1 + compute_cell_name_size(&column.name);
    size += compute_column_value_size(&column.value);
    if column.timestamp.is_some() {
        size += 1 + LITTLE_ENDIAN_64_SIZE;
    }
    size + 2
}

pub fn compute_update_column_size(op: &RowUpdateOp) -> usize {
    match op {
        RowUpdateOp::Put(column) => compute_column_size(column),
        RowUpdateOp::DeleteVersion { name, .. } => {
            // TAG_CELL + name + TAG_CELL_TYPE + type + TAG_CELL_TIMESTAMP + ts
            // + TAG_CELL_CHECKSUM + checksum
            1 + compute_cell_name_size(name) + 2 + 1 + LITTLE_ENDIAN_64_SIZE + 2
        }
        RowUpdateOp::DeleteAll { name } => 1 + compute_cell_name_size(name) + 2 + 2,
    }
}

pub fn compute_primary_key_size(primary_key: &PrimaryKey) -> usize {
    let mut size = 1; // TAG_ROW_PK
    for column in &primary_key.columns {
        size += compute_primary_key_column_size(&column.name, &column.value);
    }
    size
}

/// Size of a primary key serialized as a standalone row (header, pk cells,
/// row checksum), the form used for point lookups and range endpoints.
pub fn compute_primary_key_row_size(primary_key: &PrimaryKey) -> usize {
    LITTLE_ENDIAN_32_SIZE + compute_primary_key_size(primary_key) + 2
}

pub fn compute_row_put_size(primary_key: &PrimaryKey, columns: &[Column]) -> usize {
    let mut size = LITTLE_ENDIAN_32_SIZE + compute_primary_key_size(primary_key);
    if !columns.is_empty() {
        size += 1; // TAG_ROW_DATA
        for column in columns {
            size += compute_column_size(column);
        }
    }
    size + 2
}

pub fn compute_row_update_size(primary_key: &PrimaryKey, ops: &[RowUpdateOp]) -> usize {
    let mut size = LITTLE_ENDIAN_32_SIZE + compute_primary_key_size(primary_key);
    if !ops.is_empty() {
        size += 1; // TAG_ROW_DATA
        for op in ops {
            size += compute_update_column_size(op);
        }
    }
    size + 2
}

pub fn compute_row_delete_size(primary_key: &PrimaryKey) -> usize {
    // header + pk + TAG_DELETE_ROW_MARKER + TAG_ROW_CHECKSUM + checksum
    LITTLE_ENDIAN_32_SIZE + compute_primary_key_size(primary_key) + 3
}

use super::consts::*;
use super::*;
use crate::crc8;
use crate::{Column, ColumnValue, PrimaryKey, PrimaryKeyValue, RowUpdateOp};

fn integer_pk() -> PrimaryKey {
    PrimaryKey::new().with_column("pk", PrimaryKeyValue::Integer(42))
}

fn sample_columns() -> Vec<Column> {
    vec![
        Column::new("age", ColumnValue::Integer(30)),
        Column::new("name", ColumnValue::String("alice".to_string())).with_timestamp(1_500_000),
        Column::new("raw", ColumnValue::Binary(vec![0xde, 0xad, 0xbe, 0xef])),
        Column::new("ok", ColumnValue::Boolean(true)).with_timestamp(1_500_001),
        Column::new("score", ColumnValue::Double(99.5)),
        // a second version of an existing column name
        Column::new("name", ColumnValue::String("bob".to_string())).with_timestamp(1_400_000),
    ]
}

#[test]
fn encode_integer_primary_key_exact_bytes() {
    let encoded = serialize_primary_key(&integer_pk()).unwrap();

    let mut cell_crc = crc8::crc_bytes(0, b"pk");
    cell_crc = crc8::crc_u8(cell_crc, VT_INTEGER);
    cell_crc = crc8::crc_u64(cell_crc, 42);
    let mut row_crc = crc8::crc_u8(0, cell_crc);
    row_crc = crc8::crc_u8(row_crc, 0);

    let mut expected = vec![0x75, 0x00, 0x00, 0x00];
    expected.push(TAG_ROW_PK);
    expected.push(TAG_CELL);
    expected.push(TAG_CELL_NAME);
    expected.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
    expected.extend_from_slice(b"pk");
    expected.push(TAG_CELL_VALUE);
    expected.extend_from_slice(&[0x09, 0x00, 0x00, 0x00]);
    expected.push(VT_INTEGER);
    expected.extend_from_slice(&[0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    expected.push(TAG_CELL_CHECKSUM);
    expected.push(cell_crc);
    expected.push(TAG_ROW_CHECKSUM);
    expected.push(row_crc);

    assert_eq!(encoded, expected);
}

#[test]
fn decode_inf_max_standalone() {
    assert_eq!(
        deserialize_primary_key_value(&[VT_INF_MAX]).unwrap(),
        PrimaryKeyValue::InfMax
    );
    assert_eq!(
        deserialize_primary_key_value(&[VT_INF_MIN]).unwrap(),
        PrimaryKeyValue::InfMin
    );
}

#[test]
fn standalone_primary_key_value_roundtrip() {
    let values = [
        PrimaryKeyValue::Integer(-7),
        PrimaryKeyValue::Integer(i64::MAX),
        PrimaryKeyValue::String("user#0001".to_string()),
        PrimaryKeyValue::Binary(vec![0, 1, 2, 255]),
        PrimaryKeyValue::InfMin,
        PrimaryKeyValue::InfMax,
        PrimaryKeyValue::AutoIncrement,
    ];
    for value in values {
        let encoded = serialize_primary_key_value(&value).unwrap();
        assert_eq!(
            encoded.len(),
            compute_standalone_primary_key_value_size(&value)
        );
        assert_eq!(deserialize_primary_key_value(&encoded).unwrap(), value);
    }
}

#[test]
fn standalone_rejects_trailing_bytes() {
    assert!(deserialize_primary_key_value(&[VT_INF_MAX, 0x00]).is_err());
}

#[test]
fn put_row_roundtrip() {
    let pk = PrimaryKey::new()
        .with_column("uid", PrimaryKeyValue::String("u-1".to_string()))
        .with_column("seq", PrimaryKeyValue::Integer(-12))
        .with_column("tag", PrimaryKeyValue::Binary(vec![7, 8]));
    let columns = sample_columns();

    let encoded = serialize_row_put(&pk, &columns).unwrap();
    let row = deserialize_row(&encoded).unwrap();
    assert_eq!(row.primary_key, pk);
    assert_eq!(row.columns, columns);
}

#[test]
fn put_row_without_columns_roundtrip() {
    let encoded = serialize_row_put(&integer_pk(), &[]).unwrap();
    let row = deserialize_row(&encoded).unwrap();
    assert_eq!(row.primary_key, integer_pk());
    assert!(row.columns.is_empty());
}

#[test]
fn row_stream_roundtrip() {
    let rows = [
        (integer_pk(), sample_columns()),
        (
            PrimaryKey::new().with_column("pk", PrimaryKeyValue::Integer(43)),
            vec![Column::new("v", ColumnValue::Integer(1))],
        ),
        (
            PrimaryKey::new().with_column("pk", PrimaryKeyValue::Integer(44)),
            vec![],
        ),
    ];
    // A get-range body has one header; rows are concatenated directly.
    let mut stream = Vec::new();
    for (i, (pk, columns)) in rows.iter().enumerate() {
        let encoded = serialize_row_put(pk, columns).unwrap();
        if i == 0 {
            stream.extend_from_slice(&encoded);
        } else {
            stream.extend_from_slice(&encoded[LITTLE_ENDIAN_32_SIZE..]);
        }
    }

    let decoded = deserialize_rows(&stream).unwrap();
    assert_eq!(decoded.len(), 3);
    for (decoded, (pk, columns)) in decoded.iter().zip(rows.iter()) {
        assert_eq!(&decoded.primary_key, pk);
        assert_eq!(&decoded.columns, columns);
    }

    assert!(deserialize_rows(&[]).unwrap().is_empty());
}

#[test]
fn size_precomputation_matches_encoder() {
    let pk = PrimaryKey::new()
        .with_column("a", PrimaryKeyValue::String("key".to_string()))
        .with_column("b", PrimaryKeyValue::Integer(9));

    let encoded = serialize_primary_key(&pk).unwrap();
    assert_eq!(encoded.len(), compute_primary_key_row_size(&pk));

    let columns = sample_columns();
    let encoded = serialize_row_put(&pk, &columns).unwrap();
    assert_eq!(encoded.len(), compute_row_put_size(&pk, &columns));

    let encoded = serialize_row_put(&pk, &[]).unwrap();
    assert_eq!(encoded.len(), compute_row_put_size(&pk, &[]));

    let ops = vec![
        RowUpdateOp::Put(Column::new("c", ColumnValue::Double(1.25)).with_timestamp(77)),
        RowUpdateOp::Put(Column::new("d", ColumnValue::Boolean(false))),
        RowUpdateOp::DeleteVersion {
            name: "e".to_string(),
            timestamp: 123_456,
        },
        RowUpdateOp::DeleteAll {
            name: "f".to_string(),
        },
    ];
    let encoded = serialize_row_update(&pk, &ops).unwrap();
    assert_eq!(encoded.len(), compute_row_update_size(&pk, &ops));

    let encoded = serialize_row_delete(&pk).unwrap();
    assert_eq!(encoded.len(), compute_row_delete_size(&pk));
}

#[test]
fn range_endpoint_sentinels_encode_in_cells() {
    let pk = PrimaryKey::new()
        .with_column("pk", PrimaryKeyValue::InfMin)
        .with_column("sub", PrimaryKeyValue::InfMax);
    let encoded = serialize_primary_key(&pk).unwrap();
    assert_eq!(encoded.len(), compute_primary_key_row_size(&pk));
    // Each sentinel cell value is tag + length prefix of 1 + the type byte.
    let needle = [TAG_CELL_VALUE, 0x01, 0x00, 0x00, 0x00, VT_INF_MIN];
    assert!(encoded.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn single_bit_corruption_is_detected() {
    let pk = PrimaryKey::new()
        .with_column("uid", PrimaryKeyValue::String("u-1".to_string()))
        .with_column("seq", PrimaryKeyValue::Integer(5));
    let columns = vec![
        Column::new("age", ColumnValue::Integer(30)),
        Column::new("name", ColumnValue::String("alice".to_string())).with_timestamp(1_500_000),
        Column::new("ok", ColumnValue::Boolean(true)),
        Column::new("score", ColumnValue::Double(99.5)),
    ];
    let encoded = serialize_row_put(&pk, &columns).unwrap();

    for byte_index in 0..encoded.len() {
        for bit in 0..8 {
            let mut mutated = encoded.clone();
            mutated[byte_index] ^= 1 << bit;
            assert!(
                deserialize_row(&mutated).is_err(),
                "flip of bit {bit} in byte {byte_index} went undetected"
            );
        }
    }
}

#[test]
fn delete_marker_feeds_row_checksum() {
    let encoded = serialize_row_delete(&integer_pk()).unwrap();
    // Marker is present and the row checksum folds in 1 instead of 0.
    assert!(encoded.contains(&TAG_DELETE_ROW_MARKER));
    let without_marker = serialize_primary_key(&integer_pk()).unwrap();
    assert_ne!(
        encoded.last().unwrap(),
        without_marker.last().unwrap(),
        "delete marker must change the row checksum"
    );

    let row = deserialize_row(&encoded).unwrap();
    assert_eq!(row.primary_key, integer_pk());
}

#[test]
fn update_cell_type_precedes_timestamp_on_wire_but_follows_in_crc() {
    let ops = vec![RowUpdateOp::DeleteVersion {
        name: "c".to_string(),
        timestamp: 1234,
    }];
    let encoded = serialize_row_update(&integer_pk(), &ops).unwrap();

    let mut expected_cell_crc = crc8::crc_bytes(0, b"c");
    // CRC order: timestamp before cell type, the reverse of the byte order.
    expected_cell_crc = crc8::crc_u64(expected_cell_crc, 1234);
    expected_cell_crc = crc8::crc_u8(expected_cell_crc, DELETE_ONE_VERSION);

    let mut expected_cell = vec![TAG_CELL, TAG_CELL_NAME, 0x01, 0x00, 0x00, 0x00];
    expected_cell.extend_from_slice(b"c");
    expected_cell.push(TAG_CELL_TYPE);
    expected_cell.push(DELETE_ONE_VERSION);
    expected_cell.push(TAG_CELL_TIMESTAMP);
    expected_cell.extend_from_slice(&1234u64.to_le_bytes());
    expected_cell.push(TAG_CELL_CHECKSUM);
    expected_cell.push(expected_cell_crc);

    assert!(
        encoded
            .windows(expected_cell.len())
            .any(|w| w == expected_cell),
        "update cell bytes or checksum order diverged"
    );
}

#[test]
fn header_is_checked() {
    let mut encoded = serialize_row_put(&integer_pk(), &sample_columns()).unwrap();
    encoded[0] = 0x74;
    assert!(matches!(
        deserialize_row(&encoded),
        Err(crate::TableStoreError::CorruptedRow(_))
    ));
}

#[test]
fn truncated_input_is_rejected() {
    let encoded = serialize_row_put(&integer_pk(), &sample_columns()).unwrap();
    for len in 0..encoded.len() {
        assert!(deserialize_row(&encoded[..len]).is_err());
    }
}

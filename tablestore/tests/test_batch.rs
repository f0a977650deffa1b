use prost::Message;

use tablestore::proto;
use tablestore::{
    BatchGetRowRequest, BatchWriteRowRequest, Column, ColumnValue, MultiPointEntry,
    MultiPointQueryCriterion, PrimaryKey, PrimaryKeyValue, RowPutChange, TableStoreError,
};

use crate::{scripted_client, test_config, Reply};

fn pk(value: i64) -> PrimaryKey {
    PrimaryKey::new().with_column("pk", PrimaryKeyValue::Integer(value))
}

fn write_request_three_rows() -> BatchWriteRowRequest {
    BatchWriteRowRequest {
        puts: (1..=3)
            .map(|i| {
                RowPutChange::new("t", pk(i))
                    .with_column(Column::new("v", ColumnValue::Integer(i)))
            })
            .collect(),
        updates: Vec::new(),
        deletes: Vec::new(),
    }
}

fn write_row_ok() -> proto::RowInBatchWriteRowResponse {
    proto::RowInBatchWriteRowResponse {
        is_ok: true,
        error: None,
        consumed: Some(proto::ConsumedCapacity {
            capacity_unit: Some(proto::CapacityUnit {
                read: None,
                write: Some(1),
            }),
        }),
        row: None,
    }
}

fn write_row_failed(code: &str) -> proto::RowInBatchWriteRowResponse {
    proto::RowInBatchWriteRowResponse {
        is_ok: false,
        error: Some(proto::Error {
            code: code.to_string(),
            message: Some("busy".to_string()),
        }),
        consumed: None,
        row: None,
    }
}

fn write_response(rows: Vec<proto::RowInBatchWriteRowResponse>) -> Vec<u8> {
    proto::BatchWriteRowResponse {
        tables: vec![proto::TableInBatchWriteRowResponse {
            table_name: "t".to_string(),
            rows,
        }],
    }
    .encode_to_vec()
}

#[tokio::test]
async fn batch_write_resubmits_only_failed_rows() {
    let (client, factory) = scripted_client(
        vec![
            Reply::ok(write_response(vec![
                write_row_ok(),
                write_row_failed("OTSNotEnoughCapacityUnit"),
                write_row_ok(),
            ])),
            Reply::ok(write_response(vec![write_row_ok()])),
        ],
        test_config(),
    );

    let response = client
        .batch_write_row(&write_request_three_rows())
        .await
        .unwrap();

    // All three rows end up successful, in original order.
    assert_eq!(response.put_results.len(), 3);
    for (i, result) in response.put_results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert!(result.outcome.is_ok(), "row {i} should have succeeded");
    }
    assert_eq!(response.consumed.write, Some(3));

    // The retry attempt carried exactly the one failed row.
    let requests = factory.requests();
    assert_eq!(requests.len(), 2);
    let first = proto::BatchWriteRowRequest::decode(&requests[0].body[..]).unwrap();
    let second = proto::BatchWriteRowRequest::decode(&requests[1].body[..]).unwrap();
    assert_eq!(first.tables[0].rows.len(), 3);
    assert_eq!(second.tables.len(), 1);
    assert_eq!(second.tables[0].table_name, "t");
    assert_eq!(second.tables[0].rows.len(), 1);
    assert_eq!(second.tables[0].rows[0], first.tables[0].rows[1]);
}

#[tokio::test]
async fn batch_write_stops_on_non_retriable_rows() {
    let (client, factory) = scripted_client(
        vec![Reply::ok(write_response(vec![
            write_row_ok(),
            write_row_failed("OTSConditionCheckFail"),
            write_row_ok(),
        ]))],
        test_config(),
    );

    let response = client
        .batch_write_row(&write_request_three_rows())
        .await
        .unwrap();

    assert_eq!(factory.requests().len(), 1, "no retry for permanent errors");
    assert!(response.put_results[0].outcome.is_ok());
    let failed = response.put_results[1].outcome.as_ref().unwrap_err();
    assert_eq!(failed.code, "OTSConditionCheckFail");
    assert!(response.put_results[2].outcome.is_ok());
}

#[tokio::test]
async fn batch_write_retry_exhaustion_reports_per_row_errors() {
    let mut config = test_config();
    config.retry_max_times = 1;
    let (client, factory) = scripted_client(
        vec![
            Reply::ok(write_response(vec![
                write_row_failed("OTSServerBusy"),
                write_row_ok(),
                write_row_ok(),
            ])),
            Reply::ok(write_response(vec![write_row_failed("OTSServerBusy")])),
        ],
        config,
    );

    let response = client
        .batch_write_row(&write_request_three_rows())
        .await
        .unwrap();

    assert_eq!(factory.requests().len(), 2);
    let failed = response.put_results[0].outcome.as_ref().unwrap_err();
    assert_eq!(failed.code, "OTSServerBusy");
    assert!(response.put_results[1].outcome.is_ok());
    assert!(response.put_results[2].outcome.is_ok());
}

#[tokio::test]
async fn batch_get_routes_rows_with_user_data() {
    let row_bytes =
        tablestore::plainbuffer::serialize_row_put(&pk(7), &[]).unwrap();
    let body = proto::BatchGetRowResponse {
        tables: vec![proto::TableInBatchGetRowResponse {
            table_name: "t".to_string(),
            rows: vec![
                proto::RowInBatchGetRowResponse {
                    is_ok: true,
                    error: None,
                    consumed: Some(proto::ConsumedCapacity {
                        capacity_unit: Some(proto::CapacityUnit {
                            read: Some(1),
                            write: None,
                        }),
                    }),
                    row: Some(row_bytes),
                },
                proto::RowInBatchGetRowResponse {
                    is_ok: true,
                    error: None,
                    consumed: None,
                    // Absent row: the key does not exist.
                    row: None,
                },
            ],
        }],
    }
    .encode_to_vec();

    let (client, _factory) = scripted_client(vec![Reply::ok(body)], test_config());

    let request = BatchGetRowRequest {
        criteria: vec![MultiPointQueryCriterion {
            rows: vec![
                MultiPointEntry {
                    primary_key: pk(7),
                    user_data: Some(b"first".to_vec()),
                },
                MultiPointEntry::new(pk(8)),
            ],
            max_versions: Some(1),
            ..MultiPointQueryCriterion::new("t")
        }],
    };
    let response = client.batch_get_row(&request).await.unwrap();

    assert_eq!(response.results.len(), 1);
    let rows = &response.results[0];
    assert_eq!(rows[0].user_data.as_deref(), Some(&b"first"[..]));
    let found = rows[0].outcome.as_ref().unwrap();
    assert_eq!(found.row.as_ref().unwrap().primary_key, pk(7));
    assert!(rows[1].outcome.as_ref().unwrap().row.is_none());
    assert_eq!(response.consumed.read, Some(1));
}

#[tokio::test]
async fn batch_requests_are_validated() {
    let (client, factory) = scripted_client(Vec::new(), test_config());

    let error = client
        .batch_write_row(&BatchWriteRowRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(error, TableStoreError::Validation(_)));

    let duplicate_tables = BatchGetRowRequest {
        criteria: vec![
            MultiPointQueryCriterion {
                rows: vec![MultiPointEntry::new(pk(1))],
                ..MultiPointQueryCriterion::new("t")
            },
            MultiPointQueryCriterion {
                rows: vec![MultiPointEntry::new(pk(2))],
                ..MultiPointQueryCriterion::new("t")
            },
        ],
    };
    let error = client.batch_get_row(&duplicate_tables).await.unwrap_err();
    assert!(matches!(error, TableStoreError::Validation(_)));

    assert!(factory.requests().is_empty());
}

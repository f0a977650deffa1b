use futures_util::StreamExt;
use prost::Message;

use tablestore::proto;
use tablestore::{
    Column, ColumnValue, Direction, PrimaryKey, PrimaryKeyValue, RangeQueryCriterion, Row,
};

use crate::{scripted_client, test_config, Reply};

fn pk(value: i64) -> PrimaryKey {
    PrimaryKey::new().with_column("pk", PrimaryKeyValue::Integer(value))
}

fn row(value: i64) -> Row {
    Row {
        primary_key: pk(value),
        columns: vec![Column::new("v", ColumnValue::Integer(value)).with_timestamp(1_000)],
    }
}

fn page(rows: &[Row], next_start: Option<PrimaryKey>) -> Vec<u8> {
    let mut stream = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let encoded =
            tablestore::plainbuffer::serialize_row_put(&row.primary_key, &row.columns).unwrap();
        if i == 0 {
            stream.extend_from_slice(&encoded);
        } else {
            stream.extend_from_slice(&encoded[4..]);
        }
    }
    proto::GetRangeResponse {
        consumed: Some(proto::ConsumedCapacity {
            capacity_unit: Some(proto::CapacityUnit {
                read: Some(1),
                write: None,
            }),
        }),
        rows: stream,
        next_start_primary_key: next_start
            .map(|start| tablestore::plainbuffer::serialize_primary_key(&start).unwrap()),
    }
    .encode_to_vec()
}

fn scan_criterion() -> RangeQueryCriterion {
    let mut criterion = RangeQueryCriterion::new(
        "t",
        PrimaryKey::new().with_column("pk", PrimaryKeyValue::InfMin),
        PrimaryKey::new().with_column("pk", PrimaryKeyValue::InfMax),
    );
    criterion.direction = Direction::Forward;
    criterion.max_versions = Some(1);
    criterion
}

#[tokio::test]
async fn iterator_walks_all_pages_in_order() {
    // Three pages: two rows, an empty continuation, a final row.
    let (client, factory) = scripted_client(
        vec![
            Reply::ok(page(&[row(1), row(2)], Some(pk(3)))),
            Reply::ok(page(&[], Some(pk(4)))),
            Reply::ok(page(&[row(5)], None)),
        ],
        test_config(),
    );

    let mut iterator = client.range_iterator(scan_criterion(), 0);
    let mut seen = Vec::new();
    loop {
        iterator.move_next().await.unwrap();
        if !iterator.valid() {
            break;
        }
        seen.push(iterator.get().unwrap());
    }

    assert_eq!(seen, vec![row(1), row(2), row(5)]);
    assert!(!iterator.valid());
    // Exhausted: further calls stay exhausted without issuing requests.
    iterator.move_next().await.unwrap();
    assert!(!iterator.valid());
    assert_eq!(factory.requests().len(), 3);
    assert_eq!(factory.remaining(), 0);

    // Every page was requested at the server-returned cursor.
    let starts: Vec<Vec<u8>> = factory
        .requests()
        .iter()
        .map(|request| {
            proto::GetRangeRequest::decode(&request.body[..])
                .unwrap()
                .inclusive_start_primary_key
        })
        .collect();
    assert_eq!(
        starts[1],
        tablestore::plainbuffer::serialize_primary_key(&pk(3)).unwrap()
    );
    assert_eq!(
        starts[2],
        tablestore::plainbuffer::serialize_primary_key(&pk(4)).unwrap()
    );
}

#[tokio::test]
async fn iterator_matches_manual_pagination() {
    let pages = vec![
        Reply::ok(page(&[row(1)], Some(pk(2)))),
        Reply::ok(page(&[row(2), row(3)], None)),
    ];

    // Manual pagination over the same script.
    let (client, _factory) = scripted_client(pages.clone(), test_config());
    let mut manual = Vec::new();
    let mut criterion = scan_criterion();
    loop {
        let response = client
            .get_range(&tablestore::GetRangeRequest::new(criterion.clone()))
            .await
            .unwrap();
        manual.extend(response.rows);
        match response.next_start {
            Some(next) => criterion.inclusive_start = next,
            None => break,
        }
    }

    let (client, _factory) = scripted_client(pages, test_config());
    let streamed: Vec<Row> = client
        .range_iterator(scan_criterion(), 2)
        .into_stream()
        .map(|row| row.unwrap())
        .collect()
        .await;

    assert_eq!(streamed, manual);
}

#[tokio::test]
async fn iterator_surfaces_errors_after_buffered_rows() {
    let mut config = test_config();
    config.retry_max_times = 0;
    let (client, _factory) = scripted_client(
        vec![
            Reply::ok(page(&[row(1)], Some(pk(2)))),
            Reply::server_error(500, "OTSInternalServerError", "boom"),
        ],
        config,
    );

    let mut iterator = client.range_iterator(scan_criterion(), 0);

    iterator.move_next().await.unwrap();
    assert!(iterator.valid());
    assert_eq!(iterator.get().unwrap(), row(1));

    // The buffered row was drained; the stored failure surfaces now.
    let error = iterator.move_next().await.unwrap_err();
    assert_eq!(error.code(), Some("OTSInternalServerError"));

    // After the error the iterator is exhausted, not wedged.
    iterator.move_next().await.unwrap();
    assert!(!iterator.valid());
}

#[tokio::test]
async fn first_move_does_not_skip_the_first_row() {
    let (client, _factory) = scripted_client(
        vec![Reply::ok(page(&[row(1), row(2)], None))],
        test_config(),
    );

    let mut iterator = client.range_iterator(scan_criterion(), 0);
    iterator.move_next().await.unwrap();
    assert_eq!(iterator.get().unwrap(), row(1));
    iterator.move_next().await.unwrap();
    assert_eq!(iterator.get().unwrap(), row(2));
    iterator.move_next().await.unwrap();
    assert!(!iterator.valid());
}

//! Batch translation: building grouped-by-table wire requests while
//! remembering where every row came from, routing per-row results back to
//! the caller's original positions, and the merge-on-retry bookkeeping that
//! resubmits only the rows that failed in a prior attempt.

use indexmap::IndexMap;

use super::{
    filter_to_bytes, from_pb_consumed, protocol_error, to_pb_condition, to_pb_return_content,
    to_pb_time_range,
};
use crate::plainbuffer;
use crate::proto;
use crate::request::*;
use crate::table::CapacityUnit;
use crate::{Result, TableStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Put,
    Update,
    Delete,
}

/// Maps every (table, row) position of the wire request back to the position
/// in one of the caller's three lists.
#[derive(Debug, Default)]
pub(crate) struct BatchWriteIndex {
    pub tables: Vec<Vec<(WriteKind, usize)>>,
}

fn build_write_row(
    kind: WriteKind,
    change_primary_key: Vec<u8>,
    condition: &crate::Condition,
    return_type: crate::ReturnType,
) -> Result<proto::RowInBatchWriteRowRequest> {
    Ok(proto::RowInBatchWriteRowRequest {
        r#type: match kind {
            WriteKind::Put => proto::OperationType::Put as i32,
            WriteKind::Update => proto::OperationType::Update as i32,
            WriteKind::Delete => proto::OperationType::Delete as i32,
        },
        row_change: change_primary_key,
        condition: Some(to_pb_condition(condition)?),
        return_content: Some(to_pb_return_content(return_type)),
    })
}

/// Groups the three parallel change lists by table, in first-seen table
/// order, recording per row where it came from.
pub(crate) fn build_batch_write(
    request: &BatchWriteRowRequest,
) -> Result<(proto::BatchWriteRowRequest, BatchWriteIndex)> {
    let mut tables: IndexMap<String, (proto::TableInBatchWriteRowRequest, Vec<(WriteKind, usize)>)> =
        IndexMap::new();

    let mut push = |table_name: &str,
                    kind: WriteKind,
                    index: usize,
                    row: proto::RowInBatchWriteRowRequest| {
        let entry = tables
            .entry(table_name.to_string())
            .or_insert_with(|| {
                (
                    proto::TableInBatchWriteRowRequest {
                        table_name: table_name.to_string(),
                        rows: Vec::new(),
                    },
                    Vec::new(),
                )
            });
        entry.0.rows.push(row);
        entry.1.push((kind, index));
    };

    for (i, put) in request.puts.iter().enumerate() {
        let row = build_write_row(
            WriteKind::Put,
            plainbuffer::serialize_row_put(&put.primary_key, &put.columns)?,
            &put.condition,
            put.return_type,
        )?;
        push(&put.table_name, WriteKind::Put, i, row);
    }
    for (i, update) in request.updates.iter().enumerate() {
        let row = build_write_row(
            WriteKind::Update,
            plainbuffer::serialize_row_update(&update.primary_key, &update.ops)?,
            &update.condition,
            update.return_type,
        )?;
        push(&update.table_name, WriteKind::Update, i, row);
    }
    for (i, delete) in request.deletes.iter().enumerate() {
        let row = build_write_row(
            WriteKind::Delete,
            plainbuffer::serialize_row_delete(&delete.primary_key)?,
            &delete.condition,
            delete.return_type,
        )?;
        push(&delete.table_name, WriteKind::Delete, i, row);
    }

    let mut pb = proto::BatchWriteRowRequest::default();
    let mut index = BatchWriteIndex::default();
    for (_, (table, rows)) in tables {
        pb.tables.push(table);
        index.tables.push(rows);
    }
    Ok((pb, index))
}

fn row_outcome(
    is_ok: bool,
    error: Option<&proto::Error>,
    consumed: Option<&proto::ConsumedCapacity>,
    row: Option<&Vec<u8>>,
) -> Result<std::result::Result<BatchRowSuccess, BatchError>> {
    if is_ok {
        Ok(Ok(BatchRowSuccess {
            consumed: from_pb_consumed(consumed),
            row: match row {
                Some(bytes) if !bytes.is_empty() => Some(plainbuffer::deserialize_row(bytes)?),
                _ => None,
            },
        }))
    } else {
        let error = error.ok_or_else(|| protocol_error("failed batch row carries no error"))?;
        Ok(Err(BatchError {
            code: error.code.clone(),
            message: error.message.clone().unwrap_or_default(),
        }))
    }
}

/// Routes a (merged) wire response back into the caller's three lists, in
/// original order, with user data re-attached.
pub(crate) fn parse_batch_write(
    request: &BatchWriteRowRequest,
    index: &BatchWriteIndex,
    response: &proto::BatchWriteRowResponse,
) -> Result<BatchWriteRowResponse> {
    if response.tables.len() != index.tables.len() {
        return Err(protocol_error("batch write response table count mismatch"));
    }

    let mut consumed = CapacityUnit::default();
    let mut puts: Vec<Option<BatchRowResult>> = vec![None; request.puts.len()];
    let mut updates: Vec<Option<BatchRowResult>> = vec![None; request.updates.len()];
    let mut deletes: Vec<Option<BatchRowResult>> = vec![None; request.deletes.len()];

    for (table, positions) in response.tables.iter().zip(&index.tables) {
        if table.rows.len() != positions.len() {
            return Err(protocol_error("batch write response row count mismatch"));
        }
        for (row, (kind, original)) in table.rows.iter().zip(positions) {
            let outcome = row_outcome(
                row.is_ok,
                row.error.as_ref(),
                row.consumed.as_ref(),
                row.row.as_ref(),
            )?;
            if let Ok(success) = &outcome {
                consumed.merge(&success.consumed);
            }
            let (slot, user_data) = match kind {
                WriteKind::Put => (&mut puts[*original], &request.puts[*original].user_data),
                WriteKind::Update => (
                    &mut updates[*original],
                    &request.updates[*original].user_data,
                ),
                WriteKind::Delete => (
                    &mut deletes[*original],
                    &request.deletes[*original].user_data,
                ),
            };
            *slot = Some(BatchRowResult {
                table_name: table.table_name.clone(),
                index: *original,
                user_data: user_data.clone(),
                outcome,
            });
        }
    }

    let unwrap_all = |slots: Vec<Option<BatchRowResult>>| -> Result<Vec<BatchRowResult>> {
        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| protocol_error("batch write response is missing rows")))
            .collect()
    };

    Ok(BatchWriteRowResponse {
        consumed,
        put_results: unwrap_all(puts)?,
        update_results: unwrap_all(updates)?,
        delete_results: unwrap_all(deletes)?,
        ..Default::default()
    })
}

/// Folds a retry attempt's response into the running merged response. The
/// merged response stays aligned with the initial request; the new response
/// covers only the rows that were still failing, in order.
pub(crate) fn merge_batch_write_response(
    merged: Option<proto::BatchWriteRowResponse>,
    response: proto::BatchWriteRowResponse,
) -> Result<proto::BatchWriteRowResponse> {
    let Some(mut merged) = merged else {
        return Ok(response);
    };
    let mut response_table = 0;
    for table in merged.tables.iter_mut() {
        let Some(new_table) = response.tables.get(response_table) else {
            break;
        };
        if table.table_name != new_table.table_name {
            continue;
        }
        let mut response_row = 0;
        for row in table.rows.iter_mut() {
            if !row.is_ok {
                let new_row = new_table.rows.get(response_row).ok_or_else(|| {
                    protocol_error("batch write retry response is missing rows")
                })?;
                *row = new_row.clone();
                response_row += 1;
            }
        }
        response_table += 1;
    }
    Ok(merged)
}

/// All still-failing rows of the merged response, as synthetic server errors
/// for the retry decision.
pub(crate) fn batch_write_failures(
    merged: &proto::BatchWriteRowResponse,
    status: i32,
) -> Vec<TableStoreError> {
    merged
        .tables
        .iter()
        .flat_map(|table| &table.rows)
        .filter(|row| !row.is_ok)
        .map(|row| synthetic_row_error(row.error.as_ref(), status))
        .collect()
}

/// Rebuilds the wire request with exactly the rows that are still failing,
/// cloned from the initial request so indices stay aligned.
pub(crate) fn reduce_batch_write_request(
    initial: &proto::BatchWriteRowRequest,
    merged: &proto::BatchWriteRowResponse,
) -> Result<proto::BatchWriteRowRequest> {
    if initial.tables.len() != merged.tables.len() {
        return Err(protocol_error("batch write response table count mismatch"));
    }
    let mut reduced = proto::BatchWriteRowRequest::default();
    for (request_table, response_table) in initial.tables.iter().zip(&merged.tables) {
        if request_table.rows.len() != response_table.rows.len() {
            return Err(protocol_error("batch write response row count mismatch"));
        }
        let mut table: Option<proto::TableInBatchWriteRowRequest> = None;
        for (row, response_row) in request_table.rows.iter().zip(&response_table.rows) {
            if !response_row.is_ok {
                table
                    .get_or_insert_with(|| proto::TableInBatchWriteRowRequest {
                        table_name: request_table.table_name.clone(),
                        rows: Vec::new(),
                    })
                    .rows
                    .push(row.clone());
            }
        }
        if let Some(table) = table {
            reduced.tables.push(table);
        }
    }
    Ok(reduced)
}

// ----------------------------------------------------------- batch get row

/// One wire table per criterion; duplicate table names are rejected during
/// validation, so table order identifies the criterion.
pub(crate) fn build_batch_get(request: &BatchGetRowRequest) -> Result<proto::BatchGetRowRequest> {
    let mut pb = proto::BatchGetRowRequest::default();
    for criterion in &request.criteria {
        pb.tables.push(proto::TableInBatchGetRowRequest {
            table_name: criterion.table_name.clone(),
            primary_key: criterion
                .rows
                .iter()
                .map(|row| plainbuffer::serialize_primary_key(&row.primary_key))
                .collect::<Result<_>>()?,
            columns_to_get: criterion.columns_to_get.clone(),
            time_range: criterion.time_range.as_ref().map(to_pb_time_range),
            max_versions: criterion.max_versions,
            cache_blocks: criterion.cache_blocks,
            filter: criterion.filter.as_ref().map(filter_to_bytes).transpose()?,
        });
    }
    Ok(pb)
}

pub(crate) fn parse_batch_get(
    request: &BatchGetRowRequest,
    response: &proto::BatchGetRowResponse,
) -> Result<BatchGetRowResponse> {
    if response.tables.len() != request.criteria.len() {
        return Err(protocol_error("batch get response table count mismatch"));
    }

    let mut consumed = CapacityUnit::default();
    let mut results = Vec::with_capacity(request.criteria.len());
    for (criterion, table) in request.criteria.iter().zip(&response.tables) {
        if table.rows.len() != criterion.rows.len() {
            return Err(protocol_error("batch get response row count mismatch"));
        }
        let mut table_results = Vec::with_capacity(table.rows.len());
        for (i, (entry, row)) in criterion.rows.iter().zip(&table.rows).enumerate() {
            let outcome = row_outcome(
                row.is_ok,
                row.error.as_ref(),
                row.consumed.as_ref(),
                row.row.as_ref(),
            )?;
            if let Ok(success) = &outcome {
                consumed.merge(&success.consumed);
            }
            table_results.push(BatchRowResult {
                table_name: table.table_name.clone(),
                index: i,
                user_data: entry.user_data.clone(),
                outcome,
            });
        }
        results.push(table_results);
    }

    Ok(BatchGetRowResponse {
        consumed,
        results,
        ..Default::default()
    })
}

pub(crate) fn merge_batch_get_response(
    merged: Option<proto::BatchGetRowResponse>,
    response: proto::BatchGetRowResponse,
) -> Result<proto::BatchGetRowResponse> {
    let Some(mut merged) = merged else {
        return Ok(response);
    };
    let mut response_table = 0;
    for table in merged.tables.iter_mut() {
        let Some(new_table) = response.tables.get(response_table) else {
            break;
        };
        if table.table_name != new_table.table_name {
            continue;
        }
        let mut response_row = 0;
        for row in table.rows.iter_mut() {
            if !row.is_ok {
                let new_row = new_table
                    .rows
                    .get(response_row)
                    .ok_or_else(|| protocol_error("batch get retry response is missing rows"))?;
                *row = new_row.clone();
                response_row += 1;
            }
        }
        response_table += 1;
    }
    Ok(merged)
}

pub(crate) fn batch_get_failures(
    merged: &proto::BatchGetRowResponse,
    status: i32,
) -> Vec<TableStoreError> {
    merged
        .tables
        .iter()
        .flat_map(|table| &table.rows)
        .filter(|row| !row.is_ok)
        .map(|row| synthetic_row_error(row.error.as_ref(), status))
        .collect()
}

/// Rebuilds the wire request with only the still-failing point reads,
/// keeping each table's projection, time range and filter.
pub(crate) fn reduce_batch_get_request(
    initial: &proto::BatchGetRowRequest,
    merged: &proto::BatchGetRowResponse,
) -> Result<proto::BatchGetRowRequest> {
    if initial.tables.len() != merged.tables.len() {
        return Err(protocol_error("batch get response table count mismatch"));
    }
    let mut reduced = proto::BatchGetRowRequest::default();
    for (request_table, response_table) in initial.tables.iter().zip(&merged.tables) {
        if request_table.primary_key.len() != response_table.rows.len() {
            return Err(protocol_error("batch get response row count mismatch"));
        }
        let mut table: Option<proto::TableInBatchGetRowRequest> = None;
        for (primary_key, response_row) in
            request_table.primary_key.iter().zip(&response_table.rows)
        {
            if !response_row.is_ok {
                table
                    .get_or_insert_with(|| proto::TableInBatchGetRowRequest {
                        table_name: request_table.table_name.clone(),
                        primary_key: Vec::new(),
                        columns_to_get: request_table.columns_to_get.clone(),
                        time_range: request_table.time_range.clone(),
                        max_versions: request_table.max_versions,
                        cache_blocks: request_table.cache_blocks,
                        filter: request_table.filter.clone(),
                    })
                    .primary_key
                    .push(primary_key.clone());
            }
        }
        if let Some(table) = table {
            reduced.tables.push(table);
        }
    }
    Ok(reduced)
}

/// The per-row error lifted to a request-level server error so the retry
/// strategy can judge it.
fn synthetic_row_error(error: Option<&proto::Error>, status: i32) -> TableStoreError {
    match error {
        Some(error) => TableStoreError::Server {
            status,
            code: error.code.clone(),
            message: error.message.clone().unwrap_or_default(),
            request_id: None,
            trace_id: None,
        },
        None => protocol_error("failed batch row carries no error"),
    }
}

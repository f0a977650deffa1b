//! Translation between the typed request/response objects and the external
//! protobuf messages, embedding PlainBuffer payloads where rows travel.
//!
//! Every function here is pure: requests go in, wire messages come out, and
//! response bodies parse back without touching any client state.

pub(crate) mod batch;


use prost::Message;

use crate::plainbuffer;
use crate::proto;
use crate::request::*;
use crate::table::*;
use crate::values::PrimaryKey;
use crate::{ColumnCondition, Result, TableStoreError};

pub(crate) fn protocol_error(message: impl Into<String>) -> TableStoreError {
    TableStoreError::Protocol(message.into())
}

fn decode<M: Message + Default>(body: &[u8]) -> Result<M> {
    M::decode(body).map_err(|e| protocol_error(format!("invalid response body: {e}")))
}

// ------------------------------------------------------------ small mappers

fn to_pb_primary_key_type(key_type: PrimaryKeyType) -> proto::PrimaryKeyType {
    match key_type {
        PrimaryKeyType::Integer => proto::PrimaryKeyType::Integer,
        PrimaryKeyType::String => proto::PrimaryKeyType::String,
        PrimaryKeyType::Binary => proto::PrimaryKeyType::Binary,
    }
}

fn from_pb_primary_key_type(value: i32) -> Result<PrimaryKeyType> {
    match proto::PrimaryKeyType::try_from(value) {
        Ok(proto::PrimaryKeyType::Integer) => Ok(PrimaryKeyType::Integer),
        Ok(proto::PrimaryKeyType::String) => Ok(PrimaryKeyType::String),
        Ok(proto::PrimaryKeyType::Binary) => Ok(PrimaryKeyType::Binary),
        Err(_) => Err(protocol_error(format!("unknown primary key type {value}"))),
    }
}

fn to_pb_table_meta(meta: &TableMeta) -> proto::TableMeta {
    proto::TableMeta {
        table_name: meta.table_name.clone(),
        primary_key: meta
            .schema
            .iter()
            .map(|column| proto::PrimaryKeySchema {
                name: column.name.clone(),
                r#type: to_pb_primary_key_type(column.key_type) as i32,
                option: column
                    .auto_increment
                    .then_some(proto::PrimaryKeyOption::AutoIncrement as i32),
            })
            .collect(),
    }
}

fn from_pb_schema(schema: &[proto::PrimaryKeySchema]) -> Result<Vec<PrimaryKeySchema>> {
    schema
        .iter()
        .map(|column| {
            Ok(PrimaryKeySchema {
                name: column.name.clone(),
                key_type: from_pb_primary_key_type(column.r#type)?,
                auto_increment: column.option
                    == Some(proto::PrimaryKeyOption::AutoIncrement as i32),
            })
        })
        .collect()
}

fn from_pb_table_meta(meta: &proto::TableMeta) -> Result<TableMeta> {
    Ok(TableMeta {
        table_name: meta.table_name.clone(),
        schema: from_pb_schema(&meta.primary_key)?,
    })
}

fn to_pb_table_options(options: &TableOptions) -> proto::TableOptions {
    proto::TableOptions {
        time_to_live: options.time_to_live,
        max_versions: options.max_versions,
        bloom_filter_type: options.bloom_filter_type.map(|kind| match kind {
            BloomFilterType::None => proto::BloomFilterType::None as i32,
            BloomFilterType::Cell => proto::BloomFilterType::Cell as i32,
            BloomFilterType::Row => proto::BloomFilterType::Row as i32,
        }),
        block_size: options.block_size,
        deviation_cell_version_in_sec: options.deviation_cell_version_in_sec,
    }
}

fn from_pb_table_options(options: &proto::TableOptions) -> TableOptions {
    TableOptions {
        time_to_live: options.time_to_live,
        max_versions: options.max_versions,
        bloom_filter_type: options
            .bloom_filter_type
            .and_then(|v| proto::BloomFilterType::try_from(v).ok())
            .map(|kind| match kind {
                proto::BloomFilterType::None => BloomFilterType::None,
                proto::BloomFilterType::Cell => BloomFilterType::Cell,
                proto::BloomFilterType::Row => BloomFilterType::Row,
            }),
        block_size: options.block_size,
        deviation_cell_version_in_sec: options.deviation_cell_version_in_sec,
    }
}

fn to_pb_reserved_throughput(reserved: &ReservedThroughput) -> proto::ReservedThroughput {
    proto::ReservedThroughput {
        capacity_unit: Some(proto::CapacityUnit {
            read: reserved.capacity_unit.read,
            write: reserved.capacity_unit.write,
        }),
    }
}

fn from_pb_capacity(capacity: Option<&proto::CapacityUnit>) -> CapacityUnit {
    match capacity {
        Some(capacity) => CapacityUnit {
            read: capacity.read,
            write: capacity.write,
        },
        None => CapacityUnit::default(),
    }
}

pub(crate) fn from_pb_consumed(consumed: Option<&proto::ConsumedCapacity>) -> CapacityUnit {
    from_pb_capacity(consumed.and_then(|c| c.capacity_unit.as_ref()))
}

fn from_pb_reserved_details(
    details: Option<&proto::ReservedThroughputDetails>,
) -> ReservedThroughputDetails {
    match details {
        Some(details) => ReservedThroughputDetails {
            capacity_unit: from_pb_capacity(details.capacity_unit.as_ref()),
            last_increase_time: details.last_increase_time,
            last_decrease_time: details.last_decrease_time,
        },
        None => ReservedThroughputDetails::default(),
    }
}

/// A range spanning exactly one version collapses to `specific_time`.
fn to_pb_time_range(range: &TimeRange) -> proto::TimeRange {
    if range.start_ms + 1 == range.end_ms {
        proto::TimeRange {
            start_time: None,
            end_time: None,
            specific_time: Some(range.start_ms),
        }
    } else {
        proto::TimeRange {
            start_time: Some(range.start_ms),
            end_time: Some(range.end_ms),
            specific_time: None,
        }
    }
}

fn to_pb_direction(direction: Direction) -> i32 {
    match direction {
        Direction::Forward => proto::Direction::Forward as i32,
        Direction::Backward => proto::Direction::Backward as i32,
    }
}

fn to_pb_return_content(return_type: ReturnType) -> proto::ReturnContent {
    proto::ReturnContent {
        return_type: Some(match return_type {
            ReturnType::None => proto::ReturnType::RtNone as i32,
            ReturnType::PrimaryKey => proto::ReturnType::RtPk as i32,
        }),
    }
}

fn to_pb_condition(condition: &Condition) -> Result<proto::Condition> {
    Ok(proto::Condition {
        row_existence: match condition.row_existence {
            RowExistenceExpectation::Ignore => proto::RowExistenceExpectation::Ignore as i32,
            RowExistenceExpectation::ExpectExist => {
                proto::RowExistenceExpectation::ExpectExist as i32
            }
            RowExistenceExpectation::ExpectNotExist => {
                proto::RowExistenceExpectation::ExpectNotExist as i32
            }
        },
        column_condition: condition
            .column_condition
            .as_ref()
            .map(filter_to_bytes)
            .transpose()?,
    })
}

// ---------------------------------------------------------------- filters

fn to_pb_comparator(operator: crate::CompareOperator) -> i32 {
    use crate::CompareOperator::*;
    match operator {
        Equal => proto::ComparatorType::CtEqual as i32,
        NotEqual => proto::ComparatorType::CtNotEqual as i32,
        GreaterThan => proto::ComparatorType::CtGreaterThan as i32,
        GreaterEqual => proto::ComparatorType::CtGreaterEqual as i32,
        LessThan => proto::ComparatorType::CtLessThan as i32,
        LessEqual => proto::ComparatorType::CtLessEqual as i32,
    }
}

fn to_pb_logical_operator(operator: crate::LogicOperator) -> i32 {
    use crate::LogicOperator::*;
    match operator {
        Not => proto::LogicalOperator::LoNot as i32,
        And => proto::LogicalOperator::LoAnd as i32,
        Or => proto::LogicalOperator::LoOr as i32,
    }
}

fn filter_type(condition: &ColumnCondition) -> i32 {
    match condition {
        ColumnCondition::Single(_) => proto::FilterType::FtSingleColumnValue as i32,
        ColumnCondition::Composite(_) => proto::FilterType::FtCompositeColumnValue as i32,
    }
}

fn filter_payload(condition: &ColumnCondition) -> Result<Vec<u8>> {
    match condition {
        ColumnCondition::Single(single) => {
            let pb = proto::SingleColumnValueFilter {
                comparator: to_pb_comparator(single.operator),
                column_name: single.column_name.clone(),
                column_value: plainbuffer::serialize_column_value(&single.value)?,
                // The wire flag is the inverse of the caller-facing one.
                filter_if_missing: !single.pass_if_missing,
                latest_version_only: single.latest_version_only,
            };
            Ok(pb.encode_to_vec())
        }
        ColumnCondition::Composite(composite) => {
            let pb = proto::CompositeColumnValueFilter {
                combinator: to_pb_logical_operator(composite.operator),
                sub_filters: composite
                    .sub_conditions
                    .iter()
                    .map(|sub| {
                        Ok(proto::Filter {
                            r#type: filter_type(sub),
                            filter: filter_payload(sub)?,
                        })
                    })
                    .collect::<Result<_>>()?,
            };
            Ok(pb.encode_to_vec())
        }
    }
}

/// The outermost `Filter` message, serialized for a `bytes` filter field.
pub(crate) fn filter_to_bytes(condition: &ColumnCondition) -> Result<Vec<u8>> {
    let pb = proto::Filter {
        r#type: filter_type(condition),
        filter: filter_payload(condition)?,
    };
    Ok(pb.encode_to_vec())
}

// ------------------------------------------------------------ row helpers

fn decode_optional_row(row: Option<&Vec<u8>>) -> Result<Option<crate::Row>> {
    match row {
        Some(bytes) if !bytes.is_empty() => Ok(Some(plainbuffer::deserialize_row(bytes)?)),
        _ => Ok(None),
    }
}

fn decode_primary_key_row(bytes: &[u8]) -> Result<PrimaryKey> {
    Ok(plainbuffer::deserialize_row(bytes)?.primary_key)
}

// ---------------------------------------------------------------- tables

pub(crate) fn build_create_table(
    request: &CreateTableRequest,
) -> Result<proto::CreateTableRequest> {
    Ok(proto::CreateTableRequest {
        table_meta: Some(to_pb_table_meta(&request.table_meta)),
        reserved_throughput: Some(to_pb_reserved_throughput(&request.reserved_throughput)),
        table_options: Some(to_pb_table_options(&request.table_options)),
        partitions: request
            .partitions
            .iter()
            .map(|partition| {
                Ok(proto::PartitionRange {
                    begin: plainbuffer::serialize_primary_key_value(&partition.begin)?,
                    end: plainbuffer::serialize_primary_key_value(&partition.end)?,
                })
            })
            .collect::<Result<_>>()?,
    })
}

pub(crate) fn parse_create_table(body: &[u8]) -> Result<CreateTableResponse> {
    decode::<proto::CreateTableResponse>(body)?;
    Ok(CreateTableResponse::default())
}

pub(crate) fn build_list_table(_request: &ListTableRequest) -> Result<proto::ListTableRequest> {
    Ok(proto::ListTableRequest {})
}

pub(crate) fn parse_list_table(body: &[u8]) -> Result<ListTableResponse> {
    let pb = decode::<proto::ListTableResponse>(body)?;
    Ok(ListTableResponse {
        table_names: pb.table_names,
        ..Default::default()
    })
}

pub(crate) fn build_describe_table(
    request: &DescribeTableRequest,
) -> Result<proto::DescribeTableRequest> {
    Ok(proto::DescribeTableRequest {
        table_name: request.table_name.clone(),
    })
}

pub(crate) fn parse_describe_table(body: &[u8]) -> Result<DescribeTableResponse> {
    let pb = decode::<proto::DescribeTableResponse>(body)?;
    let table_meta = pb
        .table_meta
        .as_ref()
        .ok_or_else(|| protocol_error("missing table meta in response"))?;
    Ok(DescribeTableResponse {
        table_meta: from_pb_table_meta(table_meta)?,
        reserved_throughput_details: from_pb_reserved_details(
            pb.reserved_throughput_details.as_ref(),
        ),
        table_options: pb
            .table_options
            .as_ref()
            .map(from_pb_table_options)
            .unwrap_or_default(),
        table_status: pb
            .table_status
            .and_then(|v| proto::TableStatus::try_from(v).ok())
            .map(|status| match status {
                proto::TableStatus::Active => TableStatus::Active,
                proto::TableStatus::Inactive => TableStatus::Inactive,
                proto::TableStatus::Loading => TableStatus::Loading,
                proto::TableStatus::Unloading => TableStatus::Unloading,
                proto::TableStatus::Updating => TableStatus::Updating,
            }),
        shard_splits: pb
            .shard_splits
            .iter()
            .map(|bytes| decode_primary_key_row(bytes))
            .collect::<Result<_>>()?,
        request_id: String::new(),
        trace_id: String::new(),
    })
}

pub(crate) fn build_update_table(
    request: &UpdateTableRequest,
) -> Result<proto::UpdateTableRequest> {
    Ok(proto::UpdateTableRequest {
        table_name: request.table_name.clone(),
        reserved_throughput: request
            .reserved_throughput
            .as_ref()
            .map(to_pb_reserved_throughput),
        table_options: request.table_options.as_ref().map(to_pb_table_options),
    })
}

pub(crate) fn parse_update_table(body: &[u8]) -> Result<UpdateTableResponse> {
    let pb = decode::<proto::UpdateTableResponse>(body)?;
    Ok(UpdateTableResponse {
        reserved_throughput_details: pb
            .reserved_throughput_details
            .as_ref()
            .map(|details| from_pb_reserved_details(Some(details))),
        table_options: pb.table_options.as_ref().map(from_pb_table_options),
        ..Default::default()
    })
}

pub(crate) fn build_delete_table(
    request: &DeleteTableRequest,
) -> Result<proto::DeleteTableRequest> {
    Ok(proto::DeleteTableRequest {
        table_name: request.table_name.clone(),
    })
}

pub(crate) fn parse_delete_table(body: &[u8]) -> Result<DeleteTableResponse> {
    decode::<proto::DeleteTableResponse>(body)?;
    Ok(DeleteTableResponse::default())
}

// ------------------------------------------------------------- single rows

pub(crate) fn build_get_row(request: &GetRowRequest) -> Result<proto::GetRowRequest> {
    let criterion = &request.criterion;
    Ok(proto::GetRowRequest {
        table_name: criterion.table_name.clone(),
        primary_key: plainbuffer::serialize_primary_key(&criterion.primary_key)?,
        columns_to_get: criterion.columns_to_get.clone(),
        time_range: criterion.time_range.as_ref().map(to_pb_time_range),
        max_versions: criterion.max_versions,
        cache_blocks: criterion.cache_blocks,
        filter: criterion.filter.as_ref().map(filter_to_bytes).transpose()?,
    })
}

pub(crate) fn parse_get_row(body: &[u8]) -> Result<GetRowResponse> {
    let pb = decode::<proto::GetRowResponse>(body)?;
    Ok(GetRowResponse {
        consumed: from_pb_consumed(pb.consumed.as_ref()),
        row: decode_optional_row(Some(&pb.row))?,
        ..Default::default()
    })
}

pub(crate) fn build_put_row(request: &PutRowRequest) -> Result<proto::PutRowRequest> {
    let change = &request.row_change;
    Ok(proto::PutRowRequest {
        table_name: change.table_name.clone(),
        row: plainbuffer::serialize_row_put(&change.primary_key, &change.columns)?,
        condition: Some(to_pb_condition(&change.condition)?),
        return_content: Some(to_pb_return_content(change.return_type)),
    })
}

pub(crate) fn parse_put_row(body: &[u8]) -> Result<PutRowResponse> {
    let pb = decode::<proto::PutRowResponse>(body)?;
    Ok(PutRowResponse {
        consumed: from_pb_consumed(pb.consumed.as_ref()),
        row: decode_optional_row(pb.row.as_ref())?,
        ..Default::default()
    })
}

pub(crate) fn build_update_row(request: &UpdateRowRequest) -> Result<proto::UpdateRowRequest> {
    let change = &request.row_change;
    Ok(proto::UpdateRowRequest {
        table_name: change.table_name.clone(),
        row_change: plainbuffer::serialize_row_update(&change.primary_key, &change.ops)?,
        condition: Some(to_pb_condition(&change.condition)?),
        return_content: Some(to_pb_return_content(change.return_type)),
    })
}

pub(crate) fn parse_update_row(body: &[u8]) -> Result<UpdateRowResponse> {
    let pb = decode::<proto::UpdateRowResponse>(body)?;
    Ok(UpdateRowResponse {
        consumed: from_pb_consumed(pb.consumed.as_ref()),
        row: decode_optional_row(pb.row.as_ref())?,
        ..Default::default()
    })
}

pub(crate) fn build_delete_row(request: &DeleteRowRequest) -> Result<proto::DeleteRowRequest> {
    let change = &request.row_change;
    Ok(proto::DeleteRowRequest {
        table_name: change.table_name.clone(),
        primary_key: plainbuffer::serialize_row_delete(&change.primary_key)?,
        condition: Some(to_pb_condition(&change.condition)?),
        return_content: Some(to_pb_return_content(change.return_type)),
    })
}

pub(crate) fn parse_delete_row(body: &[u8]) -> Result<DeleteRowResponse> {
    let pb = decode::<proto::DeleteRowResponse>(body)?;
    Ok(DeleteRowResponse {
        consumed: from_pb_consumed(pb.consumed.as_ref()),
        row: decode_optional_row(pb.row.as_ref())?,
        ..Default::default()
    })
}

// ------------------------------------------------------------- range scans

pub(crate) fn build_get_range(request: &GetRangeRequest) -> Result<proto::GetRangeRequest> {
    let criterion = &request.criterion;
    Ok(proto::GetRangeRequest {
        table_name: criterion.table_name.clone(),
        direction: to_pb_direction(criterion.direction),
        columns_to_get: criterion.columns_to_get.clone(),
        time_range: criterion.time_range.as_ref().map(to_pb_time_range),
        max_versions: criterion.max_versions,
        limit: criterion.limit,
        inclusive_start_primary_key: plainbuffer::serialize_primary_key(
            &criterion.inclusive_start,
        )?,
        exclusive_end_primary_key: plainbuffer::serialize_primary_key(&criterion.exclusive_end)?,
        cache_blocks: criterion.cache_blocks,
        filter: criterion.filter.as_ref().map(filter_to_bytes).transpose()?,
    })
}

pub(crate) fn parse_get_range(body: &[u8]) -> Result<GetRangeResponse> {
    let pb = decode::<proto::GetRangeResponse>(body)?;
    Ok(GetRangeResponse {
        consumed: from_pb_consumed(pb.consumed.as_ref()),
        rows: plainbuffer::deserialize_rows(&pb.rows)?,
        next_start: pb
            .next_start_primary_key
            .as_deref()
            .map(decode_primary_key_row)
            .transpose()?,
        ..Default::default()
    })
}

// ------------------------------------------------------------------ splits

pub(crate) fn build_compute_splits(
    request: &ComputeSplitsBySizeRequest,
) -> Result<proto::ComputeSplitPointsBySizeRequest> {
    Ok(proto::ComputeSplitPointsBySizeRequest {
        table_name: request.table_name.clone(),
        split_size: request.split_size,
    })
}

/// Short split points are completed to full schema width: interior bounds
/// with inf-min, the final upper bound with inf-max.
fn complement_primary_key(
    primary_key: &mut PrimaryKey,
    schema: &[PrimaryKeySchema],
    fill: &crate::PrimaryKeyValue,
) {
    for column in schema.iter().skip(primary_key.len()) {
        primary_key
            .columns
            .push(crate::PrimaryKeyColumn::new(&column.name, fill.clone()));
    }
}

pub(crate) fn parse_compute_splits(body: &[u8]) -> Result<ComputeSplitsBySizeResponse> {
    let pb = decode::<proto::ComputeSplitPointsBySizeResponse>(body)?;
    let schema = from_pb_schema(&pb.schema)?;

    let mut splits = Vec::with_capacity(pb.split_points.len() + 1);
    let mut lower = PrimaryKey::new();
    complement_primary_key(&mut lower, &schema, &crate::PrimaryKeyValue::InfMin);
    for point in &pb.split_points {
        let mut upper = decode_primary_key_row(point)?;
        complement_primary_key(&mut upper, &schema, &crate::PrimaryKeyValue::InfMin);
        splits.push(Split {
            lower_bound: lower,
            upper_bound: upper.clone(),
            location: None,
        });
        lower = upper;
    }
    let mut last_upper = PrimaryKey::new();
    complement_primary_key(&mut last_upper, &schema, &crate::PrimaryKeyValue::InfMax);
    splits.push(Split {
        lower_bound: lower,
        upper_bound: last_upper,
        location: None,
    });

    // Locations are run-length encoded over the splits in order.
    let mut split_idx = 0;
    for location in &pb.locations {
        let mut repeat = location.repeat;
        while split_idx < splits.len() && repeat > 0 {
            splits[split_idx].location = Some(location.location.clone());
            split_idx += 1;
            repeat -= 1;
        }
        if repeat > 0 {
            return Err(protocol_error("split locations exceed split count"));
        }
    }
    if split_idx != splits.len() {
        return Err(protocol_error("split locations do not cover all splits"));
    }

    Ok(ComputeSplitsBySizeResponse {
        consumed: from_pb_consumed(pb.consumed.as_ref()),
        schema,
        splits,
        ..Default::default()
    })
}

// ------------------------------------------------------------------ errors

/// Parses a protobuf `Error` body from a non-2xx response, if well-formed.
pub(crate) fn parse_error_body(body: &[u8]) -> Option<(String, String)> {
    proto::Error::decode(body)
        .ok()
        .map(|error| (error.code, error.message.unwrap_or_default()))
}

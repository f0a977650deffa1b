//! Typed request and response objects for every operation, plus the
//! structural validation the pipeline runs before anything is serialized.

use std::fmt;

use crate::filter::ColumnCondition;
use crate::table::{
    CapacityUnit, Condition, Direction, PrimaryKeySchema, ReservedThroughput,
    ReservedThroughputDetails, ReturnType, TableMeta, TableOptions, TableStatus, TimeRange,
};
use crate::values::{Column, PrimaryKey, PrimaryKeyValue, Row, RowUpdateOp};
use crate::{Result, TableStoreError};

/// The RPC verb: names the URL path, the signature's canonical resource and
/// the retry policy's idempotency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListTable,
    CreateTable,
    DescribeTable,
    UpdateTable,
    DeleteTable,
    GetRow,
    PutRow,
    UpdateRow,
    DeleteRow,
    BatchGetRow,
    BatchWriteRow,
    GetRange,
    ComputeSplitPointsBySize,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::ListTable => "ListTable",
            Action::CreateTable => "CreateTable",
            Action::DescribeTable => "DescribeTable",
            Action::UpdateTable => "UpdateTable",
            Action::DeleteTable => "DeleteTable",
            Action::GetRow => "GetRow",
            Action::PutRow => "PutRow",
            Action::UpdateRow => "UpdateRow",
            Action::DeleteRow => "DeleteRow",
            Action::BatchGetRow => "BatchGetRow",
            Action::BatchWriteRow => "BatchWriteRow",
            Action::GetRange => "GetRange",
            Action::ComputeSplitPointsBySize => "ComputeSplitPointsBySize",
        }
    }

    /// Reads are idempotent; every write needs per-error scrutiny before a
    /// retry is safe.
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Action::ListTable
                | Action::DescribeTable
                | Action::GetRow
                | Action::BatchGetRow
                | Action::GetRange
                | Action::ComputeSplitPointsBySize
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn validation(message: impl Into<String>) -> TableStoreError {
    TableStoreError::Validation(message.into())
}

/// Primary key for a point read or delete: concrete values only.
fn validate_point_primary_key(primary_key: &PrimaryKey) -> Result<()> {
    if primary_key.is_empty() {
        return Err(validation("primary key is not set"));
    }
    for column in &primary_key.columns {
        if column.value.is_placeholder() {
            return Err(validation(format!(
                "primary key column '{}' must carry a concrete value",
                column.name
            )));
        }
    }
    Ok(())
}

/// Primary key for put/update: auto-increment placeholders are allowed, the
/// infinity sentinels are not.
fn validate_write_primary_key(primary_key: &PrimaryKey) -> Result<()> {
    if primary_key.is_empty() {
        return Err(validation("primary key is not set"));
    }
    for column in &primary_key.columns {
        if column.value.is_inf() {
            return Err(validation(format!(
                "primary key column '{}' must not be an infinity sentinel",
                column.name
            )));
        }
    }
    Ok(())
}

/// Range endpoints may carry the infinity sentinels but never the
/// auto-increment placeholder.
fn validate_range_endpoint(primary_key: &PrimaryKey, which: &str) -> Result<()> {
    if primary_key.is_empty() {
        return Err(validation(format!("{which} primary key is not set")));
    }
    for column in &primary_key.columns {
        if matches!(column.value, PrimaryKeyValue::AutoIncrement) {
            return Err(validation(format!(
                "{which} primary key column '{}' must not be an auto-increment placeholder",
                column.name
            )));
        }
    }
    Ok(())
}

fn validate_filter(filter: &Option<ColumnCondition>) -> Result<()> {
    match filter {
        Some(filter) => filter.validate(),
        None => Ok(()),
    }
}

fn validate_condition(condition: &Condition) -> Result<()> {
    validate_filter(&condition.column_condition)
}

// ---------------------------------------------------------------- criteria

/// A single-row read.
#[derive(Debug, Clone, PartialEq)]
pub struct PointQueryCriterion {
    pub table_name: String,
    pub primary_key: PrimaryKey,
    pub columns_to_get: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub max_versions: Option<i32>,
    pub cache_blocks: Option<bool>,
    pub filter: Option<ColumnCondition>,
}

impl PointQueryCriterion {
    pub fn new(table_name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        PointQueryCriterion {
            table_name: table_name.into(),
            primary_key,
            columns_to_get: Vec::new(),
            time_range: None,
            max_versions: None,
            cache_blocks: None,
            filter: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        validate_point_primary_key(&self.primary_key)?;
        validate_filter(&self.filter)
    }
}

/// One row of a multi-point read, with an opaque caller annotation echoed
/// back on the matching result entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPointEntry {
    pub primary_key: PrimaryKey,
    pub user_data: Option<Vec<u8>>,
}

impl MultiPointEntry {
    pub fn new(primary_key: PrimaryKey) -> Self {
        MultiPointEntry {
            primary_key,
            user_data: None,
        }
    }
}

/// Many point reads against one table, sharing a projection, time range and
/// version bound.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPointQueryCriterion {
    pub table_name: String,
    pub rows: Vec<MultiPointEntry>,
    pub columns_to_get: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub max_versions: Option<i32>,
    pub cache_blocks: Option<bool>,
    pub filter: Option<ColumnCondition>,
}

impl MultiPointQueryCriterion {
    pub fn new(table_name: impl Into<String>) -> Self {
        MultiPointQueryCriterion {
            table_name: table_name.into(),
            rows: Vec::new(),
            columns_to_get: Vec::new(),
            time_range: None,
            max_versions: None,
            cache_blocks: None,
            filter: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        if self.rows.is_empty() {
            return Err(validation(format!(
                "no rows requested from table '{}'",
                self.table_name
            )));
        }
        for row in &self.rows {
            validate_point_primary_key(&row.primary_key)?;
        }
        validate_filter(&self.filter)
    }
}

/// A range scan between two (possibly infinite) endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQueryCriterion {
    pub table_name: String,
    pub direction: Direction,
    pub inclusive_start: PrimaryKey,
    pub exclusive_end: PrimaryKey,
    pub columns_to_get: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub max_versions: Option<i32>,
    pub limit: Option<i32>,
    pub cache_blocks: Option<bool>,
    pub filter: Option<ColumnCondition>,
}

impl RangeQueryCriterion {
    pub fn new(
        table_name: impl Into<String>,
        inclusive_start: PrimaryKey,
        exclusive_end: PrimaryKey,
    ) -> Self {
        RangeQueryCriterion {
            table_name: table_name.into(),
            direction: Direction::Forward,
            inclusive_start,
            exclusive_end,
            columns_to_get: Vec::new(),
            time_range: None,
            max_versions: None,
            limit: None,
            cache_blocks: None,
            filter: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        validate_range_endpoint(&self.inclusive_start, "inclusive start")?;
        validate_range_endpoint(&self.exclusive_end, "exclusive end")?;
        if let Some(limit) = self.limit {
            if limit <= 0 {
                return Err(validation("limit must be positive"));
            }
        }
        validate_filter(&self.filter)
    }
}

// ------------------------------------------------------------- row changes

#[derive(Debug, Clone, PartialEq)]
pub struct RowPutChange {
    pub table_name: String,
    pub primary_key: PrimaryKey,
    pub columns: Vec<Column>,
    pub condition: Condition,
    pub return_type: ReturnType,
    pub user_data: Option<Vec<u8>>,
}

impl RowPutChange {
    pub fn new(table_name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        RowPutChange {
            table_name: table_name.into(),
            primary_key,
            columns: Vec::new(),
            condition: Condition::default(),
            return_type: ReturnType::default(),
            user_data: None,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        validate_write_primary_key(&self.primary_key)?;
        if self.columns.is_empty() {
            return Err(validation("no columns to put"));
        }
        validate_condition(&self.condition)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdateChange {
    pub table_name: String,
    pub primary_key: PrimaryKey,
    pub ops: Vec<RowUpdateOp>,
    pub condition: Condition,
    pub return_type: ReturnType,
    pub user_data: Option<Vec<u8>>,
}

impl RowUpdateChange {
    pub fn new(table_name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        RowUpdateChange {
            table_name: table_name.into(),
            primary_key,
            ops: Vec::new(),
            condition: Condition::default(),
            return_type: ReturnType::default(),
            user_data: None,
        }
    }

    pub fn with_op(mut self, op: RowUpdateOp) -> Self {
        self.ops.push(op);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        validate_write_primary_key(&self.primary_key)?;
        if self.ops.is_empty() {
            return Err(validation("no update operations"));
        }
        validate_condition(&self.condition)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowDeleteChange {
    pub table_name: String,
    pub primary_key: PrimaryKey,
    pub condition: Condition,
    pub return_type: ReturnType,
    pub user_data: Option<Vec<u8>>,
}

impl RowDeleteChange {
    pub fn new(table_name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        RowDeleteChange {
            table_name: table_name.into(),
            primary_key,
            condition: Condition::default(),
            return_type: ReturnType::default(),
            user_data: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        validate_point_primary_key(&self.primary_key)?;
        validate_condition(&self.condition)
    }
}

// ---------------------------------------------------------------- requests

/// A pre-split range handed to table creation, standalone-encoded on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRange {
    pub begin: PrimaryKeyValue,
    pub end: PrimaryKeyValue,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateTableRequest {
    pub table_meta: TableMeta,
    pub reserved_throughput: ReservedThroughput,
    pub table_options: TableOptions,
    pub partitions: Vec<PartitionRange>,
}

impl CreateTableRequest {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_meta.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        if self.table_meta.schema.is_empty() {
            return Err(validation("primary key schema is not set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateTableResponse {
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListTableRequest;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListTableResponse {
    pub table_names: Vec<String>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescribeTableRequest {
    pub table_name: String,
}

impl DescribeTableRequest {
    pub fn new(table_name: impl Into<String>) -> Self {
        DescribeTableRequest {
            table_name: table_name.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescribeTableResponse {
    pub table_meta: TableMeta,
    pub reserved_throughput_details: ReservedThroughputDetails,
    pub table_options: TableOptions,
    pub table_status: Option<TableStatus>,
    /// Partition boundaries, each decoded from a PlainBuffer pk row.
    pub shard_splits: Vec<PrimaryKey>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTableRequest {
    pub table_name: String,
    pub reserved_throughput: Option<ReservedThroughput>,
    pub table_options: Option<TableOptions>,
}

impl UpdateTableRequest {
    pub fn new(table_name: impl Into<String>) -> Self {
        UpdateTableRequest {
            table_name: table_name.into(),
            reserved_throughput: None,
            table_options: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateTableResponse {
    pub reserved_throughput_details: Option<ReservedThroughputDetails>,
    pub table_options: Option<TableOptions>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteTableRequest {
    pub table_name: String,
}

impl DeleteTableRequest {
    pub fn new(table_name: impl Into<String>) -> Self {
        DeleteTableRequest {
            table_name: table_name.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteTableResponse {
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetRowRequest {
    pub criterion: PointQueryCriterion,
}

impl GetRowRequest {
    pub fn new(criterion: PointQueryCriterion) -> Self {
        GetRowRequest { criterion }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.criterion.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetRowResponse {
    pub consumed: CapacityUnit,
    pub row: Option<Row>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutRowRequest {
    pub row_change: RowPutChange,
}

impl PutRowRequest {
    pub fn new(row_change: RowPutChange) -> Self {
        PutRowRequest { row_change }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.row_change.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PutRowResponse {
    pub consumed: CapacityUnit,
    /// Returned content, populated when the change asked for it.
    pub row: Option<Row>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRowRequest {
    pub row_change: RowUpdateChange,
}

impl UpdateRowRequest {
    pub fn new(row_change: RowUpdateChange) -> Self {
        UpdateRowRequest { row_change }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.row_change.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateRowResponse {
    pub consumed: CapacityUnit,
    pub row: Option<Row>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRowRequest {
    pub row_change: RowDeleteChange,
}

impl DeleteRowRequest {
    pub fn new(row_change: RowDeleteChange) -> Self {
        DeleteRowRequest { row_change }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.row_change.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteRowResponse {
    pub consumed: CapacityUnit,
    pub row: Option<Row>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetRangeRequest {
    pub criterion: RangeQueryCriterion,
}

impl GetRangeRequest {
    pub fn new(criterion: RangeQueryCriterion) -> Self {
        GetRangeRequest { criterion }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.criterion.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetRangeResponse {
    pub consumed: CapacityUnit,
    pub rows: Vec<Row>,
    /// Where to resume; absent when the scan is complete.
    pub next_start: Option<PrimaryKey>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchGetRowRequest {
    pub criteria: Vec<MultiPointQueryCriterion>,
}

impl BatchGetRowRequest {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.criteria.is_empty() {
            return Err(validation("no query criteria"));
        }
        for (i, criterion) in self.criteria.iter().enumerate() {
            criterion.validate()?;
            for earlier in &self.criteria[..i] {
                if earlier.table_name == criterion.table_name {
                    return Err(validation(format!(
                        "table '{}' appears in more than one criterion",
                        criterion.table_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Why one row of a batch failed while the call as a whole succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchRowSuccess {
    pub consumed: CapacityUnit,
    pub row: Option<Row>,
}

/// One per-row result, routed back to the caller's original position.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRowResult {
    pub table_name: String,
    /// Position in the originating list (criterion rows, or one of the three
    /// batch-write lists).
    pub index: usize,
    pub user_data: Option<Vec<u8>>,
    pub outcome: std::result::Result<BatchRowSuccess, BatchError>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchGetRowResponse {
    /// Sum of the per-row consumed capacities.
    pub consumed: CapacityUnit,
    /// Per criterion, in the caller's row order.
    pub results: Vec<Vec<BatchRowResult>>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchWriteRowRequest {
    pub puts: Vec<RowPutChange>,
    pub updates: Vec<RowUpdateChange>,
    pub deletes: Vec<RowDeleteChange>,
}

impl BatchWriteRowRequest {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.puts.is_empty() && self.updates.is_empty() && self.deletes.is_empty() {
            return Err(validation("no row changes"));
        }
        for put in &self.puts {
            put.validate()?;
        }
        for update in &self.updates {
            update.validate()?;
        }
        for delete in &self.deletes {
            delete.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchWriteRowResponse {
    pub consumed: CapacityUnit,
    pub put_results: Vec<BatchRowResult>,
    pub update_results: Vec<BatchRowResult>,
    pub delete_results: Vec<BatchRowResult>,
    pub request_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeSplitsBySizeRequest {
    pub table_name: String,
    /// Approximate split size in hundreds of megabytes.
    pub split_size: i64,
}

impl ComputeSplitsBySizeRequest {
    pub fn new(table_name: impl Into<String>, split_size: i64) -> Self {
        ComputeSplitsBySizeRequest {
            table_name: table_name.into(),
            split_size,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(validation("table name is not set"));
        }
        if self.split_size <= 0 {
            return Err(validation("split size must be positive"));
        }
        Ok(())
    }
}

/// One shard-sized range of the table, with the server location serving it.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub lower_bound: PrimaryKey,
    pub upper_bound: PrimaryKey,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputeSplitsBySizeResponse {
    pub consumed: CapacityUnit,
    pub schema: Vec<PrimaryKeySchema>,
    pub splits: Vec<Split>,
    pub request_id: String,
    pub trace_id: String,
}

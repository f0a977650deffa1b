//! Table metadata, throughput accounting and the small shared enums used by
//! row operations.

use crate::filter::ColumnCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKeyType {
    Integer,
    String,
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeySchema {
    pub name: String,
    pub key_type: PrimaryKeyType,
    pub auto_increment: bool,
}

impl PrimaryKeySchema {
    pub fn new(name: impl Into<String>, key_type: PrimaryKeyType) -> Self {
        PrimaryKeySchema {
            name: name.into(),
            key_type,
            auto_increment: false,
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMeta {
    pub table_name: String,
    pub schema: Vec<PrimaryKeySchema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomFilterType {
    None,
    Cell,
    Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Active,
    Inactive,
    Loading,
    Unloading,
    Updating,
}

/// Per-table options. Absent fields are omitted on the wire and left to
/// server defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableOptions {
    /// Seconds, `-1` for unlimited.
    pub time_to_live: Option<i32>,
    pub max_versions: Option<i32>,
    pub bloom_filter_type: Option<BloomFilterType>,
    pub block_size: Option<i32>,
    /// Max out-of-order cell version deviation, in seconds.
    pub deviation_cell_version_in_sec: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityUnit {
    pub read: Option<i32>,
    pub write: Option<i32>,
}

impl CapacityUnit {
    /// Adds `other` side-wise; an absent side stays absent unless the other
    /// operand reports it.
    pub fn merge(&mut self, other: &CapacityUnit) {
        if let Some(read) = other.read {
            self.read = Some(self.read.unwrap_or(0) + read);
        }
        if let Some(write) = other.write {
            self.write = Some(self.write.unwrap_or(0) + write);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReservedThroughput {
    pub capacity_unit: CapacityUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReservedThroughputDetails {
    pub capacity_unit: CapacityUnit,
    pub last_increase_time: i64,
    pub last_decrease_time: Option<i64>,
}

/// A half-open version range in milliseconds. When it spans exactly one
/// version (`start + 1 == end`) it is emitted as a specific time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn between(start_ms: i64, end_ms: i64) -> Self {
        TimeRange { start_ms, end_ms }
    }

    /// The single version written at `timestamp_ms`.
    pub fn at(timestamp_ms: i64) -> Self {
        TimeRange {
            start_ms: timestamp_ms,
            end_ms: timestamp_ms + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    #[default]
    None,
    PrimaryKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowExistenceExpectation {
    #[default]
    Ignore,
    ExpectExist,
    ExpectNotExist,
}

/// Write condition: a row-existence expectation plus an optional column
/// filter the server evaluates before applying the change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub row_existence: RowExistenceExpectation,
    pub column_condition: Option<ColumnCondition>,
}

impl Condition {
    pub fn expect(row_existence: RowExistenceExpectation) -> Self {
        Condition {
            row_existence,
            column_condition: None,
        }
    }
}

//! The in-memory row model: primary-key values, attribute values, cells and
//! rows. Value kinds are plain sum types; the three primary-key sentinels
//! carry no payload and are only legal in specific request positions.

/// A single primary-key column value.
///
/// `InfMin` and `InfMax` are range-scan endpoints only; `AutoIncrement` is a
/// placeholder the server fills on put/update for columns declared
/// auto-increment in the table schema.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKeyValue {
    Integer(i64),
    String(String),
    Binary(Vec<u8>),
    InfMin,
    InfMax,
    AutoIncrement,
}

impl PrimaryKeyValue {
    pub fn is_inf(&self) -> bool {
        matches!(self, PrimaryKeyValue::InfMin | PrimaryKeyValue::InfMax)
    }

    /// True for the three payload-free sentinels.
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            PrimaryKeyValue::InfMin | PrimaryKeyValue::InfMax | PrimaryKeyValue::AutoIncrement
        )
    }
}

/// An attribute (cell) value. No sentinels here.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Integer(i64),
    String(String),
    Binary(Vec<u8>),
    Boolean(bool),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyColumn {
    pub name: String,
    pub value: PrimaryKeyValue,
}

impl PrimaryKeyColumn {
    pub fn new(name: impl Into<String>, value: PrimaryKeyValue) -> Self {
        PrimaryKeyColumn {
            name: name.into(),
            value,
        }
    }
}

/// An ordered sequence of primary-key columns. Order is significant and must
/// match the table schema's declared order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryKey {
    pub columns: Vec<PrimaryKeyColumn>,
}

impl PrimaryKey {
    pub fn new() -> Self {
        PrimaryKey::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, value: PrimaryKeyValue) -> Self {
        self.columns.push(PrimaryKeyColumn::new(name, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

/// An attribute cell. A missing timestamp means the server assigns one on
/// put; on read the server's timestamp is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub value: ColumnValue,
    pub timestamp: Option<i64>,
}

impl Column {
    pub fn new(name: impl Into<String>, value: ColumnValue) -> Self {
        Column {
            name: name.into(),
            value,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }
}

/// A decoded row. Attribute names repeat when multiple cell versions exist;
/// each (name, timestamp) pair identifies one version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub primary_key: PrimaryKey,
    pub columns: Vec<Column>,
}

/// One attribute operation inside an update-row request.
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdateOp {
    /// Write a value, optionally at an explicit timestamp.
    Put(Column),
    /// Remove the single cell version at the given timestamp.
    DeleteVersion { name: String, timestamp: i64 },
    /// Remove all versions of the named column.
    DeleteAll { name: String },
}

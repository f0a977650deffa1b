//! Column-condition filter trees. Leaves compare one column against a value;
//! inner nodes combine children with NOT/AND/OR.

use crate::{ColumnValue, Result, TableStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOperator {
    Not,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleColumnCondition {
    pub column_name: String,
    pub operator: CompareOperator,
    pub value: ColumnValue,
    /// Whether a row lacking the column passes the filter.
    pub pass_if_missing: bool,
    pub latest_version_only: bool,
}

impl SingleColumnCondition {
    pub fn new(
        column_name: impl Into<String>,
        operator: CompareOperator,
        value: ColumnValue,
    ) -> Self {
        SingleColumnCondition {
            column_name: column_name.into(),
            operator,
            value,
            pass_if_missing: true,
            latest_version_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeColumnCondition {
    pub operator: LogicOperator,
    pub sub_conditions: Vec<ColumnCondition>,
}

impl CompositeColumnCondition {
    pub fn new(operator: LogicOperator) -> Self {
        CompositeColumnCondition {
            operator,
            sub_conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: ColumnCondition) -> Self {
        self.sub_conditions.push(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnCondition {
    Single(SingleColumnCondition),
    Composite(CompositeColumnCondition),
}

impl ColumnCondition {
    /// Structural well-formedness: NOT takes exactly one child, AND/OR at
    /// least one. Depth is left to the server to police.
    pub fn validate(&self) -> Result<()> {
        match self {
            ColumnCondition::Single(_) => Ok(()),
            ColumnCondition::Composite(composite) => {
                match composite.operator {
                    LogicOperator::Not => {
                        if composite.sub_conditions.len() != 1 {
                            return Err(TableStoreError::Validation(
                                "NOT condition requires exactly one sub-condition".to_string(),
                            ));
                        }
                    }
                    LogicOperator::And | LogicOperator::Or => {
                        if composite.sub_conditions.is_empty() {
                            return Err(TableStoreError::Validation(
                                "AND/OR condition requires at least one sub-condition".to_string(),
                            ));
                        }
                    }
                }
                for sub in &composite.sub_conditions {
                    sub.validate()?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_requires_single_child() {
        let empty = ColumnCondition::Composite(CompositeColumnCondition::new(LogicOperator::Not));
        assert!(empty.validate().is_err());

        let leaf = ColumnCondition::Single(SingleColumnCondition::new(
            "a",
            CompareOperator::Equal,
            ColumnValue::Integer(1),
        ));
        let ok = ColumnCondition::Composite(
            CompositeColumnCondition::new(LogicOperator::Not).with_condition(leaf.clone()),
        );
        assert!(ok.validate().is_ok());

        let two = ColumnCondition::Composite(
            CompositeColumnCondition::new(LogicOperator::Not)
                .with_condition(leaf.clone())
                .with_condition(leaf),
        );
        assert!(two.validate().is_err());
    }

    #[test]
    fn and_requires_children() {
        let empty = ColumnCondition::Composite(CompositeColumnCondition::new(LogicOperator::And));
        assert!(empty.validate().is_err());
    }

    #[test]
    fn nested_children_are_checked() {
        let bad_inner =
            ColumnCondition::Composite(CompositeColumnCondition::new(LogicOperator::Or));
        let outer = ColumnCondition::Composite(
            CompositeColumnCondition::new(LogicOperator::And).with_condition(bad_inner),
        );
        assert!(outer.validate().is_err());
    }
}

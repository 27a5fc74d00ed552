//! Table schemas.
//!
//! A schema is an ordered list of column names, stored once per table.
//! Column lookup is by name; primitives receive the resolved index as an
//! operation parameter so the data plane never touches strings.

use serde::{Deserialize, Serialize};

use crate::error::ObliJoinError;
use crate::tuple::MAX_ATTRS;

/// Ordered column names of a table. At most [`MAX_ATTRS`] columns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    /// Build a schema from column names.
    ///
    /// Fails when the names exceed the fixed attribute capacity.
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Result<Schema, ObliJoinError> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.len() > MAX_ATTRS {
            return Err(ObliJoinError::SchemaOverflow(columns.len()));
        }
        Ok(Schema { columns })
    }

    /// `col1 .. colN` names for headerless inputs.
    pub fn generic(width: usize) -> Result<Schema, ObliJoinError> {
        Schema::new((1..=width).map(|i| format!("col{i}")).collect())
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Index of the first column with this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Schema of a horizontally concatenated table: `self`'s columns
    /// followed by `other`'s.
    pub fn concat(&self, other: &Schema) -> Result<Schema, ObliJoinError> {
        let total = self.columns.len() + other.columns.len();
        if total > MAX_ATTRS {
            return Err(ObliJoinError::SchemaOverflow(total));
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(Schema { columns })
    }
}

//! Row representation shared by the record mappers and the store.
//!
//! A `LocalRecord` is an ordered list of `(column, value)` pairs. Every
//! record produced by one mapper carries the same columns in the same order,
//! which is what lets the store turn a chunk into a single multi-row insert.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::model::Owner;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_key_part(&self) -> Option<KeyPart> {
        match self {
            SqlValue::Int(v) => Some(KeyPart::Int(*v)),
            SqlValue::Text(v) => Some(KeyPart::Text(v.clone())),
            _ => None,
        }
    }

    pub(crate) fn bind_to<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Timestamp(v) => query.bind(*v),
        }
    }
}

/// One column of a natural key. Keys are integers or short strings, never
/// floats, so they can be hashed and compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

/// Natural key of a row within its owner's scope, in the job's key-column
/// order.
pub type NaturalKey = Vec<KeyPart>;

impl From<i64> for KeyPart {
    fn from(v: i64) -> Self {
        KeyPart::Int(v)
    }
}

impl From<&str> for KeyPart {
    fn from(v: &str) -> Self {
        KeyPart::Text(v.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// One mapped row, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalRecord {
    columns: Vec<(&'static str, SqlValue)>,
}

impl LocalRecord {
    /// Start a record owned by `owner`, seeding its scope column.
    pub fn for_owner(owner: &Owner) -> Self {
        Self::default().with(owner.column(), owner.id())
    }

    pub fn with(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.columns.push((column, value.into()));
        self
    }

    /// Append both audit timestamps. Must be the last builder call so every
    /// record of a resource ends with the same two columns.
    pub fn stamped(self, now: DateTime<Utc>) -> Self {
        self.with(CREATED_AT, now).with(UPDATED_AT, now)
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Values of `columns` as a natural key. `None` if any column is
    /// missing or holds a value that cannot be part of a key.
    pub fn key(&self, columns: &[&str]) -> Option<NaturalKey> {
        columns
            .iter()
            .map(|column| self.get(column).and_then(SqlValue::as_key_part))
            .collect()
    }

    /// True when this record has exactly `columns`, in that order.
    pub fn has_layout(&self, columns: &[&str]) -> bool {
        self.columns.len() == columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|((name, _), expected)| name == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_column_order_and_stamps_last() {
        let now = Utc::now();
        let record = LocalRecord::for_owner(&Owner::Corporation(5))
            .with("item_id", 10_i64)
            .with("location_flag", "Hangar")
            .stamped(now);

        let names: Vec<_> = record.column_names().collect();
        assert_eq!(
            names,
            vec!["corporation_id", "item_id", "location_flag", "created_at", "updated_at"]
        );
        assert_eq!(record.int("item_id"), Some(10));
        assert_eq!(record.get("created_at"), Some(&SqlValue::Timestamp(now)));
        assert!(record.has_layout(&names));
    }

    #[test]
    fn key_reads_columns_in_order() {
        let record = LocalRecord::for_owner(&Owner::Corporation(5))
            .with("structure_id", 1021_i64)
            .with("name", "Clone Bay")
            .with("state", "online");
        assert_eq!(
            record.key(&["structure_id", "name"]),
            Some(vec![KeyPart::Int(1021), KeyPart::from("Clone Bay")])
        );
        assert_eq!(record.key(&["structure_id", "missing"]), None);
        let float = LocalRecord::default().with("standing", 1.5);
        assert_eq!(float.key(&["standing"]), None);
    }

    #[test]
    fn missing_optionals_become_null() {
        let record = LocalRecord::default().with("standing", None::<f64>);
        assert_eq!(record.get("standing"), Some(&SqlValue::Null));
        assert_eq!(record.int("standing"), None);
    }
}

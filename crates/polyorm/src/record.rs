//! Column/value containers.
//!
//! - [`Record`] is the dynamic row container: insertion-ordered, case-insensitive
//!   lookup. It is the input of CRUD calls and the output of queries.
//! - [`ColumnValues`] is the write set the engine synthesizes from: columns in
//!   lexicographic order so generated SQL text is deterministic.
//! - [`StatementPlan`] is the final dialect-native SQL plus ordered arguments.

use crate::error::{OrmError, OrmResult};
use crate::ident::validate_ident;
use crate::value::{FromValue, Value};
use std::collections::BTreeMap;

/// An ordered, case-insensitive column → value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing an existing entry that matches case-insensitively.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let column = column.into();
        let value = value.into();
        match self.position(&column) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|i| &self.entries[i].1)
    }

    /// Typed getter; a missing column is a decode error.
    pub fn try_get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "column not present"))?;
        T::from_value(value).map_err(|e| match e {
            OrmError::Decode { message, .. } => OrmError::decode(column, message),
            other => other,
        })
    }

    /// Deserialize a JSON column into `T`.
    pub fn try_get_json<T: serde::de::DeserializeOwned>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "column not present"))?;
        value.decode_json().map_err(|e| match e {
            OrmError::Decode { message, .. } => OrmError::decode(column, message),
            other => other,
        })
    }

    /// Value at a positional index.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.position(column).map(|i| self.entries.remove(i).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(c, _)| c.eq_ignore_ascii_case(column))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The write set of an INSERT/UPDATE, ordered lexicographically by column.
///
/// Lookups that interceptors perform (`created_at`, `version`, ...) are
/// case-insensitive, matching [`Record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnValues {
    inner: BTreeMap<String, Value>,
}

impl ColumnValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a record, validating every column name.
    pub fn from_record(record: Record) -> OrmResult<Self> {
        let mut out = Self::new();
        for (column, value) in record {
            validate_ident(&column)?;
            out.inner.insert(column, value);
        }
        Ok(out)
    }

    fn key_of(&self, column: &str) -> Option<&String> {
        self.inner.keys().find(|k| k.eq_ignore_ascii_case(column))
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.key_of(column).and_then(|k| self.inner.get(k))
    }

    pub fn contains(&self, column: &str) -> bool {
        self.key_of(column).is_some()
    }

    /// Insert or replace (case-insensitively) a column value.
    pub fn set(&mut self, column: &str, value: Value) {
        let key = self
            .key_of(column)
            .cloned()
            .unwrap_or_else(|| column.to_string());
        self.inner.insert(key, value);
    }

    /// Insert only when the column is absent or NULL.
    pub fn set_if_missing(&mut self, column: &str, value: Value) {
        if self.get(column).is_none_or(Value::is_null) {
            self.set(column, value);
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let key = self.key_of(column)?.clone();
        self.inner.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.inner.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Dialect-native SQL paired with its final, ordered argument sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementPlan {
    pub sql: String,
    pub args: Vec<Value>,
}

impl StatementPlan {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_lookup_is_case_insensitive() {
        let mut r = Record::new().with("Name", "a").with("id", 1);
        assert_eq!(r.get("NAME"), Some(&Value::Text("a".into())));
        r.set("ID", 2);
        assert_eq!(r.len(), 2);
        assert_eq!(r.try_get::<i64>("id").unwrap(), 2);
        assert_eq!(r.columns().collect::<Vec<_>>(), vec!["Name", "id"]);
    }

    #[test]
    fn column_values_are_lexicographic() {
        let record = Record::new().with("price", 10).with("name", "x").with("id", 1);
        let cv = ColumnValues::from_record(record).unwrap();
        assert_eq!(cv.columns().collect::<Vec<_>>(), vec!["id", "name", "price"]);
    }

    #[test]
    fn column_values_reject_bad_identifiers() {
        let record = Record::new().with("name; drop table x", 1);
        assert!(matches!(
            ColumnValues::from_record(record),
            Err(OrmError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn set_if_missing_only_fills_absent_or_null() {
        let mut cv = ColumnValues::new();
        cv.set("Created_At", Value::Null);
        cv.set_if_missing("created_at", Value::Int(1));
        assert_eq!(cv.get("created_at"), Some(&Value::Int(1)));
        cv.set_if_missing("created_at", Value::Int(2));
        assert_eq!(cv.get("CREATED_AT"), Some(&Value::Int(1)));
        assert_eq!(cv.len(), 1);
    }
}

//! Safe SQL identifier handling.
//!
//! Table and column names can never be bound parameters, so every identifier is
//! validated here before it is interpolated into statement text.
//!
//! Accepted grammar (length 1..=128):
//!
//! ```text
//! [A-Za-z_][A-Za-z0-9_]*            -- name
//! [A-Za-z_][A-Za-z0-9_]*.[A-Za-z_][A-Za-z0-9_]*   -- schema.name
//! ```
//!
//! # Example
//! ```ignore
//! use polyorm::Ident;
//!
//! let t = Ident::parse("sales.orders")?;
//! assert_eq!(t.schema(), Some("sales"));
//! assert_eq!(t.name(), "orders");
//! # Ok::<(), polyorm::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};
use std::fmt;

/// Maximum identifier length, dots included.
pub const MAX_IDENT_LEN: usize = 128;

/// Validate a table or column name.
pub fn validate_ident(name: &str) -> OrmResult<()> {
    if name.is_empty() {
        return Err(OrmError::InvalidIdentifier("identifier cannot be empty".to_string()));
    }
    if name.len() > MAX_IDENT_LEN {
        return Err(OrmError::InvalidIdentifier(format!(
            "identifier longer than {MAX_IDENT_LEN} characters"
        )));
    }

    let mut segments = name.split('.');
    let first = segments.next().unwrap_or_default();
    validate_segment(name, first)?;
    if let Some(second) = segments.next() {
        validate_segment(name, second)?;
    }
    if segments.next().is_some() {
        return Err(OrmError::InvalidIdentifier(format!(
            "'{name}': at most one '.' (schema.table) is allowed"
        )));
    }
    Ok(())
}

fn validate_segment(full: &str, seg: &str) -> OrmResult<()> {
    let mut chars = seg.chars();
    let Some(first) = chars.next() else {
        return Err(OrmError::InvalidIdentifier(format!(
            "'{full}': empty identifier segment"
        )));
    };
    if !(first == '_' || first.is_ascii_alphabetic()) {
        return Err(OrmError::InvalidIdentifier(format!(
            "'{full}': invalid start character '{first}'"
        )));
    }
    if let Some(bad) = chars.find(|c| !(*c == '_' || c.is_ascii_alphanumeric())) {
        return Err(OrmError::InvalidIdentifier(format!(
            "'{full}': invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// A validated SQL identifier, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate and wrap an identifier.
    pub fn parse(s: &str) -> OrmResult<Self> {
        validate_ident(s)?;
        Ok(Self(s.to_string()))
    }

    /// The identifier as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Schema part of `schema.name`, if present.
    pub fn schema(&self) -> Option<&str> {
        self.0.split_once('.').map(|(schema, _)| schema)
    }

    /// Unqualified name part.
    pub fn name(&self) -> &str {
        match self.0.split_once('.') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convert an input into an [`Ident`].
///
/// This is mainly for ergonomics in engine APIs.
pub trait IntoIdent {
    fn into_ident(self) -> OrmResult<Ident>;
}

impl IntoIdent for Ident {
    fn into_ident(self) -> OrmResult<Ident> {
        Ok(self)
    }
}

impl IntoIdent for &Ident {
    fn into_ident(self) -> OrmResult<Ident> {
        Ok(self.clone())
    }
}

impl IntoIdent for &str {
    fn into_ident(self) -> OrmResult<Ident> {
        Ident::parse(self)
    }
}

impl IntoIdent for String {
    fn into_ident(self) -> OrmResult<Ident> {
        validate_ident(&self)?;
        Ok(Ident(self))
    }
}

impl IntoIdent for &String {
    fn into_ident(self) -> OrmResult<Ident> {
        Ident::parse(self)
    }
}

// src/identity/oid.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, StreamdagError};

/// Identity of a persisted entity.
///
/// Internally a 64-bit unsigned counter value. Rendered and parsed as a
/// plain decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(u64);

impl Oid {
    pub const ZERO: Oid = Oid(0);

    pub const fn new(value: u64) -> Self {
        Oid(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The identity immediately after this one, or `None` at `u64::MAX`.
    pub fn successor(self) -> Option<Oid> {
        self.0.checked_add(1).map(Oid)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Oid {
    fn from(value: u64) -> Self {
        Oid(value)
    }
}

impl From<Oid> for u64 {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl FromStr for Oid {
    type Err = StreamdagError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StreamdagError::UnsupportedIdentityRepresentation(format!(
                "expected a decimal string, got {s:?}"
            )));
        }
        trimmed.parse::<u64>().map(Oid).map_err(|e| {
            StreamdagError::UnsupportedIdentityRepresentation(format!(
                "decimal string {s:?} does not fit in 64 bits: {e}"
            ))
        })
    }
}

/// Anything that can be normalised into an [`Oid`].
///
/// Accepted shapes are 64-bit integers, ordinary machine integers and
/// decimal strings. Everything else fails with
/// [`StreamdagError::UnsupportedIdentityRepresentation`].
pub trait IntoOid {
    fn into_oid(self) -> Result<Oid>;
}

impl IntoOid for Oid {
    fn into_oid(self) -> Result<Oid> {
        Ok(self)
    }
}

impl IntoOid for u64 {
    fn into_oid(self) -> Result<Oid> {
        Ok(Oid(self))
    }
}

impl IntoOid for u32 {
    fn into_oid(self) -> Result<Oid> {
        Ok(Oid(u64::from(self)))
    }
}

impl IntoOid for usize {
    fn into_oid(self) -> Result<Oid> {
        u64::try_from(self).map(Oid).map_err(|_| {
            StreamdagError::UnsupportedIdentityRepresentation(format!(
                "usize {self} does not fit in 64 bits"
            ))
        })
    }
}

impl IntoOid for i64 {
    fn into_oid(self) -> Result<Oid> {
        u64::try_from(self).map(Oid).map_err(|_| {
            StreamdagError::UnsupportedIdentityRepresentation(format!(
                "negative integer {self}"
            ))
        })
    }
}

impl IntoOid for i32 {
    fn into_oid(self) -> Result<Oid> {
        i64::from(self).into_oid()
    }
}

impl IntoOid for &str {
    fn into_oid(self) -> Result<Oid> {
        self.parse()
    }
}

impl IntoOid for String {
    fn into_oid(self) -> Result<Oid> {
        self.as_str().parse()
    }
}

impl IntoOid for &Value {
    fn into_oid(self) -> Result<Oid> {
        match self {
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Ok(Oid(v))
                } else if let Some(v) = n.as_i64() {
                    v.into_oid()
                } else {
                    Err(StreamdagError::UnsupportedIdentityRepresentation(format!(
                        "non-integer number {n}"
                    )))
                }
            }
            Value::String(s) => s.as_str().into_oid(),
            other => Err(StreamdagError::UnsupportedIdentityRepresentation(format!(
                "JSON {} value",
                json_shape(other)
            ))),
        }
    }
}

fn json_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

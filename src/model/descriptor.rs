// src/model/descriptor.rs

//! Descriptors of external data stores.
//!
//! These carry configuration only. Opening connections against them is the
//! job of a [`crate::driver::Driver`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Oid;
use crate::model::entity::{Entity, NamedEntity};

/// Network endpoint and credentials of a database server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<Oid>,
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("oid", &self.oid)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A named database reached through a [`ConnectionDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<Oid>,
    pub name: String,
    pub connection: ConnectionDescriptor,
}

/// A file-backed database, addressed by its path/name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDatabaseDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<Oid>,
    pub name: String,
}

/// Discriminant of [`DataSource`], used as half of the executor dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Database,
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Database => f.write_str("database"),
            SourceKind::File => f.write_str("file"),
        }
    }
}

/// Any data store a task can read from or write into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    Database(DatabaseDescriptor),
    File(FileDatabaseDescriptor),
}

impl DataSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            DataSource::Database(_) => SourceKind::Database,
            DataSource::File(_) => SourceKind::File,
        }
    }
}

macro_rules! impl_named_entity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Entity for $ty {
                fn oid(&self) -> Option<Oid> {
                    self.oid
                }

                fn set_oid(&mut self, oid: Oid) {
                    self.oid = Some(oid);
                }
            }

            impl NamedEntity for $ty {
                fn name(&self) -> &str {
                    &self.name
                }
            }
        )*
    };
}

impl_named_entity!(ConnectionDescriptor, DatabaseDescriptor, FileDatabaseDescriptor);

impl Entity for DataSource {
    fn oid(&self) -> Option<Oid> {
        match self {
            DataSource::Database(d) => d.oid,
            DataSource::File(f) => f.oid,
        }
    }

    fn set_oid(&mut self, oid: Oid) {
        match self {
            DataSource::Database(d) => d.oid = Some(oid),
            DataSource::File(f) => f.oid = Some(oid),
        }
    }
}

impl NamedEntity for DataSource {
    fn name(&self) -> &str {
        match self {
            DataSource::Database(d) => &d.name,
            DataSource::File(f) => &f.name,
        }
    }
}

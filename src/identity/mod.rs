// src/identity/mod.rs

//! Entity identities.
//!
//! - [`oid`] defines the [`Oid`] handle and the [`IntoOid`] normalisation
//!   used for every accepted identity representation.
//! - [`generator`] hands out fresh identities, optionally resuming from a
//!   persisted checkpoint.

pub mod generator;
pub mod oid;

pub use generator::{OidGenerator, SharedOidGenerator};
pub use oid::{IntoOid, Oid};

// src/model/entity.rs

use crate::errors::Result;
use crate::identity::Oid;

/// A persisted record with a lazily assigned identity.
///
/// The identity is `None` until the first save, and never changes after that.
pub trait Entity: Clone + Send + Sync + 'static {
    fn oid(&self) -> Option<Oid>;

    /// Raw setter used by [`Entity::assign_oid`]; storage code should go
    /// through `assign_oid` instead.
    fn set_oid(&mut self, oid: Oid);

    /// Assign an identity from `next` if none is present yet.
    ///
    /// Returns the (possibly pre-existing) identity.
    fn assign_oid(&mut self, next: impl FnOnce() -> Result<Oid>) -> Result<Oid> {
        match self.oid() {
            Some(existing) => Ok(existing),
            None => {
                let oid = next()?;
                self.set_oid(oid);
                Ok(oid)
            }
        }
    }
}

/// An [`Entity`] with a display name.
pub trait NamedEntity: Entity {
    fn name(&self) -> &str;
}

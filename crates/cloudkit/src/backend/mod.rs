//! Backend abstraction for the provider's resource API.
//!
//! The [`CloudApi`] trait is the only seam between the provisioning engine
//! and a cloud account. It mirrors the CRUD surface every provider exposes
//! per resource kind, plus a lookup by logical address that lets a caller
//! find objects it created but never recorded.

pub mod sandbox;

use crate::error::Result;
use crate::schema::ResourceKind;
use crate::types::{Attributes, RemoteObject};

/// Provider resource API.
///
/// Implementations must be safe to call from several worker threads at
/// once; the engine issues independent calls concurrently.
pub trait CloudApi: Send + Sync {
    /// Create an object. `address` is the caller's logical name for it and
    /// is stored with the object so [`CloudApi::lookup`] can find it later.
    fn create(
        &self,
        kind: ResourceKind,
        address: &str,
        attributes: &Attributes,
    ) -> Result<RemoteObject>;

    /// Read an object by id. Returns `None` if it does not exist.
    fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteObject>>;

    /// Change the in-place updatable attributes of an object.
    fn update(&self, kind: ResourceKind, id: &str, attributes: &Attributes)
    -> Result<RemoteObject>;

    /// Delete an object.
    fn delete(&self, kind: ResourceKind, id: &str) -> Result<()>;

    /// Find an object by the logical address it was created with.
    fn lookup(&self, kind: ResourceKind, address: &str) -> Result<Option<RemoteObject>>;

    /// Check whether an object exists.
    fn exists(&self, kind: ResourceKind, id: &str) -> Result<bool> {
        Ok(self.read(kind, id)?.is_some())
    }
}

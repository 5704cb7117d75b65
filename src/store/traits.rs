//! Key-value store trait — single async interface for dispatcher state.
//!
//! Both the workspace link registry and the pending-onboarding set sit on top
//! of this, so a durable backend can replace the in-memory one without
//! touching dispatcher logic.

use async_trait::async_trait;

use crate::error::StoreError;

/// String-keyed store for values of type `V`.
///
/// Every method touches exactly one key and must be atomic with respect to
/// other calls on the same key.
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<V>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: V) -> Result<(), StoreError>;

    /// Remove `key`. Returns the value that was removed, if any.
    async fn delete(&self, key: &str) -> Result<Option<V>, StoreError>;

    /// Store `value` only if `key` is absent. Returns `true` if it was inserted.
    async fn insert_if_absent(&self, key: &str, value: V) -> Result<bool, StoreError>;
}

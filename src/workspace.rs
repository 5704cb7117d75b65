//! Workspace link registry — which backend customer each chat workspace
//! belongs to.
//!
//! A workspace is *unlinked* until onboarding stores a [`CustomerLink`] for
//! it, and *linked* from then on.

use std::sync::Arc;

use tracing::info;

use crate::backend::CustomerLink;
use crate::error::StoreError;
use crate::store::{InMemoryStore, KeyValueStore};

/// Workspace id → customer link.
pub struct WorkspaceLinkRegistry {
    store: Arc<dyn KeyValueStore<CustomerLink>>,
}

impl WorkspaceLinkRegistry {
    pub fn new(store: Arc<dyn KeyValueStore<CustomerLink>>) -> Self {
        Self { store }
    }

    /// Registry over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub async fn get(&self, workspace_id: &str) -> Result<Option<CustomerLink>, StoreError> {
        self.store.get(workspace_id).await
    }

    /// Link `workspace_id` to `link`, replacing any previous link.
    pub async fn set(&self, workspace_id: &str, link: CustomerLink) -> Result<(), StoreError> {
        info!(
            workspace_id,
            customer_id = %link.customer_id,
            customer = %link.customer_name,
            domain = %link.domain,
            "Workspace linked to customer"
        );
        self.store.set(workspace_id, link).await
    }

    pub async fn is_linked(&self, workspace_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(workspace_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: &str) -> CustomerLink {
        CustomerLink {
            customer_id: id.into(),
            customer_name: format!("Customer {id}"),
            domain: "acme.com".into(),
        }
    }

    #[tokio::test]
    async fn unlinked_by_default() {
        let registry = WorkspaceLinkRegistry::in_memory();
        assert!(registry.get("W1").await.unwrap().is_none());
        assert!(!registry.is_linked("W1").await.unwrap());
    }

    #[tokio::test]
    async fn set_links_workspace() {
        let registry = WorkspaceLinkRegistry::in_memory();
        registry.set("W1", link("c1")).await.unwrap();

        assert_eq!(registry.get("W1").await.unwrap(), Some(link("c1")));
        assert!(!registry.is_linked("W2").await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrites_previous_link() {
        let registry = WorkspaceLinkRegistry::in_memory();
        registry.set("W1", link("c1")).await.unwrap();
        registry.set("W1", link("c2")).await.unwrap();

        assert_eq!(
            registry.get("W1").await.unwrap().map(|l| l.customer_id).as_deref(),
            Some("c2")
        );
    }
}

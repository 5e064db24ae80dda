// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Item registry.
//!
//! Keeps every known item with its client handle, and per subscription the
//! binding between client handles and server-assigned item handles. Server
//! handles are only meaningful within the subscription that obtained them,
//! so bindings are keyed by [`SubscriptionId`].

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::types::{ClientItemHandle, ItemIdentity, ServerItemHandle, SubscriptionId};

/// An item known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredItem {
    /// Server-addressable identity.
    pub identity: ItemIdentity,
    /// Client handle.
    pub client_handle: ClientItemHandle,
}

#[derive(Debug, Default)]
struct Bindings {
    by_client: HashMap<ClientItemHandle, ServerItemHandle>,
    by_server: HashMap<ServerItemHandle, ClientItemHandle>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_identity: HashMap<ItemIdentity, ClientItemHandle>,
    items: HashMap<ClientItemHandle, ItemIdentity>,
    bindings: HashMap<SubscriptionId, Bindings>,
    next_handle: u64,
}

/// Thread-safe item registry shared by every subscription of a client.
#[derive(Debug, Default)]
pub struct ItemRegistry {
    inner: RwLock<RegistryInner>,
}

impl ItemRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an item and returns its client handle.
    ///
    /// Registering the same identity again returns the existing handle.
    pub fn register(&self, identity: &ItemIdentity) -> ClientItemHandle {
        if let Some(handle) = self.inner.read().by_identity.get(identity) {
            return handle.clone();
        }

        let mut inner = self.inner.write();
        if let Some(handle) = inner.by_identity.get(identity) {
            return handle.clone();
        }

        inner.next_handle += 1;
        let handle = ClientItemHandle::new(format!("item-{}", inner.next_handle));
        inner.by_identity.insert(identity.clone(), handle.clone());
        inner.items.insert(handle.clone(), identity.clone());

        tracing::debug!(item = %identity, client_handle = %handle, "Item registered");
        handle
    }

    /// Binds a client handle to a server handle within a subscription.
    ///
    /// Re-binding to the same server handle is a no-op. Binding to a
    /// different one without an intervening [`unbind`](Self::unbind) fails.
    pub fn bind(
        &self,
        subscription: SubscriptionId,
        client: &ClientItemHandle,
        server: &ServerItemHandle,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if !inner.items.contains_key(client) {
            return Err(RegistryError::UnknownClientHandle {
                client: client.clone(),
            });
        }

        let bindings = inner.bindings.entry(subscription).or_default();
        if let Some(bound) = bindings.by_client.get(client) {
            if bound == server {
                return Ok(());
            }
            return Err(RegistryError::DuplicateHandle {
                client: client.clone(),
                bound: bound.clone(),
                requested: server.clone(),
            });
        }

        if let Some(previous) = bindings.by_server.insert(server.clone(), client.clone()) {
            // The server reused a handle; the older binding is gone.
            bindings.by_client.remove(&previous);
        }
        bindings.by_client.insert(client.clone(), server.clone());
        Ok(())
    }

    /// Removes the binding of a server handle. Returns the client handle it
    /// was bound to.
    pub fn unbind(
        &self,
        subscription: SubscriptionId,
        server: &ServerItemHandle,
    ) -> Option<ClientItemHandle> {
        let mut inner = self.inner.write();
        let bindings = inner.bindings.get_mut(&subscription)?;
        let client = bindings.by_server.remove(server)?;
        bindings.by_client.remove(&client);
        if bindings.by_server.is_empty() {
            inner.bindings.remove(&subscription);
        }
        Some(client)
    }

    /// Removes every binding of a subscription. Returns how many were removed.
    pub fn unbind_all(&self, subscription: SubscriptionId) -> usize {
        self.inner
            .write()
            .bindings
            .remove(&subscription)
            .map(|b| b.by_server.len())
            .unwrap_or(0)
    }

    /// Looks up the item bound to a server handle.
    pub fn lookup(
        &self,
        subscription: SubscriptionId,
        server: &ServerItemHandle,
    ) -> Result<RegisteredItem, RegistryError> {
        let inner = self.inner.read();
        let not_found = || RegistryError::NotFound {
            subscription,
            server: server.clone(),
        };

        let client = inner
            .bindings
            .get(&subscription)
            .and_then(|b| b.by_server.get(server))
            .ok_or_else(not_found)?;
        let identity = inner.items.get(client).ok_or_else(not_found)?;

        Ok(RegisteredItem {
            identity: identity.clone(),
            client_handle: client.clone(),
        })
    }

    /// Returns the identity registered under a client handle.
    pub fn resolve(&self, client: &ClientItemHandle) -> Result<ItemIdentity, RegistryError> {
        self.inner
            .read()
            .items
            .get(client)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownClientHandle {
                client: client.clone(),
            })
    }

    /// Returns the server handle a client handle is bound to.
    pub fn server_handle(
        &self,
        subscription: SubscriptionId,
        client: &ClientItemHandle,
    ) -> Option<ServerItemHandle> {
        self.inner
            .read()
            .bindings
            .get(&subscription)
            .and_then(|b| b.by_client.get(client))
            .cloned()
    }

    /// Returns the number of registered items.
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Returns `true` if no item is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bindings held by a subscription.
    pub fn bound_count(&self, subscription: SubscriptionId) -> usize {
        self.inner
            .read()
            .bindings
            .get(&subscription)
            .map(|b| b.by_server.len())
            .unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: SubscriptionId = SubscriptionId::new(1);

    #[test]
    fn test_register_is_idempotent() {
        let registry = ItemRegistry::new();
        let identity = ItemIdentity::new("Plant", "Tank.Level");

        let first = registry.register(&identity);
        let second = registry.register(&identity);

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(&first).unwrap(), identity);
    }

    #[test]
    fn test_distinct_identities_get_distinct_handles() {
        let registry = ItemRegistry::new();
        let a = registry.register(&ItemIdentity::named("A"));
        let b = registry.register(&ItemIdentity::named("B"));
        let a_other_path = registry.register(&ItemIdentity::new("Other", "A"));

        assert_ne!(a, b);
        assert_ne!(a, a_other_path);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_bind_and_lookup() {
        let registry = ItemRegistry::new();
        let identity = ItemIdentity::named("A");
        let client = registry.register(&identity);
        let server = ServerItemHandle::from("srv-A");

        registry.bind(SUB, &client, &server).unwrap();
        let item = registry.lookup(SUB, &server).unwrap();
        assert_eq!(item.identity, identity);
        assert_eq!(item.client_handle, client);
        assert_eq!(registry.server_handle(SUB, &client), Some(server.clone()));

        // Same binding again is fine.
        registry.bind(SUB, &client, &server).unwrap();
        assert_eq!(registry.bound_count(SUB), 1);
    }

    #[test]
    fn test_rebind_requires_unbind() {
        let registry = ItemRegistry::new();
        let client = registry.register(&ItemIdentity::named("A"));
        let first = ServerItemHandle::from("srv-1");
        let second = ServerItemHandle::from("srv-2");

        registry.bind(SUB, &client, &first).unwrap();
        let err = registry.bind(SUB, &client, &second).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateHandle {
                client: client.clone(),
                bound: first.clone(),
                requested: second.clone(),
            }
        );

        assert_eq!(registry.unbind(SUB, &first), Some(client.clone()));
        registry.bind(SUB, &client, &second).unwrap();
        assert!(registry.lookup(SUB, &first).is_err());
        assert!(registry.lookup(SUB, &second).is_ok());
    }

    #[test]
    fn test_bindings_are_per_subscription() {
        let registry = ItemRegistry::new();
        let client = registry.register(&ItemIdentity::named("A"));
        let other = SubscriptionId::new(2);

        registry.bind(SUB, &client, &ServerItemHandle::from("x")).unwrap();
        registry.bind(other, &client, &ServerItemHandle::from("y")).unwrap();

        assert!(matches!(
            registry.lookup(SUB, &ServerItemHandle::from("y")),
            Err(RegistryError::NotFound { .. })
        ));
        assert_eq!(registry.unbind_all(SUB), 1);
        assert_eq!(registry.bound_count(SUB), 0);
        assert_eq!(registry.bound_count(other), 1);
    }

    #[test]
    fn test_bind_unknown_client() {
        let registry = ItemRegistry::new();
        let result = registry.bind(
            SUB,
            &ClientItemHandle::from("ghost"),
            &ServerItemHandle::from("srv"),
        );
        assert!(matches!(result, Err(RegistryError::UnknownClientHandle { .. })));
    }

    #[test]
    fn test_concurrent_register() {
        use std::sync::Arc;

        let registry = Arc::new(ItemRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register(&ItemIdentity::named("Shared")))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 1);
    }
}

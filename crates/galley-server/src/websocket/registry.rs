//! Connection registry: global id map plus a per-restaurant index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use galley_core::errors::NotifyError;
use galley_core::ids::{ConnectionId, RestaurantId};
use parking_lot::RwLock;

use super::connection::ClientConnection;

#[derive(Default)]
struct Maps {
    by_id: HashMap<ConnectionId, Arc<ClientConnection>>,
    by_restaurant: HashMap<RestaurantId, HashSet<ConnectionId>>,
}

/// Owns every registered [`ClientConnection`].
///
/// Both maps are updated under one write lock, so a connection is never
/// visible in one and missing from the other. Lookups return snapshots.
#[derive(Default)]
pub struct ConnectionRegistry {
    maps: RwLock<Maps>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Fails if the id is already registered.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Result<(), NotifyError> {
        let mut maps = self.maps.write();
        if maps.by_id.contains_key(&connection.id) {
            return Err(NotifyError::DuplicateConnection(connection.id.clone()));
        }
        let _ = maps
            .by_restaurant
            .entry(connection.restaurant_id.clone())
            .or_default()
            .insert(connection.id.clone());
        let _ = maps.by_id.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove a connection, returning it if it was registered.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut maps = self.maps.write();
        let connection = maps.by_id.remove(id)?;
        if let Some(ids) = maps.by_restaurant.get_mut(&connection.restaurant_id) {
            let _ = ids.remove(id);
            if ids.is_empty() {
                let _ = maps.by_restaurant.remove(&connection.restaurant_id);
            }
        }
        Some(connection)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.maps.read().by_id.get(id).cloned()
    }

    /// Look up a connection, failing with `ConnectionNotFound`.
    pub fn require(&self, id: &ConnectionId) -> Result<Arc<ClientConnection>, NotifyError> {
        self.get(id)
            .ok_or_else(|| NotifyError::ConnectionNotFound(id.clone()))
    }

    /// Snapshot of a restaurant's connections.
    pub fn list_by_restaurant(&self, restaurant_id: &RestaurantId) -> Vec<Arc<ClientConnection>> {
        let maps = self.maps.read();
        maps.by_restaurant
            .get(restaurant_id)
            .map(|ids| ids.iter().filter_map(|id| maps.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of every connection.
    pub fn all(&self) -> Vec<Arc<ClientConnection>> {
        self.maps.read().by_id.values().cloned().collect()
    }

    /// Registered connection count.
    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restaurants with at least one connection.
    pub fn restaurant_count(&self) -> usize {
        self.maps.read().by_restaurant.len()
    }
}

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::{ManagedServer, ServerId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Application-wide set of managed servers.
///
/// Exactly one [`ManagedServer`] exists per id and per install path; all
/// components share the same `Arc` so that state is observed consistently.
#[derive(Default)]
pub struct ServerRegistry {
    servers: RwLock<HashMap<ServerId, Arc<ManagedServer>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ServerId, Arc<ManagedServer>>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ServerId, Arc<ManagedServer>>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a server, rejecting a duplicate id or install path
    pub fn add(&self, config: ServerConfig) -> Result<Arc<ManagedServer>> {
        let mut servers = self.write();
        if servers.contains_key(&config.id) {
            return Err(Error::DuplicateServer(format!("id {} is already registered", config.id)));
        }
        if let Some(existing) = servers
            .values()
            .find(|s| same_path(&s.config().install_path, &config.install_path))
        {
            return Err(Error::DuplicateServer(format!(
                "install path {} is already used by '{}'",
                config.install_path.display(),
                existing.name()
            )));
        }

        tracing::info!(server = %config.name, id = %config.id, "Registered server");
        let server = Arc::new(ManagedServer::new(config));
        servers.insert(server.id(), Arc::clone(&server));
        Ok(server)
    }

    /// Remove a server from the registry
    pub fn remove(&self, id: ServerId) -> Option<Arc<ManagedServer>> {
        self.write().remove(&id)
    }

    /// Look a server up by id
    pub fn get(&self, id: ServerId) -> Result<Arc<ManagedServer>> {
        self.read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))
    }

    /// Look a server up by display name
    pub fn find_by_name(&self, name: &str) -> Option<Arc<ManagedServer>> {
        self.read().values().find(|s| s.name() == name).cloned()
    }

    /// All registered servers, ordered by name
    pub fn all(&self) -> Vec<Arc<ManagedServer>> {
        let mut servers: Vec<_> = self.read().values().cloned().collect();
        servers.sort_by(|a, b| a.name().cmp(b.name()));
        servers
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

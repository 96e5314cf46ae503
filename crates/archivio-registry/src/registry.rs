//! In-memory registration registry with write-through persistence.
//!
//! All reads are served from RwLock-guarded maps. Mutations update the maps
//! first and then write the changed registration through to the store, so a
//! restart reloads the same state the pipeline last saw.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

use archivio_common::stat::AggregateStatResult;
use archivio_common::types::{ArchiveStatus, Provider, RegistrationId};
use archivio_common::{Error, Result};

use crate::store::RegistryStore;
use crate::types::{Completion, Registration};

/// Registration archive-state registry
pub struct Registry {
    /// Tracked registrations: id -> Registration
    registrations: RwLock<HashMap<RegistrationId, Registration>>,
    /// Parent -> child registrations, for tombstone cascades
    children: RwLock<HashMap<RegistrationId, Vec<RegistrationId>>>,
    /// Persistent store (None = in-memory only)
    store: Option<Arc<RegistryStore>>,
}

impl Registry {
    /// Create an in-memory registry without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a registry backed by persistent storage.
    /// Loads all existing registrations from the store on startup.
    #[must_use]
    pub fn with_store(store: Arc<RegistryStore>) -> Self {
        let mut registry = Self::new();
        registry.store = Some(store);
        registry.load_from_store();
        registry
    }

    /// Load all registrations from the persistent store into memory.
    fn load_from_store(&self) {
        let Some(store) = &self.store else { return };

        match store.load_registrations() {
            Ok(entries) => {
                let mut map = self.registrations.write();
                let mut children = self.children.write();
                for (_id, registration) in entries {
                    if let Some(parent) = &registration.parent {
                        children
                            .entry(parent.clone())
                            .or_default()
                            .push(registration.id.clone());
                    }
                    map.insert(registration.id.clone(), registration);
                }
                info!("Loaded {} registrations from store", map.len());
            }
            Err(e) => error!("Failed to load registrations: {}", e),
        }
    }

    fn persist(&self, registration: &Registration) {
        if let Some(store) = &self.store {
            store.put_registration(registration.id.as_str(), registration);
        }
    }

    /// Start tracking a registration. A registration with no providers would
    /// count as vacuously complete, so it is rejected here.
    pub fn insert(&self, registration: Registration) -> Result<()> {
        if registration.providers.is_empty() {
            return Err(Error::NoProviders);
        }
        {
            let mut map = self.registrations.write();
            if map.contains_key(&registration.id) {
                return Err(Error::RegistrationAlreadyExists(registration.id.to_string()));
            }
            map.insert(registration.id.clone(), registration.clone());
        }
        if let Some(parent) = &registration.parent {
            self.children
                .write()
                .entry(parent.clone())
                .or_default()
                .push(registration.id.clone());
        }
        self.persist(&registration);
        info!(
            "Tracking registration {} with {} providers",
            registration.id,
            registration.providers.len()
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &RegistrationId) -> Option<Registration> {
        self.registrations.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &RegistrationId) -> bool {
        self.registrations.read().contains_key(id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<Registration> {
        self.registrations.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Mutate one registration under the write lock, then persist it.
    fn update<T>(
        &self,
        id: &RegistrationId,
        f: impl FnOnce(&mut Registration) -> Result<T>,
    ) -> Result<T> {
        let (updated, result) = {
            let mut map = self.registrations.write();
            let registration = map
                .get_mut(id)
                .ok_or_else(|| Error::RegistrationNotFound(id.to_string()))?;
            let result = f(registration)?;
            (registration.clone(), result)
        };
        self.persist(&updated);
        Ok(result)
    }

    /// Record a provider status transition and return the previous status.
    ///
    /// Terminal statuses never revert: writing the same terminal status again
    /// is an idempotent no-op, writing a different one is an error.
    pub fn set_status(
        &self,
        id: &RegistrationId,
        provider: &Provider,
        status: ArchiveStatus,
    ) -> Result<ArchiveStatus> {
        self.update(id, |registration| {
            if registration.is_deleted {
                return Err(Error::RegistrationDeleted(id.to_string()));
            }
            let state = registration.providers.get_mut(provider).ok_or_else(|| {
                Error::ProviderNotFound {
                    registration: id.to_string(),
                    provider: provider.to_string(),
                }
            })?;
            let previous = state.status;
            if previous.is_terminal() {
                if previous == status {
                    return Ok(previous);
                }
                return Err(Error::TerminalStatus {
                    registration: id.to_string(),
                    provider: provider.to_string(),
                    status: previous.to_string(),
                });
            }
            state.status = status;
            state.updated_at = Utc::now();
            debug!(
                "Registration {} provider {}: {} -> {}",
                id, provider, previous, status
            );
            Ok(previous)
        })
    }

    /// Record the stat-stage roll-up for a provider.
    pub fn set_stat(
        &self,
        id: &RegistrationId,
        provider: &Provider,
        stat: AggregateStatResult,
    ) -> Result<()> {
        self.update(id, |registration| {
            if registration.is_deleted {
                return Err(Error::RegistrationDeleted(id.to_string()));
            }
            let state = registration.providers.get_mut(provider).ok_or_else(|| {
                Error::ProviderNotFound {
                    registration: id.to_string(),
                    provider: provider.to_string(),
                }
            })?;
            state.stat = Some(stat);
            state.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Record gateway errors for a provider.
    pub fn set_errors(
        &self,
        id: &RegistrationId,
        provider: &Provider,
        errors: Vec<String>,
    ) -> Result<()> {
        self.update(id, |registration| {
            if registration.is_deleted {
                return Err(Error::RegistrationDeleted(id.to_string()));
            }
            let state = registration.providers.get_mut(provider).ok_or_else(|| {
                Error::ProviderNotFound {
                    registration: id.to_string(),
                    provider: provider.to_string(),
                }
            })?;
            state.errors = errors;
            state.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Aggregate completion across a registration's providers.
    pub fn completion(&self, id: &RegistrationId) -> Result<Completion> {
        let map = self.registrations.read();
        let registration = map
            .get(id)
            .ok_or_else(|| Error::RegistrationNotFound(id.to_string()))?;
        Ok(registration.completion())
    }

    /// Link the destination provider picked at archive start.
    pub fn link_archive_provider(&self, id: &RegistrationId, provider: Provider) -> Result<()> {
        self.update(id, |registration| {
            if registration.is_deleted {
                return Err(Error::RegistrationDeleted(id.to_string()));
            }
            registration.archive_provider = Some(provider);
            Ok(())
        })
    }

    pub fn has_archive_provider(&self, id: &RegistrationId) -> Result<bool> {
        let map = self.registrations.read();
        let registration = map
            .get(id)
            .ok_or_else(|| Error::RegistrationNotFound(id.to_string()))?;
        Ok(registration.archive_provider.is_some())
    }

    /// Mark a registration fully archived.
    ///
    /// Returns whether this call newly archived it. The write lock decides
    /// the winner, so callers racing over the same completion can gate their
    /// side effects on the result.
    pub fn mark_archived(&self, id: &RegistrationId) -> Result<bool> {
        let newly = self.update(id, |registration| {
            if registration.is_deleted {
                return Err(Error::RegistrationDeleted(id.to_string()));
            }
            let newly = registration.archiving;
            if registration.archived_at.is_none() {
                registration.archived_at = Some(Utc::now());
            }
            registration.archiving = false;
            Ok(newly)
        })?;
        if newly {
            info!("Registration {} fully archived", id);
        }
        Ok(newly)
    }

    /// Tombstone a registration and all its descendants.
    ///
    /// Returns the registrations that were newly tombstoned by this call, so
    /// a repeated cascade over an already-deleted tree comes back empty.
    /// Tombstoned registrations stay in the registry so their failure state
    /// remains inspectable; they only stop accepting updates.
    pub fn mark_deleted_tree(&self, id: &RegistrationId) -> Result<Vec<RegistrationId>> {
        if !self.contains(id) {
            return Err(Error::RegistrationNotFound(id.to_string()));
        }

        let mut affected = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = vec![id.clone()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let updated = {
                let mut map = self.registrations.write();
                map.get_mut(&current).map(|registration| {
                    let newly = !registration.is_deleted;
                    registration.is_deleted = true;
                    registration.archiving = false;
                    (registration.clone(), newly)
                })
            };
            if let Some((registration, newly)) = updated {
                if newly {
                    self.persist(&registration);
                    affected.push(current.clone());
                }
            }
            queue.extend(self.children_of(&current));
        }

        info!(
            "Tombstoned registration tree rooted at {} ({} affected)",
            id,
            affected.len()
        );
        Ok(affected)
    }

    /// Registrations still archiving past the cutoff with unfinished providers.
    #[must_use]
    pub fn find_stalled(&self, cutoff: DateTime<Utc>) -> Vec<Registration> {
        self.registrations
            .read()
            .values()
            .filter(|r| {
                r.archiving
                    && !r.is_deleted
                    && r.has_unfinished_providers()
                    && r.registered_at < cutoff
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn children_of(&self, id: &RegistrationId) -> Vec<RegistrationId> {
        self.children.read().get(id).cloned().unwrap_or_default()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

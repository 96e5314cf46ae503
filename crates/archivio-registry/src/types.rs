//! Stored types for the registration registry.
//!
//! These types are serialized to redb via bincode, which is not
//! self-describing: every field must be written, so no serde skip
//! attributes here. The JSON status API maps them onto its own report
//! types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use archivio_common::stat::AggregateStatResult;
use archivio_common::types::{ArchiveStatus, NodeId, Provider, RegistrationId, UserId};

/// Archive state of a single provider on a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    pub status: ArchiveStatus,
    /// File-tree roll-up recorded during the stat stage
    pub stat: Option<AggregateStatResult>,
    /// Errors reported by the gateway for this provider
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderState {
    /// Fresh state for a provider that has not been touched yet
    #[must_use]
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: ArchiveStatus::Pending,
            stat: None,
            errors: Vec::new(),
            updated_at: now,
        }
    }
}

/// A registration being archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    /// Node the registration was created from
    pub source: NodeId,
    /// Registration title, used in archive folder names and notifications
    pub title: String,
    /// User who initiated the registration
    pub initiator: UserId,
    /// Where failure notifications for the initiator go
    pub initiator_email: String,
    /// Parent registration for component registrations
    pub parent: Option<RegistrationId>,
    /// Destination provider linked when archiving starts
    pub archive_provider: Option<Provider>,
    /// Per-provider archive state
    pub providers: BTreeMap<Provider, ProviderState>,
    /// True from archive start until success or failure
    pub archiving: bool,
    /// Tombstone set when archiving fails
    pub is_deleted: bool,
    pub registered_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Aggregate completion of a registration's archive run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// At least one provider is still pending or checking
    Incomplete,
    /// Every provider reached success
    Complete,
    /// No provider is still running and at least one failed
    Failed(Vec<Provider>),
}

impl Registration {
    /// Build a new registration with every provider in pending state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RegistrationId,
        source: NodeId,
        title: String,
        initiator: UserId,
        initiator_email: String,
        parent: Option<RegistrationId>,
        providers: &[Provider],
        now: DateTime<Utc>,
    ) -> Self {
        let providers = providers
            .iter()
            .map(|p| (p.clone(), ProviderState::pending(now)))
            .collect();
        Self {
            id,
            source,
            title,
            initiator,
            initiator_email,
            parent,
            archive_provider: None,
            providers,
            archiving: true,
            is_deleted: false,
            registered_at: now,
            archived_at: None,
        }
    }

    /// Whether any provider has not reached a terminal status yet
    #[must_use]
    pub fn has_unfinished_providers(&self) -> bool {
        self.providers.values().any(|s| !s.status.is_terminal())
    }

    /// Aggregate completion across all providers.
    ///
    /// A registration with no providers never completes; starts with an
    /// empty provider set are rejected upstream.
    #[must_use]
    pub fn completion(&self) -> Completion {
        if self.providers.is_empty() || self.has_unfinished_providers() {
            return Completion::Incomplete;
        }
        let failed: Vec<Provider> = self
            .providers
            .iter()
            .filter(|(_, s)| s.status == ArchiveStatus::Failure)
            .map(|(p, _)| p.clone())
            .collect();
        if failed.is_empty() {
            Completion::Complete
        } else {
            Completion::Failed(failed)
        }
    }
}

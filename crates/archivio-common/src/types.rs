//! Core type definitions for ArchivIO
//!
//! This module defines the fundamental types used throughout the system:
//! platform identifiers, storage-provider names, and the per-provider
//! archival status machine.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-guid identifier validation shared by node, registration, and user
/// ids: 3-32 lowercase ASCII alphanumerics.
fn validate_short_id(id: &str) -> Result<(), IdError> {
    if id.len() < 3 {
        return Err(IdError::TooShort);
    }
    if id.len() > 32 {
        return Err(IdError::TooLong);
    }
    for c in id.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() {
            return Err(IdError::InvalidChar(c));
        }
    }
    Ok(())
}

/// Errors that can occur when creating a platform identifier
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdError {
    #[error("identifier must be at least 3 characters")]
    TooShort,
    #[error("identifier must be at most 32 characters")]
    TooLong,
    #[error("identifier contains invalid character: {0}")]
    InvalidChar(char),
}

/// Identifier of a project node on the platform
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node id (validates the short-guid shape)
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        validate_short_id(&id)?;
        Ok(Self(id))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:?})", self.0)
    }
}

/// Identifier of a registration (a frozen node). Registrations are nodes on
/// the platform; the distinct type keeps source and destination from being
/// swapped at API seams.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct RegistrationId(String);

impl RegistrationId {
    /// Create a new registration id (validates the short-guid shape)
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        validate_short_id(&id)?;
        Ok(Self(id))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistrationId({:?})", self.0)
    }
}

/// Identifier of a platform user
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct UserId(String);

impl UserId {
    /// Create a new user id (validates the short-guid shape)
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        validate_short_id(&id)?;
        Ok(Self(id))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({:?})", self.0)
    }
}

/// Short name of a storage provider addon (`dropbox`, `box`, `archivestore`, ...)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct Provider(String);

impl Provider {
    /// Create a new provider name (validates addon short-name rules)
    pub fn new(name: impl Into<String>) -> Result<Self, ProviderNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the provider short name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable provider name, used for the archive folder rename
    /// ("Archive of Dropbox"). Unknown providers get their short name
    /// title-cased.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.0.as_str() {
            "archivestore" => "Archive Store".to_string(),
            "dropbox" => "Dropbox".to_string(),
            "box" => "Box".to_string(),
            "googledrive" => "Google Drive".to_string(),
            "onedrive" => "OneDrive".to_string(),
            "owncloud" => "ownCloud".to_string(),
            "s3" => "Amazon S3".to_string(),
            "figshare" => "figshare".to_string(),
            other => {
                let mut chars = other.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }

    /// Validate an addon short name: 2-32 lowercase ASCII alphanumerics
    fn validate(name: &str) -> Result<(), ProviderNameError> {
        if name.len() < 2 {
            return Err(ProviderNameError::TooShort);
        }
        if name.len() > 32 {
            return Err(ProviderNameError::TooLong);
        }
        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() {
                return Err(ProviderNameError::InvalidChar(c));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provider({:?})", self.0)
    }
}

/// Errors that can occur when creating a provider name
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderNameError {
    #[error("provider name must be at least 2 characters")]
    TooShort,
    #[error("provider name must be at most 32 characters")]
    TooLong,
    #[error("provider name contains invalid character: {0}")]
    InvalidChar(char),
}

/// Per-provider archival status.
///
/// Lifecycle: `Pending` (registered) -> `Checking` (file tree enumerated,
/// statistics gathered) -> `Pending` (copy requested) -> `Success | Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Waiting: either not yet statted, or copy requested and in flight
    Pending,
    /// File tree enumeration and statistics gathering in progress
    Checking,
    /// Copy into the archive provider completed
    Success,
    /// Copy rejected or errored; errors recorded on the provider state
    Failure,
}

impl ArchiveStatus {
    /// Whether the status is final for the provider
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a registration's archive failed as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// One or more provider copies failed
    Copy,
    /// Total statted size exceeded the configured cap; no copy was attempted
    SizeExceeded,
    /// Still archiving past the configured timeout; failed by the sweeper
    Stalled,
}

impl FailureCause {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy_error",
            Self::SizeExceeded => "size_exceeded",
            Self::Stalled => "stalled",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_validation() {
        assert!(NodeId::new("ab3cd").is_ok());
        assert!(NodeId::new("ab").is_err());
        assert!(NodeId::new("AB3CD").is_err());
        assert!(NodeId::new("ab-cd").is_err());
        assert!(NodeId::new("a".repeat(33)).is_err());
    }

    #[test]
    fn test_provider_validation() {
        assert!(Provider::new("dropbox").is_ok());
        assert!(Provider::new("s3").is_ok());
        assert!(Provider::new("x").is_err());
        assert!(Provider::new("Drop Box").is_err());
    }

    #[test]
    fn test_provider_display_name() {
        assert_eq!(Provider::new_unchecked("dropbox").display_name(), "Dropbox");
        assert_eq!(
            Provider::new_unchecked("archivestore").display_name(),
            "Archive Store"
        );
        assert_eq!(Provider::new_unchecked("zenodo").display_name(), "Zenodo");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!ArchiveStatus::Pending.is_terminal());
        assert!(!ArchiveStatus::Checking.is_terminal());
        assert!(ArchiveStatus::Success.is_terminal());
        assert!(ArchiveStatus::Failure.is_terminal());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ArchiveStatus::Checking).unwrap();
        assert_eq!(json, "\"checking\"");
        let status: ArchiveStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(status, ArchiveStatus::Success);
    }
}

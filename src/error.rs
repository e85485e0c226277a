//! Error types for the moderation core
//!
//! Every fallible step in the pipeline, the ledger and the sweepers reports one
//! of these. Callers branch on [`ErrorKind`] rather than on the variant so that
//! platform and store failures can be classified the same way.

use derive_more::Display;
use poise::serenity_prelude as serenity;
use thiserror::Error;

/// Coarse classification used by step reports and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    #[display("permission denied")]
    PermissionDenied,
    #[display("not found")]
    NotFound,
    #[display("invalid policy")]
    InvalidPolicy,
    #[display("allocation conflict")]
    AllocationConflict,
    #[display("store unavailable")]
    StoreUnavailable,
    #[display("platform")]
    Platform,
    #[display("internal")]
    Internal,
}

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The platform refused an enforcement action
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Target message, channel, member or record no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// A policy entry could not be used (e.g. a malformed regex)
    #[error("Invalid policy entry `{pattern}`: {reason}")]
    InvalidPolicy { pattern: String, reason: String },

    /// Another writer already holds this case number
    #[error("Case #{case_number} already exists in guild {guild_id}")]
    AllocationConflict { guild_id: u64, case_number: u64 },

    /// Case allocation kept conflicting
    #[error("Gave up allocating a case number in guild {guild_id} after {attempts} attempts")]
    AllocationExhausted { guild_id: u64, attempts: u32 },

    /// Persistence layer is down or rejected the write
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(Box<serenity::Error>),

    /// Snapshot (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Generic error
    #[error("Moderation error: {0}")]
    Other(String),
}

impl ModerationError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidPolicy { .. } => ErrorKind::InvalidPolicy,
            Self::AllocationConflict { .. } | Self::AllocationExhausted { .. } => {
                ErrorKind::AllocationConflict
            }
            Self::StoreUnavailable(_) | Self::Serialization(_) | Self::Io(_) => {
                ErrorKind::StoreUnavailable
            }
            Self::DiscordApi(_) => ErrorKind::Platform,
            Self::Validation(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the target is already gone, meaning a delete/unban/edit has
    /// nothing left to do
    #[must_use]
    pub fn is_already_satisfied(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serenity::Error> for ModerationError {
    fn from(error: serenity::Error) -> Self {
        if let serenity::Error::Model(::serenity::model::ModelError::InvalidPermissions { .. }) = &error {
            return Self::PermissionDenied(error.to_string());
        }
        if let serenity::Error::Http(http_error) = &error {
            match http_error.status_code().map(|status| status.as_u16()) {
                Some(403) => return Self::PermissionDenied(error.to_string()),
                Some(404) => return Self::NotFound(error.to_string()),
                _ => {}
            }
        }
        Self::DiscordApi(Box::new(error))
    }
}

/// Result alias used across the crate
pub type ModerationResult<T> = Result<T, ModerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ModerationError::PermissionDenied("x".into()).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            ModerationError::AllocationExhausted {
                guild_id: 1,
                attempts: 5
            }
            .kind(),
            ErrorKind::AllocationConflict
        );
        assert_eq!(
            ModerationError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::StoreUnavailable
        );
    }

    #[test]
    fn test_not_found_is_already_satisfied() {
        assert!(ModerationError::NotFound("message".into()).is_already_satisfied());
        assert!(!ModerationError::PermissionDenied("ban".into()).is_already_satisfied());
    }

    #[test]
    fn test_error_messages() {
        let err = ModerationError::AllocationConflict {
            guild_id: 42,
            case_number: 7,
        };
        assert_eq!(err.to_string(), "Case #7 already exists in guild 42");
        assert_eq!(ErrorKind::StoreUnavailable.to_string(), "store unavailable");
    }
}

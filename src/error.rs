//! Crate-level error type shared by the AMS engine, config store and
//! Spoolman orchestration.
//!
//! `AppError` is serialized to `{ kind, message }` JSON payloads so the UI
//! layer can pattern-match on a stable `kind` string without knowing about
//! the module-level error types.

use crate::ams::BackendError;
use crate::spoolman::SpoolmanError;

/// Top-level error returned across module boundaries.
///
/// Serialized with serde's adjacently-tagged representation:
/// `{ "kind": "<variant>", "message": "<human-readable text>" }`
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum AppError {
    /// The config document could not be read or parsed.
    #[error("{0}")]
    ConfigLoad(String),

    /// The config document could not be written.
    #[error("{0}")]
    ConfigSave(String),

    /// A generic I/O error, stringified at the boundary so it stays
    /// serializable.
    #[error("{0}")]
    Io(String),

    /// A Spoolman request failed.
    #[error("{0}")]
    Spoolman(String),

    /// An AMS backend rejected or failed an operation.
    #[error("{0}")]
    Backend(String),

    /// The active backend does not implement the requested operation.
    #[error("{0}")]
    NotSupported(String),

    /// A gate index was outside the range the backend reports.
    #[error("invalid gate {0}")]
    InvalidGate(i32),

    /// A requested resource (spool, material, etc.) was not found.
    #[error("{0}")]
    NotFound(String),
}

impl From<std::io::Error> for AppError {
    /// Convert an [`std::io::Error`] into an [`AppError::Io`].
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<BackendError> for AppError {
    /// Backend errors keep their gate / support distinction; everything else
    /// collapses into [`AppError::Backend`].
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InvalidGate(gate) => Self::InvalidGate(gate),
            BackendError::NotSupported(op) => Self::NotSupported(op),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<SpoolmanError> for AppError {
    fn from(e: SpoolmanError) -> Self {
        match e {
            SpoolmanError::NotFound(id) => Self::NotFound(format!("spool {id} not found")),
            other => Self::Spoolman(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_serializes_to_kind_message() {
        let err = AppError::Io("disk full".to_string());
        let value = serde_json::to_value(&err).expect("serialize AppError::Io");
        assert_eq!(value["kind"], "Io");
        assert_eq!(value["message"], "disk full");
    }

    #[test]
    fn config_save_error_serializes_to_kind_message() {
        let err = AppError::ConfigSave("rename failed".to_string());
        let value = serde_json::to_value(&err).expect("serialize AppError::ConfigSave");
        assert_eq!(value["kind"], "ConfigSave");
        assert_eq!(value["message"], "rename failed");
    }

    #[test]
    fn invalid_gate_serializes_index_as_message() {
        let err = AppError::InvalidGate(7);
        let value = serde_json::to_value(&err).expect("serialize AppError::InvalidGate");
        assert_eq!(value["kind"], "InvalidGate");
        assert_eq!(value["message"], 7);
        assert_eq!(err.to_string(), "invalid gate 7");
    }

    #[test]
    fn from_backend_invalid_gate_keeps_index() {
        let app_err = AppError::from(BackendError::InvalidGate(3));
        assert_eq!(app_err, AppError::InvalidGate(3));
    }

    #[test]
    fn from_backend_not_supported_produces_not_supported_variant() {
        let app_err = AppError::from(BackendError::NotSupported("cancel".to_string()));
        assert!(matches!(app_err, AppError::NotSupported(_)));
    }

    #[test]
    fn from_backend_busy_produces_backend_variant() {
        let app_err = AppError::from(BackendError::Busy);
        assert!(matches!(app_err, AppError::Backend(_)));
    }

    #[test]
    fn from_spoolman_not_found_produces_not_found_variant() {
        let app_err = AppError::from(SpoolmanError::NotFound(12));
        assert_eq!(app_err, AppError::NotFound("spool 12 not found".to_string()));
    }

    #[test]
    fn from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let app_err = AppError::from(io_err);
        assert!(matches!(app_err, AppError::Io(_)));
    }
}

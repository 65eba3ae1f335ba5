use hangar_core::ErrorKind;
use hangar_core::types::UnknownTag;

/// All error types for the hangar-store crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Map onto the API error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::DataIntegrity(_) | StoreError::Sqlite(_) | StoreError::Migration(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        // Unique-constraint violations surface as a distinct kind; everything
        // else is internal.
        if let rusqlite::Error::SqliteFailure(failure, ref msg) = e {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return StoreError::Conflict(
                    msg.clone().unwrap_or_else(|| "constraint violation".to_string()),
                );
            }
        }
        StoreError::Sqlite(e)
    }
}

impl From<UnknownTag> for StoreError {
    fn from(e: UnknownTag) -> Self {
        StoreError::DataIntegrity(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(StoreError::not_found("session", "x").kind(), ErrorKind::NotFound);
        assert_eq!(
            StoreError::Conflict("dup".to_string()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            StoreError::DataIntegrity("bad tag".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_unknown_tag_is_data_integrity() {
        let err: StoreError = UnknownTag::new("worker_type", "lambda").into();
        assert!(matches!(err, StoreError::DataIntegrity(_)));
        assert!(err.to_string().contains("lambda"));
    }
}

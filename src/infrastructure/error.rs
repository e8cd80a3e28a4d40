use crate::domain::grid::GridError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Noko API error: http {status}; {message}")]
    Noko { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("An entry category named '{0}' already exists")]
    DuplicateCategory(String),
    #[error("A user with external id or email '{0}' already exists")]
    DuplicateUser(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Noko account setup required: {0}")]
    SetupRequired(String),
}

impl InfraError {
    /// Network failures and 5xx/429 responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            InfraError::Network(_) => true,
            InfraError::Noko { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::grid::InvalidWeekRange;

    #[test]
    fn transient_errors_are_classified() {
        assert!(InfraError::Network("reset".to_string()).is_transient());
        assert!(
            InfraError::Noko {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            InfraError::Noko {
                status: 429,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !InfraError::Noko {
                status: 401,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!InfraError::NotFound("x".to_string()).is_transient());
    }

    #[test]
    fn grid_errors_keep_their_detail() {
        let error = InfraError::from(GridError::from(InvalidWeekRange::WrongLength {
            expected: 7,
            actual: 3,
        }));
        assert!(error.to_string().contains("3 day(s)"));
    }
}

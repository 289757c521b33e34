use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing type map configuration: {0} --> {1}")]
    MappingNotFound(String, String),

    #[error("Could not retrieve equivalency expression for mapping {0} --> {1}")]
    EquivalencyNotConfigured(String, String),

    #[error("Entity type '{0}' not found in model")]
    EntityTypeNotFound(String),

    #[error("Identity member '{member}' of '{entity}' has no corresponding member on '{source_type}'")]
    IdentityNotMapped {
        entity: String,
        member: String,
        source_type: String,
    },

    #[error("Field '{0}' not found in record '{1}'")]
    FieldNotFound(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Entity is not tracked by this session: {0}")]
    NotTracked(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// Setup mistakes that no retry can fix.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MappingNotFound(..)
                | Self::EquivalencyNotConfigured(..)
                | Self::EntityTypeNotFound(_)
                | Self::IdentityNotMapped { .. }
                | Self::InvalidConfiguration(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

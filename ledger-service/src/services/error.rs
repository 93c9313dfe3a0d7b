use service_core::error::AppError;
use thiserror::Error;

/// Failures raised by a repository implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique index rejected the write, e.g. a reused `receiptNumber`.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for StoreError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment was written but the student balance was not.
    #[error("Payment {payment_id} ({receipt_number}) recorded but balance update failed: {source}")]
    Dependency {
        payment_id: String,
        receipt_number: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        LedgerError::InvalidState(msg.into())
    }

    /// Short label used for logs and the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InvalidState(_) => "invalid_state",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Dependency { .. } => "dependency",
            LedgerError::Store(_) => "store",
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        super::metrics::record_error(err.kind());
        match err {
            LedgerError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LedgerError::InvalidState(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LedgerError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            LedgerError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            e @ LedgerError::Dependency { .. } => AppError::PartialFailure(anyhow::anyhow!(e.to_string())),
            LedgerError::Store(StoreError::Database(e)) => AppError::DatabaseError(e.into()),
            LedgerError::Store(StoreError::Unavailable(_)) => AppError::ServiceUnavailable,
            LedgerError::Store(e) => AppError::InternalError(e.into()),
        }
    }
}

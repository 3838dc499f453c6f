/// Shared error types for repository operations across all domains.
/// These errors represent infrastructure concerns (database, connections,
/// optimistic-locking conflicts) rather than domain-specific business logic.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("'{0}' does not exist")]
    NotFound(String),
    #[error("Cannot add this resource as it already exists")]
    AlreadyExists,
    #[error("Concurrent update detected, the record changed since it was read")]
    ConcurrentUpdate,
    #[error("Data validation failed: {0}")]
    ValidationFailed(String),
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Database connection pool error: {0}")]
    PoolError(#[source] anyhow::Error),
    #[error("Database operation error: {0}")]
    DatabaseError(#[source] anyhow::Error),
    #[error("Data conversion error: {0}")]
    DataConversionError(#[source] anyhow::Error),
}

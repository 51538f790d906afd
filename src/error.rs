use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Event store unreachable or query rejected
    #[error("Store query error: {0}")]
    StoreQuery(String),

    /// Backing cache unreachable or returned garbage
    #[error("Cache error: {0}")]
    Cache(String),

    /// Failure raised inside a supervised loop body
    #[error("Task {task} failed: {message}")]
    TaskBody { task: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Service degraded: {0}")]
    ServiceDegraded(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures that mean the event store could not answer at all.
    pub fn is_store_outage(&self) -> bool {
        matches!(self, Error::StoreQuery(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bound a store or cache call by `limit`, mapping expiry to `Error::Timeout`.
pub async fn bounded<T, F>(limit: std::time::Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} exceeded {:?}", what, limit))),
    }
}

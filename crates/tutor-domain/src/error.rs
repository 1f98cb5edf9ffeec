/// Error taxonomy shared by every external-service adapter (HRR, STT, LLM, TTS).
///
/// Callers may retry only `Transient`/`RateLimited`; everything else is terminal
/// for the current call. A deadline elapsing is reported as `Transient`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AdapterError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} rate limited: {message}")]
    RateLimited { service: String, message: String },

    #[error("{service} bad request: {message}")]
    BadRequest { service: String, message: String },

    #[error("{service} transient failure: {message}")]
    Transient { service: String, message: String },

    #[error("{service} fatal: {message}")]
    Fatal { service: String, message: String },
}

impl AdapterError {
    pub fn service(&self) -> &str {
        match self {
            AdapterError::Unavailable { service, .. }
            | AdapterError::RateLimited { service, .. }
            | AdapterError::BadRequest { service, .. }
            | AdapterError::Transient { service, .. }
            | AdapterError::Fatal { service, .. } => service,
        }
    }

    /// Whether the caller is allowed to retry this failure on its own (as
    /// opposed to simply letting the next scheduled cycle try again).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::RateLimited { .. } | AdapterError::Transient { .. }
        )
    }

    pub fn timeout(service: impl Into<String>) -> Self {
        AdapterError::Transient {
            service: service.into(),
            message: "deadline elapsed".into(),
        }
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Shared error type for everything that is not an adapter call: configuration,
/// persistence, and routing.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

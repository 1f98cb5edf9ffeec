//! Shared utility functions for the external-service adapters.

use tutor_domain::error::AdapterError;

/// Convert a [`reqwest::Error`] into an [`AdapterError`], classifying
/// timeouts as `Transient` and everything else as `Unavailable`.
pub(crate) fn from_reqwest(service: &str, e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Transient {
            service: service.into(),
            message: e.to_string(),
        }
    } else {
        AdapterError::Unavailable {
            service: service.into(),
            message: e.to_string(),
        }
    }
}

/// Map an HTTP status code from an adapter's upstream service into the
/// shared taxonomy.
pub(crate) fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> AdapterError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AdapterError::RateLimited {
            service: service.into(),
            message: body.to_string(),
        }
    } else if status.is_client_error() {
        AdapterError::BadRequest {
            service: service.into(),
            message: format!("{status}: {body}"),
        }
    } else if status.is_server_error() {
        AdapterError::Transient {
            service: service.into(),
            message: format!("{status}: {body}"),
        }
    } else {
        AdapterError::Fatal {
            service: service.into(),
            message: format!("{status}: {body}"),
        }
    }
}

/// Resolve an API key from the named environment variable. Adapters treat
/// a missing credential as `Unavailable` rather than a hard startup error,
/// so the service can run in degraded mode against whichever adapters are
/// actually configured.
pub fn resolve_api_key(env_var: &str) -> Result<String, AdapterError> {
    std::env::var(env_var).map_err(|_| AdapterError::Unavailable {
        service: env_var.to_string(),
        message: format!("environment variable '{env_var}' not set"),
    })
}

// Backend selection and connection errors

use steprun_core::RuntimeError;
use thiserror::Error;

/// Failures while configuring or reaching the shared backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// A required setting is missing
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    /// A setting cannot be parsed or is zero where a positive value is needed
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    /// Shared mode was requested but the database did not answer
    #[error("Shared backend unavailable at {url}: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BackendError {
    pub fn invalid(name: &'static str, value: impl Into<String>) -> Self {
        BackendError::Invalid {
            name,
            value: value.into(),
        }
    }
}

impl From<BackendError> for RuntimeError {
    fn from(err: BackendError) -> Self {
        RuntimeError::config(err.to_string())
    }
}

/// Remove credentials from a connection URL before it is logged
pub(crate) fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

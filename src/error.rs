use thiserror::Error;

/// Failures at the HTTP collaborator boundary (search, pricing, variants).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse {endpoint} response: {reason}")]
    Parse {
        endpoint: &'static str,
        reason: String,
    },

    #[error("unexpected {what} shape: {reason}")]
    Schema { what: &'static str, reason: String },
}

impl FetchError {
    /// Client errors are not worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => status.is_server_error() || status.as_u16() == 429,
            Self::Parse { .. } | Self::Schema { .. } => false,
        }
    }
}

/// Configuration and credential errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("credential {name} not found in arguments, environment, or secrets file")]
    MissingCredential { name: &'static str },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Why a persisted state document could not be used.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("state is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("state must be a JSON object at top level, found {0}")]
    NotAnObject(&'static str),
}

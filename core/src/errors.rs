//! Harvester error types
//!
//! Three failure families drive the run-level policy:
//! - `ProtocolError`: the remote repository (identify / listing / fetch) failed
//! - `StoreError`: the document store failed; always aborts the run
//! - `HarvestError::Precondition`: an endpoint was harvested without a checkpoint
//!
//! Per-item protocol failures never surface as `Err` from the orchestrator;
//! they are persisted as error records instead.

use std::error::Error as StdError;

use thiserror::Error;

type BoxedSource = Box<dyn StdError + Send + Sync>;

/// Error category for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Remote identify/listing/fetch failure
    ProtocolError,
    /// Endpoint has no checkpoint yet
    PreconditionError,
    /// Persistence failure
    StoreError,
    /// `oxomo.toml` or env misconfigured
    ConfigError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::PreconditionError => "PRECONDITION_ERROR",
            Self::StoreError => "STORE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }
}

/// Failure reported by a `ProtocolAdapter`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Connection, DNS, TLS or body read failure.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        timed_out: bool,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// OAI-PMH `<error code="...">` element in an otherwise valid response.
    #[error("OAI-PMH error {code}: {message}")]
    Oai { code: String, message: String },

    /// Response could not be decoded.
    #[error("malformed response: {message}")]
    Malformed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl ProtocolError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
            source: None,
        }
    }

    pub fn transport_with_source(
        message: impl Into<String>,
        timed_out: bool,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out,
            source: Some(Box::new(source)),
        }
    }

    pub fn oai(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Oai {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }

    pub fn malformed_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Malformed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Short class label persisted in error records (`transport`, `timeout`,
    /// `http_503`, `oai:idDoesNotExist`, `malformed`).
    pub fn class(&self) -> String {
        match self {
            Self::Transport {
                timed_out: true, ..
            } => "timeout".to_string(),
            Self::Transport { .. } => "transport".to_string(),
            Self::Http { status, .. } => format!("http_{status}"),
            Self::Oai { code, .. } => format!("oai:{code}"),
            Self::Malformed { .. } => "malformed".to_string(),
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Transport failures, rate limiting and server-side errors are transient;
    /// protocol-level errors and undecodable bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Oai { .. } | Self::Malformed { .. } => false,
        }
    }

    /// OAI-PMH error code, if this is a protocol-level error.
    pub fn oai_code(&self) -> Option<&str> {
        match self {
            Self::Oai { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Failure of the persistent document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("duplicate document {id} in {collection}")]
    Duplicate { collection: String, id: String },

    #[error("invalid document in {collection}: {message}")]
    InvalidDocument { collection: String, message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Run-level error.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no checkpoint found for {namespace}; create it first")]
    Precondition { namespace: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl HarvestError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Protocol(_) => ErrorCategory::ProtocolError,
            Self::Precondition { .. } => ErrorCategory::PreconditionError,
            Self::Store(_) => ErrorCategory::StoreError,
            Self::Config { .. } => ErrorCategory::ConfigError,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

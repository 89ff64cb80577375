use std::fmt;
use thiserror::Error;

/// The error type for artvault operations
#[derive(Error, Debug)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<anyhow::Error>,
}

/// The kind of error that occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key material is missing or malformed. Fatal for the calling
    /// operation; a retry with the same key cannot succeed.
    CredentialInvalid,

    /// Configuration error (missing fields, invalid values)
    ConfigInvalid,

    /// The backend rejected or failed the container create request
    ProvisioningFailed,

    /// Blob enumeration failed or the container is absent
    ListingFailed,

    /// Unexpected errors (network, I/O, service errors, etc.)
    Unexpected,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Create a credential invalid error
    pub fn credential_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CredentialInvalid, message)
    }

    /// Create a config invalid error
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    /// Create a provisioning error
    pub fn provisioning_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProvisioningFailed, message)
    }

    /// Create a listing error
    pub fn listing_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ListingFailed, message)
    }

    /// Create an unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::CredentialInvalid => write!(f, "invalid credentials"),
            ErrorKind::ConfigInvalid => write!(f, "invalid configuration"),
            ErrorKind::ProvisioningFailed => write!(f, "container provisioning failed"),
            ErrorKind::ListingFailed => write!(f, "blob listing failed"),
            ErrorKind::Unexpected => write!(f, "unexpected error"),
        }
    }
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(err)
    }
}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

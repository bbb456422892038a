use thiserror::Error;

/// A failure delivering a request to a source schema.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Source schema '{0}' is not defined in the routing table.")]
    UnknownSchema(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Request cancelled.")]
    Cancelled,

    #[error("Request timed out.")]
    Timeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error, Eq, PartialEq)]
#[error("Unknown error mode '{0}', expected one of 'propagate', 'null' or 'halt'.")]
pub struct InvalidErrorMode(pub String);

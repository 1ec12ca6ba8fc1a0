//! Error types for the SDK side of the workspace.

use crate::store::StoreError;

/// Failures while mapping between wire JSON and typed values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A reserved metadata field (`objectId`, `sessionToken`, `createdAt`,
    /// `updatedAt`) is present but has the wrong shape.
    #[error("unable to parse {field} from response")]
    InvalidField { field: String },
    /// A `__type` envelope is missing a member or carries a bad value.
    #[error("invalid {kind} value: {reason}")]
    InvalidEnvelope { kind: &'static str, reason: String },
    /// A regular field failed to decode.
    #[error("unable to decode field {field}: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<CodecError>,
    },
    #[error("expected a JSON object but found {found}")]
    NotAnObject { found: &'static str },
}

/// Errors surfaced by the data-access SDK.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The reference has no object id yet.
    #[error("no reference to object")]
    NoReference,
    /// A single-result query matched nothing.
    #[error("no matching object found")]
    NotFound,
    /// The store answered with a document of an unexpected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Unified error type and the domain errors handlers raise.

use serde_json::{Map, Value};

use crate::reply::Reply;

/// Boxed error used for body and storage failures coming from outside the crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by plinth's fallible operations.
///
/// Handlers return `Result<_, Error>`. [`Error::Api`] is the only variant that
/// is turned back into a regular reply (a JSON error object); everything else
/// aborts the middleware chain and becomes a `500 Internal Server Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("reading request body: {0}")]
    Body(#[source] BoxError),

    /// The request body went over the configured size limit.
    #[error("request body too large")]
    PayloadTooLarge,

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Registration-time failure: bad handler parameter layout or path pattern.
    #[error("route `{path}`: {reason}")]
    Route { path: String, reason: String },

    /// A handler asked for an argument the binder did not supply.
    #[error("missing argument `{0}`")]
    MissingArgument(String),

    #[error("argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("template `{name}`: {reason}")]
    Template { name: String, reason: String },

    #[error("storage: {0}")]
    Storage(#[source] BoxError),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl Error {
    pub(crate) fn route(path: &str, reason: impl Into<String>) -> Self {
        Self::Route { path: path.to_owned(), reason: reason.into() }
    }
}

/// Domain errors raised by handler logic.
///
/// Caught at the binder's invocation boundary and rendered as
/// `{"error": code, "data": field, "message": message}`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// A single request field failed a structural or semantic check.
    #[error("invalid value for `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("{resource} not found")]
    ResourceNotFound { resource: String },

    #[error("permission denied")]
    Permission,

    #[error("{code}: {message}")]
    Generic { code: String, field: String, message: String },
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::ResourceNotFound { resource: resource.into() }
    }

    pub fn generic(
        code: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Generic { code: code.into(), field: field.into(), message: message.into() }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            Self::Validation { .. }       => "value:invalid",
            Self::ResourceNotFound { .. } => "value:notfound",
            Self::Permission              => "permission:forbidden",
            Self::Generic { code, .. }    => code,
        }
    }

    /// The field or resource the error is about.
    pub fn data(&self) -> &str {
        match self {
            Self::Validation { field, .. }          => field,
            Self::ResourceNotFound { resource }     => resource,
            Self::Permission                        => "permission",
            Self::Generic { field, .. }             => field,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message, .. } | Self::Generic { message, .. } => message,
            Self::ResourceNotFound { .. } | Self::Permission => "",
        }
    }

    /// The structured result the binder hands to the normalizer.
    pub fn to_reply(&self) -> Reply {
        let mut body = Map::new();
        body.insert("error".to_owned(), Value::from(self.code()));
        body.insert("data".to_owned(), Value::from(self.data()));
        body.insert("message".to_owned(), Value::from(self.message()));
        Reply::Map(body)
    }
}

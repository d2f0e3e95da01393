use std::fmt;

use serde_json::Value;

/// Execution mode a [`Session`](crate::Session) is locked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Blocking I/O; every network call completes before returning.
    Sync,
    /// Cooperative I/O; network calls suspend and must be awaited.
    Async,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sync => f.write_str("synchronous"),
            Mode::Async => f.write_str("asynchronous"),
        }
    }
}

/// Errors that may occur while working with JSON:API documents and resources.
#[derive(Debug)]
pub enum Error {
    /// A mutation or construction violated the active schema, or a document
    /// payload was malformed.
    Validation(String),
    /// The server answered a read or write with a non-success status.
    Document {
        /// HTTP status code of the response.
        status: u16,
        /// Human-readable message, extracted from `errors[0].title` when the
        /// server supplied an error document (`"?"` otherwise).
        title: String,
        /// The request payload that was attempted, for write failures.
        payload: Option<Value>,
    },
    /// The underlying transport failed before a response was produced.
    Transport(Box<dyn std::error::Error + Send + Sync>),
    /// Access to a resource or document after it has been invalidated.
    InvalidState,
    /// A blocking API was called on an async session, or vice versa.
    ModeMismatch {
        /// The mode the called API requires.
        expected: Mode,
    },
    /// A field name resolved to neither a known attribute nor a relationship.
    UnknownField {
        /// Resource type on which the lookup was attempted.
        resource_type: String,
        /// The (wire-form) field name that was not found.
        field: String,
    },
    /// A server or configuration URL could not be parsed.
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser diagnostics.
        error: url::ParseError,
    },
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Error {
        Error::Validation(message.into())
    }

    pub(crate) fn document(status: u16, title: String, payload: Option<Value>) -> Error {
        Error::Document {
            status,
            title,
            payload,
        }
    }

    /// HTTP status code for document errors, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Document { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(message) => write!(f, "validation error: {message}"),
            Error::Document { status, title, .. } => {
                write!(f, "document error {status}: {title}")
            }
            Error::Transport(error) => write!(f, "transport error: {error}"),
            Error::InvalidState => f.write_str("resource has been invalidated"),
            Error::ModeMismatch { expected } => {
                write!(f, "this API requires a {expected} session")
            }
            Error::UnknownField {
                resource_type,
                field,
            } => write!(f, "no field `{field}` on resource type `{resource_type}`"),
            Error::InvalidUrl { url, error } => write!(f, "invalid URL `{url}`: {error}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(error) => Some(error.as_ref()),
            Error::InvalidUrl { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Mode};

    #[test]
    fn display() {
        assert_eq!(
            Error::document(404, "Not found".into(), None).to_string(),
            "document error 404: Not found"
        );
        assert_eq!(
            Error::ModeMismatch {
                expected: Mode::Sync
            }
            .to_string(),
            "this API requires a synchronous session"
        );
        assert_eq!(
            Error::UnknownField {
                resource_type: "articles".into(),
                field: "missing".into(),
            }
            .to_string(),
            "no field `missing` on resource type `articles`"
        );
    }

    #[test]
    fn status_extraction() {
        assert_eq!(Error::document(409, "Conflict".into(), None).status(), Some(409));
        assert_eq!(Error::InvalidState.status(), None);
    }
}

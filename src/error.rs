use std::time::Duration;

use thiserror::Error;

/// Convenience result type for connector, converter and pipeline operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error type returned by connectors, converters and the ingestion pipeline.
///
/// This is a single error enum shared across every transport and format. Use
/// [`IngestionError::kind`] when only the category matters (e.g. to decide retry policy).
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The referenced file, message or endpoint does not exist.
    #[error("not found: {reference}")]
    NotFound { reference: String },

    /// The transport could not be reached or authentication failed.
    #[error("connection error ({target}): {message}")]
    Connection { target: String, message: String },

    /// The bytes do not parse under the declared or sniffed format.
    #[error("format error ({format}): {message}")]
    Format { format: String, message: String },

    /// A malformed argument, e.g. a bad Kafka `topic:partition:offset` reference or a
    /// mistyped descriptor option.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// No connector is registered (or compiled in) for this source type.
    #[error("unsupported source type '{0}'")]
    UnsupportedSourceType(String),

    /// No converter is registered (or compiled in) for this format, or sniffing found none.
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),

    /// The operation exceeded its configured time budget.
    #[error("timed out after {elapsed:?}: {operation}")]
    Timeout { operation: String, elapsed: Duration },

    /// The caller cancelled the operation.
    #[error("cancelled: {operation}")]
    Cancelled { operation: String },

    /// Underlying local I/O error (e.g. permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fieldless error category, one per entry of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Connection,
    Format,
    InvalidArgument,
    UnsupportedSourceType,
    UnsupportedFormat,
    Timeout,
    Cancelled,
}

impl IngestionError {
    /// Category of this error.
    ///
    /// Local I/O errors are folded into the taxonomy: a missing file is [`ErrorKind::NotFound`],
    /// a timed-out read is [`ErrorKind::Timeout`], everything else is [`ErrorKind::Connection`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Format { .. } => ErrorKind::Format,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::UnsupportedSourceType(_) => ErrorKind::UnsupportedSourceType,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                _ => ErrorKind::Connection,
            },
        }
    }

    pub(crate) fn not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
        }
    }

    pub(crate) fn connection(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn format(format: impl Into<String>, message: impl ToString) -> Self {
        Self::Format {
            format: format.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }
}

//! Error types for the ovaedit core library.

use std::path::PathBuf;

/// The main error type for ovaedit operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Malformed XML or an XML write failure.
    #[error("XML error: {message}")]
    Xml { message: String },

    /// Structurally invalid OVF descriptor.
    #[error("OVF error: {message}")]
    Ovf { message: String },

    /// Malformed or unsafe OVA archive.
    #[error("OVA error: {message}")]
    Ova { message: String },

    /// An edit or parse would silently replace data that differs.
    #[error("data conflict: {message}")]
    DataConflict { message: String },

    /// A lookup or inheritance request has more than one candidate answer.
    #[error("ambiguous result: {message}")]
    Ambiguous { message: String },

    /// A known limitation: the operation is deliberately not implemented.
    #[error("unsupported operation: {message}")]
    Unsupported { message: String },

    /// A value rejected by platform validation.
    #[error("invalid value for {what}: {message}")]
    InvalidValue { what: String, message: String },

    /// A referenced entity does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Unparseable manifest, or a manifest mismatch in strict mode.
    #[error("manifest error: {message}")]
    Manifest { message: String },

    /// Error inspecting a VMDK image.
    #[error("VMDK error: {message}")]
    Vmdk { message: String },

    /// Disk image conversion failed or is unavailable.
    #[error("conversion error: {message}")]
    Conversion { message: String },
}

/// A specialized Result type for ovaedit operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an XML error.
    pub fn xml(message: impl Into<String>) -> Self {
        Self::Xml {
            message: message.into(),
        }
    }

    /// Create an OVF error.
    pub fn ovf(message: impl Into<String>) -> Self {
        Self::Ovf {
            message: message.into(),
        }
    }

    /// Create an OVA error.
    pub fn ova(message: impl Into<String>) -> Self {
        Self::Ova {
            message: message.into(),
        }
    }

    /// Create a data conflict error.
    pub fn data_conflict(message: impl Into<String>) -> Self {
        Self::DataConflict {
            message: message.into(),
        }
    }

    /// Create an ambiguous result error.
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::Ambiguous {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    /// Create a VMDK error.
    pub fn vmdk(message: impl Into<String>) -> Self {
        Self::Vmdk {
            message: message.into(),
        }
    }

    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/package.ova");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/package.ova"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_data_conflict_error() {
        let err = Error::data_conflict("profile A already has value 2");
        assert!(err.to_string().contains("data conflict"));
        assert!(err.to_string().contains("profile A"));
    }

    #[test]
    fn test_ambiguous_error() {
        let err = Error::ambiguous("found 2 items");
        assert!(err.to_string().contains("ambiguous result"));
    }

    #[test]
    fn test_unsupported_error() {
        let err = Error::unsupported("non-integer AddressOnParent");
        assert!(err.to_string().contains("unsupported operation"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = Error::invalid_value("CPU count", "must be at least 1");
        let msg = err.to_string();
        assert!(msg.contains("CPU count"));
        assert!(msg.contains("at least 1"));
    }

    #[test]
    fn test_ova_error() {
        let err = Error::ova("unsafe member path");
        assert!(err.to_string().contains("OVA error"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}

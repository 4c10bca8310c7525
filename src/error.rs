use thiserror::Error;

/// Classifies import failures for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportErrorKind {
    /// File extension is not one of the supported list formats
    UnknownFormat,
    /// Archive could not be opened or an entry could not be read
    BadArchive,
    /// List payload is not valid UTF-8 text
    InvalidText,
}

/// Classifies storage failures for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Reading a key failed
    Read,
    /// Writing a key failed
    Write,
    /// Removing a key failed
    Remove,
}

/// Exclusions engine error types
#[derive(Error, Debug)]
pub enum ExclusionsError {
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("Import error: {message}")]
    ImportError {
        kind: ImportErrorKind,
        message: String,
    },

    #[error("Catalog fetch failed: {0}")]
    CatalogFetch(String),

    #[error("Storage error: {message}")]
    StorageError {
        kind: StorageErrorKind,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown id: {0}")]
    UnknownId(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExclusionsError {
    /// Shorthand for an import error with a kind.
    pub fn import(kind: ImportErrorKind, message: impl Into<String>) -> Self {
        Self::ImportError {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a storage error with a kind.
    pub fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self::StorageError {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExclusionsError>;

//! Error types for per-file processing.
//!
//! [`UploadError`] is the taxonomy the batch orchestrator converts into
//! file outcomes. [`TransportError`] covers everything that can go wrong
//! talking to the catalog or the object store.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while moving bytes or metadata over the network.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request never produced a response (DNS, TLS, connection reset, ...).
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with an unexpected status code.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// An object already lives at the path with different content and
    /// versioning is disabled.
    #[error("object {path} already exists with different content and versioning is disabled")]
    ObjectExists { path: String },

    /// The parent namespace is missing and `create_parents` was not requested.
    #[error("namespace {namespace} does not exist and create_parents is off")]
    MissingParent { namespace: String },

    /// The server answered successfully but the payload was not understood.
    #[error("unexpected response from {url}: {detail}")]
    Protocol { url: String, detail: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub(crate) fn request(url: &str, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn protocol(url: &str, detail: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.to_string(),
            detail: detail.into(),
        }
    }
}

/// Why a single candidate file could not be uploaded and reconciled.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The file name does not fit the rule. Drives rule iteration.
    #[error("File \"{file_name}\" does not look like a {file_type} file name.")]
    NameMismatch { file_name: String, file_type: String },

    #[error("File \"{file_name}\" does not match an existing {file_type} record in the catalog.")]
    AccessionNotFound { file_name: String, file_type: String },

    /// The accession is already bound to a different URL, or the record
    /// changed between read and write.
    #[error("A different file already exists for accession ID {id} ({column}: {existing}, new: {new_url}).")]
    AccessionConflict {
        id: String,
        column: String,
        existing: String,
        new_url: String,
    },

    /// The catalog row lacks a field the pipeline depends on.
    #[error("catalog record for \"{file_name}\" is malformed: {detail}")]
    MalformedRecord { file_name: String, detail: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UploadError {
    /// Short machine-friendly label used in reports and JSON progress.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::NameMismatch { .. } => "name_mismatch",
            UploadError::AccessionNotFound { .. } => "accession_not_found",
            UploadError::AccessionConflict { .. } => "accession_conflict",
            UploadError::MalformedRecord { .. } => "malformed_record",
            UploadError::Transport(_) => "transport",
            UploadError::Io { .. } => "io",
        }
    }
}

use std::{path::PathBuf, sync::Arc};
use thiserror::Error as ThisError;

#[non_exhaustive]
#[derive(Clone, Debug, ThisError)]
pub enum SlateDBError {
    #[error("io error")]
    IoError(#[from] Arc<std::io::Error>),

    #[error("object store error")]
    ObjectStoreError(#[from] Arc<object_store::Error>),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("empty SSTable")]
    EmptySSTable,

    #[error("empty block metadata")]
    EmptyBlockMeta,

    #[error("empty block")]
    EmptyBlock,

    #[error(
        "byte format version mismatch. expected_version=`{expected_version}`, actual_version=`{actual_version}`"
    )]
    InvalidVersion {
        expected_version: u16,
        actual_version: u16,
    },

    #[error("invalid row flags. encoded_bits=`{encoded_bits:#b}`, known_bits=`{known_bits:#b}`")]
    InvalidRowFlags { encoded_bits: u8, known_bits: u8 },

    #[error("key too large. key_size=`{key_size}`, max_key_size=`{max_key_size}`")]
    KeyTooLarge {
        key_size: usize,
        max_key_size: usize,
    },

    #[error("invalid compaction")]
    InvalidCompaction,

    #[error("invalid DB state error")]
    InvalidDBState,

    #[error("found WAL SST in l0. wal_id=`{0}`")]
    UnexpectedWalSstInL0(u64),

    #[error("compacted sorted runs not in decreasing id order. previous=`{previous}`, next=`{next}`")]
    CompactedRunsOutOfOrder { previous: u32, next: u32 },

    #[error("block fetch task failed. reason=`{0}`")]
    FetchTaskFailed(String),

    #[error("invalid sst iterator options. max_fetch_tasks=`{max_fetch_tasks}`, blocks_to_fetch=`{blocks_to_fetch}`")]
    InvalidIteratorOptions {
        max_fetch_tasks: usize,
        blocks_to_fetch: usize,
    },

    #[error("unknown configuration file format. path=`{0}`")]
    UnknownConfigurationFormat(PathBuf),

    #[error("invalid configuration format")]
    InvalidConfigurationFormat(#[from] Box<figment::Error>),
}

impl From<std::io::Error> for SlateDBError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}

impl From<object_store::Error> for SlateDBError {
    fn from(value: object_store::Error) -> Self {
        Self::ObjectStoreError(Arc::new(value))
    }
}

impl From<tokio::task::JoinError> for SlateDBError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::FetchTaskFailed(value.to_string())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Represents the kind of public errors that can be returned to the user.
///
/// These are less specific and more prescriptive. Callers decide how to proceed
/// based on the kind rather than on the internal cause.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A storage or network service is unavailable. The user must retry or drop the
    /// operation.
    Unavailable,

    /// User attempted an invalid request. This might be:
    ///
    /// - An invalid configuration on initialization
    /// - An invalid argument to a method, such as a compaction that would
    ///   overwrite a live sorted run
    ///
    /// The user must correct the request and retry.
    Invalid,

    /// Persisted data is in an unexpected state, such as a checksum mismatch or an
    /// unsupported file format version.
    Data,

    /// An internal invariant was violated. The in-memory state was left untouched,
    /// but the caller should stop using the instance that produced the error.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} error", self)
    }
}

/// The error returned from configuration loading, and the form a
/// [`SlateDBError`] takes once it leaves the crate through `?` or `into()`.
#[non_exhaustive]
#[derive(Debug)]
pub struct Error {
    msg: String,
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {} ({})", self.kind, self.msg, source),
            None => write!(f, "{}: {}", self.kind, self.msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

impl Error {
    fn new(kind: ErrorKind, msg: String, source: Option<BoxError>) -> Self {
        Self { msg, kind, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<SlateDBError> for Error {
    fn from(err: SlateDBError) -> Self {
        let msg = err.to_string();
        let (kind, source): (ErrorKind, Option<BoxError>) = match err {
            SlateDBError::IoError(err) => (ErrorKind::Unavailable, Some(Box::new(err))),
            SlateDBError::ObjectStoreError(err) => (ErrorKind::Unavailable, Some(Box::new(err))),

            SlateDBError::InvalidConfigurationFormat(err) => (ErrorKind::Invalid, Some(err)),
            SlateDBError::InvalidCompaction
            | SlateDBError::KeyTooLarge { .. }
            | SlateDBError::InvalidIteratorOptions { .. }
            | SlateDBError::UnknownConfigurationFormat(_) => (ErrorKind::Invalid, None),

            SlateDBError::ChecksumMismatch
            | SlateDBError::EmptySSTable
            | SlateDBError::EmptyBlockMeta
            | SlateDBError::EmptyBlock
            | SlateDBError::InvalidVersion { .. }
            | SlateDBError::InvalidRowFlags { .. }
            | SlateDBError::InvalidDBState => (ErrorKind::Data, None),

            SlateDBError::UnexpectedWalSstInL0(_)
            | SlateDBError::CompactedRunsOutOfOrder { .. }
            | SlateDBError::FetchTaskFailed(_) => (ErrorKind::Internal, None),
        };
        Error::new(kind, msg, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_classify_invalid_compaction_as_invalid() {
        let err = Error::from(SlateDBError::InvalidCompaction);
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.to_string(), "Invalid error: invalid compaction");
    }

    #[test]
    fn should_classify_key_too_large_as_invalid() {
        let err = Error::from(SlateDBError::KeyTooLarge {
            key_size: 70_000,
            max_key_size: 65_535,
        });
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(
            err.to_string(),
            "Invalid error: key too large. key_size=`70000`, max_key_size=`65535`"
        );
    }

    #[test]
    fn should_classify_invariant_breaches_as_internal() {
        let err = Error::from(SlateDBError::CompactedRunsOutOfOrder {
            previous: 3,
            next: 5,
        });
        assert_eq!(err.kind(), ErrorKind::Internal);
        let err = Error::from(SlateDBError::UnexpectedWalSstInL0(7));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn should_keep_object_store_error_as_source() {
        let err = Error::from(SlateDBError::from(object_store::Error::NotImplemented));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(std::error::Error::source(&err).is_some());
    }
}

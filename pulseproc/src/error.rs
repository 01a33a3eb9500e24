use std::path::PathBuf;

use bincode::error::{DecodeError, EncodeError};
use pulsecore::PulseError;
use rayon::ThreadPoolBuildError;
use thiserror::Error;

/// Fatal errors of a processing run. Any of these aborts the run and no
/// aggregate result is published.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error(transparent)]
    Pulse(#[from] PulseError),

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode partial result: {0}")]
    Encode(#[from] EncodeError),

    #[error("failed to decode partial result: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),

    #[error("expected one partial result per rank 0..{expected}, got ranks {found:?}")]
    RankMismatch { expected: usize, found: Vec<usize> },

    #[error("partial result file {path:?} holds rank {found}, expected {expected}")]
    SpilledRank {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("reduced {reduced} events but {expected} were partitioned")]
    ReductionCountMismatch { expected: u64, reduced: u64 },

    #[error("event {event} channel {channel}: record length {found}, expected {expected}")]
    RecordLength {
        event: usize,
        channel: usize,
        expected: usize,
        found: usize,
    },

    #[error("event {event} out of range, source holds {events} events")]
    EventOutOfRange { event: usize, events: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ProcessingError>;

impl ProcessingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessingError::Io {
            path: path.into(),
            source,
        }
    }
}

use std::{io, path::PathBuf};

use thiserror::Error;

/// Why the scalar parser rejected a single record
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum RecordError {
    #[error("no `;` before the end of the line")]
    MissingDelimiter,
    #[error("measurement does not match `-?d{{1,2}}.d`")]
    InvalidMeasurement,
}

/// Every way a run can fail. All of them are fatal: no partial output is produced.
#[derive(Debug, Error)]
pub enum Error {
    /// `offset` is absolute in the input. When several records are malformed,
    /// which one is reported depends on how the workers were scheduled.
    #[error("malformed record at byte {offset}: {source}")]
    MalformedRecord {
        offset: usize,
        #[source]
        source: RecordError,
    },

    #[error("key of {len} bytes at byte {offset} exceeds the {} byte lane width", crate::key::LANES)]
    OversizedKey { offset: usize, len: usize },

    #[error("could not map `{}`", path.display())]
    Mapping {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker for partition {partition} failed: {reason}")]
    WorkerFailure { partition: usize, reason: String },

    #[error("worker for partition {partition} ran past its deadline")]
    DeadlineExceeded { partition: usize },

    /// Raised by a worker that stopped because another partition already failed.
    #[error("worker for partition {partition} was aborted")]
    Aborted { partition: usize },

    #[error("key {key:?} is not valid UTF-8")]
    InvalidKeyEncoding { key: Vec<u8> },

    #[error("table of {requested} slots exceeds the limit of {} slots", crate::table::MAX_TABLE_SLOTS)]
    TableSlots { requested: usize },

    #[error("could not build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("could not write results")]
    Output(#[source] io::Error),
}

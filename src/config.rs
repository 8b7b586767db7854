use std::{thread, time::Duration};

use clap::ValueEnum;
use tracing::warn;

use crate::{
    error::Error,
    table::{MAX_TABLE_SLOTS, TABLE_SIZE},
};

/// What to do with a key wider than one SIMD lane.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OversizedKeys {
    /// Fail the run with `OversizedKey`
    #[default]
    Reject,
    /// Aggregate the record through the scalar parser
    Fallback,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// `{a=min/mean/max, b=min/mean/max}`
    #[default]
    Braces,
    /// one `key=min/mean/max` per line
    Lines,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Worker pool size
    pub threads: usize,
    /// Number of slices, one worker task each
    pub partitions: usize,
    /// Slots per worker hash table, rounded up to a power of two
    pub table_slots: usize,
    pub oversized_keys: OversizedKeys,
    /// Wall-clock budget for each worker, measured from the start of the run
    pub deadline: Option<Duration>,
}

impl Config {
    pub fn with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            threads,
            partitions: threads,
            table_slots: TABLE_SIZE,
            oversized_keys: OversizedKeys::default(),
            deadline: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.table_slots > MAX_TABLE_SLOTS {
            return Err(Error::TableSlots {
                requested: self.table_slots,
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let threads = match thread::available_parallelism() {
            Ok(n) => n.get(),
            Err(e) => {
                warn!(error = %e, "couldn't query the available parallelism, going single-threaded");
                1
            }
        };
        Self::with_threads(threads)
    }
}

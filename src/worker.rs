use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    config::{Config, OversizedKeys},
    decode::{decode_measurement, DECODE_LANES},
    error::Error,
    key::{encode_key, EncodedKey, LANES},
    partition::{find_past_newline, Slice},
    scalar::parse_record,
    stats::Stats,
    table::{Aggregate, AggregateTable},
};

/// Bytes that must remain before a cursor for the vector path to read both
/// of its windows: the key window, the byte after it, and the numeric window.
const VECTOR_MARGIN: usize = 2 * LANES;
const _: () = assert!(LANES + 1 + DECODE_LANES <= VECTOR_MARGIN);

/// Records processed between deadline and abort checks
const CHECK_INTERVAL: u32 = 1 << 14;

/// Shared stop conditions, polled by every worker.
pub struct Guard<'a> {
    deadline: Option<Instant>,
    abort: &'a AtomicBool,
}

impl<'a> Guard<'a> {
    pub fn new(deadline: Option<Instant>, abort: &'a AtomicBool) -> Self {
        Self { deadline, abort }
    }

    pub fn check(&self, partition: usize) -> Result<(), Error> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(Error::Aborted { partition });
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::DeadlineExceeded { partition })
            }
            _ => Ok(()),
        }
    }
}

/// Everything one worker aggregated from its slice.
pub struct PartitionResult<'a> {
    pub table: Vec<Aggregate>,
    /// keys seen by the scalar parser, borrowed from the input
    pub tail: FxHashMap<&'a [u8], Stats>,
}

impl<'a> PartitionResult<'a> {
    pub fn entries<'s>(&'s self) -> impl Iterator<Item = (&'s [u8], &'s Stats)> {
        let tail: &'s FxHashMap<&'s [u8], Stats> = &self.tail;
        self.table
            .iter()
            .map(|aggregate| (aggregate.key(), aggregate.stats()))
            .chain(tail.iter().map(|(key, stats)| (*key, stats)))
    }
}

/// A key and measurement decoded by the vector path
struct Probe {
    key: EncodedKey,
    value: i32,
    consumed: usize,
}

/// Vector read of the record at the start of `bytes`, which must hold at
/// least [VECTOR_MARGIN] bytes. `None` hands the record to the scalar parser.
#[inline(always)]
fn probe(bytes: &[u8]) -> Option<Probe> {
    let key = encode_key(bytes)?;
    let measurement = decode_measurement(&bytes[key.len + 1..])?;
    Some(Probe {
        consumed: key.len + 1 + measurement.len,
        value: measurement.value,
        key,
    })
}

/// Scans one slice: the slice is halved at a newline and both halves are
/// walked double-pumped while both have room for vector reads, then each
/// single-pumped, then each finished by the scalar parser.
pub struct PartitionWorker<'a, 'g> {
    input: &'a [u8],
    slice: Slice,
    partition: usize,
    oversized_keys: OversizedKeys,
    guard: &'g Guard<'g>,
    table: AggregateTable,
    tail: FxHashMap<&'a [u8], Stats>,
    vectorized: u64,
    scalar: u64,
    budget: u32,
}

impl<'a, 'g> PartitionWorker<'a, 'g> {
    /// `whole_input` is the full buffer; offsets in errors are relative to it.
    pub fn new(
        whole_input: &'a [u8],
        slice: Slice,
        partition: usize,
        config: &Config,
        guard: &'g Guard<'g>,
    ) -> Self {
        Self {
            input: slice.bytes(whole_input),
            slice,
            partition,
            oversized_keys: config.oversized_keys,
            guard,
            table: AggregateTable::with_slots(config.table_slots),
            tail: FxHashMap::default(),
            vectorized: 0,
            scalar: 0,
            budget: CHECK_INTERVAL,
        }
    }

    pub fn run(mut self) -> Result<PartitionResult<'a>, Error> {
        let started = Instant::now();
        self.guard.check(self.partition)?;

        let len = self.input.len();
        let split = find_past_newline(self.input, len / 2);

        let (first, second) = self.double_pumped(0, split, split, len)?;
        let first = self.single_pumped(first, split)?;
        let second = self.single_pumped(second, len)?;
        self.scalar_tail(first, split)?;
        self.scalar_tail(second, len)?;

        debug!(
            partition = self.partition,
            bytes = len,
            vectorized = self.vectorized,
            scalar = self.scalar,
            keys = self.table.len(),
            chained = self.table.chained(),
            tail_keys = self.tail.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "partition scanned"
        );

        Ok(PartitionResult {
            table: self.table.into_entries(),
            tail: self.tail,
        })
    }

    /// Advances two cursors in lock-step; both probes are issued before
    /// either result is committed to the table. The second half can fail
    /// before an earlier malformed record in the first half is reached.
    fn double_pumped(
        &mut self,
        mut first: usize,
        first_end: usize,
        mut second: usize,
        second_end: usize,
    ) -> Result<(usize, usize), Error> {
        let input = self.input;
        while first + VECTOR_MARGIN <= first_end && second + VECTOR_MARGIN <= second_end {
            let first_probe = probe(&input[first..]);
            let second_probe = probe(&input[second..]);
            first = self.commit(first, first_end, first_probe)?;
            second = self.commit(second, second_end, second_probe)?;
            self.tick()?;
        }
        Ok((first, second))
    }

    fn single_pumped(&mut self, mut cursor: usize, end: usize) -> Result<usize, Error> {
        let input = self.input;
        while cursor + VECTOR_MARGIN <= end {
            let probe = probe(&input[cursor..]);
            cursor = self.commit(cursor, end, probe)?;
            self.tick()?;
        }
        Ok(cursor)
    }

    fn scalar_tail(&mut self, mut cursor: usize, end: usize) -> Result<(), Error> {
        while cursor < end {
            cursor = self.scalar_record(cursor, end)?;
        }
        Ok(())
    }

    #[inline(always)]
    fn commit(&mut self, cursor: usize, end: usize, probe: Option<Probe>) -> Result<usize, Error> {
        match probe {
            Some(Probe {
                key,
                value,
                consumed,
            }) => {
                self.table.get_or_create(&key).accept(value);
                self.vectorized += 1;
                Ok(cursor + consumed)
            }
            None => self.scalar_record(cursor, end),
        }
    }

    /// Parses one record byte-wise into the tail map. Returns the cursor
    /// past the record.
    #[cold]
    fn scalar_record(&mut self, cursor: usize, end: usize) -> Result<usize, Error> {
        let input = self.input;
        let offset = self.slice.start + cursor;
        let row = parse_record(&input[cursor..end])
            .map_err(|source| Error::MalformedRecord { offset, source })?;
        if row.key.len() > LANES && self.oversized_keys == OversizedKeys::Reject {
            return Err(Error::OversizedKey {
                offset,
                len: row.key.len(),
            });
        }
        self.tail.entry(row.key).or_default().accept(row.value);
        self.scalar += 1;
        Ok(cursor + row.consumed)
    }

    #[inline(always)]
    fn tick(&mut self) -> Result<(), Error> {
        self.budget -= 1;
        if self.budget == 0 {
            self.budget = CHECK_INTERVAL;
            self.guard.check(self.partition)?;
        }
        Ok(())
    }
}

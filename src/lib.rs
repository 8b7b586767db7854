#![feature(portable_simd)]

//! Min, mean and max per key over a file of `<key>;<measurement>` lines.
//!
//! The input is mapped once and cut into newline-aligned slices. Each slice
//! is scanned by its own worker with SIMD key hashing and fixed-point
//! decoding into a private hash table, so the scan needs no synchronization.
//! The per-worker results are folded into one key-sorted map at the end.

use std::{
    any::Any,
    io::Write,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
    time::Instant,
};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

pub mod config;
pub mod decode;
pub mod error;
pub mod input;
pub mod key;
pub mod merge;
pub mod partition;
pub mod scalar;
pub mod stats;
pub mod table;
pub mod worker;

pub use config::{Config, OutputFormat, OversizedKeys};
pub use error::{Error, RecordError};
pub use merge::MergedResult;
pub use stats::Stats;

use crate::{
    input::MappedInput,
    merge::merge_partitions,
    partition::{partition, Slice},
    worker::{Guard, PartitionResult, PartitionWorker},
};

/// Maps `path`, aggregates it and writes the formatted result to `out`.
/// Nothing is written if any part of the run fails.
pub fn run(
    path: &Path,
    config: &Config,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<(), Error> {
    let input = MappedInput::open(path)?;
    let merged = aggregate(&input, config)?;
    merged.write_to(out, format).map_err(Error::Output)
}

/// Aggregates `input` with one worker task per slice on a pool of
/// `config.threads` threads.
///
/// The first failing worker decides the returned error; the others are told
/// to stop at their next check and their results are discarded.
pub fn aggregate(input: &[u8], config: &Config) -> Result<MergedResult, Error> {
    config.validate()?;
    let started = Instant::now();
    let slices = partition(input, config.partitions);
    info!(
        bytes = input.len(),
        partitions = slices.len(),
        threads = config.threads,
        "aggregating"
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .thread_name(|i| format!("partition-worker-{i}"))
        .build()?;

    let deadline = config.deadline.map(|budget| started + budget);
    let results = run_partitions(&pool, &slices, deadline, |partition, slice, guard| {
        PartitionWorker::new(input, slice, partition, config, guard).run()
    })?;

    let merged = merge_partitions(results)?;
    info!(
        keys = merged.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "aggregated"
    );
    Ok(merged)
}

/// Runs `work` once per slice on `pool` and collects the results in slice
/// order. A panic in `work` becomes [Error::WorkerFailure]. The first error
/// raised wins and tells every other worker to stop at its next guard check.
fn run_partitions<'a, F>(
    pool: &ThreadPool,
    slices: &[Slice],
    deadline: Option<Instant>,
    work: F,
) -> Result<Vec<PartitionResult<'a>>, Error>
where
    F: Fn(usize, Slice, &Guard<'_>) -> Result<PartitionResult<'a>, Error> + Sync,
{
    let abort = AtomicBool::new(false);
    let processing_error = Mutex::new(None);
    let mut results: Vec<Option<PartitionResult<'a>>> = slices.iter().map(|_| None).collect();

    pool.scope(|s| {
        for (partition, (slice, result)) in slices.iter().zip(results.iter_mut()).enumerate() {
            let abort = &abort;
            let pe = &processing_error;
            let work = &work;
            s.spawn(move |_| {
                let guard = Guard::new(deadline, abort);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    work(partition, *slice, &guard)
                }))
                .unwrap_or_else(|payload| {
                    Err(Error::WorkerFailure {
                        partition,
                        reason: panic_reason(payload.as_ref()),
                    })
                });
                match outcome {
                    Ok(partition_result) => *result = Some(partition_result),
                    Err(e) => {
                        pe.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get_or_insert(e);
                        abort.store(true, Ordering::Relaxed);
                    }
                }
            });
        }
    }); // scope ends, all workers were joined

    if let Some(e) = processing_error
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
    {
        return Err(e);
    }

    results
        .into_iter()
        .enumerate()
        .map(|(partition, result)| {
            result.ok_or_else(|| Error::WorkerFailure {
                partition,
                reason: "worker returned no result".to_owned(),
            })
        })
        .collect()
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_owned()
    }
}

#[cfg(test)]
mod test {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use proptest::prelude::*;
    use rayon::ThreadPoolBuilder;

    use super::{
        aggregate, panic_reason, run_partitions, Config, Error, MergedResult, OversizedKeys,
    };
    use crate::{
        error::RecordError, partition::partition, scalar::parse_record, stats::Tenths,
        table::MAX_TABLE_SLOTS,
    };

    fn config(partitions: usize) -> Config {
        let mut config = Config::with_threads(partitions.min(4));
        config.partitions = partitions;
        config.table_slots = 64;
        config
    }

    /// Byte-wise reference aggregation over the whole input.
    fn oracle(input: &[u8]) -> MergedResult {
        let mut merged = MergedResult::default();
        let mut rest = input;
        while !rest.is_empty() {
            let row = parse_record(rest).unwrap();
            let mut stats = crate::Stats::EMPTY;
            stats.accept(row.value);
            merged.insert(row.key, &stats).unwrap();
            rest = &rest[row.consumed..];
        }
        merged
    }

    fn render(records: &[(String, i32)], trailing_newline: bool) -> String {
        let mut input = records
            .iter()
            .map(|(key, value)| format!("{key};{}", Tenths(i64::from(*value))))
            .collect::<Vec<_>>()
            .join("\n");
        if trailing_newline && !input.is_empty() {
            input.push('\n');
        }
        input
    }

    #[test]
    fn aggregates_the_documented_example() {
        let input = b"Hamburg;12.0\nSnag;-23.0\nHamburg;11.0\n";
        let merged = aggregate(input, &config(1)).unwrap();

        let hamburg = merged.get("Hamburg").unwrap();
        assert_eq!(hamburg.to_string(), "11.0/11.5/12.0");
        assert_eq!(hamburg.count, 2);
        let snag = merged.get("Snag").unwrap();
        assert_eq!(snag.to_string(), "-23.0/-23.0/-23.0");
        assert_eq!(snag.count, 1);
    }

    #[test]
    fn empty_input_has_no_keys() {
        assert!(aggregate(b"", &config(4)).unwrap().is_empty());
    }

    #[test]
    fn malformed_record_fails_the_whole_run() {
        let records: Vec<(String, i32)> = (0..400)
            .map(|i| (format!("station{}", i % 13), i % 999))
            .collect();
        let mut input = render(&records, true);
        let offset = input.len();
        input.push_str("Berlin;100.0\n");
        input.push_str(&render(&records, true));

        match aggregate(input.as_bytes(), &config(8)) {
            Err(Error::MalformedRecord {
                offset: at,
                source: RecordError::InvalidMeasurement,
            }) => assert_eq!(at, offset),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("malformed input produced a result"),
        }
    }

    #[test]
    fn key_width_boundary() {
        let filler: Vec<(String, i32)> = (0..50).map(|i| (format!("f{i}"), i)).collect();
        let filler = render(&filler, true);

        let widest = "w".repeat(32);
        let input = format!("{widest};9.8\n{filler}");
        let merged = aggregate(input.as_bytes(), &config(1)).unwrap();
        assert_eq!(merged.get(&widest).unwrap().to_string(), "9.8/9.8/9.8");

        let oversized = "o".repeat(33);
        let input = format!("{filler}{oversized};9.8\n{filler}");
        assert!(matches!(
            aggregate(input.as_bytes(), &config(3)),
            Err(Error::OversizedKey { len: 33, .. })
        ));

        let mut fallback = config(3);
        fallback.oversized_keys = OversizedKeys::Fallback;
        let merged = aggregate(input.as_bytes(), &fallback).unwrap();
        assert_eq!(merged.get(&oversized).unwrap().count, 1);
        assert_eq!(merged.get("f7").unwrap().count, 2);
    }

    #[test]
    fn expired_deadline_fails_the_run() {
        let mut config = config(2);
        config.deadline = Some(Duration::ZERO);
        assert!(matches!(
            aggregate(b"a;1.0\nb;2.0\n", &config),
            Err(Error::DeadlineExceeded { .. })
        ));
    }

    #[test]
    fn failing_worker_fails_the_run_and_stops_the_others() {
        let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let input = b"a;1.0\nb;2.0\nc;3.0\nd;4.0\n";
        let slices = partition(input, 4);
        assert_eq!(slices.len(), 4);
        // the healthy workers would otherwise spin until this deadline
        let deadline = Some(Instant::now() + Duration::from_secs(60));

        let outcome = run_partitions(&pool, &slices, deadline, |partition, _, guard| {
            if partition == 2 {
                panic!("slot index out of range");
            }
            loop {
                guard.check(partition)?;
                thread::yield_now();
            }
        });
        match outcome {
            Err(Error::WorkerFailure { partition, reason }) => {
                assert_eq!(partition, 2);
                assert_eq!(reason, "slot index out of range");
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("a panicking worker produced a result"),
        }

        let outcome = run_partitions(&pool, &slices, deadline, |partition, slice, guard| {
            if partition == 1 {
                return Err(Error::MalformedRecord {
                    offset: slice.start,
                    source: RecordError::MissingDelimiter,
                });
            }
            loop {
                guard.check(partition)?;
                thread::yield_now();
            }
        });
        match outcome {
            Err(Error::MalformedRecord { offset, .. }) => assert_eq!(offset, slices[1].start),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("a failing worker produced a result"),
        }
    }

    #[test]
    fn oversized_table_is_rejected_before_scanning() {
        let mut config = config(2);
        config.table_slots = usize::MAX;
        assert!(matches!(
            aggregate(b"a;1.0\nb;2.0\n", &config),
            Err(Error::TableSlots { requested: usize::MAX })
        ));
        config.table_slots = MAX_TABLE_SLOTS + 1;
        assert!(matches!(
            aggregate(b"", &config),
            Err(Error::TableSlots { .. })
        ));
    }

    #[test]
    fn panic_payloads_become_reasons() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_reason(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_reason(payload.as_ref()), "worker panicked");
    }

    fn records_strategy() -> impl Strategy<Value = Vec<(String, i32)>> {
        prop::collection::vec(("[a-zA-Z ]{0,32}", -999i32..=999), 0..300)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn partition_count_never_changes_the_result(
            records in records_strategy(),
            trailing_newline in any::<bool>(),
            partitions in 2usize..9,
        ) {
            let input = render(&records, trailing_newline);
            let single = aggregate(input.as_bytes(), &config(1)).unwrap();
            let split = aggregate(input.as_bytes(), &config(partitions)).unwrap();
            prop_assert_eq!(single, split);
        }

        #[test]
        fn vector_pipeline_matches_scalar_oracle(
            records in records_strategy(),
            trailing_newline in any::<bool>(),
            partitions in 1usize..5,
        ) {
            let input = render(&records, trailing_newline);
            let merged = aggregate(input.as_bytes(), &config(partitions)).unwrap();
            prop_assert_eq!(merged, oracle(input.as_bytes()));
        }
    }
}

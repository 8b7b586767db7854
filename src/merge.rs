use std::{
    collections::{btree_map, BTreeMap},
    io::{self, Write},
};

use crate::{config::OutputFormat, error::Error, stats::Stats, worker::PartitionResult};

/// Per-key statistics across all partitions, ordered by key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergedResult {
    stations: BTreeMap<String, Stats>,
}

impl MergedResult {
    /// Folds one key's partial statistics into the result.
    pub fn insert(&mut self, key: &[u8], stats: &Stats) -> Result<(), Error> {
        let Ok(name) = std::str::from_utf8(key) else {
            return Err(Error::InvalidKeyEncoding { key: key.to_vec() });
        };
        match self.stations.get_mut(name) {
            Some(existing) => existing.merge(stats),
            None => {
                self.stations.insert(name.to_owned(), *stats);
            }
        }
        Ok(())
    }

    /// Combines two merged results; order does not matter.
    pub fn combine(mut self, other: MergedResult) -> MergedResult {
        for (name, stats) in other.stations {
            self.stations
                .entry(name)
                .and_modify(|e| e.merge(&stats))
                .or_insert(stats);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Stats> {
        self.stations.get(key)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Stats> {
        self.stations.iter()
    }

    pub fn write_to(&self, out: &mut impl Write, format: OutputFormat) -> io::Result<()> {
        match format {
            OutputFormat::Braces => {
                write!(out, "{{")?;
                for (i, (name, stats)) in self.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    write!(out, "{name}={stats}")?;
                }
                writeln!(out, "}}")
            }
            OutputFormat::Lines => {
                for (name, stats) in self {
                    writeln!(out, "{name}={stats}")?;
                }
                Ok(())
            }
        }
    }
}

impl<'a> IntoIterator for &'a MergedResult {
    type Item = (&'a String, &'a Stats);
    type IntoIter = btree_map::Iter<'a, String, Stats>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Folds every partition's table and tail entries into one key-sorted result.
pub fn merge_partitions<'a>(
    partitions: impl IntoIterator<Item = PartitionResult<'a>>,
) -> Result<MergedResult, Error> {
    partitions
        .into_iter()
        .try_fold(MergedResult::default(), |mut merged, partition| {
            for (key, stats) in partition.entries() {
                merged.insert(key, stats)?;
            }
            Ok(merged)
        })
}

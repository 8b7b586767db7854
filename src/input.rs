use std::{fs::File, ops::Deref, path::Path};

use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use crate::error::Error;

/// Read-only view of the whole input file. Empty files are not mapped.
pub struct MappedInput {
    map: Option<Mmap>,
}

impl MappedInput {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mapping = |source| Error::Mapping {
            path: path.to_owned(),
            source,
        };
        let file = File::open(path).map_err(mapping)?;
        let len = file.metadata().map_err(mapping)?.len();
        if len == 0 {
            return Ok(Self { map: None });
        }

        // SAFETY: the mapping is read-only and the file is not expected to be
        // modified while the run holds it
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(mapping)?;

        advise_sequential(&map);
        debug!(path = %path.display(), bytes = len, "input mapped");

        Ok(Self { map: Some(map) })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[..],
            None => &[],
        }
    }
}

#[cfg(unix)]
fn advise_sequential(map: &Mmap) {
    if let Err(e) = map.advise(memmap2::Advice::Sequential) {
        debug!(error = %e, "madvise(SEQUENTIAL) failed");
    }
}

#[cfg(not(unix))]
fn advise_sequential(_map: &Mmap) {}

impl Deref for MappedInput {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

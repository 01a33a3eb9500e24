//! Transient per-rank partial results on disk.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::config;
use log::debug;

use crate::error::{ProcessingError, Result};
use crate::parallel::partial::PartialResult;

pub fn spill_path(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("partial_rank{}.bin", rank))
}

/// Encodes a partial result to `partial_rank<rank>.bin` inside `dir`.
pub fn write_partial(dir: &Path, partial: &PartialResult) -> Result<PathBuf> {
    let path = spill_path(dir, partial.rank);
    let file = File::create(&path).map_err(|e| ProcessingError::io(&path, e))?;
    let mut writer = BufWriter::new(file);
    let written = bincode::encode_into_std_write(partial, &mut writer, config::standard())?;
    writer.flush().map_err(|e| ProcessingError::io(&path, e))?;
    debug!("rank {} spilled {} bytes to {:?}", partial.rank, written, path);
    Ok(path)
}

/// Decodes a spilled partial and checks that it belongs to `expected_rank`.
pub fn read_partial(path: &Path, expected_rank: usize) -> Result<PartialResult> {
    let file = File::open(path).map_err(|e| ProcessingError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let partial: PartialResult = bincode::decode_from_std_read(&mut reader, config::standard())?;
    if partial.rank != expected_rank {
        return Err(ProcessingError::SpilledRank {
            path: path.to_path_buf(),
            expected: expected_rank,
            found: partial.rank,
        });
    }
    Ok(partial)
}

pub fn remove_partial(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|e| ProcessingError::io(path, e))
}

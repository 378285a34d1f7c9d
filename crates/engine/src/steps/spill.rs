//! Sort spill runs: sorted row batches persisted to temp files.
//!
//! File layout: a 4-byte little-endian row count, then that many rows in the
//! binary row encoding, the whole payload optionally wrapped in a gzip stream.
//! Run files are transient and owned exclusively by the sort stage copy that
//! wrote them: they are deleted as soon as their handle or cursor is dropped,
//! on the success and on the error path alike.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::warn;

use rowflow_common::{Result, RowflowError};
use rowflow_core::{Row, codec};

/// Path deleted on drop. Deletion failure is logged, never escalated: it must
/// not mask the error that got us here nor block shutdown.
#[derive(Debug)]
struct TempPath {
    path: PathBuf,
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not delete spill run");
            }
        }
    }
}

/// Handle to one written, not yet opened spill run.
#[derive(Debug)]
pub(crate) struct SpillRun {
    path: TempPath,
    rows: u32,
    arity: usize,
    compressed: bool,
}

impl SpillRun {
    /// Sort-free write: the caller passes rows already in run order.
    pub(crate) fn write(
        dir: &Path,
        seq: usize,
        rows: &[Row],
        arity: usize,
        compress: bool,
    ) -> Result<SpillRun> {
        fs::create_dir_all(dir)?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RowflowError::Execution(format!("system clock: {e}")))?
            .as_nanos();
        let path = dir.join(format!(
            "rowflow-sort-{}-{nanos}-{seq}.run",
            std::process::id()
        ));

        let count = u32::try_from(rows.len()).map_err(|_| {
            RowflowError::Execution("spill run larger than u32::MAX rows".to_string())
        })?;
        let written = write_run_file(&path, count, rows, compress);
        if let Err(e) = written {
            // Leave no partial file behind before surfacing the error.
            drop(TempPath { path });
            return Err(e);
        }

        Ok(SpillRun {
            path: TempPath { path },
            rows: count,
            arity,
            compressed: compress,
        })
    }

    /// Rows stored in this run.
    pub(crate) fn row_count(&self) -> u32 {
        self.rows
    }

    /// Bytes the run occupies on disk.
    pub(crate) fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path.path)?.len())
    }

    /// Open a read cursor over the run. The file is deleted when the cursor is
    /// dropped.
    pub(crate) fn open(self) -> Result<RunCursor> {
        let file = BufReader::new(File::open(&self.path.path)?);
        let mut reader: Box<dyn Read + Send> = if self.compressed {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut header = [0u8; 4];
        reader.read_exact(&mut header)?;
        let remaining = u32::from_le_bytes(header);
        if remaining != self.rows {
            return Err(RowflowError::Execution(format!(
                "spill run header says {remaining} rows, writer recorded {}",
                self.rows
            )));
        }

        Ok(RunCursor {
            reader,
            remaining,
            arity: self.arity,
            path: self.path,
        })
    }
}

fn write_run_file(path: &Path, count: u32, rows: &[Row], compress: bool) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    if compress {
        let mut encoder = GzEncoder::new(&mut file, Compression::default());
        write_payload(&mut encoder, count, rows)?;
        encoder.finish()?;
    } else {
        write_payload(&mut file, count, rows)?;
    }
    file.flush()?;
    Ok(())
}

fn write_payload(w: &mut impl Write, count: u32, rows: &[Row]) -> Result<()> {
    w.write_all(&count.to_le_bytes())?;
    for row in rows {
        codec::write_row(w, row)?;
    }
    Ok(())
}

/// Open read cursor over one spill run.
pub(crate) struct RunCursor {
    reader: Box<dyn Read + Send>,
    remaining: u32,
    arity: usize,
    #[allow(dead_code)] // held for its delete-on-drop effect
    path: TempPath,
}

impl RunCursor {
    /// Next row, or `None` once the recorded row count is exhausted.
    pub(crate) fn next_row(&mut self) -> Result<Option<Row>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let row = codec::read_row(&mut self.reader, self.arity)?;
        self.remaining -= 1;
        Ok(Some(row))
    }
}

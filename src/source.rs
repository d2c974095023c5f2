//! Line source: reads the input file and feeds the work queue

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::parallel::LineFeeder;

/// File name looked up when the input path is a directory
pub const DEFAULT_INPUT_FILE: &str = "logfile.txt";

/// Resolve the input argument: a directory means `<dir>/<file_name>`,
/// anything else is taken as the file itself.
pub fn resolve_input_path(input: &Path, file_name: &str) -> PathBuf {
    if input.is_dir() {
        input.join(file_name)
    } else {
        input.to_path_buf()
    }
}

pub fn open_input(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Read `reader` line by line into the queue until EOF or until the engine
/// stops accepting input. Marks the source as exhausted in both cases, also
/// on a read error. Returns the number of lines enqueued.
pub fn feed_lines<R: BufRead>(mut reader: R, feeder: &LineFeeder) -> Result<u64> {
    let mut buffer = Vec::new();
    let mut fed = 0u64;

    let result = loop {
        if !feeder.is_accepting() {
            tracing::debug!(fed, "engine stopped accepting input");
            break Ok(fed);
        }

        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break Ok(fed),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(&['\r', '\n'][..]);
                if !feeder.enqueue(line) {
                    break Ok(fed);
                }
                fed += 1;
            }
            Err(e) => {
                break Err(anyhow::Error::new(e).context(format!(
                    "Failed to read input after {} lines",
                    fed
                )))
            }
        }
    };

    feeder.finish();
    if result.is_ok() {
        tracing::info!(lines = fed, "finished reading input");
    }
    result
}

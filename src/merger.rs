//! Streaming run merging.
//!
//! Both mergers read their inputs line by line, keeping memory at one
//! pending line per input regardless of run size, and both resolve ties
//! the same way: equal lines drain the leftmost input first, so a merge
//! never reorders duplicates relative to input order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use crate::run::{discard_partial, Run, Workspace};
use crate::sort::SortError;

/// Merges two sorted runs into a new one, consuming (deleting) both inputs.
///
/// Once one input is exhausted the rest of the other is drained verbatim.
/// The output run contains exactly `left.lines() + right.lines()` lines.
/// On a write failure the partial output is removed before the error
/// propagates and the inputs are left in place.
pub fn merge_pair(workspace: &Workspace, left: Run, right: Run) -> Result<Run, SortError> {
    let out_path = workspace.next_run_path();
    let line_count = left.lines() + right.lines();

    if let Err(err) = dump_pair(&out_path, &left, &right) {
        discard_partial(&out_path);
        return Err(SortError::from_write(err, &out_path));
    }

    left.remove()?;
    right.remove()?;

    log::debug!("merged pair into {} ({} lines)", out_path.display(), line_count);

    return Ok(Run::from_parts(out_path, line_count));
}

fn dump_pair(out_path: &Path, left: &Run, right: &Run) -> io::Result<()> {
    let mut left_reader = open_run(left)?;
    let mut right_reader = open_run(right)?;
    let mut writer = io::BufWriter::new(fs::File::create(out_path)?);

    let mut left_pending = read_line(&mut left_reader)?;
    let mut right_pending = read_line(&mut right_reader)?;

    loop {
        match (left_pending.take(), right_pending.take()) {
            (None, None) => break,
            (Some(line), None) => {
                write_line(&mut writer, &line)?;
                left_pending = read_line(&mut left_reader)?;
            }
            (None, Some(line)) => {
                write_line(&mut writer, &line)?;
                right_pending = read_line(&mut right_reader)?;
            }
            (Some(left_line), Some(right_line)) => {
                // ties emit the left line, keeping the merge stable
                if left_line <= right_line {
                    write_line(&mut writer, &left_line)?;
                    left_pending = read_line(&mut left_reader)?;
                    right_pending = Some(right_line);
                } else {
                    write_line(&mut writer, &right_line)?;
                    right_pending = read_line(&mut right_reader)?;
                    left_pending = Some(left_line);
                }
            }
        }
    }

    writer.flush()
}

/// Merges any number of sorted runs in a single pass, consuming them all.
///
/// A min-heap holds the current head line of every run; equal head lines
/// drain the lowest-numbered input first, matching [`merge_pair`].
/// Memory is bounded by the number of input runs, not their size.
pub fn merge_all(workspace: &Workspace, runs: Vec<Run>) -> Result<Run, SortError> {
    let out_path = workspace.next_run_path();
    let line_count: u64 = runs.iter().map(Run::lines).sum();

    if let Err(err) = dump_all(&out_path, &runs) {
        discard_partial(&out_path);
        return Err(SortError::from_write(err, &out_path));
    }

    let consumed = runs.len();
    for run in runs {
        run.remove()?;
    }

    log::debug!(
        "merged {} runs into {} ({} lines)",
        consumed,
        out_path.display(),
        line_count
    );

    return Ok(Run::from_parts(out_path, line_count));
}

fn dump_all(out_path: &Path, runs: &[Run]) -> io::Result<()> {
    let mut readers = runs.iter().map(open_run).collect::<io::Result<Vec<_>>>()?;
    let mut writer = io::BufWriter::new(fs::File::create(out_path)?);

    // binary heap is a max-heap, so entries are reversed to pop the
    // smallest (line, input index) pair first
    let mut heads = BinaryHeap::with_capacity(readers.len());
    for (idx, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = read_line(reader)? {
            heads.push(Reverse((line, idx)));
        }
    }

    while let Some(Reverse((line, idx))) = heads.pop() {
        write_line(&mut writer, &line)?;
        if let Some(next) = read_line(&mut readers[idx])? {
            heads.push(Reverse((next, idx)));
        }
    }

    writer.flush()
}

fn open_run(run: &Run) -> io::Result<io::BufReader<fs::File>> {
    Ok(io::BufReader::new(fs::File::open(run.path())?))
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(Some(line))
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")
}

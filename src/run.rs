//! Run partitioning and disk-backed run storage.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sort::SortError;

/// Job-scoped working directory for transient run files.
///
/// Run names are derived from a monotonically increasing counter, so they
/// never collide within one job no matter how quickly runs are created.
/// The directory itself is removed when the workspace is dropped or closed.
pub struct Workspace {
    dir: tempfile::TempDir,
    run_seq: AtomicU64,
}

impl Workspace {
    /// Creates a fresh working directory under `base`.
    pub fn create(base: &Path) -> Result<Self, SortError> {
        let dir = tempfile::Builder::new()
            .prefix("extmerge-")
            .tempdir_in(base)
            .map_err(SortError::Workspace)?;

        log::info!("using {} as a working directory", dir.path().display());

        return Ok(Workspace {
            dir,
            run_seq: AtomicU64::new(0),
        });
    }

    /// Path of the working directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocates a unique path for a new run file.
    pub fn next_run_path(&self) -> PathBuf {
        let seq = self.run_seq.fetch_add(1, Ordering::Relaxed);
        self.dir.path().join(format!("run-{:06}.txt", seq))
    }

    /// Removes the working directory and everything left in it.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Disables cleanup, leaving the remaining run files on disk, and
    /// returns the directory path.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// A sorted run stored as a single file in the working directory.
///
/// A run is written once and is immutable afterwards; a merge consumes
/// (deletes) it, and the last surviving run is renamed to the final output.
#[derive(Debug)]
pub struct Run {
    path: PathBuf,
    lines: u64,
}

impl Run {
    /// Persists a sorted batch of lines as a new run file.
    pub(crate) fn write(workspace: &Workspace, lines: &[String]) -> Result<Self, SortError> {
        let path = workspace.next_run_path();

        if let Err(err) = Self::dump(&path, lines) {
            discard_partial(&path);
            return Err(SortError::from_write(err, &path));
        }

        log::debug!("run {} created ({} lines)", path.display(), lines.len());

        return Ok(Run {
            path,
            lines: lines.len() as u64,
        });
    }

    fn dump(path: &Path, lines: &[String]) -> io::Result<()> {
        let mut writer = io::BufWriter::new(fs::File::create(path)?);
        for line in lines {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    pub(crate) fn from_parts(path: PathBuf, lines: u64) -> Self {
        Run { path, lines }
    }

    /// Path of the run file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines in the run.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Consumes the run, returning the underlying file path.
    pub(crate) fn into_path(self) -> PathBuf {
        self.path
    }

    /// Consumes the run and deletes its file.
    pub(crate) fn remove(self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// Best-effort removal of a partially written file after a failed write.
pub(crate) fn discard_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("partial file {} not removed: {}", path.display(), err);
        }
    }
}

/// Splits a source stream into sorted, bounded-size runs.
pub struct RunWriter<'a> {
    workspace: &'a Workspace,
    batch_capacity: usize,
}

impl<'a> RunWriter<'a> {
    /// Creates a run writer flushing every `batch_capacity` lines.
    pub fn new(workspace: &'a Workspace, batch_capacity: usize) -> Self {
        RunWriter {
            workspace,
            batch_capacity: batch_capacity.max(1),
        }
    }

    /// Reads the source strictly sequentially and flushes every full batch
    /// as one sorted run. The trailing partial batch becomes the final
    /// (smaller) run. An empty source produces no runs.
    ///
    /// Only the newline delimiter is stripped; everything else, including
    /// carriage returns, is opaque payload.
    pub fn partition<R: BufRead>(&self, mut source: R) -> Result<Vec<Run>, SortError> {
        let mut runs = Vec::new();
        let mut batch: Vec<String> = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            if source.read_line(&mut line)? == 0 {
                break;
            }
            if line.ends_with('\n') {
                line.pop();
            }

            batch.push(std::mem::take(&mut line));

            if batch.len() >= self.batch_capacity {
                runs.push(self.flush(&mut batch)?);
            }
        }

        if !batch.is_empty() {
            runs.push(self.flush(&mut batch)?);
        }

        log::debug!("partitioning done: {} runs", runs.len());

        return Ok(runs);
    }

    fn flush(&self, batch: &mut Vec<String>) -> Result<Run, SortError> {
        // stable sort keeps duplicate lines in encounter order
        batch.sort();
        let run = Run::write(self.workspace, batch)?;
        batch.clear();
        Ok(run)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{RunWriter, Workspace};

    #[fixture]
    fn base() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_run_names_unique(base: tempfile::TempDir) {
        let workspace = Workspace::create(base.path()).unwrap();

        let first = workspace.next_run_path();
        let second = workspace.next_run_path();

        assert_ne!(first, second);
        assert!(first.starts_with(workspace.path()));
    }

    #[rstest]
    fn test_partition_example(base: tempfile::TempDir) {
        let workspace = Workspace::create(base.path()).unwrap();
        let writer = RunWriter::new(&workspace, 2);

        let source = io::Cursor::new("banana\napple\ncherry\ndate\napple\n");
        let runs = writer.partition(source).unwrap();

        let contents: Vec<String> = runs
            .iter()
            .map(|run| fs::read_to_string(run.path()).unwrap())
            .collect();

        assert_eq!(contents, vec!["apple\nbanana\n", "cherry\ndate\n", "apple\n"]);
        assert_eq!(runs.iter().map(|run| run.lines()).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[rstest]
    fn test_partition_empty_source(base: tempfile::TempDir) {
        let workspace = Workspace::create(base.path()).unwrap();
        let writer = RunWriter::new(&workspace, 2);

        let runs = writer.partition(io::Cursor::new("")).unwrap();

        assert!(runs.is_empty());
    }

    #[rstest]
    #[case(5, 2, 3)]
    #[case(4, 2, 2)]
    #[case(1, 10, 1)]
    #[case(7, 3, 3)]
    #[case(6, 1, 6)]
    fn test_partition_run_count(
        base: tempfile::TempDir,
        #[case] line_count: usize,
        #[case] capacity: usize,
        #[case] expected_runs: usize,
    ) {
        let workspace = Workspace::create(base.path()).unwrap();
        let writer = RunWriter::new(&workspace, capacity);

        let input: String = (0..line_count).map(|n| format!("line-{}\n", n)).collect();
        let runs = writer.partition(io::Cursor::new(input)).unwrap();

        assert_eq!(runs.len(), expected_runs);
        assert_eq!(runs.iter().map(|run| run.lines()).sum::<u64>(), line_count as u64);
    }

    #[rstest]
    fn test_partition_missing_final_newline(base: tempfile::TempDir) {
        let workspace = Workspace::create(base.path()).unwrap();
        let writer = RunWriter::new(&workspace, 10);

        let runs = writer.partition(io::Cursor::new("b\na")).unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(fs::read_to_string(runs[0].path()).unwrap(), "a\nb\n");
    }

    #[rstest]
    fn test_workspace_close_removes_directory(base: tempfile::TempDir) {
        let workspace = Workspace::create(base.path()).unwrap();
        let path = workspace.path().to_path_buf();

        fs::write(path.join("leftover.txt"), "x\n").unwrap();
        workspace.close().unwrap();

        assert!(!path.exists());
    }
}

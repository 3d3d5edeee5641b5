//! Random test input generation.
//!
//! A benchmarking collaborator, not part of the sort pipeline: the engine
//! only requires its output to be newline-terminated opaque lines.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use rand::Rng;

/// Writes `line_count` random lowercase-ASCII lines to `path`, each of a
/// length uniform in `0..=max_line_len` (empty lines are valid lines).
///
/// An existing file is left untouched unless `overwrite` is set.
pub fn generate(path: &Path, line_count: usize, max_line_len: usize, overwrite: bool) -> io::Result<PathBuf> {
    if path.exists() && !overwrite {
        log::warn!("file {} already exists, generation skipped", path.display());
        return Ok(path.to_path_buf());
    }

    let mut rng = rand::thread_rng();
    let mut writer = io::BufWriter::new(fs::File::create(path)?);

    for _ in 0..line_count {
        let len = rng.gen_range(0..=max_line_len);
        let mut line = Vec::with_capacity(len + 1);
        for _ in 0..len {
            line.push(rng.gen_range(b'a'..=b'z'));
        }
        line.push(b'\n');
        writer.write_all(&line)?;
    }
    writer.flush()?;

    log::info!("file {} generated ({} lines)", path.display(), line_count);

    return Ok(path.to_path_buf());
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::generate;

    #[fixture]
    fn base() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_generate(base: tempfile::TempDir) {
        let path = base.path().join("input.txt");

        generate(&path, 100, 10, false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 100);
        assert!(content.is_empty() || content.ends_with('\n'));
        assert!(content
            .lines()
            .all(|line| line.len() <= 10 && line.bytes().all(|b| b.is_ascii_lowercase())));
    }

    #[rstest]
    fn test_generate_skips_existing_file(base: tempfile::TempDir) {
        let path = base.path().join("input.txt");
        fs::write(&path, "original\n").unwrap();

        generate(&path, 5, 10, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "original\n");

        generate(&path, 5, 10, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 5);
    }
}

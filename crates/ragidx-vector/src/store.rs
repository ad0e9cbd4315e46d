//! Persistence of an index together with its position-aligned chunk list.
//!
//! The two files only make sense as a pair: loading one without the other
//! is a configuration error, and differing record counts invalidate both.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use ragidx_core::{Chunk, Error, Result};

use crate::index::VectorIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairState {
    Missing,
    Partial { present: PathBuf, missing: PathBuf },
    Present,
}

pub fn pair_state(index_path: &Path, docs_path: &Path) -> PairState {
    match (index_path.exists(), docs_path.exists()) {
        (true, true) => PairState::Present,
        (false, false) => PairState::Missing,
        (true, false) => PairState::Partial {
            present: index_path.to_path_buf(),
            missing: docs_path.to_path_buf(),
        },
        (false, true) => PairState::Partial {
            present: docs_path.to_path_buf(),
            missing: index_path.to_path_buf(),
        },
    }
}

fn temp_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    Ok(NamedTempFile::new_in(dir)?)
}

/// Serialises `value` as pretty JSON into a temp file next to `path`.
pub fn stage_json<T: serde::Serialize + ?Sized>(value: &T, path: &Path) -> Result<NamedTempFile> {
    let tmp = temp_beside(path)?;
    let mut writer = BufWriter::new(tmp.as_file());
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    drop(writer);
    Ok(tmp)
}

pub fn stage_index(index: &VectorIndex, path: &Path) -> Result<NamedTempFile> {
    let tmp = temp_beside(path)?;
    index.save(tmp.path())?;
    Ok(tmp)
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn read_chunks(docs_path: &Path) -> Result<Vec<Chunk>> {
    read_json(docs_path)
}

/// Moves every `(staged, target)` file into place as one unit.
///
/// Existing targets are first renamed to a `.prev` sibling. If any move
/// fails, whatever was already installed is removed and every set-aside
/// file is put back, so callers see either all new files or all old ones.
pub fn replace_all(moves: &[(&Path, &Path)]) -> Result<()> {
    replace_all_with(moves, |from, to| fs::rename(from, to))
}

fn replace_all_with<F>(moves: &[(&Path, &Path)], mut rename: F) -> Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    for (_, target) in moves {
        if target.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", target.display()),
            )));
        }
    }

    let mut set_aside: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut installed: Vec<PathBuf> = Vec::new();
    let outcome = swap_in(moves, &mut rename, &mut set_aside, &mut installed);

    match outcome {
        Ok(()) => {
            for (_, backup) in &set_aside {
                if let Err(e) = fs::remove_file(backup) {
                    warn!(path = %backup.display(), error = %e, "could not remove replaced file");
                }
            }
            Ok(())
        }
        Err(e) => {
            for target in &installed {
                if let Err(rm) = fs::remove_file(target) {
                    warn!(path = %target.display(), error = %rm, "could not remove partial file");
                }
            }
            for (target, backup) in set_aside.iter().rev() {
                if let Err(restore) = rename(backup, target) {
                    warn!(
                        path = %target.display(),
                        error = %restore,
                        "could not restore previous file"
                    );
                }
            }
            Err(e.into())
        }
    }
}

fn swap_in<F>(
    moves: &[(&Path, &Path)],
    rename: &mut F,
    set_aside: &mut Vec<(PathBuf, PathBuf)>,
    installed: &mut Vec<PathBuf>,
) -> io::Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    for (_, target) in moves {
        if target.exists() {
            let backup = backup_path(target);
            rename(target, &backup)?;
            set_aside.push((target.to_path_buf(), backup));
        }
    }
    for (staged, target) in moves {
        rename(staged, target)?;
        installed.push(target.to_path_buf());
    }
    Ok(())
}

fn backup_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.prev"))
}

/// Writes both files through temp files in their target directories and
/// swaps them in together; a failure leaves any previous pair in place.
pub fn save_pair(
    index: &VectorIndex,
    chunks: &[Chunk],
    index_path: &Path,
    docs_path: &Path,
) -> Result<()> {
    if index.total_vectors() != chunks.len() {
        return Err(Error::IndexMismatch {
            vectors: index.total_vectors(),
            chunks: chunks.len(),
        });
    }
    let staged_index = stage_index(index, index_path)?;
    let staged_docs = stage_json(chunks, docs_path)?;

    replace_all(&[
        (staged_index.path(), index_path),
        (staged_docs.path(), docs_path),
    ])?;
    debug!(
        vectors = chunks.len(),
        index = %index_path.display(),
        docs = %docs_path.display(),
        "saved index pair"
    );
    Ok(())
}

pub fn load_pair(index_path: &Path, docs_path: &Path) -> Result<(VectorIndex, Vec<Chunk>)> {
    match pair_state(index_path, docs_path) {
        PairState::Present => {}
        PairState::Missing => {
            return Err(Error::MissingPair(format!(
                "neither {} nor {} exists",
                index_path.display(),
                docs_path.display()
            )))
        }
        PairState::Partial { present, missing } => {
            return Err(Error::MissingPair(format!(
                "{} exists but {} does not",
                present.display(),
                missing.display()
            )))
        }
    }
    let index = VectorIndex::open(index_path)?;
    let chunks = read_chunks(docs_path)?;
    if index.total_vectors() != chunks.len() {
        return Err(Error::IndexMismatch {
            vectors: index.total_vectors(),
            chunks: chunks.len(),
        });
    }
    Ok((index, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, body: &str) {
        fs::write(path, body).unwrap();
    }

    #[test]
    fn all_files_are_replaced_together() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        let (new_a, new_b) = (tmp.path().join("new_a"), tmp.path().join("new_b"));
        write(&a, "old a");
        write(&new_a, "new a");
        write(&new_b, "new b");

        replace_all(&[(&new_a, &a), (&new_b, &b)]).unwrap();

        assert_eq!(fs::read_to_string(&a).unwrap(), "new a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "new b");
        assert!(!backup_path(&a).exists());
    }

    #[test]
    fn failed_second_move_restores_previous_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        let (new_a, new_b) = (tmp.path().join("new_a"), tmp.path().join("new_b"));
        write(&a, "old a");
        write(&b, "old b");
        write(&new_a, "new a");
        write(&new_b, "new b");

        let mut calls = 0;
        let err = replace_all_with(&[(&new_a, &a), (&new_b, &b)], |from, to| {
            calls += 1;
            if from == new_b.as_path() {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            fs::rename(from, to)
        });

        assert!(err.is_err());
        assert!(calls >= 4);
        assert_eq!(fs::read_to_string(&a).unwrap(), "old a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "old b");
        assert!(!backup_path(&a).exists());
        assert!(!backup_path(&b).exists());
    }

    #[test]
    fn directory_target_is_refused_before_touching_anything() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        let new_a = tmp.path().join("new_a");
        write(&a, "old a");
        write(&new_a, "new a");
        fs::create_dir(&b).unwrap();

        assert!(replace_all(&[(&new_a, &a), (&new_a, &b)]).is_err());
        assert_eq!(fs::read_to_string(&a).unwrap(), "old a");
    }
}

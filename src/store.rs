use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AnnotrackError;

/// Generation a data area belongs to. `Current` is what readers see,
/// `Previous` is the one retained generation kept for manual rollback,
/// `Staging` is the scratch copy a run writes into before the swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Current,
    Previous,
    Staging,
}

impl Generation {
    fn dir_name(self) -> &'static str {
        match self {
            Generation::Current => "current",
            Generation::Previous => "previous",
            Generation::Staging => "staging",
        }
    }
}

/// On-disk layout of the result store: one directory per (generation,
/// area), each holding a single JSONL row file.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: Utf8PathBuf,
}

impl DataStore {
    /// Resolves the store root: an explicit path wins, then a
    /// project-local `.annotrack` directory, then the user's local data
    /// directory.
    pub fn resolve(root: Option<Utf8PathBuf>) -> Result<Self, AnnotrackError> {
        if let Some(root) = root {
            return Ok(Self { root });
        }

        let cwd = std::env::current_dir().map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
        let local = cwd.join(".annotrack");
        if local.exists() {
            let root = Utf8PathBuf::from_path_buf(local)
                .map_err(|_| AnnotrackError::Filesystem("invalid project path".to_string()))?;
            return Ok(Self { root });
        }

        let shared = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("annotrack")).ok()
            })
            .ok_or_else(|| {
                AnnotrackError::Filesystem("unable to resolve data directory".to_string())
            })?;
        Ok(Self { root: shared })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn generation_root(&self, generation: Generation) -> Utf8PathBuf {
        self.root.join(generation.dir_name())
    }

    pub fn area_dir(&self, generation: Generation, area: &str) -> Utf8PathBuf {
        self.generation_root(generation).join(area)
    }

    pub fn rows_path(&self, generation: Generation, area: &str) -> Utf8PathBuf {
        self.area_dir(generation, area).join("rows.jsonl")
    }

    pub fn ensure_root(&self) -> Result<(), AnnotrackError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| AnnotrackError::Filesystem(err.to_string()))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), AnnotrackError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| AnnotrackError::Filesystem(err.to_string()))
    }

    pub fn remove_dir_if_exists(path: &Utf8Path) -> Result<(), AnnotrackError> {
        if path.as_std_path().exists() {
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    /// Appends rows to a JSONL file, creating it (and its directory) on
    /// first use.
    pub fn append_rows<T: Serialize>(path: &Utf8Path, rows: &[T]) -> Result<(), AnnotrackError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            let line = serde_json::to_string(row)
                .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| AnnotrackError::Filesystem(err.to_string()))
    }

    /// Reads every row of a JSONL file; a missing file reads as empty.
    pub fn read_rows<T: DeserializeOwned>(path: &Utf8Path) -> Result<Vec<T>, AnnotrackError> {
        if !path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str(&line)
                .map_err(|err| AnnotrackError::StoreParse(format!("{path}: {err}")))?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// True when the area's row file exists and holds at least one byte.
    pub fn has_rows(path: &Utf8Path) -> bool {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.len() > 0)
            .unwrap_or(false)
    }
}

/// Replaces `to` with `from` in one rename step, removing any previous
/// occupant of `to` first.
pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}

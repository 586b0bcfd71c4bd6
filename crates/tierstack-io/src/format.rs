//! The parser/serializer boundary.
//!
//! A [`LayoutFormat`] turns technology and design files into raw trees and
//! back. [`JsonFormat`] stores the raw trees themselves as JSON; a LEF/DEF
//! text backend plugs in behind the same trait.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use tierstack_core::StackError;

use crate::raw::{RawDesignTree, RawTechTree};

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("input file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("{path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Stack(#[from] StackError),
}

pub type Result<T> = std::result::Result<T, FormatError>;

/// Fail with [`FormatError::MissingFile`] unless `path` exists.
pub fn require_file(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(FormatError::MissingFile(path.to_path_buf()))
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    require_file(path)?;
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| FormatError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub trait LayoutFormat {
    /// Read a technology and any number of cell libraries into one tree.
    /// Every file is checked before the first one is parsed.
    fn parse_technology(&self, files: &[PathBuf]) -> Result<RawTechTree>;

    fn parse_design(&self, file: &Path) -> Result<RawDesignTree>;

    fn write_technology(&self, tree: &RawTechTree, file: &Path) -> Result<()>;

    fn write_design(&self, tree: &RawDesignTree, file: &Path) -> Result<()>;
}

/// Raw trees persisted as pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl LayoutFormat for JsonFormat {
    fn parse_technology(&self, files: &[PathBuf]) -> Result<RawTechTree> {
        for file in files {
            require_file(file)?;
        }
        let mut tree = RawTechTree::default();
        for file in files {
            log::info!("reading technology file {}", file.display());
            tree.merge_library(read_json(file)?);
        }
        Ok(tree)
    }

    fn parse_design(&self, file: &Path) -> Result<RawDesignTree> {
        log::info!("reading design file {}", file.display());
        read_json(file)
    }

    fn write_technology(&self, tree: &RawTechTree, file: &Path) -> Result<()> {
        log::info!("writing technology file {}", file.display());
        write_json(file, tree)
    }

    fn write_design(&self, tree: &RawDesignTree, file: &Path) -> Result<()> {
        log::info!("writing design file {}", file.display());
        write_json(file, tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_checked_first() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("tech.json");
        write_json(&present, &RawTechTree::default()).unwrap();
        let absent = dir.path().join("cells.json");

        let err = JsonFormat
            .parse_technology(&[present, absent.clone()])
            .unwrap_err();
        assert!(matches!(err, FormatError::MissingFile(p) if p == absent));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top.json");
        std::fs::write(&path, "{\"design\": 3}").unwrap();
        let err = JsonFormat.parse_design(&path).unwrap_err();
        assert!(matches!(err, FormatError::Parse { path: p, .. } if p == path));
    }
}

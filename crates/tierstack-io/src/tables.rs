//! Side tables that travel between separate runs: the 2D to 3D tier
//! rename maps with the ILV layer list, and partition assignment files.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use tierstack_core::stack::{InverseTierMaps, Tech3d, TierMaps};
use tierstack_core::Partitioning;

use crate::format::{read_json, require_file, write_json, FormatError, Result};

/// What a split run needs to know about the 3D technology it works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    /// ILV cut layers, bottom boundary first.
    pub ilv_layers: Vec<String>,
    pub maps: TierMaps,
}

impl TierTable {
    pub fn from_tech(tech3d: &Tech3d) -> Self {
        Self {
            ilv_layers: tech3d.ilv_layers.clone(),
            maps: tech3d.maps.clone(),
        }
    }

    pub fn inverse(&self) -> InverseTierMaps {
        self.maps.invert()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let table: TierTable = read_json(path)?;
        let tiers = table.maps.tiers();
        if tiers != table.ilv_layers.len() + 1 {
            return Err(FormatError::Parse {
                path: path.to_path_buf(),
                message: format!(
                    "{} tier maps do not match {} ILV layers",
                    tiers,
                    table.ilv_layers.len()
                ),
            });
        }
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        log::info!("writing tier map {}", path.display());
        write_json(path, self)
    }
}

/// Parse `<name> <partition>` lines. Blank lines and `#` comments are
/// skipped.
pub fn parse_partitions(text: &str, path: &Path) -> Result<Partitioning> {
    let mut pairs = Vec::new();
    for (no, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let parsed = match (fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(part), None) => part.parse::<usize>().ok().map(|p| (name.to_string(), p)),
            _ => None,
        };
        match parsed {
            Some(pair) => pairs.push(pair),
            None => {
                return Err(FormatError::Parse {
                    path: path.to_path_buf(),
                    message: format!("line {}: expected '<name> <partition>', got '{}'", no + 1, line),
                })
            }
        }
    }
    Ok(Partitioning::from_assignments(pairs))
}

pub fn read_partitions(path: &Path) -> Result<Partitioning> {
    require_file(path)?;
    let text = std::fs::read_to_string(path)?;
    let partitioning = parse_partitions(&text, path)?;
    log::info!("read {} partitions from {}", partitioning.len(), path.display());
    Ok(partitioning)
}

pub fn format_partitions(partitioning: &Partitioning) -> String {
    let mut out = String::new();
    for (i, part) in partitioning.parts.iter().enumerate() {
        for name in part {
            let _ = writeln!(out, "{name} {i}");
        }
    }
    out
}

pub fn write_partitions(path: &Path, partitioning: &Partitioning) -> Result<()> {
    std::fs::write(path, format_partitions(partitioning))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_partitions() {
        let text = "# pins and cells\nin 0\nu1 0\n\nu2 1   # upper tier\nout 1\n";
        let p = parse_partitions(text, Path::new("parts.txt")).unwrap();
        assert_eq!(p.len(), 2);
        assert!(p.parts[0].contains("u1"));
        assert!(p.parts[1].contains("out"));
        assert_eq!(format_partitions(&p), "in 0\nu1 0\nu2 1\nout 1\n");
    }

    #[test]
    fn test_bad_partition_line() {
        let err = parse_partitions("u1 zero\n", Path::new("parts.txt")).unwrap_err();
        match err {
            FormatError::Parse { path, message } => {
                assert_eq!(path, PathBuf::from("parts.txt"));
                assert!(message.starts_with("line 1"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_tier_table_rejects_inconsistent_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiers.json");
        let table = TierTable {
            ilv_layers: vec!["ILV_T01".into(), "ILV_T12".into()],
            maps: TierMaps::default(),
        };
        table.save(&path).unwrap();
        assert!(matches!(TierTable::load(&path), Err(FormatError::Parse { .. })));
    }
}

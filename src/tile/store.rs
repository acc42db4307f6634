//! On-disk tile layout.
//!
//! ```text
//! {root}/
//!   level_12/
//!     0_0.jpg
//!     1_0.jpg
//!     1_0.jpg.part      <- interrupted write, never collected
//! ```
//!
//! [`TileStore::collect`] also reads flat directories written by other tools:
//! `{prefix}_tile_{col}_{row}.{ext}` (treated as level 0).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::{TileCoordinate, TileRecord};
use crate::error::StitchError;
use crate::source::dzi::parse_dzi_tile_coords;

/// Suffix of in-progress downloads.
pub const PART_SUFFIX: &str = "part";

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn flat_tile_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^.*_tile_(\d+)_(\d+)\.(?:jpe?g|png)$").expect("static regex"))
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn parse_level_dir(name: &str) -> Option<u32> {
    name.strip_prefix("level_")?.parse().ok()
}

/// Tile files of one run, rooted at a work directory.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
}

impl TileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn level_dir(&self, level: u32) -> PathBuf {
        self.root.join(format!("level_{}", level))
    }

    /// Final path of a tile.
    pub fn tile_path(&self, coord: TileCoordinate, extension: &str) -> PathBuf {
        self.level_dir(coord.level)
            .join(format!("{}_{}.{}", coord.col, coord.row, extension))
    }

    /// Temporary path a tile is written to before being renamed into place.
    pub fn part_path(tile_path: &Path) -> PathBuf {
        let mut name = tile_path.as_os_str().to_owned();
        name.push(".");
        name.push(PART_SUFFIX);
        PathBuf::from(name)
    }

    pub async fn prepare_level(&self, level: u32) -> std::io::Result<PathBuf> {
        let dir = self.level_dir(level);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove a level directory and everything in it. Missing is not an error.
    pub async fn remove_level(&self, level: u32) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.level_dir(level)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Read every tile under `dir` as a successful record, sorted by coordinate.
    ///
    /// `dir` may be a work directory containing `level_N` subdirectories, a
    /// single `level_N` directory, or a flat directory of
    /// `{prefix}_tile_{col}_{row}.{ext}` files. Empty files and `.part` files
    /// are ignored.
    pub fn collect(dir: &Path) -> Result<Vec<TileRecord>, StitchError> {
        if !dir.is_dir() {
            return Err(StitchError::MissingDirectory(dir.to_path_buf()));
        }

        let own_level = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_level_dir);

        let mut records = Vec::new();
        for entry in read_dir(dir)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            if path.is_dir() {
                if let Some(level) = parse_level_dir(&name) {
                    collect_level(&path, level, &mut records)?;
                }
                continue;
            }

            if let Some(level) = own_level {
                push_level_tile(&path, &name, level, &mut records);
            } else if let Some(caps) = flat_tile_regex().captures(&name) {
                if let (Ok(col), Ok(row)) = (caps[1].parse(), caps[2].parse()) {
                    push_if_nonempty(&path, TileCoordinate::new(0, col, row), &mut records);
                }
            }
        }

        if records.is_empty() {
            return Err(StitchError::EmptyDirectory(dir.to_path_buf()));
        }

        records.sort_by_key(|r| r.coord());
        debug!(dir = %dir.display(), tiles = records.len(), "Collected tiles");
        Ok(records)
    }
}

fn read_dir(dir: &Path) -> Result<Vec<fs::DirEntry>, StitchError> {
    fs::read_dir(dir)
        .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StitchError::Io(format!("{}: {}", dir.display(), e)))
}

fn collect_level(dir: &Path, level: u32, records: &mut Vec<TileRecord>) -> Result<(), StitchError> {
    for entry in read_dir(dir)? {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            push_level_tile(&path, name, level, records);
        }
    }
    Ok(())
}

fn push_level_tile(path: &Path, name: &str, level: u32, records: &mut Vec<TileRecord>) {
    if !is_image_file(path) {
        return;
    }
    if let Some((col, row)) = parse_dzi_tile_coords(name) {
        push_if_nonempty(path, TileCoordinate::new(level, col, row), records);
    }
}

fn push_if_nonempty(path: &Path, coord: TileCoordinate, records: &mut Vec<TileRecord>) {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            records.push(TileRecord::existing(coord, path, meta.len()));
        }
        _ => {}
    }
}

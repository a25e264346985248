//! Packaging of computation results into their canonical published form.
//!
//! The published artifact carries the reporting window and a run timestamp
//! in its name: `LOS_<startYear>-W<startWeek>_to_<currentYear>-W<currentWeek>_<YYYYMMDD-HHMMSS>`,
//! weeks zero-padded to two digits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::info;
use zip::{ZipWriter, write::SimpleFileOptions};

use crate::window::ReportingWindow;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("result file {0} does not exist")]
    MissingSource(PathBuf),

    #[error("working directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("result path {0} has no usable file name")]
    UnusableFileName(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Rename the computation's output in place to the canonical form.
pub fn standardize_filename(
    result_path: &Path,
    window: &ReportingWindow,
    now: NaiveDateTime,
) -> Result<PathBuf, PackageError> {
    if !result_path.is_file() {
        return Err(PackageError::MissingSource(result_path.to_path_buf()));
    }
    let extension = result_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let name = format!(
        "LOS_{}-W{:02}_to_{}-W{:02}_{}{}",
        window.start_year,
        window.start_week,
        window.current_year,
        window.current_week,
        now.format("%Y%m%d-%H%M%S"),
        extension,
    );
    let target = result_path.with_file_name(&name);
    info!(from = %result_path.display(), to = name, "renaming result file");
    fs::rename(result_path, &target)?;
    Ok(target)
}

/// Wrap `path` into a sibling `<stem>.zip` whose single entry is
/// `<stem>/<file name>`, so extraction reproduces a named folder rather
/// than a bare file. The uncompressed copy is removed afterwards.
pub fn zip_result_file(path: &Path) -> Result<PathBuf, PackageError> {
    if !path.is_file() {
        return Err(PackageError::MissingSource(path.to_path_buf()));
    }
    let unusable = || PackageError::UnusableFileName(path.to_path_buf());
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(unusable)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(unusable)?;

    let zip_path = path.with_file_name(format!("{stem}.zip"));
    let mut writer = ZipWriter::new(fs::File::create(&zip_path)?);
    writer.start_file(format!("{stem}/{file_name}"), SimpleFileOptions::default())?;
    io::copy(&mut fs::File::open(path)?, &mut writer)?;
    writer.finish()?;
    fs::remove_file(path)?;
    info!(path = %zip_path.display(), "result packaged as archive");
    Ok(zip_path)
}

/// Delete the parent directory of the computation's output recursively.
///
/// A missing directory signals an earlier packaging bug and is reported
/// rather than swallowed.
pub fn purge_working_dir(result_path: &Path) -> Result<(), PackageError> {
    let dir = result_path
        .parent()
        .ok_or_else(|| PackageError::MissingDirectory(result_path.to_path_buf()))?;
    if !dir.is_dir() {
        return Err(PackageError::MissingDirectory(dir.to_path_buf()));
    }
    info!(dir = %dir.display(), "purging working data");
    fs::remove_dir_all(dir)?;
    Ok(())
}

//! Moving or copying discarded files into a sibling subfolder.
//!
//! `/photos/trip/img_002.jpg` goes to `/photos/trip/DISCARDED/img_002.jpg`.
//! An existing file at the destination is never overwritten; the source is
//! left alone and the outcome is [`RelocateOutcome::Skipped`].

use anyhow::bail;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ItemError;
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelocateMode {
    Move,
    Copy,
}

impl FromStr for RelocateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "move" => Ok(RelocateMode::Move),
            "copy" => Ok(RelocateMode::Copy),
            other => bail!("Unknown relocate mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "destination", rename_all = "lowercase")]
pub enum RelocateOutcome {
    Moved(PathBuf),
    Copied(PathBuf),
    /// Destination already existed.
    Skipped(PathBuf),
}

/// Where `path` lands inside `subfolder` next to it.
pub fn destination_for(path: &Path, subfolder: &str) -> Result<PathBuf, ItemError> {
    let name = path.file_name().ok_or_else(|| {
        ItemError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(subfolder).join(name))
}

/// Blocking relocation of one file.
pub fn relocate(path: &Path, subfolder: &str, mode: RelocateMode) -> Result<RelocateOutcome, ItemError> {
    let dest = destination_for(path, subfolder)?;
    if dest.exists() {
        debug!(dest = %dest.display(), "destination exists, skipped");
        return Ok(RelocateOutcome::Skipped(dest));
    }
    if let Some(dir) = dest.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ItemError::io(dir, e))?;
    }

    match mode {
        RelocateMode::Copy => {
            std::fs::copy(path, &dest).map_err(|e| ItemError::io(path, e))?;
            Ok(RelocateOutcome::Copied(dest))
        }
        RelocateMode::Move => {
            if let Err(rename_err) = std::fs::rename(path, &dest) {
                // rename cannot cross filesystems; fall back to copy + remove
                if std::fs::copy(path, &dest).is_err() {
                    return Err(ItemError::io(path, rename_err));
                }
                std::fs::remove_file(path).map_err(|e| ItemError::io(path, e))?;
            }
            Ok(RelocateOutcome::Moved(dest))
        }
    }
}

#[derive(Debug, Default)]
pub struct RelocateReport {
    /// (source, outcome) in completion order.
    pub outcomes: Vec<(String, RelocateOutcome)>,
    pub failures: Vec<ItemError>,
}

impl RelocateReport {
    pub fn relocated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, RelocateOutcome::Skipped(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.relocated()
    }
}

/// Relocate every path with at most `workers` file operations in flight.
pub async fn relocate_all(
    paths: &[String],
    subfolder: &str,
    mode: RelocateMode,
    workers: usize,
    progress: &dyn ProgressReporter,
) -> RelocateReport {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for path in paths {
        let path = path.clone();
        let subfolder = subfolder.to_string();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let source = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                relocate(Path::new(&path), &subfolder, mode)
            })
            .await
            .map_err(ItemError::from)
            .and_then(|r| r);
            (source, result)
        });
    }

    let total = paths.len() as u64;
    let mut done = 0u64;
    let mut report = RelocateReport::default();
    while let Some(joined) = tasks.join_next().await {
        done += 1;
        match joined {
            Ok((source, Ok(outcome))) => report.outcomes.push((source, outcome)),
            Ok((source, Err(e))) => {
                warn!(path = %source, error = %e, "relocation failed");
                report.failures.push(e);
            }
            Err(e) => {
                warn!(error = %e, "relocation task failed");
                report.failures.push(ItemError::from(e));
            }
        }
        progress.report(ProgressEvent::Relocating { n: done, total });
    }

    report
}

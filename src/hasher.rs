//! Content fingerprints for scanned files.
//!
//! Each file is streamed through SHA-256 on the blocking pool, with at most
//! `workers` files in flight. Unreadable files, and files whose path is not
//! valid UTF-8, are reported in [`HashReport::failures`] and left out of
//! [`HashReport::images`].

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use snap_sweep_core::models::ImageRef;

use crate::error::ItemError;
use crate::progress::{ProgressEvent, ProgressReporter};

const READ_CHUNK: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct HashReport {
    /// Sorted by path.
    pub images: Vec<ImageRef>,
    pub failures: Vec<ItemError>,
}

/// Stream one file through SHA-256 in 1 MiB reads.
pub fn hash_file(path: &Path) -> Result<String, ItemError> {
    let mut file = std::fs::File::open(path).map_err(|e| ItemError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| ItemError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash every path concurrently.
pub async fn hash_files(
    paths: &[PathBuf],
    workers: usize,
    progress: &dyn ProgressReporter,
) -> HashReport {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut report = HashReport::default();

    for path in paths {
        // The index and every later stage address files by string path.
        let Some(key) = path.to_str().map(str::to_string) else {
            let e = ItemError::NonUtf8Path { path: path.clone() };
            warn!(error = %e, "file skipped");
            report.failures.push(e);
            continue;
        };
        let path = path.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = tokio::task::spawn_blocking(move || hash_file(&path))
                .await
                .map_err(ItemError::from)
                .and_then(|r| r);
            (key, result)
        });
    }

    let total = paths.len() as u64;
    let mut done = report.failures.len() as u64;
    while let Some(joined) = tasks.join_next().await {
        done += 1;
        match joined {
            Ok((key, Ok(hash))) => report.images.push(ImageRef::new(key, hash)),
            Ok((_, Err(e))) => {
                warn!(error = %e, "hashing failed, file skipped");
                report.failures.push(e);
            }
            Err(e) => {
                warn!(error = %e, "hashing task failed");
                report.failures.push(ItemError::from(e));
            }
        }
        progress.report(ProgressEvent::Hashing { n: done, total });
    }

    report.images.sort();
    report
}

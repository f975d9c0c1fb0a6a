//! Image discovery under a root directory.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;

/// Bytes read from each candidate for format sniffing.
const SNIFF_LEN: usize = 32;

/// Walk `root` and return every image file, sorted.
///
/// A file qualifies when its extension is in `scan.extensions` and its
/// header is recognised by [`image::guess_format`]. Directories named
/// `skip_dir` (the relocation subfolder) are not descended into. The
/// returned paths are absolute.
pub fn scan_images(root: &Path, scan: &ScanConfig, skip_dir: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Directory does not exist: {}", root.display());
    }
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Failed to resolve {}", root.display()))?;

    let exclude_set = build_globset(&scan.exclude_globs)?;
    let extensions: HashSet<String> = scan
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut walker = WalkDir::new(&root).follow_links(scan.follow_symlinks);
    if !scan.include_subdirs {
        walker = walker.max_depth(1);
    }

    let mut images = Vec::new();
    let entries = walker
        .into_iter()
        .filter_entry(|e| !(e.depth() > 0 && e.file_type().is_dir() && e.file_name() == skip_dir));
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        let ext_ok = path
            .extension()
            .map(|e| extensions.contains(&e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or(false);
        if !ext_ok {
            continue;
        }

        match sniff_image(path) {
            Ok(true) => images.push(path.to_path_buf()),
            Ok(false) => debug!(path = %path.display(), "not an image, skipped"),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read file, skipped"),
        }
    }

    images.sort();
    Ok(images)
}

/// Check the file header against the formats `image` knows.
fn sniff_image(path: &Path) -> std::io::Result<bool> {
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    std::fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buf)?;
    Ok(image::guess_format(&buf).is_ok())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

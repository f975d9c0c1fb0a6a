//! Drop mined pairs whose files are gone.

use std::path::Path;
use tracing::debug;

use snap_sweep_core::models::SimilarityPair;

/// Keep only pairs whose two paths both exist right now. Order is preserved.
pub fn filter_existing(pairs: Vec<SimilarityPair>) -> Vec<SimilarityPair> {
    pairs
        .into_iter()
        .filter(|pair| {
            let keep = Path::new(&pair.path_a).exists() && Path::new(&pair.path_b).exists();
            if !keep {
                debug!(a = %pair.path_a, b = %pair.path_b, "stale pair dropped");
            }
            keep
        })
        .collect()
}

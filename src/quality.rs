//! Image quality scoring.
//!
//! A [`QualityScorer`] maps a grayscale image to a higher-is-better score.
//! Scorers take `&mut self` and are not assumed to be thread-safe; the
//! comparator serializes calls behind a mutex. Decoding and resizing happen
//! in [`ImageLoader`], which may run concurrently and keeps a bounded LRU of
//! prepared images.

use anyhow::{bail, Result};
use image::imageops::FilterType;
use image::GrayImage;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::ItemError;

/// Laplacian variance that maps to a normalized sharpness of 1.0.
const SHARPNESS_SCALE: f64 = 1000.0;

pub trait QualityScorer: Send {
    fn name(&self) -> &str;
    fn score(&mut self, image: &GrayImage) -> Result<f64>;
}

/// Variance of the 3×3 Laplacian response. Blurry images score low.
pub struct SharpnessScorer;

impl QualityScorer for SharpnessScorer {
    fn name(&self) -> &str {
        "sharpness"
    }

    fn score(&mut self, image: &GrayImage) -> Result<f64> {
        ensure_scorable(image)?;
        Ok(laplacian_variance(image))
    }
}

/// `0.7 × normalized sharpness + 0.3 × exposure`, in `[0, 1]`.
pub struct CompositeScorer;

impl QualityScorer for CompositeScorer {
    fn name(&self) -> &str {
        "composite"
    }

    fn score(&mut self, image: &GrayImage) -> Result<f64> {
        ensure_scorable(image)?;
        let sharpness = (laplacian_variance(image) / SHARPNESS_SCALE).min(1.0);
        Ok(0.7 * sharpness + 0.3 * exposure(image))
    }
}

pub fn create_scorer(name: &str) -> Result<Box<dyn QualityScorer>> {
    match name {
        "sharpness" => Ok(Box::new(SharpnessScorer)),
        "composite" => Ok(Box::new(CompositeScorer)),
        other => bail!("Unknown quality scorer: {}", other),
    }
}

fn ensure_scorable(image: &GrayImage) -> Result<()> {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        bail!("image too small to score ({}x{})", w, h);
    }
    Ok(())
}

pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| image.get_pixel(x, y)[0] as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let response =
                4.0 * px(x, y) - px(x - 1, y) - px(x + 1, y) - px(x, y - 1) - px(x, y + 1);
            sum += response;
            sum_sq += response * response;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

/// 1.0 at mid-gray mean luminance, falling linearly to 0.0 at black or white.
pub fn exposure(image: &GrayImage) -> f64 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let mean = pixels.iter().map(|p| *p as f64).sum::<f64>() / pixels.len() as f64;
    (1.0 - (mean / 255.0 - 0.5).abs() * 2.0).max(0.0)
}

type CacheKey = (PathBuf, u32);

/// Decodes images to grayscale, shrinking them to fit `resize` pixels.
pub struct ImageLoader {
    resize: u32,
    cache: Option<Mutex<LruCache<CacheKey, Arc<GrayImage>>>>,
}

impl ImageLoader {
    /// `resize = 0` keeps original dimensions; `cache_entries = 0` disables caching.
    pub fn new(resize: u32, cache_entries: usize) -> Self {
        Self {
            resize,
            cache: NonZeroUsize::new(cache_entries).map(|n| Mutex::new(LruCache::new(n))),
        }
    }

    /// Blocking; call from a worker thread.
    pub fn load(&self, path: &Path) -> Result<Arc<GrayImage>, ItemError> {
        let key = (path.to_path_buf(), self.resize);
        if let Some(cache) = &self.cache {
            let mut cache = cache
                .lock()
                .map_err(|_| ItemError::Worker("image cache lock poisoned".into()))?;
            if let Some(hit) = cache.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }

        let image = Arc::new(self.decode(path)?);

        if let Some(cache) = &self.cache {
            let mut cache = cache
                .lock()
                .map_err(|_| ItemError::Worker("image cache lock poisoned".into()))?;
            cache.put(key, Arc::clone(&image));
        }
        Ok(image)
    }

    fn decode(&self, path: &Path) -> Result<GrayImage, ItemError> {
        let image = image::open(path).map_err(|e| match e {
            image::ImageError::IoError(source) => ItemError::io(path, source),
            other => ItemError::Decode {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })?;

        let image = if self.resize > 0 && image.width().max(image.height()) > self.resize {
            image.resize(self.resize, self.resize, FilterType::Triangle)
        } else {
            image
        };
        Ok(image.to_luma8())
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.lock().map(|c| c.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::TempDir;

    fn checkerboard(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn flat_image_has_zero_sharpness() {
        let flat = GrayImage::from_pixel(16, 16, Luma([120]));
        assert_eq!(laplacian_variance(&flat), 0.0);
        assert!(laplacian_variance(&checkerboard(16)) > 1000.0);
    }

    #[test]
    fn sharp_beats_blurred() {
        let sharp = checkerboard(32);
        let blurred = image::imageops::blur(&sharp, 2.0);
        let mut scorer = SharpnessScorer;
        assert!(scorer.score(&sharp).unwrap() > scorer.score(&blurred).unwrap());
    }

    #[test]
    fn exposure_peaks_at_mid_gray() {
        assert!((exposure(&GrayImage::from_pixel(4, 4, Luma([128]))) - 1.0).abs() < 0.01);
        assert_eq!(exposure(&GrayImage::from_pixel(4, 4, Luma([0]))), 0.0);
        assert_eq!(exposure(&GrayImage::from_pixel(4, 4, Luma([255]))), 0.0);
    }

    #[test]
    fn composite_is_bounded() {
        let mut scorer = CompositeScorer;
        let score = scorer.score(&checkerboard(16)).unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn tiny_images_are_rejected() {
        let mut scorer = SharpnessScorer;
        assert!(scorer.score(&GrayImage::new(2, 2)).is_err());
    }

    #[test]
    fn loader_resizes_and_caches() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.png");
        GrayImage::from_pixel(200, 100, Luma([90])).save(&path).unwrap();

        let loader = ImageLoader::new(50, 4);
        let first = loader.load(&path).unwrap();
        assert_eq!(first.dimensions(), (50, 25));
        assert_eq!(loader.cached(), 1);

        let second = loader.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn loader_reports_decode_and_io_errors() {
        let tmp = TempDir::new().unwrap();
        let junk = tmp.path().join("junk.png");
        std::fs::write(&junk, b"not a png").unwrap();

        let loader = ImageLoader::new(0, 0);
        assert!(matches!(loader.load(&junk), Err(ItemError::Decode { .. })));
        assert!(matches!(
            loader.load(&tmp.path().join("missing.png")),
            Err(ItemError::Io { .. })
        ));
    }

    #[test]
    fn create_scorer_by_name() {
        assert_eq!(create_scorer("sharpness").unwrap().name(), "sharpness");
        assert_eq!(create_scorer("composite").unwrap().name(), "composite");
        assert!(create_scorer("brisque").is_err());
    }
}

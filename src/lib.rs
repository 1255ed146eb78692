//! Per-frame fisheye lens correction with a persistent remap cache.
//!
//! The engine remaps pixels from a circular fisheye region of a source
//! raster onto a rectified destination raster, using one of several
//! interchangeable projection models (see [`CorrectionVariant`]). The
//! per-pixel trigonometry only depends on the configuration, never on the
//! frame content, so the resulting destination-to-source coordinate table
//! is memoized in a [`RemapTable`] and persisted to disk keyed by
//! [`CorrectParams::config_hash`]. Repeated runs with an unchanged
//! configuration replay the stored table and skip the trigonometry
//! entirely.
//!
//! Video decode and encode, per-frame cropping to the disc's bounding
//! square, and panorama stitching are the caller's concern; the engine
//! only consumes a source buffer, a destination buffer, and a descriptor.
//!
//! # Example
//!
//! ```
//! use defish::nalgebra::Point2;
//! use defish::{CorrectParams, CorrectionVariant, Corrector, DistanceMapping};
//!
//! let src = image::RgbImage::new(300, 300);
//! let mut dst = image::RgbImage::new(300, 150);
//! let params = CorrectParams::new(
//!     CorrectionVariant::LongLatReversed,
//!     Point2::new(150, 150),
//!     100,
//!     DistanceMapping::LongitudeLatitude,
//! )
//! .with_cache(false);
//! let report = Corrector::default().correct(&src, &mut dst, &params).unwrap();
//! assert!(!report.cache_hit);
//! ```

mod params;
mod projection;
mod remap;

pub use params::{CorrectParams, CorrectionVariant, DistanceMapping};
pub use remap::{PixelPos, RemapTable};

pub use nalgebra;

use image::RgbImage;
use log::{debug, info};
use nalgebra::Point2;
use projection::{Direction, Geometry, Projection};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors. These are the only errors that abort a
/// correction; cache I/O trouble degrades to recomputation instead.
#[derive(Debug, Error)]
pub enum CorrectError {
    #[error("correction variant {0:?} is not implemented by this engine")]
    UnsupportedVariant(CorrectionVariant),
    #[error("invalid fisheye geometry: {0}")]
    InvalidGeometry(String),
}

/// What one [`Corrector::correct`] call did.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectReport {
    /// True when the frame was produced by replaying a remap table
    /// instead of evaluating the projection per pixel.
    pub cache_hit: bool,
    /// Number of destination pixels written.
    pub pixels_mapped: usize,
}

/// The correction engine: selects a projection model, drives the
/// per-pixel loop, and coordinates with the remap cache.
///
/// One instance owns one in-memory [`RemapTable`] and is meant for
/// single-threaded, frame-by-frame use. The cache directory is injected
/// at construction; [`Corrector::default`] uses the system temporary
/// directory.
pub struct Corrector {
    cache_dir: PathBuf,
    remap: RemapTable,
    active_hash: Option<u32>,
}

impl Default for Corrector {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl Corrector {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            remap: RemapTable::new(),
            active_hash: None,
        }
    }

    /// Directory holding the persisted remap files.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The in-memory remap table built or loaded by the last call.
    pub fn remap_table(&self) -> &RemapTable {
        &self.remap
    }

    /// Corrects one frame.
    ///
    /// Writes into `dst` in place; destination pixels outside the
    /// projection domain are left as the caller initialized them, so
    /// pre-fill `dst` (for example with black) when full coverage
    /// matters. When caching is enabled and the table was freshly built,
    /// a cache file is created or overwritten on disk.
    ///
    /// # Arguments
    /// * `src` - the source frame, cropped to the disc's bounding square.
    /// * `dst` - the destination frame; its dimensions define the
    ///   rectified raster.
    /// * `params` - the correction configuration.
    pub fn correct(
        &mut self,
        src: &RgbImage,
        dst: &mut RgbImage,
        params: &CorrectParams,
    ) -> Result<CorrectReport, CorrectError> {
        validate(src, params)?;
        let hash = params.config_hash();
        // A table built for a different configuration must never leak
        // into this one.
        if self.active_hash != Some(hash) {
            self.remap.clear();
            self.active_hash = Some(hash);
        }
        if params.use_cache {
            self.remap.load(&self.cache_dir, hash);
            if self.remap.is_usable() {
                let pixels_mapped = self.remap.len();
                self.remap.apply(src, dst);
                debug!("cache hit for configuration {:x}", hash);
                return Ok(CorrectReport {
                    cache_hit: true,
                    pixels_mapped,
                });
            }
        }

        let (projection, direction) =
            projection::dispatch(params).ok_or(CorrectError::UnsupportedVariant(params.variant))?;
        let geom = Geometry {
            center: Point2::new(params.center.x as f64, params.center.y as f64),
            radius: params.radius as f64,
            rect_w: dst.width() as f64,
            rect_h: dst.height() as f64,
        };
        let pixels_mapped = match direction {
            Direction::Reversed => self.pull_pixels(src, dst, &projection, &geom, params.use_cache),
            Direction::Forward => self.push_pixels(src, dst, &projection, &geom, params.use_cache),
        };
        info!(
            "corrected frame with {:?}: {} pixels mapped",
            params.variant, pixels_mapped
        );
        if params.use_cache && self.remap.is_usable() {
            self.remap.persist(&self.cache_dir, hash);
        }
        Ok(CorrectReport {
            cache_hit: false,
            pixels_mapped,
        })
    }

    /// Miss path for reversed variants: every destination pixel pulls its
    /// source pixel through the projection's reverse direction.
    fn pull_pixels(
        &mut self,
        src: &RgbImage,
        dst: &mut RgbImage,
        projection: &Projection,
        geom: &Geometry,
        record: bool,
    ) -> usize {
        let (src_w, src_h) = src.dimensions();
        let mut mapped = 0;
        for i in 0..dst.height() {
            for j in 0..dst.width() {
                let pos = match projection.reverse(Point2::new(j as f64, i as f64), geom) {
                    Some(pos) => pos,
                    None => continue,
                };
                let sj = pos.x.round() as i64;
                let si = pos.y.round() as i64;
                if sj < 0 || si < 0 || sj >= src_w as i64 || si >= src_h as i64 {
                    continue;
                }
                dst.put_pixel(j, i, *src.get_pixel(sj as u32, si as u32));
                if record {
                    self.remap
                        .record((si as i32, sj as i32), (i as i32, j as i32));
                }
                mapped += 1;
            }
        }
        mapped
    }

    /// Miss path for forward variants: every source pixel inside the disc
    /// pushes its value to the destination pixel the projection yields.
    fn push_pixels(
        &mut self,
        src: &RgbImage,
        dst: &mut RgbImage,
        projection: &Projection,
        geom: &Geometry,
        record: bool,
    ) -> usize {
        let (dst_w, dst_h) = dst.dimensions();
        let mut mapped = 0;
        for i in 0..src.height() {
            for j in 0..src.width() {
                let pos = match projection.forward(Point2::new(j as f64, i as f64), geom) {
                    Some(pos) => pos,
                    None => continue,
                };
                let dj = pos.x.round() as i64;
                let di = pos.y.round() as i64;
                if dj < 0 || di < 0 || dj >= dst_w as i64 || di >= dst_h as i64 {
                    continue;
                }
                dst.put_pixel(dj as u32, di as u32, *src.get_pixel(j, i));
                if record {
                    self.remap
                        .record((i as i32, j as i32), (di as i32, dj as i32));
                }
                mapped += 1;
            }
        }
        mapped
    }
}

fn validate(src: &RgbImage, params: &CorrectParams) -> Result<(), CorrectError> {
    if params.variant == CorrectionVariant::ExternalLibrary {
        return Err(CorrectError::UnsupportedVariant(params.variant));
    }
    if params.radius <= 0 {
        return Err(CorrectError::InvalidGeometry(format!(
            "radius must be positive, got {}",
            params.radius
        )));
    }
    let (src_w, src_h) = src.dimensions();
    if params.center.x < 0
        || params.center.y < 0
        || params.center.x as u32 >= src_w
        || params.center.y as u32 >= src_h
    {
        return Err(CorrectError::InvalidGeometry(format!(
            "disc center ({}, {}) outside the {}x{} source raster",
            params.center.x, params.center.y, src_w, src_h
        )));
    }
    if params.variant.is_unfixed() {
        let w = params.field_angle;
        if !(w.x > 0.0 && w.x < PI && w.y > 0.0 && w.y < PI) {
            return Err(CorrectError::InvalidGeometry(format!(
                "field angle ({}, {}) outside (0, pi)",
                w.x, w.y
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    fn params(variant: CorrectionVariant) -> CorrectParams {
        CorrectParams::new(
            variant,
            Point2::new(150, 150),
            100,
            DistanceMapping::LongitudeLatitude,
        )
        .with_cache(false)
    }

    #[test]
    fn external_library_variant_is_rejected() {
        let src = RgbImage::new(300, 300);
        let mut dst = RgbImage::new(300, 300);
        let err = Corrector::default()
            .correct(&src, &mut dst, &params(CorrectionVariant::ExternalLibrary))
            .unwrap_err();
        assert!(matches!(err, CorrectError::UnsupportedVariant(_)));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let src = RgbImage::new(300, 300);
        let mut dst = RgbImage::new(300, 300);
        let mut corrector = Corrector::default();

        let mut bad = params(CorrectionVariant::LongLatReversed);
        bad.radius = 0;
        assert!(matches!(
            corrector.correct(&src, &mut dst, &bad),
            Err(CorrectError::InvalidGeometry(_))
        ));

        let mut bad = params(CorrectionVariant::LongLatReversed);
        bad.center = Point2::new(400, 150);
        assert!(matches!(
            corrector.correct(&src, &mut dst, &bad),
            Err(CorrectError::InvalidGeometry(_))
        ));

        let bad = params(CorrectionVariant::LongLatLensedUnfixedReversed)
            .with_field_angle(Vector2::new(4.0, 1.0));
        assert!(matches!(
            corrector.correct(&src, &mut dst, &bad),
            Err(CorrectError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn every_supported_variant_maps_pixels() {
        let src = RgbImage::from_pixel(300, 300, image::Rgb([40, 80, 120]));
        let variants = [
            CorrectionVariant::BasicForward,
            CorrectionVariant::BasicReversed,
            CorrectionVariant::LongLatForward,
            CorrectionVariant::LongLatReversed,
            CorrectionVariant::PerspectiveLongLatLensedForward,
            CorrectionVariant::PerspectiveLongLatLensedReversed,
            CorrectionVariant::LongLatLensedUnfixedForward,
            CorrectionVariant::LongLatLensedUnfixedReversed,
        ];
        for variant in variants {
            let mut dst = RgbImage::new(300, 300);
            let report = Corrector::default()
                .correct(&src, &mut dst, &params(variant))
                .unwrap();
            assert!(!report.cache_hit);
            assert!(report.pixels_mapped > 0, "{variant:?} mapped nothing");
        }
    }

    #[test]
    fn changing_the_configuration_drops_the_stale_table() {
        let src = RgbImage::from_pixel(300, 300, image::Rgb([40, 80, 120]));
        let mut dst = RgbImage::new(300, 150);
        let dir = tempfile::tempdir().unwrap();
        let mut corrector = Corrector::new(dir.path());

        let a = params(CorrectionVariant::LongLatReversed).with_cache(true);
        corrector.correct(&src, &mut dst, &a).unwrap();
        let first_len = corrector.remap_table().len();
        assert!(first_len > 0);

        let mut b = a;
        b.radius = 90;
        let report = corrector.correct(&src, &mut dst, &b).unwrap();
        // A fresh table was built for the new geometry, not replayed.
        assert!(!report.cache_hit);
    }
}

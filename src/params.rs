use nalgebra::{Point2, Vector2};
use std::f64::consts::FRAC_PI_2;

/// Selects one of the projection families together with the direction in
/// which the per-pixel loop runs.
///
/// `Forward` variants walk the source raster and push pixels into the
/// destination; `Reversed` variants walk the destination raster and pull
/// pixels out of the source. The reversed direction gives gap-free output
/// and is the one the per-frame pipeline normally uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrectionVariant {
    /// Angle-preserving radial rescale between the disc and the output
    /// raster. No spherical geometry.
    BasicForward,
    BasicReversed,

    /// Equirectangular (longitude-latitude) unwrap of the fisheye disc.
    LongLatForward,
    LongLatReversed,

    /// Longitude-latitude unwrap with a perspective correction modeling a
    /// lens with a right-angle field of view.
    PerspectiveLongLatLensedForward,
    PerspectiveLongLatLensedReversed,

    /// Lens-model unwrap whose field angle comes from
    /// [`CorrectParams::field_angle`] instead of being fixed, with a
    /// camera-tilt rotation step on the unit sphere.
    LongLatLensedUnfixedForward,
    LongLatLensedUnfixedReversed,

    /// Reserved tag for a correction performed by an external library.
    /// This engine rejects it as a configuration error.
    ExternalLibrary,
}

impl CorrectionVariant {
    /// True for the two variants that read the free field-angle pair.
    pub fn is_unfixed(self) -> bool {
        matches!(
            self,
            CorrectionVariant::LongLatLensedUnfixedForward
                | CorrectionVariant::LongLatLensedUnfixedReversed
        )
    }

    fn tag(self) -> u32 {
        self as u32
    }
}

/// The law converting a normalized raster coordinate into a spherical
/// angle inside the longitude-latitude families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceMapping {
    /// Linear in the angle: equal raster steps are equal angle steps.
    LongitudeLatitude,
    /// Perspective: equal raster steps are equal steps on a flat image
    /// plane, converted to angles through an arctangent.
    Perspective,
}

/// Immutable descriptor of one correction configuration.
///
/// Two descriptors are equal iff the variant, disc geometry, distance
/// mapping and caching flag all match, and - only when the variant is one
/// of the two unfixed variants - the field-angle pair also matches after
/// rounding to 4 decimal digits. [`CorrectParams::config_hash`] follows the
/// same rule, so equal descriptors always hash equal and descriptors that
/// differ only in `field_angle` under a non-unfixed variant share a hash.
#[derive(Debug, Clone, Copy)]
pub struct CorrectParams {
    pub variant: CorrectionVariant,
    pub distance_mapping: DistanceMapping,
    /// Center of the fisheye disc, in source pixel coordinates.
    pub center: Point2<i32>,
    /// Radius of the fisheye disc in pixels. Must be positive.
    pub radius: i32,
    /// Free field-angle pair `(horizontal, vertical)` in radians. Read
    /// only by the unfixed variants; each component must lie in (0, pi).
    pub field_angle: Vector2<f64>,
    /// Whether the engine may consult and populate the persisted cache.
    pub use_cache: bool,
}

const GOLDEN_RATIO: u32 = 0x9e37_79b9;

/// One step of the additive golden-ratio mix used for the cache key.
fn mix(hash: u32, field: u32) -> u32 {
    hash.wrapping_add(GOLDEN_RATIO.wrapping_add((field << 6).wrapping_add(field >> 2)))
}

/// Rounds to 4 decimal digits, the precision at which the field angle
/// participates in equality and hashing.
fn round4(value: f64) -> i64 {
    (value * 1e4).round() as i64
}

impl CorrectParams {
    pub fn new(
        variant: CorrectionVariant,
        center: Point2<i32>,
        radius: i32,
        distance_mapping: DistanceMapping,
    ) -> Self {
        Self {
            variant,
            distance_mapping,
            center,
            radius,
            field_angle: Vector2::new(FRAC_PI_2, FRAC_PI_2),
            use_cache: true,
        }
    }

    pub fn with_field_angle(self, field_angle: Vector2<f64>) -> Self {
        Self {
            field_angle,
            ..self
        }
    }

    pub fn with_cache(self, use_cache: bool) -> Self {
        Self { use_cache, ..self }
    }

    /// Deterministic fingerprint used to name the persisted remap file.
    ///
    /// The caching flag participates in equality but not in the hash, so
    /// toggling it never invalidates a persisted table.
    pub fn config_hash(&self) -> u32 {
        let mut hash = self.variant.tag();
        hash = mix(hash, self.center.x as u32);
        hash = mix(hash, self.center.y as u32);
        hash = mix(hash, self.radius as u32);
        hash = mix(hash, self.distance_mapping as u32);
        if self.variant.is_unfixed() {
            hash = mix(hash, round4(self.field_angle.x) as u32);
            hash = mix(hash, round4(self.field_angle.y) as u32);
        }
        hash
    }
}

impl PartialEq for CorrectParams {
    fn eq(&self, other: &Self) -> bool {
        let base = self.variant == other.variant
            && self.distance_mapping == other.distance_mapping
            && self.center == other.center
            && self.radius == other.radius
            && self.use_cache == other.use_cache;
        if !base {
            return false;
        }
        if self.variant.is_unfixed() {
            round4(self.field_angle.x) == round4(other.field_angle.x)
                && round4(self.field_angle.y) == round4(other.field_angle.y)
        } else {
            true
        }
    }
}

impl Eq for CorrectParams {}

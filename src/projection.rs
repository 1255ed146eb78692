//! The family of coordinate-transform models.
//!
//! Every model is a bidirectional map between a source pixel inside the
//! fisheye disc and a destination pixel on the rectified raster. The
//! sphere-based families go through a longitude/latitude pair: the
//! destination column picks a longitude, the destination row picks a
//! latitude through an axis law, and the resulting unit-sphere point is
//! projected orthographically onto the disc.
//!
//! Both directions return `None` for coordinates outside the valid disc or
//! outside the lens field-of-view window; they never produce NaN. All
//! inverse-trigonometric arguments are clamped to `[-1, 1]` so that
//! floating-point overshoot at the disc rim cannot leave the domain.

use crate::params::{CorrectParams, CorrectionVariant, DistanceMapping};
use nalgebra::{Point2, Rotation3, Vector2, Vector3};
use std::f64::consts::{FRAC_PI_2, PI};

/// Camera-tilt compensation applied on the unit sphere by the unfixed
/// family, as a rotation about the vertical then the horizontal axis.
/// Both angles are zero for a level camera.
const TILT_LEFT: f64 = 0.0;
const TILT_UP: f64 = 0.0;

/// Below this sine magnitude a point counts as sitting on a pole, where
/// the longitude is undefined.
const SIN_EPS: f64 = 1e-12;

/// Slack on the squared-distance disc test. Points produced by the
/// reverse direction can land on the rim with their squared radius one
/// rounding step above 1.
const RIM_EPS: f64 = 1e-9;

fn clamp_unit(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

fn tilt_rotation() -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), TILT_LEFT)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), TILT_UP)
}

/// Geometry shared by every transform: the disc in the source raster and
/// the dimensions of the rectified raster.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub center: Point2<f64>,
    pub radius: f64,
    pub rect_w: f64,
    pub rect_h: f64,
}

impl Geometry {
    fn rect_center(&self) -> Point2<f64> {
        Point2::new((self.rect_w - 1.0) / 2.0, (self.rect_h - 1.0) / 2.0)
    }

    fn rect_radius(&self) -> f64 {
        self.rect_w.min(self.rect_h) / 2.0
    }

    /// Pixel spans used to normalize raster coordinates into [0, 1].
    fn spans(&self) -> (f64, f64) {
        ((self.rect_w - 1.0).max(1.0), (self.rect_h - 1.0).max(1.0))
    }
}

/// Which raster drives the per-pixel loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Walk the source disc, pushing pixels into the destination.
    Forward,
    /// Walk the destination raster, pulling pixels out of the source.
    Reversed,
}

/// Law converting a normalized raster coordinate into an angle in (0, pi).
#[derive(Debug, Clone, Copy)]
enum AxisLaw {
    Linear,
    Perspective { half_tan: f64 },
}

impl AxisLaw {
    fn perspective(field_angle: f64) -> Self {
        AxisLaw::Perspective {
            half_tan: (field_angle / 2.0).tan(),
        }
    }

    fn angle(self, t: f64) -> f64 {
        match self {
            AxisLaw::Linear => PI * t,
            AxisLaw::Perspective { half_tan } => FRAC_PI_2 + ((2.0 * t - 1.0) * half_tan).atan(),
        }
    }

    /// Inverse of [`AxisLaw::angle`]. Leaves [0, 1] when the angle falls
    /// outside the field-of-view window.
    fn coord(self, angle: f64) -> f64 {
        match self {
            AxisLaw::Linear => angle / PI,
            AxisLaw::Perspective { half_tan } => ((angle - FRAC_PI_2).tan() / half_tan + 1.0) / 2.0,
        }
    }
}

fn latitude_law(mode: DistanceMapping, field_angle: f64) -> AxisLaw {
    match mode {
        DistanceMapping::LongitudeLatitude => AxisLaw::Linear,
        DistanceMapping::Perspective => AxisLaw::perspective(field_angle),
    }
}

/// Closed union of the four projection families.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Projection {
    Basic,
    LongLat {
        mode: DistanceMapping,
    },
    PerspectiveLensed {
        mode: DistanceMapping,
    },
    LensedUnfixed {
        mode: DistanceMapping,
        field_angle: Vector2<f64>,
    },
}

/// Maps a descriptor onto the projection family and loop direction it
/// selects. `None` for the reserved external-library tag.
pub(crate) fn dispatch(params: &CorrectParams) -> Option<(Projection, Direction)> {
    use CorrectionVariant::*;
    let mode = params.distance_mapping;
    let pair = match params.variant {
        BasicForward => (Projection::Basic, Direction::Forward),
        BasicReversed => (Projection::Basic, Direction::Reversed),
        LongLatForward => (Projection::LongLat { mode }, Direction::Forward),
        LongLatReversed => (Projection::LongLat { mode }, Direction::Reversed),
        PerspectiveLongLatLensedForward => {
            (Projection::PerspectiveLensed { mode }, Direction::Forward)
        }
        PerspectiveLongLatLensedReversed => {
            (Projection::PerspectiveLensed { mode }, Direction::Reversed)
        }
        LongLatLensedUnfixedForward => (
            Projection::LensedUnfixed {
                mode,
                field_angle: params.field_angle,
            },
            Direction::Forward,
        ),
        LongLatLensedUnfixedReversed => (
            Projection::LensedUnfixed {
                mode,
                field_angle: params.field_angle,
            },
            Direction::Reversed,
        ),
        ExternalLibrary => return None,
    };
    Some(pair)
}

impl Projection {
    /// Longitude and latitude laws of the sphere-based families, `None`
    /// for the basic radial remap.
    fn axis_laws(self) -> Option<(AxisLaw, AxisLaw)> {
        match self {
            Projection::Basic => None,
            Projection::LongLat { mode } => Some((AxisLaw::Linear, latitude_law(mode, FRAC_PI_2))),
            Projection::PerspectiveLensed { mode } => Some((
                AxisLaw::perspective(FRAC_PI_2),
                latitude_law(mode, FRAC_PI_2),
            )),
            Projection::LensedUnfixed { mode, field_angle } => Some((
                AxisLaw::perspective(field_angle.x),
                latitude_law(mode, field_angle.y),
            )),
        }
    }

    fn tilted(self) -> bool {
        matches!(self, Projection::LensedUnfixed { .. })
    }

    /// Source pixel from a destination pixel.
    pub(crate) fn reverse(&self, dst: Point2<f64>, geom: &Geometry) -> Option<Point2<f64>> {
        let (lon_law, lat_law) = match self.axis_laws() {
            Some(laws) => laws,
            None => return basic_reverse(dst, geom),
        };
        let (span_x, span_y) = geom.spans();
        let lambda = lon_law.angle(dst.x / span_x);
        let phi = lat_law.angle(dst.y / span_y);
        let mut p = Vector3::new(phi.sin() * lambda.cos(), phi.cos(), phi.sin() * lambda.sin());
        if self.tilted() {
            p = tilt_rotation() * p;
        }
        Some(Point2::new(
            geom.center.x + geom.radius * p.x,
            geom.center.y + geom.radius * p.y,
        ))
    }

    /// Destination pixel from a source pixel. `None` outside the disc or
    /// outside the lens window.
    pub(crate) fn forward(&self, src: Point2<f64>, geom: &Geometry) -> Option<Point2<f64>> {
        let (lon_law, lat_law) = match self.axis_laws() {
            Some(laws) => laws,
            None => return basic_forward(src, geom),
        };
        let a = (src.x - geom.center.x) / geom.radius;
        let b = (src.y - geom.center.y) / geom.radius;
        let rr = a * a + b * b;
        if rr > 1.0 + RIM_EPS {
            return None;
        }
        // Lift onto the z >= 0 hemisphere.
        let mut p = Vector3::new(a, b, (1.0 - rr).max(0.0).sqrt());
        if self.tilted() {
            p = tilt_rotation().inverse() * p;
            if p.z < -SIN_EPS {
                // Tilted behind the visible hemisphere.
                return None;
            }
        }
        let phi = clamp_unit(p.y).acos();
        let sin_phi = phi.sin();
        let lambda = if sin_phi < SIN_EPS {
            // Pole: the longitude is undefined; pin it to the center column.
            FRAC_PI_2
        } else {
            clamp_unit(p.x / sin_phi).acos()
        };
        let u = lon_law.coord(lambda);
        let v = lat_law.coord(phi);
        // The acos/tan inversion can overshoot the window edge by a
        // rounding step; tolerate it and clamp, as with the rim test.
        if !(-RIM_EPS..=1.0 + RIM_EPS).contains(&u) || !(-RIM_EPS..=1.0 + RIM_EPS).contains(&v) {
            return None;
        }
        let (span_x, span_y) = geom.spans();
        Some(Point2::new(
            u.clamp(0.0, 1.0) * span_x,
            v.clamp(0.0, 1.0) * span_y,
        ))
    }
}

fn basic_reverse(dst: Point2<f64>, geom: &Geometry) -> Option<Point2<f64>> {
    let rect_center = geom.rect_center();
    let dx = dst.x - rect_center.x;
    let dy = dst.y - rect_center.y;
    let rect_radius = geom.rect_radius();
    if dx * dx + dy * dy > rect_radius * rect_radius {
        return None;
    }
    let scale = geom.radius / rect_radius;
    Some(Point2::new(
        geom.center.x + dx * scale,
        geom.center.y + dy * scale,
    ))
}

fn basic_forward(src: Point2<f64>, geom: &Geometry) -> Option<Point2<f64>> {
    let dx = src.x - geom.center.x;
    let dy = src.y - geom.center.y;
    if dx * dx + dy * dy > geom.radius * geom.radius {
        return None;
    }
    let scale = geom.rect_radius() / geom.radius;
    let rect_center = geom.rect_center();
    Some(Point2::new(
        rect_center.x + dx * scale,
        rect_center.y + dy * scale,
    ))
}

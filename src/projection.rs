//! Geographic <-> sphere-surface coordinate transforms
//!
//! The sphere uses the globe texture's conventions: +y is the north pole,
//! longitude is offset by 180 degrees so the texture seam sits at the
//! antimeridian, and x is negated so the prime meridian faces the default
//! camera.

use crate::error::GeoError;
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees.
///
/// Out-of-range values are accepted. Latitudes of exactly +/-90 project onto a
/// pole, where longitude carries no information.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lon)
    }
}

/// A point in the globe's model space.
///
/// Only meaningful for the radius it was computed with; entities keep their
/// points unchanged when the displayed body (and so the radius) changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CartesianPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CartesianPoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        DVec3::from(*self).length()
    }

    pub fn scale(&self, factor: f64) -> Self {
        (DVec3::from(*self) * factor).into()
    }

    /// Component-wise comparison within `eps`
    pub fn approx_eq(&self, other: &Self, eps: f64) -> bool {
        (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.z - other.z).abs() <= eps
    }
}

impl From<CartesianPoint> for DVec3 {
    fn from(p: CartesianPoint) -> Self {
        DVec3::new(p.x, p.y, p.z)
    }
}

impl From<DVec3> for CartesianPoint {
    fn from(v: DVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Radius of the currently displayed body. Always positive and finite.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct SphereRadius(f64);

impl SphereRadius {
    pub fn new(radius: f64) -> Result<Self, GeoError> {
        if radius.is_finite() && radius > 0.0 {
            Ok(Self(radius))
        } else {
            Err(GeoError::InvalidRadius(radius))
        }
    }

    /// For compile-time radii known to be positive.
    pub(crate) const fn constant(radius: f64) -> Self {
        Self(radius)
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

/// Project a geographic point onto the sphere surface.
pub fn forward(point: GeoPoint, radius: SphereRadius) -> CartesianPoint {
    let r = radius.get();
    let phi = (90.0 - point.lat).to_radians();
    let theta = (point.lon + 180.0).to_radians();

    CartesianPoint {
        x: -(r * phi.sin() * theta.cos()),
        y: r * phi.cos(),
        z: r * phi.sin() * theta.sin(),
    }
}

/// Recover the geographic point under a model-space point.
///
/// The point does not have to lie exactly on the sphere (ray hits are noisy);
/// the polar ratio is clamped before `acos`. Longitude at the poles is
/// whatever `atan2` yields for the residual x/z.
pub fn inverse(point: CartesianPoint, radius: SphereRadius) -> GeoPoint {
    let r = radius.get();
    let ratio = (point.y / r).clamp(-1.0, 1.0);
    let lat = 90.0 - ratio.acos().to_degrees();

    // atan2(x, z) sits 90 degrees ahead of the longitude for the forward
    // transform above, so shift it back before wrapping into range.
    let lon = (90.0 + point.x.atan2(point.z).to_degrees()).rem_euclid(360.0) - 180.0;
    let lon = if lon <= -180.0 { 180.0 } else { lon };

    GeoPoint::new(lat, lon)
}

/// `inverse` for callers holding a raw radius from the rendering engine.
pub fn inverse_raw(point: CartesianPoint, radius: f64) -> Result<GeoPoint, GeoError> {
    Ok(inverse(point, SphereRadius::new(radius)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radius(r: f64) -> SphereRadius {
        SphereRadius::new(r).unwrap()
    }

    #[test]
    fn round_trip_full_grid() {
        for r in [0.5, 5.0, 7.0] {
            let r = radius(r);
            for lat_step in -898..=898 {
                let lat = lat_step as f64 / 10.0;
                for lon_step in -1798..=1798 {
                    let lon = lon_step as f64 / 10.0;
                    let back = inverse(forward(GeoPoint::new(lat, lon), r), r);
                    assert!((back.lat() - lat).abs() < 1e-3, "lat {lat} lon {lon} -> {back:?}");
                    assert!((back.lon() - lon).abs() < 1e-3, "lat {lat} lon {lon} -> {back:?}");
                }
            }
        }
    }

    #[test]
    fn longitude_wrap_projects_to_same_point() {
        let r = radius(5.0);
        let east = forward(GeoPoint::new(10.0, 180.0), r);
        let west = forward(GeoPoint::new(10.0, -180.0), r);
        assert!(east.approx_eq(&west, 1e-9));
    }

    #[test]
    fn forward_lands_on_sphere() {
        let r = radius(3.5);
        let p = forward(GeoPoint::new(-33.86, 151.2), r);
        assert!((p.length() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn prime_meridian_faces_positive_x() {
        let p = forward(GeoPoint::new(0.0, 0.0), radius(5.0));
        assert!(p.approx_eq(&CartesianPoint::new(5.0, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn poles_ignore_longitude() {
        let r = radius(5.0);
        for lon in [-170.0, 0.0, 45.0, 180.0] {
            let north = forward(GeoPoint::new(90.0, lon), r);
            let south = forward(GeoPoint::new(-90.0, lon), r);
            assert!(north.approx_eq(&CartesianPoint::new(0.0, 5.0, 0.0), 1e-9));
            assert!(south.approx_eq(&CartesianPoint::new(0.0, -5.0, 0.0), 1e-9));
        }
    }

    #[test]
    fn inverse_at_pole_stays_in_range() {
        let g = inverse(CartesianPoint::new(0.0, 5.0, 0.0), radius(5.0));
        assert!((g.lat() - 90.0).abs() < 1e-9);
        assert!(g.lon() > -180.0 && g.lon() <= 180.0);
    }

    #[test]
    fn inverse_tolerates_points_off_the_sphere() {
        let g = inverse(CartesianPoint::new(0.0, 5.2, 0.0), radius(5.0));
        assert!(g.lat().is_finite());
        assert!((g.lat() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_radius_is_rejected() {
        assert_eq!(SphereRadius::new(0.0), Err(GeoError::InvalidRadius(0.0)));
        assert_eq!(SphereRadius::new(-1.0), Err(GeoError::InvalidRadius(-1.0)));
        assert!(SphereRadius::new(f64::NAN).is_err());
        assert!(inverse_raw(CartesianPoint::new(1.0, 0.0, 0.0), 0.0).is_err());
    }
}

//! Earth-related constants and functions
//!
//! This module contains the WGS84 ellipsoid constants and the Earth-geometry
//! functions that the error-state model and the strapdown mechanization both
//! depend on: principal radii of curvature, latitude/altitude-dependent
//! gravity (Somigliana method with free-air correction), the Earth rotation
//! rate and transport rate resolved in the local-level frame, and the
//! skew-symmetric helpers used throughout the matrix assembly. Positional
//! conversions between geodetic and ECEF coordinates lean on the
//! [`nav-types`](https://crates.io/crates/nav-types) crate; everything else is
//! built directly on `nalgebra`.
//!
//! All latitudes and longitudes in this module are in **radians**. The
//! error-state dynamics are radian-native (position error states are angular)
//! and keeping a single convention here avoids a whole class of unit bugs.
//!
//! # Known singularity
//! Several quantities carry `1/cos(latitude)` factors (longitude rates, the
//! east-channel position couplings). These denominators legitimately blow up
//! as the latitude approaches ±90°; that is a property of the local-level
//! mechanization, not a defect, and no guard is applied here. Callers
//! operating near the poles need a different frame.

use ::nalgebra::{Matrix3, Vector3};
use ::nav_types::{ECEF, WGS84};

// Earth constants (WGS84)
/// Earth's rotation rate rad/s ($\omega_{ie}$)
pub const RATE: f64 = 7.292115e-5;
/// Earth's rotation rate rad/s ($\omega_{ie}$) in a vector form
pub const RATE_VECTOR: Vector3<f64> = Vector3::new(0.0, 0.0, RATE);
/// Earth's equatorial radius (semi-major axis) in meters
pub const EQUATORIAL_RADIUS: f64 = 6378137.0; // meters
/// Earth's polar radius (semi-minor axis) in meters
pub const POLAR_RADIUS: f64 = 6356752.31425; // meters
/// Earth's eccentricity ($e$)
pub const ECCENTRICITY: f64 = 0.0818191908425; // unit-less
/// Earth's eccentricity squared ($e^2$)
pub const ECCENTRICITY_SQUARED: f64 = ECCENTRICITY * ECCENTRICITY;
/// Earth's gravitational acceleration at the equator ($g_e$) in $m/s^2$
pub const GE: f64 = 9.7803253359;
/// Earth's gravitational acceleration at the poles ($g_p$) in $m/s^2$
pub const GP: f64 = 9.8321849378;
/// Somigliana's constant ($K$)
pub const K: f64 = (POLAR_RADIUS * GP - EQUATORIAL_RADIUS * GE) / (EQUATORIAL_RADIUS * GE);

/// Convert a three-element vector to a skew-symmetric matrix
///
/// Groves' notation uses skew-symmetric matrices to represent cross products
/// and to perform more concise matrix operations (particularly rotations):
///
/// $$
/// x = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow X = \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// # Example
/// ```rust
/// use nalgebra::{Vector3, Matrix3};
/// use navfuse::earth;
/// let v: Vector3<f64> = Vector3::new(1.0, 2.0, 3.0);
/// let skew: Matrix3<f64> = earth::vector_to_skew_symmetric(&v);
/// ```
pub fn vector_to_skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    let mut skew: Matrix3<f64> = Matrix3::zeros();
    skew[(0, 1)] = -v[2];
    skew[(0, 2)] = v[1];
    skew[(1, 0)] = v[2];
    skew[(1, 2)] = -v[0];
    skew[(2, 0)] = -v[1];
    skew[(2, 1)] = v[0];
    skew
}
/// Convert a skew-symmetric matrix back to its three-element vector
///
/// Inverse operation of [`vector_to_skew_symmetric`].
pub fn skew_symmetric_to_vector(skew: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(skew[(2, 1)], skew[(0, 2)], skew[(1, 0)])
}

/// Calculate the principal radii of curvature
///
/// The meridian radius $R_M$ and the normal (prime-vertical) radius $R_N$
/// convert between angular position rates and linear velocities on the
/// ellipsoid. For the WGS84 ellipsoid $R_M \le R_N$ everywhere, with equality
/// only in the spherical limit.
///
/// # Parameters
/// - `latitude` - geodetic latitude in radians
///
/// # Returns
/// A tuple `(r_m, r_n)` in meters: the meridian radius of curvature and the
/// normal radius of curvature.
///
/// # Example
/// ```rust
/// use navfuse::earth;
/// let (r_m, r_n) = earth::radius(45.0_f64.to_radians());
/// assert!(r_m <= r_n);
/// ```
pub fn radius(latitude: f64) -> (f64, f64) {
    let sin_lat = latitude.sin();
    let sin_lat_sq = sin_lat * sin_lat;
    let denom = 1.0 - ECCENTRICITY_SQUARED * sin_lat_sq;
    let r_m = (EQUATORIAL_RADIUS * (1.0 - ECCENTRICITY_SQUARED)) / denom.powf(3.0 / 2.0);
    let r_n = EQUATORIAL_RADIUS / denom.sqrt();
    (r_m, r_n)
}

/// Geocentric radius with the eccentricity correction (Groves 2.137)
///
/// $$
/// r_{eS} = R_O \sqrt{\cos^2 L + (1 - e^2)^2 \sin^2 L}
/// $$
///
/// where $R_O = \sqrt{R_M R_N} + h$. Used by the gravity-gradient term in the
/// velocity-error dynamics.
pub fn geocentric_radius(latitude: f64, altitude: f64) -> f64 {
    let (r_m, r_n) = radius(latitude);
    let r_o = (r_m * r_n).sqrt() + altitude;
    let cos_lat = latitude.cos();
    let sin_lat = latitude.sin();
    let omes = 1.0 - ECCENTRICITY_SQUARED;
    r_o * (cos_lat * cos_lat + omes * omes * sin_lat * sin_lat).sqrt()
}

/// Calculate the WGS84 gravity scalar
///
/// [Somigliana method](https://en.wikipedia.org/wiki/Theoretical_gravity#Somigliana_equation)
/// with free-air correction applied.
///
/// # Parameters
/// - `latitude` - geodetic latitude in radians
/// - `altitude` - altitude above the ellipsoid in meters
///
/// # Returns
/// The gravitational acceleration magnitude in m/s^2
///
/// # Example
/// ```rust
/// use navfuse::earth;
/// let grav = earth::gravity(45.0_f64.to_radians(), 1000.0);
/// ```
pub fn gravity(latitude: f64, altitude: f64) -> f64 {
    let sin_lat = latitude.sin();
    let g0 = (GE * (1.0 + K * sin_lat * sin_lat))
        / (1.0 - ECCENTRICITY_SQUARED * sin_lat * sin_lat).sqrt();
    g0 - 3.08e-6 * altitude
}

/// Gravity vector in the local-level NED frame
///
/// Gravity acts along the positive down axis; the north and east components
/// are zero in this model (deflection of the vertical is neglected).
pub fn gravity_ned(latitude: f64, altitude: f64) -> Vector3<f64> {
    Vector3::new(0.0, 0.0, gravity(latitude, altitude))
}

/// Rotation from the ECEF frame to the local-level NED frame
///
/// The local-level frame is tangent to the ellipsoid at the given geodetic
/// position. Needed to resolve the ECEF centrifugal term in [`gravitation`].
///
/// # Parameters
/// - `latitude` - geodetic latitude in radians
/// - `longitude` - geodetic longitude in radians
pub fn ecef_to_lla(latitude: f64, longitude: f64) -> Matrix3<f64> {
    let mut rot: Matrix3<f64> = Matrix3::zeros();
    rot[(0, 0)] = -latitude.sin() * longitude.cos();
    rot[(0, 1)] = -latitude.sin() * longitude.sin();
    rot[(0, 2)] = latitude.cos();
    rot[(1, 0)] = -longitude.sin();
    rot[(1, 1)] = longitude.cos();
    rot[(2, 0)] = -latitude.cos() * longitude.cos();
    rot[(2, 1)] = -latitude.cos() * longitude.sin();
    rot[(2, 2)] = -latitude.sin();
    rot
}

/// Effective gravity vector in the local-level frame
///
/// Combines the Somigliana gravity with the centrifugal acceleration from the
/// Earth's rotation, computed by converting the position to ECEF with
/// `nav-types` and rotating the $\Omega_{ie} \Omega_{ie} r^e$ term back to the
/// local-level frame.
///
/// # Parameters
/// - `latitude` - geodetic latitude in radians
/// - `longitude` - geodetic longitude in radians
/// - `altitude` - altitude above the ellipsoid in meters
pub fn gravitation(latitude: f64, longitude: f64, altitude: f64) -> Vector3<f64> {
    let wgs84: WGS84<f64> =
        WGS84::from_degrees_and_meters(latitude.to_degrees(), longitude.to_degrees(), altitude);
    let ecef: ECEF<f64> = ECEF::from(wgs84);
    let ecef_vec: Vector3<f64> = Vector3::new(ecef.x(), ecef.y(), ecef.z());
    let omega_ie: Matrix3<f64> = vector_to_skew_symmetric(&RATE_VECTOR);
    let rot: Matrix3<f64> = ecef_to_lla(latitude, longitude);
    gravity_ned(latitude, altitude) + rot * omega_ie * omega_ie * ecef_vec
}

/// Earth rotation rate vector resolved in the local-level NED frame
///
/// $$
/// \omega_{ie}^n = \Omega \begin{bmatrix} \cos L & 0 & -\sin L \end{bmatrix}^T
/// $$
///
/// # Parameters
/// - `latitude` - geodetic latitude in radians
pub fn earth_rate(latitude: f64) -> Vector3<f64> {
    Vector3::new(RATE * latitude.cos(), 0.0, -RATE * latitude.sin())
}

/// Transport rate vector in the local-level NED frame
///
/// Rate of rotation of the local-level frame with respect to the ECEF frame,
/// caused by the vehicle's motion over the curved ellipsoid surface.
///
/// # Parameters
/// - `latitude` - geodetic latitude in radians
/// - `altitude` - altitude above the ellipsoid in meters
/// - `velocities` - NED velocity vector in m/s
pub fn transport_rate(latitude: f64, altitude: f64, velocities: &Vector3<f64>) -> Vector3<f64> {
    let (r_m, r_n) = radius(latitude);
    Vector3::new(
        velocities[1] / (r_n + altitude),
        -velocities[0] / (r_m + altitude),
        -velocities[1] * latitude.tan() / (r_n + altitude),
    )
}

// === Unit tests ===
#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn vector_to_skew_symmetric() {
        let v: Vector3<f64> = Vector3::new(1.0, 2.0, 3.0);
        let skew: Matrix3<f64> = super::vector_to_skew_symmetric(&v);
        assert_eq!(skew[(0, 1)], -v[2]);
        assert_eq!(skew[(0, 2)], v[1]);
        assert_eq!(skew[(1, 0)], v[2]);
        assert_eq!(skew[(1, 2)], -v[0]);
        assert_eq!(skew[(2, 0)], -v[1]);
        assert_eq!(skew[(2, 1)], v[0]);
    }
    #[test]
    fn skew_symmetric_to_vector() {
        let v: Vector3<f64> = Vector3::new(1.0, 2.0, 3.0);
        let skew: Matrix3<f64> = super::vector_to_skew_symmetric(&v);
        let v2: Vector3<f64> = super::skew_symmetric_to_vector(&skew);
        assert_eq!(v, v2);
    }
    #[test]
    fn radii_ordering() {
        // R_M <= R_N everywhere on the WGS84 ellipsoid, both positive
        for lat_deg in [-80.0, -45.0, 0.0, 30.0, 60.0, 89.0] {
            let (r_m, r_n) = radius((lat_deg as f64).to_radians());
            assert!(r_m > 0.0);
            assert!(r_n > 0.0);
            assert!(r_m <= r_n, "R_M > R_N at {lat_deg} deg");
        }
    }
    #[test]
    fn radii_equator() {
        let (r_m, r_n) = radius(0.0);
        assert_approx_eq!(r_n, EQUATORIAL_RADIUS, 1e-6);
        assert_approx_eq!(r_m, EQUATORIAL_RADIUS * (1.0 - ECCENTRICITY_SQUARED), 1e-6);
    }
    #[test]
    fn gravity() {
        // polar gravity
        let grav = super::gravity(90.0_f64.to_radians(), 0.0);
        assert_approx_eq!(grav, GP);
        // equatorial gravity
        let grav = super::gravity(0.0, 0.0);
        assert_approx_eq!(grav, GE);
    }
    #[test]
    fn gravity_decreases_with_altitude() {
        let lat = 45.0_f64.to_radians();
        assert!(super::gravity(lat, 10_000.0) < super::gravity(lat, 0.0));
    }
    #[test]
    fn gravitation() {
        // equatorial: centrifugal term opposes gravity along down
        let grav: Vector3<f64> = super::gravitation(0.0, 0.0, 0.0);
        assert_approx_eq!(grav[0], 0.0, 1e-6);
        assert_approx_eq!(grav[1], 0.0, 1e-6);
        assert_approx_eq!(grav[2], GE + 0.0339, 1e-4);
        // polar: no centrifugal component
        let grav: Vector3<f64> = super::gravitation(90.0_f64.to_radians(), 0.0, 0.0);
        assert_approx_eq!(grav[2], GP, 1e-2);
    }
    #[test]
    fn earth_rate_components() {
        let lat = 45.0_f64.to_radians();
        let omega = earth_rate(lat);
        assert_approx_eq!(omega[0], RATE * lat.cos(), 1e-12);
        assert_approx_eq!(omega[1], 0.0, 1e-12);
        assert_approx_eq!(omega[2], -RATE * lat.sin(), 1e-12);
    }
    #[test]
    fn transport_rate_stationary() {
        let omega = transport_rate(0.5, 100.0, &Vector3::zeros());
        assert_eq!(omega, Vector3::zeros());
    }
    #[test]
    fn geocentric_radius_bounds() {
        // between polar and equatorial radii at sea level
        let r = geocentric_radius(45.0_f64.to_radians(), 0.0);
        assert!(r > POLAR_RADIUS && r < EQUATORIAL_RADIUS);
    }
}

//! Loosely-coupled INS/GNSS navigation filter
//!
//! This crate integrates a strapdown inertial navigation solution with
//! intermittent GNSS position and velocity fixes through an error-state
//! extended Kalman filter. The inertial mechanization runs at the IMU rate
//! and accumulates the usual unbounded drift; whenever a GNSS fix arrives,
//! the filter estimates the accumulated navigation and sensor-bias errors,
//! folds them back into the full state, and resets.
//!
//! # Layout
//!
//! - [`NavigationState`] and its [`forward`](NavigationState::forward)
//!   mechanization live here at the crate root, together with the raw
//!   sensor sample types.
//! - [`earth`] holds the WGS84 ellipsoid model: principal radii, gravity,
//!   Earth rate and transport rate.
//! - [`model`] linearizes the strapdown error dynamics into the
//!   continuous-time F and G matrices, with per-axis sensor-bias models.
//! - [`kalman`] is the generic error-state EKF core (propagate, Joseph-form
//!   update, reset).
//! - [`allan`] extracts random-walk coefficients from Allan-variance curves
//!   so the process noise can be derived from static sensor logs.
//! - [`fusion`] is the closed-loop driver tying all of the above together.
//! - [`sim`] provides CSV I/O for sensor logs and a stationary scenario
//!   generator for end-to-end testing.
//!
//! All angles in the public API are in radians; positions are geodetic
//! latitude, longitude, and altitude above the WGS84 ellipsoid; velocities
//! are north-east-down.
//!
//! # Example
//! ```rust
//! use navfuse::{ImuSample, NavigationState};
//! use nalgebra::Vector3;
//!
//! let mut nav = NavigationState::new();
//! nav.latitude = 0.7_f64;
//! // one second of stationary samples: gravity reaction only
//! let g = navfuse::earth::gravity(nav.latitude, nav.altitude);
//! for i in 0..100 {
//!     let imu = ImuSample {
//!         elapsed_s: i as f64 * 0.01,
//!         accel: Vector3::new(0.0, 0.0, -g),
//!         gyro: Vector3::zeros(),
//!     };
//!     nav.forward(&imu, 0.01);
//! }
//! assert!(nav.velocity_down.abs() < 1e-3);
//! ```

pub mod allan;
pub mod earth;
pub mod errors;
pub mod fusion;
pub mod kalman;
pub mod model;
pub mod sim;

use nalgebra::{Matrix3, Rotation3, Vector3};
use std::fmt::Display;

/// One IMU sample: specific force and angular rate in the body frame.
///
/// The accelerometer measures specific force, so a stationary unit with the
/// body z axis pointing down reads roughly `(0, 0, -g)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuSample {
    /// Seconds since the start of the run.
    pub elapsed_s: f64,
    /// Specific force in the body frame, m/s^2.
    pub accel: Vector3<f64>,
    /// Angular rate in the body frame, rad/s.
    pub gyro: Vector3<f64>,
}

/// One GNSS fix: geodetic position and NED velocity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnssSample {
    /// Seconds since the start of the run.
    pub elapsed_s: f64,
    /// Geodetic latitude, radians.
    pub latitude: f64,
    /// Longitude, radians.
    pub longitude: f64,
    /// Altitude above the ellipsoid, meters.
    pub altitude: f64,
    /// NED velocity, m/s.
    pub velocity: Vector3<f64>,
    /// Receiver validity flag; invalid fixes are skipped by the filter.
    pub valid: bool,
}

/// Full navigation state: geodetic position, NED velocity, and attitude as
/// the body-to-navigation rotation.
///
/// The mechanization in [`forward`](Self::forward) implements the
/// local-level NED equations from Groves, *Principles of GNSS, Inertial, and
/// Multisensor Integrated Navigation Systems* (2nd ed.), chapter 5.4:
/// attitude update with Earth-rate and transport-rate compensation, specific
/// force transformation with Coriolis and gravity terms, and trapezoidal
/// position integration.
#[derive(Clone, Copy, Debug)]
pub struct NavigationState {
    /// Geodetic latitude, radians.
    pub latitude: f64,
    /// Longitude, radians.
    pub longitude: f64,
    /// Altitude above the WGS84 ellipsoid, meters.
    pub altitude: f64,
    /// North velocity, m/s.
    pub velocity_north: f64,
    /// East velocity, m/s.
    pub velocity_east: f64,
    /// Down velocity, m/s.
    pub velocity_down: f64,
    /// Body-to-navigation rotation.
    pub attitude: Rotation3<f64>,
}

impl NavigationState {
    /// State at the origin, at rest, level and north-aligned.
    pub fn new() -> NavigationState {
        NavigationState {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            velocity_north: 0.0,
            velocity_east: 0.0,
            velocity_down: 0.0,
            attitude: Rotation3::identity(),
        }
    }

    /// Construct from geodetic position (radians), NED velocity, and
    /// roll/pitch/yaw Euler angles (radians).
    pub fn from_components(
        latitude: f64,
        longitude: f64,
        altitude: f64,
        velocity: Vector3<f64>,
        roll: f64,
        pitch: f64,
        yaw: f64,
    ) -> NavigationState {
        NavigationState {
            latitude,
            longitude,
            altitude,
            velocity_north: velocity[0],
            velocity_east: velocity[1],
            velocity_down: velocity[2],
            attitude: Rotation3::from_euler_angles(roll, pitch, yaw),
        }
    }

    /// NED velocity as a vector.
    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::new(self.velocity_north, self.velocity_east, self.velocity_down)
    }

    /// Propagate the state through one IMU interval of `dt` seconds.
    ///
    /// Attitude, velocity, and position are updated in sequence; velocity
    /// uses the averaged attitude across the interval and position uses
    /// trapezoidal integration of the geodetic rates.
    pub fn forward(&mut self, imu: &ImuSample, dt: f64) {
        let c_old: Matrix3<f64> = *self.attitude.matrix();
        let c_new = self.attitude_update(&imu.gyro, dt);
        let (v_new, lat_rate_old, lon_rate_old) =
            self.velocity_update(&c_old, &c_new, &imu.accel, dt);

        // trapezoidal position integration, Groves eq. 5.56
        let alt_new = self.altitude - 0.5 * (self.velocity_down + v_new[2]) * dt;
        let (r_m_new, _) = earth::radius(self.latitude);
        let lat_rate_new = v_new[0] / (r_m_new + alt_new);
        let lat_new = self.latitude + 0.5 * (lat_rate_old + lat_rate_new) * dt;
        let (_, r_n_new) = earth::radius(lat_new);
        let lon_rate_new = v_new[1] / ((r_n_new + alt_new) * lat_new.cos());
        let lon_new = self.longitude + 0.5 * (lon_rate_old + lon_rate_new) * dt;

        self.attitude = Rotation3::from_matrix(&c_new);
        self.velocity_north = v_new[0];
        self.velocity_east = v_new[1];
        self.velocity_down = v_new[2];
        self.latitude = lat_new;
        self.longitude = wrap_to_pi(lon_new);
        self.altitude = alt_new;
    }

    // Groves eq. 5.46: body-rate integration with Earth-rate and
    // transport-rate compensation.
    fn attitude_update(&self, gyro: &Vector3<f64>, dt: f64) -> Matrix3<f64> {
        let w_ie = earth::earth_rate(self.latitude);
        let w_en = earth::transport_rate(self.latitude, self.altitude, &self.velocity());
        let c: Matrix3<f64> = *self.attitude.matrix();
        c * (Matrix3::identity() + earth::vector_to_skew_symmetric(gyro) * dt)
            - earth::vector_to_skew_symmetric(&(w_ie + w_en)) * dt * c
    }

    // Groves eq. 5.28 / 5.54: specific force through the averaged attitude,
    // plus gravity and Coriolis.
    fn velocity_update(
        &self,
        c_old: &Matrix3<f64>,
        c_new: &Matrix3<f64>,
        accel: &Vector3<f64>,
        dt: f64,
    ) -> (Vector3<f64>, f64, f64) {
        let f_nav = 0.5 * (c_old + c_new) * accel;
        let v = self.velocity();
        let w_ie = earth::earth_rate(self.latitude);
        let w_en = earth::transport_rate(self.latitude, self.altitude, &v);
        let g = earth::gravity_ned(self.latitude, self.altitude);
        let coriolis = earth::vector_to_skew_symmetric(&(w_en + 2.0 * w_ie)) * v;
        let v_new = v + (f_nav + g - coriolis) * dt;

        let (r_m, r_n) = earth::radius(self.latitude);
        let lat_rate = v[0] / (r_m + self.altitude);
        let lon_rate = v[1] / ((r_n + self.altitude) * self.latitude.cos());
        (v_new, lat_rate, lon_rate)
    }
}

impl Default for NavigationState {
    fn default() -> NavigationState {
        NavigationState::new()
    }
}

impl Display for NavigationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (roll, pitch, yaw) = self.attitude.euler_angles();
        write!(
            f,
            "lat: {:.6} deg, lon: {:.6} deg, alt: {:.2} m, v: [{:.3}, {:.3}, {:.3}] m/s, rpy: [{:.2}, {:.2}, {:.2}] deg",
            self.latitude.to_degrees(),
            self.longitude.to_degrees(),
            self.altitude,
            self.velocity_north,
            self.velocity_east,
            self.velocity_down,
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees(),
        )
    }
}

/// Wrap an angle in radians to (-pi, pi].
pub fn wrap_to_pi(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut wrapped = angle % two_pi;
    if wrapped > std::f64::consts::PI {
        wrapped -= two_pi;
    } else if wrapped <= -std::f64::consts::PI {
        wrapped += two_pi;
    }
    wrapped
}

/// Wrap an angle in radians to [0, 2*pi).
pub fn wrap_to_2pi(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut wrapped = angle % two_pi;
    if wrapped < 0.0 {
        wrapped += two_pi;
    }
    wrapped
}

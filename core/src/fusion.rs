//! Closed-loop INS/GNSS integration driver
//!
//! [`run_closed_loop`] ties the pieces together: the strapdown mechanization
//! runs at the IMU rate with the current bias estimates subtracted from each
//! sample, the error-state filter propagates alongside it with freshly
//! linearized dynamics every step, and each valid GNSS fix triggers a
//! measurement update whose estimated errors are folded straight back into
//! the navigation state before the filter resets to zero.
//!
//! The run moves through three phases: initialization (validate the
//! configuration, seed the navigation state and covariance), the
//! predict/update loop over the IMU stream, and completion (final bias
//! estimates and the per-step history are returned). Any filter failure is
//! wrapped with the step index and elapsed time at which it occurred.
//!
//! Conventions, fixed across the crate:
//! - the error state is truth minus the INS estimate, so innovations are
//!   GNSS minus INS and estimated errors are added to position and velocity
//!   when folded;
//! - the attitude fold is `C <- (I - skew(da)) C` for attitude error `da`;
//! - folds move the running bias compensation (applied to raw IMU samples)
//!   toward the true bias, with the fold sign fixed by the bias-coupling
//!   blocks of the error dynamics.

use crate::errors::NavError;
use crate::kalman::ErrorStateKalmanFilter;
use crate::model::{ImuErrorModel, StateShape, error_state_matrices};
use crate::{GnssSample, ImuSample, NavigationState, earth, wrap_to_pi};
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, Vector3};
use serde::Serialize;
use std::path::Path;

/// Fixes timestamped within this window of an IMU step are processed at
/// that step.
const TIME_SLOP_S: f64 = 1e-6;

/// Navigation state at the start of the run.
#[derive(Clone, Copy, Debug)]
pub struct InitialState {
    /// Geodetic latitude, radians.
    pub latitude: f64,
    /// Longitude, radians.
    pub longitude: f64,
    /// Altitude, meters.
    pub altitude: f64,
    /// NED velocity, m/s.
    pub velocity: Vector3<f64>,
    /// Roll, radians.
    pub roll: f64,
    /// Pitch, radians.
    pub pitch: f64,
    /// Yaw, radians.
    pub yaw: f64,
}

impl InitialState {
    fn navigation_state(&self) -> NavigationState {
        NavigationState::from_components(
            self.latitude,
            self.longitude,
            self.altitude,
            self.velocity,
            self.roll,
            self.pitch,
            self.yaw,
        )
    }
}

/// One magnetic-heading observation, used only with the 16-state shape.
#[derive(Clone, Copy, Debug)]
pub struct HeadingSample {
    /// Seconds since the start of the run.
    pub elapsed_s: f64,
    /// Measured magnetic heading, radians.
    pub yaw: f64,
}

/// Filter configuration: state shape, IMU stochastic model, measurement
/// noise, and the initial uncertainty.
#[derive(Clone, Debug)]
pub struct FusionConfig {
    /// 15- or 16-state error vector.
    pub shape: StateShape,
    /// IMU bias models and noise densities.
    pub imu_model: ImuErrorModel,
    /// GNSS position noise, 1-sigma in meters per NED axis.
    pub gnss_position_std: Vector3<f64>,
    /// GNSS velocity noise, 1-sigma in m/s per NED axis.
    pub gnss_velocity_std: Vector3<f64>,
    /// Heading measurement noise, 1-sigma in radians. Required when heading
    /// samples are supplied.
    pub heading_std: Option<f64>,
    /// Initial attitude uncertainty, 1-sigma radians per axis.
    pub initial_attitude_std: f64,
    /// Initial velocity uncertainty, 1-sigma m/s per axis.
    pub initial_velocity_std: f64,
    /// Initial position uncertainty, 1-sigma meters per NED axis.
    pub initial_position_std: f64,
    /// Initial gyro-bias uncertainty, 1-sigma rad/s per axis.
    pub initial_gyro_bias_std: f64,
    /// Initial accel-bias uncertainty, 1-sigma m/s^2 per axis.
    pub initial_accel_bias_std: f64,
    /// Initial heading-bias uncertainty, 1-sigma radians.
    pub initial_heading_bias_std: f64,
}

impl FusionConfig {
    fn validate(&self, headings: &[HeadingSample]) -> Result<(), NavError> {
        self.imu_model.validate(self.shape)?;
        for std in self
            .gnss_position_std
            .iter()
            .chain(self.gnss_velocity_std.iter())
        {
            if !std.is_finite() || *std <= 0.0 {
                return Err(NavError::Configuration(format!(
                    "GNSS measurement sigmas must be positive and finite, got {std}"
                )));
            }
        }
        if !headings.is_empty() {
            if self.shape != StateShape::Model16 {
                return Err(NavError::Configuration(
                    "heading measurements require the 16-state shape".into(),
                ));
            }
            match self.heading_std {
                Some(s) if s.is_finite() && s > 0.0 => {}
                _ => {
                    return Err(NavError::Configuration(
                        "heading measurements require a positive heading sigma".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn initial_covariance(&self, latitude: f64, altitude: f64) -> Vec<f64> {
        let (r_m, r_n) = earth::radius(latitude);
        let lat_sigma = self.initial_position_std / (r_m + altitude);
        let lon_sigma = self.initial_position_std / ((r_n + altitude) * latitude.cos());
        let mut diag = Vec::with_capacity(self.shape.state_dim());
        diag.extend_from_slice(&[self.initial_attitude_std.powi(2); 3]);
        diag.extend_from_slice(&[self.initial_velocity_std.powi(2); 3]);
        diag.push(lat_sigma.powi(2));
        diag.push(lon_sigma.powi(2));
        diag.push(self.initial_position_std.powi(2));
        diag.extend_from_slice(&[self.initial_gyro_bias_std.powi(2); 3]);
        diag.extend_from_slice(&[self.initial_accel_bias_std.powi(2); 3]);
        if self.shape == StateShape::Model16 {
            diag.push(self.initial_heading_bias_std.powi(2));
        }
        diag
    }
}

impl Default for FusionConfig {
    fn default() -> FusionConfig {
        FusionConfig {
            shape: StateShape::Model15,
            imu_model: ImuErrorModel {
                gyro_bias: [crate::model::BiasModel::GaussMarkov {
                    correlation_time_s: 300.0,
                }; 3],
                accel_bias: [crate::model::BiasModel::GaussMarkov {
                    correlation_time_s: 300.0,
                }; 3],
                arw: [2e-4; 3],
                vrw: [2e-3; 3],
                gyro_bias_psd: [1e-6; 3],
                accel_bias_psd: [1e-5; 3],
                heading_bias_psd: None,
            },
            gnss_position_std: Vector3::new(1.5, 1.5, 3.0),
            gnss_velocity_std: Vector3::new(0.05, 0.05, 0.1),
            heading_std: None,
            initial_attitude_std: 0.5_f64.to_radians(),
            initial_velocity_std: 0.1,
            initial_position_std: 3.0,
            initial_gyro_bias_std: 1e-3,
            initial_accel_bias_std: 1e-2,
            initial_heading_bias_std: 2.0_f64.to_radians(),
        }
    }
}

/// One row of the navigation history.
#[derive(Clone, Debug, Serialize)]
pub struct ResultRow {
    pub elapsed_s: f64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    pub velocity_north: f64,
    pub velocity_east: f64,
    pub velocity_down: f64,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    /// 1-sigma position uncertainty, meters, NED.
    pub sigma_north: f64,
    pub sigma_east: f64,
    pub sigma_down: f64,
    /// Running gyro-bias estimate, rad/s, body frame.
    pub gyro_bias_x: f64,
    pub gyro_bias_y: f64,
    pub gyro_bias_z: f64,
    /// Running accel-bias estimate, m/s^2, body frame.
    pub accel_bias_x: f64,
    pub accel_bias_y: f64,
    pub accel_bias_z: f64,
}

/// Output of a closed-loop run: the per-step navigation history, the final
/// bias estimates, and update counters.
#[derive(Clone, Debug)]
pub struct NavigationResult {
    pub rows: Vec<ResultRow>,
    /// Final gyro-bias estimate, rad/s, body frame.
    pub gyro_bias: Vector3<f64>,
    /// Final accel-bias estimate, m/s^2, body frame.
    pub accel_bias: Vector3<f64>,
    /// Final magnetic-heading bias estimate, radians (16-state shape only).
    pub heading_bias: Option<f64>,
    /// GNSS updates folded in.
    pub gnss_updates: usize,
    /// GNSS fixes skipped for an invalid flag.
    pub gnss_rejected: usize,
    /// Heading updates folded in.
    pub heading_updates: usize,
}

impl NavigationResult {
    /// Final navigation row.
    pub fn last(&self) -> Option<&ResultRow> {
        self.rows.last()
    }

    /// Write the history to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), NavError> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn result_row(
    elapsed_s: f64,
    nav: &NavigationState,
    ekf: &ErrorStateKalmanFilter,
    gyro_bias: &Vector3<f64>,
    accel_bias: &Vector3<f64>,
) -> ResultRow {
    let (roll, pitch, yaw) = nav.attitude.euler_angles();
    let (r_m, r_n) = earth::radius(nav.latitude);
    ResultRow {
        elapsed_s,
        latitude_deg: nav.latitude.to_degrees(),
        longitude_deg: nav.longitude.to_degrees(),
        altitude_m: nav.altitude,
        velocity_north: nav.velocity_north,
        velocity_east: nav.velocity_east,
        velocity_down: nav.velocity_down,
        roll_deg: roll.to_degrees(),
        pitch_deg: pitch.to_degrees(),
        yaw_deg: yaw.to_degrees(),
        sigma_north: ekf.p[(6, 6)].sqrt() * (r_m + nav.altitude),
        sigma_east: ekf.p[(7, 7)].sqrt() * (r_n + nav.altitude) * nav.latitude.cos(),
        sigma_down: ekf.p[(8, 8)].sqrt(),
        gyro_bias_x: gyro_bias[0],
        gyro_bias_y: gyro_bias[1],
        gyro_bias_z: gyro_bias[2],
        accel_bias_x: accel_bias[0],
        accel_bias_y: accel_bias[1],
        accel_bias_z: accel_bias[2],
    }
}

// Six-row GNSS observation matrix: velocity errors then position errors.
fn gnss_measurement_matrix(dim: usize) -> DMatrix<f64> {
    let mut h = DMatrix::<f64>::zeros(6, dim);
    for i in 0..3 {
        h[(i, 3 + i)] = 1.0;
        h[(3 + i, 6 + i)] = 1.0;
    }
    h
}

fn gnss_measurement_noise(config: &FusionConfig, nav: &NavigationState) -> DMatrix<f64> {
    let (r_m, r_n) = earth::radius(nav.latitude);
    let lat_sigma = config.gnss_position_std[0] / (r_m + nav.altitude);
    let lon_sigma = config.gnss_position_std[1] / ((r_n + nav.altitude) * nav.latitude.cos());
    let mut r = DMatrix::<f64>::zeros(6, 6);
    for i in 0..3 {
        r[(i, i)] = config.gnss_velocity_std[i].powi(2);
    }
    r[(3, 3)] = lat_sigma.powi(2);
    r[(4, 4)] = lon_sigma.powi(2);
    r[(5, 5)] = config.gnss_position_std[2].powi(2);
    r
}

/// Fold the estimated errors back into the navigation state and bias
/// compensation, then zero the filter's error state.
fn fold_corrections(
    nav: &mut NavigationState,
    gyro_bias: &mut Vector3<f64>,
    accel_bias: &mut Vector3<f64>,
    heading_bias: &mut f64,
    ekf: &mut ErrorStateKalmanFilter,
    shape: StateShape,
) {
    let x = &ekf.x;
    let da = Vector3::new(x[0], x[1], x[2]);
    let corrected =
        (Matrix3::identity() - earth::vector_to_skew_symmetric(&da)) * nav.attitude.matrix();
    nav.attitude = Rotation3::from_matrix(&corrected);
    nav.velocity_north += x[3];
    nav.velocity_east += x[4];
    nav.velocity_down += x[5];
    nav.latitude += x[6];
    nav.longitude = wrap_to_pi(nav.longitude + x[7]);
    nav.altitude += x[8];
    // the gyro-bias state carries the opposite sign of the accel-bias
    // state: both couple into the dynamics through +Cbn, but the gyro
    // residual enters the attitude rate negated while the accel residual
    // enters the velocity rate directly
    *gyro_bias += Vector3::new(x[9], x[10], x[11]);
    *accel_bias -= Vector3::new(x[12], x[13], x[14]);
    if shape == StateShape::Model16 {
        *heading_bias -= x[15];
    }
    ekf.reset();
}

/// Run the full loosely-coupled integration over an IMU stream with
/// intermittent GNSS fixes and optional magnetic-heading observations.
///
/// Samples must be in ascending time order; fixes earlier than the first
/// IMU sample are folded at the first step. The returned history has one
/// row per IMU sample, the first being the initial state.
pub fn run_closed_loop(
    imu: &[ImuSample],
    gnss: &[GnssSample],
    headings: &[HeadingSample],
    init: &InitialState,
    config: &FusionConfig,
) -> Result<NavigationResult, NavError> {
    config.validate(headings)?;
    if imu.len() < 2 {
        return Err(NavError::Configuration(
            "at least two IMU samples are required".into(),
        ));
    }
    for pair in imu.windows(2) {
        if pair[1].elapsed_s <= pair[0].elapsed_s {
            return Err(NavError::Configuration(format!(
                "IMU timestamps must be strictly increasing, got {} after {}",
                pair[1].elapsed_s, pair[0].elapsed_s
            )));
        }
    }

    let mut nav = init.navigation_state();
    let mut ekf =
        ErrorStateKalmanFilter::new(&config.initial_covariance(nav.latitude, nav.altitude));
    let q = config.imu_model.process_noise(config.shape);
    let dim = config.shape.state_dim();

    let mut gyro_bias = Vector3::<f64>::zeros();
    let mut accel_bias = Vector3::<f64>::zeros();
    let mut heading_bias = 0.0_f64;
    let mut gnss_cursor = 0usize;
    let mut heading_cursor = 0usize;
    let mut gnss_updates = 0usize;
    let mut gnss_rejected = 0usize;
    let mut heading_updates = 0usize;

    let mut rows = Vec::with_capacity(imu.len());
    rows.push(result_row(
        imu[0].elapsed_s,
        &nav,
        &ekf,
        &gyro_bias,
        &accel_bias,
    ));

    for step in 1..imu.len() {
        let dt = imu[step].elapsed_s - imu[step - 1].elapsed_s;
        let compensated = ImuSample {
            elapsed_s: imu[step].elapsed_s,
            accel: imu[step].accel - accel_bias,
            gyro: imu[step].gyro - gyro_bias,
        };
        nav.forward(&compensated, dt);

        // relinearize about the new trajectory every step
        let f_nav = nav.attitude * compensated.accel;
        let w_nav = nav.attitude * compensated.gyro;
        let (f, g) = error_state_matrices(&nav, &f_nav, &w_nav, &config.imu_model, config.shape);
        ekf.propagate(&f, &g, &q, dt)
            .map_err(|e| e.at_step(step, imu[step].elapsed_s))?;

        while gnss_cursor < gnss.len()
            && gnss[gnss_cursor].elapsed_s <= imu[step].elapsed_s + TIME_SLOP_S
        {
            let fix = &gnss[gnss_cursor];
            gnss_cursor += 1;
            if !fix.valid {
                gnss_rejected += 1;
                continue;
            }
            let h = gnss_measurement_matrix(dim);
            let r = gnss_measurement_noise(config, &nav);
            let z = DVector::from_row_slice(&[
                fix.velocity[0] - nav.velocity_north,
                fix.velocity[1] - nav.velocity_east,
                fix.velocity[2] - nav.velocity_down,
                fix.latitude - nav.latitude,
                wrap_to_pi(fix.longitude - nav.longitude),
                fix.altitude - nav.altitude,
            ]);
            ekf.update(&h, &r, &z)
                .map_err(|e| e.at_step(step, imu[step].elapsed_s))?;
            fold_corrections(
                &mut nav,
                &mut gyro_bias,
                &mut accel_bias,
                &mut heading_bias,
                &mut ekf,
                config.shape,
            );
            gnss_updates += 1;
        }

        while heading_cursor < headings.len()
            && headings[heading_cursor].elapsed_s <= imu[step].elapsed_s + TIME_SLOP_S
        {
            let aid = &headings[heading_cursor];
            heading_cursor += 1;
            // heading sigma validated above when headings are present
            let Some(sigma) = config.heading_std else {
                break;
            };
            let (_, _, yaw) = nav.attitude.euler_angles();
            let mut h = DMatrix::<f64>::zeros(1, dim);
            h[(0, 2)] = -1.0;
            h[(0, 15)] = -1.0;
            let r = DMatrix::from_row_slice(1, 1, &[sigma * sigma]);
            let z = DVector::from_row_slice(&[wrap_to_pi((aid.yaw - heading_bias) - yaw)]);
            ekf.update(&h, &r, &z)
                .map_err(|e| e.at_step(step, imu[step].elapsed_s))?;
            fold_corrections(
                &mut nav,
                &mut gyro_bias,
                &mut accel_bias,
                &mut heading_bias,
                &mut ekf,
                config.shape,
            );
            heading_updates += 1;
        }

        rows.push(result_row(
            imu[step].elapsed_s,
            &nav,
            &ekf,
            &gyro_bias,
            &accel_bias,
        ));
    }

    Ok(NavigationResult {
        rows,
        gyro_bias,
        accel_bias,
        heading_bias: (config.shape == StateShape::Model16).then_some(heading_bias),
        gnss_updates,
        gnss_rejected,
        heading_updates,
    })
}

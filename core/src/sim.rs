//! Sensor-log I/O and scenario generation
//!
//! CSV record types for IMU and GNSS logs, conversions into the in-memory
//! sample types used by the filter, and a seeded stationary scenario
//! generator for end-to-end testing. Log timestamps are absolute UTC times;
//! elapsed seconds are derived from the first record of each log.

use crate::errors::NavError;
use crate::{GnssSample, ImuSample};
use chrono::{DateTime, TimeDelta, Utc};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of an IMU log. Specific force in m/s^2, angular rate in rad/s,
/// both in the body frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImuRecord {
    pub time: DateTime<Utc>,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
}

/// One row of a GNSS log. Position in degrees and meters, velocity in NED
/// m/s. Rows with `valid` false are carried through and skipped by the
/// filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GnssRecord {
    pub time: DateTime<Utc>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    pub velocity_north: f64,
    pub velocity_east: f64,
    pub velocity_down: f64,
    pub valid: bool,
}

impl ImuRecord {
    /// Read records from a CSV file with a header row.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<ImuRecord>, NavError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    /// Write records to a CSV file, header row included.
    pub fn to_csv<P: AsRef<Path>>(records: &[ImuRecord], path: P) -> Result<(), NavError> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl GnssRecord {
    /// Read records from a CSV file with a header row.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<GnssRecord>, NavError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    /// Write records to a CSV file, header row included.
    pub fn to_csv<P: AsRef<Path>>(records: &[GnssRecord], path: P) -> Result<(), NavError> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn elapsed_seconds(t: DateTime<Utc>, start: DateTime<Utc>) -> f64 {
    let delta: TimeDelta = t - start;
    delta.num_nanoseconds().map(|ns| ns as f64 * 1e-9).unwrap_or_else(|| {
        delta.num_milliseconds() as f64 * 1e-3
    })
}

/// Convert an IMU log into samples, with elapsed seconds relative to the
/// first record.
pub fn imu_samples(records: &[ImuRecord]) -> Vec<ImuSample> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    records
        .iter()
        .map(|r| ImuSample {
            elapsed_s: elapsed_seconds(r.time, first.time),
            accel: Vector3::new(r.accel_x, r.accel_y, r.accel_z),
            gyro: Vector3::new(r.gyro_x, r.gyro_y, r.gyro_z),
        })
        .collect()
}

/// Convert a GNSS log into samples, with elapsed seconds relative to
/// `start` (normally the first IMU record's timestamp) and angles in
/// radians.
pub fn gnss_samples(records: &[GnssRecord], start: DateTime<Utc>) -> Vec<GnssSample> {
    records
        .iter()
        .map(|r| GnssSample {
            elapsed_s: elapsed_seconds(r.time, start),
            latitude: r.latitude_deg.to_radians(),
            longitude: r.longitude_deg.to_radians(),
            altitude: r.altitude_m,
            velocity: Vector3::new(r.velocity_north, r.velocity_east, r.velocity_down),
            valid: r.valid,
        })
        .collect()
}

/// Parameters for the stationary scenario generator.
#[derive(Clone, Debug)]
pub struct StationaryScenario {
    /// Geodetic latitude, radians.
    pub latitude: f64,
    /// Longitude, radians.
    pub longitude: f64,
    /// Altitude, meters.
    pub altitude: f64,
    /// Total duration, seconds.
    pub duration_s: f64,
    /// IMU sample rate, Hz.
    pub imu_rate_hz: f64,
    /// GNSS fix rate, Hz.
    pub gnss_rate_hz: f64,
    /// Accelerometer white-noise sigma, m/s^2.
    pub accel_noise: f64,
    /// Gyro white-noise sigma, rad/s.
    pub gyro_noise: f64,
    /// Constant accelerometer bias, body frame, m/s^2.
    pub accel_bias: Vector3<f64>,
    /// Constant gyro bias, body frame, rad/s.
    pub gyro_bias: Vector3<f64>,
    /// GNSS position noise sigma, meters (applied in the local level frame).
    pub gnss_position_noise: f64,
    /// GNSS velocity noise sigma, m/s.
    pub gnss_velocity_noise: f64,
    /// RNG seed, so runs are reproducible.
    pub seed: u64,
}

impl Default for StationaryScenario {
    fn default() -> StationaryScenario {
        StationaryScenario {
            latitude: 39.95_f64.to_radians(),
            longitude: -75.16_f64.to_radians(),
            altitude: 30.0,
            duration_s: 120.0,
            imu_rate_hz: 100.0,
            gnss_rate_hz: 1.0,
            accel_noise: 2e-3,
            gyro_noise: 2e-4,
            accel_bias: Vector3::new(5e-3, -3e-3, 8e-3),
            gyro_bias: Vector3::new(1e-4, -5e-5, 2e-4),
            gnss_position_noise: 1.5,
            gnss_velocity_noise: 0.05,
            seed: 17,
        }
    }
}

impl StationaryScenario {
    /// Generate the IMU and GNSS sample streams for a static unit, level
    /// and north-aligned. The IMU sees the gravity reaction plus bias and
    /// white noise; the GNSS fixes scatter around the true position.
    pub fn generate(&self) -> Result<(Vec<ImuSample>, Vec<GnssSample>), NavError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = |sigma: f64| {
            Normal::new(0.0, sigma)
                .map_err(|e| NavError::Configuration(format!("bad noise sigma {sigma}: {e}")))
        };
        let accel_dist = noise(self.accel_noise)?;
        let gyro_dist = noise(self.gyro_noise)?;
        let pos_dist = noise(self.gnss_position_noise)?;
        let vel_dist = noise(self.gnss_velocity_noise)?;

        let gravity = crate::earth::gravity(self.latitude, self.altitude);
        // body frame is north-aligned and level, so the sensed Earth rate
        // equals its NED resolution
        let earth_rate = crate::earth::earth_rate(self.latitude);
        let imu_dt = 1.0 / self.imu_rate_hz;
        let imu_count = (self.duration_s * self.imu_rate_hz) as usize;
        let mut imu = Vec::with_capacity(imu_count);
        for i in 0..imu_count {
            imu.push(ImuSample {
                elapsed_s: i as f64 * imu_dt,
                accel: Vector3::new(0.0, 0.0, -gravity)
                    + self.accel_bias
                    + Vector3::new(
                        accel_dist.sample(&mut rng),
                        accel_dist.sample(&mut rng),
                        accel_dist.sample(&mut rng),
                    ),
                gyro: earth_rate
                    + self.gyro_bias
                    + Vector3::new(
                        gyro_dist.sample(&mut rng),
                        gyro_dist.sample(&mut rng),
                        gyro_dist.sample(&mut rng),
                    ),
            });
        }

        let (r_m, r_n) = crate::earth::radius(self.latitude);
        let gnss_dt = 1.0 / self.gnss_rate_hz;
        let gnss_count = (self.duration_s * self.gnss_rate_hz) as usize;
        let mut gnss = Vec::with_capacity(gnss_count);
        for i in 0..gnss_count {
            let north_err = pos_dist.sample(&mut rng);
            let east_err = pos_dist.sample(&mut rng);
            let down_err = pos_dist.sample(&mut rng);
            gnss.push(GnssSample {
                elapsed_s: i as f64 * gnss_dt,
                latitude: self.latitude + north_err / (r_m + self.altitude),
                longitude: self.longitude
                    + east_err / ((r_n + self.altitude) * self.latitude.cos()),
                altitude: self.altitude - down_err,
                velocity: Vector3::new(
                    vel_dist.sample(&mut rng),
                    vel_dist.sample(&mut rng),
                    vel_dist.sample(&mut rng),
                ),
                valid: true,
            });
        }

        Ok((imu, gnss))
    }
}

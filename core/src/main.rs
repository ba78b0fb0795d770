//! Command-line front end for the loosely-coupled INS/GNSS filter.
//!
//! Two modes: `run` fuses recorded IMU and GNSS CSV logs, `demo` generates
//! a stationary scenario and fuses it, writing the navigation history to a
//! CSV file either way.

use clap::{Parser, Subcommand};
use nalgebra::Vector3;
use navfuse::errors::NavError;
use navfuse::fusion::{FusionConfig, InitialState, run_closed_loop};
use navfuse::model::StateShape;
use navfuse::sim::{self, GnssRecord, ImuRecord, StationaryScenario};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "navfuse", about = "Loosely-coupled INS/GNSS navigation filter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuse recorded IMU and GNSS logs.
    Run {
        /// IMU log: time, accel_x..z (m/s^2), gyro_x..z (rad/s).
        #[arg(long)]
        imu: PathBuf,
        /// GNSS log: time, lat/lon (deg), alt (m), NED velocity, valid flag.
        #[arg(long)]
        gnss: PathBuf,
        /// Navigation history output CSV.
        #[arg(long, default_value = "navigation.csv")]
        output: PathBuf,
        /// Initial latitude, degrees. Defaults to the first GNSS fix.
        #[arg(long)]
        latitude: Option<f64>,
        /// Initial longitude, degrees. Defaults to the first GNSS fix.
        #[arg(long)]
        longitude: Option<f64>,
        /// Initial altitude, meters. Defaults to the first GNSS fix.
        #[arg(long)]
        altitude: Option<f64>,
        /// Initial yaw, degrees.
        #[arg(long, default_value_t = 0.0)]
        yaw: f64,
    },
    /// Extract a random-walk coefficient from an Allan-deviation curve.
    Allan {
        /// Curve CSV with two columns: tau (s), sigma.
        #[arg(long)]
        curve: PathBuf,
        /// Resampling interval when no point sits at tau = 1 s.
        #[arg(long, default_value_t = 0.1)]
        dt: f64,
    },
    /// Generate a stationary scenario and fuse it.
    Demo {
        /// Scenario duration, seconds.
        #[arg(long, default_value_t = 120.0)]
        duration: f64,
        /// RNG seed.
        #[arg(long, default_value_t = 17)]
        seed: u64,
        /// Navigation history output CSV.
        #[arg(long, default_value = "navigation.csv")]
        output: PathBuf,
    },
}

fn main() -> Result<(), NavError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            imu,
            gnss,
            output,
            latitude,
            longitude,
            altitude,
            yaw,
        } => {
            let imu_records = ImuRecord::from_csv(&imu)?;
            let gnss_records = GnssRecord::from_csv(&gnss)?;
            let start = imu_records
                .first()
                .ok_or_else(|| NavError::Configuration("IMU log is empty".into()))?
                .time;
            let imu_samples = sim::imu_samples(&imu_records);
            let gnss_samples = sim::gnss_samples(&gnss_records, start);
            let first_fix = gnss_samples
                .iter()
                .find(|f| f.valid)
                .ok_or_else(|| NavError::Configuration("GNSS log has no valid fix".into()))?;

            let init = InitialState {
                latitude: latitude.map_or(first_fix.latitude, f64::to_radians),
                longitude: longitude.map_or(first_fix.longitude, f64::to_radians),
                altitude: altitude.unwrap_or(first_fix.altitude),
                velocity: first_fix.velocity,
                roll: 0.0,
                pitch: 0.0,
                yaw: yaw.to_radians(),
            };
            let config = FusionConfig::default();
            let result = run_closed_loop(&imu_samples, &gnss_samples, &[], &init, &config)?;
            report(&result);
            result.to_csv(&output)?;
            println!("history written to {}", output.display());
        }
        Command::Allan { curve, dt } => {
            let mut reader = csv::Reader::from_path(&curve)?;
            let mut tau = Vec::new();
            let mut sigma = Vec::new();
            for row in reader.deserialize() {
                let (t, s): (f64, f64) = row?;
                tau.push(t);
                sigma.push(s);
            }
            let coefficient = navfuse::allan::get_random_walk(&tau, &sigma, dt)?;
            println!("random-walk coefficient at tau = 1 s: {coefficient:.6e}");
        }
        Command::Demo {
            duration,
            seed,
            output,
        } => {
            let scenario = StationaryScenario {
                duration_s: duration,
                seed,
                ..StationaryScenario::default()
            };
            let (imu_samples, gnss_samples) = scenario.generate()?;
            let init = InitialState {
                latitude: scenario.latitude,
                longitude: scenario.longitude,
                altitude: scenario.altitude,
                velocity: Vector3::zeros(),
                roll: 0.0,
                pitch: 0.0,
                yaw: 0.0,
            };
            let config = FusionConfig {
                shape: StateShape::Model15,
                ..FusionConfig::default()
            };
            let result = run_closed_loop(&imu_samples, &gnss_samples, &[], &init, &config)?;
            report(&result);
            result.to_csv(&output)?;
            println!("history written to {}", output.display());
        }
    }
    Ok(())
}

fn report(result: &navfuse::fusion::NavigationResult) {
    println!(
        "{} GNSS updates applied, {} fixes rejected",
        result.gnss_updates, result.gnss_rejected
    );
    println!(
        "gyro bias estimate  [rad/s]: [{:+.3e}, {:+.3e}, {:+.3e}]",
        result.gyro_bias[0], result.gyro_bias[1], result.gyro_bias[2]
    );
    println!(
        "accel bias estimate [m/s^2]: [{:+.3e}, {:+.3e}, {:+.3e}]",
        result.accel_bias[0], result.accel_bias[1], result.accel_bias[2]
    );
    if let Some(last) = result.last() {
        println!(
            "final solution: lat {:.6} deg, lon {:.6} deg, alt {:.2} m ({:.1} m / {:.1} m / {:.1} m 1-sigma NED)",
            last.latitude_deg,
            last.longitude_deg,
            last.altitude_m,
            last.sigma_north,
            last.sigma_east,
            last.sigma_down
        );
    }
}

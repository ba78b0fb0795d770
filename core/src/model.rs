//! Error-state dynamics model for the loosely-coupled INS/GNSS filter
//!
//! This module builds the continuous-time state transition matrix $F$ and the
//! process-noise input matrix $G$ that drive the error-state Kalman filter.
//! The error state is ordered
//!
//! $$
//! \delta x = [\delta\psi, \delta v, \delta p, \delta b_g, \delta b_a (, \delta b_m)]
//! $$
//!
//! i.e. attitude error (small-angle, local-level frame), velocity error
//! (NED), position error ($\delta L$, $\delta\lambda$ in radians, $\delta h$
//! in meters), gyro bias error, accelerometer bias error, and optionally a
//! magnetic-heading bias. The dynamics encode the full strapdown error
//! propagation on the rotating, ellipsoidal Earth: Earth-rate and
//! transport-rate skew terms, Coriolis coupling, curvature terms built from
//! the principal radii, and the gravity gradient along the down channel.
//!
//! The system is time-varying (linearized about the current trajectory), so
//! $F$ and $G$ are rebuilt from the current navigation solution on every
//! predict step and never cached.
//!
//! Sensor biases are modeled per-axis as either a first-order Gauss-Markov
//! process (mean-reverting, $-1/\tau$ feedback on the diagonal) or an
//! unbounded random walk (no feedback). The noise-injection block in $G$ is
//! the identity in both cases; only the feedback term in $F$ differs. That
//! distinction is what lets a random-walk bias drive unbounded covariance
//! growth.

use crate::NavigationState;
use crate::earth;
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Per-axis stochastic model for a slowly varying sensor bias.
///
/// Replaces the "correlation time = infinity" sentinel convention with an
/// exhaustive, type-checked variant: a non-finite correlation time means the
/// bias is a pure random walk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BiasModel {
    /// First-order Gauss-Markov process with the given correlation time in
    /// seconds. The error dynamics carry a $-1/\tau$ feedback term.
    GaussMarkov { correlation_time_s: f64 },
    /// Unbounded random walk: no mean reversion, zero feedback in F.
    RandomWalk,
}

impl BiasModel {
    /// Map a correlation time to a bias model, treating any non-finite value
    /// as the random-walk sentinel.
    pub fn from_correlation_time(tau_s: f64) -> BiasModel {
        if tau_s.is_finite() {
            BiasModel::GaussMarkov {
                correlation_time_s: tau_s,
            }
        } else {
            BiasModel::RandomWalk
        }
    }
    /// Diagonal feedback coefficient contributed to F.
    fn feedback(&self) -> f64 {
        match self {
            BiasModel::GaussMarkov { correlation_time_s } => -1.0 / correlation_time_s,
            BiasModel::RandomWalk => 0.0,
        }
    }
}

/// Structural choice of the error-state vector, fixed once per run.
///
/// [`StateShape::Model16`] appends a magnetic-heading bias state: an extra
/// zero row/column in F (the bias is modeled as a constant) and an extra
/// column in G carrying a single scalar noise-injection entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateShape {
    /// 15 error states, 12 noise inputs.
    Model15,
    /// 16 error states (magnetic-heading bias appended), 13 noise inputs.
    Model16,
}

impl StateShape {
    /// Dimension of the error-state vector (and of F).
    pub fn state_dim(&self) -> usize {
        match self {
            StateShape::Model15 => 15,
            StateShape::Model16 => 16,
        }
    }
    /// Number of process-noise inputs (columns of G).
    pub fn noise_dim(&self) -> usize {
        match self {
            StateShape::Model15 => 12,
            StateShape::Model16 => 13,
        }
    }
    /// Shape for a run, from the magnetometer switch.
    pub fn from_magnetometer(enabled: bool) -> StateShape {
        if enabled {
            StateShape::Model16
        } else {
            StateShape::Model15
        }
    }
}

/// IMU stochastic error model: per-axis bias models and the noise power
/// spectral densities that populate the process-noise covariance Q.
///
/// The PSDs are typically derived from Allan-variance analysis of static
/// sensor logs (see [`crate::allan`]): the angle random walk (ARW) and
/// velocity random walk (VRW) are the curve values at tau = 1 s, and the
/// bias-drive densities come from the bias-instability segment.
#[derive(Clone, Debug)]
pub struct ImuErrorModel {
    /// Per-axis gyro bias model.
    pub gyro_bias: [BiasModel; 3],
    /// Per-axis accelerometer bias model.
    pub accel_bias: [BiasModel; 3],
    /// Angle random walk, rad/s/sqrt(Hz), per axis.
    pub arw: [f64; 3],
    /// Velocity random walk, m/s^2/sqrt(Hz), per axis.
    pub vrw: [f64; 3],
    /// Gyro bias driving-noise density, per axis.
    pub gyro_bias_psd: [f64; 3],
    /// Accelerometer bias driving-noise density, per axis.
    pub accel_bias_psd: [f64; 3],
    /// Magnetic-heading bias driving-noise density; required for
    /// [`StateShape::Model16`].
    pub heading_bias_psd: Option<f64>,
}

impl ImuErrorModel {
    /// Check the model for internal consistency against the chosen shape.
    pub fn validate(&self, shape: StateShape) -> Result<(), crate::errors::NavError> {
        use crate::errors::NavError;
        for psd in self
            .arw
            .iter()
            .chain(self.vrw.iter())
            .chain(self.gyro_bias_psd.iter())
            .chain(self.accel_bias_psd.iter())
        {
            if !psd.is_finite() || *psd < 0.0 {
                return Err(NavError::Configuration(format!(
                    "noise PSDs must be finite and non-negative, got {psd}"
                )));
            }
        }
        for bias in self.gyro_bias.iter().chain(self.accel_bias.iter()) {
            if let BiasModel::GaussMarkov { correlation_time_s } = bias {
                if *correlation_time_s <= 0.0 || !correlation_time_s.is_finite() {
                    return Err(NavError::Configuration(format!(
                        "Gauss-Markov correlation time must be positive and finite, got {correlation_time_s}"
                    )));
                }
            }
        }
        match (shape, self.heading_bias_psd) {
            (StateShape::Model16, None) => Err(NavError::Configuration(
                "Model16 requires a heading-bias noise PSD".into(),
            )),
            (_, Some(psd)) if !psd.is_finite() || psd < 0.0 => Err(NavError::Configuration(
                format!("heading-bias PSD must be finite and non-negative, got {psd}"),
            )),
            _ => Ok(()),
        }
    }

    /// Diagonal process-noise covariance Q matching G's input ordering:
    /// gyro white noise, accel white noise, gyro-bias drive, accel-bias
    /// drive, and (Model16 only) heading-bias drive. Entries are squared
    /// PSDs.
    pub fn process_noise(&self, shape: StateShape) -> DMatrix<f64> {
        let n = shape.noise_dim();
        let mut q = DMatrix::<f64>::zeros(n, n);
        for i in 0..3 {
            q[(i, i)] = self.arw[i] * self.arw[i];
            q[(3 + i, 3 + i)] = self.vrw[i] * self.vrw[i];
            q[(6 + i, 6 + i)] = self.gyro_bias_psd[i] * self.gyro_bias_psd[i];
            q[(9 + i, 9 + i)] = self.accel_bias_psd[i] * self.accel_bias_psd[i];
        }
        if shape == StateShape::Model16 {
            let psd = self.heading_bias_psd.unwrap_or(0.0);
            q[(12, 12)] = psd * psd;
        }
        q
    }
}

/// Build the continuous-time error dynamics matrices F and G
///
/// Linearizes the strapdown error propagation about the current navigation
/// solution. Inputs are the navigation state, the specific force and angular
/// rate **resolved in the navigation frame** (the raw body-frame IMU sample
/// rotated through the current attitude), the IMU error model, and the
/// structural shape.
///
/// # Returns
/// `(F, G)` where F is 15×15 (Model15) or 16×16 (Model16) and G is 15×12 or
/// 16×13. The noise-input ordering of G's columns matches
/// [`ImuErrorModel::process_noise`].
///
/// The angular rate is accepted for interface completeness; the local-level
/// error dynamics depend on the specific force but not on the body rate.
///
/// # Block structure
/// ```text
///     | Fee Fev Fep  Cbn   0  |        | Cbn  0   0   0  |
///     | Fve Fvv Fvp   0   Cbn |        |  0  Cbn  0   0  |
/// F = |  0  Fpv Fpp   0    0  |    G = |  0   0   0   0  |
///     |  0   0   0   Fgg   0  |        |  0   0   I   0  |
///     |  0   0   0    0   Faa |        |  0   0   0   I  |
/// ```
/// with an extra zero-padded row/column (and a single unit G entry) for the
/// heading-bias state in the 16-state shape.
pub fn error_state_matrices(
    nav: &NavigationState,
    f_nav: &Vector3<f64>,
    _w_nav: &Vector3<f64>,
    model: &ImuErrorModel,
    shape: StateShape,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let lat = nav.latitude;
    let h = nav.altitude;
    let vn = nav.velocity_north;
    let ve = nav.velocity_east;
    let vd = nav.velocity_down;
    let dcm_bn: Matrix3<f64> = *nav.attitude.matrix();

    let om = earth::RATE;
    let (r_m, r_n) = earth::radius(lat);
    let r_o = (r_m * r_n).sqrt() + h;
    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();
    let g0 = earth::gravity_ned(lat, h)[2];
    let r_es = earth::geocentric_radius(lat, h);

    // Attitude-error dynamics: Earth-rate and transport-rate skew terms.
    let f_ee = Matrix3::new(
        0.0,
        -(om * sin_lat + ve / r_o * tan_lat),
        vn / r_o,
        om * sin_lat + ve / r_o * tan_lat,
        0.0,
        om * cos_lat + ve / r_o,
        -vn / r_o,
        -(om * cos_lat + ve / r_o),
        0.0,
    );
    // Attitude error from velocity error.
    let f_ev = Matrix3::new(
        0.0,
        1.0 / r_o,
        0.0,
        -1.0 / r_o,
        0.0,
        0.0,
        0.0,
        -tan_lat / r_o,
        0.0,
    );
    // Attitude error from position error.
    let f_ep = Matrix3::new(
        -om * sin_lat,
        0.0,
        -ve / (r_o * r_o),
        0.0,
        0.0,
        vn / (r_o * r_o),
        -om * cos_lat - ve / (r_o * cos_lat * cos_lat),
        0.0,
        ve * tan_lat / (r_o * r_o),
    );
    // Velocity error from attitude error: rotational sensitivity to the
    // specific force.
    let f_ve = earth::vector_to_skew_symmetric(f_nav);
    // Velocity-error dynamics: Coriolis and curvature terms.
    let f_vv = Matrix3::new(
        vd / r_o,
        -2.0 * (om * sin_lat + ve / r_o * tan_lat),
        vn / r_o,
        2.0 * om * sin_lat + ve / r_o * tan_lat,
        (vn * tan_lat + vd) / r_o,
        2.0 * om * cos_lat + ve / r_o,
        -2.0 * vn / r_o,
        -2.0 * (om * cos_lat + ve / r_o),
        0.0,
    );
    // Velocity error from position error; the down-channel diagonal carries
    // the gravity gradient -2 g0 / r_es.
    let f_vp = Matrix3::new(
        -ve * (2.0 * om * cos_lat + ve / (r_o * cos_lat * cos_lat)),
        0.0,
        (ve * ve * tan_lat - vn * vd) / (r_o * r_o),
        2.0 * om * (vn * cos_lat - vd * sin_lat) + vn * ve / (r_o * cos_lat * cos_lat),
        0.0,
        -ve * (vn * tan_lat + vd) / (r_o * r_o),
        2.0 * om * ve * sin_lat,
        0.0,
        (vn * vn + ve * ve) / (r_o * r_o) - 2.0 * g0 / r_es,
    );
    // Position error from velocity error; -1 maps down velocity to altitude.
    let f_pv = Matrix3::new(
        1.0 / r_o,
        0.0,
        0.0,
        0.0,
        1.0 / (r_o * cos_lat),
        0.0,
        0.0,
        0.0,
        -1.0,
    );
    // Position-error dynamics: longitude-rate error couples back into
    // latitude and altitude.
    let f_pp = Matrix3::new(
        0.0,
        0.0,
        -vn / (r_o * r_o),
        ve * tan_lat / (r_o * cos_lat),
        0.0,
        -ve / (r_o * r_o * cos_lat),
        0.0,
        0.0,
        0.0,
    );
    // Bias feedback: -1/tau for Gauss-Markov, zero for random walk.
    let f_gg = Matrix3::from_diagonal(&Vector3::new(
        model.gyro_bias[0].feedback(),
        model.gyro_bias[1].feedback(),
        model.gyro_bias[2].feedback(),
    ));
    let f_aa = Matrix3::from_diagonal(&Vector3::new(
        model.accel_bias[0].feedback(),
        model.accel_bias[1].feedback(),
        model.accel_bias[2].feedback(),
    ));

    let n = shape.state_dim();
    let m = shape.noise_dim();
    let mut f = DMatrix::<f64>::zeros(n, n);
    f.view_mut((0, 0), (3, 3)).copy_from(&f_ee);
    f.view_mut((0, 3), (3, 3)).copy_from(&f_ev);
    f.view_mut((0, 6), (3, 3)).copy_from(&f_ep);
    f.view_mut((0, 9), (3, 3)).copy_from(&dcm_bn);
    f.view_mut((3, 0), (3, 3)).copy_from(&f_ve);
    f.view_mut((3, 3), (3, 3)).copy_from(&f_vv);
    f.view_mut((3, 6), (3, 3)).copy_from(&f_vp);
    f.view_mut((3, 12), (3, 3)).copy_from(&dcm_bn);
    f.view_mut((6, 3), (3, 3)).copy_from(&f_pv);
    f.view_mut((6, 6), (3, 3)).copy_from(&f_pp);
    f.view_mut((9, 9), (3, 3)).copy_from(&f_gg);
    f.view_mut((12, 12), (3, 3)).copy_from(&f_aa);
    // Model16: heading-bias row/column stays zero (constant-bias model).

    let mut g = DMatrix::<f64>::zeros(n, m);
    g.view_mut((0, 0), (3, 3)).copy_from(&dcm_bn);
    g.view_mut((3, 3), (3, 3)).copy_from(&dcm_bn);
    // Position rows carry no direct noise input.
    // Bias drive is identity injection regardless of the bias model; only
    // the F feedback term distinguishes Gauss-Markov from random walk.
    g.view_mut((9, 6), (3, 3)).copy_from(&Matrix3::identity());
    g.view_mut((12, 9), (3, 3)).copy_from(&Matrix3::identity());
    if shape == StateShape::Model16 {
        g[(15, 12)] = 1.0;
    }

    (f, g)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Rotation3;

    fn test_model() -> ImuErrorModel {
        ImuErrorModel {
            gyro_bias: [BiasModel::GaussMarkov {
                correlation_time_s: 100.0,
            }; 3],
            accel_bias: [BiasModel::GaussMarkov {
                correlation_time_s: 100.0,
            }; 3],
            arw: [1e-4; 3],
            vrw: [1e-3; 3],
            gyro_bias_psd: [1e-6; 3],
            accel_bias_psd: [1e-5; 3],
            heading_bias_psd: Some(1e-3),
        }
    }

    fn test_nav() -> NavigationState {
        let mut nav = NavigationState::new();
        nav.latitude = 39.95_f64.to_radians();
        nav.altitude = 30.0;
        nav.velocity_north = 5.0;
        nav.velocity_east = -3.0;
        nav.velocity_down = 0.2;
        nav.attitude = Rotation3::from_euler_angles(0.01, -0.02, 1.2);
        nav
    }

    #[test]
    fn dimensions_model15() {
        let nav = test_nav();
        let f_nav = Vector3::new(0.1, 0.0, -9.8);
        let w_nav = Vector3::new(0.0, 0.0, 0.01);
        let (f, g) = error_state_matrices(&nav, &f_nav, &w_nav, &test_model(), StateShape::Model15);
        assert_eq!((f.nrows(), f.ncols()), (15, 15));
        assert_eq!((g.nrows(), g.ncols()), (15, 12));
    }

    #[test]
    fn dimensions_model16() {
        let nav = test_nav();
        let f_nav = Vector3::new(0.1, 0.0, -9.8);
        let w_nav = Vector3::zeros();
        let (f, g) = error_state_matrices(&nav, &f_nav, &w_nav, &test_model(), StateShape::Model16);
        assert_eq!((f.nrows(), f.ncols()), (16, 16));
        assert_eq!((g.nrows(), g.ncols()), (16, 13));
        // heading-bias state has no dynamics, only a noise injection
        for j in 0..16 {
            assert_eq!(f[(15, j)], 0.0);
            assert_eq!(f[(j, 15)], 0.0);
        }
        assert_eq!(g[(15, 12)], 1.0);
    }

    #[test]
    fn random_walk_zeroes_feedback_but_not_injection() {
        let nav = test_nav();
        let f_nav = Vector3::new(0.0, 0.0, -9.8);
        let w_nav = Vector3::zeros();
        let gm = test_model();
        let mut rw = test_model();
        rw.gyro_bias = [BiasModel::RandomWalk; 3];
        rw.accel_bias = [BiasModel::RandomWalk; 3];

        let (f_gm, g_gm) = error_state_matrices(&nav, &f_nav, &w_nav, &gm, StateShape::Model15);
        let (f_rw, g_rw) = error_state_matrices(&nav, &f_nav, &w_nav, &rw, StateShape::Model15);

        for i in 9..15 {
            assert_approx_eq!(f_gm[(i, i)], -1.0 / 100.0, 1e-12);
            assert_eq!(f_rw[(i, i)], 0.0);
        }
        // noise path identical across the branch
        assert_eq!(g_gm, g_rw);
    }

    #[test]
    fn stationary_attitude_block_is_earth_rate_only() {
        // with zero velocity the transport terms vanish and the attitude
        // block reduces to the Earth-rate skew
        let mut nav = test_nav();
        nav.velocity_north = 0.0;
        nav.velocity_east = 0.0;
        nav.velocity_down = 0.0;
        let lat = nav.latitude;
        let (f, _) = error_state_matrices(
            &nav,
            &Vector3::zeros(),
            &Vector3::zeros(),
            &test_model(),
            StateShape::Model15,
        );
        let om = earth::RATE;
        assert_approx_eq!(f[(0, 1)], -om * lat.sin(), 1e-15);
        assert_approx_eq!(f[(1, 0)], om * lat.sin(), 1e-15);
        assert_approx_eq!(f[(1, 2)], om * lat.cos(), 1e-15);
        assert_approx_eq!(f[(2, 1)], -om * lat.cos(), 1e-15);
        assert_eq!(f[(0, 2)], 0.0);
        assert_eq!(f[(2, 0)], 0.0);
        // Coriolis entries in the velocity block reduce to the 2*Omega terms
        assert_approx_eq!(f[(3, 4)], -2.0 * om * lat.sin(), 1e-15);
        assert_approx_eq!(f[(4, 3)], 2.0 * om * lat.sin(), 1e-15);
        assert_approx_eq!(f[(4, 5)], 2.0 * om * lat.cos(), 1e-15);
        assert_approx_eq!(f[(5, 4)], -2.0 * om * lat.cos(), 1e-15);
        assert_eq!(f[(3, 3)], 0.0);
        assert_eq!(f[(4, 4)], 0.0);
    }

    #[test]
    fn specific_force_skew_in_velocity_rows() {
        let nav = test_nav();
        let f_nav = Vector3::new(1.0, 2.0, 3.0);
        let (f, _) = error_state_matrices(
            &nav,
            &f_nav,
            &Vector3::zeros(),
            &test_model(),
            StateShape::Model15,
        );
        let skew = earth::vector_to_skew_symmetric(&f_nav);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(f[(3 + i, j)], skew[(i, j)]);
            }
        }
    }

    #[test]
    fn position_rows_map_velocity_error() {
        let nav = test_nav();
        let (r_m, r_n) = earth::radius(nav.latitude);
        let r_o = (r_m * r_n).sqrt() + nav.altitude;
        let (f, _) = error_state_matrices(
            &nav,
            &Vector3::zeros(),
            &Vector3::zeros(),
            &test_model(),
            StateShape::Model15,
        );
        assert_approx_eq!(f[(6, 3)], 1.0 / r_o, 1e-15);
        assert_approx_eq!(f[(7, 4)], 1.0 / (r_o * nav.latitude.cos()), 1e-15);
        assert_eq!(f[(8, 5)], -1.0);
    }

    #[test]
    fn bias_errors_enter_through_attitude_matrix() {
        let nav = test_nav();
        let dcm = *nav.attitude.matrix();
        let (f, g) = error_state_matrices(
            &nav,
            &Vector3::zeros(),
            &Vector3::zeros(),
            &test_model(),
            StateShape::Model15,
        );
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(f[(i, 9 + j)], dcm[(i, j)]);
                assert_eq!(f[(3 + i, 12 + j)], dcm[(i, j)]);
                assert_eq!(g[(i, j)], dcm[(i, j)]);
                assert_eq!(g[(3 + i, 3 + j)], dcm[(i, j)]);
                // position rows carry no noise input
                assert_eq!(g[(6 + i, j)], 0.0);
                assert_eq!(g[(6 + i, 3 + j)], 0.0);
                assert_eq!(g[(6 + i, 6 + j)], 0.0);
                assert_eq!(g[(6 + i, 9 + j)], 0.0);
            }
        }
    }

    #[test]
    fn validate_rejects_negative_psd() {
        let mut model = test_model();
        model.arw[1] = -1.0;
        assert!(model.validate(StateShape::Model15).is_err());
    }

    #[test]
    fn validate_rejects_model16_without_heading_psd() {
        let mut model = test_model();
        model.heading_bias_psd = None;
        assert!(model.validate(StateShape::Model15).is_ok());
        assert!(model.validate(StateShape::Model16).is_err());
    }

    #[test]
    fn validate_rejects_nonpositive_correlation_time() {
        let mut model = test_model();
        model.gyro_bias[0] = BiasModel::GaussMarkov {
            correlation_time_s: 0.0,
        };
        assert!(model.validate(StateShape::Model15).is_err());
    }

    #[test]
    fn from_correlation_time_maps_infinity() {
        assert_eq!(
            BiasModel::from_correlation_time(f64::INFINITY),
            BiasModel::RandomWalk
        );
        assert_eq!(
            BiasModel::from_correlation_time(300.0),
            BiasModel::GaussMarkov {
                correlation_time_s: 300.0
            }
        );
    }

    #[test]
    fn process_noise_layout() {
        let model = test_model();
        let q15 = model.process_noise(StateShape::Model15);
        assert_eq!((q15.nrows(), q15.ncols()), (12, 12));
        assert_approx_eq!(q15[(0, 0)], 1e-8, 1e-20);
        assert_approx_eq!(q15[(3, 3)], 1e-6, 1e-18);
        let q16 = model.process_noise(StateShape::Model16);
        assert_eq!((q16.nrows(), q16.ncols()), (13, 13));
        assert_approx_eq!(q16[(12, 12)], 1e-6, 1e-18);
    }
}

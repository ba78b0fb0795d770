//! Error-state extended Kalman filter core
//!
//! Generic propagate/update machinery over the error state $\delta x$ and
//! its covariance $P$. The filter is agnostic to the navigation semantics:
//! it consumes whatever continuous-time $(F, G, Q)$ the caller supplies and
//! whatever measurement model $(H, R)$ applies, so the same core serves the
//! 15- and 16-state shapes unchanged.
//!
//! Discretization is second order,
//!
//! $$ \Phi = I + F \Delta t + \tfrac{1}{2} F^2 \Delta t^2, \qquad
//!    Q_d = G Q G^T \Delta t $$
//!
//! and the covariance update uses the Joseph form
//! $P \leftarrow (I - KH) P (I - KH)^T + K R K^T$, which preserves symmetry
//! and positive semi-definiteness under roundoff far better than the short
//! form. Both steps re-symmetrize $P$ afterwards.
//!
//! Numerical health is checked rather than assumed: a Cholesky failure on
//! the innovation covariance surfaces as [`NavError::Singularity`], and a
//! negative eigenvalue in the posterior covariance beyond tolerance surfaces
//! as [`NavError::Divergence`]. Callers abort the run on either.

use crate::errors::NavError;
use nalgebra::{DMatrix, DVector};

/// Most negative covariance eigenvalue tolerated before the filter is
/// declared divergent. Small negatives are roundoff, not divergence.
const PSD_TOLERANCE: f64 = -1e-9;

/// Force symmetry on a square matrix: (M + M^T) / 2.
pub fn symmetrize(mat: &DMatrix<f64>) -> DMatrix<f64> {
    (mat + mat.transpose()) * 0.5
}

/// Error-state Kalman filter: the estimated error vector and its covariance.
///
/// The error state is folded into the full navigation state by the caller
/// after each measurement update and then [`reset`](Self::reset) to zero, so
/// between updates `x` holds only the errors accumulated since the last fold.
#[derive(Clone, Debug)]
pub struct ErrorStateKalmanFilter {
    /// Current error-state estimate.
    pub x: DVector<f64>,
    /// Error-state covariance.
    pub p: DMatrix<f64>,
}

impl ErrorStateKalmanFilter {
    /// Create a filter of dimension `n` with zero error state and the given
    /// initial covariance diagonal.
    pub fn new(initial_variances: &[f64]) -> ErrorStateKalmanFilter {
        let n = initial_variances.len();
        ErrorStateKalmanFilter {
            x: DVector::zeros(n),
            p: DMatrix::from_diagonal(&DVector::from_row_slice(initial_variances)),
        }
    }

    /// State dimension.
    pub fn dim(&self) -> usize {
        self.x.len()
    }

    /// Propagate the error state and covariance over one IMU interval.
    ///
    /// `f` and `g` are the continuous-time dynamics matrices linearized
    /// about the current trajectory, `q` the continuous process-noise
    /// covariance matching `g`'s columns, and `dt` the interval in seconds.
    pub fn propagate(
        &mut self,
        f: &DMatrix<f64>,
        g: &DMatrix<f64>,
        q: &DMatrix<f64>,
        dt: f64,
    ) -> Result<(), NavError> {
        let n = self.dim();
        if f.nrows() != n || f.ncols() != n {
            return Err(NavError::Configuration(format!(
                "F is {}x{}, filter dimension is {n}",
                f.nrows(),
                f.ncols()
            )));
        }
        if g.nrows() != n || g.ncols() != q.nrows() {
            return Err(NavError::Configuration(format!(
                "G is {}x{} against Q of {}x{}",
                g.nrows(),
                g.ncols(),
                q.nrows(),
                q.ncols()
            )));
        }
        let identity = DMatrix::<f64>::identity(n, n);
        let phi = &identity + f * dt + (f * f) * (0.5 * dt * dt);
        let qd = g * q * g.transpose() * dt;
        self.x = &phi * &self.x;
        self.p = symmetrize(&(&phi * &self.p * phi.transpose() + qd));
        Ok(())
    }

    /// Fold one measurement into the error state.
    ///
    /// `h` maps the error state to the measurement space, `r` is the
    /// measurement-noise covariance, and `innovation` the observed residual.
    /// Returns the updated error state so the caller can fold it into the
    /// full navigation state.
    pub fn update(
        &mut self,
        h: &DMatrix<f64>,
        r: &DMatrix<f64>,
        innovation: &DVector<f64>,
    ) -> Result<&DVector<f64>, NavError> {
        let n = self.dim();
        let m = h.nrows();
        if h.ncols() != n || r.nrows() != m || r.ncols() != m || innovation.len() != m {
            return Err(NavError::Configuration(format!(
                "measurement shapes inconsistent: H {}x{}, R {}x{}, z {}",
                h.nrows(),
                h.ncols(),
                r.nrows(),
                r.ncols(),
                innovation.len()
            )));
        }
        let s = symmetrize(&(h * &self.p * h.transpose() + r));
        let s_chol = s.clone().cholesky().ok_or_else(|| NavError::Singularity {
            what: "innovation covariance is not positive definite".into(),
        })?;
        // K = P H^T S^-1, via the Cholesky solve on the transposed system
        let k = s_chol.solve(&(h * &self.p)).transpose();

        self.x += &k * (innovation - h * &self.x);

        let identity = DMatrix::<f64>::identity(n, n);
        let i_kh = &identity - &k * h;
        self.p = symmetrize(&(&i_kh * &self.p * i_kh.transpose() + &k * r * k.transpose()));

        let min_eig = self
            .p
            .clone()
            .symmetric_eigenvalues()
            .iter()
            .fold(f64::INFINITY, |acc, &e| acc.min(e));
        if min_eig < PSD_TOLERANCE {
            return Err(NavError::Divergence {
                min_eigenvalue: min_eig,
            });
        }
        Ok(&self.x)
    }

    /// Zero the error state after it has been folded into the navigation
    /// solution. The covariance is left untouched.
    pub fn reset(&mut self) {
        self.x.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn small_filter() -> ErrorStateKalmanFilter {
        ErrorStateKalmanFilter::new(&[1.0, 1.0])
    }

    #[test]
    fn new_starts_at_zero_error() {
        let ekf = ErrorStateKalmanFilter::new(&[0.1, 0.2, 0.3]);
        assert_eq!(ekf.dim(), 3);
        assert_eq!(ekf.x, DVector::zeros(3));
        assert_approx_eq!(ekf.p[(1, 1)], 0.2, 1e-15);
        assert_eq!(ekf.p[(0, 1)], 0.0);
    }

    #[test]
    fn propagate_matches_second_order_transition() {
        let mut ekf = small_filter();
        // constant-velocity toy system: d(pos) = vel
        let f = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]);
        let g = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let q = DMatrix::from_row_slice(1, 1, &[0.01]);
        let dt = 0.5;
        ekf.x[1] = 2.0;
        ekf.propagate(&f, &g, &q, dt).unwrap();
        // phi = I + F dt (F^2 = 0 here), so pos error picks up vel * dt
        assert_approx_eq!(ekf.x[0], 1.0, 1e-12);
        assert_approx_eq!(ekf.x[1], 2.0, 1e-12);
        // P = phi P phi^T + G Q G^T dt with P0 = I
        assert_approx_eq!(ekf.p[(0, 0)], 1.0 + dt * dt, 1e-12);
        assert_approx_eq!(ekf.p[(0, 1)], dt, 1e-12);
        assert_approx_eq!(ekf.p[(1, 1)], 1.0 + 0.01 * dt, 1e-12);
    }

    #[test]
    fn propagate_second_order_term_present() {
        let mut ekf = ErrorStateKalmanFilter::new(&[1.0]);
        let f = DMatrix::from_row_slice(1, 1, &[-2.0]);
        let g = DMatrix::zeros(1, 1);
        let q = DMatrix::zeros(1, 1);
        let dt = 0.1;
        ekf.x[0] = 1.0;
        ekf.propagate(&f, &g, &q, dt).unwrap();
        // phi = 1 - 2 dt + 0.5 * 4 dt^2
        assert_approx_eq!(ekf.x[0], 1.0 - 0.2 + 0.02, 1e-12);
    }

    #[test]
    fn propagate_with_zero_noise_is_pure_transition() {
        let mut ekf = small_filter();
        ekf.p = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.5]);
        let f = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -0.4, -0.2]);
        let g = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let q = DMatrix::zeros(1, 1);
        let dt = 0.1;
        let identity = DMatrix::<f64>::identity(2, 2);
        let phi = &identity + &f * dt + (&f * &f) * (0.5 * dt * dt);
        let expected = &phi * &ekf.p * phi.transpose();
        ekf.propagate(&f, &g, &q, dt).unwrap();
        assert!((&ekf.p - &expected).norm() < 1e-14);
    }

    #[test]
    fn propagate_rejects_mismatched_dimensions() {
        let mut ekf = small_filter();
        let f = DMatrix::zeros(3, 3);
        let g = DMatrix::zeros(2, 1);
        let q = DMatrix::zeros(1, 1);
        assert!(matches!(
            ekf.propagate(&f, &g, &q, 0.1),
            Err(NavError::Configuration(_))
        ));
    }

    #[test]
    fn update_shrinks_covariance_and_moves_state() {
        let mut ekf = small_filter();
        let h = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.5]);
        let z = DVector::from_row_slice(&[1.5]);
        let p00_before = ekf.p[(0, 0)];
        let x = ekf.update(&h, &r, &z).unwrap();
        // K = 1 / 1.5, x = K * z
        assert_approx_eq!(x[0], 1.0, 1e-12);
        assert!(ekf.p[(0, 0)] < p00_before);
        // unobserved component keeps its prior variance
        assert_approx_eq!(ekf.p[(1, 1)], 1.0, 1e-12);
    }

    #[test]
    fn update_singular_innovation_is_reported() {
        let mut ekf = small_filter();
        ekf.p.fill(0.0);
        let h = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.0]);
        let z = DVector::from_row_slice(&[0.1]);
        assert!(matches!(
            ekf.update(&h, &r, &z),
            Err(NavError::Singularity { .. })
        ));
    }

    #[test]
    fn update_rejects_shape_mismatch() {
        let mut ekf = small_filter();
        let h = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.5]);
        let z = DVector::from_row_slice(&[0.1]);
        assert!(matches!(
            ekf.update(&h, &r, &z),
            Err(NavError::Configuration(_))
        ));
    }

    #[test]
    fn reset_zeroes_state_keeps_covariance() {
        let mut ekf = small_filter();
        let h = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.5]);
        let z = DVector::from_row_slice(&[1.5]);
        ekf.update(&h, &r, &z).unwrap();
        let p_after = ekf.p.clone();
        ekf.reset();
        assert_eq!(ekf.x, DVector::zeros(2));
        assert_eq!(ekf.p, p_after);
    }

    #[test]
    fn covariance_stays_symmetric_over_many_steps() {
        let mut ekf = small_filter();
        let f = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -0.5, -0.1]);
        let g = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let q = DMatrix::from_row_slice(1, 1, &[0.01]);
        let h = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.25]);
        for i in 0..200 {
            ekf.propagate(&f, &g, &q, 0.02).unwrap();
            if i % 10 == 0 {
                let z = DVector::from_row_slice(&[0.01]);
                ekf.update(&h, &r, &z).unwrap();
                ekf.reset();
            }
        }
        let asym = (&ekf.p - ekf.p.transpose()).norm();
        assert!(asym < 1e-12);
        let min_eig = ekf
            .p
            .clone()
            .symmetric_eigenvalues()
            .iter()
            .fold(f64::INFINITY, |acc, &e| acc.min(e));
        assert!(min_eig > 0.0);
    }
}

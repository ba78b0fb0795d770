//! Allan-variance noise extraction
//!
//! Inertial sensor noise is commonly characterized with an Allan-variance
//! curve: the variance of the averaged signal as a function of the averaging
//! (cluster) time tau. On a log-log plot the different noise processes show
//! up as straight segments of characteristic slope; the angle/velocity
//! random-walk coefficient is read off the curve at tau = 1 second on the
//! slope −1/2 segment.
//!
//! This module supplies that single read-off to the filter configuration:
//! [`get_random_walk`] looks for an exact 1 s sample and otherwise resamples
//! the curve linearly inside the [0.5, 2.0] s bracket at the sensor sampling
//! interval until it lands on 1 s exactly. Curve fitting and identification
//! of the other noise processes (bias instability, rate random walk) are out
//! of scope here.
//!
//! # Precondition
//! The returned value is only physically meaningful as a random-walk
//! coefficient when the Allan curve actually exhibits slope −1/2 in the
//! neighbourhood of tau = 1 s. This function trusts the caller and does not
//! verify the slope.

use crate::errors::NavError;

/// Tolerance for matching a resampled point against tau = 1.0 s.
const TAU_MATCH_TOL: f64 = 1e-9;
/// Bracketing window around 1 s used when no exact sample exists.
const BRACKET_LO: f64 = 0.5;
const BRACKET_HI: f64 = 2.0;

/// Extract the random-walk coefficient at tau = 1 second
///
/// If the curve contains a sample at exactly tau = 1.0 s, its variance value
/// is returned unmodified. Otherwise all samples with 0.5 ≤ tau ≤ 2.0 are
/// selected and the curve is linearly resampled across that sub-range on the
/// grid of integer multiples of `dt`; the value at the resampled point equal
/// to 1.0 s is returned.
///
/// # Arguments
/// * `tau` - ordered sequence of positive cluster times in seconds
/// * `allan` - matching sequence of Allan variances
/// * `dt` - sensor sampling interval in seconds, used as the resampling step
///
/// # Errors
/// * [`NavError::Configuration`] if `tau` and `allan` differ in length, are
///   empty, or `dt` is not positive.
/// * [`NavError::Range`] if no samples fall in [0.5, 2.0] (1 s cannot be
///   bracketed), or if no multiple of `dt` inside the bracket equals 1.0 s
///   exactly (`dt` does not divide 1 s, e.g. 0.3). Callers must choose `dt`
///   such that 1.0 falls on the resampled grid; the extraction is undefined
///   otherwise and the failure is surfaced rather than approximated.
///
/// # Example
/// ```rust
/// use navfuse::allan::get_random_walk;
/// let tau = [0.5, 1.0, 2.0];
/// let allan = [0.1, 0.2, 0.4];
/// let rw = get_random_walk(&tau, &allan, 0.1).unwrap();
/// assert_eq!(rw, 0.2);
/// ```
pub fn get_random_walk(tau: &[f64], allan: &[f64], dt: f64) -> Result<f64, NavError> {
    if tau.len() != allan.len() {
        return Err(NavError::Configuration(format!(
            "tau and allan length mismatch: {} vs {}",
            tau.len(),
            allan.len()
        )));
    }
    if tau.is_empty() {
        return Err(NavError::Configuration("empty Allan-variance curve".into()));
    }
    if dt <= 0.0 {
        return Err(NavError::Configuration(format!(
            "sampling interval must be positive, got {dt}"
        )));
    }

    // Exact sample at 1 s: no interpolation performed.
    if let Some(i) = tau.iter().position(|&t| t == 1.0) {
        return Ok(allan[i]);
    }

    // Select the bracketing sub-range around 1 s.
    let bracket: Vec<usize> = (0..tau.len())
        .filter(|&i| tau[i] >= BRACKET_LO && tau[i] <= BRACKET_HI)
        .collect();
    if bracket.is_empty() {
        return Err(NavError::Range(format!(
            "no Allan-variance samples in [{BRACKET_LO}, {BRACKET_HI}] s; cannot bracket tau = 1 s"
        )));
    }

    let first = tau[bracket[0]];
    let last = tau[bracket[bracket.len() - 1]];

    // Resample on the multiples of dt covering the bracket and pick the
    // point that lands on 1 s exactly.
    let k_min = (first / dt - TAU_MATCH_TOL).ceil() as i64;
    let k_max = (last / dt + TAU_MATCH_TOL).floor() as i64;
    for k in k_min..=k_max {
        let t = k as f64 * dt;
        if (t - 1.0).abs() < TAU_MATCH_TOL {
            return Ok(interpolate(tau, allan, &bracket, 1.0));
        }
    }
    Err(NavError::Range(format!(
        "resampled grid over [{first}, {last}] at spacing {dt} never hits tau = 1 s"
    )))
}

/// Linear interpolation of the Allan curve at `t`, restricted to the
/// bracketed indices. `t` is known to lie inside [tau[first], tau[last]].
fn interpolate(tau: &[f64], allan: &[f64], bracket: &[usize], t: f64) -> f64 {
    for pair in bracket.windows(2) {
        let (i, j) = (pair[0], pair[1]);
        if t >= tau[i] && t <= tau[j] {
            let frac = (t - tau[i]) / (tau[j] - tau[i]);
            return allan[i] + frac * (allan[j] - allan[i]);
        }
    }
    // t coincides with a bracket endpoint
    let i = bracket[0];
    let j = bracket[bracket.len() - 1];
    if (t - tau[i]).abs() < TAU_MATCH_TOL {
        allan[i]
    } else {
        allan[j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn exact_sample_returned_unmodified() {
        let tau = [0.5, 1.0, 2.0];
        let allan = [0.1, 0.2, 0.4];
        let rw = get_random_walk(&tau, &allan, 0.1).unwrap();
        assert_eq!(rw, 0.2);
    }

    #[test]
    fn interpolates_when_one_second_missing() {
        let tau = [0.5, 0.8, 1.2, 2.0];
        let allan = [0.1, 0.16, 0.22, 0.4];
        // grid multiples of 0.1 include 1.0
        let rw = get_random_walk(&tau, &allan, 0.1).unwrap();
        // direct linear interpolation between (0.8, 0.16) and (1.2, 0.22)
        let expected = 0.16 + (1.0 - 0.8) / (1.2 - 0.8) * (0.22 - 0.16);
        assert_approx_eq!(rw, expected, 1e-12);
    }

    #[test]
    fn interpolates_with_coarser_step() {
        // grid multiples of 0.2 include 1.0
        let tau = [0.5, 0.8, 1.2, 2.0];
        let allan = [0.1, 0.16, 0.22, 0.4];
        let rw = get_random_walk(&tau, &allan, 0.2).unwrap();
        let expected = 0.16 + (1.0 - 0.8) / (1.2 - 0.8) * (0.22 - 0.16);
        assert_approx_eq!(rw, expected, 1e-9);
    }

    #[test]
    fn range_error_when_no_bracket() {
        let tau = [0.01, 0.1, 10.0, 100.0];
        let allan = [1.0, 0.5, 0.05, 0.2];
        let err = get_random_walk(&tau, &allan, 0.1).unwrap_err();
        assert!(matches!(err, NavError::Range(_)));
    }

    #[test]
    fn range_error_when_grid_misses_one_second() {
        // multiples of 0.3 inside the bracket are 0.6, 0.9, 1.2, ...:
        // 1.0 never lands on the grid
        let tau = [0.55, 0.9, 1.3, 1.9];
        let allan = [0.11, 0.17, 0.23, 0.38];
        let err = get_random_walk(&tau, &allan, 0.3).unwrap_err();
        assert!(matches!(err, NavError::Range(_)));
    }

    #[test]
    fn configuration_error_on_length_mismatch() {
        let err = get_random_walk(&[0.5, 1.0], &[0.1], 0.1).unwrap_err();
        assert!(matches!(err, NavError::Configuration(_)));
    }

    #[test]
    fn configuration_error_on_bad_dt() {
        let err = get_random_walk(&[0.5, 1.0], &[0.1, 0.2], 0.0).unwrap_err();
        assert!(matches!(err, NavError::Configuration(_)));
    }
}

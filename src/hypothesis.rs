//! Hypothesis tests computed from completed accumulator states.
//!
//! Every test here is a final step: it reads one or two [`Accumulator`]s
//! after all updates and merges are done and never mutates them. A state
//! with too few observations yields `None` rather than an error.
//!
//! Each test comes in two forms. The plain form uses the built-in
//! [`SpecialFunctions`] oracle; the `_with` form takes any [`CdfOracle`].
//!
//! # Tests
//!
//! | Function | Minimum counts | Statistic |
//! |---|---|---|
//! | [`one_sample_t_test`] | n ≥ 1 | `√(n/s²)·x̄` |
//! | [`two_sample_pooled_t_test`] | nX, nY ≥ 1, nX + nY > 2 | pooled-variance t |
//! | [`two_sample_welch_t_test`] | nX, nY ≥ 2 | Welch t, Satterthwaite df |
//! | [`f_test`] | nX, nY ≥ 2 | `s²X / s²Y` |
//! | [`chi_squared_variance_test`] | n ≥ 2 | `CSS / σ₀²` |
//!
//! Zero variances are not special-cased: they produce infinite or NaN
//! statistics and p-values, which is the mathematical result.

use serde::{Deserialize, Serialize};

use crate::accumulator::Accumulator;
use crate::error::StateError;
use crate::multi::TwoSample;
use crate::oracle::{CdfOracle, SpecialFunctions};

/// Result of a t-test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub statistic: f64,
    /// Fractional for the Welch test.
    pub degrees_of_freedom: f64,
    /// `P(T ≥ t)`.
    pub p_value_one_sided: f64,
    /// `P(|T| ≥ |t|)`.
    pub p_value_two_sided: f64,
}

impl TTest {
    fn from_statistic(statistic: f64, degrees_of_freedom: f64, oracle: &(impl CdfOracle + ?Sized)) -> Self {
        Self {
            statistic,
            degrees_of_freedom,
            p_value_one_sided: 1.0 - oracle.student_t_cdf(statistic, degrees_of_freedom),
            p_value_two_sided: 2.0 * (1.0 - oracle.student_t_cdf(statistic.abs(), degrees_of_freedom)),
        }
    }

    /// `(statistic, df, p_one_sided, p_two_sided)`.
    pub fn to_tuple(&self) -> (f64, f64, f64, f64) {
        (
            self.statistic,
            self.degrees_of_freedom,
            self.p_value_one_sided,
            self.p_value_two_sided,
        )
    }
}

/// Result of an F-test for equal variances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FTest {
    pub statistic: f64,
    pub df_x: f64,
    pub df_y: f64,
    pub p_value_one_sided: f64,
    pub p_value_two_sided: f64,
}

impl FTest {
    /// `(statistic, df_x, df_y, p_one_sided, p_two_sided)`.
    pub fn to_tuple(&self) -> (f64, f64, f64, f64, f64) {
        (
            self.statistic,
            self.df_x,
            self.df_y,
            self.p_value_one_sided,
            self.p_value_two_sided,
        )
    }
}

/// Result of a chi-squared test of a single variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChiSquaredTest {
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value_one_sided: f64,
    pub p_value_two_sided: f64,
}

impl ChiSquaredTest {
    /// `(statistic, df, p_one_sided, p_two_sided)`.
    pub fn to_tuple(&self) -> (f64, f64, f64, f64) {
        (
            self.statistic,
            self.degrees_of_freedom,
            self.p_value_one_sided,
            self.p_value_two_sided,
        )
    }
}

/// One-sample t-test of `H₀: μ = 0`.
///
/// Returns `None` for an empty state. A single observation gives zero
/// degrees of freedom, which the oracle maps to NaN.
///
/// # Examples
/// ```
/// use u_dispersion::{one_sample_t_test, Accumulator};
/// let acc: Accumulator = [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().collect();
/// let t = one_sample_t_test(&acc).unwrap();
/// assert!((t.statistic - 4.2426).abs() < 1e-4);
/// assert_eq!(t.degrees_of_freedom, 4.0);
/// ```
pub fn one_sample_t_test(acc: &Accumulator) -> Option<TTest> {
    one_sample_t_test_with(acc, &SpecialFunctions)
}

/// [`one_sample_t_test`] with a caller-supplied oracle.
pub fn one_sample_t_test_with(acc: &Accumulator, oracle: &(impl CdfOracle + ?Sized)) -> Option<TTest> {
    if acc.is_empty() {
        return None;
    }
    let n = acc.count() as f64;
    let df = n - 1.0;
    let variance = acc.css_readout() / df;
    let t = (n / variance).sqrt() * (acc.sum() / n);
    Some(TTest::from_statistic(t, df, oracle))
}

/// One-sample t-test of `H₀: μ = mu0`.
///
/// # Errors
/// Returns [`StateError::InvalidParameter`] if `mu0` is not finite.
pub fn one_sample_t_test_against(acc: &Accumulator, mu0: f64) -> Result<Option<TTest>, StateError> {
    one_sample_t_test_against_with(acc, mu0, &SpecialFunctions)
}

/// [`one_sample_t_test_against`] with a caller-supplied oracle.
///
/// # Errors
/// Returns [`StateError::InvalidParameter`] if `mu0` is not finite.
pub fn one_sample_t_test_against_with(
    acc: &Accumulator,
    mu0: f64,
    oracle: &(impl CdfOracle + ?Sized),
) -> Result<Option<TTest>, StateError> {
    if !mu0.is_finite() {
        tracing::warn!(mu0, "hypothesised mean must be finite");
        return Err(StateError::InvalidParameter(format!(
            "hypothesised mean must be finite, got {mu0}"
        )));
    }
    if acc.is_empty() {
        return Ok(None);
    }
    let n = acc.count() as f64;
    let df = n - 1.0;
    let variance = acc.css_readout() / df;
    let t = (n / variance).sqrt() * (acc.sum() / n - mu0);
    Ok(Some(TTest::from_statistic(t, df, oracle)))
}

/// Two-sample t-test assuming equal variances.
///
/// Returns `None` if either sample is empty or there are only two
/// observations in total.
pub fn two_sample_pooled_t_test(x: &Accumulator, y: &Accumulator) -> Option<TTest> {
    two_sample_pooled_t_test_with(x, y, &SpecialFunctions)
}

/// [`two_sample_pooled_t_test`] with a caller-supplied oracle.
pub fn two_sample_pooled_t_test_with(
    x: &Accumulator,
    y: &Accumulator,
    oracle: &(impl CdfOracle + ?Sized),
) -> Option<TTest> {
    if x.count() < 1 || y.count() < 1 || x.count().saturating_add(y.count()) <= 2 {
        return None;
    }
    let (nx, ny) = (x.count() as f64, y.count() as f64);
    let df = nx + ny - 2.0;
    let pooled_variance = (x.css_readout() + y.css_readout()) / df;
    let mean_diff = x.sum() / nx - y.sum() / ny;
    let t = mean_diff / (pooled_variance * (1.0 / nx + 1.0 / ny)).sqrt();
    Some(TTest::from_statistic(t, df, oracle))
}

/// Welch's two-sample t-test, not assuming equal variances.
///
/// Returns `None` unless both samples hold at least 2 observations.
pub fn two_sample_welch_t_test(x: &Accumulator, y: &Accumulator) -> Option<TTest> {
    two_sample_welch_t_test_with(x, y, &SpecialFunctions)
}

/// [`two_sample_welch_t_test`] with a caller-supplied oracle.
pub fn two_sample_welch_t_test_with(
    x: &Accumulator,
    y: &Accumulator,
    oracle: &(impl CdfOracle + ?Sized),
) -> Option<TTest> {
    let (var_x, var_y) = (x.sample_variance()?, y.sample_variance()?);
    let (nx, ny) = (x.count() as f64, y.count() as f64);
    let (se_x, se_y) = (var_x / nx, var_y / ny);

    let df = (se_x + se_y).powi(2) / (se_x * se_x / (nx - 1.0) + se_y * se_y / (ny - 1.0));
    let t = (x.sum() / nx - y.sum() / ny) / (se_x + se_y).sqrt();
    Some(TTest::from_statistic(t, df, oracle))
}

/// F-test of `H₀: σ²X = σ²Y` using the ratio of sample variances.
///
/// Returns `None` unless both samples hold at least 2 observations.
///
/// # Examples
/// ```
/// use u_dispersion::{f_test, Accumulator};
/// // n = 10, s² = 4 and n = 12, s² = 2
/// let x = Accumulator::from_parts(10, 0.0, 36.0);
/// let y = Accumulator::from_parts(12, 0.0, 22.0);
/// let f = f_test(&x, &y).unwrap();
/// assert_eq!((f.statistic, f.df_x, f.df_y), (2.0, 9.0, 11.0));
/// ```
pub fn f_test(x: &Accumulator, y: &Accumulator) -> Option<FTest> {
    f_test_with(x, y, &SpecialFunctions)
}

/// [`f_test`] with a caller-supplied oracle.
pub fn f_test_with(x: &Accumulator, y: &Accumulator, oracle: &(impl CdfOracle + ?Sized)) -> Option<FTest> {
    let (var_x, var_y) = (x.sample_variance()?, y.sample_variance()?);
    let df_x = (x.count() - 1) as f64;
    let df_y = (y.count() - 1) as f64;
    let statistic = var_x / var_y;
    let p = 1.0 - oracle.fisher_f_cdf(statistic, df_x, df_y);
    Some(FTest {
        statistic,
        df_x,
        df_y,
        p_value_one_sided: p,
        p_value_two_sided: 2.0 * p.min(1.0 - p),
    })
}

/// Chi-squared test of `H₀: σ² = sigma0_sq`.
///
/// Returns `Ok(None)` unless the state holds at least 2 observations.
///
/// # Errors
/// Returns [`StateError::InvalidParameter`] unless `sigma0_sq` is finite
/// and positive.
pub fn chi_squared_variance_test(acc: &Accumulator, sigma0_sq: f64) -> Result<Option<ChiSquaredTest>, StateError> {
    chi_squared_variance_test_with(acc, sigma0_sq, &SpecialFunctions)
}

/// [`chi_squared_variance_test`] with a caller-supplied oracle.
///
/// # Errors
/// Returns [`StateError::InvalidParameter`] unless `sigma0_sq` is finite
/// and positive.
pub fn chi_squared_variance_test_with(
    acc: &Accumulator,
    sigma0_sq: f64,
    oracle: &(impl CdfOracle + ?Sized),
) -> Result<Option<ChiSquaredTest>, StateError> {
    if !(sigma0_sq.is_finite() && sigma0_sq > 0.0) {
        tracing::warn!(sigma0_sq, "hypothesised variance must be finite and positive");
        return Err(StateError::InvalidParameter(format!(
            "hypothesised variance must be finite and positive, got {sigma0_sq}"
        )));
    }
    if acc.count() < 2 {
        return Ok(None);
    }
    let df = (acc.count() - 1) as f64;
    let statistic = acc.css_readout() / sigma0_sq;
    let p = 1.0 - oracle.chi_squared_cdf(statistic, df);
    Ok(Some(ChiSquaredTest {
        statistic,
        degrees_of_freedom: df,
        p_value_one_sided: p,
        p_value_two_sided: 2.0 * p.min(1.0 - p),
    }))
}

/// Two-sample tests over a combined state whose slot 0 holds X and slot 1
/// holds Y.
impl<B: AsRef<[u8]>> TwoSample<B> {
    /// Pooled two-sample t-test of X against Y.
    pub fn pooled_t_test(&self) -> Option<TTest> {
        let (x, y) = self.pair();
        two_sample_pooled_t_test(&x, &y)
    }

    /// Welch two-sample t-test of X against Y.
    pub fn welch_t_test(&self) -> Option<TTest> {
        let (x, y) = self.pair();
        two_sample_welch_t_test(&x, &y)
    }

    /// F-test of the variance ratio X / Y.
    pub fn f_test(&self) -> Option<FTest> {
        let (x, y) = self.pair();
        f_test(&x, &y)
    }

    /// [`pooled_t_test`](Self::pooled_t_test) with a caller-supplied oracle.
    pub fn pooled_t_test_with(&self, oracle: &(impl CdfOracle + ?Sized)) -> Option<TTest> {
        let (x, y) = self.pair();
        two_sample_pooled_t_test_with(&x, &y, oracle)
    }

    /// [`welch_t_test`](Self::welch_t_test) with a caller-supplied oracle.
    pub fn welch_t_test_with(&self, oracle: &(impl CdfOracle + ?Sized)) -> Option<TTest> {
        let (x, y) = self.pair();
        two_sample_welch_t_test_with(&x, &y, oracle)
    }

    /// [`f_test`](Self::f_test) with a caller-supplied oracle.
    pub fn f_test_with(&self, oracle: &(impl CdfOracle + ?Sized)) -> Option<FTest> {
        let (x, y) = self.pair();
        f_test_with(&x, &y, oracle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(values: &[f64]) -> Accumulator {
        values.iter().copied().collect()
    }

    fn textbook() -> Accumulator {
        sample(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])
    }

    fn small() -> Accumulator {
        sample(&[1.0, 2.0, 3.0, 4.0, 5.0])
    }

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!((actual - expected).abs() < tol, "expected {expected}, got {actual}");
    }

    /// Returns a fixed CDF value for every query.
    struct ConstantOracle(f64);

    impl CdfOracle for ConstantOracle {
        fn student_t_cdf(&self, _t: f64, _df: f64) -> f64 {
            self.0
        }
        fn fisher_f_cdf(&self, _f: f64, _df1: f64, _df2: f64) -> f64 {
            self.0
        }
        fn chi_squared_cdf(&self, _x: f64, _df: f64) -> f64 {
            self.0
        }
    }

    // --- one-sample ---

    #[test]
    fn test_one_sample_reference() {
        let t = one_sample_t_test(&small()).unwrap();
        assert_close(t.statistic, 4.242640687119286, 1e-12);
        assert_eq!(t.degrees_of_freedom, 4.0);
        assert_close(t.p_value_one_sided, 0.0066178, 1e-6);
        assert_close(t.p_value_two_sided, 0.0132356, 2e-6);
    }

    #[test]
    fn test_one_sample_empty_is_absent() {
        assert!(one_sample_t_test(&Accumulator::new()).is_none());
    }

    #[test]
    fn test_one_sample_single_observation_is_nan() {
        let t = one_sample_t_test(&sample(&[3.0])).unwrap();
        assert_eq!(t.degrees_of_freedom, 0.0);
        assert!(t.statistic.is_nan());
        assert!(t.p_value_one_sided.is_nan());
    }

    #[test]
    fn test_one_sample_zero_variance() {
        let t = one_sample_t_test(&sample(&[2.0, 2.0, 2.0])).unwrap();
        assert_eq!(t.statistic, f64::INFINITY);
        assert_eq!(t.p_value_one_sided, 0.0);
        assert_eq!(t.p_value_two_sided, 0.0);
    }

    #[test]
    fn test_one_sample_against_shifts_mean() {
        let acc = small();
        let at_mean = one_sample_t_test_against(&acc, 3.0).unwrap().unwrap();
        assert_eq!(at_mean.statistic, 0.0);
        assert_close(at_mean.p_value_two_sided, 1.0, 1e-12);

        let zero = one_sample_t_test_against(&acc, 0.0).unwrap().unwrap();
        assert_close(zero.statistic, one_sample_t_test(&acc).unwrap().statistic, 1e-12);

        let shifted: Accumulator = [11.0, 12.0, 13.0, 14.0, 15.0].into_iter().collect();
        let t = one_sample_t_test_against(&shifted, 10.0).unwrap().unwrap();
        assert_close(t.statistic, 4.242640687119286, 1e-9);
    }

    #[test]
    fn test_one_sample_against_rejects_non_finite() {
        assert!(matches!(
            one_sample_t_test_against(&small(), f64::NAN),
            Err(StateError::InvalidParameter(_))
        ));
        assert!(one_sample_t_test_against(&small(), f64::INFINITY).is_err());
        assert_eq!(one_sample_t_test_against(&Accumulator::new(), 1.0), Ok(None));
    }

    // --- two-sample ---

    #[test]
    fn test_pooled_reference() {
        let t = two_sample_pooled_t_test(&textbook(), &small()).unwrap();
        assert_close(t.statistic, 1.7953950048508052, 1e-12);
        assert_eq!(t.degrees_of_freedom, 11.0);
        assert_close(t.p_value_one_sided, 0.050041, 1e-5);
        assert_close(t.p_value_two_sided, 0.100082, 2e-5);
    }

    #[test]
    fn test_pooled_absent_boundaries() {
        let one = sample(&[1.0]);
        let two = sample(&[1.0, 2.0]);
        assert!(two_sample_pooled_t_test(&Accumulator::new(), &small()).is_none());
        assert!(two_sample_pooled_t_test(&small(), &Accumulator::new()).is_none());
        assert!(two_sample_pooled_t_test(&one, &one).is_none());
        assert!(two_sample_pooled_t_test(&one, &two).is_some());
    }

    #[test]
    fn test_pooled_huge_counts_do_not_overflow() {
        let x = Accumulator::from_parts(u64::MAX, 1.0, 1.0);
        let y = Accumulator::from_parts(2, 1.0, 1.0);
        let t = two_sample_pooled_t_test(&x, &y).unwrap();
        assert!(t.degrees_of_freedom > 1e19);
        assert!(two_sample_pooled_t_test(&y, &x).is_some());
    }

    #[test]
    fn test_welch_reference() {
        let t = two_sample_welch_t_test(&textbook(), &small()).unwrap();
        assert_close(t.statistic, 1.9321835661585918, 1e-12);
        assert_close(t.degrees_of_freedom, 10.51752921535893, 1e-9);
        assert_close(t.p_value_one_sided, 0.040352, 1e-4);
        assert_close(t.p_value_two_sided, 0.080705, 2e-4);
    }

    #[test]
    fn test_welch_absent_boundaries() {
        let one = sample(&[1.0]);
        assert!(two_sample_welch_t_test(&one, &small()).is_none());
        assert!(two_sample_welch_t_test(&small(), &one).is_none());
        assert!(two_sample_welch_t_test(&sample(&[1.0, 2.0]), &sample(&[3.0, 5.0])).is_some());
    }

    #[test]
    fn test_two_sample_antisymmetric() {
        let (x, y) = (textbook(), small());
        let xy = two_sample_welch_t_test(&x, &y).unwrap();
        let yx = two_sample_welch_t_test(&y, &x).unwrap();
        assert_close(xy.statistic, -yx.statistic, 1e-12);
        assert_close(xy.p_value_two_sided, yx.p_value_two_sided, 1e-12);
    }

    // --- F ---

    #[test]
    fn test_f_reference() {
        let x = Accumulator::from_parts(10, 30.0, 36.0);
        let y = Accumulator::from_parts(12, -6.0, 22.0);
        let f = f_test(&x, &y).unwrap();
        assert_eq!(f.statistic, 2.0);
        assert_eq!((f.df_x, f.df_y), (9.0, 11.0));
        assert_close(f.p_value_one_sided, 0.1385662, 1e-6);
        assert_close(f.p_value_two_sided, 0.2771324, 2e-6);
    }

    #[test]
    fn test_f_observed_data() {
        let f = f_test(&textbook(), &small()).unwrap();
        assert_close(f.statistic, 1.8285714285714285, 1e-12);
        assert_eq!((f.df_x, f.df_y), (7.0, 4.0));
        assert_close(f.p_value_one_sided, 0.292227, 1e-4);
    }

    #[test]
    fn test_f_zero_variance() {
        let flat = sample(&[4.0, 4.0, 4.0]);
        let f = f_test(&small(), &flat).unwrap();
        assert_eq!(f.statistic, f64::INFINITY);
        assert_eq!(f.p_value_one_sided, 0.0);
        assert!(f_test(&flat, &flat).unwrap().statistic.is_nan());
    }

    #[test]
    fn test_f_absent_boundaries() {
        assert!(f_test(&sample(&[1.0]), &small()).is_none());
        assert!(f_test(&small(), &Accumulator::new()).is_none());
    }

    // --- chi-squared ---

    #[test]
    fn test_chi_squared_reference() {
        let chi = chi_squared_variance_test(&textbook(), 4.0).unwrap().unwrap();
        assert_close(chi.statistic, 8.0, 1e-12);
        assert_eq!(chi.degrees_of_freedom, 7.0);
        assert_close(chi.p_value_one_sided, 0.332594, 1e-5);
        assert_close(chi.p_value_two_sided, 0.665188, 2e-5);
    }

    #[test]
    fn test_chi_squared_parameters() {
        assert_eq!(chi_squared_variance_test(&sample(&[1.0]), 1.0), Ok(None));
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                chi_squared_variance_test(&textbook(), bad),
                Err(StateError::InvalidParameter(_))
            ));
        }
    }

    // --- oracle plumbing ---

    #[test]
    fn test_p_values_follow_oracle() {
        let oracle = ConstantOracle(0.75);
        let t = one_sample_t_test_with(&small(), &oracle).unwrap();
        assert_eq!((t.p_value_one_sided, t.p_value_two_sided), (0.25, 0.5));

        let f = f_test_with(&textbook(), &small(), &oracle).unwrap();
        assert_eq!((f.p_value_one_sided, f.p_value_two_sided), (0.25, 0.5));

        let low = ConstantOracle(0.125);
        let chi = chi_squared_variance_test_with(&textbook(), 4.0, &low).unwrap().unwrap();
        assert_eq!((chi.p_value_one_sided, chi.p_value_two_sided), (0.875, 0.25));
    }

    #[test]
    fn test_dyn_oracle() {
        let oracle: Box<dyn CdfOracle> = Box::new(SpecialFunctions);
        let via_dyn = two_sample_pooled_t_test_with(&textbook(), &small(), oracle.as_ref());
        assert_eq!(via_dyn, two_sample_pooled_t_test(&textbook(), &small()));
    }

    // --- combined state ---

    #[test]
    fn test_two_sample_state_matches_pair() {
        let mut state = TwoSample::zeroed(2).unwrap();
        for &x in &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            state.update(0, x).unwrap();
        }
        for &y in &[1.0, 2.0, 3.0, 4.0, 5.0] {
            state.update(1, y).unwrap();
        }
        let (x, y) = (textbook(), small());
        assert_eq!(state.pooled_t_test(), two_sample_pooled_t_test(&x, &y));
        assert_eq!(state.welch_t_test(), two_sample_welch_t_test(&x, &y));
        assert_eq!(state.f_test(), f_test(&x, &y));
        assert_eq!(
            state.f_test_with(&ConstantOracle(0.5)).map(|f| f.p_value_two_sided),
            Some(1.0)
        );
    }

    // --- records ---

    #[test]
    fn test_tuple_order() {
        let t = TTest {
            statistic: 1.0,
            degrees_of_freedom: 2.0,
            p_value_one_sided: 0.3,
            p_value_two_sided: 0.6,
        };
        assert_eq!(t.to_tuple(), (1.0, 2.0, 0.3, 0.6));

        let f = FTest {
            statistic: 1.0,
            df_x: 2.0,
            df_y: 3.0,
            p_value_one_sided: 0.4,
            p_value_two_sided: 0.8,
        };
        assert_eq!(f.to_tuple(), (1.0, 2.0, 3.0, 0.4, 0.8));
    }

    #[test]
    fn test_result_serde_json() {
        let f = f_test(&textbook(), &small()).unwrap();
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"df_x\":7.0"));
        let back: FTest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}

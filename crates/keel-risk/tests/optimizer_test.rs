//! Integration tests for the optimizer fallback ladder.

use approx::assert_abs_diff_eq;
use keel_risk::covariance::min_eigenvalue;
use keel_risk::{
    AttemptOutcome, CovarianceEstimator, MeanVarianceOptimizer, Objective, OptimizationInput,
    OptimizerConfig, OptimizerError, SampleCovariance,
};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

/// A and B perfectly anti-correlated, C uncorrelated with both.
fn anti_correlated_returns(periods: usize) -> Array2<f64> {
    Array2::from_shape_fn((periods, 3), |(t, j)| {
        let a = if t % 2 == 0 { 0.01 } else { -0.01 };
        match j {
            0 => a,
            1 => -a,
            _ => {
                if t % 4 < 2 {
                    0.005
                } else {
                    -0.005
                }
            }
        }
    })
}

fn input_from_returns(returns: &Array2<f64>, risk_free_rate: f64) -> OptimizationInput {
    let covariance = SampleCovariance::default().estimate(returns).unwrap();
    let expected_returns = returns.mean_axis(Axis(0)).unwrap();
    OptimizationInput {
        symbols: (0..returns.ncols()).map(|i| format!("S{i}")).collect(),
        expected_returns,
        covariance,
        risk_free_rate,
    }
}

/// Max-Sharpe fails on zero means and min-variance takes over.
///
/// The solver gives C a strictly positive weight, but it is tiny next to the
/// hedged A/B pair and falls under the 1e-4 cleaning threshold, so the
/// cleaned weights hold C at zero. The positivity check is therefore made on
/// the raw solver output.
#[test]
fn test_anti_correlated_scenario_falls_back_once() {
    let returns = anti_correlated_returns(40);
    let mut input = input_from_returns(&returns, 0.0);
    input.symbols = vec!["A".into(), "B".into(), "C".into()];

    // Zero means: no asset beats the risk-free rate
    let result = MeanVarianceOptimizer::try_default()
        .unwrap()
        .optimize(&input)
        .unwrap();

    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].objective, Objective::MaxSharpe);
    assert!(matches!(
        result.attempts[0].outcome,
        AttemptOutcome::Failed(_)
    ));
    assert_eq!(result.attempts[1].objective, Objective::MinVariance);
    assert_eq!(result.attempts[1].outcome, AttemptOutcome::Succeeded);
    assert_eq!(result.objective, Objective::MinVariance);
    assert!(result.used_fallback());

    let raw_c = result.raw_weights.get("C").unwrap();
    assert!(raw_c > 0.0);
    assert!(raw_c < 1e-4);
    assert_eq!(result.weights.get("C"), Some(0.0));
    assert_abs_diff_eq!(result.weights.total(), 1.0, epsilon = 1e-6);
    assert!(result.weights.iter().all(|(_, w)| w >= -1e-9));
    assert!(!result.performance.sharpe_ratio.is_nan());
}

#[test]
fn test_both_rungs_fail() {
    let returns = anti_correlated_returns(40);
    let input = input_from_returns(&returns, 0.0);
    let config = OptimizerConfig {
        max_iterations: 1,
        ..Default::default()
    };

    let err = MeanVarianceOptimizer::new(config)
        .unwrap()
        .optimize(&input)
        .unwrap_err();
    match err {
        OptimizerError::OptimizationFailed { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[1].objective, Objective::MinVariance);
            assert!(
                attempts
                    .iter()
                    .all(|a| matches!(a.outcome, AttemptOutcome::Failed(_)))
            );
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_min_variance_is_not_retried() {
    let returns = anti_correlated_returns(40);
    let input = input_from_returns(&returns, 0.0);
    let config = OptimizerConfig {
        objective: Objective::MinVariance,
        max_iterations: 1,
        ..Default::default()
    };

    let err = MeanVarianceOptimizer::new(config)
        .unwrap()
        .optimize(&input)
        .unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::OptimizationFailed { ref attempts } if attempts.len() == 1
    ));
}

#[test]
fn test_conditioned_covariance_is_positive_definite() {
    let returns = anti_correlated_returns(40);
    let covariance = SampleCovariance::default().estimate(&returns).unwrap();
    assert!(min_eigenvalue(&covariance).unwrap() < 1e-12);

    let conditioned = keel_risk::condition_covariance(&covariance, 1e-6).unwrap();
    assert!(min_eigenvalue(&conditioned.matrix).unwrap() >= 1e-6 - 1e-12);
}

#[rstest]
#[case(Objective::MaxSharpe, false)]
#[case(Objective::MinVariance, false)]
#[case(Objective::TargetReturn(0.001), false)]
#[case(Objective::MaxSharpe, true)]
#[case(Objective::MinVariance, true)]
fn test_weights_sum_to_one(#[case] objective: Objective, #[case] allow_short: bool) {
    let config = OptimizerConfig {
        objective,
        allow_short,
        ..Default::default()
    };
    let optimizer = MeanVarianceOptimizer::new(config).unwrap();

    for seed in 0..10 {
        let mut rng = StdRng::seed_from_u64(seed);
        let drift: Vec<f64> = (0..5).map(|_| rng.gen_range(-0.002..0.004)).collect();
        let returns = Array2::from_shape_fn((60, 5), |(_, j)| {
            drift[j] + rng.gen_range(-0.02..0.02)
        });
        let input = input_from_returns(&returns, 0.0001);

        let result = optimizer.optimize(&input).unwrap();
        assert_abs_diff_eq!(result.weights.total(), 1.0, epsilon = 1e-6);
        if !allow_short {
            assert!(result.weights.iter().all(|(_, w)| w >= -1e-9));
        }
        assert!(!result.performance.expected_return.is_nan());
        assert!(!result.performance.sharpe_ratio.is_nan());
    }
}

#[test]
fn test_target_return_meets_floor() {
    let expected_returns = Array1::from(vec![0.0005, 0.001, 0.0015, 0.002]);
    let covariance = Array2::from_diag(&Array1::from(vec![0.0001, 0.0002, 0.0003, 0.0004]));
    let input = OptimizationInput {
        symbols: vec!["W".into(), "X".into(), "Y".into(), "Z".into()],
        expected_returns,
        covariance,
        risk_free_rate: 0.0,
    };
    let config = OptimizerConfig {
        objective: Objective::TargetReturn(0.0014),
        winsorize_lower: 0.0,
        winsorize_upper: 1.0,
        ..Default::default()
    };

    let result = MeanVarianceOptimizer::new(config)
        .unwrap()
        .optimize(&input)
        .unwrap();
    assert_eq!(result.objective, Objective::TargetReturn(0.0014));
    assert!(result.performance.expected_return >= 0.0014 - 1e-6);
}

#[test]
fn test_reported_weights_sum_to_one() {
    // Equal variances split the portfolio into thirds, which do not round evenly
    let input = OptimizationInput {
        symbols: vec!["A".into(), "B".into(), "C".into()],
        expected_returns: Array1::from(vec![0.001, 0.001, 0.001]),
        covariance: Array2::eye(3) * 4e-4,
        risk_free_rate: 0.0,
    };
    let config = OptimizerConfig {
        objective: Objective::MinVariance,
        ..Default::default()
    };

    let result = MeanVarianceOptimizer::new(config)
        .unwrap()
        .optimize(&input)
        .unwrap();
    assert_abs_diff_eq!(result.weights.total(), 1.0, epsilon = 1e-9);

    let reported = result.rounded_weights();
    assert_abs_diff_eq!(reported.total(), 1.0, epsilon = 1e-6);
    assert!(reported.iter().all(|(_, w)| w > 0.33 && w < 0.34));
}

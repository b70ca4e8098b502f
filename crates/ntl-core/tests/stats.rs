use ntl_core::stats::{defined, mean, mean_at_or_below, quantile_linear, sample_std, MeanAccumulator};

#[test]
fn defined_drops_missing_and_nan() {
    let values = defined(vec![Some(1.0), None, Some(f64::NAN), Some(3.0)]);
    assert_eq!(values, vec![1.0, 3.0]);
}

#[test]
fn mean_of_empty_slice_is_undefined() {
    assert_eq!(mean(&[]), None);
    assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
}

#[test]
fn sample_std_uses_n_minus_one() {
    let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
    assert!((std - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);

    assert_eq!(sample_std(&[5.0]), None);
    assert_eq!(sample_std(&[3.0, 3.0, 3.0]), Some(0.0));
}

#[test]
fn quantile_interpolates_between_ranks() {
    let values = [5.0, 1.0, 4.0, 2.0, 3.0];
    assert_eq!(quantile_linear(&values, 0.0), Some(1.0));
    assert_eq!(quantile_linear(&values, 0.25), Some(2.0));
    assert_eq!(quantile_linear(&values, 1.0), Some(5.0));
    assert_eq!(quantile_linear(&[1.0, 2.0], 0.5), Some(1.5));
    assert_eq!(quantile_linear(&[], 0.5), None);
}

#[test]
fn low_quantile_baseline_for_two_readings() {
    let values = [5.0, 5.1];
    let threshold = quantile_linear(&values, 0.05).unwrap();
    assert!(threshold > 5.0 && threshold < 5.1);
    assert_eq!(mean_at_or_below(&values, threshold), Some(5.0));
}

#[test]
fn accumulator_skips_missing_values() {
    let mut acc = MeanAccumulator::default();
    assert_eq!(acc.mean(), None);

    acc.push(Some(2.0));
    acc.push(None);
    acc.push(Some(f64::NAN));
    acc.push(Some(4.0));

    assert_eq!(acc.mean(), Some(3.0));
}

//! Freshness decay curves.

use pipescale_core::DecayCurve;

/// Freshness multiplier for a record `age_minutes` old.
///
/// Clamped to `[min_factor, 1]`: a stale batch lowers the estimate smoothly
/// instead of collapsing it to zero.
pub fn freshness_factor(
    curve: DecayCurve,
    age_minutes: f64,
    window_minutes: f64,
    min_factor: f64,
) -> f64 {
    let age = age_minutes.max(0.0);
    let raw = match curve {
        DecayCurve::Linear => 1.0 - age / window_minutes,
        DecayCurve::Exponential { half_life_minutes } => 0.5f64.powf(age / half_life_minutes),
    };
    raw.clamp(min_factor, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR: DecayCurve = DecayCurve::Linear;

    #[test]
    fn linear_reference_points() {
        assert_eq!(freshness_factor(LINEAR, 0.0, 30.0, 0.1), 1.0);
        assert!((freshness_factor(LINEAR, 15.0, 30.0, 0.1) - 0.5).abs() < 1e-12);
        // 1 − 29/30 ≈ 0.033 is below the floor.
        assert_eq!(freshness_factor(LINEAR, 29.0, 30.0, 0.1), 0.1);
        assert_eq!(freshness_factor(LINEAR, 45.0, 30.0, 0.1), 0.1);
    }

    #[test]
    fn exponential_halves_per_half_life() {
        let curve = DecayCurve::Exponential { half_life_minutes: 10.0 };
        assert!((freshness_factor(curve, 10.0, 30.0, 0.1) - 0.5).abs() < 1e-12);
        assert!((freshness_factor(curve, 20.0, 30.0, 0.1) - 0.25).abs() < 1e-12);
        assert_eq!(freshness_factor(curve, 100.0, 30.0, 0.1), 0.1);
    }

    #[test]
    fn negative_age_counts_as_fresh() {
        assert_eq!(freshness_factor(LINEAR, -3.0, 30.0, 0.1), 1.0);
    }

    #[test]
    fn monotonic_and_bounded() {
        for curve in [LINEAR, DecayCurve::Exponential { half_life_minutes: 7.5 }] {
            let mut prev = f64::INFINITY;
            for step in 0..=600 {
                let age = step as f64 * 0.1;
                let f = freshness_factor(curve, age, 30.0, 0.1);
                assert!((0.1..=1.0).contains(&f), "{curve:?} age {age}: {f}");
                assert!(f <= prev, "{curve:?} not monotonic at age {age}");
                prev = f;
            }
        }
    }
}

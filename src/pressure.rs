//! The disk-pressure model: a pure function mapping current disk
//! utilization and a configured headroom target to a factor that scales how
//! long queued volumes are allowed to linger.
//!
//! Inspired by the disk-pressure feature in Apache Mesos: the closer free
//! space gets to the reserved headroom, the more aggressively queued
//! volumes should be evicted early.

use crate::error::{Error, Result};

/// Default factor used when [`pressure_factor`] itself fails (§4.4's "on
/// error use 0.10" rule lives with the pruner, but the constant belongs
/// here next to the function it overrides).
pub const FALLBACK_FACTOR: f64 = 0.10;

/// Returns a value in `[0.0, 1.0]` to multiply a candidate's configured
/// lifespan by.
///
/// `headroom` is the fraction of `total` bytes that should be kept free.
/// While at least that much space is free, the factor is `1.0` (no
/// acceleration). As free space is consumed past that reserve, the factor
/// shrinks linearly toward `0.0`.
pub fn pressure_factor(total: u64, free: u64, headroom: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&headroom) {
        return Err(Error::InvalidArgument(format!(
            "headroom must be between 0.0 and 1.0 inclusive, got {headroom}"
        )));
    }

    let reserved = (total as f64 * headroom).ceil() as u64;

    // Covers both "plenty of free space" and `reserved == 0` (headroom of
    // 0.0, or total == 0): either way there's no reserve to be under
    // pressure about, so free is always >= reserved.
    if free >= reserved {
        return Ok(1.0);
    }

    Ok(1.0 - (reserved - free) as f64 / reserved as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_table() {
        let cases: &[(u64, u64, f64, Option<f64>)] = &[
            (1000, 110, 0.10, Some(1.0)),
            (1000, 100, 0.10, Some(1.0)),
            (1000, 99, 0.10, Some(0.99)),
            (1000, 0, 0.10, Some(0.0)),
            (1000, 100, -0.10, None),
            (1000, 100, 10.0, None),
        ];

        for &(total, free, headroom, expected) in cases {
            let result = pressure_factor(total, free, headroom);
            match expected {
                Some(factor) => {
                    let got = result.unwrap_or_else(|e| panic!("unexpected error for headroom {headroom}: {e}"));
                    assert!(
                        (got - factor).abs() < 1e-9,
                        "headroom={headroom} total={total} free={free}: expected {factor}, got {got}"
                    );
                }
                None => {
                    assert!(result.is_err(), "expected error for headroom {headroom}");
                }
            }
        }
    }

    #[test]
    fn factor_is_always_in_unit_interval_when_ok() {
        for free in (0..=2000).step_by(97) {
            let factor = pressure_factor(1000, free, 0.25).unwrap();
            assert!((0.0..=1.0).contains(&factor), "factor {factor} out of range for free={free}");
        }
    }

    #[test]
    fn zero_total_has_no_pressure() {
        assert_eq!(pressure_factor(0, 0, 0.5).unwrap(), 1.0);
    }
}

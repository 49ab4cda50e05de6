use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{EvalError, EvalResult};

/// The closed set of duration units. The string form is the unit suffix
/// as written in source (`5.min`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum DurationUnit {
    #[strum(serialize = "ns")]
    Nanoseconds,
    #[strum(serialize = "us")]
    Microseconds,
    #[strum(serialize = "ms")]
    Milliseconds,
    #[strum(serialize = "s")]
    Seconds,
    #[strum(serialize = "min")]
    Minutes,
    #[strum(serialize = "h")]
    Hours,
    #[strum(serialize = "d")]
    Days,
}

impl DurationUnit {
    /// Length of one unit in the common base (seconds).
    #[must_use]
    pub fn in_seconds(self) -> f64 {
        match self {
            Self::Nanoseconds => 1e-9,
            Self::Microseconds => 1e-6,
            Self::Milliseconds => 1e-3,
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3600.0,
            Self::Days => 86_400.0,
        }
    }
}

/// A duration value: magnitude plus unit.
///
/// Arithmetic and comparison normalize both operands to seconds first;
/// the unit is presentation state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Duration {
    pub value: f64,
    pub unit: DurationUnit,
}

impl Duration {
    #[must_use]
    pub fn new(value: f64, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    /// The magnitude in the common base (seconds).
    #[must_use]
    pub fn in_seconds(&self) -> f64 {
        self.value * self.unit.in_seconds()
    }

    /// Converts to `unit`, preserving the base magnitude.
    ///
    /// Restricted to common-base values this is a bijection:
    /// `x.convert_to(u).convert_to(x.unit) == x`.
    #[must_use]
    pub fn convert_to(&self, unit: DurationUnit) -> Self {
        Self {
            value: self.in_seconds() / unit.in_seconds(),
            unit,
        }
    }

    /// Coerces to a host duration, rejecting NaN, infinities, negative
    /// values, and magnitudes outside the 64-bit seconds range.
    pub fn to_std(&self) -> EvalResult<std::time::Duration> {
        let seconds = self.in_seconds();
        if seconds.is_nan() || seconds.is_infinite() {
            return Err(EvalError::arithmetic(format!(
                "Cannot convert `{self}` to a host duration."
            )));
        }
        if seconds < 0.0 || seconds >= i64::MAX as f64 {
            return Err(EvalError::arithmetic(format!(
                "Duration `{self}` is outside the host-representable range."
            )));
        }
        Ok(std::time::Duration::from_secs_f64(seconds))
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.in_seconds() == other.in_seconds()
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.in_seconds().partial_cmp(&other.in_seconds())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", super::format_number(self.value), self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn comparison_normalizes_units() {
        assert_eq!(Duration::new(1.0, DurationUnit::Seconds), Duration::new(1000.0, DurationUnit::Milliseconds));
        assert!(Duration::new(2.0, DurationUnit::Minutes) > Duration::new(90.0, DurationUnit::Seconds));
    }

    #[test]
    fn conversion_is_a_bijection_on_base_values() {
        for from in DurationUnit::iter() {
            for to in DurationUnit::iter() {
                let original = Duration::new(42.0, from);
                let there_and_back = original.convert_to(to).convert_to(from);
                assert!(
                    (there_and_back.value - original.value).abs() < 1e-9,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn host_coercion_rejects_non_finite_values() {
        assert!(Duration::new(f64::NAN, DurationUnit::Seconds).to_std().is_err());
        assert!(Duration::new(f64::INFINITY, DurationUnit::Seconds).to_std().is_err());
        assert!(Duration::new(f64::NEG_INFINITY, DurationUnit::Seconds).to_std().is_err());
        assert!(Duration::new(-1.0, DurationUnit::Seconds).to_std().is_err());
        assert_eq!(
            Duration::new(1.5, DurationUnit::Seconds).to_std().unwrap(),
            std::time::Duration::from_millis(1500)
        );
    }

    #[test]
    fn display_uses_the_unit_suffix() {
        assert_eq!(Duration::new(5.0, DurationUnit::Minutes).to_string(), "5.min");
        assert_eq!(Duration::new(1.5, DurationUnit::Hours).to_string(), "1.5.h");
    }
}

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The closed set of data-size units: decimal (kb = 1000 b) and binary
/// (kib = 1024 b) families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum DataSizeUnit {
    #[strum(serialize = "b")]
    Bytes,
    #[strum(serialize = "kb")]
    Kilobytes,
    #[strum(serialize = "mb")]
    Megabytes,
    #[strum(serialize = "gb")]
    Gigabytes,
    #[strum(serialize = "tb")]
    Terabytes,
    #[strum(serialize = "pb")]
    Petabytes,
    #[strum(serialize = "kib")]
    Kibibytes,
    #[strum(serialize = "mib")]
    Mebibytes,
    #[strum(serialize = "gib")]
    Gibibytes,
    #[strum(serialize = "tib")]
    Tebibytes,
    #[strum(serialize = "pib")]
    Pebibytes,
}

impl DataSizeUnit {
    /// Size of one unit in the common base (bytes).
    #[must_use]
    pub fn in_bytes(self) -> f64 {
        match self {
            Self::Bytes => 1.0,
            Self::Kilobytes => 1e3,
            Self::Megabytes => 1e6,
            Self::Gigabytes => 1e9,
            Self::Terabytes => 1e12,
            Self::Petabytes => 1e15,
            Self::Kibibytes => 1024.0,
            Self::Mebibytes => 1024.0_f64.powi(2),
            Self::Gibibytes => 1024.0_f64.powi(3),
            Self::Tebibytes => 1024.0_f64.powi(4),
            Self::Pebibytes => 1024.0_f64.powi(5),
        }
    }
}

/// A data-size value: magnitude plus unit. Arithmetic and comparison
/// normalize to bytes; the unit is presentation state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataSize {
    pub value: f64,
    pub unit: DataSizeUnit,
}

impl DataSize {
    #[must_use]
    pub fn new(value: f64, unit: DataSizeUnit) -> Self {
        Self { value, unit }
    }

    /// The magnitude in the common base (bytes).
    #[must_use]
    pub fn in_bytes(&self) -> f64 {
        self.value * self.unit.in_bytes()
    }

    /// Converts to `unit`, preserving the base magnitude.
    #[must_use]
    pub fn convert_to(&self, unit: DataSizeUnit) -> Self {
        Self {
            value: self.in_bytes() / unit.in_bytes(),
            unit,
        }
    }
}

impl PartialEq for DataSize {
    fn eq(&self, other: &Self) -> bool {
        self.in_bytes() == other.in_bytes()
    }
}

impl PartialOrd for DataSize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.in_bytes().partial_cmp(&other.in_bytes())
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", super::format_number(self.value), self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn decimal_and_binary_families_differ() {
        assert_eq!(DataSize::new(1.0, DataSizeUnit::Kilobytes).in_bytes(), 1000.0);
        assert_eq!(DataSize::new(1.0, DataSizeUnit::Kibibytes).in_bytes(), 1024.0);
        assert!(DataSize::new(1.0, DataSizeUnit::Kibibytes) > DataSize::new(1.0, DataSizeUnit::Kilobytes));
    }

    #[test]
    fn conversion_round_trips() {
        for from in DataSizeUnit::iter() {
            for to in DataSizeUnit::iter() {
                let original = DataSize::new(3.0, from);
                let back = original.convert_to(to).convert_to(from);
                assert!((back.value - original.value).abs() < 1e-9, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn unit_suffixes_parse() {
        assert_eq!("mib".parse::<DataSizeUnit>().unwrap(), DataSizeUnit::Mebibytes);
        assert!("xb".parse::<DataSizeUnit>().is_err());
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// A lazy integer sequence `start..=end` with a step.
///
/// Never materialized: iteration yields values on demand, and the value
/// is not exportable to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntSeq {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl IntSeq {
    /// A sequence with step 1 (or -1 for descending bounds is not a
    /// thing: an empty sequence results when `end < start`).
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end, step: 1 }
    }

    /// The same bounds with a different step. Callers validate that
    /// `step != 0` before constructing.
    #[must_use]
    pub fn with_step(self, step: i64) -> Self {
        Self { step, ..self }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        if self.step > 0 {
            if self.start > self.end {
                0
            } else {
                (self.end - self.start) as u64 / self.step as u64 + 1
            }
        } else if self.start < self.end {
            0
        } else {
            (self.start - self.end) as u64 / self.step.unsigned_abs() + 1
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.iter().any(|v| v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + use<> {
        let step = self.step;
        let mut current = self.start;
        let mut remaining = self.len();
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            let value = current;
            current = current.wrapping_add(step);
            Some(value)
        })
    }
}

impl fmt::Display for IntSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step == 1 {
            write!(f, "IntSeq({}, {})", self.start, self.end)
        } else {
            write!(f, "IntSeq({}, {}).step({})", self.start, self.end, self.step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascending_sequence() {
        let seq = IntSeq::new(1, 4);
        assert_eq!(seq.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn stepped_sequence() {
        let seq = IntSeq::new(0, 10).with_step(3);
        assert_eq!(seq.iter().collect::<Vec<_>>(), vec![0, 3, 6, 9]);
    }

    #[test]
    fn descending_sequence() {
        let seq = IntSeq::new(5, 1).with_step(-2);
        assert_eq!(seq.iter().collect::<Vec<_>>(), vec![5, 3, 1]);
    }

    #[test]
    fn empty_sequences() {
        assert!(IntSeq::new(3, 1).is_empty());
        assert!(IntSeq::new(1, 3).with_step(-1).is_empty());
        assert!(!IntSeq::new(2, 2).is_empty());
    }
}

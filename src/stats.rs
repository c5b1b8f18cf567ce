//! Per-station measurement volume and its quantile statistics.

use crate::error::{AppError, Result};
use crate::models::{ResultSummary, StationId};
use std::collections::BTreeMap;

/// Station id to summed `n_values`. Stations without matching results are absent.
pub type ValueCounts = BTreeMap<StationId, u64>;

pub fn value_count_by_station(results: &[&ResultSummary]) -> ValueCounts {
    let mut counts = ValueCounts::new();
    for result in results {
        *counts.entry(result.station_id).or_insert(0) += result.n_values;
    }
    counts
}

/// Which side of a range a quantile is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

/// Summary statistics over the non-empty set of station counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CountStats {
    sorted: Vec<u64>,
}

impl CountStats {
    /// `None` when no station has data; callers treat that as "no constraint".
    pub fn from_counts(counts: &ValueCounts) -> Option<Self> {
        if counts.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = counts.values().copied().collect();
        sorted.sort_unstable();
        Some(Self { sorted })
    }

    pub fn station_count(&self) -> usize {
        self.sorted.len()
    }

    pub fn min(&self) -> u64 {
        self.sorted[0]
    }

    pub fn max(&self) -> u64 {
        self.sorted[self.sorted.len() - 1]
    }

    pub fn median(&self) -> f64 {
        self.quantile(50.0)
    }

    /// Linear-interpolation estimate (R type 7) for percentile `p` in `[0, 100]`.
    pub fn quantile(&self, p: f64) -> f64 {
        let n = self.sorted.len();
        let p = p.clamp(0.0, 100.0);
        let h = (n - 1) as f64 * p / 100.0;
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let low = self.sorted[lo] as f64;
        let high = self.sorted[hi] as f64;
        low + (h - lo as f64) * (high - low)
    }

    /// Exact extremes at 0 and 100; otherwise the estimate floored for a
    /// lower bound and ceiled for an upper bound.
    pub fn bound(&self, p: f64, bound: Bound) -> u64 {
        if p <= 0.0 {
            return self.min();
        }
        if p >= 100.0 {
            return self.max();
        }
        let q = self.quantile(p);
        match bound {
            Bound::Lower => q.floor() as u64,
            Bound::Upper => q.ceil() as u64,
        }
    }

    /// Inclusive count window for a percentile range.
    pub fn window(&self, range: &QuantileRange) -> (u64, u64) {
        (
            self.bound(range.lower(), Bound::Lower),
            self.bound(range.upper(), Bound::Upper),
        )
    }
}

/// User-selected `[lower, upper]` percentile window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantileRange {
    lower: f64,
    upper: f64,
}

impl QuantileRange {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&lower) || !(0.0..=100.0).contains(&upper) {
            return Err(AppError::InvalidData(format!(
                "Quantile bounds must be within 0-100, got [{}, {}]",
                lower, upper
            )));
        }
        if lower > upper {
            return Err(AppError::InvalidData(format!(
                "Lower quantile {} is above upper quantile {}",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn full() -> Self {
        Self {
            lower: 0.0,
            upper: 100.0,
        }
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn is_full(&self) -> bool {
        self.lower == 0.0 && self.upper == 100.0
    }
}

impl Default for QuantileRange {
    fn default() -> Self {
        Self::full()
    }
}

//! Four-axis capacity algebra (cru, mru, sru, hru).

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A resource vector. All components are non-negative; `used <= total` is an
/// invariant maintained by the node model, not enforced here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub cru: u64,
    pub mru: u64,
    pub sru: u64,
    pub hru: u64,
}

impl Capacity {
    pub const ZERO: Capacity = Capacity {
        cru: 0,
        mru: 0,
        sru: 0,
        hru: 0,
    };

    pub fn new(cru: u64, mru: u64, sru: u64, hru: u64) -> Self {
        Self { cru, mru, sru, hru }
    }

    /// Sum all four axes into a single scalar. Used as the coarse
    /// utilization proxy the farmer configures as one threshold.
    pub fn sum_axes(&self) -> u64 {
        self.cru + self.mru + self.sru + self.hru
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Saturating subtraction, axis by axis.
    pub fn saturating_sub(&self, other: &Capacity) -> Capacity {
        Capacity {
            cru: self.cru.saturating_sub(other.cru),
            mru: self.mru.saturating_sub(other.mru),
            sru: self.sru.saturating_sub(other.sru),
            hru: self.hru.saturating_sub(other.hru),
        }
    }
}

impl Add for Capacity {
    type Output = Capacity;
    fn add(self, rhs: Capacity) -> Capacity {
        Capacity {
            cru: self.cru + rhs.cru,
            mru: self.mru + rhs.mru,
            sru: self.sru + rhs.sru,
            hru: self.hru + rhs.hru,
        }
    }
}

impl AddAssign for Capacity {
    fn add_assign(&mut self, rhs: Capacity) {
        *self = *self + rhs;
    }
}

impl Sub for Capacity {
    type Output = Capacity;
    fn sub(self, rhs: Capacity) -> Capacity {
        self.saturating_sub(&rhs)
    }
}

impl SubAssign for Capacity {
    fn sub_assign(&mut self, rhs: Capacity) {
        *self = self.saturating_sub(&rhs);
    }
}

/// Aggregate used/total capacity over a set of nodes, applying the
/// rent-contract rule: a node with an active rent contract contributes its
/// *total* capacity to the used side (rented capacity is sunk cost).
pub fn aggregate_usage<'a, I>(nodes: I) -> (Capacity, Capacity)
where
    I: IntoIterator<Item = (&'a Capacity, &'a Capacity, bool)>,
{
    let mut used = Capacity::ZERO;
    let mut total = Capacity::ZERO;

    for (node_used, node_total, has_active_rent_contract) in nodes {
        used += if has_active_rent_contract {
            *node_total
        } else {
            *node_used
        };
        total += *node_total;
    }

    (used, total)
}

/// Percentage utilization, 0 if total's axes are all zero.
pub fn utilization_percent(used: &Capacity, total: &Capacity) -> f64 {
    let total_sum = total.sum_axes();
    if total_sum == 0 {
        return 0.0;
    }
    100.0 * used.sum_axes() as f64 / total_sum as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_axes_adds_all_four() {
        let c = Capacity::new(1, 2, 3, 4);
        assert_eq!(c.sum_axes(), 10);
    }

    #[test]
    fn zero_total_gives_zero_utilization() {
        assert_eq!(utilization_percent(&Capacity::ZERO, &Capacity::ZERO), 0.0);
    }

    #[test]
    fn rent_contract_counts_total_as_used() {
        let total = Capacity::new(8, 16, 100, 1000);
        let used = Capacity::ZERO;
        let (agg_used, agg_total) =
            aggregate_usage([(&used, &total, true)]);
        assert_eq!(agg_used, total);
        assert_eq!(agg_total, total);
        assert_eq!(utilization_percent(&agg_used, &agg_total), 100.0);
    }

    #[test]
    fn saturating_sub_never_underflows() {
        let a = Capacity::new(1, 1, 1, 1);
        let b = Capacity::new(5, 5, 5, 5);
        assert_eq!(a.saturating_sub(&b), Capacity::ZERO);
    }
}

//! Allocation sizing policy.

/// Computes allocation sizes as a fixed percentage of the memory ceiling.
///
/// The default 70% leaves headroom under the heap's own hard ceiling (75%),
/// so the deliberate allocation does not trip an out-of-memory condition by
/// itself. All results truncate toward zero.
#[derive(Debug, Clone, Copy)]
pub struct AllocationPlanner {
    percent: u8,
}

impl AllocationPlanner {
    pub fn new(percent: u8) -> Self {
        Self { percent }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Bytes to allocate for a freshly discovered ceiling
    pub fn initial_target(&self, limit: u64) -> u64 {
        (u128::from(limit) * u128::from(self.percent) / 100) as u64
    }

    /// Bytes to add (or, when negative, give back) after the ceiling moved
    /// from `previous` to `current`
    pub fn delta_target(&self, previous: u64, current: u64) -> i64 {
        let diff = i128::from(current) - i128::from(previous);
        let delta = diff * i128::from(self.percent) / 100;
        delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_target_truncates() {
        let planner = AllocationPlanner::new(70);
        assert_eq!(planner.initial_target(1000), 700);
        assert_eq!(planner.initial_target(3), 2);
        assert_eq!(planner.initial_target(1), 0);
        assert_eq!(planner.initial_target(1_000_000_000), 700_000_000);
    }

    #[test]
    fn test_initial_target_does_not_overflow() {
        let planner = AllocationPlanner::new(70);
        assert_eq!(planner.initial_target(u64::MAX), (u64::MAX as u128 * 70 / 100) as u64);
    }

    #[test]
    fn test_delta_target_signed() {
        let planner = AllocationPlanner::new(70);
        assert_eq!(planner.delta_target(1000, 2000), 700);
        assert_eq!(planner.delta_target(2000, 1000), -700);
        assert_eq!(planner.delta_target(1000, 1000), 0);
        assert_eq!(planner.delta_target(1_000_000_000, 2_000_000_000), 700_000_000);
    }

    #[test]
    fn test_delta_target_truncates_toward_zero() {
        let planner = AllocationPlanner::new(70);
        assert_eq!(planner.delta_target(0, 3), 2);
        assert_eq!(planner.delta_target(3, 0), -2);
    }
}

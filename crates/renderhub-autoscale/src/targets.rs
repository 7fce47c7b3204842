//! Node target calculation for queued scale-up requests.
//!
//! Low-priority nodes are filled first, dedicated nodes take whatever
//! demand remains. Minimums are first raised to the currently allocated
//! counts so a request can never shrink a pool.

use renderhub_core::{ComputePool, ScaleTargets};

/// Current, minimum and maximum node counts for one priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeBounds {
    pub current: u32,
    pub min: u32,
    pub max: u32,
}

impl NodeBounds {
    pub fn new(current: u32, min: u32, max: u32) -> Self {
        Self { current, min, max }
    }

    /// No lower bound beyond what is allocated, no upper bound.
    pub fn unbounded() -> Self {
        Self::new(0, 0, u32::MAX)
    }

    fn effective_min(&self) -> i64 {
        i64::from(self.current.max(self.min))
    }
}

/// Split `requested` total nodes into low-priority and dedicated targets.
pub fn calculate_targets(requested: u32, low_priority: NodeBounds, dedicated: NodeBounds) -> ScaleTargets {
    let requested = i64::from(requested);
    let low_min = low_priority.effective_min();
    let dedicated_min = dedicated.effective_min();

    let low = clamp(requested - dedicated_min, low_min, i64::from(low_priority.max));
    let ded = clamp(requested - low, dedicated_min, i64::from(dedicated.max));

    ScaleTargets {
        dedicated: to_count(ded),
        low_priority: to_count(low),
    }
}

/// Targets for growing `pool` to `requested` nodes.
///
/// The pool's in-flight targets stand in for its current counts.
pub fn targets_for_pool(pool: &ComputePool, requested: u32) -> ScaleTargets {
    let settings = &pool.autoscale;
    calculate_targets(
        requested,
        NodeBounds::new(
            pool.target_low_priority,
            settings.min_low_priority,
            settings.max_low_priority,
        ),
        NodeBounds::new(pool.target_dedicated, settings.min_dedicated, settings.max_dedicated),
    )
}

// The upper bound wins when the bounds cross.
fn clamp(value: i64, lo: i64, hi: i64) -> i64 {
    value.max(lo).min(hi)
}

fn to_count(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderhub_core::{AllocationState, PoolAutoScaleSettings, PoolState};

    fn calc(requested: u32) -> Calc {
        Calc {
            requested,
            low: NodeBounds::unbounded(),
            dedicated: NodeBounds::unbounded(),
        }
    }

    struct Calc {
        requested: u32,
        low: NodeBounds,
        dedicated: NodeBounds,
    }

    impl Calc {
        fn low(mut self, current: u32, min: u32, max: u32) -> Self {
            self.low = NodeBounds::new(current, min, max);
            self
        }

        fn dedicated(mut self, current: u32, min: u32, max: u32) -> Self {
            self.dedicated = NodeBounds::new(current, min, max);
            self
        }

        /// (low_priority, dedicated)
        fn run(self) -> (u32, u32) {
            let t = calculate_targets(self.requested, self.low, self.dedicated);
            (t.low_priority, t.dedicated)
        }
    }

    #[test]
    fn no_restrictions_allocates_only_low_priority() {
        for requested in [0, 5, 100] {
            assert_eq!(calc(requested).run(), (requested, 0));
        }
    }

    #[test]
    fn no_low_priority_allocates_only_dedicated() {
        for requested in [0, 5, 100] {
            assert_eq!(calc(requested).low(0, 0, 0).run(), (0, requested));
        }
    }

    #[test]
    fn low_priority_filled_first() {
        assert_eq!(calc(1).run(), (1, 0));
        assert_eq!(calc(10).low(0, 0, 10).dedicated(0, 0, 10).run(), (10, 0));
    }

    #[test]
    fn dedicated_takes_the_remainder() {
        assert_eq!(calc(2).low(0, 0, 1).run(), (1, 1));
    }

    #[test]
    fn dedicated_minimum_is_respected() {
        assert_eq!(calc(5).dedicated(0, 2, u32::MAX).run(), (3, 2));
    }

    #[test]
    fn never_scales_down() {
        assert_eq!(calc(0).low(1, 0, u32::MAX).dedicated(2, 0, u32::MAX).run(), (1, 2));
    }

    #[test]
    fn maximums_are_not_exceeded() {
        assert_eq!(calc(10).low(0, 0, 2).dedicated(0, 0, 3).run(), (2, 3));
    }

    #[test]
    fn current_dedicated_raises_the_minimum() {
        assert_eq!(calc(7).low(1, 1, 4).dedicated(5, 0, u32::MAX).run(), (2, 5));
    }

    #[test]
    fn results_stay_within_bounds() {
        for requested in 0..40 {
            for low_current in 0..6 {
                for ded_current in 0..6 {
                    let low = NodeBounds::new(low_current, 2, 12);
                    let dedicated = NodeBounds::new(ded_current, 1, 8);
                    let t = calculate_targets(requested, low, dedicated);
                    assert!(t.low_priority >= low_current);
                    assert!(t.dedicated >= ded_current);
                    assert!(t.low_priority >= low_current.max(2) && t.low_priority <= 12);
                    assert!(t.dedicated >= ded_current.max(1) && t.dedicated <= 8);
                }
            }
        }
    }

    #[test]
    fn pool_targets_use_metadata_bounds() {
        let pool = ComputePool {
            id: "pool-1".to_string(),
            state: PoolState::Active,
            allocation_state: AllocationState::Steady,
            current_dedicated: 0,
            current_low_priority: 0,
            target_dedicated: 0,
            target_low_priority: 0,
            autoscale: PoolAutoScaleSettings {
                min_dedicated: 0,
                min_low_priority: 0,
                max_dedicated: 20,
                max_low_priority: 100,
                ..PoolAutoScaleSettings::default()
            },
        };
        assert_eq!(
            targets_for_pool(&pool, 50),
            ScaleTargets {
                dedicated: 0,
                low_priority: 50
            }
        );
    }
}

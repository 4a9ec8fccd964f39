// Allocation governor
// The limit is a delta over the heap usage recorded when it was set.
// Usage is measured in KB (what the collector reports), limits in MB.

/// Smallest accepted limit, in MB.
pub const MIN_ALLOC_LIMIT_MB: i32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Governor {
    limit_mb: i32,
    baseline_kb: i64,
}

impl Governor {
    /// Configured limit in MB; 0 when unlimited.
    pub fn limit_mb(&self) -> i32 {
        self.limit_mb
    }

    pub fn is_limited(&self) -> bool {
        self.limit_mb > 0
    }

    pub fn disable(&mut self) {
        self.limit_mb = 0;
        self.baseline_kb = 0;
    }

    /// Set a new limit over the current usage. Returns false (and changes
    /// nothing) when the limit is below the minimum.
    pub fn set(&mut self, limit_mb: i32, usage_kb: i64) -> bool {
        if limit_mb < MIN_ALLOC_LIMIT_MB {
            return false;
        }
        self.limit_mb = limit_mb;
        self.baseline_kb = usage_kb;
        true
    }

    pub fn ceiling_kb(&self) -> Option<i64> {
        self.is_limited()
            .then(|| self.baseline_kb + i64::from(self.limit_mb) * 1024)
    }

    pub fn exceeded(&self, usage_kb: i64) -> bool {
        self.ceiling_kb().is_some_and(|ceiling| usage_kb > ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_exceeded() {
        let g = Governor::default();
        assert!(!g.exceeded(i64::MAX));
        assert_eq!(g.ceiling_kb(), None);
    }

    #[test]
    fn test_ceiling_over_baseline() {
        let mut g = Governor::default();
        assert!(!g.set(MIN_ALLOC_LIMIT_MB - 1, 100));
        assert!(!g.is_limited());
        assert!(g.set(10, 2000));
        assert_eq!(g.ceiling_kb(), Some(2000 + 10 * 1024));
        assert!(!g.exceeded(2000 + 10 * 1024));
        assert!(g.exceeded(2001 + 10 * 1024));
        g.disable();
        assert!(!g.exceeded(i64::MAX));
    }
}

use crate::ConnectionPool;

/// Connection pool status information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgPoolStatus {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Current number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for connections
    pub waiting: usize,
}

impl PgPoolStatus {
    /// Takes a snapshot of the given pool.
    pub fn of(pool: &ConnectionPool) -> Self {
        let status = pool.status();
        Self {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Returns the number of connections currently borrowed.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available)
    }

    /// Returns the utilization percentage of the pool (0.0 to 1.0).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.in_use() as f64 / self.max_size as f64
        }
    }

    /// Returns whether the pool is under pressure (high utilization or waiting requests).
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PgPoolStatus {
            max_size: 10,
            size: 8,
            available: 2,
            waiting: 0,
        };

        assert_eq!(status.in_use(), 6);
        assert_eq!(status.utilization(), 0.6);
    }

    #[test]
    fn test_pool_status_pressure() {
        let waiting = PgPoolStatus {
            max_size: 10,
            size: 5,
            available: 3,
            waiting: 2,
        };
        assert!(waiting.is_under_pressure());

        let idle = PgPoolStatus {
            max_size: 0,
            size: 0,
            available: 0,
            waiting: 0,
        };
        assert_eq!(idle.utilization(), 0.0);
        assert!(!idle.is_under_pressure());
    }
}

use crate::occurrence::{Horizon, DEFAULT_MAX_INSTANCES};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for materialization behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Materialization window for recurring tasks, in days
    pub lookahead_days: u32,
    /// Cap on instances per task
    pub max_instances: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_days: 365,
            max_instances: DEFAULT_MAX_INSTANCES,
        }
    }
}

impl EngineConfig {
    /// The expansion horizon as seen from `now`.
    pub fn horizon_at(&self, now: DateTime<Utc>) -> Horizon {
        Horizon::until(now + Duration::days(i64::from(self.lookahead_days))).with_max_instances(self.max_instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_horizon() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let horizon = EngineConfig::default().horizon_at(now);
        assert_eq!(horizon.until, Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap());
        assert_eq!(horizon.max_instances, 1000);
    }
}

//! Election tuning.

use std::time::Duration;

/// Priority base for constrained platforms.
pub const PRIORITY_BASE_LOW: u16 = 128;

/// Priority base for higher-capability platforms; preferred as leader.
pub const PRIORITY_BASE_HIGH: u16 = 256;

/// Configuration for an election agent.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// This node's device id.
    pub device_id: u64,

    /// Zero disables candidacy: the node only ever follows.
    pub priority: u16,

    /// How long a candidate collects beacons before deciding.
    pub window: Duration,

    /// Beacons older than this are forgotten; a leader that stays silent
    /// this long is presumed gone.
    pub leader_timeout: Duration,

    /// Beacon period while leading.
    pub beacon_interval: Duration,

    /// Beacons per candidacy burst before yielding for a window.
    pub candidacy_rounds: u32,

    /// DROP_LEADER beacons sent at startup.
    pub startup_beacons: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            priority: PRIORITY_BASE_LOW,
            window: Duration::from_secs(3),
            leader_timeout: Duration::from_secs(4),
            beacon_interval: Duration::from_secs(1),
            candidacy_rounds: 8,
            startup_beacons: 3,
        }
    }
}

impl ElectionConfig {
    /// Config for `device_id` with `priority`, other settings default.
    #[must_use]
    pub fn new(device_id: u64, priority: u16) -> Self {
        Self {
            device_id,
            priority,
            ..Default::default()
        }
    }

    /// Whether this node may lead.
    pub const fn eligible(&self) -> bool {
        self.priority > 0
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_leader_timeout(mut self, timeout: Duration) -> Self {
        self.leader_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_beacon_interval(mut self, interval: Duration) -> Self {
        self.beacon_interval = interval;
        self
    }

    #[must_use]
    pub fn with_candidacy_rounds(mut self, rounds: u32) -> Self {
        self.candidacy_rounds = rounds;
        self
    }
}

/// Delay between startup DROP_LEADER beacons: `(draw >> 9)` units of 16 ms.
pub fn startup_jitter(draw: u16) -> Duration {
    Duration::from_millis(u64::from(draw >> 9) * 16)
}

/// Delay between candidacy beacons: `(draw >> 5)` ms.
pub fn candidacy_jitter(draw: u16) -> Duration {
    Duration::from_millis(u64::from(draw >> 5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_bounds() {
        assert_eq!(startup_jitter(0), Duration::ZERO);
        assert_eq!(startup_jitter(u16::MAX), Duration::from_millis(127 * 16));
        assert_eq!(candidacy_jitter(u16::MAX), Duration::from_millis(2047));
    }

    #[test]
    fn priority_zero_is_not_eligible() {
        assert!(!ElectionConfig::new(1, 0).eligible());
        assert!(ElectionConfig::new(1, PRIORITY_BASE_HIGH).eligible());
    }
}

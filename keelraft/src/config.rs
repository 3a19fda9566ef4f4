//! Raft node configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Tunables of a Raft node.
///
/// `RaftConfig::default()` carries production-sensible values; tests shrink
/// the timing fields to keep runs short. Construct, adjust, then call
/// [`validate`](Self::validate).
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout.
    pub min_election_timeout: Duration,

    /// Upper bound of the randomized election timeout.
    pub max_election_timeout: Duration,

    /// Interval between (possibly empty) append broadcasts while the leader
    /// is idle.
    pub leader_heartbeat_period: Duration,

    /// A follower considers the leader lost after this long without a valid
    /// append or snapshot request; a leader that cannot observe responses
    /// from a majority within this window steps down. Also the sticky-vote
    /// window.
    pub leader_heartbeat_timeout: Duration,

    /// Take a state machine snapshot every this many committed entries.
    pub commit_count_to_take_snapshot: u64,

    /// Bound on the uncommitted log tail; new submissions are rejected
    /// beyond it. Also bounds how deep the log can be truncated from the
    /// tail (plus one).
    pub max_uncommitted_log_entry_count: u64,

    /// Bound on client futures awaiting commit.
    pub max_pending_log_entry_count: usize,

    /// Maximum number of entries (or snapshot chunks) per replication
    /// message.
    pub append_entries_request_batch_size: usize,

    /// When true, a freshly elected leader appends a `NewTerm` entry instead
    /// of a `Noop`, so state machines can observe leader changes.
    pub enable_new_term_operation: bool,

    /// Cadence of unsolicited node report publications. Reports are also
    /// published immediately on role, term, status or membership changes.
    pub report_publish_period: Duration,

    /// Accepted for forward compatibility: lets lagging followers fetch
    /// snapshot chunks from peer followers. This implementation always
    /// serves chunks from the leader.
    pub transfer_snapshots_from_followers: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            min_election_timeout: Duration::from_millis(1500),
            max_election_timeout: Duration::from_millis(3000),
            leader_heartbeat_period: Duration::from_millis(500),
            leader_heartbeat_timeout: Duration::from_secs(5),
            commit_count_to_take_snapshot: 10_000,
            max_uncommitted_log_entry_count: 5_000,
            max_pending_log_entry_count: 4_096,
            append_entries_request_batch_size: 512,
            enable_new_term_operation: false,
            report_publish_period: Duration::from_secs(10),
            transfer_snapshots_from_followers: false,
        }
    }
}

impl RaftConfig {
    /// Validates ranges and returns the config unchanged.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.min_election_timeout >= self.max_election_timeout {
            return Err(ConfigError::EmptyElectionTimeoutRange {
                min: self.min_election_timeout,
                max: self.max_election_timeout,
            });
        }
        if self.min_election_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "min_election_timeout",
            });
        }
        if self.leader_heartbeat_period.is_zero() {
            return Err(ConfigError::Zero {
                name: "leader_heartbeat_period",
            });
        }
        if self.leader_heartbeat_timeout <= self.leader_heartbeat_period {
            return Err(ConfigError::HeartbeatTimeoutTooSmall {
                timeout: self.leader_heartbeat_timeout,
                period: self.leader_heartbeat_period,
            });
        }
        if self.commit_count_to_take_snapshot == 0 {
            return Err(ConfigError::Zero {
                name: "commit_count_to_take_snapshot",
            });
        }
        if self.max_uncommitted_log_entry_count == 0 {
            return Err(ConfigError::Zero {
                name: "max_uncommitted_log_entry_count",
            });
        }
        if self.max_pending_log_entry_count == 0 {
            return Err(ConfigError::Zero {
                name: "max_pending_log_entry_count",
            });
        }
        if self.append_entries_request_batch_size == 0 {
            return Err(ConfigError::Zero {
                name: "append_entries_request_batch_size",
            });
        }
        Ok(self)
    }

    /// The timer pulse driving the node: the smaller of the heartbeat period
    /// and a quarter of the minimum election timeout.
    pub fn tick_interval(&self) -> Duration {
        let quarter_election = self.min_election_timeout / 4;
        self.leader_heartbeat_period.min(quarter_election).max(Duration::from_millis(1))
    }

    pub(crate) fn ticks_of(&self, duration: Duration) -> u64 {
        let tick = self.tick_interval().as_micros().max(1);
        ((duration.as_micros() + tick - 1) / tick) as u64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::RaftConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RaftConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_election_range() {
        let config = RaftConfig {
            min_election_timeout: Duration::from_millis(500),
            max_election_timeout: Duration::from_millis(500),
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_heartbeat_timeout_below_period() {
        let config = RaftConfig {
            leader_heartbeat_period: Duration::from_millis(500),
            leader_heartbeat_timeout: Duration::from_millis(400),
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_conversion_rounds_up() {
        let config = RaftConfig {
            min_election_timeout: Duration::from_millis(1000),
            max_election_timeout: Duration::from_millis(2000),
            leader_heartbeat_period: Duration::from_millis(300),
            ..RaftConfig::default()
        };
        // Tick interval is min(300ms, 250ms) = 250ms.
        assert_eq!(Duration::from_millis(250), config.tick_interval());
        assert_eq!(4, config.ticks_of(Duration::from_millis(1000)));
        assert_eq!(2, config.ticks_of(Duration::from_millis(300)));
    }
}
